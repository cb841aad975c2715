use crate::provider::{InferenceError, ModelLoadError, PreprocessError};

/// Represents the different types of errors that can occur while classifying an image.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// Error occurred while loading the model
    #[error("Model error: {0}")]
    ModelError(#[from] ModelLoadError),
    /// Error occurred while preparing the image for the model
    #[error("Preprocessing error: {0}")]
    PreprocessError(#[from] PreprocessError),
    /// Error occurred while making predictions
    #[error("Prediction error: {0}")]
    PredictionError(#[from] InferenceError),
    /// Error occurred due to invalid input parameters
    #[error("Validation error: {0}")]
    ValidationError(String),
}
