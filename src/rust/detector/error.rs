use crate::provider::{InferenceError, ModelLoadError, PreprocessError};

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("Model error: {0}")]
    ModelError(#[from] ModelLoadError),
    #[error("Preprocessing error: {0}")]
    PreprocessError(#[from] PreprocessError),
    #[error("Detection error: {0}")]
    PredictionError(#[from] InferenceError),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Font error: {0}")]
    FontError(String),
}
