use std::path::PathBuf;

use super::SizeSpec;
use crate::model_manager::ModelError;
use crate::runtime::RuntimeError;

/// Failure to produce a usable [`super::ModelHandle`].
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Model '{0}' is not available locally, download it first")]
    NotDownloaded(String),
    #[error("Missing model file {path:?}: {message}")]
    MissingFile { path: PathBuf, message: String },
    #[error("Invalid model configuration in {path:?}: {message}")]
    InvalidConfig { path: PathBuf, message: String },
    #[error("Failed to create inference session: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Model manager error: {0}")]
    Manager(#[from] ModelError),
    #[error("Unknown model identifier: {0}")]
    UnknownIdentifier(String),
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),
}

impl From<ort::Error> for ModelLoadError {
    fn from(err: ort::Error) -> Self {
        ModelLoadError::Runtime(RuntimeError::Ort(err))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    /// The model family does not accept this size convention.
    #[error("Unsupported size specification {spec}: {reason}")]
    UnsupportedSize { spec: SizeSpec, reason: String },
    #[error("Invalid size specification {0}")]
    InvalidSize(SizeSpec),
    #[error("Image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("Failed to build pixel tensor: {0}")]
    Tensor(String),
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Forward pass failed: {0}")]
    Runtime(String),
    #[error("Model output '{0}' is missing")]
    MissingOutput(String),
    #[error("Model output '{name}' has unexpected shape {shape:?}")]
    BadShape { name: String, shape: Vec<usize> },
}

impl From<ort::Error> for InferenceError {
    fn from(err: ort::Error) -> Self {
        InferenceError::Runtime(err.to_string())
    }
}
