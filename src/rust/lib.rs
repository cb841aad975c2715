//! Image classification with optional object detection, backed by pretrained ONNX
//! models fetched from a Hugging Face style hub.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use edgesight::{AppConfig, HubProvider, ModelManager, Pipeline, RunRequest, RuntimeConfig};
//!
//! let config = AppConfig::default();
//! let provider = HubProvider::new(ModelManager::new_default()?, RuntimeConfig::from(&config.runtime));
//! let pipeline = Pipeline::new(provider, config);
//!
//! let image = edgesight::decode::decode_file("street.jpg".as_ref())?;
//! let request = RunRequest {
//!     model: Some("fast".into()),
//!     target_size: Some(160),
//!     detect: true,
//!     threshold: None,
//! };
//! let report = pipeline.run(&image, &request)?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```
//!
//! Model files must be present in the cache first; see
//! [`ModelManager::ensure_model_downloaded`].
//!
//! # Thread Safety
//!
//! Loaded models are immutable and shared behind `Arc`, so a [`Classifier`] or
//! [`Detector`] can be cloned into several threads and used concurrently.

pub mod classifier;
pub mod config;
pub mod decode;
pub mod detector;
pub mod model_manager;
pub mod pipeline;
pub mod provider;
mod runtime;

pub use classifier::{ClassificationResult, Classifier, ClassifierError, Prediction, TOP_K};
pub use config::{AppConfig, ClassifierModel, ConfigError, Resolution, RuntimeSettings};
pub use decode::DecodeError;
pub use detector::{Annotator, Detection, DetectionResult, Detector, DetectorError};
pub use model_manager::{ModelError, ModelManager};
pub use pipeline::{ComparisonEntry, ModelCache, Pipeline, PipelineError, RunReport, RunRequest};
pub use provider::{HubProvider, ModelHandle, ModelLoadError, ModelProvider};
pub use runtime::{create_session_builder, RuntimeConfig, RuntimeError};

pub fn init_logger() {
    env_logger::init();
}
