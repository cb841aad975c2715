use serde::Serialize;

mod classifier;
mod error;
pub(crate) mod utils;

pub use classifier::{Classifier, TOP_K};
pub use error::ClassifierError;

/// One ranked class prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    /// Softmax probability in [0, 1]
    pub score: f32,
}

/// The outcome of one classification call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    /// Highest-probability classes, sorted by descending score
    pub top3: Vec<Prediction>,
    /// Wall-clock milliseconds spent preprocessing and running the forward pass
    pub inference_time_ms: f64,
}

impl ClassificationResult {
    pub fn best(&self) -> Option<&Prediction> {
        self.top3.first()
    }
}
