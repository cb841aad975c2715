//! The pretrained-model provider seam.
//!
//! Classification and detection never talk to ONNX Runtime directly. They see a
//! [`ModelHandle`] made of three parts:
//!
//! - a [`Preprocess`] implementation turning an RGB raster into a pixel tensor,
//! - a [`Predict`] implementation running the forward pass,
//! - a [`LabelTable`] mapping class indices to human-readable names.
//!
//! Handles are produced by a [`ModelProvider`], keyed by a model identifier such as
//! `google/mobilenet_v2_1.0_224`. The production provider is [`HubProvider`].

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use image::RgbImage;
use ndarray::{Array4, ArrayD};
use serde::Deserialize;

mod error;
mod onnx;
pub mod postprocess;
pub mod preprocess;

pub use error::{InferenceError, ModelLoadError, PreprocessError};
pub use onnx::{HubProvider, OnnxPredictor};
pub use preprocess::{ImageProcessor, ProcessorConfig, ResizeFamily, SizeConfig};

/// How the preprocessor should size an image before the forward pass.
///
/// Model families disagree on the convention: some take an explicit
/// `(height, width)` pair, others only a shortest-edge length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSpec {
    HeightWidth { height: u32, width: u32 },
    ShortestEdge(u32),
}

impl SizeSpec {
    /// A square `(edge, edge)` size in the height/width convention.
    pub fn square(edge: u32) -> Self {
        Self::HeightWidth {
            height: edge,
            width: edge,
        }
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeightWidth { height, width } => write!(f, "{{height: {}, width: {}}}", height, width),
            Self::ShortestEdge(edge) => write!(f, "{{shortest_edge: {}}}", edge),
        }
    }
}

/// A preprocessed NCHW float tensor with batch size 1.
#[derive(Debug, Clone)]
pub struct PixelBatch {
    pub pixel_values: Array4<f32>,
}

impl PixelBatch {
    pub fn new(pixel_values: Array4<f32>) -> Self {
        Self { pixel_values }
    }

    /// `(height, width)` of the tensor's spatial dimensions.
    pub fn spatial_size(&self) -> (usize, usize) {
        let shape = self.pixel_values.shape();
        (shape[2], shape[3])
    }
}

/// Raw float outputs of a forward pass, keyed by output name.
#[derive(Debug, Clone, Default)]
pub struct ModelOutputs {
    names: Vec<String>,
    tensors: HashMap<String, ArrayD<f32>>,
}

impl ModelOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, tensor: ArrayD<f32>) -> Self {
        self.insert(name, tensor);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        let name = name.into();
        if !self.tensors.contains_key(&name) {
            self.names.push(name.clone());
        }
        self.tensors.insert(name, tensor);
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(name)
    }

    /// Returns the named output, failing with [`InferenceError::MissingOutput`].
    pub fn require(&self, name: &str) -> Result<&ArrayD<f32>, InferenceError> {
        self.get(name)
            .ok_or_else(|| InferenceError::MissingOutput(name.to_string()))
    }

    /// The class logits: the `logits` output when present, otherwise the first output.
    pub fn logits(&self) -> Result<&ArrayD<f32>, InferenceError> {
        self.get("logits")
            .or_else(|| self.names.first().and_then(|name| self.tensors.get(name)))
            .ok_or_else(|| InferenceError::MissingOutput("logits".to_string()))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Turns a decoded RGB raster into model input.
pub trait Preprocess: Send + Sync {
    /// Sizes the image per `size`.
    ///
    /// Returns [`PreprocessError::UnsupportedSize`] when the model family does not
    /// understand the requested convention.
    fn preprocess(&self, image: &RgbImage, size: SizeSpec) -> Result<PixelBatch, PreprocessError>;

    /// Sizes the image with the model's own configured defaults.
    fn preprocess_default(&self, image: &RgbImage) -> Result<PixelBatch, PreprocessError>;
}

/// Runs an inference-only forward pass.
pub trait Predict: Send + Sync {
    fn forward(&self, batch: &PixelBatch) -> Result<ModelOutputs, InferenceError>;
}

/// Loads model handles by identifier.
pub trait ModelProvider {
    fn load(&self, identifier: &str) -> Result<ModelHandle, ModelLoadError>;
}

#[derive(Debug, Deserialize)]
struct ModelConfigFile {
    #[serde(default)]
    id2label: HashMap<String, String>,
}

/// Class index to label lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelTable {
    labels: HashMap<usize, String>,
}

impl LabelTable {
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).enumerate().collect(),
        }
    }

    /// Builds the table from an `id2label` map whose keys are decimal indices.
    pub fn from_id2label(id2label: HashMap<String, String>) -> Result<Self, String> {
        let mut labels = HashMap::with_capacity(id2label.len());
        for (key, label) in id2label {
            let index = key
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("id2label key '{}' is not a class index", key))?;
            labels.insert(index, label);
        }
        Ok(Self { labels })
    }

    /// Reads `id2label` from a model `config.json`.
    pub fn from_config_file(path: &Path) -> Result<Self, ModelLoadError> {
        let text = std::fs::read_to_string(path).map_err(|e| ModelLoadError::MissingFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: ModelConfigFile =
            serde_json::from_str(&text).map_err(|e| ModelLoadError::InvalidConfig {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Self::from_id2label(config.id2label).map_err(|message| ModelLoadError::InvalidConfig {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Resolves a class index, falling back to `LABEL_{index}` for unknown indices.
    pub fn resolve(&self, index: usize) -> String {
        match self.labels.get(&index) {
            Some(label) => label.clone(),
            None => {
                log::warn!("No label for class index {}", index);
                format!("LABEL_{}", index)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// A loaded model: preprocessor, predictor and label table bound to one identifier.
///
/// Immutable after load and safe to share across threads.
pub struct ModelHandle {
    identifier: String,
    preprocessor: Box<dyn Preprocess>,
    predictor: Box<dyn Predict>,
    labels: LabelTable,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<ModelHandle>();
    }
};

impl ModelHandle {
    pub fn new(
        identifier: impl Into<String>,
        preprocessor: Box<dyn Preprocess>,
        predictor: Box<dyn Predict>,
        labels: LabelTable,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            preprocessor,
            predictor,
            labels,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn preprocessor(&self) -> &dyn Preprocess {
        self.preprocessor.as_ref()
    }

    pub fn predictor(&self) -> &dyn Predict {
        self.predictor.as_ref()
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("identifier", &self.identifier)
            .field("num_labels", &self.labels.len())
            .finish_non_exhaustive()
    }
}
