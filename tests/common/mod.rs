#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use edgesight::provider::{
    ImageProcessor, InferenceError, LabelTable, ModelOutputs, PixelBatch, Predict, Preprocess,
    PreprocessError, ProcessorConfig, SizeSpec,
};
use edgesight::{ModelHandle, ModelLoadError, ModelProvider};
use env_logger::{Builder, Env};
use image::{Rgb, RgbImage};
use ndarray::{Array3, Array4, ArrayD, IxDyn};

pub const MOBILENET_PROCESSOR: &str = r#"{
    "image_processor_type": "MobileNetV2ImageProcessor",
    "size": {"shortest_edge": 256},
    "do_center_crop": true,
    "crop_size": {"height": 224, "width": 224},
    "image_mean": [0.5, 0.5, 0.5],
    "image_std": [0.5, 0.5, 0.5]
}"#;

pub const CONVNEXT_PROCESSOR: &str = r#"{
    "image_processor_type": "ConvNextImageProcessor",
    "size": {"shortest_edge": 224},
    "crop_pct": 0.875
}"#;

pub const VIT_PROCESSOR: &str = r#"{
    "image_processor_type": "ViTImageProcessor",
    "size": {"height": 224, "width": 224}
}"#;

pub const DETECTOR_LABELS: [&str; 2] = ["person", "cat"];

pub fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

pub fn processor(config: &str) -> ImageProcessor {
    ImageProcessor::new(ProcessorConfig::from_json(config).unwrap())
}

pub fn photo(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 90])
    })
}

/// Records every size it is asked for. When rejecting, height/width requests fail
/// with the error built by `error`.
pub struct ScriptedPreprocessor {
    pub calls: Arc<Mutex<Vec<SizeSpec>>>,
    reject_height_width: bool,
    error: fn(SizeSpec) -> PreprocessError,
}

impl ScriptedPreprocessor {
    pub fn accepting() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            reject_height_width: false,
            error: |spec| PreprocessError::InvalidSize(spec),
        }
    }

    pub fn rejecting_height_width(error: fn(SizeSpec) -> PreprocessError) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            reject_height_width: true,
            error,
        }
    }
}

impl Preprocess for ScriptedPreprocessor {
    fn preprocess(&self, _image: &RgbImage, size: SizeSpec) -> Result<PixelBatch, PreprocessError> {
        self.calls.lock().unwrap().push(size);
        if self.reject_height_width && matches!(size, SizeSpec::HeightWidth { .. }) {
            return Err((self.error)(size));
        }
        Ok(PixelBatch::new(Array4::zeros((1, 3, 4, 4))))
    }

    fn preprocess_default(&self, _image: &RgbImage) -> Result<PixelBatch, PreprocessError> {
        Ok(PixelBatch::new(Array4::zeros((1, 3, 4, 4))))
    }
}

/// Returns fixed `[1, classes]` logits and remembers the spatial size of each batch.
pub struct LogitsPredictor {
    logits: Vec<f32>,
    pub seen: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl LogitsPredictor {
    pub fn new(logits: Vec<f32>) -> Self {
        Self {
            logits,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Predict for LogitsPredictor {
    fn forward(&self, batch: &PixelBatch) -> Result<ModelOutputs, InferenceError> {
        self.seen.lock().unwrap().push(batch.spatial_size());
        let logits = ArrayD::from_shape_vec(IxDyn(&[1, self.logits.len()]), self.logits.clone()).unwrap();
        Ok(ModelOutputs::new().with("logits", logits))
    }
}

/// A DETR-shaped scene with three queries over `person`, `cat` and "no object":
/// a salient person (~0.965), a faint cat (~0.51) and a background query whose best
/// real class scores ~0.007 with a box hanging off the bottom-right corner.
pub struct SceneDetector;

impl Predict for SceneDetector {
    fn forward(&self, _batch: &PixelBatch) -> Result<ModelOutputs, InferenceError> {
        let logits = Array3::from_shape_vec(
            (1, 3, 3),
            vec![
                4.0, 0.0, 0.0, //
                0.0, 1.0, 0.5, //
                0.0, 0.0, 5.0,
            ],
        )
        .unwrap();
        let boxes = Array3::from_shape_vec(
            (1, 3, 4),
            vec![
                0.5, 0.5, 0.5, 0.5, //
                0.2, 0.2, 0.2, 0.2, //
                0.875, 0.875, 0.5, 0.5,
            ],
        )
        .unwrap();
        Ok(ModelOutputs::new()
            .with("logits", logits.into_dyn())
            .with("pred_boxes", boxes.into_dyn()))
    }
}

pub struct FailingPredictor;

impl Predict for FailingPredictor {
    fn forward(&self, _batch: &PixelBatch) -> Result<ModelOutputs, InferenceError> {
        Err(InferenceError::Runtime("forward pass exploded".into()))
    }
}

pub fn classifier_handle(identifier: &str, logits: Vec<f32>) -> ModelHandle {
    let labels: Vec<String> = (0..logits.len()).map(|i| format!("class_{}", i)).collect();
    ModelHandle::new(
        identifier,
        Box::new(processor(MOBILENET_PROCESSOR)),
        Box::new(LogitsPredictor::new(logits)),
        LabelTable::from_labels(labels),
    )
}

pub fn scene_detector_handle(identifier: &str) -> ModelHandle {
    ModelHandle::new(
        identifier,
        Box::new(ScriptedPreprocessor::accepting()),
        Box::new(SceneDetector),
        LabelTable::from_labels(DETECTOR_LABELS),
    )
}

type HandleFactory = Box<dyn Fn(&str) -> ModelHandle + Send + Sync>;

/// In-memory provider that counts how often each identifier is loaded.
#[derive(Default)]
pub struct FakeProvider {
    factories: HashMap<String, HandleFactory>,
    loads: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model<F>(mut self, identifier: &str, factory: F) -> Self
    where
        F: Fn(&str) -> ModelHandle + Send + Sync + 'static,
    {
        self.factories.insert(identifier.to_string(), Box::new(factory));
        self
    }

    /// The default configuration's two classifiers plus the scene detector.
    pub fn standard() -> Self {
        Self::new()
            .with_model("google/mobilenet_v2_1.0_224", |id| {
                classifier_handle(id, vec![0.1, 2.5, 0.3, 1.7, -1.0])
            })
            .with_model("microsoft/resnet-50", |id| {
                classifier_handle(id, vec![3.0, 0.2, 0.1, 0.0, 1.0])
            })
            .with_model("facebook/detr-resnet-50", scene_detector_handle)
    }

    pub fn loads(&self, identifier: &str) -> usize {
        self.loads.lock().unwrap().get(identifier).copied().unwrap_or(0)
    }

    pub fn total_loads(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl ModelProvider for FakeProvider {
    fn load(&self, identifier: &str) -> Result<ModelHandle, ModelLoadError> {
        let factory = self
            .factories
            .get(identifier)
            .ok_or_else(|| ModelLoadError::UnknownIdentifier(identifier.to_string()))?;
        *self.loads.lock().unwrap().entry(identifier.to_string()).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        Ok(factory(identifier))
    }
}
