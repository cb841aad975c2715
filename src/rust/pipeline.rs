//! Request orchestration: optional detection, then classification, with a shared
//! model cache so each identifier is loaded once per process.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use image::RgbImage;
use log::{debug, info};
use serde::Serialize;

use crate::classifier::{ClassificationResult, Classifier, ClassifierError};
use crate::config::{AppConfig, ClassifierModel};
use crate::detector::{Annotator, DetectionResult, Detector, DetectorError};
use crate::provider::{ModelHandle, ModelLoadError, ModelProvider};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Model '{identifier}' unavailable: {source}")]
    Load {
        identifier: String,
        #[source]
        source: ModelLoadError,
    },
    #[error("Classification failed: {0}")]
    Classify(#[from] ClassifierError),
    #[error("Detection failed: {0}")]
    Detect(#[from] DetectorError),
    #[error("Unknown model '{0}'")]
    UnknownModel(String),
    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),
    #[error("Model cache lock poisoned")]
    LockPoisoned,
}

/// Loaded models keyed by identifier. Entries are never evicted.
#[derive(Debug, Default)]
pub struct ModelCache {
    handles: Mutex<HashMap<String, Arc<ModelHandle>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached handle for `identifier`, loading it through `provider` on
    /// first use.
    ///
    /// The map stays locked while loading, so concurrent callers never load the same
    /// identifier twice. A failed load caches nothing.
    pub fn get_or_load(
        &self,
        identifier: &str,
        provider: &dyn ModelProvider,
    ) -> Result<Arc<ModelHandle>, PipelineError> {
        let mut handles = self.handles.lock().map_err(|_| PipelineError::LockPoisoned)?;
        if let Some(handle) = handles.get(identifier) {
            debug!("Model cache hit: {}", identifier);
            return Ok(Arc::clone(handle));
        }

        info!("Model cache miss, loading {}", identifier);
        let handle = provider
            .load(identifier)
            .map_err(|source| PipelineError::Load {
                identifier: identifier.to_string(),
                source,
            })?;
        let handle = Arc::new(handle);
        handles.insert(identifier.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.handles
            .lock()
            .map(|handles| handles.contains_key(identifier))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.handles.lock().map(|handles| handles.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One user request.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Classifier display name, identifier or name prefix. `None` picks the first.
    pub model: Option<String>,
    /// Square edge length. `None` picks the first configured resolution.
    pub target_size: Option<u32>,
    pub detect: bool,
    /// Overrides the configured detection threshold.
    pub threshold: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub model_name: String,
    pub model_id: String,
    pub target_size: u32,
    pub classification: ClassificationResult,
    pub detection: Option<DetectionResult>,
    pub detection_time_ms: Option<f64>,
    pub classification_time_ms: f64,
    pub total_time_ms: f64,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model: {} ({})", self.model_name, self.model_id)?;
        writeln!(f, "Resolution: {} x {}", self.target_size, self.target_size)?;

        if let Some(detection) = &self.detection {
            writeln!(f)?;
            writeln!(f, "Objects detected: {}", detection.detections.len())?;
            for object in &detection.detections {
                let [x_min, y_min, x_max, y_max] = object.bbox;
                writeln!(
                    f,
                    "  {} - {:.4} at ({}, {}, {}, {})",
                    object.label, object.score, x_min, y_min, x_max, y_max
                )?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Top 3 predictions:")?;
        for (rank, prediction) in self.classification.top3.iter().enumerate() {
            writeln!(f, "{}. {} - {:.4}", rank + 1, prediction.label, prediction.score)?;
        }

        writeln!(f)?;
        writeln!(f, "Latency breakdown:")?;
        if let Some(detection_ms) = self.detection_time_ms {
            writeln!(f, "  Object detection: {:.2} ms", detection_ms)?;
        }
        writeln!(f, "  Classification: {:.2} ms", self.classification_time_ms)?;
        write!(f, "  Total: {:.2} ms", self.total_time_ms)
    }
}

/// One row of a model comparison.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonEntry {
    pub model_name: String,
    pub model_id: String,
    pub classification: ClassificationResult,
}

/// Runs requests against models supplied by `P`, caching every loaded handle.
pub struct Pipeline<P: ModelProvider> {
    provider: P,
    config: AppConfig,
    cache: ModelCache,
    annotator: Annotator,
}

impl<P: ModelProvider> Pipeline<P> {
    /// Creates a pipeline that draws detections with the system font when available.
    pub fn new(provider: P, config: AppConfig) -> Self {
        Self::with_annotator(provider, config, Annotator::default())
    }

    pub fn with_annotator(provider: P, config: AppConfig, annotator: Annotator) -> Self {
        Self {
            provider,
            config,
            cache: ModelCache::new(),
            annotator,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn select_model(&self, selector: Option<&str>) -> Result<&ClassifierModel, PipelineError> {
        match selector {
            Some(name) => self
                .config
                .find_classifier(name)
                .ok_or_else(|| PipelineError::UnknownModel(name.to_string())),
            None => self
                .config
                .default_classifier()
                .ok_or_else(|| PipelineError::UnknownModel("<default>".to_string())),
        }
    }

    fn select_size(&self, target_size: Option<u32>) -> Result<u32, PipelineError> {
        match target_size {
            Some(0) => Err(PipelineError::InvalidResolution(
                "target size must be larger than zero".into(),
            )),
            Some(size) => Ok(size),
            None => self.config.default_resolution().ok_or_else(|| {
                PipelineError::InvalidResolution("no resolution configured".into())
            }),
        }
    }

    pub fn classifier(&self, identifier: &str) -> Result<Classifier, PipelineError> {
        let handle = self.cache.get_or_load(identifier, &self.provider)?;
        Ok(Classifier::new(handle))
    }

    pub fn detector(&self) -> Result<Detector, PipelineError> {
        let handle = self.cache.get_or_load(&self.config.detector, &self.provider)?;
        Ok(Detector::new(handle).with_annotator(self.annotator.clone()))
    }

    /// Runs detection when requested, then classification.
    ///
    /// Classification always runs and never depends on detection output; a failed
    /// detection fails the whole request.
    pub fn run(&self, image: &RgbImage, request: &RunRequest) -> Result<RunReport, PipelineError> {
        let model = self.select_model(request.model.as_deref())?;
        let target_size = self.select_size(request.target_size)?;
        let threshold = request.threshold.unwrap_or(self.config.detection_threshold);

        let start = Instant::now();

        let detection = if request.detect {
            let detector = self.detector()?;
            Some(detector.detect(image, threshold)?)
        } else {
            None
        };

        let classifier = self.classifier(&model.identifier)?;
        let classification = classifier.classify(image, target_size)?;

        let total_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        info!(
            "Processed image with '{}' at {}px in {:.2} ms",
            model.name, target_size, total_time_ms
        );

        Ok(RunReport {
            model_name: model.name.clone(),
            model_id: model.identifier.clone(),
            target_size,
            classification_time_ms: classification.inference_time_ms,
            detection_time_ms: detection.as_ref().map(|d| d.inference_time_ms),
            classification,
            detection,
            total_time_ms,
        })
    }

    /// Classifies `image` with every configured classifier, in configuration order.
    pub fn compare(&self, image: &RgbImage, target_size: u32) -> Result<Vec<ComparisonEntry>, PipelineError> {
        let target_size = self.select_size(Some(target_size))?;
        let mut entries = Vec::with_capacity(self.config.classifiers.len());
        for model in &self.config.classifiers {
            let classification = self.classifier(&model.identifier)?.classify(image, target_size)?;
            entries.push(ComparisonEntry {
                model_name: model.name.clone(),
                model_id: model.identifier.clone(),
                classification,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        InferenceError, LabelTable, ModelOutputs, PixelBatch, Predict, Preprocess, PreprocessError, SizeSpec,
    };
    use ndarray::{Array4, ArrayD, IxDyn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Passthrough;

    impl Preprocess for Passthrough {
        fn preprocess(&self, _image: &RgbImage, _size: SizeSpec) -> Result<PixelBatch, PreprocessError> {
            Ok(PixelBatch::new(Array4::zeros((1, 3, 1, 1))))
        }

        fn preprocess_default(&self, _image: &RgbImage) -> Result<PixelBatch, PreprocessError> {
            Ok(PixelBatch::new(Array4::zeros((1, 3, 1, 1))))
        }
    }

    struct Logits;

    impl Predict for Logits {
        fn forward(&self, _batch: &PixelBatch) -> Result<ModelOutputs, InferenceError> {
            let logits = ArrayD::from_shape_vec(IxDyn(&[1, 3]), vec![1.0, 2.0, 3.0]).unwrap();
            Ok(ModelOutputs::new().with("logits", logits))
        }
    }

    #[derive(Default)]
    struct CountingProvider {
        loads: AtomicUsize,
    }

    impl ModelProvider for CountingProvider {
        fn load(&self, identifier: &str) -> Result<ModelHandle, ModelLoadError> {
            if identifier == "missing/model" {
                return Err(ModelLoadError::NotDownloaded(identifier.to_string()));
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(ModelHandle::new(
                identifier,
                Box::new(Passthrough),
                Box::new(Logits),
                LabelTable::from_labels(["x", "y", "z"]),
            ))
        }
    }

    #[test]
    fn test_cache_loads_once() {
        let provider = CountingProvider::default();
        let cache = ModelCache::new();

        let first = cache.get_or_load("a/model", &provider).unwrap();
        let second = cache.get_or_load("a/model", &provider).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);
        assert!(cache.contains("a/model"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_load_not_cached() {
        let provider = CountingProvider::default();
        let cache = ModelCache::new();
        assert!(matches!(
            cache.get_or_load("missing/model", &provider),
            Err(PipelineError::Load { .. })
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_run_without_detection() {
        let pipeline = Pipeline::with_annotator(
            CountingProvider::default(),
            AppConfig::default(),
            Annotator::without_font(),
        );
        let image = RgbImage::new(4, 4);
        let report = pipeline.run(&image, &RunRequest::default()).unwrap();

        assert_eq!(report.model_id, "google/mobilenet_v2_1.0_224");
        assert_eq!(report.target_size, 224);
        assert!(report.detection.is_none());
        assert!(report.detection_time_ms.is_none());
        assert_eq!(report.classification.top3[0].label, "z");
        assert!(report.total_time_ms >= report.classification_time_ms);
        assert!(!pipeline.cache().contains("facebook/detr-resnet-50"));
    }

    #[test]
    fn test_unknown_model_and_zero_size() {
        let pipeline = Pipeline::with_annotator(
            CountingProvider::default(),
            AppConfig::default(),
            Annotator::without_font(),
        );
        let image = RgbImage::new(4, 4);
        let request = RunRequest {
            model: Some("gigantic".into()),
            ..RunRequest::default()
        };
        assert!(matches!(pipeline.run(&image, &request), Err(PipelineError::UnknownModel(_))));

        let request = RunRequest {
            target_size: Some(0),
            ..RunRequest::default()
        };
        assert!(matches!(
            pipeline.run(&image, &request),
            Err(PipelineError::InvalidResolution(_))
        ));
        assert!(pipeline.cache().is_empty());
    }

    #[test]
    fn test_report_display() {
        let pipeline = Pipeline::with_annotator(
            CountingProvider::default(),
            AppConfig::default(),
            Annotator::without_font(),
        );
        let report = pipeline.run(&RgbImage::new(4, 4), &RunRequest::default()).unwrap();
        let text = report.to_string();
        assert!(text.contains("1. z - 0.6652"));
        assert!(text.contains("Classification:"));
        assert!(!text.contains("Object detection:"));
    }

    #[test]
    fn test_compare_in_config_order() {
        let provider = CountingProvider::default();
        let pipeline = Pipeline::with_annotator(provider, AppConfig::default(), Annotator::without_font());
        let entries = pipeline.compare(&RgbImage::new(4, 4), 160).unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.model_id.as_str()).collect();
        assert_eq!(ids, vec!["google/mobilenet_v2_1.0_224", "microsoft/resnet-50"]);
        assert_eq!(pipeline.provider().loads.load(Ordering::SeqCst), 2);
    }
}
