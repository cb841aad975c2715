use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use log::{debug, info};
use ndarray::{Axis, Ix1, Ix2};

use super::error::ClassifierError;
use super::utils::{softmax, top_k};
use super::{ClassificationResult, Prediction};
use crate::provider::{
    InferenceError, ModelHandle, ModelLoadError, ModelProvider, PixelBatch, Preprocess,
    PreprocessError, SizeSpec,
};

/// Number of ranked predictions returned per image.
pub const TOP_K: usize = 3;

/// Image classifier bound to one loaded model.
///
/// The handle is shared, so cloning a `Classifier` is cheap and the same model can be
/// used from several threads at once:
///
/// ```rust,no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use edgesight::{Classifier, HubProvider, ModelManager, RuntimeConfig};
///
/// let provider = HubProvider::new(ModelManager::new_default()?, RuntimeConfig::default());
/// let classifier = Classifier::load(&provider, "google/mobilenet_v2_1.0_224")?;
///
/// let image = edgesight::decode::decode_file("cat.jpg".as_ref())?;
/// let result = classifier.classify(&image, 224)?;
/// for prediction in &result.top3 {
///     println!("{}: {:.4}", prediction.label, prediction.score);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Classifier {
    handle: Arc<ModelHandle>,
}

impl Classifier {
    /// Loads a classification model through `provider`.
    ///
    /// # Errors
    /// - `ModelLoadError` if the identifier is unknown or its files are unavailable
    pub fn load(provider: &dyn ModelProvider, identifier: &str) -> Result<Self, ModelLoadError> {
        info!("Loading classifier '{}'", identifier);
        let handle = provider.load(identifier)?;
        Ok(Self::new(Arc::new(handle)))
    }

    pub fn new(handle: Arc<ModelHandle>) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &Arc<ModelHandle> {
        &self.handle
    }

    /// Classifies `image` resized to a `target_size` x `target_size` input.
    ///
    /// The reported time covers preprocessing and the forward pass only; softmax and
    /// label lookup happen after the clock stops.
    ///
    /// # Errors
    /// - `ValidationError` if `target_size` is zero
    /// - `PreprocessError` if the image cannot be prepared with either size convention
    /// - `PredictionError` if the forward pass fails or yields no usable logits
    pub fn classify(&self, image: &RgbImage, target_size: u32) -> Result<ClassificationResult, ClassifierError> {
        if target_size == 0 {
            return Err(ClassifierError::ValidationError("Target size must be larger than zero".into()));
        }

        let start = Instant::now();
        let batch = preprocess_with_fallback(self.handle.preprocessor(), image, target_size)?;
        let outputs = self.handle.predictor().forward(&batch)?;
        let elapsed = start.elapsed();

        let logits = outputs.logits()?;
        let shape = logits.shape().to_vec();
        let bad_shape = || InferenceError::BadShape {
            name: "logits".to_string(),
            shape: shape.clone(),
        };
        let row = match logits.ndim() {
            1 => logits.view().into_dimensionality::<Ix1>().map_err(|_| bad_shape())?,
            2 if shape[0] > 0 => logits
                .view()
                .into_dimensionality::<Ix2>()
                .map_err(|_| bad_shape())?
                .index_axis_move(Axis(0), 0),
            _ => return Err(bad_shape().into()),
        };
        if row.is_empty() {
            return Err(bad_shape().into());
        }

        let probabilities = softmax(row);
        let labels = self.handle.labels();
        let top3 = top_k(&probabilities, TOP_K)
            .into_iter()
            .map(|(index, score)| Prediction {
                label: labels.resolve(index),
                score,
            })
            .collect();

        let inference_time_ms = elapsed.as_secs_f64() * 1000.0;
        debug!(
            "Classified with '{}' at {}px in {:.2} ms",
            self.handle.identifier(),
            target_size,
            inference_time_ms
        );

        Ok(ClassificationResult {
            top3,
            inference_time_ms,
        })
    }
}

/// Tries the `(height, width)` convention, then once the shortest-edge convention
/// if and only if the first attempt reported an unsupported size.
pub(crate) fn preprocess_with_fallback(
    preprocessor: &dyn Preprocess,
    image: &RgbImage,
    target_size: u32,
) -> Result<PixelBatch, PreprocessError> {
    match preprocessor.preprocess(image, SizeSpec::square(target_size)) {
        Err(PreprocessError::UnsupportedSize { reason, .. }) => {
            debug!("Height/width sizing rejected ({}), using shortest edge {}", reason, target_size);
            preprocessor.preprocess(image, SizeSpec::ShortestEdge(target_size))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LabelTable, ModelOutputs, Predict};
    use image::Rgb;
    use ndarray::{ArrayD, IxDyn};
    use std::sync::Mutex;

    struct ScriptedPreprocessor {
        calls: Arc<Mutex<Vec<SizeSpec>>>,
        accept_height_width: bool,
        accept_shortest_edge: bool,
    }

    impl Preprocess for ScriptedPreprocessor {
        fn preprocess(&self, _image: &RgbImage, size: SizeSpec) -> Result<PixelBatch, PreprocessError> {
            self.calls.lock().unwrap().push(size);
            let accepted = match size {
                SizeSpec::HeightWidth { .. } => self.accept_height_width,
                SizeSpec::ShortestEdge(_) => self.accept_shortest_edge,
            };
            if !accepted {
                return Err(PreprocessError::UnsupportedSize {
                    spec: size,
                    reason: "scripted".into(),
                });
            }
            Ok(PixelBatch::new(ndarray::Array4::zeros((1, 3, 2, 2))))
        }

        fn preprocess_default(&self, image: &RgbImage) -> Result<PixelBatch, PreprocessError> {
            self.preprocess(image, SizeSpec::square(2))
        }
    }

    struct FixedLogits(ArrayD<f32>);

    impl Predict for FixedLogits {
        fn forward(&self, _batch: &PixelBatch) -> Result<ModelOutputs, InferenceError> {
            Ok(ModelOutputs::new().with("logits", self.0.clone()))
        }
    }

    fn classifier(logits: ArrayD<f32>, hw: bool, se: bool) -> (Classifier, Arc<Mutex<Vec<SizeSpec>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let handle = ModelHandle::new(
            "test/model",
            Box::new(ScriptedPreprocessor {
                calls: Arc::clone(&calls),
                accept_height_width: hw,
                accept_shortest_edge: se,
            }),
            Box::new(FixedLogits(logits)),
            LabelTable::from_labels(["a", "b", "c", "d"]),
        );
        (Classifier::new(Arc::new(handle)), calls)
    }

    fn image() -> RgbImage {
        RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]))
    }

    #[test]
    fn test_top3_from_logits() {
        let logits = ArrayD::from_shape_vec(IxDyn(&[1, 4]), vec![0.5, 3.0, 1.0, 2.0]).unwrap();
        let (classifier, _) = classifier(logits, true, true);
        let result = classifier.classify(&image(), 224).unwrap();

        let labels: Vec<&str> = result.top3.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "d", "c"]);
        assert!(result.top3.windows(2).all(|w| w[0].score >= w[1].score));
        let total: f32 = result.top3.iter().map(|p| p.score).sum();
        assert!(total <= 1.0 + 1e-6);
        assert!(result.inference_time_ms >= 0.0);
    }

    #[test]
    fn test_rank_one_logits_accepted() {
        let logits = ArrayD::from_shape_vec(IxDyn(&[4]), vec![0.0, 0.0, 5.0, 0.0]).unwrap();
        let (classifier, _) = classifier(logits, true, true);
        let result = classifier.classify(&image(), 128).unwrap();
        assert_eq!(result.best().unwrap().label, "c");
    }

    #[test]
    fn test_bad_logits_shape() {
        let logits = ArrayD::zeros(IxDyn(&[1, 2, 2]));
        let (classifier, _) = classifier(logits, true, true);
        assert!(matches!(
            classifier.classify(&image(), 224),
            Err(ClassifierError::PredictionError(InferenceError::BadShape { .. }))
        ));
    }

    #[test]
    fn test_zero_target_size() {
        let (classifier, calls) = classifier(ArrayD::zeros(IxDyn(&[1, 4])), true, true);
        assert!(matches!(
            classifier.classify(&image(), 0),
            Err(ClassifierError::ValidationError(_))
        ));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fallback_attempted_once() {
        let (classifier, calls) = classifier(ArrayD::zeros(IxDyn(&[1, 4])), false, true);
        classifier.classify(&image(), 160).unwrap();
        assert_eq!(
            *calls.lock().unwrap(),
            vec![SizeSpec::square(160), SizeSpec::ShortestEdge(160)]
        );
    }

    #[test]
    fn test_fallback_failure_propagates() {
        let (classifier, calls) = classifier(ArrayD::zeros(IxDyn(&[1, 4])), false, false);
        assert!(matches!(
            classifier.classify(&image(), 160),
            Err(ClassifierError::PreprocessError(PreprocessError::UnsupportedSize { .. }))
        ));
        assert_eq!(calls.lock().unwrap().len(), 2);
    }
}
