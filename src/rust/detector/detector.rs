use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use log::{debug, info};

use super::{Annotator, Detection, DetectionResult, DetectorError};
use crate::provider::postprocess::detr_detections;
use crate::provider::{ModelHandle, ModelLoadError, ModelProvider};

/// Object detector bound to one loaded model, plus the annotator used to draw results.
#[derive(Debug, Clone)]
pub struct Detector {
    handle: Arc<ModelHandle>,
    annotator: Annotator,
}

impl Detector {
    /// Loads the detection model `identifier` through `provider`.
    pub fn load(provider: &dyn ModelProvider, identifier: &str) -> Result<Self, ModelLoadError> {
        info!("Loading detector '{}'", identifier);
        let handle = provider.load(identifier)?;
        Ok(Self::new(Arc::new(handle)))
    }

    pub fn new(handle: Arc<ModelHandle>) -> Self {
        Self {
            handle,
            annotator: Annotator::default(),
        }
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn handle(&self) -> &Arc<ModelHandle> {
        &self.handle
    }

    /// Detects objects scoring strictly above `threshold` and draws them on a copy
    /// of `image`.
    ///
    /// Unlike classification, the reported time runs until the last box is drawn.
    pub fn detect(&self, image: &RgbImage, threshold: f32) -> Result<DetectionResult, DetectorError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(DetectorError::ValidationError(format!(
                "Threshold must be within [0, 1], got {}",
                threshold
            )));
        }

        let start = Instant::now();
        let batch = self.handle.preprocessor().preprocess_default(image)?;
        let outputs = self.handle.predictor().forward(&batch)?;
        let raw = detr_detections(&outputs, threshold, (image.height(), image.width()))?;

        let mut annotated = image.clone();
        let mut detections = Vec::with_capacity(raw.len());
        for candidate in raw {
            let Some(bbox) = to_pixel_box(&candidate.bbox, image.width(), image.height()) else {
                debug!("Dropping degenerate box {:?}", candidate.bbox);
                continue;
            };
            let label = self.handle.labels().resolve(candidate.label);
            self.annotator.draw(&mut annotated, &bbox, &label);
            detections.push(Detection {
                label,
                score: candidate.score,
                bbox,
            });
        }
        let inference_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        debug!(
            "Detected {} objects above {} in {:.2} ms",
            detections.len(),
            threshold,
            inference_time_ms
        );

        Ok(DetectionResult {
            detections,
            annotated_image: annotated,
            inference_time_ms,
        })
    }
}

/// Clamps a float corner box into the image and truncates it to pixel indices.
///
/// Returns `None` when the box is empty after clamping.
pub fn to_pixel_box(bbox: &[f32; 4], width: u32, height: u32) -> Option<[u32; 4]> {
    if width == 0 || height == 0 {
        return None;
    }
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let clamp = |value: f32, max: f32| -> u32 {
        if value.is_nan() {
            0
        } else {
            value.clamp(0.0, max) as u32
        }
    };

    let pixel_box = [
        clamp(bbox[0], max_x),
        clamp(bbox[1], max_y),
        clamp(bbox[2], max_x),
        clamp(bbox[3], max_y),
    ];
    (pixel_box[0] < pixel_box[2] && pixel_box[1] < pixel_box[3]).then_some(pixel_box)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_pixel_box_truncates() {
        assert_eq!(to_pixel_box(&[10.7, 5.2, 40.9, 30.1], 100, 80), Some([10, 5, 40, 30]));
    }

    #[test]
    fn test_to_pixel_box_clamps() {
        assert_eq!(to_pixel_box(&[-12.0, -3.0, 250.0, 90.0], 100, 80), Some([0, 0, 99, 79]));
    }

    #[test]
    fn test_to_pixel_box_drops_degenerate() {
        assert_eq!(to_pixel_box(&[10.2, 10.0, 10.9, 20.0], 100, 80), None);
        assert_eq!(to_pixel_box(&[120.0, 10.0, 130.0, 20.0], 100, 80), None);
        assert_eq!(to_pixel_box(&[f32::NAN, 0.0, f32::NAN, 5.0], 100, 80), None);
        assert_eq!(to_pixel_box(&[0.0, 0.0, 5.0, 5.0], 0, 0), None);
    }
}
