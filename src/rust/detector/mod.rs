//! Auxiliary object detection used to explain a classification visually.
//!
//! Detection results never feed back into classification.

use image::RgbImage;
use serde::Serialize;

mod detector;
mod draw;
mod error;

pub use detector::{Detector, to_pixel_box};
pub use draw::{Annotator, BOX_COLOR};
pub use error::DetectorError;

/// One detected object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    /// Confidence, strictly above the threshold the detection was produced with
    pub score: f32,
    /// `[x_min, y_min, x_max, y_max]` in pixels of the input image
    pub bbox: [u32; 4],
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    /// Copy of the input with every detection drawn on it
    #[serde(skip)]
    pub annotated_image: RgbImage,
    /// Wall-clock milliseconds from preprocessing through drawing
    pub inference_time_ms: f64,
}
