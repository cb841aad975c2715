//! Provider-side postprocessing for set-prediction detectors (DETR).

use ndarray::{Axis, Ix3};

use super::{InferenceError, ModelOutputs};
use crate::classifier::utils::softmax;

pub const LOGITS_OUTPUT: &str = "logits";
pub const BOXES_OUTPUT: &str = "pred_boxes";

/// A detection before label resolution: score, class index and a corner box in
/// original-image pixel coordinates (`x_min, y_min, x_max, y_max`), not yet clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub score: f32,
    pub label: usize,
    pub bbox: [f32; 4],
}

/// Converts DETR outputs into detections whose score is strictly above `threshold`.
///
/// `logits` is `[1, queries, classes + 1]` where the last class means "no object";
/// `pred_boxes` is `[1, queries, 4]` holding normalized `(cx, cy, w, h)`.
/// Boxes are scaled to `target_size` given as `(height, width)`. Query order is kept.
pub fn detr_detections(
    outputs: &ModelOutputs,
    threshold: f32,
    target_size: (u32, u32),
) -> Result<Vec<RawDetection>, InferenceError> {
    let logits = outputs
        .require(LOGITS_OUTPUT)?
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|_| bad_shape(outputs, LOGITS_OUTPUT))?;
    let boxes = outputs
        .require(BOXES_OUTPUT)?
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|_| bad_shape(outputs, BOXES_OUTPUT))?;

    let (queries, classes) = (logits.shape()[1], logits.shape()[2]);
    if logits.shape()[0] == 0 || classes < 2 {
        return Err(bad_shape(outputs, LOGITS_OUTPUT));
    }
    if boxes.shape()[0] == 0 || boxes.shape()[1] != queries || boxes.shape()[2] != 4 {
        return Err(bad_shape(outputs, BOXES_OUTPUT));
    }

    let (height, width) = (target_size.0 as f32, target_size.1 as f32);
    let logits = logits.index_axis(Axis(0), 0);
    let boxes = boxes.index_axis(Axis(0), 0);

    let mut detections = Vec::new();
    for query in 0..queries {
        let probs = softmax(logits.row(query));
        // Best real class, ignoring the trailing "no object" class.
        let (label, score) = probs
            .iter()
            .take(classes - 1)
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (index, p)| if p > best.1 { (index, p) } else { best });

        if !(score > threshold) {
            continue;
        }

        let b = boxes.row(query);
        let (cx, cy, w, h) = (b[0], b[1], b[2], b[3]);
        detections.push(RawDetection {
            score,
            label,
            bbox: [
                (cx - 0.5 * w) * width,
                (cy - 0.5 * h) * height,
                (cx + 0.5 * w) * width,
                (cy + 0.5 * h) * height,
            ],
        });
    }

    Ok(detections)
}

fn bad_shape(outputs: &ModelOutputs, name: &str) -> InferenceError {
    InferenceError::BadShape {
        name: name.to_string(),
        shape: outputs.get(name).map(|t| t.shape().to_vec()).unwrap_or_default(),
    }
}
