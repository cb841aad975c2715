use std::collections::HashMap;

use log::{debug, info};
use ndarray::Array3;
use ort::session::Session;
use ort::value::{DynValue, Tensor};

use super::{
    ImageProcessor, InferenceError, LabelTable, ModelHandle, ModelLoadError, ModelOutputs,
    ModelProvider, PixelBatch, Predict,
};
use crate::model_manager::ModelManager;
use crate::runtime::{create_session_builder, RuntimeConfig};

const PIXEL_MASK_INPUT: &str = "pixel_mask";

/// Forward pass over an ONNX Runtime session.
///
/// The first session input receives the pixel tensor. DETR-style exports that also
/// declare a `pixel_mask` input get an all-ones mask of the same spatial size.
pub struct OnnxPredictor {
    session: Session,
    pixel_input: String,
    wants_pixel_mask: bool,
    output_names: Vec<String>,
}

impl OnnxPredictor {
    pub fn new(session: Session) -> Result<Self, ModelLoadError> {
        let pixel_input = session
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .find(|name| name != PIXEL_MASK_INPUT)
            .ok_or_else(|| ModelLoadError::UnsupportedModel("model declares no pixel input".to_string()))?;
        let wants_pixel_mask = session.inputs.iter().any(|input| input.name == PIXEL_MASK_INPUT);
        let output_names = session.outputs.iter().map(|output| output.name.clone()).collect();

        Ok(Self {
            session,
            pixel_input,
            wants_pixel_mask,
            output_names,
        })
    }
}

impl std::fmt::Debug for OnnxPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxPredictor")
            .field("pixel_input", &self.pixel_input)
            .field("wants_pixel_mask", &self.wants_pixel_mask)
            .field("output_names", &self.output_names)
            .finish_non_exhaustive()
    }
}

impl Predict for OnnxPredictor {
    fn forward(&self, batch: &PixelBatch) -> Result<ModelOutputs, InferenceError> {
        let (height, width) = batch.spatial_size();

        let mut input_tensors: HashMap<&str, DynValue> = HashMap::new();
        input_tensors.insert(
            self.pixel_input.as_str(),
            Tensor::from_array(batch.pixel_values.clone())?.into_dyn(),
        );
        if self.wants_pixel_mask {
            let mask = Array3::<i64>::ones((1, height, width));
            input_tensors.insert(PIXEL_MASK_INPUT, Tensor::from_array(mask)?.into_dyn());
        }

        let outputs = self.session.run(input_tensors)?;

        let mut result = ModelOutputs::new();
        for name in &self.output_names {
            match outputs[name.as_str()].try_extract_tensor::<f32>() {
                Ok(view) => result.insert(name.clone(), view.to_owned()),
                Err(e) => debug!("Skipping non-f32 output '{}': {}", name, e),
            }
        }
        if result.is_empty() {
            return Err(InferenceError::MissingOutput("any f32 output".to_string()));
        }
        Ok(result)
    }
}

/// Loads models that the [`ModelManager`] has placed on disk.
#[derive(Clone)]
pub struct HubProvider {
    manager: ModelManager,
    runtime_config: RuntimeConfig,
}

impl HubProvider {
    pub fn new(manager: ModelManager, runtime_config: RuntimeConfig) -> Self {
        Self {
            manager,
            runtime_config,
        }
    }

    pub fn manager(&self) -> &ModelManager {
        &self.manager
    }
}

impl ModelProvider for HubProvider {
    fn load(&self, identifier: &str) -> Result<ModelHandle, ModelLoadError> {
        if identifier.trim().is_empty() {
            return Err(ModelLoadError::UnknownIdentifier(identifier.to_string()));
        }
        if !self.manager.is_model_downloaded(identifier) {
            return Err(ModelLoadError::NotDownloaded(identifier.to_string()));
        }

        let labels = LabelTable::from_config_file(&self.manager.get_config_path(identifier))?;
        let processor = ImageProcessor::from_file(&self.manager.get_preprocessor_path(identifier))?;
        info!(
            "Loaded {} labels and a {:?} processor for '{}'",
            labels.len(),
            processor.family(),
            identifier
        );

        let model_path = self.manager.get_model_path(identifier);
        let session = create_session_builder(&self.runtime_config)?.commit_from_file(&model_path)?;
        let predictor = OnnxPredictor::new(session)?;
        info!("Model '{}' ready ({:?})", identifier, model_path);

        Ok(ModelHandle::new(
            identifier,
            Box::new(processor),
            Box::new(predictor),
            labels,
        ))
    }
}
