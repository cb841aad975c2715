//! Static application settings.
//!
//! Everything has a built-in default; a TOML file may override any subset of keys.
//! Settings are read once at startup and never reloaded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model_manager::{DEFAULT_HUB_URL, DEFAULT_ONNX_FILE};

pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.7;
pub const DEFAULT_DETECTOR: &str = "facebook/detr-resnet-50";
pub const SUPPORTED_FORMATS: [&str; 3] = ["jpg", "png", "jpeg"];
/// Box outline and label background color.
pub const DEFAULT_BOX_COLOR: [u8; 3] = [0, 255, 0];

/// Hub repositories carrying ONNX exports of the default models.
const DEFAULT_MIRRORS: [(&str, &str); 3] = [
    ("google/mobilenet_v2_1.0_224", "Xenova/mobilenet_v2_1.0_224"),
    ("microsoft/resnet-50", "Xenova/resnet-50"),
    ("facebook/detr-resnet-50", "Xenova/detr-resnet-50"),
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// A selectable classification model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierModel {
    /// Display name, e.g. `Fast Model (MobileNetV2)`.
    pub name: String,
    /// Hub identifier or local model directory.
    pub identifier: String,
}

impl ClassifierModel {
    pub fn new(name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier: identifier.into(),
        }
    }
}

/// A selectable input resolution preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub label: String,
    pub size: u32,
}

impl Resolution {
    pub fn new(label: impl Into<String>, size: u32) -> Self {
        Self {
            label: label.into(),
            size,
        }
    }
}

/// ONNX Runtime session settings. Zero threads lets the runtime decide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub inter_threads: usize,
    pub intra_threads: usize,
    /// 0 disables graph optimizations, 1-3 select the level.
    pub optimization_level: u8,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            inter_threads: 0,
            intra_threads: 0,
            optimization_level: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Classification models in display order.
    pub classifiers: Vec<ClassifierModel>,
    pub detector: String,
    pub detection_threshold: f32,
    /// Resolution presets in display order; the first one is the default.
    pub resolutions: Vec<Resolution>,
    pub hub_url: String,
    /// Path of the ONNX export inside each hub repository.
    pub onnx_file: String,
    /// Identifier -> hub repository to download from. The official checkpoints ship
    /// no ONNX export, so the defaults point at converted mirrors.
    pub mirrors: BTreeMap<String, String>,
    /// Identifier -> expected sha256 of its ONNX graph.
    pub model_hashes: BTreeMap<String, String>,
    /// RGB color of detection boxes and label backgrounds.
    pub box_color: [u8; 3],
    /// Font used for detection labels. Common system fonts are tried when unset.
    pub font_path: Option<PathBuf>,
    /// Model cache directory. Defaults to the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    pub runtime: RuntimeSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            classifiers: vec![
                ClassifierModel::new("Fast Model (MobileNetV2)", "google/mobilenet_v2_1.0_224"),
                ClassifierModel::new("Accurate Model (ResNet-50)", "microsoft/resnet-50"),
            ],
            detector: DEFAULT_DETECTOR.to_string(),
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            resolutions: vec![
                Resolution::new("224 x 224 (High)", 224),
                Resolution::new("160 x 160 (Medium)", 160),
                Resolution::new("128 x 128 (Low)", 128),
            ],
            hub_url: DEFAULT_HUB_URL.to_string(),
            onnx_file: DEFAULT_ONNX_FILE.to_string(),
            mirrors: DEFAULT_MIRRORS
                .iter()
                .map(|(id, repo)| (id.to_string(), repo.to_string()))
                .collect(),
            model_hashes: BTreeMap::new(),
            box_color: DEFAULT_BOX_COLOR,
            font_path: None,
            cache_dir: None,
            runtime: RuntimeSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.classifiers.is_empty() {
            return Err(ConfigError::Invalid("at least one classifier is required".into()));
        }
        if let Some(model) = self
            .classifiers
            .iter()
            .find(|m| m.name.trim().is_empty() || m.identifier.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "classifier entries need a name and an identifier, got {:?}",
                model
            )));
        }
        if self.detector.trim().is_empty() {
            return Err(ConfigError::Invalid("detector identifier cannot be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.detection_threshold) {
            return Err(ConfigError::Invalid(format!(
                "detection threshold must be within [0, 1], got {}",
                self.detection_threshold
            )));
        }
        if let Some((identifier, hash)) = self
            .model_hashes
            .iter()
            .find(|(_, hash)| hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return Err(ConfigError::Invalid(format!(
                "model hash for '{}' is not a sha256 hex digest: {:?}",
                identifier, hash
            )));
        }
        if self.resolutions.is_empty() {
            return Err(ConfigError::Invalid("at least one resolution is required".into()));
        }
        if let Some(resolution) = self.resolutions.iter().find(|r| r.size == 0) {
            return Err(ConfigError::Invalid(format!(
                "resolution '{}' must be larger than zero",
                resolution.label
            )));
        }
        Ok(())
    }

    /// Finds a classifier by display name, identifier, or a case-insensitive prefix
    /// of the display name (`fast`, `accurate`).
    pub fn find_classifier(&self, name: &str) -> Option<&ClassifierModel> {
        let wanted = name.trim();
        if wanted.is_empty() {
            return None;
        }
        self.classifiers
            .iter()
            .find(|m| m.name == wanted || m.identifier == wanted)
            .or_else(|| {
                let lower = wanted.to_lowercase();
                self.classifiers
                    .iter()
                    .find(|m| m.name.to_lowercase().starts_with(&lower))
            })
    }

    pub fn default_classifier(&self) -> Option<&ClassifierModel> {
        self.classifiers.first()
    }

    /// Resolves a resolution preset by label or by its edge length.
    pub fn resolution(&self, selector: &str) -> Option<u32> {
        let selector = selector.trim();
        self.resolutions
            .iter()
            .find(|r| r.label == selector)
            .map(|r| r.size)
            .or_else(|| {
                let size = selector.parse::<u32>().ok()?;
                self.resolutions.iter().find(|r| r.size == size).map(|r| r.size)
            })
    }

    pub fn default_resolution(&self) -> Option<u32> {
        self.resolutions.first().map(|r| r.size)
    }
}
