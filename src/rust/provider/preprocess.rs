use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use serde::Deserialize;

use super::{ModelLoadError, PixelBatch, Preprocess, PreprocessError, SizeSpec};

const IMAGENET_DEFAULT_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_DEFAULT_STD: [f32; 3] = [0.229, 0.224, 0.225];
const DEFAULT_CROP_PCT: f32 = 224.0 / 256.0;
/// ConvNeXt-style processors stop cropping at this edge length.
const CROP_PCT_MAX_EDGE: u32 = 384;
const DEFAULT_EDGE: u32 = 224;

/// A `size` entry of `preprocessor_config.json`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SizeConfig {
    Dims { height: u32, width: u32 },
    Edge {
        shortest_edge: u32,
        #[serde(default)]
        longest_edge: Option<u32>,
    },
    Scalar(u32),
}

fn default_true() -> bool {
    true
}

fn default_rescale_factor() -> f32 {
    1.0 / 255.0
}

fn default_mean() -> [f32; 3] {
    IMAGENET_DEFAULT_MEAN
}

fn default_std() -> [f32; 3] {
    IMAGENET_DEFAULT_STD
}

/// The subset of a Hugging Face `preprocessor_config.json` the pipeline honors.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub image_processor_type: Option<String>,
    /// Older configs name the processor here, some carry both keys.
    #[serde(default)]
    pub feature_extractor_type: Option<String>,
    #[serde(default = "default_true")]
    pub do_resize: bool,
    #[serde(default)]
    pub size: Option<SizeConfig>,
    /// Longest-edge cap of legacy configs that give `size` as a bare number.
    #[serde(default)]
    pub max_size: Option<u32>,
    #[serde(default)]
    pub do_center_crop: Option<bool>,
    #[serde(default)]
    pub crop_size: Option<SizeConfig>,
    #[serde(default)]
    pub crop_pct: Option<f32>,
    #[serde(default = "default_true")]
    pub do_rescale: bool,
    #[serde(default = "default_rescale_factor")]
    pub rescale_factor: f32,
    #[serde(default = "default_true")]
    pub do_normalize: bool,
    #[serde(default = "default_mean")]
    pub image_mean: [f32; 3],
    #[serde(default = "default_std")]
    pub image_std: [f32; 3],
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            image_processor_type: None,
            feature_extractor_type: None,
            do_resize: true,
            size: None,
            max_size: None,
            do_center_crop: None,
            crop_size: None,
            crop_pct: None,
            do_rescale: true,
            rescale_factor: default_rescale_factor(),
            do_normalize: true,
            image_mean: IMAGENET_DEFAULT_MEAN,
            image_std: IMAGENET_DEFAULT_STD,
        }
    }
}

impl ProcessorConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The processor class name, preferring `image_processor_type`.
    pub fn processor_type(&self) -> Option<&str> {
        self.image_processor_type
            .as_deref()
            .or(self.feature_extractor_type.as_deref())
    }
}

/// Which size conventions a processor family accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeFamily {
    /// Accepts both `(height, width)` and shortest-edge sizes.
    Flexible,
    /// Only `(height, width)`.
    HeightWidthOnly,
    /// Only shortest-edge sizes, optionally with a crop percentage (ConvNeXt, ResNet).
    ShortestEdgeOnly,
}

impl ResizeFamily {
    pub fn from_processor_type(processor_type: Option<&str>) -> Self {
        match processor_type {
            Some(name) if name.starts_with("ConvNext") || name.starts_with("Detr") => {
                Self::ShortestEdgeOnly
            }
            Some(name) if name.starts_with("ViT") || name.starts_with("Deit") => Self::HeightWidthOnly,
            _ => Self::Flexible,
        }
    }

    pub fn accepts(&self, size: &SizeSpec) -> bool {
        match (self, size) {
            (Self::Flexible, _) => true,
            (Self::HeightWidthOnly, SizeSpec::HeightWidth { .. }) => true,
            (Self::ShortestEdgeOnly, SizeSpec::ShortestEdge(_)) => true,
            _ => false,
        }
    }
}

/// Config-driven image processor: resize, center crop, rescale, normalize, NCHW.
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    config: ProcessorConfig,
    family: ResizeFamily,
}

impl ImageProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        let family = ResizeFamily::from_processor_type(config.processor_type());
        Self { config, family }
    }

    pub fn from_file(path: &Path) -> Result<Self, ModelLoadError> {
        let text = std::fs::read_to_string(path).map_err(|e| ModelLoadError::MissingFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config = ProcessorConfig::from_json(&text).map_err(|e| ModelLoadError::InvalidConfig {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self::new(config))
    }

    pub fn family(&self) -> ResizeFamily {
        self.family
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    fn check_image(image: &RgbImage) -> Result<(), PreprocessError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PreprocessError::EmptyImage {
                width: image.width(),
                height: image.height(),
            });
        }
        Ok(())
    }

    /// Shortest-edge resize followed by a square center crop of `edge`.
    ///
    /// Processors carrying a crop percentage resize to `edge / crop_pct` first so the
    /// crop keeps the central region, up to [`CROP_PCT_MAX_EDGE`].
    fn resize_and_crop(&self, image: &RgbImage, edge: u32) -> RgbImage {
        let crop_pct = match (self.family, self.config.crop_pct) {
            (ResizeFamily::ShortestEdgeOnly, pct) => pct.or(Some(DEFAULT_CROP_PCT)),
            (_, pct) => pct,
        };
        match crop_pct {
            Some(pct) if edge >= CROP_PCT_MAX_EDGE || pct <= 0.0 => {
                imageops::resize(image, edge, edge, FilterType::Triangle)
            }
            Some(pct) => {
                let scaled = ((edge as f32 / pct) as u32).max(edge);
                let resized = resize_shortest_edge(image, scaled, None);
                center_crop(&resized, edge, edge)
            }
            None => {
                let resized = resize_shortest_edge(image, edge, None);
                center_crop(&resized, edge, edge)
            }
        }
    }

    fn to_tensor(&self, image: &RgbImage) -> Array4<f32> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let mut tensor = Array4::<f32>::zeros((1, 3, height, width));
        let scale = if self.config.do_rescale {
            self.config.rescale_factor
        } else {
            1.0
        };
        for (x, y, pixel) in image.enumerate_pixels() {
            for channel in 0..3 {
                let mut value = pixel[channel] as f32 * scale;
                if self.config.do_normalize {
                    value = (value - self.config.image_mean[channel]) / self.config.image_std[channel];
                }
                tensor[[0, channel, y as usize, x as usize]] = value;
            }
        }
        tensor
    }
}

impl Preprocess for ImageProcessor {
    fn preprocess(&self, image: &RgbImage, size: SizeSpec) -> Result<PixelBatch, PreprocessError> {
        if !self.family.accepts(&size) {
            return Err(PreprocessError::UnsupportedSize {
                spec: size,
                reason: format!("{:?} processors do not accept this convention", self.family),
            });
        }
        Self::check_image(image)?;

        let sized = match size {
            SizeSpec::HeightWidth { height, width } if height > 0 && width > 0 => {
                imageops::resize(image, width, height, FilterType::Triangle)
            }
            SizeSpec::ShortestEdge(edge) if edge > 0 => self.resize_and_crop(image, edge),
            _ => return Err(PreprocessError::InvalidSize(size)),
        };

        Ok(PixelBatch::new(self.to_tensor(&sized)))
    }

    fn preprocess_default(&self, image: &RgbImage) -> Result<PixelBatch, PreprocessError> {
        Self::check_image(image)?;

        let mut sized = if !self.config.do_resize {
            image.clone()
        } else {
            match self.config.size {
                Some(SizeConfig::Dims { height, width }) => {
                    imageops::resize(image, width, height, FilterType::Triangle)
                }
                Some(SizeConfig::Edge {
                    shortest_edge,
                    longest_edge: Some(longest),
                }) => resize_shortest_edge(image, shortest_edge, Some(longest)),
                Some(SizeConfig::Edge { shortest_edge, .. }) | Some(SizeConfig::Scalar(shortest_edge)) => {
                    resize_shortest_edge(image, shortest_edge, self.config.max_size)
                }
                None => resize_shortest_edge(image, DEFAULT_EDGE, None),
            }
        };

        if self.config.do_center_crop.unwrap_or(false) {
            if let Some(crop) = self.config.crop_size {
                let (crop_w, crop_h) = match crop {
                    SizeConfig::Dims { height, width } => (width, height),
                    SizeConfig::Edge { shortest_edge, .. } | SizeConfig::Scalar(shortest_edge) => {
                        (shortest_edge, shortest_edge)
                    }
                };
                sized = center_crop(&sized, crop_w, crop_h);
            }
        }

        Ok(PixelBatch::new(self.to_tensor(&sized)))
    }
}

/// Output `(width, height)` when resizing the shortest edge to `edge`, keeping the
/// aspect ratio and optionally capping the longest edge.
pub(crate) fn shortest_edge_dims(width: u32, height: u32, edge: u32, longest: Option<u32>) -> (u32, u32) {
    let (short, long) = (width.min(height) as f32, width.max(height) as f32);
    let mut size = edge as f32;
    if let Some(max) = longest {
        if long / short * size > max as f32 {
            size = (max as f32 * short / long).round();
        }
    }
    let size = size.max(1.0);
    if width <= height {
        (size as u32, ((size * height as f32 / width as f32) as u32).max(1))
    } else {
        (((size * width as f32 / height as f32) as u32).max(1), size as u32)
    }
}

fn resize_shortest_edge(image: &RgbImage, edge: u32, longest: Option<u32>) -> RgbImage {
    let (width, height) = shortest_edge_dims(image.width(), image.height(), edge, longest);
    if (width, height) == image.dimensions() {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

fn center_crop(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let width = width.min(image.width());
    let height = height.min(image.height());
    let x = (image.width() - width) / 2;
    let y = (image.height() - height) / 2;
    imageops::crop_imm(image, x, y, width, height).to_image()
}
