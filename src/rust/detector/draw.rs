use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use log::{debug, info};

use super::DetectorError;
use crate::config::{AppConfig, DEFAULT_BOX_COLOR};

pub const BOX_COLOR: Rgb<u8> = Rgb(DEFAULT_BOX_COLOR);
const BOX_THICKNESS: u32 = 2;
const FONT_SCALE: f32 = 16.0;
/// Gap between the label baseline area and the box's top edge.
const LABEL_OFFSET: i32 = 5;

const SYSTEM_FONT_PATHS: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Draws detection boxes and labels onto images.
///
/// Without a font only the rectangles are drawn.
#[derive(Clone)]
pub struct Annotator {
    font: Option<FontArc>,
    scale: PxScale,
    color: Rgb<u8>,
    thickness: u32,
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("has_font", &self.font.is_some())
            .field("color", &self.color)
            .field("thickness", &self.thickness)
            .finish()
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::with_system_font()
    }
}

impl Annotator {
    pub fn without_font() -> Self {
        Self {
            font: None,
            scale: PxScale::from(FONT_SCALE),
            color: BOX_COLOR,
            thickness: BOX_THICKNESS,
        }
    }

    pub fn from_font_path(path: &Path) -> Result<Self, DetectorError> {
        let data = std::fs::read(path)
            .map_err(|e| DetectorError::FontError(format!("{}: {}", path.display(), e)))?;
        let font = FontArc::try_from_vec(data)
            .map_err(|_| DetectorError::FontError(format!("failed to parse font file {}", path.display())))?;
        Ok(Self {
            font: Some(font),
            ..Self::without_font()
        })
    }

    /// Tries a few well-known system font locations.
    pub fn with_system_font() -> Self {
        for path in SYSTEM_FONT_PATHS {
            if let Ok(annotator) = Self::from_font_path(Path::new(path)) {
                info!("Loaded system font: {}", path);
                return annotator;
            }
        }
        debug!("No system font found, detection labels will not be drawn");
        Self::without_font()
    }

    /// Uses the configured font (an error if it cannot be loaded) or else a system
    /// font, drawing in the configured box color.
    pub fn from_config(config: &AppConfig) -> Result<Self, DetectorError> {
        let annotator = match &config.font_path {
            Some(path) => Self::from_font_path(path)?,
            None => Self::with_system_font(),
        };
        Ok(annotator.with_color(Rgb(config.box_color)))
    }

    pub fn with_color(mut self, color: Rgb<u8>) -> Self {
        self.color = color;
        self
    }

    /// Draws one box with its label just above the top edge.
    ///
    /// `bbox` must already lie inside the image with `x_min < x_max` and `y_min < y_max`.
    pub fn draw(&self, image: &mut RgbImage, bbox: &[u32; 4], label: &str) {
        let [x_min, y_min, x_max, y_max] = *bbox;

        for inset in 0..self.thickness {
            let width = (x_max - x_min + 1).saturating_sub(2 * inset);
            let height = (y_max - y_min + 1).saturating_sub(2 * inset);
            if width == 0 || height == 0 {
                break;
            }
            let rect = Rect::at((x_min + inset) as i32, (y_min + inset) as i32).of_size(width, height);
            draw_hollow_rect_mut(image, rect, self.color);
        }

        if let Some(font) = &self.font {
            let (_, text_height) = text_size(self.scale, font, label);
            let y = (y_min as i32 - LABEL_OFFSET - text_height as i32).max(0);
            draw_text_mut(image, self.color, x_min as i32, y, self.scale, font, label);
        }
    }
}
