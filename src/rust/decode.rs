//! Upload decoding: jpg/jpeg/png bytes to an RGB raster.

use std::path::Path;

use image::{ImageFormat, RgbImage};

use crate::config::SUPPORTED_FORMATS;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unsupported image format '{0}', expected one of: jpg, png, jpeg")]
    UnsupportedFormat(String),
    #[error("Failed to decode image: {0}")]
    Corrupt(#[from] image::ImageError),
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),
}

/// Maps a file extension (case-insensitive, without the dot) to an image format.
pub fn format_for_extension(extension: &str) -> Result<ImageFormat, DecodeError> {
    let lower = extension.trim().trim_start_matches('.').to_ascii_lowercase();
    if !SUPPORTED_FORMATS.contains(&lower.as_str()) {
        return Err(DecodeError::UnsupportedFormat(extension.to_string()));
    }
    match lower.as_str() {
        "png" => Ok(ImageFormat::Png),
        _ => Ok(ImageFormat::Jpeg),
    }
}

/// Decodes uploaded bytes declared with `extension` into RGB.
pub fn decode_bytes(bytes: &[u8], extension: &str) -> Result<RgbImage, DecodeError> {
    let format = format_for_extension(extension)?;
    let image = image::load_from_memory_with_format(bytes, format)?;
    Ok(image.to_rgb8())
}

/// Decodes an image file. The extension is checked before the file is read.
pub fn decode_file(path: &Path) -> Result<RgbImage, DecodeError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    format_for_extension(extension)?;
    let bytes = std::fs::read(path)?;
    decode_bytes(&bytes, extension)
}
