//! In-memory raster handed over by the canvas layer.
//!
//! The canvas flattens its layers into a single RGBA buffer; the pipeline
//! only needs to validate it and encode it as PNG for upload.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::error::CoreError;

/// A flattened RGBA8 raster.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pixels: RgbaImage,
}

impl Bitmap {
    /// Build a bitmap from raw RGBA8 bytes (row-major, 4 bytes per pixel).
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, CoreError> {
        if width == 0 || height == 0 {
            return Err(CoreError::Validation(format!(
                "Bitmap dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let actual = data.len();
        let pixels = RgbaImage::from_raw(width, height, data).ok_or_else(|| {
            let expected = u128::from(width) * u128::from(height) * 4;
            CoreError::Validation(format!(
                "Bitmap buffer has {actual} bytes, expected {expected} for {width}x{height} RGBA"
            ))
        })?;
        Ok(Self { pixels })
    }

    /// Decode an encoded image (PNG, JPEG, WebP) into a bitmap.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| CoreError::Validation(format!("Failed to decode image: {e}")))?;
        Self::from_image(image)
    }

    /// Convert any decoded image into an RGBA8 bitmap.
    pub fn from_image(image: DynamicImage) -> Result<Self, CoreError> {
        let pixels = image.into_rgba8();
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(CoreError::Validation(
                "Bitmap dimensions must be non-zero".to_string(),
            ));
        }
        Ok(Self { pixels })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Encode as PNG, the format the engine's upload endpoint expects.
    pub fn encode_png(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        self.pixels
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| CoreError::Internal(format!("PNG encoding failed: {e}")))?;
        Ok(buf)
    }
}
