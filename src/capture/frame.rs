//! Captured photo data

use chrono::{DateTime, Utc};
use image::RgbaImage;

use crate::error::PipelineResult;

/// A photo handed over by the camera layer
#[derive(Debug, Clone)]
pub struct CapturedImage {
    /// Encoded image bytes as captured (persisted unchanged)
    pub encoded: Vec<u8>,
    /// Decoded RGBA pixels used by recognition and brightness analysis
    pub pixels: RgbaImage,
    /// Wall-clock time of capture
    pub timestamp: DateTime<Utc>,
}

/// Decode encoded bytes (JPEG, PNG, ...) into RGBA pixels
pub fn decode_pixels(encoded: &[u8]) -> PipelineResult<RgbaImage> {
    Ok(image::load_from_memory(encoded)?.to_rgba8())
}

impl CapturedImage {
    /// Decode an encoded photo (JPEG, PNG, ...)
    pub fn decode(encoded: Vec<u8>) -> PipelineResult<Self> {
        let pixels = decode_pixels(&encoded)?;
        Ok(Self {
            encoded,
            pixels,
            timestamp: Utc::now(),
        })
    }

    /// Wrap already-decoded pixels; `encoded` is kept as the persisted form
    pub fn from_parts(encoded: Vec<u8>, pixels: RgbaImage) -> Self {
        Self {
            encoded,
            pixels,
            timestamp: Utc::now(),
        }
    }

    /// Get image dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}
