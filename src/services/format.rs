//! Output format handling service
//!
//! Every stored artifact is PNG. Adapters are free to return any encoding the
//! `image` crate can read; anything that is not already PNG is decoded and
//! re-encoded here.

use crate::error::{Result, ServerError};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;

/// Service for normalising adapter output to the served encoding
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// MIME type of every served artifact
    pub const MIME_TYPE: &'static str = "image/png";

    /// File extension of stored and downloaded artifacts (without the dot)
    #[must_use]
    pub fn extension() -> &'static str {
        "png"
    }

    /// Guess the encoding of `bytes` from its magic number
    #[must_use]
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }

    /// Encode an image as PNG, keeping its alpha channel
    ///
    /// # Errors
    /// - `ServerError::Processing` when the encoder fails
    pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| ServerError::processing(format!("Failed to encode PNG: {}", e)))?;
        Ok(buffer.into_inner())
    }

    /// Encode an RGBA buffer as PNG
    ///
    /// # Errors
    /// - `ServerError::Processing` when the encoder fails
    pub fn encode_rgba(image: RgbaImage) -> Result<Vec<u8>> {
        Self::encode_png(&DynamicImage::ImageRgba8(image))
    }

    /// Return `bytes` unchanged when they are PNG, otherwise re-encode them
    ///
    /// # Errors
    /// - `ServerError::Processing` when the bytes are not a decodable image
    pub fn ensure_png(bytes: Vec<u8>) -> Result<Vec<u8>> {
        match Self::detect_format(&bytes) {
            Some(ImageFormat::Png) => Ok(bytes),
            detected => {
                log::debug!(
                    "Re-encoding adapter output from {:?} to PNG ({} bytes)",
                    detected,
                    bytes.len()
                );
                let image = image::load_from_memory(&bytes).map_err(|e| {
                    ServerError::processing(format!("Adapter returned an unreadable image: {}", e))
                })?;
                Self::encode_png(&image)
            },
        }
    }
}
