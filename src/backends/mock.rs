//! Dependency-free backend for development and tests
//!
//! Treats every pixel close to the top-left corner colour as background. That
//! is good enough for flat studio backdrops and needs no model download.

use crate::error::{Result, ServerError};
use crate::inference::BackgroundRemover;
use crate::services::OutputFormatHandler;
use crate::utils::apply_alpha_mask;
use image::{GrayImage, Luma, Rgba};

/// Largest per-channel difference still counted as background
const DEFAULT_TOLERANCE: u8 = 32;

/// Corner-colour keying backend
#[derive(Debug, Clone)]
pub struct MockBackend {
    tolerance: u8,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    #[must_use]
    pub fn with_tolerance(tolerance: u8) -> Self {
        Self { tolerance }
    }

    fn is_background(&self, pixel: &Rgba<u8>, key: &Rgba<u8>) -> bool {
        pixel
            .0
            .iter()
            .zip(key.0.iter())
            .take(3)
            .all(|(a, b)| a.abs_diff(*b) <= self.tolerance)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundRemover for MockBackend {
    fn remove_background(&self, input: &[u8]) -> Result<Vec<u8>> {
        let image = image::load_from_memory(input)
            .map_err(|e| ServerError::processing(format!("Failed to decode image: {e}")))?;
        let rgba = image.to_rgba8();
        let Some(key) = rgba.get_pixel_checked(0, 0).copied() else {
            return Err(ServerError::processing("Image has no pixels"));
        };

        let mask = GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            if self.is_background(rgba.get_pixel(x, y), &key) {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        log::debug!(
            "Keyed out background colour {:?} on {}x{} image",
            key.0,
            rgba.width(),
            rgba.height()
        );

        OutputFormatHandler::encode_rgba(apply_alpha_mask(&image, &mask)?)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
