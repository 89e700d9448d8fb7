//! Model input preparation and mask recovery for the ONNX backend
//!
//! Images are letterboxed: scaled to fit a square canvas of the model's input
//! size, centred, and padded with white. [`Letterbox`] remembers that
//! transformation so the model's output can be mapped back onto the original
//! pixel grid.

use crate::config::PreprocessingConfig;
use crate::error::{Result, ServerError};
use image::{imageops, DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use ndarray::Array4;

/// Padding colour of the letterbox canvas
const PADDING: Rgb<u8> = Rgb([255, 255, 255]);

/// Geometry of one letterbox transformation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    original: (u32, u32),
    target_size: u32,
    scale: f32,
    offset_x: u32,
    offset_y: u32,
}

impl Letterbox {
    /// Fit an image of `original` dimensions into a `target_size` square
    #[must_use]
    pub fn new(original: (u32, u32), target_size: u32) -> Self {
        let (width, height) = original;
        let target = target_size as f32;
        let scale = (target / width.max(1) as f32).min(target / height.max(1) as f32);

        let mut letterbox = Self {
            original,
            target_size,
            scale,
            offset_x: 0,
            offset_y: 0,
        };
        let (scaled_width, scaled_height) = letterbox.scaled_size();
        letterbox.offset_x = (target_size - scaled_width) / 2;
        letterbox.offset_y = (target_size - scaled_height) / 2;
        letterbox
    }

    /// Size of the image once scaled onto the canvas
    #[must_use]
    pub fn scaled_size(&self) -> (u32, u32) {
        let fit = |side: u32| {
            ((side as f32 * self.scale).round() as u32).clamp(1, self.target_size.max(1))
        };
        (fit(self.original.0), fit(self.original.1))
    }

    /// Top-left corner of the scaled image on the canvas
    #[must_use]
    pub fn offset(&self) -> (u32, u32) {
        (self.offset_x, self.offset_y)
    }

    /// Turn a `[1, C, H, W]` model output into a mask over the original image
    ///
    /// The first channel is min-max normalised before sampling; a constant
    /// output is clamped to 0-1 instead.
    ///
    /// # Errors
    /// - `ServerError::Processing` for an empty or wrongly shaped tensor
    pub fn mask_from_tensor(&self, tensor: &Array4<f32>) -> Result<GrayImage> {
        let (batch, channels, mask_height, mask_width) = tensor.dim();
        if batch != 1 || channels == 0 || mask_height == 0 || mask_width == 0 {
            return Err(ServerError::processing(format!(
                "Invalid output tensor shape {:?}",
                tensor.shape()
            )));
        }

        let (min, max) = tensor
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });
        let range = max - min;
        let normalise = |value: f32| {
            if range > f32::EPSILON {
                (value - min) / range
            } else {
                value.clamp(0.0, 1.0)
            }
        };

        // Outputs smaller or larger than the input canvas are sampled proportionally
        let x_ratio = mask_width as f32 / self.target_size as f32;
        let y_ratio = mask_height as f32 / self.target_size as f32;

        let (width, height) = self.original;
        Ok(GrayImage::from_fn(width, height, |x, y| {
            let canvas_x = (x as f32 * self.scale).round() + self.offset_x as f32;
            let canvas_y = (y as f32 * self.scale).round() + self.offset_y as f32;
            let tensor_x = ((canvas_x * x_ratio) as usize).min(mask_width - 1);
            let tensor_y = ((canvas_y * y_ratio) as usize).min(mask_height - 1);

            let value = tensor
                .get([0, 0, tensor_y, tensor_x])
                .copied()
                .map_or(0.0, normalise);
            Luma([(value.clamp(0.0, 1.0) * 255.0) as u8])
        }))
    }
}

/// Image to tensor conversion
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Letterbox `image` and convert it to a normalised NCHW tensor
    ///
    /// # Errors
    /// - `ServerError::Processing` for images without pixels
    pub fn preprocess(
        image: &DynamicImage,
        config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, Letterbox)> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(ServerError::processing("Image has no pixels"));
        }

        let letterbox = Letterbox::new((width, height), config.target_size);
        let (scaled_width, scaled_height) = letterbox.scaled_size();
        let resized = imageops::resize(
            &rgb,
            scaled_width,
            scaled_height,
            imageops::FilterType::Triangle,
        );

        let mut canvas = RgbImage::from_pixel(config.target_size, config.target_size, PADDING);
        let (offset_x, offset_y) = letterbox.offset();
        imageops::replace(
            &mut canvas,
            &resized,
            i64::from(offset_x),
            i64::from(offset_y),
        );

        Ok((Self::canvas_to_tensor(&canvas, config), letterbox))
    }

    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let size = config.target_size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in canvas.enumerate_pixels() {
            for channel in 0..3 {
                let value = (f32::from(pixel[channel]) / 255.0
                    - config.normalization_mean[channel])
                    / config.normalization_std[channel];
                if let Some(slot) = tensor.get_mut([0, channel, y as usize, x as usize]) {
                    *slot = value;
                }
            }
        }

        tensor
    }
}
