//! Alpha mask helpers shared by the in-process backends

use crate::error::{Result, ServerError};
use image::{DynamicImage, GrayImage, Rgba, RgbaImage};

/// Apply `mask` as the alpha channel of `image`
///
/// Pixels whose mask value is zero become fully transparent black; all others
/// keep their colour with the mask value as alpha.
///
/// # Errors
/// - `ServerError::Processing` when mask and image dimensions differ
pub fn apply_alpha_mask(image: &DynamicImage, mask: &GrayImage) -> Result<RgbaImage> {
    let rgba = image.to_rgba8();
    if rgba.dimensions() != mask.dimensions() {
        return Err(ServerError::processing(format!(
            "Mask size {:?} does not match image size {:?}",
            mask.dimensions(),
            rgba.dimensions()
        )));
    }

    Ok(RgbaImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let pixel = rgba.get_pixel(x, y);
        match mask.get_pixel(x, y).0[0] {
            0 => Rgba([0, 0, 0, 0]),
            alpha => Rgba([pixel[0], pixel[1], pixel[2], alpha]),
        }
    }))
}
