//! Image helpers used by the in-process backends

pub mod mask;
#[cfg(feature = "onnx")]
pub mod preprocessing;

pub use mask::apply_alpha_mask;
#[cfg(feature = "onnx")]
pub use preprocessing::{ImagePreprocessor, Letterbox};
