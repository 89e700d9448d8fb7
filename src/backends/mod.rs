//! Background removal adapters
//!
//! - ONNX Runtime backend (in-process matting model, optional GPU acceleration)
//! - Command backend (external program over stdin/stdout)
//! - Mock backend (corner-colour keying for development and tests)

pub mod command;
pub mod mock;
#[cfg(feature = "onnx")]
pub mod onnx;

pub use self::command::CommandBackend;
pub use self::mock::MockBackend;
#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;
