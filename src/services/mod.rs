//! Services shared by the adapters and the request handler

pub mod format;

pub use format::OutputFormatHandler;
