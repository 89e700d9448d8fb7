//! Error types for the upload, processing and retrieval lifecycle

use axum::http::StatusCode;
use thiserror::Error;

use crate::config::{format_upload_limit, ErrorMode};

/// Result type alias for background removal server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Error types for the background removal web server
#[derive(Error, Debug)]
pub enum ServerError {
    /// The upload carried no `image` field or the filename was empty
    #[error("No file selected")]
    NoFileSelected,

    /// The uploaded payload exceeded the configured ceiling
    #[error("File too large: upload exceeds {limit} bytes")]
    FileTooLarge { limit: usize },

    /// The background removal adapter rejected the input or failed internally
    #[error("Processing error: {0}")]
    Processing(String),

    /// Artifact storage I/O failure
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Retrieval of a token the store never issued
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model resolution or loading errors
    #[error("Model error: {0}")]
    Model(String),

    /// Model download errors
    #[error("Network error: {0}")]
    Network(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Create a new file too large error for the given ceiling
    pub fn file_too_large(limit: usize) -> Self {
        Self::FileTooLarge { limit }
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<S: Into<String>>(token: S) -> Self {
        Self::NotFound(token.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Storage(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create network error with context
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// HTTP status used when this error is rendered back to the client
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoFileSelected => StatusCode::BAD_REQUEST,
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Processing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_)
            | Self::InvalidConfig(_)
            | Self::Model(_)
            | Self::Network(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown on the page for this error
    ///
    /// Adapter and storage details are only passed through in
    /// [`ErrorMode::Verbose`].
    #[must_use]
    pub fn user_message(&self, mode: ErrorMode) -> String {
        match (self, mode) {
            (Self::NoFileSelected, _) => "No file selected".to_string(),
            (Self::FileTooLarge { limit }, _) => format!(
                "File too large. Maximum size is {}",
                format_upload_limit(*limit)
            ),
            (Self::NotFound(_), _) => "File not found".to_string(),
            (Self::Processing(detail), ErrorMode::Verbose) => {
                format!("Error processing image: {}", detail)
            },
            (Self::Processing(_), ErrorMode::Sanitized) => {
                "Error processing image. Please try a different file.".to_string()
            },
            (Self::Storage(e), ErrorMode::Verbose) => {
                format!("Error saving processed image: {}", e)
            },
            (Self::Storage(_), ErrorMode::Sanitized) => "Error saving processed image".to_string(),
            (other, ErrorMode::Verbose) => format!("Unexpected error: {}", other),
            (_, ErrorMode::Sanitized) => "Unexpected server error".to_string(),
        }
    }
}
