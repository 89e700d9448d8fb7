#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Background Removal Web Server
//!
//! A small web front end for background removal. Users upload an image on a
//! single page, a pluggable adapter removes the background, and the result is
//! kept under a random token for preview (`/result/{token}`) and download
//! (`/download/{token}`) until the process exits.
//!
//! ## Features
//!
//! - **Pluggable Adapters**: in-process ONNX Runtime model, external command
//!   (e.g. `rembg`), or a model-free mock for development
//! - **Hardware Acceleration**: CUDA, `CoreML` and CPU execution providers
//! - **Model Management**: automatic download and caching of the `ISNet` model
//! - **Scoped Storage**: private temporary directory removed on shutdown, or
//!   an in-memory store
//! - **CLI Integration**: `bgremove-web` binary (enable with `cli` feature)
//!
//! ## Embedding the Server
//!
//! ```rust,no_run
//! use bgremove_web::{processor::BackendType, server, ServerConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServerConfig::builder()
//!     .port(8080)
//!     .backend(BackendType::Mock)
//!     .build()?;
//!
//! let state = server::AppState::from_config(&config).await?;
//! let handle = server::run_server(state, config.bind_address).await?;
//! println!("Listening on {}", handle.base_url());
//!
//! server::await_shutdown_trigger().await;
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `cli` (default): command-line interface and subscriber setup
//! - `webp-support` (default): WebP input support
//! - `tracing-json`, `tracing-files`: extra log formats and file output

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod handler;
pub mod inference;
pub mod processor;
pub mod render;
pub mod server;
pub mod services;
pub mod store;
pub mod tracing_config;
pub mod utils;

pub use config::{ErrorMode, ExecutionProvider, RemoverConfig, ServerConfig, StorageBackend};
pub use error::{Result, ServerError};
pub use handler::{RequestHandler, RequestOutcome, UploadedImage};
pub use inference::BackgroundRemover;
pub use processor::{BackendFactory, BackendType, BackgroundRemovalProcessor};
pub use render::render_page;
pub use server::{create_router, AppState};
pub use store::{ArtifactStore, ArtifactToken, DiskArtifactStore, MemoryArtifactStore};
