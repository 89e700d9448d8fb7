//! HTTP surface: the upload page and artifact retrieval

pub mod routes;
pub mod startup;

pub use routes::{create_router, read_upload, MULTIPART_OVERHEAD_BYTES, OVERSIZE_DRAIN_FACTOR};
pub use startup::{await_shutdown_trigger, run_server, ServerHandle};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::handler::RequestHandler;
use crate::processor::BackgroundRemovalProcessor;
use crate::render::PageRenderer;
use crate::store::{create_store, ArtifactStore};
use std::sync::Arc;

/// State shared by every route
#[derive(Clone)]
pub struct AppState {
    pub handler: RequestHandler,
    pub renderer: PageRenderer,
}

impl AppState {
    #[must_use]
    pub fn new(
        processor: BackgroundRemovalProcessor,
        store: Arc<dyn ArtifactStore>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            handler: RequestHandler::new(
                processor,
                store,
                config.max_upload_bytes,
                config.error_mode,
            ),
            renderer: PageRenderer::new(config.max_upload_bytes),
        }
    }

    /// Build the adapter and the artifact store described by `config`
    ///
    /// # Errors
    /// - adapter construction errors (model download, loading, bad settings)
    /// - `ServerError::Storage` when the artifact directory cannot be created
    pub async fn from_config(config: &ServerConfig) -> Result<Self> {
        let processor = BackgroundRemovalProcessor::from_config(&config.remover).await?;
        let store = create_store(config)?;
        Ok(Self::new(processor, store, config))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        self.handler.store()
    }

    #[must_use]
    pub fn max_upload_bytes(&self) -> usize {
        self.handler.max_upload_bytes()
    }
}
