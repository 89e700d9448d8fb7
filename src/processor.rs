//! Background removal processor
//!
//! Selects an adapter through a [`BackendFactory`] and runs it off the async
//! reactor. Whatever the adapter returns leaves the processor as PNG.

use crate::{
    config::RemoverConfig,
    error::{Result, ServerError},
    inference::BackgroundRemover,
    services::OutputFormatHandler,
    tracing_config::spans,
};
use instant::Instant;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, Instrument};

/// Backend type enumeration for runtime selection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime running the matting model in process
    Onnx,
    /// External program reading the image on stdin
    Command,
    /// Corner-colour keying, no model required
    Mock,
}

impl Default for BackendType {
    #[cfg(feature = "onnx")]
    fn default() -> Self {
        Self::Onnx
    }

    #[cfg(not(feature = "onnx"))]
    fn default() -> Self {
        Self::Mock
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Command => write!(f, "command"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

/// Factory trait for creating background removal adapters
pub trait BackendFactory: Send + Sync {
    /// Create an adapter of the given type
    ///
    /// # Errors
    /// - `ServerError::InvalidConfig` for backends not compiled in or missing settings
    /// - `ServerError::Model` when the ONNX model cannot be loaded
    fn create_backend(
        &self,
        backend_type: BackendType,
        config: &RemoverConfig,
    ) -> Result<Arc<dyn BackgroundRemover>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for every backend compiled into this build
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        config: &RemoverConfig,
    ) -> Result<Arc<dyn BackgroundRemover>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => {
                let model_path = config.model_path.as_deref().ok_or_else(|| {
                    ServerError::invalid_config("The ONNX backend needs a resolved model path")
                })?;
                Ok(Arc::new(crate::backends::OnnxBackend::from_file(
                    model_path, config,
                )?))
            },
            #[cfg(not(feature = "onnx"))]
            BackendType::Onnx => Err(ServerError::invalid_config(
                "ONNX backend not compiled in. Rebuild with --features onnx.",
            )),
            BackendType::Command => Ok(Arc::new(crate::backends::CommandBackend::from_config(
                config,
            )?)),
            BackendType::Mock => Ok(Arc::new(crate::backends::MockBackend::new())),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        backends.push(BackendType::Command);
        backends.push(BackendType::Mock);
        backends
    }
}

/// Runs an adapter on tokio's blocking pool and normalises its output
#[derive(Clone)]
pub struct BackgroundRemovalProcessor {
    remover: Arc<dyn BackgroundRemover>,
}

impl BackgroundRemovalProcessor {
    /// Wrap an already constructed adapter
    #[must_use]
    pub fn new(remover: Arc<dyn BackgroundRemover>) -> Self {
        Self { remover }
    }

    /// Build the configured adapter with the default factory
    ///
    /// # Errors
    /// - model resolution, download and loading errors
    /// - `ServerError::InvalidConfig` for unusable backend settings
    pub async fn from_config(config: &RemoverConfig) -> Result<Self> {
        Self::with_factory(config, &DefaultBackendFactory).await
    }

    /// Build the configured adapter with a custom factory
    ///
    /// The ONNX model is located or downloaded first.
    ///
    /// # Errors
    /// - model resolution, download and loading errors
    /// - `ServerError::InvalidConfig` for unusable backend settings
    pub async fn with_factory(config: &RemoverConfig, factory: &dyn BackendFactory) -> Result<Self> {
        let mut config = config.clone();
        if config.backend != BackendType::Onnx {
            info!(backend = %config.backend, "Initializing background removal backend");
            return Ok(Self::new(factory.create_backend(config.backend, &config)?));
        }

        let source = config
            .model_path
            .as_ref()
            .map_or_else(|| config.model_url.clone(), |path| path.display().to_string());
        let span = spans::model_loading(&source, &config.execution_provider.to_string());

        if config.model_path.is_none() {
            config.model_path = Some(
                crate::download::resolve_model_path(&config)
                    .instrument(span.clone())
                    .await?,
            );
        }

        let remover = span.in_scope(|| {
            info!(backend = %config.backend, "Initializing background removal backend");
            factory.create_backend(config.backend, &config)
        })?;
        Ok(Self::new(remover))
    }

    /// Name of the wrapped adapter
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.remover.name()
    }

    /// Remove the background from `input` and return PNG bytes
    ///
    /// # Errors
    /// - `ServerError::Processing` when the adapter fails or returns no image
    /// - `ServerError::Internal` when the blocking task panics or is cancelled
    pub async fn process(&self, input: Vec<u8>) -> Result<Vec<u8>> {
        let remover = Arc::clone(&self.remover);
        let span = spans::inference(remover.name(), input.len());
        let input_size = input.len();
        let start = Instant::now();

        let output = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let output = remover.remove_background(&input)?;
            OutputFormatHandler::ensure_png(output)
        })
        .await
        .map_err(|e| ServerError::internal(format!("Background removal task failed: {e}")))??;

        debug!(
            input_bytes = input_size,
            output_bytes = output.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "🎯 Background removal finished"
        );
        Ok(output)
    }
}
