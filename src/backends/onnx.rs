//! ONNX Runtime backend
//!
//! Runs an ISNet-style matting model in process. The session is built once
//! and shared behind a mutex, so concurrent requests take turns on it.

use crate::config::{ExecutionProvider, PreprocessingConfig, RemoverConfig};
use crate::error::{Result, ServerError};
use crate::inference::BackgroundRemover;
use crate::services::OutputFormatHandler;
use crate::utils::{apply_alpha_mask, ImagePreprocessor};
use instant::Instant;
use ndarray::{Array4, Ix4};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// In-process background removal with ONNX Runtime
pub struct OnnxBackend {
    session: Mutex<Session>,
    preprocessing: PreprocessingConfig,
    model_path: PathBuf,
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers with availability and description
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "🔍 Checking execution providers on {os}/{arch}",
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH
        );

        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Load the model at `model_path` and build a session for it
    ///
    /// # Errors
    /// - `ServerError::Model` when the session cannot be created
    pub fn from_file(model_path: &Path, config: &RemoverConfig) -> Result<Self> {
        let load_start = Instant::now();
        if !model_path.is_file() {
            return Err(ServerError::model(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        let builder = Session::builder()
            .map_err(|e| ServerError::model(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ServerError::model(format!("Failed to set optimization level: {e}")))?;
        let builder = Self::configure_providers(builder, config.execution_provider)?;

        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
        };

        let session = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| ServerError::model(format!("Failed to set intra threads: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                ServerError::model(format!(
                    "Failed to create session from '{}': {e}",
                    model_path.display()
                ))
            })?;

        log::info!(
            "📊 Model loaded from {} in {:.0}ms ({} intra-op threads, provider {})",
            model_path.display(),
            load_start.elapsed().as_secs_f64() * 1000.0,
            intra_threads,
            config.execution_provider
        );

        Ok(Self {
            session: Mutex::new(session),
            preprocessing: config.preprocessing.clone(),
            model_path: model_path.to_path_buf(),
        })
    }

    /// Path of the loaded model
    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn configure_providers(
        builder: SessionBuilder,
        provider: ExecutionProvider,
    ) -> Result<SessionBuilder> {
        let cuda = || {
            let cuda = CUDAExecutionProvider::default();
            OrtExecutionProvider::is_available(&cuda)
                .unwrap_or(false)
                .then(|| cuda.build())
        };
        let coreml = || {
            let coreml = CoreMLExecutionProvider::default();
            OrtExecutionProvider::is_available(&coreml)
                .unwrap_or(false)
                .then(|| coreml.with_subgraphs(true).build())
        };

        let providers: Vec<ExecutionProviderDispatch> = match provider {
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Vec::new()
            },
            ExecutionProvider::Auto => cuda().into_iter().chain(coreml()).collect(),
            ExecutionProvider::Cuda => cuda().into_iter().collect(),
            ExecutionProvider::CoreMl => coreml().into_iter().collect(),
        };

        if providers.is_empty() {
            if provider != ExecutionProvider::Cpu {
                log::warn!(
                    "⚠️ Execution provider '{}' not available, falling back to CPU",
                    provider
                );
            }
            return Ok(builder);
        }

        log::info!(
            "✅ Hardware acceleration enabled with {count} provider(s)",
            count = providers.len()
        );
        builder
            .with_execution_providers(providers)
            .map_err(|e| ServerError::model(format!("Failed to set execution providers: {e}")))
    }

    fn infer(&self, input: Array4<f32>) -> Result<Array4<f32>> {
        let input_value = Value::from_array(input)
            .map_err(|e| ServerError::processing(format!("Failed to convert input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ServerError::internal("ONNX session lock poisoned"))?;

        let inference_start = Instant::now();
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| ServerError::processing(format!("ONNX inference failed: {e}")))?;
        log::debug!(
            "  ⚡ Core inference: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| ServerError::processing("No output tensors found"))?;
        let output = outputs
            .get(first_key)
            .ok_or_else(|| ServerError::processing("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| ServerError::processing(format!("Failed to extract output tensor: {e}")))?;

        let dimensions = output.ndim();
        output
            .into_dimensionality::<Ix4>()
            .map(|view| view.to_owned())
            .map_err(|_| {
                ServerError::processing(format!("Expected 4D output tensor, got {dimensions}D"))
            })
    }
}

impl BackgroundRemover for OnnxBackend {
    fn remove_background(&self, input: &[u8]) -> Result<Vec<u8>> {
        let image = image::load_from_memory(input)
            .map_err(|e| ServerError::processing(format!("Failed to decode image: {e}")))?;

        let (tensor, letterbox) = ImagePreprocessor::preprocess(&image, &self.preprocessing)?;
        let output = self.infer(tensor)?;
        let mask = letterbox.mask_from_tensor(&output)?;
        let result = apply_alpha_mask(&image, &mask)?;

        OutputFormatHandler::encode_rgba(result)
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}
