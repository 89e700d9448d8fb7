//! Configuration types for the background removal web server

use crate::error::{Result, ServerError};
use crate::processor::BackendType;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Upload ceiling applied to the bytes actually read from the `image` field
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Upload ceiling as shown to users: whole megabytes, or kilobytes below 1MB
#[must_use]
pub fn format_upload_limit(bytes: usize) -> String {
    const KIB: usize = 1024;
    const MIB: usize = 1024 * KIB;

    if bytes >= MIB {
        format!("{}MB", bytes / MIB)
    } else {
        format!("{}KB", bytes.div_ceil(KIB))
    }
}

/// Default listening port
pub const DEFAULT_PORT: u16 = 5000;

/// ISNet general-use model published by IMG.LY on `HuggingFace`
pub const DEFAULT_MODEL_URL: &str =
    "https://huggingface.co/imgly/isnet-general-onnx/resolve/main/onnx/model.onnx";

/// Default timeout for the external command backend
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    #[serde(rename = "coreml")]
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// How adapter and storage failures are described to the end user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Pass the adapter's error text through to the page
    #[default]
    Verbose,
    /// Show a generic message and keep the detail in the logs
    Sanitized,
}

/// Where processed artifacts are kept for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Private temporary directory, removed on shutdown
    #[default]
    Disk,
    /// In-process map
    Memory,
}

/// Model input preprocessing parameters for the ONNX backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// Square input edge length expected by the model
    pub target_size: u32,
    /// Per-channel mean subtracted after scaling to 0-1
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation divided after mean subtraction
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: 1024,
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }
}

/// Settings for the background removal adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoverConfig {
    /// Which adapter implementation to use
    pub backend: BackendType,
    /// Explicit path to an ONNX model file
    pub model_path: Option<PathBuf>,
    /// URL the model is downloaded from when no path is given and the cache is empty
    pub model_url: String,
    /// Expected SHA-256 (hex) of a downloaded model
    pub model_sha256: Option<String>,
    /// Base directory of the model cache (per-user cache directory when unset)
    pub cache_dir: Option<PathBuf>,
    /// Execution provider for the ONNX backend
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads (0 = auto)
    pub intra_threads: usize,
    /// Model input preprocessing
    pub preprocessing: PreprocessingConfig,
    /// Program and arguments for the command backend; image on stdin, result on stdout
    pub command: Vec<String>,
    /// Seconds before the command backend kills its child process
    pub command_timeout_secs: u64,
}

impl Default for RemoverConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            model_path: None,
            model_url: DEFAULT_MODEL_URL.to_string(),
            model_sha256: None,
            cache_dir: None,
            execution_provider: ExecutionProvider::Auto,
            intra_threads: 0,
            preprocessing: PreprocessingConfig::default(),
            command: Vec::new(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

/// Top-level server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_address: SocketAddr,
    /// Upload ceiling in bytes
    pub max_upload_bytes: usize,
    /// Verbose or sanitized user-facing error messages
    pub error_mode: ErrorMode,
    /// Artifact storage backend
    pub storage: StorageBackend,
    /// Parent directory for the artifact directory (system temp dir when unset)
    pub temp_root: Option<PathBuf>,
    /// Adapter settings
    pub remover: RemoverConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            error_mode: ErrorMode::Verbose,
            storage: StorageBackend::Disk,
            temp_root: None,
            remover: RemoverConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration builder
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Load a configuration from a JSON file; absent keys keep their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ServerError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            ServerError::invalid_config(format!("Failed to parse '{}': {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(ServerError::invalid_config(
                "max_upload_bytes must be greater than zero",
            ));
        }
        if self.remover.backend == BackendType::Command && self.remover.command.is_empty() {
            return Err(ServerError::invalid_config(
                "The command backend requires a program to run",
            ));
        }
        if self.remover.command_timeout_secs == 0 {
            return Err(ServerError::invalid_config(
                "command_timeout_secs must be greater than zero",
            ));
        }
        let preprocessing = &self.remover.preprocessing;
        if preprocessing.target_size == 0 {
            return Err(ServerError::invalid_config(
                "preprocessing.target_size must be greater than zero",
            ));
        }
        if preprocessing.normalization_std.iter().any(|s| *s == 0.0) {
            return Err(ServerError::invalid_config(
                "preprocessing.normalization_std must not contain zero",
            ));
        }
        Ok(())
    }
}

/// Builder for `ServerConfig`
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Start from an existing configuration, e.g. one loaded from a file
    #[must_use]
    pub fn from_config(config: ServerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn bind_address(mut self, address: SocketAddr) -> Self {
        self.config.bind_address = address;
        self
    }

    #[must_use]
    pub fn host(mut self, host: IpAddr) -> Self {
        self.config.bind_address.set_ip(host);
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.bind_address.set_port(port);
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    #[must_use]
    pub fn error_mode(mut self, mode: ErrorMode) -> Self {
        self.config.error_mode = mode;
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: StorageBackend) -> Self {
        self.config.storage = storage;
        self
    }

    #[must_use]
    pub fn temp_root(mut self, root: PathBuf) -> Self {
        self.config.temp_root = Some(root);
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.remover.backend = backend;
        self
    }

    #[must_use]
    pub fn model_path(mut self, path: PathBuf) -> Self {
        self.config.remover.model_path = Some(path);
        self
    }

    #[must_use]
    pub fn model_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.remover.model_url = url.into();
        self
    }

    #[must_use]
    pub fn model_sha256<S: Into<String>>(mut self, digest: S) -> Self {
        self.config.remover.model_sha256 = Some(digest.into());
        self
    }

    #[must_use]
    pub fn cache_dir(mut self, dir: PathBuf) -> Self {
        self.config.remover.cache_dir = Some(dir);
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.remover.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.remover.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn command(mut self, command: Vec<String>) -> Self {
        self.config.remover.command = command;
        self
    }

    #[must_use]
    pub fn command_timeout_secs(mut self, secs: u64) -> Self {
        self.config.remover.command_timeout_secs = secs;
        self
    }

    /// Build the server configuration
    ///
    /// # Errors
    ///
    /// Returns `ServerError::InvalidConfig` when validation fails
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_format_upload_limit() {
        assert_eq!(format_upload_limit(16 * 1024 * 1024), "16MB");
        assert_eq!(format_upload_limit(1024 * 1024), "1MB");
        assert_eq!(format_upload_limit(512 * 1024), "512KB");
        assert_eq!(format_upload_limit(1000), "1KB");
        assert_eq!(format_upload_limit(1), "1KB");
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(config.bind_address.port(), 5000);
        assert!(config.bind_address.ip().is_loopback());
        assert_eq!(config.error_mode, ErrorMode::Verbose);
        assert_eq!(config.storage, StorageBackend::Disk);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = ServerConfig::builder()
            .port(8080)
            .max_upload_bytes(1024)
            .error_mode(ErrorMode::Sanitized)
            .storage(StorageBackend::Memory)
            .backend(BackendType::Mock)
            .build()
            .unwrap();

        assert_eq!(config.bind_address.port(), 8080);
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(config.error_mode, ErrorMode::Sanitized);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.remover.backend, BackendType::Mock);
    }

    #[test]
    fn test_command_backend_requires_program() {
        let result = ServerConfig::builder().backend(BackendType::Command).build();
        assert!(matches!(result, Err(ServerError::InvalidConfig(_))));

        let config = ServerConfig::builder()
            .backend(BackendType::Command)
            .command(vec!["rembg".into(), "i".into(), "-".into(), "-".into()])
            .build()
            .unwrap();
        assert_eq!(config.remover.command.len(), 4);
    }

    #[test]
    fn test_zero_upload_limit_rejected() {
        let result = ServerConfig::builder().max_upload_bytes(0).build();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("max_upload_bytes"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"error_mode": "sanitized", "remover": {{"backend": "mock"}}}}"#
        )
        .unwrap();

        let config = ServerConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.error_mode, ErrorMode::Sanitized);
        assert_eq!(config.remover.backend, BackendType::Mock);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(config.remover.model_url, DEFAULT_MODEL_URL);
    }

    #[test]
    fn test_invalid_json_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = ServerConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, ServerError::InvalidConfig(_)));
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_execution_provider_display() {
        assert_eq!(ExecutionProvider::Auto.to_string(), "auto");
        assert_eq!(ExecutionProvider::CoreMl.to_string(), "coreml");
        let parsed: ExecutionProvider = serde_json::from_str("\"coreml\"").unwrap();
        assert_eq!(parsed, ExecutionProvider::CoreMl);
    }
}
