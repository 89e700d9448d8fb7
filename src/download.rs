//! Model download for the ONNX backend
//!
//! Models are streamed into a uniquely named partial file next to their
//! final location, optionally checked against a SHA-256 digest, and then
//! renamed into place so a crashed download never looks like a cached model.

use crate::cache::{format_size, ModelCache};
use crate::config::RemoverConfig;
use crate::error::{Result, ServerError};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Model downloader backed by a [`ModelCache`]
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader using the default cache
    ///
    /// # Errors
    /// - `ServerError::Network` when the HTTP client cannot be built
    /// - cache directory errors from [`ModelCache::new`]
    pub fn new() -> Result<Self> {
        Self::with_cache(ModelCache::new()?)
    }

    /// Create a downloader for an existing cache
    ///
    /// # Errors
    /// - `ServerError::Network` when the HTTP client cannot be built
    pub fn with_cache(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| ServerError::network_error("Failed to create HTTP client", e))?;
        Ok(Self { client, cache })
    }

    /// The cache this downloader writes to
    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Return the cached model for `url`, downloading it first if needed
    ///
    /// # Errors
    /// - `ServerError::InvalidConfig` for unsupported URLs
    /// - `ServerError::Network` for HTTP failures or a digest mismatch
    /// - `ServerError::Storage` when the file cannot be written
    pub async fn ensure_model(&self, url: &str, expected_sha256: Option<&str>) -> Result<PathBuf> {
        validate_model_url(url)?;

        if let Some(path) = self.cache.cached_model(url) {
            log::info!("📦 Using cached model {}", path.display());
            return Ok(path);
        }

        let target = self.cache.model_path(url);
        let partial = target.with_extension(format!("part-{}", uuid::Uuid::new_v4().simple()));

        log::info!("⬇️ Downloading model from {}", url);
        let result = self.download_file(url, &partial).await.and_then(|size| {
            if let Some(expected) = expected_sha256 {
                verify_sha256(&partial, expected)?;
            }
            Ok(size)
        });

        let size = match result {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            },
        };

        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| ServerError::file_io_error("move downloaded model to", &target, &e))?;
        log::info!(
            "✅ Model cached at {} ({})",
            target.display(),
            format_size(size)
        );
        Ok(target)
    }

    async fn download_file(&self, url: &str, local_path: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServerError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(ServerError::network_error(
                format!("Failed to download {url}"),
                format!("HTTP {}", response.status()),
            ));
        }
        let total = response.content_length();

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(local_path)
            .await
            .map_err(|e| ServerError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut next_report = 0u64;
        let mut buffer = vec![0; 64 * 1024];
        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| ServerError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| ServerError::file_io_error("write to file", local_path, &e))?;
            downloaded += bytes_read as u64;

            if downloaded >= next_report {
                match total {
                    Some(total) => log::debug!(
                        "Downloaded {} of {}",
                        format_size(downloaded),
                        format_size(total)
                    ),
                    None => log::debug!("Downloaded {}", format_size(downloaded)),
                }
                next_report = downloaded + 16 * 1024 * 1024;
            }
        }

        file.flush()
            .await
            .map_err(|e| ServerError::file_io_error("flush file", local_path, &e))?;

        if downloaded == 0 {
            return Err(ServerError::network_error(
                format!("Failed to download {url}"),
                "empty response body",
            ));
        }
        Ok(downloaded)
    }
}

/// Check that the file at `path` has the given SHA-256 digest (hex)
///
/// # Errors
/// - `ServerError::Storage` when the file cannot be read
/// - `ServerError::Network` when the digest does not match
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let contents = std::fs::read(path)
        .map_err(|e| ServerError::file_io_error("read file for verification", path, &e))?;

    let mut hasher = Sha256::new();
    hasher.update(&contents);
    let actual = format!("{:x}", hasher.finalize());

    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(ServerError::network_error(
            format!("Integrity check failed for {}", path.display()),
            format!("expected {expected}, got {actual}"),
        ))
    }
}

/// Check that `url` is an HTTP(S) URL with a host
///
/// # Errors
/// - `ServerError::InvalidConfig` describing what is wrong
pub fn validate_model_url(url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            ServerError::invalid_config(format!(
                "Unsupported model URL: '{url}'. Expected an http(s) URL"
            ))
        })?;

    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(ServerError::invalid_config(format!(
            "Model URL has no host: '{url}'"
        )));
    }
    Ok(())
}

/// Resolve the model file for the ONNX backend
///
/// An explicit `model_path` wins; otherwise the model is taken from the cache
/// or downloaded from `model_url`.
///
/// # Errors
/// - `ServerError::Model` when an explicit path does not exist
/// - download and cache errors from [`ModelDownloader::ensure_model`]
pub async fn resolve_model_path(config: &RemoverConfig) -> Result<PathBuf> {
    if let Some(path) = &config.model_path {
        if !path.is_file() {
            return Err(ServerError::model(format!(
                "Model file not found: {}",
                path.display()
            )));
        }
        return Ok(path.clone());
    }

    ModelDownloader::with_cache(model_cache(config)?)?
        .ensure_model(&config.model_url, config.model_sha256.as_deref())
        .await
}

/// Open the model cache configured in `config`
///
/// # Errors
/// - cache directory errors from [`ModelCache`]
pub fn model_cache(config: &RemoverConfig) -> Result<ModelCache> {
    match &config.cache_dir {
        Some(base) => ModelCache::with_custom_cache_dir(base),
        None => ModelCache::new(),
    }
}
