//! Model cache for the ONNX backend
//!
//! Downloaded models are kept as single files in a per-user cache directory:
//! - Linux: `~/.cache/bgremove-web/models/`
//! - macOS: `~/Library/Caches/bgremove-web/models/`
//! - Windows: `%LOCALAPPDATA%/bgremove-web/models/`
//!
//! `BGREMOVE_WEB_CACHE_DIR` overrides the base directory.

use crate::error::{Result, ServerError};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache base directory
pub const CACHE_DIR_ENV: &str = "BGREMOVE_WEB_CACHE_DIR";

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the default cache, creating its directory if needed
    ///
    /// # Errors
    /// - `ServerError::InvalidConfig` when no cache directory can be determined
    /// - `ServerError::Storage` when the directory cannot be created
    pub fn new() -> Result<Self> {
        let base = match std::env::var_os(CACHE_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::cache_dir()
                .ok_or_else(|| {
                    ServerError::invalid_config(format!(
                        "Failed to determine cache directory. Set {CACHE_DIR_ENV}."
                    ))
                })?
                .join("bgremove-web"),
        };
        Self::with_custom_cache_dir(&base)
    }

    /// Open a cache rooted at `base`, creating `base/models` if needed
    ///
    /// # Errors
    /// - `ServerError::Storage` when the directory cannot be created
    pub fn with_custom_cache_dir(base: &Path) -> Result<Self> {
        let cache_dir = base.join("models");
        fs::create_dir_all(&cache_dir)
            .map_err(|e| ServerError::file_io_error("create cache directory", &cache_dir, &e))?;
        Ok(Self { cache_dir })
    }

    /// Directory holding the cached model files
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache file name for a model URL
    ///
    /// `HuggingFace` URLs keep their repository path with `/` replaced by
    /// `--`; other URLs are named after a hash of the URL.
    ///
    /// ```
    /// use bgremove_web::cache::ModelCache;
    ///
    /// let name = ModelCache::url_to_file_name(
    ///     "https://huggingface.co/imgly/isnet-general-onnx/resolve/main/onnx/model.onnx",
    /// );
    /// assert_eq!(name, "imgly--isnet-general-onnx--resolve--main--onnx--model.onnx");
    /// ```
    #[must_use]
    pub fn url_to_file_name(url: &str) -> String {
        if let Some(path) = url.strip_prefix(HUGGINGFACE_PREFIX) {
            return path.trim_matches('/').replace('/', "--");
        }

        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("url-{}.onnx", digest.get(..16).unwrap_or(&digest))
    }

    /// Path the model downloaded from `url` is stored at (may not exist)
    #[must_use]
    pub fn model_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(Self::url_to_file_name(url))
    }

    /// Path of the cached model for `url` if a non-empty file is present
    #[must_use]
    pub fn cached_model(&self, url: &str) -> Option<PathBuf> {
        let path = self.model_path(url);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(path),
            _ => None,
        }
    }
}

/// Format a byte count for humans
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS.get(unit_index).unwrap_or(&"B");
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}
