//! Artifact store for processed images
//!
//! Processed images live for the lifetime of the process under an opaque,
//! randomly generated token. The token is the only key: it is never derived
//! from request data, so a retrieval path segment can only ever name a file
//! this store created.

use crate::config::{ServerConfig, StorageBackend};
use crate::error::{Result, ServerError};
use crate::services::OutputFormatHandler;
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of the process-scoped artifact directory
const TEMP_DIR_PREFIX: &str = "bgremove-web-";

/// Opaque identifier of a stored artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactToken(Uuid);

impl ArtifactToken {
    /// Generate a fresh random token
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// File name of the artifact inside the disk store
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{}", self, OutputFormatHandler::extension())
    }

    /// File name offered to the browser on download
    #[must_use]
    pub fn download_name(&self) -> String {
        format!("no_background_{}.{}", self, OutputFormatHandler::extension())
    }
}

impl std::fmt::Display for ArtifactToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ArtifactToken {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ServerError::not_found(s))
    }
}

/// Storage for processed artifacts keyed by token
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` under a new token
    ///
    /// # Errors
    /// - `ServerError::Storage` when the artifact cannot be written
    async fn put(&self, bytes: Vec<u8>) -> Result<ArtifactToken>;

    /// Fetch the artifact for `token`, `None` when it was never stored
    ///
    /// # Errors
    /// - `ServerError::Storage` for I/O failures other than absence
    async fn get(&self, token: &ArtifactToken) -> Result<Option<Vec<u8>>>;

    /// Number of stored artifacts
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Best-effort removal of every stored artifact; never fails
    async fn teardown(&self);

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// Disk-backed store rooted in a private temporary directory
///
/// The directory is removed by [`ArtifactStore::teardown`] and, failing that,
/// when the store is dropped.
#[derive(Debug)]
pub struct DiskArtifactStore {
    root: PathBuf,
    dir: Mutex<Option<TempDir>>,
}

impl DiskArtifactStore {
    /// Create a fresh private directory, under `parent` when given
    ///
    /// # Errors
    /// - `ServerError::Storage` when the directory cannot be created
    pub fn new(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_DIR_PREFIX);
        let dir = match parent {
            Some(parent) => builder
                .tempdir_in(parent)
                .map_err(|e| ServerError::file_io_error("create artifact directory in", parent, &e))?,
            None => builder.tempdir().map_err(|e| {
                ServerError::file_io_error("create artifact directory in", std::env::temp_dir(), &e)
            })?,
        };
        let root = dir.path().to_path_buf();
        info!(path = %root.display(), "📁 Artifact directory created");

        Ok(Self {
            root,
            dir: Mutex::new(Some(dir)),
        })
    }

    /// Directory holding the artifacts
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an artifact with `token` is stored at
    #[must_use]
    pub fn path_for(&self, token: &ArtifactToken) -> PathBuf {
        self.root.join(token.file_name())
    }

    fn is_open(&self) -> bool {
        self.dir.lock().map(|dir| dir.is_some()).unwrap_or(false)
    }

    /// Write `bytes` to the file for `token`; the file must not exist yet
    async fn write_new(&self, token: &ArtifactToken, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(token);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| ServerError::file_io_error("create artifact", &path, &e))?;

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(cleanup_err) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %cleanup_err, "Failed to remove partial artifact");
            }
            return Err(ServerError::file_io_error("write artifact", &path, &e));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for DiskArtifactStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ArtifactToken> {
        if !self.is_open() {
            return Err(ServerError::Storage(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "artifact directory has been torn down",
            )));
        }

        let token = ArtifactToken::generate();
        self.write_new(&token, &bytes).await?;
        debug!(token = %token, size_bytes = bytes.len(), "💾 Artifact stored");
        Ok(token)
    }

    async fn get(&self, token: &ArtifactToken) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(token);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServerError::file_io_error("read artifact", &path, &e)),
        }
    }

    async fn len(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(ServerError::file_io_error("list artifacts", &self.root, &e)),
        };

        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ServerError::file_io_error("list artifacts", &self.root, &e))?
        {
            let is_artifact = entry
                .path()
                .extension()
                .is_some_and(|ext| ext == OutputFormatHandler::extension());
            if is_artifact {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn teardown(&self) {
        let dir = match self.dir.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(dir) = dir else {
            debug!("Artifact directory already torn down");
            return;
        };

        let root = self.root.clone();
        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(Ok(())) => info!(path = %root.display(), "🧹 Cleaned up temporary files"),
            Ok(Err(e)) => warn!(
                path = %root.display(),
                error = %e,
                "Failed to remove artifact directory"
            ),
            Err(e) => warn!(
                path = %root.display(),
                error = %e,
                "Artifact cleanup task did not complete"
            ),
        }
    }

    fn describe(&self) -> String {
        format!("disk:{}", self.root.display())
    }
}

/// In-memory store; artifacts vanish with the process
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<ArtifactToken, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert_new(&self, token: ArtifactToken, bytes: Vec<u8>) -> Result<()> {
        match self.artifacts.write().await.entry(token) {
            Entry::Vacant(slot) => {
                slot.insert(bytes);
                Ok(())
            },
            Entry::Occupied(_) => Err(ServerError::Storage(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("artifact {} already exists", token),
            ))),
        }
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ArtifactToken> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ServerError::Storage(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "artifact store has been torn down",
            )));
        }

        let token = ArtifactToken::generate();
        let size = bytes.len();
        self.insert_new(token, bytes).await?;
        debug!(token = %token, size_bytes = size, "💾 Artifact stored in memory");
        Ok(token)
    }

    async fn get(&self, token: &ArtifactToken) -> Result<Option<Vec<u8>>> {
        Ok(self.artifacts.read().await.get(token).cloned())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.artifacts.read().await.len())
    }

    async fn teardown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut artifacts = self.artifacts.write().await;
        let count = artifacts.len();
        artifacts.clear();
        info!(count, "🧹 Dropped in-memory artifacts");
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Create the artifact store selected by the configuration
///
/// # Errors
/// - `ServerError::Storage` when the disk store's directory cannot be created
pub fn create_store(config: &ServerConfig) -> Result<Arc<dyn ArtifactStore>> {
    match config.storage {
        StorageBackend::Disk => Ok(Arc::new(DiskArtifactStore::new(
            config.temp_root.as_deref(),
        )?)),
        StorageBackend::Memory => Ok(Arc::new(MemoryArtifactStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk_store() -> (TempDir, DiskArtifactStore) {
        let parent = TempDir::new().unwrap();
        let store = DiskArtifactStore::new(Some(parent.path())).unwrap();
        (parent, store)
    }

    #[test]
    fn test_token_round_trips_through_display() {
        let token = ArtifactToken::generate();
        let parsed: ArtifactToken = token.to_string().parse().unwrap();
        assert_eq!(parsed, token);
        assert_eq!(token.to_string().len(), 36);
    }

    #[test]
    fn test_token_rejects_path_like_input() {
        for input in ["../../etc/passwd", "", "abc", "result.png", "..%2F..%2Fsecret"] {
            let err = input.parse::<ArtifactToken>().unwrap_err();
            assert!(matches!(err, ServerError::NotFound(_)), "{input} should not parse");
        }
    }

    #[test]
    fn test_token_names() {
        let token = ArtifactToken::generate();
        assert_eq!(token.file_name(), format!("{token}.png"));
        assert_eq!(token.download_name(), format!("no_background_{token}.png"));
    }

    #[tokio::test]
    async fn test_disk_round_trip() {
        let (_parent, store) = disk_store();
        let bytes = vec![0x89, b'P', b'N', b'G', 1, 2, 3];

        let token = store.put(bytes.clone()).await.unwrap();
        assert_eq!(store.get(&token).await.unwrap(), Some(bytes));
        assert!(store.path_for(&token).exists());
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_disk_unknown_token_is_none() {
        let (_parent, store) = disk_store();
        let token = ArtifactToken::generate();
        assert_eq!(store.get(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disk_puts_never_overwrite() {
        let (_parent, store) = disk_store();
        let first = store.put(b"first".to_vec()).await.unwrap();
        let second = store.put(b"second".to_vec()).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.get(&first).await.unwrap().unwrap(), b"first");
        assert_eq!(store.get(&second).await.unwrap().unwrap(), b"second");
        assert_eq!(store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_disk_write_new_refuses_existing_file() {
        let (_parent, store) = disk_store();
        let token = ArtifactToken::generate();
        store.write_new(&token, b"original").await.unwrap();

        let err = store.write_new(&token, b"replacement").await.unwrap_err();
        assert!(matches!(err, ServerError::Storage(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists));
        assert_eq!(store.get(&token).await.unwrap().unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_disk_directory_is_private() {
        let (_parent, store) = disk_store();
        assert!(store.root().is_dir());
        assert!(store
            .root()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(TEMP_DIR_PREFIX));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(store.root()).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0);
        }
    }

    #[tokio::test]
    async fn test_disk_teardown_removes_directory_and_is_idempotent() {
        let (_parent, store) = disk_store();
        store.put(b"artifact".to_vec()).await.unwrap();
        let root = store.root().to_path_buf();

        store.teardown().await;
        assert!(!root.exists());

        store.teardown().await;
        let err = store.put(b"late".to_vec()).await.unwrap_err();
        assert!(matches!(err, ServerError::Storage(_)));
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disk_drop_removes_directory() {
        let (_parent, store) = disk_store();
        let root = store.root().to_path_buf();
        drop(store);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_memory_round_trip_and_teardown() {
        let store = MemoryArtifactStore::new();
        assert!(store.is_empty().await.unwrap());

        let token = store.put(vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get(&token).await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(store.get(&ArtifactToken::generate()).await.unwrap(), None);

        store.teardown().await;
        assert!(store.is_empty().await.unwrap());
        assert!(store.put(vec![4]).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_insert_refuses_duplicate_token() {
        let store = MemoryArtifactStore::new();
        let token = ArtifactToken::generate();
        store.insert_new(token, vec![1]).await.unwrap();
        assert!(store.insert_new(token, vec![2]).await.is_err());
        assert_eq!(store.get(&token).await.unwrap(), Some(vec![1]));
    }

    #[tokio::test]
    async fn test_create_store_follows_config() {
        let parent = TempDir::new().unwrap();
        let config = ServerConfig::builder()
            .temp_root(parent.path().to_path_buf())
            .build()
            .unwrap();
        let store = create_store(&config).unwrap();
        assert!(store.describe().starts_with("disk:"));
        assert!(store.describe().contains(&parent.path().display().to_string()));

        let config = ServerConfig::builder()
            .storage(StorageBackend::Memory)
            .build()
            .unwrap();
        assert_eq!(create_store(&config).unwrap().describe(), "memory");
    }
}
