//! Upload request handling
//!
//! One upload walks `Idle → Validating → Processing → Persisting → Done`,
//! dropping to `Failed` from any state after `Idle`. Validation failures never
//! reach the adapter, and adapter failures never reach the store.

use crate::config::ErrorMode;
use crate::error::{Result, ServerError};
use crate::processor::BackgroundRemovalProcessor;
use crate::store::{ArtifactStore, ArtifactToken};
use crate::tracing_config::{events, spans};
use axum::http::StatusCode;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument, Span};

/// An image as received from the client, owned by the current request
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// File name declared by the client
    pub filename: String,
    /// MIME type declared by the client
    pub content_type: Option<String>,
    /// Raw bytes, possibly cut off one byte past the upload ceiling
    pub bytes: Vec<u8>,
}

/// Result of one request, consumed by the renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Nothing submitted yet
    Idle,
    /// The processed image is stored under `token`
    Success { token: ArtifactToken },
    /// The request failed; `message` is safe to show
    Error { message: String, status: StatusCode },
}

impl RequestOutcome {
    /// Outcome for `error` under the given error mode
    #[must_use]
    pub fn from_error(error: &ServerError, mode: ErrorMode) -> Self {
        Self::Error {
            message: error.user_message(mode),
            status: error.status_code(),
        }
    }

    /// HTTP status the rendered page is served with
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Idle | Self::Success { .. } => StatusCode::OK,
            Self::Error { status, .. } => *status,
        }
    }
}

/// Lifecycle states of one upload request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Validating,
    Processing,
    Persisting,
    Done,
    Failed,
}

impl RequestState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Processing => "processing",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Whether `next` may follow `self`
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Validating)
                | (Self::Validating, Self::Processing)
                | (Self::Processing, Self::Persisting)
                | (Self::Persisting, Self::Done)
                | (
                    Self::Validating | Self::Processing | Self::Persisting,
                    Self::Failed
                )
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Tracks the state of one request and rejects illegal transitions
#[derive(Debug)]
pub struct RequestLifecycle {
    state: RequestState,
}

impl RequestLifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RequestState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Move to `next`
    ///
    /// # Errors
    /// - `ServerError::Internal` when `next` may not follow the current state
    pub fn advance(&mut self, next: RequestState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ServerError::internal(format!(
                "Illegal request transition {} -> {}",
                self.state.as_str(),
                next.as_str()
            )));
        }
        events::transition(self.state.as_str(), next.as_str());
        self.state = next;
        Ok(())
    }

    /// Pass `result` through, moving to `Failed` when it is an error
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() && !self.state.is_terminal() {
            if let Err(e) = self.advance(RequestState::Failed) {
                error!(error = %e, "Could not mark request as failed");
            }
        }
        result
    }
}

impl Default for RequestLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrates uploads and artifact retrieval
#[derive(Clone)]
pub struct RequestHandler {
    processor: BackgroundRemovalProcessor,
    store: Arc<dyn ArtifactStore>,
    max_upload_bytes: usize,
    error_mode: ErrorMode,
}

impl RequestHandler {
    #[must_use]
    pub fn new(
        processor: BackgroundRemovalProcessor,
        store: Arc<dyn ArtifactStore>,
        max_upload_bytes: usize,
        error_mode: ErrorMode,
    ) -> Self {
        Self {
            processor,
            store,
            max_upload_bytes,
            error_mode,
        }
    }

    #[must_use]
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    #[must_use]
    pub fn error_mode(&self) -> ErrorMode {
        self.error_mode
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Run one upload through the lifecycle and describe the result
    ///
    /// `upload` is what the transport layer managed to read: `Ok(None)` when
    /// the request carried no `image` field, or an error raised while reading.
    pub async fn handle_upload(&self, upload: Result<Option<UploadedImage>>) -> RequestOutcome {
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let span = spans::request(&request_id);

        async move {
            match self.run(upload).await {
                Ok(token) => {
                    info!(token = %token, "✅ Image processed successfully");
                    RequestOutcome::Success { token }
                },
                Err(e) => {
                    if e.status_code().is_server_error() {
                        error!(error = %e, "❌ Upload failed");
                    } else {
                        warn!(error = %e, "Upload rejected");
                    }
                    RequestOutcome::from_error(&e, self.error_mode)
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, upload: Result<Option<UploadedImage>>) -> Result<ArtifactToken> {
        let mut lifecycle = RequestLifecycle::new();

        lifecycle.advance(RequestState::Validating)?;
        let image = lifecycle.check(self.validate(upload))?;

        lifecycle.advance(RequestState::Processing)?;
        info!("🔄 Processing image...");
        let output = lifecycle.check(self.processor.process(image.bytes).await)?;

        lifecycle.advance(RequestState::Persisting)?;
        let token = lifecycle.check(self.store.put(output).await)?;

        lifecycle.advance(RequestState::Done)?;
        Ok(token)
    }

    fn validate(&self, upload: Result<Option<UploadedImage>>) -> Result<UploadedImage> {
        let image = upload?.ok_or(ServerError::NoFileSelected)?;
        let span = Span::current();
        span.record("filename", image.filename.as_str());
        span.record("size_bytes", image.bytes.len() as u64);

        if image.filename.is_empty() {
            return Err(ServerError::NoFileSelected);
        }
        if image.bytes.len() > self.max_upload_bytes {
            return Err(ServerError::file_too_large(self.max_upload_bytes));
        }
        Ok(image)
    }

    /// Look up the artifact named by a raw path segment
    ///
    /// # Errors
    /// - `ServerError::NotFound` for malformed or unknown tokens
    /// - `ServerError::Storage` when the artifact cannot be read
    pub async fn fetch_artifact(&self, raw_token: &str) -> Result<(ArtifactToken, Vec<u8>)> {
        let token: ArtifactToken = raw_token.parse()?;
        let bytes = self
            .store
            .get(&token)
            .instrument(spans::artifact("fetch", raw_token))
            .await?
            .ok_or_else(|| ServerError::not_found(raw_token))?;
        Ok((token, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::BackgroundRemover;
    use crate::store::MemoryArtifactStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    impl BackgroundRemover for Counting {
        fn remove_background(&self, _input: &[u8]) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ServerError::processing("cannot identify image file"));
            }
            crate::services::OutputFormatHandler::encode_rgba(image::RgbaImage::new(1, 1))
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn handler(remover: Arc<Counting>, limit: usize) -> (RequestHandler, Arc<MemoryArtifactStore>) {
        let store = Arc::new(MemoryArtifactStore::new());
        let handler = RequestHandler::new(
            BackgroundRemovalProcessor::new(remover),
            store.clone(),
            limit,
            ErrorMode::Verbose,
        );
        (handler, store)
    }

    fn upload(filename: &str, bytes: Vec<u8>) -> Result<Option<UploadedImage>> {
        Ok(Some(UploadedImage {
            filename: filename.to_string(),
            content_type: Some("image/png".to_string()),
            bytes,
        }))
    }

    #[test]
    fn test_legal_transitions() {
        let mut lifecycle = RequestLifecycle::new();
        for next in [
            RequestState::Validating,
            RequestState::Processing,
            RequestState::Persisting,
            RequestState::Done,
        ] {
            lifecycle.advance(next).unwrap();
        }
        assert_eq!(lifecycle.state(), RequestState::Done);
    }

    #[test]
    fn test_illegal_transitions_are_internal_errors() {
        let mut lifecycle = RequestLifecycle::new();
        let err = lifecycle.advance(RequestState::Processing).unwrap_err();
        assert!(matches!(err, ServerError::Internal(_)));
        assert_eq!(lifecycle.state(), RequestState::Idle);

        assert!(lifecycle.advance(RequestState::Failed).is_err());

        lifecycle.advance(RequestState::Validating).unwrap();
        lifecycle.advance(RequestState::Failed).unwrap();
        assert!(lifecycle.advance(RequestState::Processing).is_err());
        assert!(lifecycle.advance(RequestState::Failed).is_err());
    }

    #[tokio::test]
    async fn test_missing_file_never_reaches_adapter() {
        let remover = Arc::new(Counting::default());
        let (handler, store) = handler(remover.clone(), 1024);

        let outcome = handler.handle_upload(Ok(None)).await;
        assert_eq!(
            outcome,
            RequestOutcome::Error {
                message: "No file selected".to_string(),
                status: StatusCode::BAD_REQUEST,
            }
        );

        let outcome = handler.handle_upload(upload("", PNG_MAGIC.to_vec())).await;
        assert_eq!(outcome.status(), StatusCode::BAD_REQUEST);
        assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ceiling_is_inclusive() {
        let remover = Arc::new(Counting::default());
        let (handler, _store) = handler(remover.clone(), 8);

        let outcome = handler.handle_upload(upload("a.png", vec![0; 9])).await;
        assert_eq!(
            outcome,
            RequestOutcome::Error {
                message: "File too large. Maximum size is 1KB".to_string(),
                status: StatusCode::PAYLOAD_TOO_LARGE,
            }
        );
        assert_eq!(remover.calls.load(Ordering::SeqCst), 0);

        let outcome = handler.handle_upload(upload("a.png", vec![0; 8])).await;
        assert!(matches!(outcome, RequestOutcome::Success { .. }));
        assert_eq!(remover.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_reported() {
        let remover = Arc::new(Counting::default());
        let (handler, _store) = handler(remover.clone(), 1024);

        let outcome = handler
            .handle_upload(Err(ServerError::file_too_large(16 * 1024 * 1024)))
            .await;
        assert_eq!(outcome.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_adapter_failure_stores_nothing() {
        let remover = Arc::new(Counting {
            fail: true,
            ..Counting::default()
        });
        let (handler, store) = handler(remover.clone(), 1024);

        let outcome = handler.handle_upload(upload("a.png", PNG_MAGIC.to_vec())).await;
        assert_eq!(
            outcome,
            RequestOutcome::Error {
                message: "Error processing image: cannot identify image file".to_string(),
                status: StatusCode::UNPROCESSABLE_ENTITY,
            }
        );
        assert_eq!(remover.calls.load(Ordering::SeqCst), 1);
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_success_then_fetch() {
        let remover = Arc::new(Counting::default());
        let (handler, _store) = handler(remover, 1024);

        let RequestOutcome::Success { token } =
            handler.handle_upload(upload("a.png", PNG_MAGIC.to_vec())).await
        else {
            panic!("expected success");
        };

        let (fetched, bytes) = handler.fetch_artifact(&token.to_string()).await.unwrap();
        assert_eq!(fetched, token);
        assert!(bytes.starts_with(PNG_MAGIC));
    }

    #[tokio::test]
    async fn test_fetch_unknown_and_malformed_tokens() {
        let (handler, _store) = handler(Arc::new(Counting::default()), 1024);

        let unknown = ArtifactToken::generate().to_string();
        assert!(matches!(
            handler.fetch_artifact(&unknown).await,
            Err(ServerError::NotFound(_))
        ));
        assert!(matches!(
            handler.fetch_artifact("../etc/passwd").await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_storage_failure_after_teardown() {
        let (handler, store) = handler(Arc::new(Counting::default()), 1024);
        store.teardown().await;

        let outcome = handler.handle_upload(upload("a.png", PNG_MAGIC.to_vec())).await;
        assert_eq!(outcome.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(
            outcome,
            RequestOutcome::Error { ref message, .. } if message.starts_with("Error saving processed image")
        ));
    }
}
