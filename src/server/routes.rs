//! Route table and request extraction

use super::AppState;
use crate::error::{Result, ServerError};
use crate::handler::{RequestOutcome, UploadedImage};
use crate::services::OutputFormatHandler;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{debug, warn};

/// Allowance for multipart boundaries and part headers on top of the upload ceiling
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Bodies up to this multiple of the ceiling are drained so an oversized
/// upload still gets the rendered page
pub const OVERSIZE_DRAIN_FACTOR: usize = 4;

/// Form field carrying the image
const UPLOAD_FIELD: &str = "image";

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let body_limit = state
        .max_upload_bytes()
        .saturating_mul(OVERSIZE_DRAIN_FACTOR)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/", get(index).post(upload))
        .route("/result/:token", get(show_result))
        .route("/download/:token", get(download_result))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(state.renderer.render(&RequestOutcome::Idle))
}

async fn upload(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Response {
    let upload = match multipart {
        Ok(multipart) => read_upload(multipart, state.max_upload_bytes()).await,
        Err(rejection) => {
            debug!(%rejection, "Upload without a multipart body");
            Ok(None)
        },
    };

    let outcome = state.handler.handle_upload(upload).await;
    (outcome.status(), Html(state.renderer.render(&outcome))).into_response()
}

/// Read the `image` field, keeping at most `limit + 1` bytes
///
/// Bytes past the ceiling and every other field are read and discarded so
/// the client sees the rendered page rather than a reset connection.
///
/// # Errors
/// - `ServerError::FileTooLarge` when the framework body limit trips
/// - `ServerError::NoFileSelected` for a malformed multipart body
pub async fn read_upload(mut multipart: Multipart, limit: usize) -> Result<Option<UploadedImage>> {
    let mut upload = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&e, limit))?
    {
        if upload.is_some() || field.name() != Some(UPLOAD_FIELD) {
            while field
                .chunk()
                .await
                .map_err(|e| multipart_error(&e, limit))?
                .is_some()
            {}
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let mut bytes = Vec::new();
        let mut discarded = 0_usize;

        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(&e, limit))? {
            let room = limit.saturating_add(1).saturating_sub(bytes.len());
            let take = room.min(chunk.len());
            bytes.extend_from_slice(chunk.get(..take).unwrap_or_default());
            discarded = discarded.saturating_add(chunk.len() - take);
        }
        if discarded > 0 {
            debug!(kept = bytes.len(), discarded, "Drained oversized upload");
        }

        upload = Some(UploadedImage {
            filename,
            content_type,
            bytes,
        });
    }
    Ok(upload)
}

fn multipart_error(error: &MultipartError, limit: usize) -> ServerError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::file_too_large(limit)
    } else {
        warn!(error = %error, "Malformed multipart upload");
        ServerError::NoFileSelected
    }
}

async fn show_result(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    serve_artifact(&state, &token, false).await
}

async fn download_result(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    serve_artifact(&state, &token, true).await
}

async fn serve_artifact(state: &AppState, raw_token: &str, attachment: bool) -> Response {
    let (token, bytes) = match state.handler.fetch_artifact(raw_token).await {
        Ok(found) => found,
        Err(e) => {
            if matches!(e, ServerError::NotFound(_)) {
                debug!(token = %raw_token, "Artifact not found");
            } else {
                warn!(token = %raw_token, error = %e, "Artifact retrieval failed");
            }
            return (e.status_code(), e.user_message(state.handler.error_mode())).into_response();
        },
    };

    let length = bytes.len();
    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(OutputFormatHandler::MIME_TYPE),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    if attachment {
        let disposition = format!("attachment; filename=\"{}\"", token.download_name());
        match HeaderValue::from_str(&disposition) {
            Ok(value) => {
                headers.insert(header::CONTENT_DISPOSITION, value);
            },
            Err(e) => warn!(error = %e, "Invalid Content-Disposition header"),
        }
    }
    response
}
