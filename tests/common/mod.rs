//! Shared fixtures for the integration tests

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, Response};
use bgremove_web::backends::MockBackend;
use bgremove_web::{
    AppState, ArtifactStore, BackgroundRemovalProcessor, BackgroundRemover, Result, ServerConfig,
    ServerError,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const BOUNDARY: &str = "----bgremove-web-test-boundary";
pub const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Adapter that counts invocations and either keys out the background or fails
pub struct CountingRemover {
    calls: AtomicUsize,
    failure: Option<String>,
    inner: MockBackend,
}

impl CountingRemover {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failure: None,
            inner: MockBackend::new(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BackgroundRemover for CountingRemover {
    fn remove_background(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(ServerError::processing(message.clone())),
            None => self.inner.remove_background(input),
        }
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Adapter returning its input re-encoded as BMP
pub struct BmpRemover;

impl BackgroundRemover for BmpRemover {
    fn remove_background(&self, input: &[u8]) -> Result<Vec<u8>> {
        let image = image::load_from_memory(input)
            .map_err(|e| ServerError::processing(e.to_string()))?;
        encode(&image, ImageFormat::Bmp)
            .map_err(|e| ServerError::processing(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "bmp"
    }
}

fn encode(image: &DynamicImage, format: ImageFormat) -> image::ImageResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format)?;
    Ok(buffer.into_inner())
}

/// A white image with a dark square in the middle, encoded as JPEG
pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        let inside = x > width / 4 && x < width * 3 / 4 && y > height / 4 && y < height * 3 / 4;
        if inside {
            Rgb([20, 40, 160])
        } else {
            Rgb([255, 255, 255])
        }
    });
    encode(&DynamicImage::ImageRgb8(image), ImageFormat::Jpeg).unwrap()
}

/// One multipart part
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub bytes: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn image(filename: &'a str, bytes: &'a [u8]) -> Self {
        Self {
            name: "image",
            filename: Some(filename),
            content_type: Some("image/jpeg"),
            bytes,
        }
    }

    pub fn text(name: &'a str, value: &'a [u8]) -> Self {
        Self {
            name,
            filename: None,
            content_type: None,
            bytes: value,
        }
    }
}

/// Encode `parts` as a `multipart/form-data` body
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = part.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

/// `POST /` with the given parts
pub fn upload_request(parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, multipart_content_type())
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

/// Pull the artifact token out of a rendered success page
pub fn token_from_page(page: &str) -> Option<String> {
    let start = page.find("/download/")? + "/download/".len();
    page.get(start..start + 36).map(str::to_string)
}

/// Application state around `remover` and `store`
pub fn app_state(
    remover: Arc<dyn BackgroundRemover>,
    store: Arc<dyn ArtifactStore>,
    config: &ServerConfig,
) -> AppState {
    AppState::new(BackgroundRemovalProcessor::new(remover), store, config)
}
