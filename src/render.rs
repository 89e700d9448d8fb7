//! HTML rendering of the single upload page
//!
//! The page is one static template with four placeholders. Everything
//! substituted into it is HTML-escaped.

use crate::config::format_upload_limit;
use crate::handler::RequestOutcome;
use std::borrow::Cow;

const TEMPLATE: &str = include_str!("templates/index.html");

const MESSAGE_SLOT: &str = "{{MESSAGE}}";
const MAX_UPLOAD_SLOT: &str = "{{MAX_UPLOAD}}";
const RESULT_SLOT: &str = "{{RESULT}}";
const AUTO_RESET_SLOT: &str = "{{AUTO_RESET}}";

/// Banner shown above the form after a successful upload
pub const SUCCESS_MESSAGE: &str = "Background removed successfully!";

/// Kind of banner shown above the form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Success,
    Error,
}

impl MessageKind {
    /// CSS class used by the template
    #[must_use]
    pub fn css_class(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Renders the upload page for a request outcome
#[derive(Debug, Clone, Copy)]
pub struct PageRenderer {
    max_upload_bytes: usize,
}

impl PageRenderer {
    #[must_use]
    pub fn new(max_upload_bytes: usize) -> Self {
        Self { max_upload_bytes }
    }

    /// Ceiling shown in the upload hint
    #[must_use]
    pub fn max_upload_label(&self) -> String {
        format_upload_limit(self.max_upload_bytes)
    }

    /// Render the page for `outcome`
    #[must_use]
    pub fn render(&self, outcome: &RequestOutcome) -> String {
        let (message, result, auto_reset) = match outcome {
            RequestOutcome::Idle => (String::new(), String::new(), ""),
            RequestOutcome::Success { token } => (
                message_block(MessageKind::Success, SUCCESS_MESSAGE),
                result_block(&token.to_string()),
                "",
            ),
            RequestOutcome::Error { message, .. } => (
                message_block(MessageKind::Error, message),
                String::new(),
                "setTimeout(function() {\n            resetForm();\n        }, 100);",
            ),
        };

        // Client-influenced text goes in last so it is never rescanned for slots
        TEMPLATE
            .replace(MAX_UPLOAD_SLOT, &self.max_upload_label())
            .replace(RESULT_SLOT, &result)
            .replace(AUTO_RESET_SLOT, auto_reset)
            .replace(MESSAGE_SLOT, &message)
    }
}

/// Render the page for `outcome` with the given upload ceiling
#[must_use]
pub fn render_page(outcome: &RequestOutcome, max_upload_bytes: usize) -> String {
    PageRenderer::new(max_upload_bytes).render(outcome)
}

fn message_block(kind: MessageKind, text: &str) -> String {
    format!(
        "<div class=\"message {}\">\n            {}\n        </div>",
        kind.css_class(),
        escape(text)
    )
}

fn result_block(token: &str) -> String {
    let token = escape(token);
    format!(
        r#"<div class="result">
            <h2>✅ Background Removed Successfully!</h2>
            <img src="/result/{token}" alt="Processed Image">
            <br>
            <a href="/download/{token}" class="btn">💾 Download Image</a>
            <a href="/" class="btn">➕ Process Another Image</a>
        </div>"#
    )
}

/// Escape HTML special characters, borrowing when nothing needs escaping
#[must_use]
pub fn escape(s: &str) -> Cow<'_, str> {
    if !s.contains(['<', '>', '&', '"', '\'']) {
        return Cow::Borrowed(s);
    }

    let mut escaped = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ArtifactToken;
    use axum::http::StatusCode;

    const LIMIT: usize = 16 * 1024 * 1024;

    #[test]
    fn test_escape() {
        assert!(matches!(escape("plain text"), Cow::Borrowed(_)));
        assert_eq!(
            escape(r#"<img src="x" onerror='a&b'>"#),
            "&lt;img src=&quot;x&quot; onerror=&#39;a&amp;b&#39;&gt;"
        );
    }

    #[test]
    fn test_idle_page() {
        let page = PageRenderer::new(LIMIT).render(&RequestOutcome::Idle);
        assert!(page.contains("Drop your image here or click to browse"));
        assert!(page.contains("(Max: 16MB)"));
        assert!(page.contains(r#"name="image""#));
        assert!(page.contains("This usually takes 5-10 seconds"));
        assert!(!page.contains("class=\"message"));
        assert!(!page.contains("/download/"));
        assert!(!page.contains("{{"));
    }

    #[test]
    fn test_success_page_links_token() {
        let token = ArtifactToken::generate();
        let page = PageRenderer::new(LIMIT).render(&RequestOutcome::Success { token });

        assert!(page.contains(r#"<div class="message success">"#));
        assert!(page.contains(SUCCESS_MESSAGE));
        assert!(page.contains("Background Removed Successfully!"));
        assert!(page.contains(&format!(r#"src="/result/{token}""#)));
        assert!(page.contains(&format!(r#"href="/download/{token}""#)));
        assert!(!page.contains("resetForm();\n        }, 100"));
    }

    #[test]
    fn test_error_page_escapes_message() {
        let outcome = RequestOutcome::Error {
            message: "Error processing image: <script>alert(1)</script>".to_string(),
            status: StatusCode::UNPROCESSABLE_ENTITY,
        };
        let page = PageRenderer::new(LIMIT).render(&outcome);

        assert!(page.contains(r#"<div class="message error">"#));
        assert!(page.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(!page.contains("<script>alert(1)"));
        assert!(page.contains("resetForm();\n        }, 100"));
        assert!(!page.contains("/result/"));
    }

    #[test]
    fn test_limit_hint_follows_config() {
        let page = PageRenderer::new(4 * 1024 * 1024).render(&RequestOutcome::Idle);
        assert!(page.contains("(Max: 4MB)"));

        let page = PageRenderer::new(300 * 1024).render(&RequestOutcome::Idle);
        assert!(page.contains("(Max: 300KB)"));
    }

    #[test]
    fn test_render_page_matches_renderer() {
        let outcome = RequestOutcome::Error {
            message: "No file selected".to_string(),
            status: StatusCode::BAD_REQUEST,
        };
        let page = render_page(&outcome, LIMIT);
        assert_eq!(page, PageRenderer::new(LIMIT).render(&outcome));
        assert!(page.contains("No file selected"));
        assert!(page.contains("(Max: 16MB)"));
    }
}
