//! Tracing configuration for structured logging
//!
//! The binary installs the subscriber; the library only emits spans and
//! events. `log` records from the backends are bridged into the same
//! subscriber.

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors and emojis (default)
    Console,
    /// Compact console output without colors
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Configuration for tracing output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    /// Output to stdout (default)
    Console,
    /// Output to both console and a daily rolling file
    #[cfg(feature = "tracing-files")]
    Both(std::path::PathBuf),
}

/// Keeps background log writers alive; drop it only at process exit
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file_writer: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    /// Output format
    pub format: TracingFormat,
    /// Output destination
    pub output: TracingOutput,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    /// Create a new tracing configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set output format
    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set output destination
    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    /// Set custom environment filter
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - invalid filter directives
    /// - a global subscriber is already installed
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(directives) => EnvFilter::try_new(directives)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };
        let registry = Registry::default().with(filter);

        match (self.format, &self.output) {
            (TracingFormat::Console, TracingOutput::Console) => {
                registry
                    .with(fmt::layer().with_ansi(true).with_target(false).compact())
                    .try_init()?;
            },
            (TracingFormat::Compact, TracingOutput::Console) => {
                registry
                    .with(fmt::layer().with_ansi(false).with_target(false).compact())
                    .try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            (TracingFormat::Json, TracingOutput::Console) => {
                registry
                    .with(
                        fmt::layer()
                            .json()
                            .with_current_span(true)
                            .with_span_list(true),
                    )
                    .try_init()?;
            },
            #[cfg(feature = "tracing-files")]
            (format, TracingOutput::Both(path)) => {
                use tracing_appender::{non_blocking, rolling};
                use tracing_subscriber::Layer;

                let file_appender = rolling::daily(
                    path.parent().unwrap_or_else(|| std::path::Path::new(".")),
                    path.file_name()
                        .unwrap_or_else(|| std::ffi::OsStr::new("bgremove-web.log")),
                );
                let (file_writer, guard) = non_blocking(file_appender);
                let file_layer = fmt::layer()
                    .with_ansi(false)
                    .with_writer(file_writer)
                    .compact();

                let console_layer = match format {
                    TracingFormat::Console => fmt::layer()
                        .with_ansi(true)
                        .with_target(false)
                        .compact()
                        .boxed(),
                    TracingFormat::Compact => fmt::layer()
                        .with_ansi(false)
                        .with_target(false)
                        .compact()
                        .boxed(),
                    #[cfg(feature = "tracing-json")]
                    TracingFormat::Json => fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .boxed(),
                };

                registry.with(console_layer).with(file_layer).try_init()?;
                return Ok(TracingGuard {
                    _file_writer: Some(guard),
                });
            },
        }

        Ok(TracingGuard::default())
    }
}

/// Span creation helpers for the request lifecycle
pub mod spans {
    use tracing::{Level, Span};

    /// Span covering one upload from validation to outcome
    ///
    /// `filename` and `size_bytes` are recorded once the upload has been read.
    pub fn request(request_id: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "upload",
            request_id = %request_id,
            filename = tracing::field::Empty,
            size_bytes = tracing::field::Empty
        )
    }

    /// Span covering one adapter invocation
    pub fn inference(backend: &str, input_bytes: usize) -> Span {
        tracing::span!(
            Level::DEBUG,
            "inference",
            backend = %backend,
            input_bytes = input_bytes
        )
    }

    /// Span for a retrieval or store operation on an artifact
    pub fn artifact(operation: &str, token: &str) -> Span {
        tracing::span!(
            Level::DEBUG,
            "artifact",
            operation = %operation,
            token = %token
        )
    }

    /// Span for resolving and loading the ONNX model
    pub fn model_loading(source: &str, provider: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "model_loading",
            source = %source,
            provider = %provider
        )
    }
}

/// Event helpers for common logging patterns
pub mod events {
    use tracing::debug;

    /// Log a request state machine transition
    pub fn transition(from: &str, to: &str) {
        debug!(from = %from, to = %to, "Request state changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(TracingConfig::new().with_verbosity(0).verbosity_to_filter(), "info");
        assert_eq!(TracingConfig::new().with_verbosity(1).verbosity_to_filter(), "debug");
        assert_eq!(TracingConfig::new().with_verbosity(2).verbosity_to_filter(), "trace");
        assert_eq!(TracingConfig::new().with_verbosity(10).verbosity_to_filter(), "trace");
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::new()
            .with_verbosity(2)
            .with_format(TracingFormat::Compact)
            .with_env_filter("bgremove_web=debug,tower_http=warn");

        assert_eq!(config.verbosity, 2);
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(
            config.env_filter.as_deref(),
            Some("bgremove_web=debug,tower_http=warn")
        );
    }

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.format, TracingFormat::Console);
        assert_eq!(config.output, TracingOutput::Console);
        assert!(config.env_filter.is_none());
    }

    #[test]
    fn test_spans_without_subscriber() {
        let span = spans::request("req-1");
        span.record("filename", "cat.jpg");
        span.record("size_bytes", 1024_u64);
        let _entered = span.enter();
        events::transition("idle", "validating");
    }
}
