//! Background removal web server CLI
//!
//! Parses arguments, installs the tracing subscriber, builds the adapter and
//! serves the upload page until Ctrl+C or SIGTERM.

use super::config::CliConfigBuilder;
use crate::{
    config::ServerConfig,
    processor::{BackendFactory, DefaultBackendFactory},
    server::{await_shutdown_trigger, run_server, AppState},
    tracing_config::{TracingConfig, TracingFormat},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{debug, info};

/// Background removal web server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-web")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Address to listen on [default: 127.0.0.1]
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Port to listen on [default: 5000]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// JSON configuration file; flags given on the command line take precedence
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Upload ceiling in megabytes [default: 16]
    #[arg(long, value_name = "MB")]
    pub max_upload_mb: Option<usize>,

    /// How adapter failures are shown to users [default: verbose]
    #[arg(long, value_enum)]
    pub error_mode: Option<CliErrorMode>,

    /// Where processed images are kept [default: disk]
    #[arg(long, value_enum)]
    pub storage: Option<CliStorage>,

    /// Parent directory for the artifact directory [default: system temp dir]
    #[arg(long, value_name = "PATH")]
    pub temp_dir: Option<PathBuf>,

    /// Background removal backend [default: onnx]
    #[arg(short, long, value_enum)]
    pub backend: Option<CliBackend>,

    /// Path to an ONNX model file
    #[arg(short, long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// URL the ONNX model is downloaded from when not cached
    #[arg(long, value_name = "URL")]
    pub model_url: Option<String>,

    /// Expected SHA-256 of the downloaded model
    #[arg(long, value_name = "HEX")]
    pub model_sha256: Option<String>,

    /// Use custom model cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// ONNX Runtime execution provider [default: auto]
    #[arg(short, long, value_enum)]
    pub execution_provider: Option<CliExecutionProvider>,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Program run by the command backend (image on stdin, PNG on stdout)
    #[arg(long, value_name = "PROGRAM")]
    pub command: Option<String>,

    /// Argument passed to the command backend program (repeatable)
    #[arg(long = "command-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub command_args: Vec<String>,

    /// Seconds before the command backend program is killed [default: 120]
    #[arg(long, value_name = "SECS")]
    pub command_timeout: Option<u64>,

    /// Show compiled-in backends and execution providers and exit
    #[arg(long)]
    pub show_backends: bool,

    /// Show the model cache directory and exit
    #[arg(long)]
    pub show_cache_dir: bool,

    /// Download the ONNX model into the cache and exit
    #[arg(long)]
    pub only_download: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Also write logs to a daily rolling file
    #[cfg(feature = "tracing-files")]
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliErrorMode {
    Verbose,
    Sanitized,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliStorage {
    Disk,
    Memory,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliBackend {
    Onnx,
    Command,
    Mock,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliExecutionProvider {
    Auto,
    Cpu,
    Cuda,
    #[value(name = "coreml")]
    CoreMl,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _tracing_guard = init_tracing(&cli).context("Failed to initialize tracing")?;

    if cli.show_backends {
        show_backends();
        return Ok(());
    }

    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    debug!(?config, "Configuration resolved");

    if cli.show_cache_dir {
        return show_cache_dir(&config);
    }

    if cli.only_download {
        return download_model_only(&config).await;
    }

    println!("🚀 Starting Background Remover...");
    info!(
        backend = %config.remover.backend,
        provider = %config.remover.execution_provider,
        max_upload_bytes = config.max_upload_bytes,
        "Starting background removal server"
    );

    let state = AppState::from_config(&config)
        .await
        .context("Failed to initialize background removal")?;
    let handle = run_server(state, config.bind_address)
        .await
        .context("Failed to start server")?;

    println!("📱 Open: {}", handle.base_url());
    println!("⏹️  Press Ctrl+C to stop");
    println!("{}", "-".repeat(50));

    let trigger = await_shutdown_trigger().await;
    info!(signal = trigger, "Shutdown requested");
    handle.shutdown().await;

    println!("\n👋 Server stopped!");
    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<crate::tracing_config::TracingGuard> {
    let format = match cli.log_format {
        CliLogFormat::Console => TracingFormat::Console,
        CliLogFormat::Compact => TracingFormat::Compact,
        #[cfg(feature = "tracing-json")]
        CliLogFormat::Json => TracingFormat::Json,
    };

    let mut config = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format);

    if let Ok(filter) = std::env::var("RUST_LOG") {
        config = config.with_env_filter(filter);
    }

    #[cfg(feature = "tracing-files")]
    if let Some(path) = &cli.log_file {
        config = config.with_output(crate::tracing_config::TracingOutput::Both(path.clone()));
    }

    config.init()
}

fn show_backends() {
    println!("🔍 Backend Diagnostics");
    println!("{}", "━".repeat(45));

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("💻 System: {cpu_count} CPU cores detected");

    println!("\n🔧 Available Backends:");
    for backend in DefaultBackendFactory.available_backends() {
        let description = match backend {
            crate::processor::BackendType::Onnx => {
                "ONNX Runtime matting model (default), GPU acceleration when available"
            },
            crate::processor::BackendType::Command => {
                "External program, image on stdin and PNG on stdout (e.g. rembg i - -)"
            },
            crate::processor::BackendType::Mock => {
                "Corner-colour keying, no model required (development only)"
            },
        };
        println!("  • {backend}: {description}");
    }

    #[cfg(feature = "onnx")]
    {
        println!("\n🚀 Execution Providers:");
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            let status = if available {
                "✅ Available"
            } else {
                "❌ Not Available"
            };
            println!("  • {name}: {status} - {description}");
        }
    }

    println!("\n💡 Usage Examples:");
    println!("  bgremove-web --backend onnx --execution-provider auto");
    println!("  bgremove-web --backend command --command rembg --command-arg i --command-arg - --command-arg -");
    println!("  bgremove-web --backend mock --storage memory");
}

fn show_cache_dir(config: &ServerConfig) -> Result<()> {
    let cache = crate::download::model_cache(&config.remover)
        .context("Failed to access cache directory")?;

    println!("📁 Current cache directory:");
    println!("   Path: {}", cache.cache_dir().display());

    if config.remover.cache_dir.is_some() {
        println!("   Source: --cache-dir");
    } else if std::env::var_os(crate::cache::CACHE_DIR_ENV).is_some() {
        println!("   Source: {} environment variable", crate::cache::CACHE_DIR_ENV);
    } else {
        println!("   Source: platform cache directory");
    }

    match cache.cached_model(&config.remover.model_url) {
        Some(path) => println!("   Model: {} (cached)", path.display()),
        None => println!("   Model: not downloaded yet"),
    }
    Ok(())
}

async fn download_model_only(config: &ServerConfig) -> Result<()> {
    use crate::download::{model_cache, validate_model_url, ModelDownloader};

    let remover = &config.remover;
    validate_model_url(&remover.model_url).context("Invalid model URL")?;
    println!("📦 Downloading model from: {}", remover.model_url);

    let downloader = ModelDownloader::with_cache(model_cache(remover)?)
        .context("Failed to create model downloader")?;
    let path = downloader
        .ensure_model(&remover.model_url, remover.model_sha256.as_deref())
        .await
        .context("Failed to download model")?;

    println!("✅ Model ready!");
    println!("   Cache location: {}", path.display());
    Ok(())
}
