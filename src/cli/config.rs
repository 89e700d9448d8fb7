//! Conversion of CLI arguments into a server configuration

use super::main_impl::{Cli, CliBackend, CliErrorMode, CliExecutionProvider, CliStorage};
use crate::{
    config::{ErrorMode, ExecutionProvider, ServerConfig, ServerConfigBuilder, StorageBackend},
    processor::BackendType,
};
use anyhow::{Context, Result};

const BYTES_PER_MB: usize = 1024 * 1024;

/// Convert CLI arguments to a [`ServerConfig`]
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the configuration, starting from `--config` when given
    pub(crate) fn from_cli(cli: &Cli) -> Result<ServerConfig> {
        let base = match &cli.config {
            Some(path) => ServerConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => ServerConfig::default(),
        };
        let mut builder = ServerConfigBuilder::from_config(base);

        if let Some(host) = cli.host {
            builder = builder.host(host);
        }
        if let Some(port) = cli.port {
            builder = builder.port(port);
        }
        if let Some(mb) = cli.max_upload_mb {
            let bytes = mb
                .checked_mul(BYTES_PER_MB)
                .context("--max-upload-mb is too large")?;
            builder = builder.max_upload_bytes(bytes);
        }
        if let Some(mode) = cli.error_mode {
            builder = builder.error_mode(match mode {
                CliErrorMode::Verbose => ErrorMode::Verbose,
                CliErrorMode::Sanitized => ErrorMode::Sanitized,
            });
        }
        if let Some(storage) = cli.storage {
            builder = builder.storage(match storage {
                CliStorage::Disk => StorageBackend::Disk,
                CliStorage::Memory => StorageBackend::Memory,
            });
        }
        if let Some(dir) = &cli.temp_dir {
            builder = builder.temp_root(dir.clone());
        }
        if let Some(backend) = cli.backend {
            builder = builder.backend(match backend {
                CliBackend::Onnx => BackendType::Onnx,
                CliBackend::Command => BackendType::Command,
                CliBackend::Mock => BackendType::Mock,
            });
        }
        if let Some(path) = &cli.model {
            builder = builder.model_path(path.clone());
        }
        if let Some(url) = &cli.model_url {
            builder = builder.model_url(url.clone());
        }
        if let Some(digest) = &cli.model_sha256 {
            builder = builder.model_sha256(digest.clone());
        }
        if let Some(dir) = &cli.cache_dir {
            builder = builder.cache_dir(dir.clone());
        }
        if let Some(provider) = cli.execution_provider {
            builder = builder.execution_provider(match provider {
                CliExecutionProvider::Auto => ExecutionProvider::Auto,
                CliExecutionProvider::Cpu => ExecutionProvider::Cpu,
                CliExecutionProvider::Cuda => ExecutionProvider::Cuda,
                CliExecutionProvider::CoreMl => ExecutionProvider::CoreMl,
            });
        }
        if let Some(threads) = cli.threads {
            builder = builder.intra_threads(threads);
        }
        if let Some(program) = &cli.command {
            let mut command = vec![program.clone()];
            command.extend(cli.command_args.iter().cloned());
            builder = builder.command(command);
        } else if !cli.command_args.is_empty() {
            anyhow::bail!("--command-arg requires --command");
        }
        if let Some(secs) = cli.command_timeout {
            builder = builder.command_timeout_secs(secs);
        }

        builder.build().context("Invalid configuration")
    }
}
