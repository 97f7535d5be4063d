//! Conversion of command-line arguments into library configuration

use crate::cli::main_impl::{Cli, CliLogFormat};
use crate::{
    config::StudioConfig,
    models::{ModelSpec, DEFAULT_MODEL_NAME},
    tracing_config::{TracingConfig, TracingFormat},
    utils::ProviderSelection,
    web::ServerConfig,
};
use anyhow::{Context, Result};
use std::path::PathBuf;

const BYTES_PER_MIB: usize = 1024 * 1024;

/// Builds studio, server and tracing configuration from [`Cli`]
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    pub(crate) fn model_spec(cli: &Cli) -> ModelSpec {
        let name = cli.model.as_deref().unwrap_or(DEFAULT_MODEL_NAME);
        ModelSpec::new(name).with_variant(cli.variant.clone())
    }

    pub(crate) fn cache_dir(cli: &Cli) -> Option<PathBuf> {
        cli.cache_dir.as_ref().map(PathBuf::from)
    }

    /// Pipeline configuration
    pub(crate) fn studio_config(cli: &Cli) -> Result<StudioConfig> {
        let selection = ProviderSelection::parse(&cli.execution_provider)
            .context("Invalid execution provider format")?;

        StudioConfig::builder()
            .model_spec(Self::model_spec(cli))
            .backend_type(selection.backend_type)
            .execution_provider(selection.execution_provider)
            .num_threads(cli.threads)
            .jpeg_quality(cli.jpeg_quality)
            .auto_download(!cli.no_download)
            .cache_dir(Self::cache_dir(cli))
            .build()
            .context("Invalid configuration")
    }

    pub(crate) fn server_config(cli: &Cli) -> ServerConfig {
        ServerConfig {
            host: cli.host.clone(),
            port: cli.port,
            max_upload_bytes: cli.max_upload_mb.saturating_mul(BYTES_PER_MIB),
            preload: cli.preload,
        }
    }

    pub(crate) fn tracing_config(cli: &Cli) -> TracingConfig {
        let format = match cli.log_format {
            CliLogFormat::Console => TracingFormat::Console,
            CliLogFormat::Compact => TracingFormat::Compact,
            CliLogFormat::Json => TracingFormat::Json,
        };
        TracingConfig::new()
            .with_verbosity(cli.verbose)
            .with_format(format)
            .with_env_filter_from_env()
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        ProviderSelection::parse(&cli.execution_provider)
            .context("Invalid execution provider format")?;

        if cli.jpeg_quality == 0 || cli.jpeg_quality > 100 {
            anyhow::bail!("JPEG quality must be between 1 and 100, got {}", cli.jpeg_quality);
        }

        if cli.max_upload_mb == 0 {
            anyhow::bail!("--max-upload-mb must be at least 1");
        }

        if cli.host.trim().is_empty() {
            anyhow::bail!("--host must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionProvider;
    use crate::inference::BackendType;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("iphoto-id").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_ok());

        let server = CliConfigBuilder::server_config(&cli);
        assert_eq!(server.bind_address(), "127.0.0.1:8501");
        assert_eq!(server.max_upload_bytes, 20 * 1024 * 1024);
        assert!(!server.preload);

        let studio = CliConfigBuilder::studio_config(&cli).unwrap();
        assert_eq!(studio.model_spec.name, DEFAULT_MODEL_NAME);
        assert_eq!(studio.backend_type, BackendType::Onnx);
        assert_eq!(studio.execution_provider, ExecutionProvider::Auto);
        assert_eq!(studio.jpeg_quality, 100);
        assert!(studio.auto_download);
        assert!(studio.cache_dir.is_none());
    }

    #[test]
    fn test_custom_arguments() {
        let cli = parse(&[
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--max-upload-mb",
            "5",
            "--preload",
            "-e",
            "tract",
            "--model",
            "/models/isnet",
            "--variant",
            "fp16",
            "--threads",
            "4",
            "--no-download",
            "--cache-dir",
            "/tmp/iphoto-cache",
            "-vv",
            "--log-format",
            "compact",
        ]);

        let server = CliConfigBuilder::server_config(&cli);
        assert_eq!(server.bind_address(), "0.0.0.0:9000");
        assert_eq!(server.max_upload_bytes, 5 * 1024 * 1024);
        assert!(server.preload);

        let studio = CliConfigBuilder::studio_config(&cli).unwrap();
        assert_eq!(studio.backend_type, BackendType::Tract);
        assert_eq!(studio.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(studio.model_spec.session_key(), "/models/isnet@fp16");
        assert_eq!(studio.intra_threads, 4);
        assert!(!studio.auto_download);
        assert_eq!(studio.cache_dir, Some(PathBuf::from("/tmp/iphoto-cache")));

        let tracing = CliConfigBuilder::tracing_config(&cli);
        assert_eq!(tracing.verbosity, 2);
        assert_eq!(tracing.format, TracingFormat::Compact);
    }

    #[test]
    fn test_validation_failures() {
        let mut cli = parse(&[]);
        cli.execution_provider = "invalid:provider".to_string();
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());

        let mut cli = parse(&[]);
        cli.jpeg_quality = 0;
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());

        let cli = parse(&["--max-upload-mb", "0"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());
    }
}
