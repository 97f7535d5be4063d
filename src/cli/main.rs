//! iPhoto ID command line: runs the web server and manages the model cache

use super::config::CliConfigBuilder;
use crate::{
    cache::{format_size, ModelCache, CACHE_DIR_ENV},
    download::ModelDownloader,
    models::model_aliases,
    studio::IdPhotoStudio,
    utils::list_all_providers,
    web,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tracing::{debug, info};

/// ID photo generator served as a web form
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "iphoto-id")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Address to bind the web server to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8501)]
    pub port: u16,

    /// Largest accepted upload in MiB
    #[arg(long, default_value_t = 20)]
    pub max_upload_mb: usize,

    /// Load the segmentation model at startup instead of on the first request
    #[arg(long)]
    pub preload: bool,

    /// Model alias, HuggingFace URL, or path to a model folder [default: isnet-general-use]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Model variant (fp32, fp16) [default: picked per execution provider]
    #[arg(long)]
    pub variant: Option<String>,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:cpu, tract:cpu)
    #[arg(short, long, default_value = "onnx:auto")]
    pub execution_provider: String,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// JPEG quality for color backgrounds (1-100)
    #[arg(long, default_value_t = 100)]
    pub jpeg_quality: u8,

    /// Fail instead of downloading a missing model
    #[arg(long)]
    pub no_download: bool,

    /// Use custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<String>,

    /// Enable verbose logging (-v: debug for this crate, -vv: trace everything)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Download the model into the cache and exit
    #[arg(long)]
    pub only_download: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Clear cached models (combine with --model to clear one model) and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Show the model cache directory and exit
    #[arg(long)]
    pub show_cache_dir: bool,

    /// Show backend and execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    Json,
}

/// Main CLI entry point
pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    CliConfigBuilder::tracing_config(&cli)
        .init()
        .context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    if cli.show_cache_dir {
        return show_current_cache_dir(&cli);
    }

    if cli.list_models {
        return list_cached_models(&cli);
    }

    if cli.clear_cache {
        return clear_cache_models(&cli);
    }

    if cli.only_download {
        return download_model_only(&cli).await;
    }

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    run_server(&cli).await
}

async fn run_server(cli: &Cli) -> Result<()> {
    let studio_config =
        CliConfigBuilder::studio_config(cli).context("Failed to build configuration")?;
    let server_config = CliConfigBuilder::server_config(cli);

    info!(
        model = %studio_config.model_spec,
        backend = %studio_config.backend_type,
        provider = %studio_config.execution_provider,
        "Starting iPhoto ID"
    );
    debug!(?studio_config, ?server_config, "Resolved configuration");

    let studio = IdPhotoStudio::new(studio_config).context("Failed to create ID photo studio")?;
    web::serve(&server_config, Arc::new(studio))
        .await
        .context("Web server failed")
}

fn open_cache(cli: &Cli) -> Result<ModelCache> {
    let cache_dir = CliConfigBuilder::cache_dir(cli);
    ModelCache::open(cache_dir.as_deref()).context("Failed to open model cache")
}

/// Display execution provider diagnostics
fn show_provider_diagnostics() {
    println!("🔍 Backend and Execution Provider Diagnostics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1);
    println!("💻 System: {cpu_count} CPU cores detected");

    println!("\n🚀 Execution Providers:");
    for provider in list_all_providers() {
        let status = if provider.available {
            "✅ Available"
        } else {
            "❌ Not Available"
        };
        println!("  • {}: {} - {}", provider.name, status, provider.description);
    }

    println!("\n💡 Usage Examples:");
    println!("  --execution-provider onnx:auto    # Best ONNX provider (default)");
    println!("  --execution-provider onnx:cpu     # Force ONNX CPU execution");
    println!("  --execution-provider tract        # Pure Rust backend (needs the 'tract' feature)");
}

/// List cached models
fn list_cached_models(cli: &Cli) -> Result<()> {
    let cache = open_cache(cli)?;
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("📦 Cached Models in {}", cache.cache_dir().display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if models.is_empty() {
        println!("No cached models found.");
        println!("\n💡 The default model is downloaded on first use, or run:");
        println!("  iphoto-id --only-download");
        return Ok(());
    }

    for model in models {
        println!("📁 {}", model.model_id);
        println!("  └─ Location: {}", model.path.display());
        if !model.variants.is_empty() {
            println!("  └─ Variants: {}", model.variants.join(", "));
        }
        println!("  └─ Size: {}", format_size(model.size_bytes));
    }

    Ok(())
}

/// Download the configured model without starting the server
async fn download_model_only(cli: &Cli) -> Result<()> {
    let spec = CliConfigBuilder::model_spec(cli);
    let Some(url) = spec.download_url() else {
        anyhow::bail!(
            "'{}' is a local model folder, nothing to download. Use one of {:?} or a HuggingFace URL",
            spec.name,
            model_aliases()
        );
    };

    println!("📦 Downloading model from: {url}");
    let downloader = ModelDownloader::new(open_cache(cli)?)
        .context("Failed to create model downloader")?;
    let model_id = downloader
        .download_model(&url, true)
        .await
        .context("Failed to download model")?;

    println!("✅ Model ready: {model_id}");
    println!(
        "   Cache location: {}",
        downloader.cache().get_model_path(&model_id).display()
    );
    Ok(())
}

/// Clear cached models
fn clear_cache_models(cli: &Cli) -> Result<()> {
    let cache = open_cache(cli)?;

    if let Some(model) = &cli.model {
        let model_id = match CliConfigBuilder::model_spec(cli).download_url() {
            Some(url) => ModelCache::url_to_model_id(&url),
            None => model.clone(),
        };

        println!("🗑️  Clearing model: {model_id}");
        if cache
            .clear_specific_model(&model_id)
            .with_context(|| format!("Failed to clear model '{model_id}'"))?
        {
            println!("✅ Removed {model_id}");
        } else {
            println!("⚠️  Model '{model_id}' not found in cache. Use --list-models to see cached models");
        }
    } else {
        println!("🗑️  Clearing entire model cache...");
        let removed = cache.clear_all_models().context("Failed to clear cache")?;
        if removed.is_empty() {
            println!("💡 Cache was already empty");
        } else {
            println!("✅ Removed {} model(s):", removed.len());
            for model_id in &removed {
                println!("   • {model_id}");
            }
        }
    }

    println!("   Cache location: {}", cache.cache_dir().display());
    Ok(())
}

/// Show the cache directory and where it was configured
fn show_current_cache_dir(cli: &Cli) -> Result<()> {
    let cache = open_cache(cli)?;

    println!("📁 Current cache directory:");
    println!("   Path: {}", cache.cache_dir().display());

    let source = if cli.cache_dir.is_some() {
        "--cache-dir argument".to_string()
    } else if std::env::var(CACHE_DIR_ENV).is_ok() {
        format!("{CACHE_DIR_ENV} environment variable")
    } else {
        "platform cache directory".to_string()
    };
    println!("   Source: {source}");

    println!("\n💡 To use a custom cache directory:");
    println!("   iphoto-id --cache-dir /path/to/cache");
    println!("   or set {CACHE_DIR_ENV}");
    Ok(())
}
