#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # iPhoto ID
//!
//! ID photo generation: upload a portrait, remove its background with a
//! segmentation model, and place the subject onto a standard ID photo canvas
//! with a blue, red, white or transparent background.
//!
//! The pipeline has three linear steps:
//!
//! 1. **Model provider**: the segmentation model is downloaded into an
//!    on-disk cache on first use and its session is kept in a process-wide
//!    [`SessionCache`]
//! 2. **Background remover**: decode, letterbox to the model input, infer,
//!    and apply the predicted mask as alpha ([`BackgroundRemover`])
//! 3. **Compositor**: cover-fit, center-aligned placement onto the preset
//!    canvas and PNG/JPEG encoding ([`Compositor`])
//!
//! [`IdPhotoStudio`] runs the steps for one request and reports progress.
//! With the `server` feature (default) the crate also ships the `iphoto-id`
//! web server.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use iphoto_id::{generate_id_photo, Background, SizePreset, StudioConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let portrait = std::fs::read("portrait.jpg")?;
//! let config = StudioConfig::default();
//!
//! let photo = generate_id_photo(portrait, SizePreset::OneInch, Background::Blue, &config).await?;
//! std::fs::write(photo.file_name(), &photo.bytes)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Composition Only
//!
//! ```rust
//! use iphoto_id::{Background, Compositor, SizePreset};
//! use image::{Rgba, RgbaImage};
//!
//! # fn main() -> iphoto_id::Result<()> {
//! let foreground = RgbaImage::from_pixel(1000, 2000, Rgba([200, 150, 120, 255]));
//! let photo = Compositor::default().compose_preset(&foreground, SizePreset::OneInch, Background::White)?;
//! assert_eq!((photo.width(), photo.height()), (295, 413));
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend
//! - `tract`: pure Rust backend
//! - `cuda`, `coreml`: hardware accelerated ONNX Runtime builds
//! - `server` (default): axum web front end and the `iphoto-id` binary
//! - `tracing-json`: JSON log output

pub mod backends;
pub mod cache;
#[cfg(feature = "server")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod remover;
pub mod services;
pub mod session_cache;
pub mod studio;
#[cfg(feature = "server")]
pub mod tracing_config;
pub mod types;
pub mod utils;
#[cfg(feature = "server")]
pub mod web;

use std::sync::Arc;

pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use compositor::{Compositor, CoverLayout};
pub use config::{Background, ExecutionProvider, OutputFormat, SizePreset, StudioConfig};
pub use download::ModelDownloader;
pub use error::{IdPhotoError, Result};
pub use inference::{BackendFactory, BackendType, DefaultBackendFactory, InferenceBackend};
pub use models::{ModelManager, ModelSource, ModelSpec};
pub use remover::{BackgroundRemover, RemovalOutcome};
pub use services::{
    ImageCodec, NoOpProgressReporter, ProcessingStage, ProgressReporter, ProgressTracker,
    ProgressUpdate, TracingProgressReporter,
};
pub use session_cache::{SessionCache, SessionCacheStats};
pub use studio::{GeneratedPhoto, IdPhotoStudio, PhotoRequest, RequestState};
pub use types::{ProcessingTimings, SegmentationMask};
pub use utils::{ProviderInfo, ProviderSelection};

#[cfg(feature = "server")]
pub use tracing_config::{TracingConfig, TracingFormat};
#[cfg(feature = "server")]
pub use web::{AppState, ServerConfig};

/// Generate one ID photo from encoded image bytes
///
/// Uses the process-wide session cache, so repeated calls with the same model
/// load it only once.
///
/// # Errors
/// - Invalid configuration
/// - Model download or loading failures
/// - Undecodable input, inference or composition failures
pub async fn generate_id_photo(
    image_bytes: impl Into<Arc<[u8]>>,
    preset: SizePreset,
    background: Background,
    config: &StudioConfig,
) -> Result<GeneratedPhoto> {
    let studio = IdPhotoStudio::new(config.clone())?;
    let mut tracker = ProgressTracker::no_op();
    studio
        .generate(image_bytes.into(), preset, background, &mut tracker)
        .await
}

/// Remove the background of encoded image bytes, returning RGBA PNG bytes of
/// the same pixel dimensions
///
/// # Errors
/// - Invalid configuration
/// - Model download or loading failures
/// - Undecodable input or inference failures
pub async fn remove_background_from_bytes(
    image_bytes: impl Into<Arc<[u8]>>,
    config: &StudioConfig,
) -> Result<Vec<u8>> {
    let studio = IdPhotoStudio::new(config.clone())?;
    studio.remove_background(image_bytes.into()).await
}
