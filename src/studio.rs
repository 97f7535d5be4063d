//! ID photo generation pipeline
//!
//! [`IdPhotoStudio`] runs one request through three linear steps: acquire
//! the segmentation session, remove the background, compose onto the preset
//! canvas. [`PhotoRequest`] tracks a request through
//! `Idle → Ready → Processing → Done | Failed`.

use crate::{
    cache::ModelCache,
    compositor::Compositor,
    config::{Background, OutputFormat, SizePreset, StudioConfig},
    download::ModelDownloader,
    error::{IdPhotoError, Result},
    inference::{BackendFactory, DefaultBackendFactory, InferenceBackend},
    models::{ModelManager, ModelSource},
    remover::BackgroundRemover,
    services::{ImageCodec, ProcessingStage, ProgressReporter, ProgressTracker},
    session_cache::{lock_session, AcquiredSession, SessionCache, SharedSession},
    types::ProcessingTimings,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// Lifecycle of one generation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// No photo uploaded yet
    Idle,
    /// Photo uploaded, waiting for generate
    Ready,
    Processing,
    Done,
    Failed,
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A finished ID photo
#[derive(Debug, Clone)]
pub struct GeneratedPhoto {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub preset: SizePreset,
    pub background: Background,
    /// (width, height), always the preset's dimensions
    pub dimensions: (u32, u32),
    pub timings: ProcessingTimings,
}

impl GeneratedPhoto {
    /// Download name, `id_photo_<preset>.<ext>`
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("id_photo_{}.{}", self.preset.key(), self.format.extension())
    }

    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// User-side state of one ID photo request
#[derive(Debug, Clone)]
pub struct PhotoRequest {
    state: RequestState,
    upload: Option<Arc<[u8]>>,
    preset: SizePreset,
    background: Background,
    result: Option<GeneratedPhoto>,
    error: Option<String>,
}

impl Default for PhotoRequest {
    fn default() -> Self {
        Self::new(SizePreset::default(), Background::default())
    }
}

impl PhotoRequest {
    #[must_use]
    pub fn new(preset: SizePreset, background: Background) -> Self {
        Self {
            state: RequestState::Idle,
            upload: None,
            preset,
            background,
            result: None,
            error: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> RequestState {
        self.state
    }

    #[must_use]
    pub fn preset(&self) -> SizePreset {
        self.preset
    }

    #[must_use]
    pub fn background(&self) -> Background {
        self.background
    }

    #[must_use]
    pub fn result(&self) -> Option<&GeneratedPhoto> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn upload_bytes(&self) -> Option<&[u8]> {
        self.upload.as_deref()
    }

    /// Attach a photo; any earlier result or error is discarded
    ///
    /// # Errors
    /// - Empty upload
    /// - A generation is in progress
    pub fn upload(&mut self, bytes: impl Into<Arc<[u8]>>) -> Result<()> {
        self.ensure_not_processing("upload")?;
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(IdPhotoError::invalid_config("Uploaded file is empty"));
        }

        self.upload = Some(bytes);
        self.result = None;
        self.error = None;
        self.state = RequestState::Ready;
        Ok(())
    }

    /// # Errors
    /// - A generation is in progress
    pub fn set_options(&mut self, preset: SizePreset, background: Background) -> Result<()> {
        self.ensure_not_processing("change options")?;
        self.preset = preset;
        self.background = background;
        Ok(())
    }

    /// Enter `Processing`, returning the uploaded bytes
    ///
    /// Allowed from `Ready`, and from `Done`/`Failed` as a manual retry.
    ///
    /// # Errors
    /// - No photo uploaded
    /// - Already processing
    pub fn begin(&mut self) -> Result<Arc<[u8]>> {
        match (self.state, &self.upload) {
            (RequestState::Processing, _) => Err(self.invalid_transition("generate")),
            (RequestState::Idle, _) | (_, None) => Err(IdPhotoError::invalid_config(
                "No photo uploaded. Upload a portrait before generating",
            )),
            (_, Some(upload)) => {
                let upload = Arc::clone(upload);
                self.state = RequestState::Processing;
                self.result = None;
                self.error = None;
                Ok(upload)
            },
        }
    }

    /// # Errors
    /// - Not processing
    pub fn complete(&mut self, photo: GeneratedPhoto) -> Result<()> {
        if self.state != RequestState::Processing {
            return Err(self.invalid_transition("complete"));
        }
        self.result = Some(photo);
        self.state = RequestState::Done;
        Ok(())
    }

    /// # Errors
    /// - Not processing
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        if self.state != RequestState::Processing {
            return Err(self.invalid_transition("fail"));
        }
        self.error = Some(message.into());
        self.state = RequestState::Failed;
        Ok(())
    }

    fn ensure_not_processing(&self, action: &str) -> Result<()> {
        if self.state == RequestState::Processing {
            return Err(self.invalid_transition(action));
        }
        Ok(())
    }

    fn invalid_transition(&self, action: &str) -> IdPhotoError {
        IdPhotoError::internal(format!("Cannot {action} while request is {}", self.state))
    }
}

/// Orchestrates model loading, background removal and composition
pub struct IdPhotoStudio {
    config: StudioConfig,
    cache: ModelCache,
    factory: Arc<dyn BackendFactory>,
    sessions: Arc<SessionCache>,
    compositor: Compositor,
}

impl std::fmt::Debug for IdPhotoStudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdPhotoStudio")
            .field("config", &self.config)
            .field("cache", &self.cache.cache_dir())
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl IdPhotoStudio {
    /// Studio with the feature-enabled backends and the process-wide session cache
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Cache directory cannot be determined or created
    pub fn new(config: StudioConfig) -> Result<Self> {
        Self::with_factory(config, Arc::new(DefaultBackendFactory), SessionCache::global())
    }

    /// # Errors
    /// - Invalid configuration
    /// - Cache directory cannot be determined or created
    pub fn with_factory(
        config: StudioConfig,
        factory: Arc<dyn BackendFactory>,
        sessions: Arc<SessionCache>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = ModelCache::open(config.cache_dir.as_deref())?;
        let compositor = Compositor::new(config.jpeg_quality);

        Ok(Self {
            config,
            cache,
            factory,
            sessions,
            compositor,
        })
    }

    #[must_use]
    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    #[must_use]
    pub fn model_cache(&self) -> &ModelCache {
        &self.cache
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.sessions
    }

    /// Get the shared session for the configured model, loading it on first use
    ///
    /// The first call may download the model into the cache.
    ///
    /// # Errors
    /// - Model unknown, not cached with downloads disabled, or download failure
    /// - Backend creation or initialization failure
    pub async fn acquire_session(&self) -> Result<AcquiredSession> {
        let key = self.config.model_spec.session_key();
        self.sessions
            .get_or_try_init(&key, || self.load_session())
            .await
    }

    async fn load_session(&self) -> Result<Box<dyn InferenceBackend>> {
        let spec = &self.config.model_spec;

        if let ModelSource::Downloaded { model_id, url } = spec.source()? {
            if !self.cache.is_model_cached(&model_id) {
                if !self.config.auto_download {
                    return Err(IdPhotoError::model(format!(
                        "Model '{model_id}' is not cached and automatic download is disabled. \
                         Run with --only-download first or fetch it from {url}"
                    )));
                }
                info!(%url, "📥 Downloading segmentation model (first run only)");
                let downloader = ModelDownloader::new(self.cache.clone())?;
                downloader.download_model(&url, false).await?;
            }
        }

        let manager =
            ModelManager::from_spec(spec, &self.cache, Some(self.config.execution_provider))?;
        let factory = Arc::clone(&self.factory);
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let mut backend = factory.create_backend(config.backend_type, manager)?;
            backend.initialize(&config)?;
            Ok(backend)
        })
        .await
        .map_err(|e| IdPhotoError::internal(format!("Model loading task failed: {e}")))?
    }

    /// Load the session ahead of the first request
    ///
    /// # Errors
    /// See [`IdPhotoStudio::acquire_session`].
    pub async fn preload(&self) -> Result<()> {
        let start = Instant::now();
        let acquired = self.acquire_session().await?;
        if !acquired.from_cache {
            info!(
                model = %self.config.model_spec,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "🔥 Segmentation session warmed up"
            );
        }
        Ok(())
    }

    /// Remove the background of encoded image bytes, returning RGBA PNG bytes
    ///
    /// # Errors
    /// - Session acquisition failures
    /// - Undecodable input or inference failures
    pub async fn remove_background(&self, image_bytes: Arc<[u8]>) -> Result<Vec<u8>> {
        let acquired = self.acquire_session().await?;
        run_blocking(move || {
            let mut backend = lock_session(&acquired.session)?;
            BackgroundRemover::new(backend.as_mut()).remove_background_bytes(&image_bytes)
        })
        .await
    }

    /// Run a request from `Ready` (or a retry from `Done`/`Failed`) to
    /// `Done` or `Failed`
    ///
    /// On failure the request keeps the error text and the error is returned.
    ///
    /// # Errors
    /// - Invalid request state (no upload, already processing)
    /// - Any failure in model loading, background removal or composition
    pub async fn process(
        &self,
        request: &mut PhotoRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<GeneratedPhoto> {
        let upload = request.begin()?;
        let mut tracker = ProgressTracker::new(reporter);

        match self
            .generate(upload, request.preset(), request.background(), &mut tracker)
            .await
        {
            Ok(photo) => {
                request.complete(photo.clone())?;
                Ok(photo)
            },
            Err(e) => {
                tracker.report_error(&e.to_string());
                request.fail(e.to_string())?;
                Err(e)
            },
        }
    }

    /// Generate an ID photo from encoded image bytes
    ///
    /// # Errors
    /// - Any failure in model loading, background removal or composition
    #[instrument(
        skip(self, image_bytes, tracker),
        fields(bytes = image_bytes.len(), preset = %preset.key(), background = %background.key())
    )]
    pub async fn generate(
        &self,
        image_bytes: Arc<[u8]>,
        preset: SizePreset,
        background: Background,
        tracker: &mut ProgressTracker,
    ) -> Result<GeneratedPhoto> {
        let total_start = Instant::now();

        tracker.report_stage(ProcessingStage::ModelLoading);
        let load_start = Instant::now();
        let acquired = self.acquire_session().await?;
        let model_load_ms = if acquired.from_cache {
            0
        } else {
            load_start.elapsed().as_millis() as u64
        };

        tracker.report_stage(ProcessingStage::BackgroundRemoval);
        let session = Arc::clone(&acquired.session);
        let (foreground, mut timings) =
            run_blocking(move || extract_foreground(&session, &image_bytes)).await?;
        timings.model_load_ms = model_load_ms;

        tracker.report_stage(ProcessingStage::Composition);
        let compositor = self.compositor;
        let (image, composition_ms, encode_ms) = run_blocking(move || {
            let compose_start = Instant::now();
            let image = compositor.compose_preset(&foreground, preset, background)?;
            let composition_ms = compose_start.elapsed().as_millis() as u64;

            let encode_start = Instant::now();
            let bytes = compositor.encode(&image, background.output_format())?;
            Ok((bytes, composition_ms, encode_start.elapsed().as_millis() as u64))
        })
        .await?;

        timings.composition_ms = composition_ms;
        timings.encode_ms = encode_ms;
        timings.total_ms = total_start.elapsed().as_millis() as u64;

        let photo = GeneratedPhoto {
            bytes: image,
            format: background.output_format(),
            preset,
            background,
            dimensions: preset.dimensions(),
            timings,
        };
        tracker.report_completion(&photo.timings);
        Ok(photo)
    }
}

fn extract_foreground(
    session: &SharedSession,
    image_bytes: &[u8],
) -> Result<(image::RgbaImage, ProcessingTimings)> {
    let decode_start = Instant::now();
    let image = ImageCodec::decode(image_bytes)?;
    let decode_ms = decode_start.elapsed().as_millis() as u64;

    let mut backend = lock_session(session)?;
    let outcome = BackgroundRemover::new(backend.as_mut()).remove_background(&image)?;

    let mut timings = outcome.timings;
    timings.decode_ms = decode_ms;
    Ok((outcome.image, timings))
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| IdPhotoError::internal(format!("Processing task failed: {e}")))?
}
