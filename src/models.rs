//! Model identifiers, metadata and loading
//!
//! A model is named by an alias (`isnet-general-use`), a `HuggingFace`
//! repository URL or a path to a model folder. Folders use the `HuggingFace`
//! layout: `config.json`, `preprocessor_config.json` and `onnx/model*.onnx`.

use crate::cache::{scan_onnx_variants, ModelCache};
use crate::config::ExecutionProvider;
use crate::error::{IdPhotoError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Model used when none is configured
pub const DEFAULT_MODEL_NAME: &str = "isnet-general-use";

/// Repository the default model is downloaded from
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/imgly/isnet-general-onnx";

const MODEL_ALIASES: &[(&str, &str)] = &[
    ("isnet-general-use", DEFAULT_MODEL_URL),
    ("isnet-general-onnx", DEFAULT_MODEL_URL),
];

/// Map a short model alias to its download URL
#[must_use]
pub fn resolve_model_alias(name: &str) -> Option<&'static str> {
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name.trim()))
        .map(|(_, url)| *url)
}

/// Known aliases, for help output
#[must_use]
pub fn model_aliases() -> Vec<&'static str> {
    MODEL_ALIASES.iter().map(|(alias, _)| *alias).collect()
}

/// Where a model's files come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    /// Model folder on the filesystem
    External(PathBuf),
    /// Model in the download cache
    Downloaded { model_id: String, url: String },
}

impl ModelSource {
    /// Short name for logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::External(path) => format!(
                "external:{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
            Self::Downloaded { model_id, .. } => format!("cached:{model_id}"),
        }
    }
}

/// Model name plus optional precision variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Alias, `HuggingFace` URL or folder path
    pub name: String,
    /// Precision variant (`fp32`, `fp16`); `None` picks one automatically
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_NAME)
    }
}

impl ModelSpec {
    #[must_use]
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            variant: None,
        }
    }

    #[must_use]
    pub fn with_variant(mut self, variant: Option<String>) -> Self {
        self.variant = variant;
        self
    }

    /// Download URL for aliases and URLs, `None` for local folders
    #[must_use]
    pub fn download_url(&self) -> Option<String> {
        let name = self.name.trim();
        if let Some(url) = resolve_model_alias(name) {
            return Some(url.to_string());
        }
        if name.starts_with("https://") || name.starts_with("http://") {
            return Some(name.trim_end_matches('/').to_string());
        }
        None
    }

    /// Resolve the model name to a source
    ///
    /// # Errors
    /// - The name is neither an alias, a URL nor an existing directory
    pub fn source(&self) -> Result<ModelSource> {
        if let Some(url) = self.download_url() {
            return Ok(ModelSource::Downloaded {
                model_id: ModelCache::url_to_model_id(&url),
                url,
            });
        }

        let path = PathBuf::from(self.name.trim());
        if path.is_dir() {
            return Ok(ModelSource::External(path));
        }

        Err(IdPhotoError::model(format!(
            "Unknown model '{}': expected one of {:?}, a HuggingFace URL or a model folder",
            self.name,
            model_aliases()
        )))
    }

    /// Key under which a loaded session is shared in-process
    #[must_use]
    pub fn session_key(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}@{variant}", self.name.trim()),
            None => self.name.trim().to_string(),
        }
    }
}

impl std::fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.session_key())
    }
}

/// Model information and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: u64,
    /// NCHW
    pub input_shape: (usize, usize, usize, usize),
    pub output_shape: (usize, usize, usize, usize),
}

/// Input geometry and normalization expected by a model
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// `[height, width]` of the model input
    pub target_size: [u32; 2],
    /// Per-channel mean in the 0-1 range
    pub normalization_mean: [f32; 3],
    /// Per-channel std in the 0-1 range
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    /// `ISNet` general-use settings
    fn default() -> Self {
        Self {
            target_size: [1024, 1024],
            normalization_mean: [128.0 / 255.0; 3],
            normalization_std: [256.0 / 255.0; 3],
        }
    }
}

/// Source of model bytes and metadata
pub trait ModelProvider: std::fmt::Debug + Send + Sync {
    /// Load the ONNX file of the selected variant
    ///
    /// # Errors
    /// - Model file missing or unreadable
    fn load_model_data(&self) -> Result<Vec<u8>>;

    /// # Errors
    /// - Model file or configuration unreadable
    fn get_model_info(&self) -> Result<ModelInfo>;

    /// # Errors
    /// - Missing or malformed preprocessing configuration
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Path of the ONNX file of the selected variant
    fn get_model_path(&self) -> PathBuf;

    /// Selected precision variant
    fn variant(&self) -> &str;
}

/// Provider for a model folder in the `HuggingFace` layout
#[derive(Debug)]
pub struct FolderModelProvider {
    model_path: PathBuf,
    model_config: serde_json::Value,
    preprocessor_config: serde_json::Value,
    variant: String,
}

impl FolderModelProvider {
    /// Open a model folder and pick a variant
    ///
    /// # Errors
    /// - Path missing or not a directory
    /// - Missing or unparsable `config.json` / `preprocessor_config.json`
    /// - No ONNX files, or the requested variant is not present
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        variant: Option<String>,
        execution_provider: Option<ExecutionProvider>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();

        if !model_path.is_dir() {
            return Err(IdPhotoError::invalid_config(format!(
                "Model path must be an existing directory: {}",
                model_path.display()
            )));
        }

        let model_config = read_json(&model_path.join("config.json"))?;
        let preprocessor_config = read_json(&model_path.join("preprocessor_config.json"))?;

        let onnx_dir = model_path.join("onnx");
        let available = scan_onnx_variants(&onnx_dir);
        if available.is_empty() {
            return Err(IdPhotoError::model(format!(
                "No ONNX model files found in: {}",
                onnx_dir.display()
            )));
        }
        let variant = select_variant(&available, variant, execution_provider)?;

        log::debug!(
            "📁 Opened model folder {} (variant {variant}, available {available:?})",
            model_path.display()
        );

        Ok(Self {
            model_path,
            model_config,
            preprocessor_config,
            variant,
        })
    }

    fn size(&self) -> Result<[u32; 2]> {
        let size = self
            .preprocessor_config
            .get("size")
            .ok_or_else(|| IdPhotoError::model("Missing size in preprocessor config"))?;

        let dim = |key: &str| -> Result<u32> {
            size.get(key)
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| IdPhotoError::model(format!("Missing or invalid {key} in size config")))?
                .try_into()
                .map_err(|_| IdPhotoError::model(format!("{key} value too large for u32")))
        };

        Ok([dim("height")?, dim("width")?])
    }

    /// Parse a 3-channel statistic, converting from 0-255 to 0-1
    fn channel_stat(&self, key: &str, fallback: f64) -> Result<[f32; 3]> {
        let values = self
            .preprocessor_config
            .get(key)
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                IdPhotoError::model(format!("Missing or invalid {key} in preprocessor config"))
            })?;

        if values.len() < 3 {
            return Err(IdPhotoError::model(format!("{key} must have at least 3 values")));
        }

        let mut out = [0.0_f32; 3];
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = (value.as_f64().unwrap_or(fallback) / 255.0) as f32;
        }
        Ok(out)
    }
}

impl ModelProvider for FolderModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        let path = self.get_model_path();
        fs::read(&path).map_err(|e| IdPhotoError::file_io_error("read model file", &path, &e))
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        let path = self.get_model_path();
        let size_bytes = fs::metadata(&path)
            .map_err(|e| IdPhotoError::file_io_error("stat model file", &path, &e))?
            .len();
        let model_type = self
            .model_config
            .get("model_type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        let [height, width] = self.size()?;
        let (height, width) = (height as usize, width as usize);

        Ok(ModelInfo {
            name: format!("{model_type}-{}", self.variant),
            precision: self.variant.clone(),
            size_bytes,
            input_shape: (1, 3, height, width),
            output_shape: (1, 1, height, width),
        })
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig {
            target_size: self.size()?,
            normalization_mean: self.channel_stat("image_mean", 128.0)?,
            normalization_std: self.channel_stat("image_std", 255.0)?,
        })
    }

    fn get_model_path(&self) -> PathBuf {
        let onnx_dir = self.model_path.join("onnx");
        match self.variant.as_str() {
            "fp32" => onnx_dir.join("model.onnx"),
            variant => onnx_dir.join(format!("model_{variant}.onnx")),
        }
    }

    fn variant(&self) -> &str {
        &self.variant
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content = fs::read_to_string(path)
        .map_err(|e| IdPhotoError::file_io_error("read model configuration", path, &e))?;
    serde_json::from_str(&content).map_err(|e| {
        IdPhotoError::model(format!("Failed to parse {}: {e}", path.display()))
    })
}

/// Pick a variant from what is on disk
///
/// An explicit request must exist. Otherwise `CoreML` (and `Auto` on macOS)
/// prefers fp32, everything else prefers fp16, then fp16 > fp32 > first.
///
/// # Errors
/// - The requested variant is not available
pub fn select_variant(
    available: &[String],
    requested: Option<String>,
    execution_provider: Option<ExecutionProvider>,
) -> Result<String> {
    let has = |name: &str| available.iter().any(|v| v == name);

    if let Some(variant) = requested {
        if has(&variant) {
            return Ok(variant);
        }
        return Err(IdPhotoError::model(format!(
            "Requested variant '{variant}' not available. Available: {available:?}"
        )));
    }

    let preferred = match execution_provider {
        Some(ExecutionProvider::CoreMl) => Some("fp32"),
        Some(ExecutionProvider::Cuda | ExecutionProvider::Cpu) => Some("fp16"),
        Some(ExecutionProvider::Auto) if cfg!(target_os = "macos") => Some("fp32"),
        Some(ExecutionProvider::Auto) => Some("fp16"),
        None => None,
    };
    if let Some(name) = preferred.filter(|name| has(name)) {
        return Ok(name.to_string());
    }

    for name in ["fp16", "fp32"] {
        if has(name) {
            return Ok(name.to_string());
        }
    }

    available
        .first()
        .cloned()
        .ok_or_else(|| IdPhotoError::model("No model variants available"))
}

/// Resolved model ready to hand to a backend
#[derive(Debug)]
pub struct ModelManager {
    provider: Box<dyn ModelProvider>,
}

impl ModelManager {
    /// Resolve a model spec against the cache
    ///
    /// # Errors
    /// - Unknown model name
    /// - Downloadable model not present in the cache
    /// - Invalid model folder
    pub fn from_spec(
        spec: &ModelSpec,
        cache: &ModelCache,
        execution_provider: Option<ExecutionProvider>,
    ) -> Result<Self> {
        let model_path = match spec.source()? {
            ModelSource::External(path) => path,
            ModelSource::Downloaded { model_id, url } => {
                if !cache.is_model_cached(&model_id) {
                    return Err(IdPhotoError::model(format!(
                        "Model '{model_id}' not found in cache {}. Download it from {url} first",
                        cache.cache_dir().display()
                    )));
                }
                cache.get_model_path(&model_id)
            },
        };

        let provider =
            FolderModelProvider::new(model_path, spec.variant.clone(), execution_provider)?;
        Ok(Self::with_provider(Box::new(provider)))
    }

    /// Wrap any provider
    #[must_use]
    pub fn with_provider(provider: Box<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    /// # Errors
    /// See [`ModelProvider::load_model_data`].
    pub fn load_model(&self) -> Result<Vec<u8>> {
        self.provider.load_model_data()
    }

    /// # Errors
    /// See [`ModelProvider::get_model_info`].
    pub fn get_info(&self) -> Result<ModelInfo> {
        self.provider.get_model_info()
    }

    /// # Errors
    /// See [`ModelProvider::get_preprocessing_config`].
    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.provider.get_preprocessing_config()
    }

    #[must_use]
    pub fn get_model_path(&self) -> PathBuf {
        self.provider.get_model_path()
    }

    #[must_use]
    pub fn variant(&self) -> &str {
        self.provider.variant()
    }
}
