//! On-disk cache of downloaded segmentation models
//!
//! Models live in an XDG cache directory, one folder per model in the
//! `HuggingFace` layout (`config.json`, `preprocessor_config.json`, `onnx/*.onnx`).
//! The folder name is derived from the model URL, see [`ModelCache::url_to_model_id`].

use crate::error::{IdPhotoError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "IPHOTO_ID_CACHE_DIR";

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (folder name)
    pub model_id: String,
    pub path: PathBuf,
    /// Available ONNX variants (fp16, fp32)
    pub variants: Vec<String>,
    /// Total size of the model folder in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the default cache
    ///
    /// Location: `$IPHOTO_ID_CACHE_DIR/models` when set, otherwise
    /// `<user cache dir>/iphoto-id/models` (`~/.cache/iphoto-id/models` on Linux).
    ///
    /// # Errors
    /// - No user cache directory can be determined
    /// - The cache directory cannot be created
    pub fn new() -> Result<Self> {
        let cache_dir = Self::default_cache_dir()?;
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Open a cache rooted at a custom directory (models go into `<dir>/models`)
    ///
    /// # Errors
    /// - The cache directory cannot be created
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");
        Self::ensure_dir(&models_dir)?;
        Ok(Self {
            cache_dir: models_dir,
        })
    }

    /// Open either the custom cache or the default one
    ///
    /// # Errors
    /// Same as [`ModelCache::new`] and [`ModelCache::with_custom_cache_dir`].
    pub fn open(custom_dir: Option<&Path>) -> Result<Self> {
        match custom_dir {
            Some(dir) => Self::with_custom_cache_dir(dir),
            None => Self::new(),
        }
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| IdPhotoError::file_io_error("create cache directory", dir, &e))?;
        }
        Ok(())
    }

    fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                IdPhotoError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV}."
                ))
            })?
            .join("iphoto-id")
            .join("models"))
    }

    /// Derive a filesystem-safe model ID from a URL
    ///
    /// `https://huggingface.co/imgly/isnet-general-onnx` becomes
    /// `imgly--isnet-general-onnx`. Other URLs get `url-` plus the first
    /// 12 hex digits of their SHA-256.
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        if let Some(path) = url.strip_prefix(HUGGINGFACE_PREFIX) {
            return path.trim_end_matches('/').replace('/', "--");
        }

        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(url.as_bytes());
        let hash_string = format!("url-{digest:x}");
        hash_string.get(..16).unwrap_or(&hash_string).to_string()
    }

    /// `true` when the model folder exists and has the required layout
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        let model_path = self.cache_dir.join(model_id);
        model_path.exists() && Self::validate_model_directory(&model_path)
    }

    /// Path of a model folder (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// List every valid cached model, sorted by ID
    ///
    /// # Errors
    /// - The cache directory cannot be read
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        for path in self.model_dirs()? {
            if let Some(model_info) = Self::analyze_model_directory(&path) {
                models.push(model_info);
            }
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    fn model_dirs(&self) -> Result<Vec<PathBuf>> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            IdPhotoError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                IdPhotoError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        Ok(dirs)
    }

    fn validate_model_directory(model_path: &Path) -> bool {
        model_path.join("config.json").exists()
            && model_path.join("preprocessor_config.json").exists()
            && model_path.join("onnx").is_dir()
    }

    fn analyze_model_directory(model_path: &Path) -> Option<CachedModelInfo> {
        let model_id = model_path.file_name()?.to_str()?.to_string();

        if !Self::validate_model_directory(model_path) {
            log::debug!("Skipping invalid model directory: {}", model_path.display());
            return None;
        }

        Some(CachedModelInfo {
            model_id,
            path: model_path.to_path_buf(),
            variants: scan_onnx_variants(&model_path.join("onnx")),
            size_bytes: directory_size(model_path).unwrap_or(0),
        })
    }

    /// Remove model folders missing required files, returning their IDs
    ///
    /// # Errors
    /// - The cache directory cannot be read or a folder cannot be removed
    pub fn cleanup_invalid_models(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for path in self.model_dirs()? {
            if !Self::validate_model_directory(&path) {
                log::warn!("Removing invalid model directory: {}", path.display());
                fs::remove_dir_all(&path).map_err(|e| {
                    IdPhotoError::file_io_error("remove invalid model directory", &path, &e)
                })?;
                removed.push(dir_name(&path));
            }
        }
        Ok(removed)
    }

    /// Remove every cached model, returning the removed IDs
    ///
    /// # Errors
    /// - The cache directory cannot be read or a folder cannot be removed
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for path in self.model_dirs()? {
            let model_id = dir_name(&path);
            log::info!("Removing cached model: {model_id}");
            fs::remove_dir_all(&path).map_err(|e| {
                IdPhotoError::file_io_error("remove cached model directory", &path, &e)
            })?;
            removed.push(model_id);
        }
        Ok(removed)
    }

    /// Remove one cached model; `false` when it was not cached
    ///
    /// # Errors
    /// - The model folder cannot be removed
    pub fn clear_specific_model(&self, model_id: &str) -> Result<bool> {
        let model_path = self.get_model_path(model_id);
        if !model_path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {model_id}");
        fs::remove_dir_all(&model_path).map_err(|e| {
            IdPhotoError::file_io_error("remove cached model directory", &model_path, &e)
        })?;
        Ok(true)
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Variants present in an `onnx/` folder
///
/// `model.onnx` is fp32, `model_fp16.onnx` is fp16, any other
/// `model_<name>.onnx` is reported as `<name>`.
#[must_use]
pub fn scan_onnx_variants(onnx_dir: &Path) -> Vec<String> {
    let mut variants = Vec::new();
    let Ok(entries) = fs::read_dir(onnx_dir) else {
        return variants;
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name == "model.onnx" {
            variants.push("fp32".to_string());
        } else if let Some(variant) = file_name
            .strip_prefix("model_")
            .and_then(|s| s.strip_suffix(".onnx"))
        {
            variants.push(variant.to_string());
        }
    }

    variants.sort();
    variants
}

fn directory_size(dir_path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            total += directory_size(&path)?;
        } else {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Format a byte count in human readable form
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS.get(unit_index).unwrap_or(&"B");
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_model(cache: &ModelCache, model_id: &str, onnx_files: &[&str]) -> PathBuf {
        let path = cache.get_model_path(model_id);
        fs::create_dir_all(path.join("onnx")).unwrap();
        fs::write(path.join("config.json"), "{}").unwrap();
        fs::write(path.join("preprocessor_config.json"), "{}").unwrap();
        for file in onnx_files {
            fs::write(path.join("onnx").join(file), b"onnx").unwrap();
        }
        path
    }

    #[test]
    fn test_url_to_model_id() {
        assert_eq!(
            ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx"),
            "imgly--isnet-general-onnx"
        );
        assert_eq!(
            ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx/"),
            "imgly--isnet-general-onnx"
        );

        let id = ModelCache::url_to_model_id("https://example.com/model.onnx");
        assert!(id.starts_with("url-"));
        assert_eq!(id.len(), 16);
        assert_eq!(id, ModelCache::url_to_model_id("https://example.com/model.onnx"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(170 * 1024 * 1024), "170.0 MB");
    }

    #[test]
    fn test_custom_cache_dir() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        assert_eq!(cache.cache_dir(), temp_dir.path().join("models"));
        assert!(temp_dir.path().join("models").is_dir());
    }

    #[test]
    fn test_is_model_cached_requires_layout() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();

        fs::create_dir_all(cache.get_model_path("half-done")).unwrap();
        assert!(!cache.is_model_cached("half-done"));

        write_model(&cache, "imgly--isnet-general-onnx", &["model.onnx"]);
        assert!(cache.is_model_cached("imgly--isnet-general-onnx"));
    }

    #[test]
    fn test_scan_cached_models() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();

        write_model(&cache, "b-model", &["model.onnx", "model_fp16.onnx"]);
        write_model(&cache, "a-model", &["model_fp16.onnx", "notes.txt"]);
        fs::create_dir_all(cache.get_model_path("broken")).unwrap();

        let models = cache.scan_cached_models().unwrap();
        let ids: Vec<&str> = models.iter().map(|m| m.model_id.as_str()).collect();
        assert_eq!(ids, vec!["a-model", "b-model"]);
        assert_eq!(models[0].variants, vec!["fp16"]);
        assert_eq!(models[1].variants, vec!["fp16", "fp32"]);
        assert!(models[1].size_bytes > 0);
    }

    #[test]
    fn test_cleanup_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();

        write_model(&cache, "good", &["model.onnx"]);
        fs::create_dir_all(cache.get_model_path("broken")).unwrap();

        assert_eq!(cache.cleanup_invalid_models().unwrap(), vec!["broken"]);
        assert!(cache.is_model_cached("good"));

        assert!(cache.clear_specific_model("good").unwrap());
        assert!(!cache.clear_specific_model("good").unwrap());

        write_model(&cache, "one", &["model.onnx"]);
        write_model(&cache, "two", &["model.onnx"]);
        let mut removed = cache.clear_all_models().unwrap();
        removed.sort();
        assert_eq!(removed, vec!["one", "two"]);
        assert!(cache.scan_cached_models().unwrap().is_empty());
    }

    #[test]
    fn test_scan_onnx_variants_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(scan_onnx_variants(&temp_dir.path().join("onnx")).is_empty());
    }
}
