//! Model downloading from `HuggingFace` repositories
//!
//! Files are streamed into a staging folder next to the cache and the folder
//! is renamed into place once every required file has arrived, so a cancelled
//! or failed download never leaves a half-populated model behind.

use crate::cache::ModelCache;
use crate::error::{IdPhotoError, Result};
use crate::models::ModelSpec;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "server")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Configuration files every model needs
const REQUIRED_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// ONNX files to try; at least one must succeed
const ONNX_FILES: &[(&str, &str)] = &[
    ("onnx/model.onnx", "fp32"),
    ("onnx/model_fp16.onnx", "fp16"),
];

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Progress sink for downloads, a terminal bar or nothing
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "server")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    /// Terminal progress bar when the `server` feature is on
    #[must_use]
    pub fn terminal() -> Self {
        #[cfg(feature = "server")]
        {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            Self::Indicatif(pb)
        }
        #[cfg(not(feature = "server"))]
        {
            Self::NoOp
        }
    }

    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "server")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {},
        }
    }

    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "server")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "server")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "server")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {},
        }
    }
}

/// Downloads model repositories into a [`ModelCache`]
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader writing into the given cache
    ///
    /// # Errors
    /// - The HTTP client cannot be built
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| IdPhotoError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Make sure the model named by `spec` is available locally
    ///
    /// Local folders are returned as-is. Aliases and URLs are downloaded on
    /// first use and served from the cache afterwards. Returns the model folder.
    ///
    /// # Errors
    /// - Unknown model name
    /// - Network or filesystem failures while downloading
    pub async fn ensure_model(&self, spec: &ModelSpec, show_progress: bool) -> Result<PathBuf> {
        match spec.download_url() {
            Some(url) => {
                let model_id = self.download_model(&url, show_progress).await?;
                Ok(self.cache.get_model_path(&model_id))
            },
            None => match spec.source()? {
                crate::models::ModelSource::External(path) => Ok(path),
                crate::models::ModelSource::Downloaded { model_id, .. } => {
                    Ok(self.cache.get_model_path(&model_id))
                },
            },
        }
    }

    /// Download a model repository into the cache and return its model ID
    ///
    /// Already cached models are not downloaded again.
    ///
    /// # Errors
    /// - Unsupported URL
    /// - Configuration files missing upstream
    /// - No ONNX variant could be downloaded
    /// - Filesystem errors while staging or moving the files
    pub async fn download_model(&self, url: &str, show_progress: bool) -> Result<String> {
        validate_model_url(url)?;
        let model_id = ModelCache::url_to_model_id(url);

        if self.cache.is_model_cached(&model_id) {
            log::debug!("Model already cached: {model_id}");
            return Ok(model_id);
        }

        log::info!("⬇️ Downloading model {model_id} from {url}");

        let staging_dir = self.staging_dir(&model_id)?;
        let final_dir = self.cache.get_model_path(&model_id);
        let progress = if show_progress {
            ProgressIndicator::terminal()
        } else {
            ProgressIndicator::NoOp
        };

        let outcome = self.download_model_files(url, &staging_dir, &progress).await;
        if let Err(e) = outcome {
            if let Err(cleanup_err) = fs::remove_dir_all(&staging_dir) {
                log::warn!("Failed to clean up {}: {cleanup_err}", staging_dir.display());
            }
            progress.finish_with_message("❌ Download failed".to_string());
            return Err(e);
        }

        if final_dir.exists() {
            fs::remove_dir_all(&final_dir).map_err(|e| {
                IdPhotoError::file_io_error("remove stale model directory", &final_dir, &e)
            })?;
        }
        fs::rename(&staging_dir, &final_dir).map_err(|e| {
            IdPhotoError::file_io_error("move downloaded model into cache", &final_dir, &e)
        })?;

        progress.finish_with_message(format!("✅ Downloaded {model_id}"));
        log::info!("✅ Model {model_id} cached at {}", final_dir.display());
        Ok(model_id)
    }

    /// Hidden staging folder inside the cache, so the final rename stays on one filesystem
    fn staging_dir(&self, model_id: &str) -> Result<PathBuf> {
        let dir = self.cache.cache_dir().join(format!(".{model_id}.partial"));
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .map_err(|e| IdPhotoError::file_io_error("remove old staging directory", &dir, &e))?;
        }
        fs::create_dir_all(&dir)
            .map_err(|e| IdPhotoError::file_io_error("create staging directory", &dir, &e))?;
        Ok(dir)
    }

    async fn download_model_files(
        &self,
        base_url: &str,
        download_dir: &Path,
        progress: &ProgressIndicator,
    ) -> Result<()> {
        let raw_base = format!("{}/resolve/main/", base_url.trim_end_matches('/'));

        for file_name in REQUIRED_FILES {
            progress.set_message(format!("Downloading {file_name}"));
            self.download_file(&format!("{raw_base}{file_name}"), &download_dir.join(file_name), progress)
                .await?;
        }

        let mut downloaded_variants = 0;
        for (file_path, variant) in ONNX_FILES {
            progress.set_message(format!("Downloading {variant} model"));
            let local_path = download_dir.join(file_path);
            match self
                .download_file(&format!("{raw_base}{file_path}"), &local_path, progress)
                .await
            {
                Ok(()) => {
                    downloaded_variants += 1;
                    log::info!("Downloaded {variant} model variant");
                },
                Err(e) => {
                    // A partial file would be picked up as a variant by the cache scan
                    let _ = fs::remove_file(&local_path);
                    log::warn!("Failed to download {variant} variant: {e}");
                },
            }
        }

        if downloaded_variants == 0 {
            return Err(IdPhotoError::network_error(
                "Failed to download any ONNX model variant",
                std::io::Error::new(std::io::ErrorKind::NotFound, "no model files found"),
            ));
        }

        Ok(())
    }

    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: &ProgressIndicator,
    ) -> Result<()> {
        log::debug!("Downloading: {url} -> {}", local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| IdPhotoError::file_io_error("create directory", parent, &e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IdPhotoError::network_error(format!("Failed to download {url}"), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IdPhotoError::network_error(
                format!("HTTP {status} for {url}"),
                std::io::Error::new(std::io::ErrorKind::Other, status.to_string()),
            ));
        }

        if let Some(total) = response.content_length() {
            progress.set_length(total);
        }
        progress.set_position(0);

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| IdPhotoError::file_io_error("create file", local_path, &e))?;
        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| IdPhotoError::network_error(format!("Failed to read {url}"), e))?;
            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or_default();
            file.write_all(chunk)
                .await
                .map_err(|e| IdPhotoError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            progress.set_position(downloaded);
        }

        file.flush()
            .await
            .map_err(|e| IdPhotoError::file_io_error("flush file", local_path, &e))?;

        log::debug!("Downloaded {downloaded} bytes to {}", local_path.display());
        Ok(())
    }
}

/// Hex SHA-256 of a file
///
/// # Errors
/// - The file cannot be read
pub fn sha256_file(path: &Path) -> Result<String> {
    let contents = fs::read(path)
        .map_err(|e| IdPhotoError::file_io_error("read file for verification", path, &e))?;
    Ok(format!("{:x}", Sha256::digest(&contents)))
}

/// Check a file against an expected SHA-256; no expectation always passes
///
/// # Errors
/// - The file cannot be read
pub fn verify_file_integrity(path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };

    let actual = sha256_file(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        log::warn!(
            "Integrity check failed for {}: expected {expected}, got {actual}",
            path.display()
        );
        Ok(false)
    }
}

/// Validate that a URL names a `HuggingFace` repository
///
/// # Errors
/// - Empty URL, non-`HuggingFace` host, or missing `user/repo` path
pub fn validate_model_url(url: &str) -> Result<()> {
    parse_huggingface_url(url).map(|_| ())
}

/// Split a `HuggingFace` URL into `(user, repository)`
///
/// # Errors
/// Same as [`validate_model_url`].
pub fn parse_huggingface_url(url: &str) -> Result<(String, String)> {
    if url.trim().is_empty() {
        return Err(IdPhotoError::invalid_config("Model URL cannot be empty"));
    }

    let repo_path = url.strip_prefix(HUGGINGFACE_PREFIX).ok_or_else(|| {
        IdPhotoError::invalid_config(format!(
            "Unsupported URL: {url}. Only HuggingFace repositories are supported ({HUGGINGFACE_PREFIX}...)"
        ))
    })?;

    let mut parts = repo_path.trim_end_matches('/').split('/');
    match (parts.next(), parts.next()) {
        (Some(user), Some(repo)) if !user.is_empty() && !repo.is_empty() => {
            Ok((user.to_string(), repo.to_string()))
        },
        _ => Err(IdPhotoError::invalid_config(format!(
            "Invalid HuggingFace repository URL: {url}. Expected {HUGGINGFACE_PREFIX}user/repo"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://huggingface.co/imgly/isnet-general-onnx").is_ok());
        assert!(validate_model_url("https://huggingface.co/imgly/isnet-general-onnx/").is_ok());
        assert!(validate_model_url("").is_err());
        assert!(validate_model_url("https://example.com/imgly/isnet").is_err());
        assert!(validate_model_url("https://huggingface.co/imgly").is_err());
        assert!(validate_model_url("https://huggingface.co/").is_err());
    }

    #[test]
    fn test_parse_huggingface_url() {
        let (user, repo) =
            parse_huggingface_url("https://huggingface.co/imgly/isnet-general-onnx").unwrap();
        assert_eq!(user, "imgly");
        assert_eq!(repo, "isnet-general-onnx");
    }

    #[test]
    fn test_verify_file_integrity() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.onnx");
        fs::write(&path, b"abc").unwrap();

        let abc = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert_eq!(sha256_file(&path).unwrap(), abc);
        assert!(verify_file_integrity(&path, Some(abc)).unwrap());
        assert!(verify_file_integrity(&path, Some(&abc.to_uppercase())).unwrap());
        assert!(!verify_file_integrity(&path, Some("00")).unwrap());
        assert!(verify_file_integrity(&path, None).unwrap());
    }

    #[tokio::test]
    async fn test_cached_model_is_not_downloaded_again() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        crate::models::tests::write_model_folder(
            &cache.get_model_path("imgly--isnet-general-onnx"),
            &["model.onnx"],
        );

        let downloader = ModelDownloader::new(cache).unwrap();
        let path = downloader
            .ensure_model(&ModelSpec::default(), false)
            .await
            .unwrap();
        assert_eq!(
            path,
            temp_dir.path().join("models").join("imgly--isnet-general-onnx")
        );
    }

    #[tokio::test]
    async fn test_ensure_model_passes_local_folders_through() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(&temp_dir.path().join("cache")).unwrap();
        let downloader = ModelDownloader::new(cache).unwrap();

        let spec = ModelSpec::new(temp_dir.path().to_string_lossy());
        assert_eq!(
            downloader.ensure_model(&spec, false).await.unwrap(),
            temp_dir.path()
        );
    }

    #[tokio::test]
    async fn test_download_rejects_unsupported_url() {
        let temp_dir = TempDir::new().unwrap();
        let downloader =
            ModelDownloader::new(ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap())
                .unwrap();
        let err = downloader
            .download_model("https://example.com/model", false)
            .await
            .unwrap_err();
        assert!(matches!(err, IdPhotoError::InvalidConfig(_)));
    }
}
