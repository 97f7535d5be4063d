//! Configuration types for ID photo generation

use crate::error::{IdPhotoError, Result};
use crate::inference::BackendType;
use crate::models::ModelSpec;
use image::Rgb;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Encoded output format of a generated photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel, used for transparent backgrounds
    #[default]
    Png,
    /// JPEG at full quality, used for solid color backgrounds
    Jpeg,
}

impl OutputFormat {
    /// File extension without the leading dot
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }

    /// MIME type served with the download
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    #[must_use]
    pub fn supports_transparency(self) -> bool {
        matches!(self, Self::Png)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Standard ID photo sizes, in pixels at 300 DPI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SizePreset {
    /// 1-inch (standard), 295×413
    OneInch,
    /// 1-inch at double resolution, 590×826
    #[default]
    OneInchHd,
    /// 2-inch (standard), 413×579
    TwoInch,
    /// 2-inch at double resolution, 826×1158
    TwoInchHd,
    /// Small 2-inch passport format, 567×390
    SmallTwoInch,
}

impl SizePreset {
    /// All presets in the order they are offered to the user
    pub const ALL: [SizePreset; 5] = [
        Self::OneInch,
        Self::OneInchHd,
        Self::TwoInch,
        Self::TwoInchHd,
        Self::SmallTwoInch,
    ];

    /// Stable identifier used in forms, file names and the JSON API
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::OneInch => "one-inch",
            Self::OneInchHd => "one-inch-hd",
            Self::TwoInch => "two-inch",
            Self::TwoInchHd => "two-inch-hd",
            Self::SmallTwoInch => "small-two-inch",
        }
    }

    /// Human readable label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::OneInch => "1-inch (standard)",
            Self::OneInchHd => "1-inch (HD 2x)",
            Self::TwoInch => "2-inch (standard)",
            Self::TwoInchHd => "2-inch (HD 2x)",
            Self::SmallTwoInch => "Small 2-inch (passport)",
        }
    }

    /// Canvas size as `(width, height)`
    #[must_use]
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::OneInch => (295, 413),
            Self::OneInchHd => (590, 826),
            Self::TwoInch => (413, 579),
            Self::TwoInchHd => (826, 1158),
            Self::SmallTwoInch => (567, 390),
        }
    }
}

impl std::fmt::Display for SizePreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SizePreset {
    type Err = IdPhotoError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|preset| preset.key().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let keys: Vec<&str> = Self::ALL.iter().map(|p| p.key()).collect();
                IdPhotoError::unsupported_format(format!(
                    "unknown size preset '{wanted}' (expected one of: {})",
                    keys.join(", ")
                ))
            })
    }
}

/// Canvas background behind the extracted subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Background {
    #[default]
    Blue,
    Red,
    White,
    /// No fill; the output keeps its alpha channel
    Transparent,
}

impl Background {
    pub const ALL: [Background; 4] = [Self::Blue, Self::Red, Self::White, Self::Transparent];

    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Blue => "blue",
            Self::Red => "red",
            Self::White => "white",
            Self::Transparent => "transparent",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Blue => "Blue",
            Self::Red => "Red",
            Self::White => "White",
            Self::Transparent => "Transparent",
        }
    }

    /// Fill color, `None` for a transparent canvas
    #[must_use]
    pub fn color(self) -> Option<Rgb<u8>> {
        match self {
            Self::Blue => Some(Rgb([67, 142, 219])),
            Self::Red => Some(Rgb([196, 12, 32])),
            Self::White => Some(Rgb([255, 255, 255])),
            Self::Transparent => None,
        }
    }

    /// Transparent canvases are written as PNG, colored ones as JPEG
    #[must_use]
    pub fn output_format(self) -> OutputFormat {
        if self.color().is_some() {
            OutputFormat::Jpeg
        } else {
            OutputFormat::Png
        }
    }

    /// CSS `rgb(...)` swatch used by the form
    #[must_use]
    pub fn css_color(self) -> String {
        match self.color() {
            Some(Rgb([r, g, b])) => format!("rgb({r}, {g}, {b})"),
            None => "transparent".to_string(),
        }
    }
}

impl std::fmt::Display for Background {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Background {
    type Err = IdPhotoError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|bg| bg.key().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                IdPhotoError::unsupported_format(format!(
                    "unknown background '{wanted}' (expected blue, red, white or transparent)"
                ))
            })
    }
}

/// Pipeline configuration shared by every request of a studio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioConfig {
    /// Segmentation model to load (also the session cache key)
    pub model_spec: ModelSpec,

    /// Inference engine
    pub backend_type: BackendType,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Intra-op threads (0 = auto)
    pub intra_threads: usize,

    /// Inter-op threads (0 = auto)
    pub inter_threads: usize,

    /// JPEG quality for color backgrounds (1-100)
    pub jpeg_quality: u8,

    /// Download the model into the cache when it is missing
    pub auto_download: bool,

    /// Custom model cache directory
    pub cache_dir: Option<PathBuf>,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            model_spec: ModelSpec::default(),
            backend_type: BackendType::default(),
            execution_provider: ExecutionProvider::Auto,
            intra_threads: 0,
            inter_threads: 0,
            jpeg_quality: 100,
            auto_download: true,
            cache_dir: None,
        }
    }
}

impl StudioConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> StudioConfigBuilder {
        StudioConfigBuilder::default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - JPEG quality outside 1-100
    /// - Empty model identifier
    pub fn validate(&self) -> Result<()> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(IdPhotoError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "1-100",
                Some(100),
            ));
        }

        if self.model_spec.name.trim().is_empty() {
            return Err(IdPhotoError::invalid_config("Model name must not be empty"));
        }

        Ok(())
    }
}

/// Builder for `StudioConfig`
#[derive(Debug, Default)]
pub struct StudioConfigBuilder {
    config: StudioConfig,
}

impl StudioConfigBuilder {
    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Set both intra and inter threads
    ///
    /// Intra-op threads get `threads`, inter-op threads get half of it (minimum 1).
    /// Zero leaves both on auto-detection.
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    /// Set JPEG quality, clamped to 100
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.min(100);
        self
    }

    #[must_use]
    pub fn auto_download(mut self, enabled: bool) -> Self {
        self.config.auto_download = enabled;
        self
    }

    #[must_use]
    pub fn cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.config.cache_dir = dir;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// Returns the first validation failure reported by [`StudioConfig::validate`].
    pub fn build(self) -> Result<StudioConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_table() {
        let table: Vec<(&str, (u32, u32))> = SizePreset::ALL
            .iter()
            .map(|p| (p.key(), p.dimensions()))
            .collect();
        assert_eq!(
            table,
            vec![
                ("one-inch", (295, 413)),
                ("one-inch-hd", (590, 826)),
                ("two-inch", (413, 579)),
                ("two-inch-hd", (826, 1158)),
                ("small-two-inch", (567, 390)),
            ]
        );
        assert_eq!(SizePreset::default(), SizePreset::OneInchHd);
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!("two-inch".parse::<SizePreset>().unwrap(), SizePreset::TwoInch);
        assert_eq!(" ONE-INCH ".parse::<SizePreset>().unwrap(), SizePreset::OneInch);

        let err = "three-inch".parse::<SizePreset>().unwrap_err();
        assert!(matches!(err, IdPhotoError::UnsupportedFormat(_)));
        assert!(err.to_string().contains("small-two-inch"));
    }

    #[test]
    fn test_background_colors() {
        assert_eq!(Background::Blue.color(), Some(Rgb([67, 142, 219])));
        assert_eq!(Background::Red.color(), Some(Rgb([196, 12, 32])));
        assert_eq!(Background::White.color(), Some(Rgb([255, 255, 255])));
        assert_eq!(Background::Transparent.color(), None);
        assert_eq!(Background::default(), Background::Blue);
    }

    #[test]
    fn test_background_output_format() {
        assert_eq!(Background::Transparent.output_format(), OutputFormat::Png);
        for bg in [Background::Blue, Background::Red, Background::White] {
            assert_eq!(bg.output_format(), OutputFormat::Jpeg);
        }
        assert_eq!(Background::Red.css_color(), "rgb(196, 12, 32)");
    }

    #[test]
    fn test_background_from_str() {
        assert_eq!("White".parse::<Background>().unwrap(), Background::White);
        assert!("green".parse::<Background>().is_err());
    }

    #[test]
    fn test_output_format_metadata() {
        assert_eq!(OutputFormat::Png.extension(), "png");
        assert_eq!(OutputFormat::Jpeg.extension(), "jpeg");
        assert_eq!(OutputFormat::Png.mime_type(), "image/png");
        assert_eq!(OutputFormat::Jpeg.mime_type(), "image/jpeg");
        assert!(OutputFormat::Png.supports_transparency());
        assert!(!OutputFormat::Jpeg.supports_transparency());
    }

    #[test]
    fn test_default_config() {
        let config = StudioConfig::default();
        assert_eq!(config.execution_provider, ExecutionProvider::Auto);
        assert_eq!(config.jpeg_quality, 100);
        assert!(config.auto_download);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = StudioConfig::builder()
            .execution_provider(ExecutionProvider::Cpu)
            .num_threads(8)
            .jpeg_quality(250)
            .auto_download(false)
            .build()
            .unwrap();

        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.intra_threads, 8);
        assert_eq!(config.inter_threads, 4);
        assert_eq!(config.jpeg_quality, 100);
        assert!(!config.auto_download);
    }

    #[test]
    fn test_config_validation() {
        let err = StudioConfig::builder().jpeg_quality(0).build().unwrap_err();
        assert!(err.to_string().contains("JPEG quality"));

        let mut config = StudioConfig::default();
        config.model_spec.name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_keys() {
        assert_eq!(
            serde_json::to_string(&SizePreset::SmallTwoInch).unwrap(),
            "\"small-two-inch\""
        );
        assert_eq!(serde_json::to_string(&Background::Transparent).unwrap(), "\"transparent\"");
        let provider: ExecutionProvider = serde_json::from_str("\"coreml\"").unwrap();
        assert_eq!(provider, ExecutionProvider::CoreMl);
    }
}
