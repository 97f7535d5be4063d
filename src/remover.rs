//! Background removal on top of a loaded segmentation session

use crate::{
    config::OutputFormat,
    error::{IdPhotoError, Result},
    inference::InferenceBackend,
    services::ImageCodec,
    types::{ProcessingTimings, SegmentationMask},
    utils::ImagePreprocessor,
};
use image::{DynamicImage, RgbaImage};
use std::time::Instant;
use tracing::{debug, info, instrument, span, Level};

/// Foreground extracted from one image
#[derive(Debug, Clone)]
pub struct RemovalOutcome {
    /// Same dimensions as the input, background pixels fully transparent
    pub image: RgbaImage,
    pub mask: SegmentationMask,
    pub timings: ProcessingTimings,
}

/// Runs segmentation and applies the predicted mask as alpha
pub struct BackgroundRemover<'a> {
    backend: &'a mut dyn InferenceBackend,
}

impl std::fmt::Debug for BackgroundRemover<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemover")
            .field("initialized", &self.backend.is_initialized())
            .finish()
    }
}

impl<'a> BackgroundRemover<'a> {
    /// Wrap an initialized backend
    pub fn new(backend: &'a mut dyn InferenceBackend) -> Self {
        Self { backend }
    }

    /// Remove the background of encoded image bytes, returning RGBA PNG bytes
    /// of the same pixel dimensions
    ///
    /// # Errors
    /// - Undecodable input
    /// - Inference failures
    /// - PNG encoding failures
    pub fn remove_background_bytes(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>> {
        let decode_start = Instant::now();
        let image = ImageCodec::decode(image_bytes)?;
        let decode_ms = decode_start.elapsed().as_millis() as u64;

        let outcome = self.remove_background(&image)?;

        let encode_start = Instant::now();
        let bytes = ImageCodec::encode(
            &DynamicImage::ImageRgba8(outcome.image),
            OutputFormat::Png,
            100,
        )?;
        debug!(
            decode_ms,
            encode_ms = encode_start.elapsed().as_millis() as u64,
            "encoded foreground as PNG"
        );
        Ok(bytes)
    }

    /// Remove the background of a decoded image
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Preprocessing, inference or mask application failures
    #[instrument(
        skip(self, image),
        fields(dimensions = %format!("{}x{}", image.width(), image.height()))
    )]
    pub fn remove_background(&mut self, image: &DynamicImage) -> Result<RemovalOutcome> {
        if !self.backend.is_initialized() {
            return Err(IdPhotoError::internal(
                "Segmentation session used before initialization",
            ));
        }

        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();
        let original_dimensions = (image.width(), image.height());

        let input_tensor = {
            let _span = span!(Level::DEBUG, "preprocessing").entered();
            let start = Instant::now();
            let config = self.backend.get_preprocessing_config()?;
            let tensor = ImagePreprocessor::preprocess_for_inference(image, &config)?;
            timings.preprocessing_ms = start.elapsed().as_millis() as u64;
            tensor
        };

        let output_tensor = {
            let _span = span!(Level::INFO, "inference").entered();
            let start = Instant::now();
            let output = self.backend.infer(&input_tensor)?;
            timings.inference_ms = start.elapsed().as_millis() as u64;
            output
        };

        let (mask, foreground) = {
            let _span = span!(Level::DEBUG, "mask_application").entered();
            let start = Instant::now();
            let mask = ImagePreprocessor::tensor_to_mask(&output_tensor, original_dimensions)?;
            let mut foreground = image.to_rgba8();
            mask.apply_to_image(&mut foreground)?;
            timings.postprocessing_ms = start.elapsed().as_millis() as u64;
            (mask, foreground)
        };

        timings.total_ms = total_start.elapsed().as_millis() as u64;
        let stats = mask.statistics();
        info!(
            inference_ms = timings.inference_ms,
            foreground_ratio = stats.foreground_ratio,
            "background removed"
        );

        Ok(RemovalOutcome {
            image: foreground,
            mask,
            timings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{MockBackend, MockMask};
    use crate::config::StudioConfig;
    use image::{GenericImageView, Rgb, RgbImage};

    fn initialized(mut backend: MockBackend) -> MockBackend {
        backend.initialize(&StudioConfig::default()).unwrap();
        backend
    }

    fn portrait() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(48, 64, Rgb([180, 140, 120])))
    }

    #[test]
    fn test_circle_mask_keeps_center_and_clears_corners() {
        let mut backend = initialized(MockBackend::new());
        let outcome = BackgroundRemover::new(&mut backend)
            .remove_background(&portrait())
            .unwrap();

        assert_eq!(outcome.image.dimensions(), (48, 64));
        assert_eq!(outcome.mask.dimensions, (48, 64));
        assert_eq!(outcome.image.get_pixel(24, 32).0, [180, 140, 120, 255]);
        assert_eq!(outcome.image.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_empty_mask_is_fully_transparent() {
        let mut backend = initialized(MockBackend::with_mask(MockMask::Empty));
        let outcome = BackgroundRemover::new(&mut backend)
            .remove_background(&portrait())
            .unwrap();
        assert!(outcome.image.pixels().all(|p| p.0 == [0, 0, 0, 0]));
        assert_eq!(outcome.mask.statistics().foreground_pixels, 0);
    }

    #[test]
    fn test_bytes_round_trip_preserves_dimensions() {
        let input = ImageCodec::encode(&portrait(), OutputFormat::Jpeg, 90).unwrap();
        let mut backend = initialized(MockBackend::with_mask(MockMask::Full));

        let output = BackgroundRemover::new(&mut backend)
            .remove_background_bytes(&input)
            .unwrap();
        let decoded = ImageCodec::decode(&output).unwrap();
        assert_eq!(decoded.dimensions(), (48, 64));
        assert!(decoded.color().has_alpha());
        assert_eq!(decoded.get_pixel(10, 10)[3], 255);
    }

    #[test]
    fn test_malformed_bytes_propagate_error() {
        let mut backend = initialized(MockBackend::new());
        let result = BackgroundRemover::new(&mut backend).remove_background_bytes(b"GIF8 nope");
        assert!(result.is_err());
        assert!(!backend.call_history().contains(&"infer".to_string()));
    }

    #[test]
    fn test_uninitialized_and_failing_backends() {
        let mut backend = MockBackend::new();
        let err = BackgroundRemover::new(&mut backend)
            .remove_background(&portrait())
            .unwrap_err();
        assert!(matches!(err, IdPhotoError::Internal(_)));

        let mut failing = initialized(MockBackend::failing_inference());
        let err = BackgroundRemover::new(&mut failing)
            .remove_background(&portrait())
            .unwrap_err();
        assert!(matches!(err, IdPhotoError::Inference(_)));
    }
}
