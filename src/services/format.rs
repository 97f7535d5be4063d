//! Image decoding and encoding
//!
//! Keeps codec details out of the pipeline: uploads are decoded by content
//! sniffing and turned upright according to their EXIF orientation, results
//! are encoded as PNG (with alpha) or JPEG (opaque).

use crate::{
    config::OutputFormat,
    error::{IdPhotoError, Result},
};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageDecoder, ImageEncoder, ImageFormat, ImageReader};
use std::io::Cursor;

/// Codec service for the byte boundaries of the pipeline
#[derive(Debug)]
pub struct ImageCodec;

impl ImageCodec {
    /// Decode an uploaded image, detecting the format from its content
    ///
    /// The EXIF orientation tag is applied, so phone portraits come out upright.
    ///
    /// # Errors
    /// - Empty input
    /// - Unrecognized or corrupt image data
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(IdPhotoError::processing_stage_error(
                "decode",
                "uploaded file is empty",
                None,
            ));
        }

        let format = image::guess_format(bytes).map_err(|e| {
            IdPhotoError::unsupported_format(format!("Unrecognized image data: {e}"))
        })?;
        log::debug!("Decoding {:?} upload ({} bytes)", format, bytes.len());

        let decode_error = |e: image::ImageError| {
            IdPhotoError::processing_stage_error(
                "decode",
                &e.to_string(),
                Some(&format!("{format:?}, {} bytes", bytes.len())),
            )
        };

        let mut decoder = ImageReader::with_format(Cursor::new(bytes), format)
            .into_decoder()
            .map_err(decode_error)?;
        let orientation = decoder.orientation().map_err(decode_error)?;
        let mut image = DynamicImage::from_decoder(decoder).map_err(decode_error)?;

        log::debug!("EXIF orientation {orientation:?}");
        image.apply_orientation(orientation);
        Ok(image)
    }

    /// Encode an image in the given format
    ///
    /// PNG keeps the alpha channel. JPEG drops it and is written at `quality`
    /// (clamped to 1-100) with full-resolution chroma.
    ///
    /// # Errors
    /// - Encoder failures
    pub fn encode(image: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();

        match format {
            OutputFormat::Png => {
                let rgba = image.to_rgba8();
                PngEncoder::new(&mut buffer).write_image(
                    rgba.as_raw(),
                    rgba.width(),
                    rgba.height(),
                    image::ExtendedColorType::Rgba8,
                )?;
            },
            OutputFormat::Jpeg => {
                let rgb = image.to_rgb8();
                JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).write_image(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    image::ExtendedColorType::Rgb8,
                )?;
            },
        }

        Ok(buffer)
    }

    /// Format of encoded bytes, if recognizable
    #[must_use]
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }
}
