//! Masks and timing records shared by the remover and the studio

use crate::error::{IdPhotoError, Result};
use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};

/// Per-pixel foreground probability scaled to 0-255, row-major
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationMask {
    pub data: Vec<u8>,

    /// (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    #[must_use]
    pub fn from_image(image: &GrayImage) -> Self {
        Self::new(image.as_raw().clone(), image.dimensions())
    }

    /// Mask value at a pixel, `None` outside the mask
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        let (width, height) = self.dimensions;
        if x >= width || y >= height {
            return None;
        }
        self.data
            .get(y as usize * width as usize + x as usize)
            .copied()
    }

    /// # Errors
    /// - Data length does not match the dimensions
    pub fn to_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        GrayImage::from_raw(width, height, self.data.clone())
            .ok_or_else(|| IdPhotoError::processing("Mask data does not match its dimensions"))
    }

    /// Write the mask into the alpha channel
    ///
    /// Fully transparent pixels are also zeroed in RGB so encoders don't keep
    /// background colors hidden behind alpha 0.
    ///
    /// # Errors
    /// - Image and mask dimensions differ
    pub fn apply_to_image(&self, image: &mut RgbaImage) -> Result<()> {
        if image.dimensions() != self.dimensions || self.data.len() != image.pixels().len() {
            return Err(IdPhotoError::processing(format!(
                "Image {:?} and mask {:?} dimensions do not match",
                image.dimensions(),
                self.dimensions
            )));
        }

        for (pixel, alpha) in image.pixels_mut().zip(&self.data) {
            pixel.0 = if *alpha == 0 {
                [0, 0, 0, 0]
            } else {
                [pixel[0], pixel[1], pixel[2], *alpha]
            };
        }
        Ok(())
    }

    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let foreground_pixels = self.data.iter().filter(|&&value| value > 127).count();
        let foreground_ratio = if total_pixels == 0 {
            0.0
        } else {
            foreground_pixels as f32 / total_pixels as f32
        };

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            foreground_ratio,
        }
    }
}

/// Foreground coverage of a mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub foreground_ratio: f32,
}

/// Per-stage timings of one generation request, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Session creation; zero when the session came from the cache
    pub model_load_ms: u64,
    pub decode_ms: u64,
    pub preprocessing_ms: u64,
    pub inference_ms: u64,
    /// Mask recovery and alpha application
    pub postprocessing_ms: u64,
    pub composition_ms: u64,
    pub encode_ms: u64,
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Time not attributed to any measured stage
    #[must_use]
    pub fn other_overhead_ms(&self) -> u64 {
        let measured = self.model_load_ms
            + self.decode_ms
            + self.preprocessing_ms
            + self.inference_ms
            + self.postprocessing_ms
            + self.composition_ms
            + self.encode_ms;
        self.total_ms.saturating_sub(measured)
    }

    /// One-line summary for logs
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "total {}ms (model {}ms, decode {}ms, inference {}ms, composition {}ms, encode {}ms)",
            self.total_ms,
            self.model_load_ms,
            self.decode_ms,
            self.preprocessing_ms + self.inference_ms + self.postprocessing_ms,
            self.composition_ms,
            self.encode_ms
        )
    }
}
