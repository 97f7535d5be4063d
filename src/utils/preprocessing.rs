//! Model input preparation and mask recovery
//!
//! Images are letterboxed into the model's input: resized to fit while keeping
//! their aspect ratio, centered on a padded canvas, then normalized into an
//! NCHW tensor. [`ImagePreprocessor::tensor_to_mask`] undoes the letterbox so
//! the predicted mask lines up with the original pixels.

use crate::{
    error::{IdPhotoError, Result},
    models::PreprocessingConfig,
    types::SegmentationMask,
};
use image::{imageops, DynamicImage, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;

/// Configuration for preprocessing behavior
#[derive(Debug, Clone)]
pub struct PreprocessingOptions {
    /// Fill color of the letterbox bars
    pub padding_color: [u8; 3],
    /// Resampling filter for the downscale
    pub filter: imageops::FilterType,
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self {
            padding_color: [255, 255, 255],
            filter: imageops::FilterType::Triangle,
        }
    }
}

/// Placement of an image inside the model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxGeometry {
    pub scale: f32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub target_width: u32,
    pub target_height: u32,
}

impl LetterboxGeometry {
    /// Fit `original` into `target` (both `(width, height)`)
    ///
    /// # Errors
    /// - Zero-sized original or target
    pub fn compute(original: (u32, u32), target: (u32, u32)) -> Result<Self> {
        let (orig_width, orig_height) = original;
        let (target_width, target_height) = target;
        if orig_width == 0 || orig_height == 0 || target_width == 0 || target_height == 0 {
            return Err(IdPhotoError::processing_stage_error(
                "preprocessing",
                "image and model input must have non-zero dimensions",
                Some(&format!("{orig_width}x{orig_height}")),
            ));
        }

        let scale = (target_width as f32 / orig_width as f32)
            .min(target_height as f32 / orig_height as f32);
        let scaled_width = ((orig_width as f32 * scale).round() as u32).clamp(1, target_width);
        let scaled_height = ((orig_height as f32 * scale).round() as u32).clamp(1, target_height);

        Ok(Self {
            scale,
            scaled_width,
            scaled_height,
            offset_x: (target_width - scaled_width) / 2,
            offset_y: (target_height - scaled_height) / 2,
            target_width,
            target_height,
        })
    }
}

/// Shared image preprocessing utilities
#[derive(Debug)]
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Build the normalized NCHW input tensor for a model
    ///
    /// # Errors
    /// - Zero-sized image or model input
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        Self::preprocess_with_options(image, preprocessing_config, &PreprocessingOptions::default())
    }

    /// # Errors
    /// - Zero-sized image or model input
    pub fn preprocess_with_options(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
        options: &PreprocessingOptions,
    ) -> Result<Array4<f32>> {
        let canvas = Self::letterbox(image, preprocessing_config, options)?;
        Ok(Self::canvas_to_tensor(&canvas, preprocessing_config))
    }

    /// Resize and pad the image to the model input size
    ///
    /// # Errors
    /// - Zero-sized image or model input
    pub fn letterbox(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
        options: &PreprocessingOptions,
    ) -> Result<RgbImage> {
        let [target_height, target_width] = preprocessing_config.target_size;
        let geometry =
            LetterboxGeometry::compute((image.width(), image.height()), (target_width, target_height))?;

        let rgb_image = image.to_rgb8();
        let resized = imageops::resize(
            &rgb_image,
            geometry.scaled_width,
            geometry.scaled_height,
            options.filter,
        );

        let mut canvas =
            ImageBuffer::from_pixel(target_width, target_height, Rgb(options.padding_color));
        imageops::replace(
            &mut canvas,
            &resized,
            i64::from(geometry.offset_x),
            i64::from(geometry.offset_y),
        );
        Ok(canvas)
    }

    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mean = config.normalization_mean;
        let std = config.normalization_std;

        Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, channel, y, x)| {
                let value = canvas.get_pixel(x as u32, y as u32)[channel];
                let (m, s) = match channel {
                    0 => (mean[0], std[0]),
                    1 => (mean[1], std[1]),
                    _ => (mean[2], std[2]),
                };
                (f32::from(value) / 255.0 - m) / s
            },
        )
    }

    /// Map a `1×1×H×W` model output back onto the original image grid
    ///
    /// Values are clamped to 0-1 and scaled to 0-255. Sampling is bilinear
    /// inside the letterboxed region.
    ///
    /// # Errors
    /// - Output tensor is not `1×1×H×W`
    /// - Zero-sized original dimensions
    pub fn tensor_to_mask(
        tensor: &Array4<f32>,
        original_dimensions: (u32, u32),
    ) -> Result<SegmentationMask> {
        let (batch, channels, mask_height, mask_width) = tensor.dim();
        if batch != 1 || channels != 1 || mask_height == 0 || mask_width == 0 {
            return Err(IdPhotoError::processing(format!(
                "Invalid output tensor shape {:?}, expected 1x1xHxW",
                tensor.dim()
            )));
        }

        let geometry = LetterboxGeometry::compute(
            original_dimensions,
            (mask_width as u32, mask_height as u32),
        )?;
        let (orig_width, orig_height) = original_dimensions;

        // Never sample from the padding bars
        let min_x = geometry.offset_x as f32;
        let min_y = geometry.offset_y as f32;
        let max_x = (geometry.offset_x + geometry.scaled_width - 1) as f32;
        let max_y = (geometry.offset_y + geometry.scaled_height - 1) as f32;

        let sample = |tx: f32, ty: f32| -> f32 {
            let tx = tx.clamp(min_x, max_x);
            let ty = ty.clamp(min_y, max_y);
            let (x0, y0) = (tx.floor() as usize, ty.floor() as usize);
            let (x1, y1) = ((x0 + 1).min(mask_width - 1), (y0 + 1).min(mask_height - 1));
            let (fx, fy) = (tx - x0 as f32, ty - y0 as f32);

            let at = |x: usize, y: usize| tensor.get([0, 0, y, x]).copied().unwrap_or(0.0);
            let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
            let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
            top * (1.0 - fy) + bottom * fy
        };

        let mut data = Vec::with_capacity(orig_width as usize * orig_height as usize);
        for y in 0..orig_height {
            let ty = (y as f32 + 0.5) * geometry.scale - 0.5 + geometry.offset_y as f32;
            for x in 0..orig_width {
                let tx = (x as f32 + 0.5) * geometry.scale - 0.5 + geometry.offset_x as f32;
                let value = sample(tx, ty).clamp(0.0, 1.0);
                data.push((value * 255.0).round() as u8);
            }
        }

        Ok(SegmentationMask::new(data, original_dimensions))
    }
}
