//! Cover-fit composition onto a fixed-size ID photo canvas
//!
//! The foreground is scaled so it covers the whole canvas (never letterboxed),
//! centered horizontally and vertically, and pasted with its own alpha as the
//! mask. Layout arithmetic is exact integer math: the aspect comparison
//! `fw/fh > cw/ch` is evaluated as `fw·ch > cw·fh` and the rounded division as
//! `(2a + b) / 2b`, so equal ratios and near-ties always take the same branch.
//!
//! The vertical paste offset is clamped to zero, which keeps the top of a tall
//! portrait (the head) in frame. The horizontal offset is left unclamped so a
//! wide image stays centered.
//!
//! When the full cover-fit resize would exceed [`MAX_RESIZE_DIMENSION`], only
//! the part of the foreground that lands on the canvas is cropped and resized.
//! The output is still exactly the canvas size.

use crate::{
    config::{Background, OutputFormat, SizePreset},
    error::{IdPhotoError, Result},
    services::ImageCodec,
};
use image::{imageops, DynamicImage, Rgb, Rgba, RgbaImage};
use tracing::instrument;

/// Largest side the foreground is resized to in one piece
///
/// Beyond this only the visible region is resized, extreme aspect ratios would
/// otherwise ask for multi-gigabyte buffers.
pub const MAX_RESIZE_DIMENSION: u32 = 16_384;

/// Lanczos3 support radius in destination pixels
const FILTER_RADIUS: u64 = 3;

/// Where and how large the foreground lands on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverLayout {
    pub new_width: u32,
    pub new_height: u32,
    pub paste_x: i64,
    pub paste_y: i64,
}

impl CoverLayout {
    /// Compute the cover-fit layout of a `(width, height)` foreground on a
    /// `(width, height)` canvas
    ///
    /// Guarantees `new_width >= canvas width` and `new_height >= canvas height`.
    ///
    /// # Errors
    /// - Any dimension is zero
    pub fn compute(foreground: (u32, u32), canvas: (u32, u32)) -> Result<Self> {
        let (fw, fh) = (u64::from(foreground.0), u64::from(foreground.1));
        let (cw, ch) = (u64::from(canvas.0), u64::from(canvas.1));

        if fw == 0 || fh == 0 || cw == 0 || ch == 0 {
            return Err(IdPhotoError::processing_stage_error(
                "composition",
                "foreground and canvas dimensions must be non-zero",
                Some(&format!("foreground {fw}x{fh}, canvas {cw}x{ch}")),
            ));
        }

        let (new_width, new_height) = if fw * ch > cw * fh {
            // Proportionally wider than the canvas: match heights
            (round_div(ch * fw, fh), ch)
        } else {
            (cw, round_div(cw * fh, fw))
        };

        let paste_x = floor_half(cw as i64 - new_width as i64);
        let paste_y = floor_half(ch as i64 - new_height as i64).max(0);

        Ok(Self {
            new_width: saturate_u32(new_width),
            new_height: saturate_u32(new_height),
            paste_x,
            paste_y,
        })
    }

    /// Whether the whole resized foreground fits within [`MAX_RESIZE_DIMENSION`]
    #[must_use]
    pub fn is_within_limits(&self) -> bool {
        self.new_width <= MAX_RESIZE_DIMENSION && self.new_height <= MAX_RESIZE_DIMENSION
    }
}

/// `round(a / b)` with halves rounded up
fn round_div(a: u64, b: u64) -> u64 {
    (2 * a + b) / (2 * b)
}

/// `floor(value / 2)`, rounding toward negative infinity
fn floor_half(value: i64) -> i64 {
    value.div_euclid(2)
}

fn saturate_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Crop the source region that ends up on the canvas and resize just that
///
/// Returns the resized piece and where it goes on the canvas. The crop keeps
/// a margin around the visible window so the filter sees the same neighbours
/// as in a full resize.
fn resize_visible(
    foreground: &RgbaImage,
    layout: &CoverLayout,
    canvas: (u32, u32),
) -> (RgbaImage, i64, i64) {
    let (fw, fh) = (u64::from(foreground.width()), u64::from(foreground.height()));
    let (nw, nh) = (u64::from(layout.new_width), u64::from(layout.new_height));

    // Visible window in resized coordinates
    let visible_start = |offset: i64, extent: u64| {
        if offset < 0 {
            offset.unsigned_abs().min(extent)
        } else {
            0
        }
    };
    let x0 = visible_start(layout.paste_x, nw);
    let y0 = visible_start(layout.paste_y, nh);
    let x1 = (x0 + u64::from(canvas.0)).min(nw);
    let y1 = (y0 + u64::from(canvas.1)).min(nh);

    let (sx0, sx1) = source_span(x0, x1, fw, nw);
    let (sy0, sy1) = source_span(y0, y1, fh, nh);

    let crop = imageops::crop_imm(
        foreground,
        saturate_u32(sx0),
        saturate_u32(sy0),
        saturate_u32(sx1 - sx0),
        saturate_u32(sy1 - sy0),
    )
    .to_image();

    let width = round_div((sx1 - sx0) * nw, fw).max(1);
    let height = round_div((sy1 - sy0) * nh, fh).max(1);
    let resized = imageops::resize(
        &crop,
        saturate_u32(width),
        saturate_u32(height),
        imageops::FilterType::Lanczos3,
    );

    let paste_x = layout.paste_x + round_div(sx0 * nw, fw) as i64;
    let paste_y = layout.paste_y + round_div(sy0 * nh, fh) as i64;
    (resized, paste_x, paste_y)
}

/// Source pixels covering `[start, end)` of an axis resized from `source` to
/// `resized`, widened by the filter support
fn source_span(start: u64, end: u64, source: u64, resized: u64) -> (u64, u64) {
    let margin = (FILTER_RADIUS * source).div_ceil(resized).max(FILTER_RADIUS) + 1;
    let first = (start * source / resized).saturating_sub(margin);
    let last = (end * source).div_ceil(resized).saturating_add(margin).min(source);
    (first, last.max(first + 1).min(source))
}

/// Places a foreground on an ID photo canvas and encodes the result
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    jpeg_quality: u8,
}

impl Default for Compositor {
    fn default() -> Self {
        Self { jpeg_quality: 100 }
    }
}

impl Compositor {
    #[must_use]
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    #[must_use]
    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// Composite the foreground onto a `canvas` sized image
    ///
    /// With a fill color the result is opaque RGB. Without one it is RGBA and
    /// everything outside the subject stays transparent.
    ///
    /// # Errors
    /// - Zero dimensions
    #[instrument(level = "debug", skip(self, foreground), fields(foreground = ?foreground.dimensions()))]
    pub fn compose(
        &self,
        foreground: &RgbaImage,
        canvas: (u32, u32),
        fill: Option<Rgb<u8>>,
    ) -> Result<DynamicImage> {
        let layout = CoverLayout::compute(foreground.dimensions(), canvas)?;
        tracing::debug!(?layout, "cover layout");

        let (resized, paste_x, paste_y) = if layout.is_within_limits() {
            let resized = imageops::resize(
                foreground,
                layout.new_width,
                layout.new_height,
                imageops::FilterType::Lanczos3,
            );
            (resized, layout.paste_x, layout.paste_y)
        } else {
            tracing::debug!("resized foreground too large, resizing the visible region only");
            resize_visible(foreground, &layout, canvas)
        };

        let (canvas_width, canvas_height) = canvas;
        let base = match fill {
            Some(Rgb([r, g, b])) => Rgba([r, g, b, 255]),
            None => Rgba([0, 0, 0, 0]),
        };
        let mut output = RgbaImage::from_pixel(canvas_width, canvas_height, base);
        imageops::overlay(&mut output, &resized, paste_x, paste_y);

        Ok(match fill {
            Some(_) => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(output).to_rgb8()),
            None => DynamicImage::ImageRgba8(output),
        })
    }

    /// Composite for a preset and background choice
    ///
    /// # Errors
    /// - See [`Compositor::compose`]
    pub fn compose_preset(
        &self,
        foreground: &RgbaImage,
        preset: SizePreset,
        background: Background,
    ) -> Result<DynamicImage> {
        self.compose(foreground, preset.dimensions(), background.color())
    }

    /// Encode a composed image in the format the background calls for
    ///
    /// # Errors
    /// - Encoder failures
    pub fn encode(&self, image: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>> {
        ImageCodec::encode(image, format, self.jpeg_quality)
    }

    /// Compose and encode in one step
    ///
    /// # Errors
    /// - See [`Compositor::compose`] and [`Compositor::encode`]
    pub fn render(
        &self,
        foreground: &RgbaImage,
        preset: SizePreset,
        background: Background,
    ) -> Result<Vec<u8>> {
        let image = self.compose_preset(foreground, preset, background)?;
        self.encode(&image, background.output_format())
    }
}
