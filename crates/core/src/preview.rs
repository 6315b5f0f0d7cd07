//! Watermarked preview rendering.
//!
//! The preview is a pure function of the HD source bytes: the image is
//! decoded, downscaled to a bounded dimension, overlaid with translucent
//! diagonal bands, and re-encoded as PNG. Identical input bytes always
//! produce identical output bytes (fixed filter, fixed encoder settings),
//! so callers can apply time-bounded HTTP caching without a server-side
//! cache. The HD source is never modified.

use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};

/// Parameters controlling preview size and watermark geometry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreviewOptions {
    /// Longest edge of the rendered preview, in pixels.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    /// Distance between diagonal watermark bands, in pixels.
    #[serde(default = "default_band_period")]
    pub band_period: u32,
    /// Width of each watermark band, in pixels.
    #[serde(default = "default_band_width")]
    pub band_width: u32,
    /// Band opacity, 0 (invisible) to 255 (solid white).
    #[serde(default = "default_band_alpha")]
    pub band_alpha: u8,
}

fn default_max_dimension() -> u32 {
    512
}

fn default_band_period() -> u32 {
    48
}

fn default_band_width() -> u32 {
    10
}

fn default_band_alpha() -> u8 {
    96
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
            band_period: default_band_period(),
            band_width: default_band_width(),
            band_alpha: default_band_alpha(),
        }
    }
}

/// Render a watermarked preview from HD artifact bytes.
///
/// Accepts any format the `image` crate can sniff (PNG/JPEG in this build)
/// and always emits PNG. No payment state is consulted here: previews are
/// the pre-purchase teaser and remain servable to unpaid viewers.
pub fn render_preview(hd_bytes: &[u8], opts: &PreviewOptions) -> crate::Result<Vec<u8>> {
    let img = image::load_from_memory(hd_bytes)
        .map_err(|e| crate::Error::PreviewRender(format!("decode failed: {e}")))?;

    let scaled = if img.width().max(img.height()) > opts.max_dimension {
        // Triangle is a fixed, deterministic filter; resize preserves aspect.
        img.resize(opts.max_dimension, opts.max_dimension, FilterType::Triangle)
    } else {
        img
    };

    let mut canvas: RgbaImage = scaled.to_rgba8();
    apply_bands(&mut canvas, opts);

    let (width, height) = canvas.dimensions();
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(canvas.as_raw(), width, height, ExtendedColorType::Rgba8)
        .map_err(|e| crate::Error::PreviewRender(format!("encode failed: {e}")))?;
    Ok(out)
}

/// Blend diagonal white bands over the canvas in place.
fn apply_bands(canvas: &mut RgbaImage, opts: &PreviewOptions) {
    let period = opts.band_period.max(2);
    let width = opts.band_width.min(period - 1).max(1);
    let alpha = u32::from(opts.band_alpha);

    for (x, y, px) in canvas.enumerate_pixels_mut() {
        if (x + y) % period < width {
            for channel in px.0.iter_mut().take(3) {
                let c = u32::from(*channel);
                *channel = (c + (255 - c) * alpha / 255) as u8;
            }
        }
    }
}
