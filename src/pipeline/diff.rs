//! Pixel difference between a baseline and a fresh render.
//!
//! A pixel counts as different when any RGBA channel moves by more than
//! `pixel_tolerance`. The visualisation keeps a faded copy of the baseline
//! for context and paints differing pixels solid red.

use crate::error::PosterError;
use crate::pipeline::normalize::encode_png;
use image::{DynamicImage, Rgba, RgbaImage};

/// Knobs for [`diff`].
///
/// Inverting a channel `c` moves it by `|255 - 2c|`, so with a tolerance of
/// `t` an image diffed against its inverted copy counts every pixel except
/// those whose colour channels all lie within `t / 2` of mid-grey (124..=131
/// for the default of 8). That count is the engine's maximum for the image;
/// [`DiffOptions::exact`] lowers the tolerance to 0 so it equals the total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffOptions {
    /// Percentage of total pixels allowed to differ before the pair fails.
    pub threshold_percent: f64,
    /// Largest per-channel change still treated as equal (anti-aliasing noise).
    pub pixel_tolerance: u8,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            threshold_percent: 0.01,
            pixel_tolerance: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiffOutcome {
    /// Raw count, reported regardless of the threshold.
    pub difference_count: u64,
    pub total_pixels: u64,
    /// `difference_count` is within `threshold_percent` of `total_pixels`.
    pub passed: bool,
    pub width: u32,
    pub height: u32,
    /// PNG visualisation, same size as the inputs.
    pub diff_image: Vec<u8>,
}

impl DiffOutcome {
    pub fn ratio(&self) -> f64 {
        if self.total_pixels == 0 {
            0.0
        } else {
            self.difference_count as f64 / self.total_pixels as f64
        }
    }
}

impl DiffOptions {
    /// Every channel change counts.
    pub fn exact() -> Self {
        Self {
            pixel_tolerance: 0,
            ..Self::default()
        }
    }
}

/// Compare two images of identical dimensions.
pub fn diff(
    baseline: &DynamicImage,
    current: &DynamicImage,
    options: DiffOptions,
) -> Result<DiffOutcome, PosterError> {
    if baseline.width() != current.width() || baseline.height() != current.height() {
        return Err(PosterError::Image(format!(
            "cannot diff {}x{} against {}x{}",
            baseline.width(),
            baseline.height(),
            current.width(),
            current.height()
        )));
    }

    let a = baseline.to_rgba8();
    let b = current.to_rgba8();
    let (width, height) = a.dimensions();
    let mut out = RgbaImage::new(width, height);
    let mut difference_count = 0u64;

    for ((pa, pb), po) in a.pixels().zip(b.pixels()).zip(out.pixels_mut()) {
        let differs = pa
            .0
            .iter()
            .zip(pb.0.iter())
            .any(|(x, y)| x.abs_diff(*y) > options.pixel_tolerance);

        *po = if differs {
            difference_count += 1;
            Rgba([255, 0, 0, 255])
        } else {
            fade(pa)
        };
    }

    let total_pixels = u64::from(width) * u64::from(height);
    let allowed = total_pixels as f64 * options.threshold_percent / 100.0;

    Ok(DiffOutcome {
        difference_count,
        total_pixels,
        passed: difference_count as f64 <= allowed,
        width,
        height,
        diff_image: encode_png(&DynamicImage::ImageRgba8(out))?,
    })
}

/// Blend towards white so red highlights stand out.
fn fade(p: &Rgba<u8>) -> Rgba<u8> {
    let [r, g, b, _] = p.0;
    let f = |c: u8| 255 - (255 - c) / 4;
    Rgba([f(r), f(g), f(b), 255])
}
