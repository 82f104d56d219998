//! Stand-in image for posters that have no baseline yet.
//!
//! The placeholder is dark with large white lettering, so diffing any real
//! poster against it flags nearly every pixel and the missing baseline
//! shows up at the top of the report.

use crate::error::PosterError;
use crate::pipeline::normalize::encode_png;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{DynamicImage, Rgb, RgbImage};

pub const PLACEHOLDER_TEXT: &str = "NO BASELINE FOUND";

const BACKGROUND: Rgb<u8> = Rgb([32, 32, 32]);
const FOREGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const GLYPH_SIZE: u32 = 8;

/// Render the placeholder at `width × height`.
pub fn missing_baseline_image(width: u32, height: u32) -> RgbImage {
    let width = width.max(1);
    let height = height.max(1);
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    let chars = PLACEHOLDER_TEXT.chars().count() as u32;
    let text_units = chars * GLYPH_SIZE;
    // Text spans roughly 80% of the width.
    let scale = (width * 4 / 5 / text_units).max(1);
    let text_w = text_units * scale;
    let text_h = GLYPH_SIZE * scale;
    let x0 = width.saturating_sub(text_w) / 2;
    let y0 = height.saturating_sub(text_h) / 2;

    for (i, ch) in PLACEHOLDER_TEXT.chars().enumerate() {
        let glyph = BASIC_FONTS.get(ch).unwrap_or([0u8; 8]);
        let cx = x0 + i as u32 * GLYPH_SIZE * scale;
        draw_glyph(&mut img, cx, y0, &glyph, scale);
    }
    img
}

/// PNG-encoded [`missing_baseline_image`].
pub fn missing_baseline_png(width: u32, height: u32) -> Result<Vec<u8>, PosterError> {
    encode_png(&DynamicImage::ImageRgb8(missing_baseline_image(width, height)))
}

fn draw_glyph(img: &mut RgbImage, x: u32, y: u32, glyph: &[u8; 8], scale: u32) {
    for (row_idx, row) in glyph.iter().enumerate() {
        for bit in 0..GLYPH_SIZE {
            // font8x8 stores LSB as leftmost pixel
            if (row >> bit) & 1 == 0 {
                continue;
            }
            let px = x + bit * scale;
            let py = y + row_idx as u32 * scale;
            for dy in 0..scale {
                for dx in 0..scale {
                    let (tx, ty) = (px + dx, py + dy);
                    if tx < img.width() && ty < img.height() {
                        img.put_pixel(tx, ty, FOREGROUND);
                    }
                }
            }
        }
    }
}
