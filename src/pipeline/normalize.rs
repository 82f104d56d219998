//! Format normalisation: every poster becomes a PNG before it is stored or
//! diffed.
//!
//! The declared format is what we asked the service for. It is checked
//! against the bytes actually returned, because a render service under load
//! has been seen to answer a JPEG request with a PNG error page, and a
//! silently accepted wrong format would poison the baseline.
//!
//! ```text
//! png ─────────────────────────────▶ (unchanged)
//! jpg ── decode ── encode ─────────▶ png
//! svg ── resvg @ PRINT_DPI ────────▶ png
//! pdf ── pdfium page 1 @ PRINT_DPI ▶ png
//! ```
//!
//! All functions here are blocking.

use crate::error::PosterError;
use crate::pipeline::render;
use crate::poster::PosterFormat;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::debug;

/// Convert a fetched poster to canonical PNG bytes.
pub fn to_canonical_png(bytes: &[u8], declared: PosterFormat) -> Result<Vec<u8>, PosterError> {
    let detected = detect_format(bytes);
    if detected != declared.as_str() {
        return Err(PosterError::FormatMismatch {
            declared,
            detected,
        });
    }

    match declared {
        PosterFormat::Png => Ok(bytes.to_vec()),
        PosterFormat::Jpg => {
            let img = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
            encode_png(&img)
        }
        PosterFormat::Svg => encode_png(&render::svg_to_image(bytes)?),
        PosterFormat::Pdf => encode_png(&render::pdf_first_page_to_image(bytes)?),
    }
}

/// Best guess of what `bytes` contain: `png`, `jpg`, `svg`, `pdf`, another
/// raster format name, or `unknown`.
pub fn detect_format(bytes: &[u8]) -> String {
    if bytes.starts_with(b"%PDF") {
        return "pdf".into();
    }
    if looks_like_svg(bytes) {
        return "svg".into();
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "png".into(),
        Ok(ImageFormat::Jpeg) => "jpg".into(),
        Ok(other) => other
            .extensions_str()
            .first()
            .map_or_else(|| format!("{:?}", other).to_lowercase(), |ext| ext.to_string()),
        Err(_) => "unknown".into(),
    }
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    (text.starts_with("<svg") || text.starts_with("<?xml") || text.starts_with("<!DOCTYPE svg"))
        && text.contains("<svg")
}

/// Scale the longer side down to `max_dimension`, preserving aspect ratio.
///
/// Never upscales. Input already within bounds is returned unchanged.
pub fn resize_bounded(png: &[u8], max_dimension: u32) -> Result<Vec<u8>, PosterError> {
    let (width, height) = png_dimensions(png)?;
    if width.max(height) <= max_dimension {
        return Ok(png.to_vec());
    }

    let img = decode_png(png)?;
    let resized = img.resize(max_dimension, max_dimension, FilterType::Lanczos3);
    debug!(
        "Resized {}x{} → {}x{}",
        width,
        height,
        resized.width(),
        resized.height()
    );
    encode_png(&resized)
}

/// Scale to exactly `width × height`, ignoring aspect ratio.
pub fn resize_exact(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if img.width() == width && img.height() == height {
        return img.clone();
    }
    img.resize_exact(width, height, FilterType::Triangle)
}

/// Read dimensions from the PNG header without decoding pixels.
pub fn png_dimensions(png: &[u8]) -> Result<(u32, u32), PosterError> {
    Ok(ImageReader::with_format(Cursor::new(png), ImageFormat::Png).into_dimensions()?)
}

pub fn decode_png(png: &[u8]) -> Result<DynamicImage, PosterError> {
    Ok(image::load_from_memory_with_format(png, ImageFormat::Png)?)
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, PosterError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}
