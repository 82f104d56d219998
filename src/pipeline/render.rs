//! Rasterisation of vector and document posters.
//!
//! Both entry points are blocking and CPU heavy. Callers run them inside
//! `tokio::task::spawn_blocking`; pdfium in particular keeps thread-local
//! state and must never run on a Tokio worker thread.
//!
//! Both formats are rasterised at [`PRINT_DPI`] so a poster fetched as SVG
//! or PDF comes out with the same pixel dimensions as its PNG sibling.

use crate::error::PosterError;
use crate::matrix::geo::PRINT_DPI;
use crate::poster::PosterFormat;
use image::{DynamicImage, RgbaImage};
use pdfium_render::prelude::*;
use tracing::debug;

/// CSS pixels per inch, the unit usvg resolves lengths to.
const SVG_USER_DPI: f32 = 96.0;
/// PDF points per inch.
const PDF_POINTS_PER_INCH: f32 = 72.0;

/// Rasterise an SVG document on a white background.
pub fn svg_to_image(bytes: &[u8]) -> Result<DynamicImage, PosterError> {
    let conversion = |detail: String| PosterError::Conversion {
        format: PosterFormat::Svg,
        detail,
    };

    let mut opt = usvg::Options::default();
    opt.fontdb_mut().load_system_fonts();
    let tree = usvg::Tree::from_data(bytes, &opt).map_err(|e| conversion(e.to_string()))?;

    let scale = PRINT_DPI as f32 / SVG_USER_DPI;
    let size = tree.size();
    let width = (size.width() * scale).round().max(1.0) as u32;
    let height = (size.height() * scale).round().max(1.0) as u32;

    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| conversion(format!("cannot allocate {}x{} pixmap", width, height)))?;
    pixmap.fill(tiny_skia::Color::WHITE);
    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(scale, scale),
        &mut pixmap.as_mut(),
    );
    debug!("Rasterised SVG → {}x{} px", width, height);

    // Opaque white background, so premultiplied and straight alpha agree.
    let rgba = RgbaImage::from_raw(width, height, pixmap.take())
        .ok_or_else(|| conversion("pixmap buffer has unexpected length".into()))?;
    Ok(DynamicImage::ImageRgba8(rgba))
}

/// Rasterise the first page of a PDF document.
pub fn pdf_first_page_to_image(bytes: &[u8]) -> Result<DynamicImage, PosterError> {
    let conversion = |detail: String| PosterError::Conversion {
        format: PosterFormat::Pdf,
        detail,
    };

    let pdfium = bind_pdfium().map_err(|e| conversion(format!("libpdfium unavailable: {:?}", e)))?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| conversion(format!("{:?}", e)))?;

    let pages = document.pages();
    let page = pages
        .first()
        .map_err(|e| conversion(format!("document has no pages: {:?}", e)))?;

    let render_config =
        PdfRenderConfig::new().scale_page_by_factor(PRINT_DPI as f32 / PDF_POINTS_PER_INCH);
    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| conversion(format!("{:?}", e)))?;

    let image = bitmap.as_image();
    debug!(
        "Rendered PDF page 1 of {} → {}x{} px",
        pages.len(),
        image.width(),
        image.height()
    );
    Ok(image)
}

/// `PDFIUM_LIB_PATH`, then the working directory, then the system library.
fn bind_pdfium() -> Result<Pdfium, PdfiumError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) => Pdfium::bind_to_library(path)?,
        Err(_) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())?,
    };
    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    const SQUARE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="96" height="48">
        <rect x="0" y="0" width="48" height="48" fill="#ff0000"/>
    </svg>"##;

    #[test]
    fn svg_is_rasterised_at_print_density() {
        let img = svg_to_image(SQUARE_SVG.as_bytes()).unwrap();
        assert_eq!(img.dimensions(), (300, 150));
        // left half red, right half white background
        assert_eq!(img.get_pixel(10, 10).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(290, 140).0, [255, 255, 255, 255]);
    }

    #[test]
    fn broken_svg_is_a_conversion_error() {
        let err = svg_to_image(b"<svg><rect").unwrap_err();
        assert!(matches!(
            err,
            PosterError::Conversion {
                format: PosterFormat::Svg,
                ..
            }
        ));
        assert!(!err.is_retryable());
    }
}
