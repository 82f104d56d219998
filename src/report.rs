//! HTML report of a compare run.
//!
//! The report is a single self-contained page uploaded next to the diff
//! images under `temp/{build_id}/`, so images are linked by their bare
//! storage key. Only posters with differences are listed, most severe first.

use crate::output::{humanize_count, DiffRecord, RunReport};
use crate::pipeline::fetch::FetchOrigin;
use crate::poster::{PosterDescriptor, PosterFormat};
use htmlize::{escape_attribute, escape_text};
use reqwest::Url;

/// Presentation settings.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Poster designer used for "open in designer" links.
    pub preview_base_url: Url,
    /// Longer side of the embedded diff images.
    pub max_image_dimension: u32,
}

/// Render `report` as an HTML document.
pub fn build(report: &RunReport, options: &ReportOptions) -> Vec<u8> {
    let title = format!("Visual diff report for build {}", report.build_id);
    let description = format!(
        "Visual diff report for build {}. Generated at {}. \
         These temporary reports are cleaned after 14 days.",
        report.build_id,
        report.generated_at.to_rfc3339()
    );
    let differing: Vec<&DiffRecord> = report.differing().collect();

    let mut html = String::with_capacity(4096 + differing.len() * 1024);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", escape_text(&title)));
    html.push_str(&format!(
        "<meta name=\"description\" content=\"{}\">\n",
        escape_attribute(&description)
    ));
    html.push_str(STYLE);
    html.push_str("</head>\n<body>\n");
    html.push_str(&format!("<h1>{}</h1>\n", escape_text(&title)));
    html.push_str(&format!("<p class=\"meta\">{}</p>\n", escape_text(&description)));
    html.push_str(&format!(
        "<p class=\"meta\">{} of {} posters differ from their baseline.</p>\n",
        differing.len(),
        report.records.len()
    ));

    html.push_str("<ol class=\"toc\">\n");
    for record in &differing {
        let stem = record.descriptor.file_stem();
        html.push_str(&format!(
            "<li><a href=\"#{}\">{}</a> ({} differences)</li>\n",
            escape_attribute(&stem),
            escape_text(&record.storage_key()),
            humanize_count(record.difference_count)
        ));
    }
    html.push_str("</ol>\n");

    for record in &differing {
        push_entry(&mut html, record, options);
    }

    html.push_str("</body>\n</html>\n");
    html.into_bytes()
}

fn push_entry(html: &mut String, record: &DiffRecord, options: &ReportOptions) {
    let poster = &record.descriptor;
    let stem = poster.file_stem();
    let designer = designer_url(poster, &options.preview_base_url);

    html.push_str(&format!("<section id=\"{}\">\n", escape_attribute(&stem)));
    html.push_str(&format!("<h2>{}</h2>\n", escape_text(&record.storage_key())));
    html.push_str(&format!(
        "<p>{}</p>\n",
        escape_text(poster.service.explanation())
    ));
    if let Some(note) = format_note(poster.format) {
        html.push_str(&format!("<p class=\"note\">{}</p>\n", escape_text(note)));
    }
    html.push_str(&format!(
        "<p><strong>{} differences</strong> ({:.2}% of {}x{} px){}</p>\n",
        humanize_count(record.difference_count),
        record.severity() * 100.0,
        record.diff_dimensions.width,
        record.diff_dimensions.height,
        if record.baseline_origin == FetchOrigin::FallbackPlaceholder {
            ", no baseline stored yet"
        } else {
            ""
        }
    ));

    html.push_str("<p class=\"links\">");
    html.push_str(&format!(
        "<a href=\"{}\">Open in designer</a> · ",
        escape_attribute(designer.as_str())
    ));
    html.push_str(&format!(
        "<a href=\"{}\">Baseline</a> · ",
        escape_attribute(&record.baseline_source)
    ));
    html.push_str(&format!(
        "<a href=\"{}\">Render request</a>",
        escape_attribute(&record.render_source)
    ));
    html.push_str("</p>\n");

    if let Some(key) = &record.diff_image_ref {
        html.push_str(&format!(
            "<a href=\"{src}\"><img src=\"{src}\" alt=\"diff of {alt}\" \
             style=\"max-width:{max}px;max-height:{max}px\"></a>\n",
            src = escape_attribute(key),
            alt = escape_attribute(&stem),
            max = options.max_image_dimension
        ));
    }
    html.push_str("</section>\n");
}

/// Why a non-PNG poster may look different from what the service sent.
fn format_note(format: PosterFormat) -> Option<&'static str> {
    match format {
        PosterFormat::Png => None,
        PosterFormat::Svg => Some(
            "(Requested as this format and converted to PNG for visual diff. \
             SVG files have wrong fonts, because the fonts are not installed in CI)",
        ),
        PosterFormat::Jpg | PosterFormat::Pdf => {
            Some("(Requested as this format and converted to PNG for visual diff)")
        }
    }
}

/// Designer link that opens the poster with the same parameters.
///
/// The designer's zoom is offset by half a level from the render API's.
pub fn designer_url(poster: &PosterDescriptor, base: &Url) -> Url {
    let mut url = base.clone();
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("lat", &poster.lat.to_string())
        .append_pair("lng", &poster.lng.to_string())
        .append_pair("zoom", &(f64::from(poster.zoom_level) + 0.5).to_string())
        .append_pair("size", &poster.size)
        .append_pair("orientation", poster.orientation.as_str())
        .append_pair("posterStyle", &poster.poster_style)
        .append_pair("mapStyle", &poster.map_style)
        .append_pair("labelsEnabled", &poster.labels_enabled.to_string())
        .append_pair("labelHeader", &poster.label_header)
        .append_pair("labelSmallHeader", &poster.label_small_header)
        .append_pair("labelText", &poster.label_text);
    url
}

const STYLE: &str = r#"<style>
body { font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; margin: 2em; color: #222; }
h1 { font-size: 1.6em; }
h2 { font-size: 1.1em; font-family: monospace; margin-top: 2.5em; }
.meta { color: #666; }
.note { color: #a60; font-size: 0.9em; }
.links a { margin-right: 0.3em; }
img { border: 1px solid #ccc; display: block; margin-top: 0.5em; }
</style>
"#;
