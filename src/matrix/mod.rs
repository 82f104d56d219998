//! Poster matrix generation.
//!
//! Every service owns a fixed list of [`AxisGroup`]s. A group is expanded by
//! full cartesian product, optionally pruned by its own predicate, and the
//! groups are concatenated in declaration order. Nothing here touches the
//! network, so the same service and options always give the same sequence.
//!
//! ```text
//! service ──▶ axis groups ──▶ cartesian product ──▶ group predicate ──▶ dedupe
//!                                    │
//!                             geo::resolve_dimensions / resolve_bounds
//! ```

pub mod filter;
pub mod geo;
pub mod locations;

use crate::error::SnapshotError;
use crate::poster::{coordinate_label, Orientation, PosterDescriptor, PosterFormat, Service};
use geo::LatLng;
use std::collections::HashSet;
use tracing::debug;

pub use filter::PosterFilter;

/// Stands for [`MatrixOptions::main_location_id`] inside an axis group.
const MAIN: &str = "main";
/// Stands for every location in the catalog.
const ALL_LOCATIONS: &str = "*";

/// Inputs that change the generated matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixOptions {
    /// Location used by groups that only render the "main" location.
    pub main_location_id: String,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self {
            main_location_id: "tokyo_c".to_string(),
        }
    }
}

/// One combinatorial block of parameters.
#[derive(Debug, Clone, Copy)]
pub struct AxisGroup {
    pub poster_styles: &'static [&'static str],
    pub map_styles: &'static [&'static str],
    pub sizes: &'static [&'static str],
    pub orientations: &'static [Orientation],
    /// Location ids, or `"main"` / `"*"`.
    pub locations: &'static [&'static str],
    pub zoom_levels: &'static [u8],
    pub formats: &'static [PosterFormat],
    pub labels: &'static [bool],
    /// Drops generated posters that fail the predicate.
    pub keep: Option<fn(&PosterDescriptor) -> bool>,
}

impl AxisGroup {
    /// Number of posters before the group predicate runs.
    pub fn cardinality(&self, location_count: usize) -> usize {
        self.poster_styles.len()
            * self.map_styles.len()
            * self.sizes.len()
            * self.orientations.len()
            * location_count
            * self.zoom_levels.len()
            * self.formats.len()
            * self.labels.len()
    }
}

const PORTRAIT: &[Orientation] = &[Orientation::Portrait];
const BOTH_ORIENTATIONS: &[Orientation] = &[Orientation::Landscape, Orientation::Portrait];
const PNG: &[PosterFormat] = &[PosterFormat::Png];
const LABELS_ON: &[bool] = &[true];
const LABELS_BOTH: &[bool] = &[true, false];

const RENDER_GROUPS: &[AxisGroup] = &[
    // Every poster style in every size
    AxisGroup {
        poster_styles: &["sharp", "classic", "sans", "bw"],
        map_styles: &["bw"],
        sizes: &[
            "30x40cm",
            "50x70cm",
            "70x100cm",
            "12x18inch",
            "18x24inch",
            "24x36inch",
        ],
        orientations: BOTH_ORIENTATIONS,
        locations: &[MAIN],
        zoom_levels: &[11],
        formats: PNG,
        labels: LABELS_ON,
        keep: None,
    },
    // Output formats
    AxisGroup {
        poster_styles: &["classic"],
        map_styles: &["bw"],
        sizes: &["70x100cm"],
        orientations: PORTRAIT,
        locations: &[MAIN],
        zoom_levels: &[11],
        formats: &[PosterFormat::Pdf, PosterFormat::Png, PosterFormat::Jpg],
        labels: LABELS_BOTH,
        keep: None,
    },
    // SVG is slow to render, keep it to one size
    AxisGroup {
        poster_styles: &["classic"],
        map_styles: &["bw"],
        sizes: &["50x70cm"],
        orientations: PORTRAIT,
        locations: &[MAIN],
        zoom_levels: &[14],
        formats: &[PosterFormat::Svg],
        labels: LABELS_BOTH,
        keep: None,
    },
];

const RENDER_MAP_GROUPS: &[AxisGroup] = &[AxisGroup {
    poster_styles: &["null"],
    map_styles: &[
        "bw",
        "black",
        "gray",
        "petrol",
        "contrast-black",
        "bg-black",
        "bg-sunset",
    ],
    sizes: &["A6"],
    orientations: PORTRAIT,
    locations: &[ALL_LOCATIONS],
    zoom_levels: &[6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16],
    formats: PNG,
    labels: LABELS_ON,
    keep: Some(center_or_close_up),
}];

const TILE_GROUPS: &[AxisGroup] = &[AxisGroup {
    poster_styles: &["bw"],
    map_styles: &["bw", "petrol", "black", "contrast-black"],
    sizes: &["30x40cm"],
    orientations: PORTRAIT,
    locations: &[MAIN],
    zoom_levels: &[11],
    formats: PNG,
    labels: LABELS_ON,
    keep: None,
}];

const PLACEMENT_GROUPS: &[AxisGroup] = &[AxisGroup {
    poster_styles: &["bw"],
    map_styles: &["bw", "black", "petrol"],
    sizes: &["30x40cm"],
    orientations: PORTRAIT,
    locations: &[MAIN],
    zoom_levels: &[11],
    formats: PNG,
    labels: LABELS_ON,
    keep: None,
}];

const TEST_REPORT_GROUPS: &[AxisGroup] = &[AxisGroup {
    poster_styles: &["classic"],
    map_styles: &["bw"],
    sizes: &["30x40cm"],
    orientations: &[Orientation::Portrait, Orientation::Landscape],
    locations: &["hki_c"],
    zoom_levels: &[12],
    formats: PNG,
    labels: LABELS_ON,
    keep: None,
}];

/// Suburbs only get the high zoom levels; wide views of them add nothing
/// the city centers don't already cover.
fn center_or_close_up(poster: &PosterDescriptor) -> bool {
    locations::CENTER_LOCATION_IDS.contains(&poster.location_id.as_str())
        || poster.zoom_level >= 15
}

/// Axis groups of a service.
pub fn axis_groups(service: Service) -> &'static [AxisGroup] {
    match service {
        Service::Render => RENDER_GROUPS,
        Service::RenderMap => RENDER_MAP_GROUPS,
        Service::Tile => TILE_GROUPS,
        Service::Placement => PLACEMENT_GROUPS,
        Service::TestReport => TEST_REPORT_GROUPS,
    }
}

/// Generate the ordered poster matrix of one service.
///
/// Within a group the axes vary in this order, last one fastest: location,
/// labels, format, poster style, map style, size, orientation, zoom.
/// A poster already produced by an earlier group is not repeated.
pub fn generate(
    service: Service,
    options: &MatrixOptions,
) -> Result<Vec<PosterDescriptor>, SnapshotError> {
    let mut seen = HashSet::new();
    let mut posters = Vec::new();

    for group in axis_groups(service) {
        let location_ids = expand_locations(group.locations, options);
        for location_id in &location_ids {
            let location = locations::find(location_id)?;
            for &labels_enabled in group.labels {
                for &format in group.formats {
                    for poster_style in group.poster_styles {
                        for map_style in group.map_styles {
                            for size in group.sizes {
                                for &orientation in group.orientations {
                                    for &zoom_level in group.zoom_levels {
                                        let dims = geo::resolve_dimensions(size, orientation)?;
                                        let center = LatLng {
                                            lat: location.lat,
                                            lng: location.lng,
                                        };
                                        let poster = PosterDescriptor {
                                            service,
                                            location_id: location.id.to_string(),
                                            lat: location.lat,
                                            lng: location.lng,
                                            bounds: geo::resolve_bounds(
                                                center,
                                                zoom_level,
                                                dims.width,
                                                dims.height,
                                            ),
                                            size: size.to_string(),
                                            orientation,
                                            poster_style: poster_style.to_string(),
                                            map_style: map_style.to_string(),
                                            zoom_level,
                                            labels_enabled,
                                            format,
                                            label_text: coordinate_label(location.lat, location.lng),
                                            label_header: location.label_header.to_string(),
                                            label_small_header: location
                                                .label_small_header
                                                .to_string(),
                                            width_px: dims.width,
                                            height_px: dims.height,
                                        };

                                        if group.keep.is_some_and(|keep| !keep(&poster)) {
                                            continue;
                                        }
                                        if seen.insert(poster.storage_key()) {
                                            posters.push(poster);
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    debug!(service = %service, count = posters.len(), "Generated poster matrix");
    Ok(posters)
}

/// Generate the matrices of several services, then apply an `only` filter.
pub fn generate_all(
    services: &[Service],
    options: &MatrixOptions,
    filter: &PosterFilter,
) -> Result<Vec<PosterDescriptor>, SnapshotError> {
    let mut all = Vec::new();
    for (i, &service) in services.iter().enumerate() {
        if services[..i].contains(&service) {
            continue;
        }
        all.extend(generate(service, options)?);
    }
    Ok(filter.apply(all))
}

fn expand_locations(ids: &[&str], options: &MatrixOptions) -> Vec<String> {
    ids.iter()
        .flat_map(|&id| match id {
            MAIN => vec![options.main_location_id.clone()],
            ALL_LOCATIONS => locations::all_ids(),
            other => vec![other.to_string()],
        })
        .collect()
}
