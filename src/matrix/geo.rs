//! Print size and map-bounds resolution.
//!
//! Pixel dimensions are what the render service produces when printing at
//! [`PRINT_DPI`]. Bounds use the slippy-map pixel space of 256 px tiles
//! (spherical Mercator). The projection is kept in floating point so a
//! center projected and inverted at the same zoom comes back unchanged.

use crate::error::SnapshotError;
use crate::poster::{LatLngBounds, Orientation};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Resolution the render service prints at.
pub const PRINT_DPI: f64 = 300.0;

const ONE_CM_IN_INCH: f64 = 0.393_700_787;
const TILE_SIZE: f64 = 256.0;
// Mercator blows up at the poles; clamp like the tile servers do.
const MAX_SIN_LAT: f64 = 0.9999;

/// Named paper sizes in inches, portrait.
const SIZES_IN_INCHES: [(&str, f64, f64); 4] = [
    ("A6", 4.1, 5.8),
    ("A5", 5.8, 8.3),
    ("A4", 8.3, 11.7),
    ("A3", 11.7, 16.5),
];

static RE_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)x([0-9]+)(cm|inch)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelDimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Pixel dimensions of a print size at [`PRINT_DPI`].
///
/// Size tokens describe the portrait sheet; landscape swaps the two sides.
pub fn resolve_dimensions(
    size: &str,
    orientation: Orientation,
) -> Result<PixelDimensions, SnapshotError> {
    let (width_inch, height_inch) = size_in_inches(size)?;
    let portrait = PixelDimensions {
        width: inches_to_px(width_inch),
        height: inches_to_px(height_inch),
    };

    Ok(match orientation {
        Orientation::Portrait => portrait,
        Orientation::Landscape => PixelDimensions {
            width: portrait.height,
            height: portrait.width,
        },
    })
}

fn size_in_inches(size: &str) -> Result<(f64, f64), SnapshotError> {
    if let Some((_, w, h)) = SIZES_IN_INCHES.iter().find(|(name, _, _)| *name == size) {
        return Ok((*w, *h));
    }

    let caps = RE_SIZE
        .captures(size)
        .ok_or_else(|| SnapshotError::InvalidSizeFormat {
            size: size.to_string(),
        })?;
    let parse = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| SnapshotError::InvalidSizeFormat {
                size: size.to_string(),
            })
    };
    let width = parse(&caps[1])?;
    let height = parse(&caps[2])?;

    if &caps[3] == "cm" {
        Ok((width * ONE_CM_IN_INCH, height * ONE_CM_IN_INCH))
    } else {
        Ok((width, height))
    }
}

fn inches_to_px(inches: f64) -> u32 {
    (inches * PRINT_DPI).round() as u32
}

/// Corners of a viewport of `width_px × height_px` centered on `center`.
pub fn resolve_bounds(center: LatLng, zoom: u8, width_px: u32, height_px: u32) -> LatLngBounds {
    let (cx, cy) = project(center, zoom);
    let half_w = f64::from(width_px) / 2.0;
    let half_h = f64::from(height_px) / 2.0;

    // Pixel y grows southwards.
    let sw = unproject(cx - half_w, cy + half_h, zoom);
    let ne = unproject(cx + half_w, cy - half_h, zoom);

    LatLngBounds {
        sw_lat: sw.lat,
        sw_lng: sw.lng,
        ne_lat: ne.lat,
        ne_lng: ne.lng,
    }
}

fn world_size(zoom: u8) -> f64 {
    TILE_SIZE * 2f64.powi(i32::from(zoom))
}

/// Project to world pixel coordinates at `zoom`.
pub fn project(point: LatLng, zoom: u8) -> (f64, f64) {
    let size = world_size(zoom);
    let half = size / 2.0;
    let sin_lat = point.lat.to_radians().sin().clamp(-MAX_SIN_LAT, MAX_SIN_LAT);

    let x = half + point.lng * (size / 360.0);
    let y = half - 0.5 * ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() * (size / (2.0 * PI));
    (x, y)
}

/// Inverse of [`project`].
pub fn unproject(x: f64, y: f64, zoom: u8) -> LatLng {
    let size = world_size(zoom);
    let half = size / 2.0;

    let g = (y - half) / -(size / (2.0 * PI));
    LatLng {
        lat: (2.0 * g.exp().atan() - 0.5 * PI).to_degrees(),
        lng: (x - half) / (size / 360.0),
    }
}
