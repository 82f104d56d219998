//! Catalog of test locations.
//!
//! Keep in mind that some really large cities can look bad even when
//! Helsinki looks fine, so the catalog mixes dense and sparse areas.

use crate::error::SnapshotError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub id: &'static str,
    pub lat: f64,
    pub lng: f64,
    pub label_header: &'static str,
    pub label_small_header: &'static str,
}

pub const LOCATIONS: [Location; 5] = [
    // Helsinki city center
    Location {
        id: "hki_c",
        lat: 60.1697,
        lng: 24.9397,
        label_header: "Helsinki",
        label_small_header: "Finland",
    },
    // Bridge at Lauttasaari
    Location {
        id: "hki_la",
        lat: 60.1654,
        lng: 24.8972,
        label_header: "00200",
        label_small_header: "Finland",
    },
    // Large cross-road at a motorway
    Location {
        id: "hki_lab",
        lat: 60.2878,
        lng: 24.9810,
        label_header: "00200",
        label_small_header: "Finland",
    },
    // Small block at Nurmijärvi
    Location {
        id: "nrjvi",
        lat: 60.4718,
        lng: 24.8125,
        label_header: "Nurmijärvi",
        label_small_header: "Finland",
    },
    // Tokyo, a super crowded map
    Location {
        id: "tokyo_c",
        lat: 35.68,
        lng: 139.76,
        label_header: "東京都",
        label_small_header: "Tōkyō-to",
    },
];

/// Locations whose low zoom levels are worth rendering.
pub const CENTER_LOCATION_IDS: [&str; 2] = ["hki_c", "tokyo_c"];

pub fn find(id: &str) -> Result<&'static Location, SnapshotError> {
    LOCATIONS
        .iter()
        .find(|l| l.id == id)
        .ok_or_else(|| SnapshotError::UnknownLocation { id: id.to_string() })
}

pub fn all_ids() -> Vec<String> {
    LOCATIONS.iter().map(|l| l.id.to_string()).collect()
}
