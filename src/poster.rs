//! The poster descriptor: one parameterised render request.
//!
//! A [`PosterDescriptor`] is built once by [`crate::matrix::generate`] and
//! never changes afterwards. Everything downstream (URL construction,
//! storage keys, temp-file names, report entries) is a pure function of it.

use crate::error::SnapshotError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rendering service a poster is requested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    /// `/api/raster/render`: full posters, all output formats.
    Render,
    /// `/api/raster/render-map`: bare map layer at many zoom levels.
    RenderMap,
    /// `/api/raster/render?useTileRender=true`.
    Tile,
    /// Placement service: poster placed into a photo frame.
    Placement,
    /// Tiny matrix for exercising the report itself.
    TestReport,
}

impl Service {
    pub const ALL: [Service; 5] = [
        Service::Render,
        Service::RenderMap,
        Service::Tile,
        Service::Placement,
        Service::TestReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Render => "render",
            Service::RenderMap => "render-map",
            Service::Tile => "tile",
            Service::Placement => "placement",
            Service::TestReport => "test-report",
        }
    }

    /// Human description of the endpoint, shown in the report.
    pub fn explanation(&self) -> &'static str {
        match self {
            Service::Render | Service::TestReport => "/api/raster/render (Render service)",
            Service::Tile => "/api/raster/render?useTileRender=true (Render service)",
            Service::RenderMap => "/api/raster/render-map (Render service)",
            Service::Placement => "/api/place-map (Placement service)",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "render" => Ok(Service::Render),
            "render-map" => Ok(Service::RenderMap),
            "tile" => Ok(Service::Tile),
            // `minimal` was the old name of the placement smoke test.
            "placement" | "minimal" => Ok(Service::Placement),
            "test-report" => Ok(Service::TestReport),
            other => Err(SnapshotError::UnknownService {
                name: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format requested from the rendering service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosterFormat {
    Png,
    Jpg,
    Svg,
    Pdf,
}

impl PosterFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PosterFormat::Png => "png",
            PosterFormat::Jpg => "jpg",
            PosterFormat::Svg => "svg",
            PosterFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for PosterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geographic bounding box of a poster's map area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatLngBounds {
    pub sw_lat: f64,
    pub sw_lng: f64,
    pub ne_lat: f64,
    pub ne_lng: f64,
}

/// One visual-regression test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosterDescriptor {
    pub service: Service,
    pub location_id: String,
    pub lat: f64,
    pub lng: f64,
    pub bounds: LatLngBounds,
    /// Physical size token, e.g. `30x40cm`, `12x18inch` or `A6`.
    pub size: String,
    pub orientation: Orientation,
    pub poster_style: String,
    pub map_style: String,
    pub zoom_level: u8,
    pub labels_enabled: bool,
    pub format: PosterFormat,
    pub label_text: String,
    pub label_header: String,
    pub label_small_header: String,
    /// Expected print width at the fixed DPI.
    pub width_px: u32,
    /// Expected print height at the fixed DPI.
    pub height_px: u32,
}

impl PosterDescriptor {
    /// Deterministic object key shared by baselines, diff artifacts and temp files.
    ///
    /// `{service}-{locationId}-{size}-{posterStyle}-{mapStyle}-{orientation}-z{zoom}-L{0|1}-{format}.png`
    pub fn storage_key(&self) -> String {
        format!("{}.png", self.file_stem())
    }

    /// [`Self::storage_key`] without the `.png` extension.
    pub fn file_stem(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}-{}-z{}-L{}-{}",
            self.service,
            self.location_id,
            self.size,
            self.poster_style,
            self.map_style,
            self.orientation,
            self.zoom_level,
            u8::from(self.labels_enabled),
            self.format,
        )
    }

    /// Request parameters every rendering service understands, in a fixed order.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("locationId", self.location_id.clone()),
            ("lat", self.lat.to_string()),
            ("lng", self.lng.to_string()),
            ("swLat", self.bounds.sw_lat.to_string()),
            ("swLng", self.bounds.sw_lng.to_string()),
            ("neLat", self.bounds.ne_lat.to_string()),
            ("neLng", self.bounds.ne_lng.to_string()),
            ("size", self.size.clone()),
            ("orientation", self.orientation.to_string()),
            ("posterStyle", self.poster_style.clone()),
            ("mapStyle", self.map_style.clone()),
            ("zoomLevel", self.zoom_level.to_string()),
            ("labelsEnabled", self.labels_enabled.to_string()),
            ("format", self.format.to_string()),
            ("labelText", self.label_text.clone()),
            ("labelHeader", self.label_header.clone()),
            ("labelSmallHeader", self.label_small_header.clone()),
        ]
    }

    /// Value of a named descriptor field as text, for `only` filters.
    ///
    /// Accepts the camelCase names used in query strings.
    pub fn field(&self, name: &str) -> Option<String> {
        let value = match name {
            "service" => self.service.to_string(),
            "locationId" => self.location_id.clone(),
            "lat" => self.lat.to_string(),
            "lng" => self.lng.to_string(),
            "size" => self.size.clone(),
            "orientation" => self.orientation.to_string(),
            "posterStyle" => self.poster_style.clone(),
            "mapStyle" => self.map_style.clone(),
            "zoomLevel" => self.zoom_level.to_string(),
            "labelsEnabled" => self.labels_enabled.to_string(),
            "format" => self.format.to_string(),
            "labelText" => self.label_text.clone(),
            "labelHeader" => self.label_header.clone(),
            "labelSmallHeader" => self.label_small_header.clone(),
            _ => return None,
        };
        Some(value)
    }

    /// Field names understood by [`Self::field`].
    pub const FIELD_NAMES: [&'static str; 14] = [
        "service",
        "locationId",
        "lat",
        "lng",
        "size",
        "orientation",
        "posterStyle",
        "mapStyle",
        "zoomLevel",
        "labelsEnabled",
        "format",
        "labelText",
        "labelHeader",
        "labelSmallHeader",
    ];
}

/// Pretty coordinate label, e.g. `60.170°N / 24.940°E`.
pub fn coordinate_label(lat: f64, lng: f64) -> String {
    let ns = if lat > 0.0 { 'N' } else { 'S' };
    let ew = if lng > 0.0 { 'E' } else { 'W' };
    format!("{:.3}°{} / {:.3}°{}", lat.abs(), ns, lng.abs(), ew)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample() -> PosterDescriptor {
        PosterDescriptor {
            service: Service::Tile,
            location_id: "hki_c".into(),
            lat: 60.1697,
            lng: 24.9397,
            bounds: LatLngBounds {
                sw_lat: 60.0,
                sw_lng: 24.8,
                ne_lat: 60.3,
                ne_lng: 25.1,
            },
            size: "30x40cm".into(),
            orientation: Orientation::Portrait,
            poster_style: "bw".into(),
            map_style: "petrol".into(),
            zoom_level: 11,
            labels_enabled: true,
            format: PosterFormat::Png,
            label_text: coordinate_label(60.1697, 24.9397),
            label_header: "Helsinki".into(),
            label_small_header: "Finland".into(),
            width_px: 3543,
            height_px: 4724,
        }
    }

    #[test]
    fn storage_key_layout() {
        assert_eq!(
            sample().storage_key(),
            "tile-hki_c-30x40cm-bw-petrol-portrait-z11-L1-png.png"
        );
    }

    #[test]
    fn storage_key_changes_with_every_identity_axis() {
        let base = sample();
        let base_key = base.storage_key();
        let variants: Vec<Box<dyn Fn(&mut PosterDescriptor)>> = vec![
            Box::new(|p| p.service = Service::Render),
            Box::new(|p| p.location_id = "tokyo_c".into()),
            Box::new(|p| p.size = "50x70cm".into()),
            Box::new(|p| p.orientation = Orientation::Landscape),
            Box::new(|p| p.poster_style = "sans".into()),
            Box::new(|p| p.map_style = "black".into()),
            Box::new(|p| p.zoom_level = 12),
            Box::new(|p| p.labels_enabled = false),
            Box::new(|p| p.format = PosterFormat::Pdf),
        ];
        for change in variants {
            let mut other = base.clone();
            change(&mut other);
            assert_ne!(other.storage_key(), base_key);
        }
    }

    #[test]
    fn service_names_round_trip() {
        for service in Service::ALL {
            assert_eq!(service.as_str().parse::<Service>().unwrap(), service);
        }
        assert_eq!("minimal".parse::<Service>().unwrap(), Service::Placement);
        let err = "gallery".parse::<Service>().unwrap_err();
        assert!(matches!(err, SnapshotError::UnknownService { .. }));
    }

    #[test]
    fn coordinate_label_hemispheres() {
        assert_eq!(coordinate_label(35.68, 139.76), "35.680°N / 139.760°E");
        assert_eq!(coordinate_label(-53.628, -72.736), "53.628°S / 72.736°W");
    }

    #[test]
    fn every_field_name_resolves() {
        let p = sample();
        for name in PosterDescriptor::FIELD_NAMES {
            assert!(p.field(name).is_some(), "{name}");
        }
        assert_eq!(p.field("mapStyle").as_deref(), Some("petrol"));
        assert!(p.field("apiKey").is_none());
    }
}
