//! GeoJSON fragments used as spatial filters.
//!
//! Query parameters carry a GeoJSON document that may be a bare Geometry, a
//! Feature, or a FeatureCollection (of which only the first feature counts).
//! A LineString is not an area, so it is buffered into one before it is used
//! for containment tests.

use geojson::{GeoJson, Geometry, Value};
use thiserror::Error;

use crate::bbox::BoundingBox;

/// Default buffer applied around LineString filters, in meters.
pub const DEFAULT_BUFFER_METERS: f64 = 100.0;

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("Invalid GeoJSON: {0}")]
    InvalidGeoJson(String),

    #[error("GeoJSON document contains no geometry")]
    MissingGeometry,
}

/// A single GeoJSON geometry extracted from a query parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFragment {
    geometry: Geometry,
}

/// Pull the first geometry out of a Geometry, Feature or FeatureCollection.
pub fn extract_first_geometry_fragment(doc: &str) -> Result<GeoFragment, GeometryError> {
    let parsed: GeoJson = doc
        .parse()
        .map_err(|e: geojson::Error| GeometryError::InvalidGeoJson(e.to_string()))?;

    let geometry = match parsed {
        GeoJson::Geometry(geometry) => Some(geometry),
        GeoJson::Feature(feature) => feature.geometry,
        GeoJson::FeatureCollection(collection) => collection
            .features
            .into_iter()
            .next()
            .and_then(|feature| feature.geometry),
    };

    geometry
        .map(|geometry| GeoFragment { geometry })
        .ok_or(GeometryError::MissingGeometry)
}

impl GeoFragment {
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// GeoJSON text of the bare geometry, as fed to `ST_GeomFromGeoJSON`.
    pub fn to_geojson(&self) -> String {
        serde_json::to_string(&self.geometry).unwrap_or_default()
    }

    pub fn is_line(&self) -> bool {
        matches!(self.geometry.value, Value::LineString(_))
    }

    /// Envelope of every position in the geometry.
    pub fn bbox(&self) -> Option<BoundingBox> {
        let mut positions = Vec::new();
        collect_positions(&self.geometry.value, &mut positions);
        BoundingBox::from_points(positions)
    }

    /// Latitude of the first position, used to size line buffers.
    pub fn first_latitude(&self) -> Option<f64> {
        let mut positions = Vec::new();
        collect_positions(&self.geometry.value, &mut positions);
        positions.first().map(|&(_, lat)| lat)
    }
}

fn collect_positions(value: &Value, out: &mut Vec<(f64, f64)>) {
    fn push(position: &[f64], out: &mut Vec<(f64, f64)>) {
        if position.len() >= 2 {
            out.push((position[0], position[1]));
        }
    }

    match value {
        Value::Point(p) => push(p, out),
        Value::MultiPoint(ps) | Value::LineString(ps) => ps.iter().for_each(|p| push(p, out)),
        Value::MultiLineString(lines) | Value::Polygon(lines) => lines
            .iter()
            .flatten()
            .for_each(|p| push(p, out)),
        Value::MultiPolygon(polygons) => polygons
            .iter()
            .flatten()
            .flatten()
            .for_each(|p| push(p, out)),
        Value::GeometryCollection(geometries) => geometries
            .iter()
            .for_each(|g| collect_positions(&g.value, out)),
    }
}

/// Convert a distance in meters to degrees of longitude at `latitude`.
///
/// Longitude degrees shrink towards the poles, so this is the larger of the
/// two per-axis conversions and the resulting buffer never undershoots.
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let scale = latitude.to_radians().cos().max(0.01);
    meters / (METERS_PER_DEGREE * scale)
}

/// A containment filter: rows whose geometry lies within this area match.
#[derive(Debug, Clone, PartialEq)]
pub struct WithinFilter {
    fragment: GeoFragment,
    buffer_degrees: Option<f64>,
}

impl WithinFilter {
    /// Build a filter; LineStrings are buffered by `buffer_meters`.
    pub fn new(fragment: GeoFragment, buffer_meters: f64) -> Self {
        let buffer_degrees = if fragment.is_line() {
            let latitude = fragment.first_latitude().unwrap_or(0.0);
            Some(meters_to_degrees(buffer_meters, latitude))
        } else {
            None
        };

        Self {
            fragment,
            buffer_degrees,
        }
    }

    pub fn fragment(&self) -> &GeoFragment {
        &self.fragment
    }

    /// Buffer distance in degrees, present only for line filters.
    pub fn buffer_degrees(&self) -> Option<f64> {
        self.buffer_degrees
    }

    /// Envelope of the filter area including any buffer.
    pub fn envelope(&self) -> Option<BoundingBox> {
        let bbox = self.fragment.bbox()?;
        Some(match self.buffer_degrees {
            Some(delta) => bbox.expand(delta),
            None => bbox,
        })
    }
}
