//! Region geometry: tagged Polygon/MultiPolygon shapes, bounding boxes and
//! ray-casting containment.
//!
//! Vertices are stored as `geo_types::Coord { x: lng, y: lat }`. Only outer
//! rings take part in containment; inner rings are kept for round-tripping.

use geo::BoundingRect;
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

use crate::core::types::LatLng;

/// Region shape as imported from GeoJSON-style `{type, coordinates}` records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "GeoJsonGeometry", into = "GeoJsonGeometry")]
pub enum Geometry {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
    /// Any other GeoJSON type. Never contains a point.
    Unsupported { kind: String },
}

impl Geometry {
    /// Build a single-ring polygon from `[lng, lat]` vertices
    pub fn polygon(vertices: &[[f64; 2]]) -> Self {
        Geometry::Polygon(Polygon::new(ring_from_positions(vertices), vec![]))
    }

    /// Axis-aligned rectangle, handy for fixtures and tile bounds
    pub fn rectangle(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Self {
        Self::polygon(&[
            [min_lng, min_lat],
            [max_lng, min_lat],
            [max_lng, max_lat],
            [min_lng, max_lat],
            [min_lng, min_lat],
        ])
    }

    /// Polygons whose outer ring is usable for containment
    pub fn parts(&self) -> Vec<&Polygon<f64>> {
        match self {
            Geometry::Polygon(p) => vec![p],
            Geometry::MultiPolygon(mp) => mp.0.iter().collect(),
            Geometry::Unsupported { .. } => Vec::new(),
        }
    }

    /// A Polygon/MultiPolygon with no outer ring of at least three vertices.
    ///
    /// Unsupported geometries are not degenerate: they are well-formed shapes
    /// of a type the containment test refuses.
    pub fn is_degenerate(&self) -> bool {
        match self {
            Geometry::Unsupported { .. } => false,
            _ => !self.parts().iter().any(|p| is_usable_ring(p.exterior())),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Geometry::Unsupported { .. })
    }

    /// Bounding box enclosing every vertex, `None` when nothing is usable
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        if self.is_degenerate() {
            return None;
        }
        let rect = match self {
            Geometry::Polygon(p) => p.bounding_rect(),
            Geometry::MultiPolygon(mp) => mp.bounding_rect(),
            Geometry::Unsupported { .. } => None,
        }?;
        Some(BoundingBox {
            min_lat: rect.min().y,
            max_lat: rect.max().y,
            min_lng: rect.min().x,
            max_lng: rect.max().x,
        })
    }
}

/// At least three vertices, not counting the closing repeat
fn is_usable_ring(ring: &LineString<f64>) -> bool {
    let coords = &ring.0;
    let vertices = match (coords.first(), coords.last()) {
        (Some(first), Some(last)) if coords.len() > 1 && first == last => coords.len() - 1,
        _ => coords.len(),
    };
    vertices >= 3 && coords.iter().all(|c| c.x.is_finite() && c.y.is_finite())
}

fn ring_from_positions(vertices: &[[f64; 2]]) -> LineString<f64> {
    LineString::new(
        vertices
            .iter()
            .map(|[lng, lat]| Coord { x: *lng, y: *lat })
            .collect(),
    )
}

/// Inclusive lat/lng bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }
    }

    /// O(1) rejection test, evaluated before any ring is walked
    #[inline]
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }

    #[inline]
    pub fn contains_point(&self, point: LatLng) -> bool {
        self.contains(point.lat, point.lng)
    }

    /// Edge-touching boxes intersect
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.max_lng < other.min_lng
            || self.min_lng > other.max_lng
            || self.max_lat < other.min_lat
            || self.min_lat > other.max_lat)
    }

    pub fn encloses(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.min_lat
            && self.max_lat >= other.max_lat
            && self.min_lng <= other.min_lng
            && self.max_lng >= other.max_lng
    }

    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// Precise point-in-geometry test.
///
/// Callers must run the bounding-box rejection first; implementations only
/// see points that already passed it.
pub trait Containment: Send + Sync {
    fn contains(&self, geometry: &Geometry, point: LatLng) -> bool;
}

/// Even-odd ray casting over outer rings
#[derive(Debug, Clone, Copy, Default)]
pub struct RayCasting;

impl Containment for RayCasting {
    fn contains(&self, geometry: &Geometry, point: LatLng) -> bool {
        match geometry {
            Geometry::Polygon(p) => point_in_ring(point, p.exterior()),
            Geometry::MultiPolygon(mp) => mp.0.iter().any(|p| point_in_ring(point, p.exterior())),
            Geometry::Unsupported { .. } => false,
        }
    }
}

/// Cast a ray from `point` towards +lng and count edge crossings.
///
/// An edge counts only when it straddles the ray's latitude on the half-open
/// interval `(min, max]`, so a vertex shared by two edges is counted once.
pub fn point_in_ring(point: LatLng, ring: &LineString<f64>) -> bool {
    let coords = &ring.0;
    if coords.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = coords.len() - 1;
    for i in 0..coords.len() {
        let (lat_i, lng_i) = (coords[i].y, coords[i].x);
        let (lat_j, lng_j) = (coords[j].y, coords[j].x);

        if (lat_i > point.lat) != (lat_j > point.lat) {
            let crossing_lng = (lng_j - lng_i) * (point.lat - lat_i) / (lat_j - lat_i) + lng_i;
            if point.lng < crossing_lng {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Wire form of a geometry: `{"type": ..., "coordinates": ...}` with `[lng, lat]` positions
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeoJsonGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: serde_json::Value,
}

type Positions = Vec<Vec<f64>>;

/// Malformed rings collapse to empty rings so the region is skipped later
/// instead of failing the whole import.
fn parse_ring(positions: &Positions) -> LineString<f64> {
    let coords: Option<Vec<Coord<f64>>> = positions
        .iter()
        .map(|pos| match pos.as_slice() {
            [lng, lat, ..] => Some(Coord { x: *lng, y: *lat }),
            _ => None,
        })
        .collect();
    LineString::new(coords.unwrap_or_default())
}

fn parse_polygon(rings: &[Positions]) -> Polygon<f64> {
    let mut rings = rings.iter().map(parse_ring);
    let exterior = rings.next().unwrap_or_else(|| LineString::new(vec![]));
    Polygon::new(exterior, rings.collect())
}

fn empty_polygon() -> Polygon<f64> {
    Polygon::new(LineString::new(vec![]), vec![])
}

impl From<GeoJsonGeometry> for Geometry {
    fn from(raw: GeoJsonGeometry) -> Self {
        match raw.kind.as_str() {
            "Polygon" => {
                let polygon = serde_json::from_value::<Vec<Positions>>(raw.coordinates)
                    .map(|rings| parse_polygon(&rings))
                    .unwrap_or_else(|_| empty_polygon());
                Geometry::Polygon(polygon)
            }
            "MultiPolygon" => {
                let parts = serde_json::from_value::<Vec<Vec<Positions>>>(raw.coordinates)
                    .map(|parts| parts.iter().map(|rings| parse_polygon(rings)).collect())
                    .unwrap_or_default();
                Geometry::MultiPolygon(MultiPolygon::new(parts))
            }
            _ => Geometry::Unsupported { kind: raw.kind },
        }
    }
}

fn ring_positions(ring: &LineString<f64>) -> Vec<[f64; 2]> {
    ring.0.iter().map(|c| [c.x, c.y]).collect()
}

fn polygon_positions(polygon: &Polygon<f64>) -> Vec<Vec<[f64; 2]>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(ring_positions)
        .collect()
}

impl From<Geometry> for GeoJsonGeometry {
    fn from(geometry: Geometry) -> Self {
        match geometry {
            Geometry::Polygon(p) => GeoJsonGeometry {
                kind: "Polygon".into(),
                coordinates: serde_json::json!(polygon_positions(&p)),
            },
            Geometry::MultiPolygon(mp) => GeoJsonGeometry {
                kind: "MultiPolygon".into(),
                coordinates: serde_json::json!(mp
                    .0
                    .iter()
                    .map(polygon_positions)
                    .collect::<Vec<_>>()),
            },
            Geometry::Unsupported { kind } => GeoJsonGeometry {
                kind,
                coordinates: serde_json::Value::Null,
            },
        }
    }
}
