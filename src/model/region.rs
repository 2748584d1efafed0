//! Region - a named area at one administrative level

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::period::{Period, ValidityWindow};
use crate::core::types::{LatLng, RegionId};
use crate::spatial::geometry::{BoundingBox, Containment, Geometry};

/// Administrative granularity of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionLevel {
    Country,
    Province,
    City,
}

/// A named geographic area. Fields are private so the level and the
/// geometry/bbox pairing cannot drift after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RegionRecord", into = "RegionRecord")]
pub struct Region {
    id: RegionId,
    name: String,
    level: RegionLevel,
    geometry: Geometry,
    bbox: Option<BoundingBox>,
    validity: ValidityWindow,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl Region {
    pub fn new(
        id: RegionId,
        name: impl Into<String>,
        level: RegionLevel,
        geometry: Geometry,
    ) -> Self {
        let bbox = geometry.bounding_box();
        Self {
            id,
            name: name.into(),
            level,
            geometry,
            bbox,
            validity: ValidityWindow::always(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_validity(mut self, validity: ValidityWindow) -> Self {
        self.validity = validity;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> RegionLevel {
        self.level
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Always derived from the geometry, so it encloses every vertex
    pub fn bbox(&self) -> Option<BoundingBox> {
        self.bbox
    }

    pub fn validity(&self) -> ValidityWindow {
        self.validity
    }

    /// Import-specific fields; never read by the resolution algorithms
    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn is_active(&self, period: Period) -> bool {
        self.validity.covers(period)
    }

    /// Missing or malformed coordinates
    pub fn is_degenerate(&self) -> bool {
        self.geometry.is_degenerate()
    }

    pub fn center(&self) -> Option<LatLng> {
        self.bbox.map(|b| b.center())
    }

    /// Bounding-box rejection, then the precise test.
    ///
    /// `containment` is never consulted for a point outside the bbox.
    pub fn contains<C: Containment + ?Sized>(&self, point: LatLng, containment: &C) -> bool {
        match self.bbox {
            Some(bbox) if bbox.contains_point(point) => containment.contains(&self.geometry, point),
            _ => false,
        }
    }
}

/// Import/export shape of a region. Unknown keys land in `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegionRecord {
    id: RegionId,
    name: String,
    level: RegionLevel,
    geometry: Geometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bbox: Option<BoundingBox>,
    #[serde(default)]
    validity: ValidityWindow,
    #[serde(flatten)]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl From<RegionRecord> for Region {
    fn from(record: RegionRecord) -> Self {
        let mut region = Region::new(record.id, record.name, record.level, record.geometry)
            .with_validity(record.validity);
        region.metadata = record.metadata;

        if let (Some(stored), Some(computed)) = (record.bbox, region.bbox) {
            if !stored.encloses(&computed) {
                tracing::warn!(
                    region_id = region.id.0,
                    "Stored bbox does not enclose geometry, using computed bbox"
                );
            }
        }
        region
    }
}

impl From<Region> for RegionRecord {
    fn from(region: Region) -> Self {
        RegionRecord {
            id: region.id,
            name: region.name,
            level: region.level,
            geometry: region.geometry,
            bbox: region.bbox,
            validity: region.validity,
            metadata: region.metadata,
        }
    }
}
