//! Read-only inputs and the snapshot cache in front of them
//!
//! Regions and countries change rarely and are fetched as one snapshot kept
//! for a TTL. Markers are fetched per period since only the active ones matter.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::core::error::{AtlasError, Result};
use crate::core::period::Period;
use crate::core::types::RegionId;
use crate::model::country::{Country, CountryDirectory};
use crate::model::marker::Marker;
use crate::model::region::Region;

pub trait RegionSource: Send + Sync {
    fn regions(&self) -> Result<Vec<Region>>;
}

pub trait MarkerSource: Send + Sync {
    /// Markers with a term covering `period`
    fn markers_in(&self, period: Period) -> Result<Vec<Marker>>;
}

pub trait CountrySource: Send + Sync {
    fn countries(&self) -> Result<Vec<Country>>;
}

/// JSON-backed dataset: `regions.json`, `markers.json`, `countries.json`
#[derive(Debug, Default)]
pub struct Dataset {
    regions: RwLock<Vec<Region>>,
    markers: RwLock<Vec<Marker>>,
    countries: RwLock<Vec<Country>>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AtlasError::Source(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| AtlasError::Source(format!("{}: {e}", path.display())))
}

impl Dataset {
    pub fn new(regions: Vec<Region>, markers: Vec<Marker>, countries: Vec<Country>) -> Self {
        Self {
            regions: RwLock::new(regions),
            markers: RwLock::new(markers),
            countries: RwLock::new(countries),
        }
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let regions: Vec<Region> = read_json(&dir.join("regions.json"))?;
        let markers: Vec<Marker> = read_json(&dir.join("markers.json"))?;
        let countries: Vec<Country> = read_json(&dir.join("countries.json"))?;
        tracing::info!(
            dir = %dir.display(),
            regions = regions.len(),
            markers = markers.len(),
            countries = countries.len(),
            "Dataset loaded"
        );
        Ok(Self::new(regions, markers, countries))
    }

    pub fn replace_regions(&self, regions: Vec<Region>) {
        *self.regions.write().unwrap_or_else(PoisonError::into_inner) = regions;
    }

    pub fn replace_markers(&self, markers: Vec<Marker>) {
        *self.markers.write().unwrap_or_else(PoisonError::into_inner) = markers;
    }

    pub fn replace_countries(&self, countries: Vec<Country>) {
        *self.countries.write().unwrap_or_else(PoisonError::into_inner) = countries;
    }
}

impl RegionSource for Dataset {
    fn regions(&self) -> Result<Vec<Region>> {
        Ok(self.regions.read().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

impl MarkerSource for Dataset {
    fn markers_in(&self, period: Period) -> Result<Vec<Marker>> {
        let markers = self.markers.read().unwrap_or_else(PoisonError::into_inner);
        Ok(markers.iter().filter(|m| m.is_active(period)).cloned().collect())
    }
}

impl CountrySource for Dataset {
    fn countries(&self) -> Result<Vec<Country>> {
        Ok(self.countries.read().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

/// One consistent fetch of regions and countries
#[derive(Debug)]
pub struct SourceSnapshot {
    pub regions: Vec<Arc<Region>>,
    pub directory: CountryDirectory,
    pub fetched_at: DateTime<Utc>,
    fetched: Instant,
    by_id: AHashMap<RegionId, usize>,
}

impl SourceSnapshot {
    pub fn new(regions: Vec<Region>, directory: CountryDirectory) -> Self {
        let regions: Vec<Arc<Region>> = regions.into_iter().map(Arc::new).collect();
        let by_id = regions.iter().enumerate().map(|(i, r)| (r.id(), i)).collect();
        Self {
            regions,
            directory,
            fetched_at: Utc::now(),
            fetched: Instant::now(),
            by_id,
        }
    }

    pub fn region(&self, id: RegionId) -> Option<&Arc<Region>> {
        self.by_id.get(&id).map(|&i| &self.regions[i])
    }
}

/// TTL cache over the region and country sources.
///
/// Expired or invalidated snapshots are refetched on the next read. Readers
/// holding an older snapshot keep using it undisturbed.
pub struct SourceCache {
    regions: Arc<dyn RegionSource>,
    countries: Arc<dyn CountrySource>,
    ttl: Duration,
    current: ArcSwapOption<SourceSnapshot>,
}

impl SourceCache {
    pub fn new(
        regions: Arc<dyn RegionSource>,
        countries: Arc<dyn CountrySource>,
        ttl: Duration,
    ) -> Self {
        Self {
            regions,
            countries,
            ttl,
            current: ArcSwapOption::empty(),
        }
    }

    pub fn snapshot(&self) -> Result<Arc<SourceSnapshot>> {
        if let Some(snapshot) = self.current.load_full() {
            if snapshot.fetched.elapsed() < self.ttl {
                return Ok(snapshot);
            }
            tracing::debug!(fetched_at = %snapshot.fetched_at, "Source snapshot expired");
        }

        let snapshot = Arc::new(SourceSnapshot::new(
            self.regions.regions()?,
            CountryDirectory::new(self.countries.countries()?),
        ));
        tracing::debug!(
            regions = snapshot.regions.len(),
            countries = snapshot.directory.len(),
            "Source snapshot refreshed"
        );
        self.current.store(Some(Arc::clone(&snapshot)));
        Ok(snapshot)
    }

    pub fn invalidate(&self) {
        self.current.store(None);
    }

    pub fn is_cached(&self) -> bool {
        self.current.load().is_some()
    }
}
