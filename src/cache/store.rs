//! Sovereignty record storage
//!
//! One row per (region, year, month). A write replaces the whole row; rows are
//! never merged field by field.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::period::Period;
use crate::core::types::{CountryId, RegionId};
use crate::sovereignty::painter::PaintState;

/// Precomputed winner for one region at one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SovereigntyRecord {
    pub region_id: RegionId,
    pub region_name: String,
    pub year: i32,
    pub month: Option<u8>,
    pub country_id: CountryId,
    pub country_name: String,
    pub color: String,
    pub vote_weight: u64,
    pub marker_count: usize,
    pub state: PaintState,
    pub computed_at: DateTime<Utc>,
}

impl SovereigntyRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            year: self.year,
            month: self.month,
            region_id: self.region_id,
        }
    }

    pub fn period(&self) -> Period {
        Period {
            year: self.year,
            month: self.month,
        }
    }
}

/// Natural key. Field order makes one period's rows a contiguous range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub year: i32,
    pub month: Option<u8>,
    pub region_id: RegionId,
}

impl RecordKey {
    pub fn new(region_id: RegionId, period: Period) -> Self {
        Self {
            year: period.year,
            month: period.month,
            region_id,
        }
    }
}

/// Everything one period contributes to the store
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch {
    pub period: Period,
    pub upserts: Vec<SovereigntyRecord>,
    /// Regions without a winner this period; their rows must go
    pub deletes: Vec<RegionId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub upserted: usize,
    /// Rows that actually existed and were removed
    pub deleted: usize,
}

/// Persistence seam for sovereignty records.
///
/// `apply` receives one batch at a time from a single writer.
pub trait SovereigntyStore: Send + Sync {
    fn apply(&self, batch: WriteBatch) -> Result<WriteSummary>;

    /// Rows for exactly this period; a yearly period never returns monthly rows
    fn find(&self, period: Period) -> Result<Vec<SovereigntyRecord>>;

    /// `None` year clears everything; a year without a month clears the year's
    /// yearly and monthly rows alike. Returns the number of rows removed.
    fn invalidate(&self, year: Option<i32>, month: Option<u8>) -> Result<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store with optional JSON snapshot persistence
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<RecordKey, SovereigntyRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = SovereigntyRecord>) -> Self {
        Self {
            rows: RwLock::new(records.into_iter().map(|r| (r.key(), r)).collect()),
        }
    }

    /// All rows in key order
    pub fn records(&self) -> Vec<SovereigntyRecord> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        rows.values().cloned().collect()
    }

    /// Load a snapshot written by [`MemoryStore::save`]. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No cache snapshot, starting empty");
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let records: Vec<SovereigntyRecord> = serde_json::from_str(&content)?;
        tracing::info!(path = %path.display(), records = records.len(), "Cache snapshot loaded");
        Ok(Self::from_records(records))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let records = self.records();
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), records = records.len(), "Cache snapshot saved");
        Ok(())
    }
}

fn period_bounds(year: i32, month: Option<u8>) -> (RecordKey, RecordKey) {
    (
        RecordKey {
            year,
            month,
            region_id: RegionId(u32::MIN),
        },
        RecordKey {
            year,
            month,
            region_id: RegionId(u32::MAX),
        },
    )
}

impl SovereigntyStore for MemoryStore {
    fn apply(&self, batch: WriteBatch) -> Result<WriteSummary> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let mut summary = WriteSummary::default();

        for region_id in &batch.deletes {
            if rows.remove(&RecordKey::new(*region_id, batch.period)).is_some() {
                summary.deleted += 1;
            }
        }
        for record in batch.upserts {
            rows.insert(record.key(), record);
            summary.upserted += 1;
        }
        Ok(summary)
    }

    fn find(&self, period: Period) -> Result<Vec<SovereigntyRecord>> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let (lo, hi) = period_bounds(period.year, period.month);
        Ok(rows.range(lo..=hi).map(|(_, r)| r.clone()).collect())
    }

    fn invalidate(&self, year: Option<i32>, month: Option<u8>) -> Result<usize> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let before = rows.len();

        match (year, month) {
            (None, _) => rows.clear(),
            (Some(year), Some(month)) => {
                let (lo, hi) = period_bounds(year, Some(month));
                let keys: Vec<RecordKey> = rows.range(lo..=hi).map(|(k, _)| *k).collect();
                for key in keys {
                    rows.remove(&key);
                }
            }
            (Some(year), None) => rows.retain(|key, _| key.year != year),
        }

        let removed = before - rows.len();
        tracing::info!(?year, ?month, removed, "Cache invalidated");
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
