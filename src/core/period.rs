//! Periods, period ranges and validity windows
//!
//! A period is either a whole year or a single (year, month) pair. Years may be
//! negative (BCE). Monthly coverage compares (year, month) pairs lexicographically.

use serde::{Deserialize, Serialize};

use crate::core::error::{AtlasError, Result};

/// Requested granularity of a recompute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Yearly,
    Monthly,
}

impl Granularity {
    pub fn from_monthly_flag(monthly: bool) -> Self {
        if monthly {
            Granularity::Monthly
        } else {
            Granularity::Yearly
        }
    }
}

/// One year, or one (year, month) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: Option<u8>,
}

impl Period {
    pub fn year(year: i32) -> Self {
        Self { year, month: None }
    }

    pub fn month(year: i32, month: u8) -> Self {
        Self {
            year,
            month: Some(month),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.month {
            Some(m) => write!(f, "{}-{:02}", self.year, m),
            None => write!(f, "{}", self.year),
        }
    }
}

/// Longest range one recompute may cover, in years
pub const MAX_RANGE_YEARS: i64 = 10_000;

/// Inclusive range of years, expanded into periods at a given granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    start_year: i32,
    end_year: i32,
    granularity: Granularity,
}

impl PeriodRange {
    /// Rejects `end_year < start_year` and ranges longer than
    /// [`MAX_RANGE_YEARS`] before any work is scheduled.
    pub fn new(start_year: i32, end_year: i32, granularity: Granularity) -> Result<Self> {
        if end_year < start_year {
            return Err(AtlasError::InvalidRange {
                start: start_year,
                end: end_year,
            });
        }
        let years = i64::from(end_year) - i64::from(start_year) + 1;
        if years > MAX_RANGE_YEARS {
            return Err(AtlasError::RangeTooLong {
                years,
                max: MAX_RANGE_YEARS,
            });
        }
        Ok(Self {
            start_year,
            end_year,
            granularity,
        })
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn end_year(&self) -> i32 {
        self.end_year
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Number of periods in the range
    pub fn len(&self) -> usize {
        let years = (i64::from(self.end_year) - i64::from(self.start_year) + 1) as usize;
        match self.granularity {
            Granularity::Yearly => years,
            Granularity::Monthly => years * 12,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All periods in chronological order
    pub fn periods(&self) -> Vec<Period> {
        let mut periods = Vec::with_capacity(self.len());
        for year in self.start_year..=self.end_year {
            match self.granularity {
                Granularity::Yearly => periods.push(Period::year(year)),
                Granularity::Monthly => {
                    periods.extend((1..=12).map(|m| Period::month(year, m)))
                }
            }
        }
        periods
    }
}

/// Optional inclusive [start_year, end_year] window; open ends are unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidityWindow {
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default)]
    pub end_year: Option<i32>,
}

impl ValidityWindow {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn between(start_year: i32, end_year: i32) -> Self {
        Self {
            start_year: Some(start_year),
            end_year: Some(end_year),
        }
    }

    pub fn covers(&self, period: Period) -> bool {
        self.start_year.map_or(true, |s| s <= period.year)
            && self.end_year.map_or(true, |e| period.year <= e)
    }
}
