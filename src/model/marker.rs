//! Markers: point sites that vote for the country owning them
//!
//! A marker's ownership changes over time through an ordered list of terms.
//! When terms overlap, the later entry in the list wins.

use serde::{Deserialize, Serialize};

use crate::core::config::WeightConfig;
use crate::core::period::Period;
use crate::core::types::{CountryId, LatLng, MarkerId};

/// Undated terms are treated as existing since this year
pub const DEFAULT_START_YEAR: i32 = -5000;

fn default_start_year() -> i32 {
    DEFAULT_START_YEAR
}

fn first_month() -> u8 {
    1
}

fn last_month() -> u8 {
    12
}

/// Vote multiplier class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightClass {
    Capital,
    Ordinary,
}

impl WeightClass {
    pub fn weight(&self, weights: &WeightConfig) -> u32 {
        match self {
            WeightClass::Capital => weights.capital,
            WeightClass::Ordinary => weights.ordinary,
        }
    }
}

/// One ownership sub-period of a marker. `end_year: None` is open-ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerTerm {
    #[serde(default)]
    pub country_id: Option<CountryId>,
    #[serde(default = "default_start_year")]
    pub start_year: i32,
    #[serde(default = "first_month")]
    pub start_month: u8,
    #[serde(default)]
    pub end_year: Option<i32>,
    #[serde(default = "last_month")]
    pub end_month: u8,
    #[serde(default)]
    pub is_capital: bool,
}

impl MarkerTerm {
    pub fn new(country_id: CountryId, start_year: i32, end_year: Option<i32>) -> Self {
        Self {
            country_id: Some(country_id),
            start_year,
            start_month: 1,
            end_year,
            end_month: 12,
            is_capital: false,
        }
    }

    pub fn capital(mut self) -> Self {
        self.is_capital = true;
        self
    }

    pub fn months(mut self, start_month: u8, end_month: u8) -> Self {
        self.start_month = start_month;
        self.end_month = end_month;
        self
    }

    /// Yearly periods compare years only; monthly periods compare (year, month)
    pub fn covers(&self, period: Period) -> bool {
        match period.month {
            None => {
                self.start_year <= period.year && self.end_year.map_or(true, |e| period.year <= e)
            }
            Some(month) => {
                let at = (period.year, month);
                (self.start_year, self.start_month) <= at
                    && self.end_year.map_or(true, |e| at <= (e, self.end_month))
            }
        }
    }

    pub fn weight_class(&self) -> WeightClass {
        if self.is_capital {
            WeightClass::Capital
        } else {
            WeightClass::Ordinary
        }
    }
}

/// A point-located settlement or site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: MarkerId,
    #[serde(default)]
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub terms: Vec<MarkerTerm>,
}

impl Marker {
    pub fn new(id: MarkerId, lat: f64, lng: f64, terms: Vec<MarkerTerm>) -> Self {
        Self {
            id,
            name: String::new(),
            lat,
            lng,
            terms,
        }
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    /// The single term in force at `period`
    pub fn term_at(&self, period: Period) -> Option<&MarkerTerm> {
        self.terms.iter().rev().find(|t| t.covers(period))
    }

    pub fn is_active(&self, period: Period) -> bool {
        self.term_at(period).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yearly_coverage_inclusive() {
        let term = MarkerTerm::new(CountryId(1), 500, Some(600));
        assert!(term.covers(Period::year(500)));
        assert!(term.covers(Period::year(600)));
        assert!(!term.covers(Period::year(601)));
        assert!(!term.covers(Period::year(499)));
    }

    #[test]
    fn test_monthly_coverage_is_lexicographic() {
        let term = MarkerTerm::new(CountryId(1), 500, Some(502)).months(7, 3);
        assert!(!term.covers(Period::month(500, 6)));
        assert!(term.covers(Period::month(500, 7)));
        // Month 1 of a middle year is covered even though 1 < start_month
        assert!(term.covers(Period::month(501, 1)));
        assert!(term.covers(Period::month(502, 3)));
        assert!(!term.covers(Period::month(502, 4)));
    }

    #[test]
    fn test_open_ended_term() {
        let term = MarkerTerm::new(CountryId(1), 918, None);
        assert!(term.covers(Period::year(1392)));
        assert!(term.covers(Period::month(2000, 12)));
    }

    #[test]
    fn test_later_term_wins_overlap() {
        let marker = Marker::new(
            MarkerId(1),
            37.5,
            127.0,
            vec![
                MarkerTerm::new(CountryId(1), 300, Some(500)),
                MarkerTerm::new(CountryId(2), 475, Some(551)).capital(),
            ],
        );
        assert_eq!(marker.term_at(Period::year(400)).unwrap().country_id, Some(CountryId(1)));
        let term = marker.term_at(Period::year(480)).unwrap();
        assert_eq!(term.country_id, Some(CountryId(2)));
        assert_eq!(term.weight_class(), WeightClass::Capital);
        assert!(!marker.is_active(Period::year(552)));
    }

    #[test]
    fn test_term_defaults_from_json() {
        let marker: Marker = serde_json::from_str(
            r#"{"id": 3, "lat": 35.1, "lng": 129.0, "terms": [{"country_id": 7}]}"#,
        )
        .unwrap();
        let term = &marker.terms[0];
        assert_eq!(term.start_year, DEFAULT_START_YEAR);
        assert_eq!((term.start_month, term.end_month), (1, 12));
        assert_eq!(term.end_year, None);
        assert!(!term.is_capital);
    }

    #[test]
    fn test_weights_follow_config() {
        let weights = WeightConfig::default();
        assert_eq!(WeightClass::Capital.weight(&weights), 3);
        assert_eq!(WeightClass::Ordinary.weight(&weights), 1);
    }
}
