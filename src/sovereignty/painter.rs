//! Four-pass hierarchical painter
//!
//! Resolves the full region set at one period into a single assignment per
//! region. Provinces go first, contested provinces with no finer data are
//! promoted, cities fill what provinces left uncovered, and country-level
//! regions get an independent background fill.
//!
//! Passes within a period are sequential; separate periods share nothing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::period::Period;
use crate::core::types::RegionId;
use crate::model::region::{Region, RegionLevel};
use crate::sovereignty::tally::{tally, Ballot, TallyOutcome};
use crate::spatial::geometry::{BoundingBox, Containment, RayCasting};

/// Per-region state at one period. Exactly one per region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaintState {
    Empty,
    Painted,
    Contested,
    PaintedByFallback,
}

impl PaintState {
    /// States that produce a cache record
    pub fn has_winner(&self) -> bool {
        matches!(self, PaintState::Painted | PaintState::PaintedByFallback)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionAssignment {
    pub region_id: RegionId,
    pub level: RegionLevel,
    pub state: PaintState,
    /// Tally result. Kept for contested provinces even though they render nothing.
    pub outcome: Option<TallyOutcome>,
    /// Painted province that already covers this city
    pub covered_by: Option<RegionId>,
}

impl RegionAssignment {
    fn new(region: &Region, state: PaintState, outcome: Option<TallyOutcome>) -> Self {
        Self {
            region_id: region.id(),
            level: region.level(),
            state,
            outcome,
            covered_by: None,
        }
    }

    /// The outcome to persist, if this region renders at all
    pub fn winner(&self) -> Option<&TallyOutcome> {
        if self.state.has_winner() {
            self.outcome.as_ref()
        } else {
            None
        }
    }
}

/// Painter output for one period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodResolution {
    pub period: Period,
    /// One entry per non-skipped region, by ascending region id
    pub assignments: Vec<RegionAssignment>,
    /// Regions with missing or malformed geometry, left out of this period
    pub skipped: Vec<RegionId>,
}

impl PeriodResolution {
    pub fn assignment(&self, region_id: RegionId) -> Option<&RegionAssignment> {
        self.assignments
            .binary_search_by_key(&region_id, |a| a.region_id)
            .ok()
            .map(|i| &self.assignments[i])
    }

    pub fn painted_count(&self) -> usize {
        self.assignments.iter().filter(|a| a.state.has_winner()).count()
    }
}

pub struct HierarchicalPainter<C: Containment = RayCasting> {
    containment: C,
}

impl Default for HierarchicalPainter<RayCasting> {
    fn default() -> Self {
        Self::new(RayCasting)
    }
}

impl<C: Containment> HierarchicalPainter<C> {
    pub fn new(containment: C) -> Self {
        Self { containment }
    }

    pub fn containment(&self) -> &C {
        &self.containment
    }

    /// Run every pass over `regions` with the ballots valid at `period`.
    ///
    /// Inactive regions are assigned `Empty`. Degenerate regions are listed in
    /// `skipped` and get no assignment.
    pub fn paint(
        &self,
        regions: &[Arc<Region>],
        ballots: &[Ballot],
        period: Period,
    ) -> PeriodResolution {
        let mut skipped = Vec::new();
        let mut provinces = Vec::new();
        let mut cities = Vec::new();
        let mut countries = Vec::new();
        let mut assignments = Vec::with_capacity(regions.len());

        for region in regions {
            if region.is_degenerate() {
                tracing::warn!(
                    region_id = region.id().0,
                    region = region.name(),
                    %period,
                    "Region geometry missing or malformed, skipped"
                );
                skipped.push(region.id());
                continue;
            }
            if !region.is_active(period) {
                assignments.push(RegionAssignment::new(region, PaintState::Empty, None));
                continue;
            }
            match region.level() {
                RegionLevel::Province => provinces.push(region.as_ref()),
                RegionLevel::City => cities.push(region.as_ref()),
                RegionLevel::Country => countries.push(region.as_ref()),
            }
        }

        // Pass 1: provinces
        let mut province_results: Vec<(&Region, RegionAssignment)> = provinces
            .iter()
            .map(|&province| {
                let outcome = tally(province, ballots, &self.containment);
                let state = match &outcome {
                    None => PaintState::Empty,
                    Some(o) if o.is_contested() => PaintState::Contested,
                    Some(_) => PaintState::Painted,
                };
                (province, RegionAssignment::new(province, state, outcome))
            })
            .collect();

        // Pass 1.5: contested provinces with no city to subdivide them
        let city_centers: Vec<_> = cities.iter().filter_map(|c| c.center()).collect();
        for (province, assignment) in province_results.iter_mut() {
            if assignment.state != PaintState::Contested {
                continue;
            }
            let Some(bbox) = province.bbox() else { continue };
            if !city_centers.iter().any(|&c| bbox.contains_point(c)) {
                tracing::debug!(
                    region_id = province.id().0,
                    %period,
                    "Contested province promoted by fallback"
                );
                assignment.state = PaintState::PaintedByFallback;
            }
        }

        // Pass 2: cities outside every painted province
        let covering: Vec<(RegionId, BoundingBox)> = province_results
            .iter()
            .filter(|(_, a)| a.state.has_winner())
            .filter_map(|(p, _)| p.bbox().map(|b| (p.id(), b)))
            .collect();

        for &city in &cities {
            let covered_by = city.center().and_then(|center| {
                covering
                    .iter()
                    .filter(|(_, bbox)| bbox.contains_point(center))
                    .map(|(id, _)| *id)
                    .min()
            });
            if covered_by.is_some() {
                let mut assignment = RegionAssignment::new(city, PaintState::Empty, None);
                assignment.covered_by = covered_by;
                assignments.push(assignment);
                continue;
            }
            let outcome = tally(city, ballots, &self.containment);
            let state = if outcome.is_some() {
                PaintState::Painted
            } else {
                PaintState::Empty
            };
            assignments.push(RegionAssignment::new(city, state, outcome));
        }

        // Pass 3: country-level background fill
        for &country in &countries {
            let outcome = tally(country, ballots, &self.containment);
            let state = if outcome.is_some() {
                PaintState::Painted
            } else {
                PaintState::Empty
            };
            assignments.push(RegionAssignment::new(country, state, outcome));
        }

        assignments.extend(province_results.into_iter().map(|(_, a)| a));
        assignments.sort_by_key(|a| a.region_id);
        skipped.sort();

        PeriodResolution {
            period,
            assignments,
            skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::period::ValidityWindow;
    use crate::core::types::{CountryId, LatLng, MarkerId};
    use crate::spatial::geometry::Geometry;

    fn region(id: u32, level: RegionLevel, lat: (f64, f64), lng: (f64, f64)) -> Arc<Region> {
        Arc::new(Region::new(
            RegionId(id),
            format!("r{id}"),
            level,
            Geometry::rectangle(lat.0, lat.1, lng.0, lng.1),
        ))
    }

    fn ballot(id: u32, lat: f64, lng: f64, country: u32, weight: u32) -> Ballot {
        Ballot {
            marker_id: MarkerId(id),
            point: LatLng::new(lat, lng),
            country_id: CountryId(country),
            weight,
        }
    }

    fn painter() -> HierarchicalPainter<RayCasting> {
        HierarchicalPainter::new(RayCasting)
    }

    #[test]
    fn test_single_country_province_painted() {
        let regions = vec![region(1, RegionLevel::Province, (0.0, 10.0), (0.0, 10.0))];
        let ballots = [ballot(1, 5.0, 5.0, 1, 1), ballot(2, 6.0, 6.0, 1, 3)];
        let res = painter().paint(&regions, &ballots, Period::year(1000));
        let a = res.assignment(RegionId(1)).unwrap();
        assert_eq!(a.state, PaintState::Painted);
        assert_eq!(a.winner().unwrap().winner_weight, 4);
    }

    #[test]
    fn test_empty_province() {
        let regions = vec![region(1, RegionLevel::Province, (0.0, 10.0), (0.0, 10.0))];
        let res = painter().paint(&regions, &[], Period::year(1000));
        assert_eq!(res.assignment(RegionId(1)).unwrap().state, PaintState::Empty);
        assert_eq!(res.painted_count(), 0);
    }

    #[test]
    fn test_city_under_painted_province_is_covered() {
        let regions = vec![
            region(1, RegionLevel::Province, (0.0, 10.0), (0.0, 10.0)),
            region(2, RegionLevel::City, (4.0, 6.0), (4.0, 6.0)),
        ];
        let ballots = [ballot(1, 5.0, 5.0, 1, 1)];
        let res = painter().paint(&regions, &ballots, Period::year(1000));
        let city = res.assignment(RegionId(2)).unwrap();
        assert_eq!(city.state, PaintState::Empty);
        assert_eq!(city.covered_by, Some(RegionId(1)));
        assert!(city.outcome.is_none());
    }

    #[test]
    fn test_country_level_independent_of_provinces() {
        let regions = vec![
            region(1, RegionLevel::Country, (0.0, 30.0), (0.0, 30.0)),
            region(2, RegionLevel::Province, (0.0, 10.0), (0.0, 10.0)),
        ];
        let ballots = [ballot(1, 5.0, 5.0, 1, 1), ballot(2, 20.0, 20.0, 2, 3)];
        let res = painter().paint(&regions, &ballots, Period::year(1000));
        assert_eq!(res.assignment(RegionId(1)).unwrap().winner().unwrap().winner, CountryId(2));
        assert_eq!(res.assignment(RegionId(2)).unwrap().winner().unwrap().winner, CountryId(1));
    }

    #[test]
    fn test_degenerate_region_skipped_and_inactive_region_empty() {
        let broken = Arc::new(Region::new(
            RegionId(3),
            "broken",
            RegionLevel::Province,
            Geometry::polygon(&[[0.0, 0.0], [1.0, 1.0]]),
        ));
        let later = Arc::new(
            Region::new(
                RegionId(4),
                "later",
                RegionLevel::Province,
                Geometry::rectangle(0.0, 10.0, 0.0, 10.0),
            )
            .with_validity(ValidityWindow::between(1500, 1600)),
        );
        let ballots = [ballot(1, 5.0, 5.0, 1, 1)];
        let res = painter().paint(&[broken, later], &ballots, Period::year(1000));
        assert_eq!(res.skipped, vec![RegionId(3)]);
        assert!(res.assignment(RegionId(3)).is_none());
        assert_eq!(res.assignment(RegionId(4)).unwrap().state, PaintState::Empty);
    }

    #[test]
    fn test_unsupported_geometry_contains_nothing() {
        let odd = Arc::new(Region::new(
            RegionId(5),
            "line",
            RegionLevel::City,
            Geometry::Unsupported { kind: "LineString".into() },
        ));
        let ballots = [ballot(1, 5.0, 5.0, 1, 1)];
        let res = painter().paint(&[odd], &ballots, Period::year(1000));
        assert!(res.skipped.is_empty());
        assert_eq!(res.assignment(RegionId(5)).unwrap().state, PaintState::Empty);
    }
}
