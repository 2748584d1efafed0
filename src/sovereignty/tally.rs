//! Weighted per-country vote count for one region at one period
//!
//! Ballots are resolved up front (term, country, weight) so the tally itself
//! is a pure function of a region, a ballot slice and a containment test.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::config::WeightConfig;
use crate::core::period::Period;
use crate::core::types::{CountryId, LatLng, MarkerId};
use crate::model::country::CountryDirectory;
use crate::model::marker::Marker;
use crate::model::region::Region;
use crate::spatial::geometry::Containment;

/// A marker's resolved vote at one period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub marker_id: MarkerId,
    pub point: LatLng,
    pub country_id: CountryId,
    pub weight: u32,
}

/// Resolve every marker active at `period` into a ballot, ordered by marker id.
///
/// Markers whose active term has no country, names a country the directory
/// does not know, or names a country that does not exist at `period` cast no
/// ballot. So do markers with non-finite coordinates.
pub fn collect_ballots(
    markers: &[Marker],
    period: Period,
    directory: &CountryDirectory,
    weights: &WeightConfig,
) -> Vec<Ballot> {
    let mut ballots: Vec<Ballot> = markers
        .iter()
        .filter_map(|marker| {
            let term = marker.term_at(period)?;
            let country_id = term.country_id?;
            if directory.resolve(country_id, period).is_none() {
                tracing::trace!(
                    marker_id = marker.id.0,
                    country_id = country_id.0,
                    %period,
                    "Marker owner unresolvable, excluded"
                );
                return None;
            }
            let point = marker.position();
            if !point.is_finite() {
                return None;
            }
            Some(Ballot {
                marker_id: marker.id,
                point,
                country_id,
                weight: term.weight_class().weight(weights),
            })
        })
        .collect();

    ballots.sort_by_key(|b| b.marker_id);
    ballots
}

/// Result of a tally with at least one matching marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyOutcome {
    pub winner: CountryId,
    pub winner_weight: u64,
    pub weights: BTreeMap<CountryId, u64>,
    /// Markers that fell inside the region
    pub marker_count: usize,
}

impl TallyOutcome {
    pub fn distinct_countries(&self) -> usize {
        self.weights.len()
    }

    pub fn is_contested(&self) -> bool {
        self.weights.len() > 1
    }
}

/// Sum ballot weights per country over the ballots inside `region`.
///
/// Highest weight wins; equal weights go to the lowest country id. Returns
/// `None` when no ballot lies inside. Ballot order never affects the result.
pub fn tally<C: Containment + ?Sized>(
    region: &Region,
    ballots: &[Ballot],
    containment: &C,
) -> Option<TallyOutcome> {
    let mut weights: BTreeMap<CountryId, u64> = BTreeMap::new();
    let mut marker_count = 0;

    for ballot in ballots {
        if !region.contains(ballot.point, containment) {
            continue;
        }
        let total = weights.entry(ballot.country_id).or_insert(0);
        *total = total.saturating_add(u64::from(ballot.weight));
        marker_count += 1;
    }

    // Ascending id order plus strict `>` keeps the lowest id on ties
    let mut best: Option<(CountryId, u64)> = None;
    for (&country, &weight) in &weights {
        if best.map_or(true, |(_, w)| weight > w) {
            best = Some((country, weight));
        }
    }

    let (winner, winner_weight) = best?;
    Some(TallyOutcome {
        winner,
        winner_weight,
        weights,
        marker_count,
    })
}
