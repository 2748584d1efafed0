//! Integration tests for the weighted sovereignty tally

use std::sync::atomic::{AtomicUsize, Ordering};

use proptest::prelude::*;

use sovereignty_atlas::core::config::WeightConfig;
use sovereignty_atlas::core::period::Period;
use sovereignty_atlas::core::types::{CountryId, LatLng, MarkerId, RegionId};
use sovereignty_atlas::model::{
    Country, CountryDirectory, Marker, MarkerTerm, Region, RegionLevel,
};
use sovereignty_atlas::sovereignty::{collect_ballots, tally, Ballot};
use sovereignty_atlas::spatial::{Containment, Geometry, RayCasting};

/// Ray casting that counts how often the precise test runs
#[derive(Default)]
struct CountingContainment {
    calls: AtomicUsize,
}

impl Containment for CountingContainment {
    fn contains(&self, geometry: &Geometry, point: LatLng) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        RayCasting.contains(geometry, point)
    }
}

fn province_r() -> Region {
    Region::new(
        RegionId(1),
        "R",
        RegionLevel::Province,
        Geometry::rectangle(10.0, 20.0, 10.0, 20.0),
    )
}

fn directory() -> CountryDirectory {
    CountryDirectory::new([
        Country::new(CountryId(1), "A", "#a00"),
        Country::new(CountryId(2), "B", "#0b0"),
        Country::new(CountryId(3), "C", "#00c"),
    ])
}

fn term(country: u32) -> MarkerTerm {
    MarkerTerm::new(CountryId(country), 400, Some(600))
}

fn scenario_markers() -> Vec<Marker> {
    vec![
        Marker::new(MarkerId(1), 15.0, 15.0, vec![term(1).capital()]),
        Marker::new(MarkerId(2), 16.0, 16.0, vec![term(2)]),
    ]
}

fn ballots_at(markers: &[Marker], year: i32) -> Vec<Ballot> {
    collect_ballots(markers, Period::year(year), &directory(), &WeightConfig::default())
}

#[test]
fn test_capital_and_ordinary_markers_weighted() {
    let ballots = ballots_at(&scenario_markers(), 500);
    let outcome = tally(&province_r(), &ballots, &RayCasting).unwrap();

    assert_eq!(outcome.winner, CountryId(1));
    assert_eq!(outcome.winner_weight, 3);
    assert_eq!(outcome.weights.len(), 2);
    assert_eq!(outcome.weights[&CountryId(1)], 3);
    assert_eq!(outcome.weights[&CountryId(2)], 1);
}

#[test]
fn test_marker_outside_bbox_never_reaches_polygon_test() {
    let mut markers = scenario_markers();
    markers.push(Marker::new(MarkerId(3), 25.0, 25.0, vec![term(3)]));
    let ballots = ballots_at(&markers, 500);
    assert_eq!(ballots.len(), 3);

    let counting = CountingContainment::default();
    let outcome = tally(&province_r(), &ballots, &counting).unwrap();

    assert_eq!(outcome.winner, CountryId(1));
    assert!(!outcome.weights.contains_key(&CountryId(3)));
    // Only the two markers inside the bbox were tested precisely
    assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_only_outside_markers_invoke_nothing() {
    let ballots: Vec<Ballot> = (0..50)
        .map(|i| Ballot {
            marker_id: MarkerId(i),
            point: LatLng::new(-40.0 + i as f64 * 0.1, 100.0),
            country_id: CountryId(1),
            weight: 1,
        })
        .collect();
    let counting = CountingContainment::default();
    assert!(tally(&province_r(), &ballots, &counting).is_none());
    assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_repeated_tallies_identical() {
    let ballots = ballots_at(&scenario_markers(), 500);
    let first = tally(&province_r(), &ballots, &RayCasting);
    for _ in 0..10 {
        assert_eq!(tally(&province_r(), &ballots, &RayCasting), first);
    }
}

#[test]
fn test_custom_weights_change_outcome() {
    let weights = WeightConfig {
        capital: 1,
        ordinary: 5,
    };
    let ballots = collect_ballots(&scenario_markers(), Period::year(500), &directory(), &weights);
    let outcome = tally(&province_r(), &ballots, &RayCasting).unwrap();
    assert_eq!(outcome.winner, CountryId(2));
    assert_eq!(outcome.winner_weight, 5);
}

#[test]
fn test_marker_ownership_follows_terms() {
    // Changes hands in 550; a later correction term wins where they overlap
    let markers = vec![Marker::new(
        MarkerId(1),
        15.0,
        15.0,
        vec![
            MarkerTerm::new(CountryId(1), 400, Some(560)),
            MarkerTerm::new(CountryId(2), 550, None),
        ],
    )];
    let at = |year| {
        let ballots = ballots_at(&markers, year);
        tally(&province_r(), &ballots, &RayCasting).map(|o| o.winner)
    };
    assert_eq!(at(500), Some(CountryId(1)));
    assert_eq!(at(555), Some(CountryId(2)));
    assert_eq!(at(399), None);
}

fn ballot_strategy() -> impl Strategy<Value = Vec<Ballot>> {
    let raw = (0.0f64..30.0, 0.0f64..30.0, 1u32..5, 1u32..4);
    prop::collection::vec(raw, 0..40).prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (lat, lng, country, weight))| Ballot {
                marker_id: MarkerId(i as u32),
                point: LatLng::new(lat, lng),
                country_id: CountryId(country),
                weight,
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_tally_ignores_ballot_order(
        (ballots, shuffled) in ballot_strategy()
            .prop_flat_map(|b| (Just(b.clone()), Just(b).prop_shuffle()))
    ) {
        let region = province_r();
        prop_assert_eq!(
            tally(&region, &ballots, &RayCasting),
            tally(&region, &shuffled, &RayCasting)
        );
    }

    #[test]
    fn prop_winner_has_max_weight_and_lowest_id_on_tie(ballots in ballot_strategy()) {
        if let Some(outcome) = tally(&province_r(), &ballots, &RayCasting) {
            let max = outcome.weights.values().copied().max().unwrap();
            prop_assert_eq!(outcome.winner_weight, max);
            let first_max = outcome
                .weights
                .iter()
                .find(|&(_, &w)| w == max)
                .map(|(&c, _)| c)
                .unwrap();
            prop_assert_eq!(outcome.winner, first_max);
        }
    }

    #[test]
    fn prop_rectangle_containment_matches_bounds(
        lat in -5.0f64..35.0,
        lng in -5.0f64..35.0,
    ) {
        let region = province_r();
        let strictly_inside = lat > 10.0 && lat < 20.0 && lng > 10.0 && lng < 20.0;
        let outside = lat < 10.0 || lat > 20.0 || lng < 10.0 || lng > 20.0;
        let contained = region.contains(LatLng::new(lat, lng), &RayCasting);
        if strictly_inside {
            prop_assert!(contained);
        }
        if outside {
            prop_assert!(!contained);
        }
    }
}
