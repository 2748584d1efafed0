//! Sovereignty resolution: weighted marker tallies and the hierarchical painter

pub mod painter;
pub mod tally;

pub use painter::{HierarchicalPainter, PaintState, PeriodResolution, RegionAssignment};
pub use tally::{collect_ballots, tally, Ballot, TallyOutcome};
