//! Read-only inputs: regions, markers and countries

pub mod country;
pub mod marker;
pub mod region;

pub use country::{Country, CountryDirectory};
pub use marker::{Marker, MarkerTerm, WeightClass};
pub use region::{Region, RegionLevel};
