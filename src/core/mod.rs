pub mod config;
pub mod error;
pub mod period;
pub mod types;

pub use config::AtlasConfig;
pub use error::{AtlasError, Result};
pub use period::{Granularity, Period, PeriodRange, ValidityWindow};
