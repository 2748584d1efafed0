//! Sovereignty Atlas - historical sovereignty resolution and period cache
//!
//! Resolves which country controls each map region at any year or month by
//! weighted marker votes, and precomputes those results for timeline playback.

pub mod cache;
pub mod core;
pub mod model;
pub mod service;
pub mod sovereignty;
pub mod spatial;

pub use crate::core::error::{AtlasError, Result};
pub use crate::service::AtlasService;
