//! Atlas configuration with documented constants
//!
//! Loaded from an optional TOML file. Every section falls back to its
//! defaults, so an empty file is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::{AtlasError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    pub tiles: TileConfig,
    pub weights: WeightConfig,
    pub builder: BuilderConfig,
    pub sources: SourceConfig,
}

/// Smallest accepted tile edge in degrees (1800 x 3600 tiles)
pub const MIN_TILE_SIZE: f64 = 0.1;

/// Largest accepted tile edge in degrees
pub const MAX_TILE_SIZE: f64 = 180.0;

/// Spatial tile partition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    /// Edge length of a tile in degrees of latitude and longitude
    ///
    /// At 10 degrees the world is 18 x 36 = 648 tiles. Smaller tiles make
    /// viewport queries tighter but duplicate large regions into more cells.
    pub tile_size: f64,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self { tile_size: 10.0 }
    }
}

/// Vote weight per marker class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    /// Weight of a capital marker
    pub capital: u32,
    /// Weight of an ordinary marker
    pub ordinary: u32,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            capital: 3,
            ordinary: 1,
        }
    }
}

/// Period cache builder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Worker threads for the period fan-out (0 = one per CPU core)
    pub worker_threads: usize,

    /// Capacity of the channel feeding the single cache writer
    ///
    /// Workers block once this many computed periods are waiting to be
    /// written, which bounds memory on long monthly ranges.
    pub write_queue_depth: usize,

    /// Finished recompute jobs kept queryable; older ones are evicted
    pub retained_jobs: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            write_queue_depth: 64,
            retained_jobs: 256,
        }
    }
}

/// Region/country snapshot cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Seconds a fetched region/country snapshot stays fresh
    pub ttl_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

impl AtlasConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AtlasConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        let tile_size = self.tiles.tile_size;
        if !(MIN_TILE_SIZE..=MAX_TILE_SIZE).contains(&tile_size) {
            return Err(AtlasError::InvalidConfig(format!(
                "tile_size ({tile_size}) must be in [{MIN_TILE_SIZE}, {MAX_TILE_SIZE}]"
            )));
        }
        if self.weights.capital == 0 || self.weights.ordinary == 0 {
            return Err(AtlasError::InvalidConfig(
                "marker weights must be positive".into(),
            ));
        }
        if self.builder.write_queue_depth == 0 {
            return Err(AtlasError::InvalidConfig(
                "write_queue_depth must be at least 1".into(),
            ));
        }
        if self.builder.retained_jobs == 0 {
            return Err(AtlasError::InvalidConfig(
                "retained_jobs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AtlasConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.weights.capital, 3);
        assert_eq!(config.weights.ordinary, 1);
        assert_eq!(config.tiles.tile_size, 10.0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AtlasConfig::from_toml_str(
            r#"
            [tiles]
            tile_size = 5.0

            [builder]
            worker_threads = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.tiles.tile_size, 5.0);
        assert_eq!(config.builder.worker_threads, 2);
        assert_eq!(config.builder.write_queue_depth, 64);
        assert_eq!(config.sources.ttl_secs, 300);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(AtlasConfig::from_toml_str("").unwrap(), AtlasConfig::default());
    }

    #[test]
    fn test_zero_weight_rejected() {
        let err = AtlasConfig::from_toml_str("[weights]\nordinary = 0\n").unwrap_err();
        assert!(matches!(err, AtlasError::InvalidConfig(_)));
    }

    #[test]
    fn test_bad_tile_size_rejected() {
        assert!(AtlasConfig::from_toml_str("[tiles]\ntile_size = -1.0\n").is_err());
        assert!(AtlasConfig::from_toml_str("[tiles]\ntile_size = nan\n").is_err());
    }

    #[test]
    fn test_tiny_tile_size_rejected() {
        let err = AtlasConfig::from_toml_str("[tiles]\ntile_size = 1e-9\n").unwrap_err();
        assert!(matches!(err, AtlasError::InvalidConfig(_)));
        assert!(AtlasConfig::from_toml_str("[tiles]\ntile_size = 0.1\n").is_ok());
    }

    #[test]
    fn test_zero_retained_jobs_rejected() {
        let err = AtlasConfig::from_toml_str("[builder]\nretained_jobs = 0\n").unwrap_err();
        assert!(matches!(err, AtlasError::InvalidConfig(_)));
    }
}
