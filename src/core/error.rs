use thiserror::Error;

use crate::core::types::JobId;

#[derive(Error, Debug)]
pub enum AtlasError {
    #[error("Invalid period range: end year {end} is before start year {start}")]
    InvalidRange { start: i32, end: i32 },

    #[error("Invalid period range: {years} years exceeds the {max} year limit")]
    RangeTooLong { years: i64, max: i64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Source read failed: {0}")]
    Source(String),

    #[error("Cache store failed: {0}")]
    Store(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, AtlasError>;
