//! Period cache: persisted sovereignty records, source snapshots, the batch
//! builder and the background job surface around it

pub mod builder;
pub mod job;
pub mod sources;
pub mod store;

pub use builder::{BuildReport, PeriodCacheBuilder};
pub use job::{
    CancelToken, JobHandle, JobProgress, JobRegistry, JobSnapshot, JobStatus, ProgressCounters,
};
pub use sources::{CountrySource, Dataset, MarkerSource, RegionSource, SourceCache, SourceSnapshot};
pub use store::{
    MemoryStore, RecordKey, SovereigntyRecord, SovereigntyStore, WriteBatch, WriteSummary,
};
