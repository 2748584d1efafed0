//! Background recompute jobs: status, progress, cancellation

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::cache::builder::BuildReport;
use crate::core::period::PeriodRange;
use crate::core::types::JobId;

/// Lifecycle of a recompute job.
///
/// `Cancelled` is terminal and only reached through [`JobHandle::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    PartialFailure,
    Done,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::PartialFailure | JobStatus::Done | JobStatus::Cancelled
        )
    }

    pub fn from_report(report: &BuildReport) -> Self {
        if report.cancelled_skipped > 0 {
            JobStatus::Cancelled
        } else if !report.periods_failed.is_empty() {
            JobStatus::PartialFailure
        } else {
            JobStatus::Done
        }
    }
}

/// Cooperative cancellation flag, checked before each period starts
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Live period counters shared with the builder
#[derive(Debug, Default)]
pub struct ProgressCounters {
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl ProgressCounters {
    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> JobProgress {
        JobProgress {
            total: self.total.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Periods processed so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Serializable view of a job for the API layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub range: PeriodRange,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub report: Option<BuildReport>,
}

/// Creation order; timestamps can tie
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
struct JobState {
    id: JobId,
    seq: u64,
    range: PeriodRange,
    status: watch::Sender<JobStatus>,
    progress: ProgressCounters,
    cancel: CancelToken,
    report: Mutex<Option<BuildReport>>,
    created_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

/// Cheap-to-clone handle onto one job
#[derive(Debug, Clone)]
pub struct JobHandle(Arc<JobState>);

impl JobHandle {
    pub fn new(range: PeriodRange) -> Self {
        let (status, _) = watch::channel(JobStatus::Queued);
        Self(Arc::new(JobState {
            id: JobId::new(),
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            range,
            status,
            progress: ProgressCounters::default(),
            cancel: CancelToken::new(),
            report: Mutex::new(None),
            created_at: Utc::now(),
            finished_at: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> JobId {
        self.0.id
    }

    pub fn range(&self) -> PeriodRange {
        self.0.range
    }

    pub fn status(&self) -> JobStatus {
        *self.0.status.borrow()
    }

    pub fn progress(&self) -> JobProgress {
        self.0.progress.snapshot()
    }

    pub fn counters(&self) -> &ProgressCounters {
        &self.0.progress
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.0.cancel
    }

    /// Request cancellation. Periods already started still finish.
    pub fn cancel(&self) {
        tracing::info!(job_id = %self.0.id, "Job cancellation requested");
        self.0.cancel.cancel();
    }

    pub fn report(&self) -> Option<BuildReport> {
        self.0
            .report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether `finish` has published a terminal status
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn mark_running(&self) {
        self.0.status.send_replace(JobStatus::Running);
    }

    /// Store the report and publish the terminal status it implies
    pub fn finish(&self, report: BuildReport) -> JobStatus {
        let status = JobStatus::from_report(&report);
        *self.0.report.lock().unwrap_or_else(PoisonError::into_inner) = Some(report);
        *self
            .0
            .finished_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        self.0.status.send_replace(status);
        status
    }

    /// Resolve once the job reaches a terminal status
    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.0.status.subscribe();
        let status = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        status
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.0.id,
            range: self.0.range,
            status: self.status(),
            progress: self.progress(),
            created_at: self.0.created_at,
            finished_at: *self
                .0
                .finished_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            report: self.report(),
        }
    }
}

/// Jobs by id, queryable while and after they run.
///
/// Only the most recent `retain_finished` finished jobs are kept; older
/// finished jobs are evicted on insert. Unfinished jobs are never evicted.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: Mutex<AHashMap<JobId, JobHandle>>,
    retain_finished: usize,
}

impl JobRegistry {
    pub fn new(retain_finished: usize) -> Self {
        Self {
            jobs: Mutex::new(AHashMap::new()),
            retain_finished,
        }
    }

    pub fn insert(&self, handle: JobHandle) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(handle.id(), handle);

        let mut finished: Vec<(u64, JobId)> = jobs
            .values()
            .filter(|job| job.is_finished())
            .map(|job| (job.0.seq, job.id()))
            .collect();
        if finished.len() <= self.retain_finished {
            return;
        }
        finished.sort_unstable_by_key(|&(seq, _)| seq);
        let excess = finished.len() - self.retain_finished;
        for (_, id) in finished.into_iter().take(excess) {
            jobs.remove(&id);
        }
        tracing::debug!(evicted = excess, "Finished jobs evicted from registry");
    }

    pub fn get(&self, id: JobId) -> Option<JobHandle> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// All jobs, oldest first
    pub fn list(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut handles: Vec<&JobHandle> = jobs.values().collect();
        handles.sort_by_key(|job| job.0.seq);
        handles.into_iter().map(JobHandle::snapshot).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::period::{Granularity, Period};

    fn range() -> PeriodRange {
        PeriodRange::new(1000, 1001, Granularity::Yearly).unwrap()
    }

    fn report(failed: usize, cancelled: usize) -> BuildReport {
        BuildReport {
            periods_total: 2,
            periods_written: 2 - failed - cancelled,
            periods_failed: (0..failed)
                .map(|i| (Period::year(1000 + i as i32), "boom".into()))
                .collect(),
            cancelled_skipped: cancelled,
            records_upserted: 0,
            records_deleted: 0,
        }
    }

    #[test]
    fn test_status_from_report() {
        assert_eq!(JobStatus::from_report(&report(0, 0)), JobStatus::Done);
        assert_eq!(JobStatus::from_report(&report(1, 0)), JobStatus::PartialFailure);
        assert_eq!(JobStatus::from_report(&report(1, 1)), JobStatus::Cancelled);
    }

    #[test]
    fn test_handle_lifecycle() {
        let handle = JobHandle::new(range());
        assert_eq!(handle.status(), JobStatus::Queued);
        handle.mark_running();
        assert_eq!(handle.status(), JobStatus::Running);
        assert!(handle.report().is_none());

        assert_eq!(handle.finish(report(0, 0)), JobStatus::Done);
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.status, JobStatus::Done);
        assert!(snapshot.finished_at.is_some());
        assert_eq!(snapshot.report.unwrap().periods_written, 2);
    }

    #[test]
    fn test_cancel_shared_across_clones() {
        let handle = JobHandle::new(range());
        let clone = handle.clone();
        clone.cancel();
        assert!(handle.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_resolves_on_finish() {
        let handle = JobHandle::new(range());
        let worker = handle.clone();
        tokio::spawn(async move {
            worker.mark_running();
            worker.finish(report(1, 0));
        });
        assert_eq!(handle.wait().await, JobStatus::PartialFailure);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = JobRegistry::new(8);
        let handle = JobHandle::new(range());
        registry.insert(handle.clone());
        assert_eq!(registry.get(handle.id()).unwrap().id(), handle.id());
        assert!(registry.get(JobId::new()).is_none());
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_registry_evicts_oldest_finished_jobs() {
        let registry = JobRegistry::new(2);
        let running = JobHandle::new(range());
        running.mark_running();
        registry.insert(running.clone());

        let finished: Vec<JobHandle> = (0..4)
            .map(|_| {
                let job = JobHandle::new(range());
                job.finish(report(0, 0));
                registry.insert(job.clone());
                job
            })
            .collect();

        // The running job plus the two newest finished ones
        assert_eq!(registry.len(), 3);
        assert!(registry.get(running.id()).is_some());
        assert!(registry.get(finished[0].id()).is_none());
        assert!(registry.get(finished[1].id()).is_none());
        assert!(registry.get(finished[2].id()).is_some());
        assert!(registry.get(finished[3].id()).is_some());

        let listed: Vec<JobId> = registry.list().iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![running.id(), finished[2].id(), finished[3].id()]);
    }
}
