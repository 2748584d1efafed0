//! Period cache builder
//!
//! Periods are independent, so they fan out over a rayon pool. Each worker
//! resolves one period into a [`WriteBatch`] and hands it to a single writer
//! thread over a bounded channel; only the writer touches the store.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;

use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::job::{CancelToken, ProgressCounters};
use crate::cache::sources::{MarkerSource, SourceCache, SourceSnapshot};
use crate::cache::store::{SovereigntyRecord, SovereigntyStore, WriteBatch};
use crate::core::config::{BuilderConfig, WeightConfig};
use crate::core::error::{AtlasError, Result};
use crate::core::period::{Period, PeriodRange};
use crate::model::country::UNKNOWN_COLOR;
use crate::sovereignty::painter::HierarchicalPainter;
use crate::sovereignty::tally::collect_ballots;

const UNKNOWN_COUNTRY: &str = "Unknown";

/// Outcome of one build over a period range
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub periods_total: usize,
    pub periods_written: usize,
    /// Failed periods with the reason, in chronological order
    pub periods_failed: Vec<(Period, String)>,
    /// Periods never started because the build was cancelled
    pub cancelled_skipped: usize,
    pub records_upserted: usize,
    pub records_deleted: usize,
}

impl BuildReport {
    pub fn is_clean(&self) -> bool {
        self.periods_failed.is_empty() && self.cancelled_skipped == 0
    }

    /// Every period failed for the same reason
    pub fn all_failed(periods: &[Period], reason: &str) -> Self {
        Self {
            periods_total: periods.len(),
            periods_failed: periods.iter().map(|&p| (p, reason.to_string())).collect(),
            ..Self::default()
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// What a worker sends to the writer for one period
enum PeriodOutcome {
    Computed(WriteBatch),
    Failed(Period, String),
    Cancelled,
}

pub struct PeriodCacheBuilder {
    sources: Arc<SourceCache>,
    markers: Arc<dyn MarkerSource>,
    store: Arc<dyn SovereigntyStore>,
    painter: HierarchicalPainter,
    weights: WeightConfig,
    queue_depth: usize,
    pool: rayon::ThreadPool,
}

impl PeriodCacheBuilder {
    pub fn new(
        sources: Arc<SourceCache>,
        markers: Arc<dyn MarkerSource>,
        store: Arc<dyn SovereigntyStore>,
        weights: WeightConfig,
        config: &BuilderConfig,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("period-worker-{i}"))
            .build()
            .map_err(|e| AtlasError::InvalidConfig(format!("worker pool: {e}")))?;

        Ok(Self {
            sources,
            markers,
            store,
            painter: HierarchicalPainter::default(),
            weights,
            queue_depth: config.write_queue_depth.max(1),
            pool,
        })
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Build without external cancellation or progress reporting
    pub fn run(&self, range: PeriodRange) -> BuildReport {
        self.build(range, &CancelToken::new(), &ProgressCounters::default())
    }

    /// Compute and persist every period in `range`.
    ///
    /// A period that fails is logged and reported; the rest still run.
    /// Cancellation is honoured before each period starts.
    /// A panic while computing a period fails that period only.
    pub fn build(
        &self,
        range: PeriodRange,
        cancel: &CancelToken,
        progress: &ProgressCounters,
    ) -> BuildReport {
        let periods = range.periods();
        progress.set_total(periods.len());
        let start = std::time::Instant::now();

        tracing::info!(
            start_year = range.start_year(),
            end_year = range.end_year(),
            granularity = ?range.granularity(),
            periods = periods.len(),
            workers = self.worker_threads(),
            "Period cache build started"
        );

        let snapshot = match self.sources.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Region/country sources unavailable, no period built"
                );
                for _ in &periods {
                    progress.record_failed();
                }
                return BuildReport::all_failed(&periods, &e.to_string());
            }
        };

        let (tx, rx) = sync_channel::<PeriodOutcome>(self.queue_depth);

        let mut report = std::thread::scope(|scope| {
            let writer = scope.spawn(|| self.write_loop(rx, progress));

            self.pool.install(|| {
                periods.par_iter().for_each_with(tx, |tx, &period| {
                    let outcome = if cancel.is_cancelled() {
                        PeriodOutcome::Cancelled
                    } else {
                        self.compute_contained(&snapshot, period)
                    };
                    // The writer only hangs up if it panicked
                    let _ = tx.send(outcome);
                });
            });

            writer.join().unwrap_or_else(|_| {
                tracing::error!("Cache writer panicked");
                let reason = AtlasError::WorkerPanicked("cache writer".into()).to_string();
                BuildReport::all_failed(&periods, &reason)
            })
        });

        report.periods_total = periods.len();
        report.periods_failed.sort_by_key(|(p, _)| *p);

        tracing::info!(
            written = report.periods_written,
            failed = report.periods_failed.len(),
            cancelled = report.cancelled_skipped,
            upserted = report.records_upserted,
            deleted = report.records_deleted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Period cache build finished"
        );
        report
    }

    /// Compute one period, turning a panic into a failed period
    fn compute_contained(&self, snapshot: &SourceSnapshot, period: Period) -> PeriodOutcome {
        let computed = panic::catch_unwind(AssertUnwindSafe(|| {
            self.compute_period(snapshot, period)
        }));
        match computed {
            Ok(Ok(batch)) => PeriodOutcome::Computed(batch),
            Ok(Err(e)) => PeriodOutcome::Failed(period, e.to_string()),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(%period, panic = %message, "Period worker panicked");
                PeriodOutcome::Failed(period, AtlasError::WorkerPanicked(message).to_string())
            }
        }
    }

    /// Single serialized write path
    fn write_loop(&self, rx: Receiver<PeriodOutcome>, progress: &ProgressCounters) -> BuildReport {
        let mut report = BuildReport::default();

        for outcome in rx {
            match outcome {
                PeriodOutcome::Computed(batch) => {
                    let period = batch.period;
                    match self.store.apply(batch) {
                        Ok(summary) => {
                            report.periods_written += 1;
                            report.records_upserted += summary.upserted;
                            report.records_deleted += summary.deleted;
                            progress.record_completed();
                            tracing::debug!(
                                %period,
                                upserted = summary.upserted,
                                deleted = summary.deleted,
                                "Period written"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(
                                %period,
                                error = %e,
                                "Period write failed, skipped"
                            );
                            report.periods_failed.push((period, e.to_string()));
                            progress.record_failed();
                        }
                    }
                }
                PeriodOutcome::Failed(period, reason) => {
                    tracing::warn!(
                        %period,
                        error = %reason,
                        "Period computation failed, skipped"
                    );
                    report.periods_failed.push((period, reason));
                    progress.record_failed();
                }
                PeriodOutcome::Cancelled => report.cancelled_skipped += 1,
            }
        }
        report
    }

    /// Resolve one period into upserts for winners and deletes for the rest.
    ///
    /// Skipped (degenerate) regions appear in neither list, so their existing
    /// rows stay as they were.
    pub fn compute_period(
        &self,
        snapshot: &SourceSnapshot,
        period: Period,
    ) -> Result<WriteBatch> {
        let markers = self.markers.markers_in(period)?;
        let ballots = collect_ballots(&markers, period, &snapshot.directory, &self.weights);
        let resolution = self.painter.paint(&snapshot.regions, &ballots, period);

        if !resolution.skipped.is_empty() {
            tracing::warn!(
                %period,
                skipped = resolution.skipped.len(),
                "Regions with malformed geometry left out of period"
            );
        }

        let computed_at = Utc::now();
        let mut batch = WriteBatch {
            period,
            upserts: Vec::new(),
            deletes: Vec::new(),
        };

        for assignment in &resolution.assignments {
            let Some(outcome) = assignment.winner() else {
                batch.deletes.push(assignment.region_id);
                continue;
            };
            let region_name = snapshot
                .region(assignment.region_id)
                .map(|r| r.name().to_string())
                .unwrap_or_default();
            let country = snapshot.directory.get(outcome.winner);

            batch.upserts.push(SovereigntyRecord {
                region_id: assignment.region_id,
                region_name,
                year: period.year,
                month: period.month,
                country_id: outcome.winner,
                country_name: country
                    .map_or(UNKNOWN_COUNTRY, |c| c.name.as_str())
                    .to_string(),
                color: country
                    .map_or(UNKNOWN_COLOR, |c| c.display_color())
                    .to_string(),
                vote_weight: outcome.winner_weight,
                marker_count: outcome.marker_count,
                state: assignment.state,
                computed_at,
            });
        }

        tracing::trace!(
            %period,
            ballots = ballots.len(),
            painted = batch.upserts.len(),
            "Period resolved"
        );
        Ok(batch)
    }
}
