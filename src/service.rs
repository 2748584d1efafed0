//! AtlasService - the operations exposed to the API layer
//!
//! Reads never compute: sovereignty comes from the cache store and regions
//! from the tile partition. Recomputation runs as a background job.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::builder::{panic_message, BuildReport, PeriodCacheBuilder};
use crate::cache::job::{JobHandle, JobRegistry, JobSnapshot};
use crate::cache::sources::{CountrySource, Dataset, MarkerSource, RegionSource, SourceCache};
use crate::cache::store::{SovereigntyRecord, SovereigntyStore};
use crate::core::config::AtlasConfig;
use crate::core::error::{AtlasError, Result};
use crate::core::period::{Granularity, Period, PeriodRange};
use crate::core::types::JobId;
use crate::model::region::Region;
use crate::spatial::geometry::BoundingBox;
use crate::spatial::tiles::{TileIndex, TilePartition};

pub struct AtlasService {
    sources: Arc<SourceCache>,
    tiles: TilePartition,
    store: Arc<dyn SovereigntyStore>,
    builder: Arc<PeriodCacheBuilder>,
    jobs: JobRegistry,
}

impl AtlasService {
    /// Wire the service and build the initial tile partition
    pub fn new(
        config: &AtlasConfig,
        regions: Arc<dyn RegionSource>,
        markers: Arc<dyn MarkerSource>,
        countries: Arc<dyn CountrySource>,
        store: Arc<dyn SovereigntyStore>,
    ) -> Result<Self> {
        config.validate()?;

        let sources = Arc::new(SourceCache::new(
            regions,
            countries,
            Duration::from_secs(config.sources.ttl_secs),
        ));
        let builder = PeriodCacheBuilder::new(
            Arc::clone(&sources),
            markers,
            Arc::clone(&store),
            config.weights.clone(),
            &config.builder,
        )?;

        let service = Self {
            sources,
            tiles: TilePartition::new(config.tiles.tile_size),
            store,
            builder: Arc::new(builder),
            jobs: JobRegistry::new(config.builder.retained_jobs),
        };
        service.rebuild_tiles()?;
        Ok(service)
    }

    pub fn from_dataset(
        config: &AtlasConfig,
        dataset: Arc<Dataset>,
        store: Arc<dyn SovereigntyStore>,
    ) -> Result<Self> {
        Self::new(config, dataset.clone(), dataset.clone(), dataset, store)
    }

    /// Cached records for exactly this period
    pub fn get_sovereignty(
        &self,
        year: i32,
        month: Option<u8>,
    ) -> Result<Vec<SovereigntyRecord>> {
        self.store.find(Period { year, month })
    }

    /// Validate the range and start a background rebuild of it.
    ///
    /// Returns as soon as the job is registered. Per-period failures surface
    /// only through the job's report and the logs. The job always reaches a
    /// terminal status, even if the build itself panics.
    pub fn trigger_recompute(
        &self,
        start_year: i32,
        end_year: i32,
        monthly: bool,
    ) -> Result<JobHandle> {
        let granularity = Granularity::from_monthly_flag(monthly);
        let range = PeriodRange::new(start_year, end_year, granularity)?;
        let handle = JobHandle::new(range);
        self.jobs.insert(handle.clone());

        tracing::info!(
            job_id = %handle.id(),
            start_year,
            end_year,
            monthly,
            periods = range.len(),
            "Recompute queued"
        );

        let builder = Arc::clone(&self.builder);
        let job = handle.clone();
        let work = move || {
            job.mark_running();
            let built = panic::catch_unwind(AssertUnwindSafe(|| {
                builder.build(job.range(), job.cancel_token(), job.counters())
            }));
            let report = built.unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                tracing::error!(job_id = %job.id(), panic = %message, "Recompute panicked");
                let reason = AtlasError::WorkerPanicked(message).to_string();
                BuildReport::all_failed(&job.range().periods(), &reason)
            });
            let status = job.finish(report);
            tracing::info!(job_id = %job.id(), ?status, "Recompute finished");
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(work);
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name(format!("recompute-{}", handle.id()))
                    .spawn(work);
                if let Err(e) = spawned {
                    handle.finish(BuildReport::all_failed(&range.periods(), &e.to_string()));
                    return Err(e.into());
                }
            }
        }
        Ok(handle)
    }

    /// Regions whose bbox intersects the viewport, by ascending id
    pub fn get_tile(&self, lat_range: (f64, f64), lng_range: (f64, f64)) -> Vec<Arc<Region>> {
        let viewport = BoundingBox::new(
            lat_range.0.min(lat_range.1),
            lat_range.0.max(lat_range.1),
            lng_range.0.min(lng_range.1),
            lng_range.0.max(lng_range.1),
        );
        self.tiles.regions_in(&viewport)
    }

    pub fn invalidate_cache(&self, year: Option<i32>, month: Option<u8>) -> Result<usize> {
        self.store.invalidate(year, month)
    }

    pub fn job(&self, id: JobId) -> Result<JobHandle> {
        self.jobs.get(id).ok_or(AtlasError::JobNotFound(id))
    }

    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.jobs.list()
    }

    pub fn tiles(&self) -> Arc<TileIndex> {
        self.tiles.load()
    }

    /// Region set edited: refetch sources and swap in a new tile partition.
    /// Cached records are left alone; use `invalidate_cache` for those.
    pub fn regions_changed(&self) -> Result<()> {
        self.sources.invalidate();
        self.rebuild_tiles()
    }

    /// Marker or country data edited: the next build refetches sources
    pub fn markers_changed(&self) {
        tracing::debug!("Marker data changed, source snapshot dropped");
        self.sources.invalidate();
    }

    fn rebuild_tiles(&self) -> Result<()> {
        let snapshot = self.sources.snapshot()?;
        self.tiles.rebuild(&snapshot.regions);
        Ok(())
    }
}
