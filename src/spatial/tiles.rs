//! Fixed-size lat/lng tile partition for viewport-scoped region retrieval
//!
//! Every region is bucketed into each tile its bounding box touches, so a
//! region spanning several tiles is listed in all of them. Rebuilds construct
//! a fresh index and swap it in whole; readers never see a half-built one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ahash::AHashMap;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::core::config::{MAX_TILE_SIZE, MIN_TILE_SIZE};
use crate::core::types::RegionId;
use crate::model::region::Region;
use crate::spatial::geometry::BoundingBox;

pub const WORLD_MIN_LAT: f64 = -90.0;
pub const WORLD_MAX_LAT: f64 = 90.0;
pub const WORLD_MIN_LNG: f64 = -180.0;
pub const WORLD_MAX_LNG: f64 = 180.0;

/// Tile coordinate: row counts up from the south pole, col from the antimeridian
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub row: i32,
    pub col: i32,
}

/// World grid geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    pub tile_size: f64,
}

impl TileGrid {
    /// Out-of-range sizes are clamped so the grid stays bounded
    pub fn new(tile_size: f64) -> Self {
        let tile_size = if tile_size.is_nan() {
            MIN_TILE_SIZE
        } else {
            tile_size.clamp(MIN_TILE_SIZE, MAX_TILE_SIZE)
        };
        Self { tile_size }
    }

    pub fn rows(&self) -> i32 {
        ((WORLD_MAX_LAT - WORLD_MIN_LAT) / self.tile_size).ceil() as i32
    }

    pub fn cols(&self) -> i32 {
        ((WORLD_MAX_LNG - WORLD_MIN_LNG) / self.tile_size).ceil() as i32
    }

    /// Inclusive span of cell indices touching `[lo, hi]` along one axis
    fn span(&self, lo: f64, hi: f64, origin: f64, cells: i32) -> (i32, i32) {
        let first = ((lo - origin) / self.tile_size).ceil() as i32 - 1;
        let last = ((hi - origin) / self.tile_size).floor() as i32;
        (first.clamp(0, cells - 1), last.clamp(0, cells - 1))
    }

    /// Bounds of one tile, clipped to the world extent
    pub fn bounds(&self, key: TileKey) -> BoundingBox {
        let lat_start = WORLD_MIN_LAT + key.row as f64 * self.tile_size;
        let lng_start = WORLD_MIN_LNG + key.col as f64 * self.tile_size;
        BoundingBox::new(
            lat_start,
            (lat_start + self.tile_size).min(WORLD_MAX_LAT),
            lng_start,
            (lng_start + self.tile_size).min(WORLD_MAX_LNG),
        )
    }

    /// Every tile whose bounds intersect `bbox`, edges inclusive
    pub fn keys_overlapping(&self, bbox: &BoundingBox) -> Vec<TileKey> {
        if bbox.max_lat < WORLD_MIN_LAT
            || bbox.min_lat > WORLD_MAX_LAT
            || bbox.max_lng < WORLD_MIN_LNG
            || bbox.min_lng > WORLD_MAX_LNG
        {
            return Vec::new();
        }

        let (first_row, last_row) =
            self.span(bbox.min_lat, bbox.max_lat, WORLD_MIN_LAT, self.rows());
        let (first_col, last_col) =
            self.span(bbox.min_lng, bbox.max_lng, WORLD_MIN_LNG, self.cols());

        let mut keys = Vec::new();
        for row in first_row..=last_row {
            for col in first_col..=last_col {
                keys.push(TileKey { row, col });
            }
        }
        keys
    }
}

/// One grid cell and the regions whose bounding box touches it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tile {
    pub lat_start: f64,
    pub lng_start: f64,
    pub tile_size: f64,
    pub regions: Vec<RegionId>,
}

/// Immutable snapshot of the whole partition
#[derive(Debug, Clone)]
pub struct TileIndex {
    grid: TileGrid,
    tiles: BTreeMap<TileKey, Tile>,
    regions: AHashMap<RegionId, Arc<Region>>,
}

impl TileIndex {
    pub fn empty(grid: TileGrid) -> Self {
        Self {
            grid,
            tiles: BTreeMap::new(),
            regions: AHashMap::new(),
        }
    }

    /// Bucket every region with a usable bounding box into the tiles it touches
    pub fn build(grid: TileGrid, regions: &[Arc<Region>]) -> Self {
        let mut index = Self::empty(grid);

        for region in regions {
            let Some(bbox) = region.bbox() else {
                tracing::debug!(
                    region_id = region.id().0,
                    "Region has no usable bbox, not tiled"
                );
                continue;
            };
            index.regions.insert(region.id(), Arc::clone(region));

            for key in grid.keys_overlapping(&bbox) {
                let bounds = grid.bounds(key);
                index
                    .tiles
                    .entry(key)
                    .or_insert_with(|| Tile {
                        lat_start: bounds.min_lat,
                        lng_start: bounds.min_lng,
                        tile_size: grid.tile_size,
                        regions: Vec::new(),
                    })
                    .regions
                    .push(region.id());
            }
        }

        for tile in index.tiles.values_mut() {
            tile.regions.sort();
            tile.regions.dedup();
        }
        index
    }

    pub fn grid(&self) -> TileGrid {
        self.grid
    }

    pub fn tile(&self, key: TileKey) -> Option<&Tile> {
        self.tiles.get(&key)
    }

    pub fn tiles(&self) -> impl Iterator<Item = (&TileKey, &Tile)> {
        self.tiles.iter()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Regions whose bbox intersects the viewport, de-duplicated, by ascending id
    pub fn regions_in(&self, viewport: &BoundingBox) -> Vec<Arc<Region>> {
        let mut ids = BTreeSet::new();
        for key in self.grid.keys_overlapping(viewport) {
            if let Some(tile) = self.tiles.get(&key) {
                ids.extend(tile.regions.iter().copied());
            }
        }

        ids.into_iter()
            .filter_map(|id| self.regions.get(&id))
            .filter(|region| region.bbox().is_some_and(|bbox| bbox.intersects(viewport)))
            .cloned()
            .collect()
    }

    /// Serializable view, one entry per populated tile
    pub fn to_tiles(&self) -> Vec<Tile> {
        self.tiles.values().cloned().collect()
    }
}

/// Shared handle to the current partition; rebuilds swap atomically
pub struct TilePartition {
    grid: TileGrid,
    current: ArcSwap<TileIndex>,
}

impl TilePartition {
    pub fn new(tile_size: f64) -> Self {
        let grid = TileGrid::new(tile_size);
        Self {
            grid,
            current: ArcSwap::from_pointee(TileIndex::empty(grid)),
        }
    }

    /// Consistent view; stays valid even if a rebuild swaps in new data
    pub fn load(&self) -> Arc<TileIndex> {
        self.current.load_full()
    }

    pub fn rebuild(&self, regions: &[Arc<Region>]) {
        let start = std::time::Instant::now();
        let index = TileIndex::build(self.grid, regions);
        let (tiles, tiled) = (index.tile_count(), index.region_count());
        self.current.store(Arc::new(index));
        tracing::info!(
            tiles,
            regions = tiled,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tile partition rebuilt"
        );
    }

    pub fn regions_in(&self, viewport: &BoundingBox) -> Vec<Arc<Region>> {
        self.load().regions_in(viewport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::region::RegionLevel;
    use crate::spatial::geometry::Geometry;

    fn region(id: u32, min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Arc<Region> {
        Arc::new(Region::new(
            RegionId(id),
            format!("region-{id}"),
            RegionLevel::Province,
            Geometry::rectangle(min_lat, max_lat, min_lng, max_lng),
        ))
    }

    #[test]
    fn test_grid_dimensions() {
        let grid = TileGrid::new(10.0);
        assert_eq!(grid.rows(), 18);
        assert_eq!(grid.cols(), 36);
        let bounds = grid.bounds(TileKey { row: 0, col: 0 });
        assert_eq!(bounds, BoundingBox::new(-90.0, -80.0, -180.0, -170.0));
    }

    #[test]
    fn test_tiny_tile_size_clamped() {
        let grid = TileGrid::new(1e-9);
        assert_eq!(grid.tile_size, MIN_TILE_SIZE);
        assert_eq!(grid.rows(), 1800);
        assert_eq!(grid.cols(), 3600);
        assert_eq!(TileGrid::new(f64::NAN).tile_size, MIN_TILE_SIZE);
        assert_eq!(TileGrid::new(500.0).rows(), 1);
    }

    #[test]
    fn test_region_inside_single_tile() {
        let grid = TileGrid::new(10.0);
        let keys = grid.keys_overlapping(&BoundingBox::new(33.0, 36.0, 126.0, 129.0));
        // lat 30..40 is row 12, lng 120..130 is col 30
        assert_eq!(keys, vec![TileKey { row: 12, col: 30 }]);
    }

    #[test]
    fn test_spanning_region_listed_in_every_tile() {
        let regions = [region(1, 35.0, 45.0, 125.0, 135.0)];
        let index = TileIndex::build(TileGrid::new(10.0), &regions);
        assert_eq!(index.tile_count(), 4);
        for (_, tile) in index.tiles() {
            assert_eq!(tile.regions, vec![RegionId(1)]);
        }
    }

    #[test]
    fn test_edge_touching_counts_as_overlap() {
        let grid = TileGrid::new(10.0);
        let keys = grid.keys_overlapping(&BoundingBox::new(32.0, 40.0, 122.0, 128.0));
        assert_eq!(
            keys,
            vec![TileKey { row: 12, col: 30 }, TileKey { row: 13, col: 30 }]
        );
    }

    #[test]
    fn test_world_edges_clamped() {
        let grid = TileGrid::new(10.0);
        let keys = grid.keys_overlapping(&BoundingBox::new(85.0, 90.0, 175.0, 180.0));
        assert_eq!(keys, vec![TileKey { row: 17, col: 35 }]);
    }

    #[test]
    fn test_viewport_query_dedups() {
        let partition = TilePartition::new(10.0);
        partition.rebuild(&[
            region(2, 35.0, 45.0, 125.0, 135.0),
            region(1, 33.0, 34.0, 126.0, 127.0),
            region(3, -10.0, -5.0, 0.0, 5.0),
        ]);
        let found: Vec<RegionId> = partition
            .regions_in(&BoundingBox::new(30.0, 50.0, 120.0, 140.0))
            .iter()
            .map(|r| r.id())
            .collect();
        assert_eq!(found, vec![RegionId(1), RegionId(2)]);
    }

    #[test]
    fn test_readers_keep_old_snapshot_across_rebuild() {
        let partition = TilePartition::new(10.0);
        partition.rebuild(&[region(1, 33.0, 34.0, 126.0, 127.0)]);
        let before = partition.load();

        partition.rebuild(&[region(7, -50.0, -40.0, 10.0, 20.0)]);

        assert_eq!(before.region_count(), 1);
        assert!(before.tile(TileKey { row: 12, col: 30 }).is_some());
        let after = partition.load();
        assert!(after.tile(TileKey { row: 12, col: 30 }).is_none());
    }

    #[test]
    fn test_degenerate_region_not_tiled() {
        let broken = Arc::new(Region::new(
            RegionId(9),
            "broken",
            RegionLevel::City,
            serde_json::from_str(r#"{"type":"Polygon"}"#).unwrap(),
        ));
        let index = TileIndex::build(TileGrid::new(10.0), &[broken]);
        assert_eq!(index.tile_count(), 0);
        assert_eq!(index.region_count(), 0);
    }
}
