//! Spatial primitives: region geometry, containment and the tile partition

pub mod geometry;
pub mod tiles;

pub use geometry::{point_in_ring, BoundingBox, Containment, Geometry, RayCasting};
pub use tiles::{Tile, TileGrid, TileIndex, TileKey, TilePartition};
