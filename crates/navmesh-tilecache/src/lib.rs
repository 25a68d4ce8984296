//! Obstacle-aware tile cache for navigation meshes
//!
//! This crate stores compressed voxel layers for a grid of tiles and rebuilds
//! the navigation mesh of individual tiles when temporary obstacles are added
//! or removed. The static geometry is never re-voxelized: each rebuild starts
//! from the stored layer, carves the current obstacles into it and runs the
//! region, contour and polygon mesh builders on that single tile.
//!
//! # Features
//!
//! - **Tile Caching**: Compressed storage of voxel layers, one per (x, y, layer)
//! - **Dynamic Obstacles**: Add/remove cylinder, box, and oriented box obstacles
//! - **Incremental Updates**: Each `update` call rebuilds at most one tile
//! - **Safe Handles**: Salted tile and obstacle references that go stale on reuse
//! - **Compression**: LZ4 compression for efficient tile storage
//!
//! # Example
//!
//! ```rust,ignore
//! use navmesh_tilecache::{Lz4Compressor, TileCache, TileCacheParams, TileMeshCollector};
//! use glam::Vec3;
//!
//! let params = TileCacheParams::default()
//!     .with_tile_size(48, 48)
//!     .with_max_obstacles(128);
//! let mut tile_cache = TileCache::new(params, Box::new(Lz4Compressor))?;
//!
//! // Layers come from an offline voxelization step
//! for layer in layers {
//!     tile_cache.add_tile(layer, 0)?;
//! }
//!
//! let mut navmesh = TileMeshCollector::new();
//! let obstacle = tile_cache.add_cylinder(Vec3::new(10.0, 0.0, 10.0), 2.0, 4.0)?;
//! while !tile_cache.update(&mut navmesh)? {}
//!
//! // Remove the obstacle later
//! tile_cache.remove_obstacle(obstacle)?;
//! while !tile_cache.update(&mut navmesh)? {}
//! ```
//!
//! # Architecture
//!
//! - [`TileCache`]: Main cache managing tiles, obstacles and the rebuild queue
//! - [`TileCacheBuilder`]: Runs the rebuild pipeline for one tile
//! - [`TileCacheLayer`]: Decompressed layer grid worked on by the builders
//! - [`TileMeshAssembler`]: Receives rebuilt tiles

pub mod compressor;
pub mod handle_pool;
pub mod layer_contours;
pub mod layer_polymesh;
pub mod layer_regions;
pub mod obstacle;
pub mod tile_cache;
pub mod tile_cache_builder;
pub mod tile_cache_data;
pub mod tile_cache_integration;

#[cfg(test)]
mod test_layer_helpers;

pub use compressor::*;
pub use handle_pool::{ObstacleRef, SlotPool, TileRef};
pub use layer_contours::*;
pub use layer_polymesh::*;
pub use layer_regions::*;
pub use obstacle::*;
pub use tile_cache::*;
pub use tile_cache_builder::*;
pub use tile_cache_data::*;
pub use tile_cache_integration::*;

pub use recast_common::{Error, Result};
