//! Hand-off of rebuilt tiles to the navigation mesh
//!
//! The cache does not own a navigation mesh. Every successful rebuild produces
//! a [`NavMeshTileParams`] bundle that is passed to a [`TileMeshAssembler`],
//! which replaces whatever it held for that tile position.

use std::collections::HashMap;

use glam::Vec3;
use recast_common::Result;

use crate::layer_polymesh::TileCachePoly;

/// Everything needed to create one navigation mesh tile
#[derive(Debug, Clone, PartialEq)]
pub struct NavMeshTileParams {
    /// Polygon mesh vertices in cell units, relative to `bmin`
    pub verts: Vec<[u16; 3]>,
    /// Polygons
    pub polys: Vec<TileCachePoly>,
    /// Area id per polygon
    pub poly_areas: Vec<u8>,
    /// User flags per polygon
    pub poly_flags: Vec<u16>,
    /// Maximum vertices per polygon
    pub nvp: usize,
    /// Tile position X
    pub tile_x: i32,
    /// Tile position Y
    pub tile_y: i32,
    /// Layer index within the tile column
    pub tile_layer: i32,
    /// World-space bounds minimum
    pub bmin: Vec3,
    /// World-space bounds maximum
    pub bmax: Vec3,
    /// Cell size
    pub cs: f32,
    /// Cell height
    pub ch: f32,
    /// Agent height
    pub walkable_height: f32,
    /// Agent radius
    pub walkable_radius: f32,
    /// Maximum step height
    pub walkable_climb: f32,
}

impl NavMeshTileParams {
    /// Number of polygons
    pub fn poly_count(&self) -> usize {
        self.polys.len()
    }

    /// World-space position of mesh vertex `i`
    pub fn vertex_position(&self, i: usize) -> Vec3 {
        let v = self.verts[i];
        self.bmin + Vec3::new(v[0] as f32 * self.cs, v[1] as f32 * self.ch, v[2] as f32 * self.cs)
    }
}

/// Receives rebuilt tiles
pub trait TileMeshAssembler {
    /// Replaces the contribution of the tile at the position in `params`
    fn add_tile(&mut self, params: &NavMeshTileParams) -> Result<()>;

    /// Drops the contribution of the tile at (tx, ty, layer), if any
    fn remove_tile(&mut self, tx: i32, ty: i32, layer: i32) -> Result<()>;
}

/// Hook run on every rebuilt tile before it is handed to the assembler.
///
/// Typically assigns polygon flags from area ids.
pub trait TileCacheMeshProcess: std::fmt::Debug + Send + Sync {
    fn process(&self, params: &mut NavMeshTileParams);
}

/// In-memory assembler keeping the latest mesh of every tile position
#[derive(Debug, Default)]
pub struct TileMeshCollector {
    tiles: HashMap<(i32, i32, i32), NavMeshTileParams>,
    builds: usize,
    removals: usize,
}

impl TileMeshCollector {
    /// Creates an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Mesh currently held for (tx, ty, layer)
    pub fn tile(&self, tx: i32, ty: i32, layer: i32) -> Option<&NavMeshTileParams> {
        self.tiles.get(&(tx, ty, layer))
    }

    /// Number of tile positions holding a mesh
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Number of `add_tile` calls received
    pub fn build_count(&self) -> usize {
        self.builds
    }

    /// Number of `remove_tile` calls received
    pub fn removal_count(&self) -> usize {
        self.removals
    }

    /// Total polygon count over all held tiles
    pub fn poly_count(&self) -> usize {
        self.tiles.values().map(NavMeshTileParams::poly_count).sum()
    }
}

impl TileMeshAssembler for TileMeshCollector {
    fn add_tile(&mut self, params: &NavMeshTileParams) -> Result<()> {
        self.builds += 1;
        self.tiles.insert(
            (params.tile_x, params.tile_y, params.tile_layer),
            params.clone(),
        );
        Ok(())
    }

    fn remove_tile(&mut self, tx: i32, ty: i32, layer: i32) -> Result<()> {
        self.removals += 1;
        self.tiles.remove(&(tx, ty, layer));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_at(tx: i32, ty: i32, npolys: usize) -> NavMeshTileParams {
        NavMeshTileParams {
            verts: vec![[0, 0, 0], [0, 0, 4], [4, 2, 4]],
            polys: vec![TileCachePoly::default(); npolys],
            poly_areas: vec![1; npolys],
            poly_flags: vec![0; npolys],
            nvp: 6,
            tile_x: tx,
            tile_y: ty,
            tile_layer: 0,
            bmin: Vec3::new(10.0, 1.0, 20.0),
            bmax: Vec3::new(12.0, 3.0, 22.0),
            cs: 0.5,
            ch: 0.25,
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
        }
    }

    #[test]
    fn test_collector_replaces_tiles() {
        let mut collector = TileMeshCollector::new();
        collector.add_tile(&params_at(0, 0, 1)).unwrap();
        collector.add_tile(&params_at(1, 0, 2)).unwrap();
        collector.add_tile(&params_at(0, 0, 3)).unwrap();

        assert_eq!(collector.build_count(), 3);
        assert_eq!(collector.tile_count(), 2);
        assert_eq!(collector.tile(0, 0, 0).unwrap().poly_count(), 3);
        assert_eq!(collector.poly_count(), 5);

        collector.remove_tile(0, 0, 0).unwrap();
        // Removing an absent tile is not an error
        collector.remove_tile(7, 7, 0).unwrap();
        assert_eq!(collector.removal_count(), 2);
        assert!(collector.tile(0, 0, 0).is_none());
        assert_eq!(collector.tile_count(), 1);
    }

    #[test]
    fn test_vertex_position() {
        let params = params_at(0, 0, 1);
        assert_eq!(params.vertex_position(2), Vec3::new(12.0, 1.5, 22.0));
    }
}
