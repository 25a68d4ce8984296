//! Rebuilds the navigation mesh of one tile from its stored layer
//!
//! The pipeline is: decompress the layer, carve the obstacles touching the
//! tile into it, partition regions, trace contours, build the polygon mesh and
//! package it as [`NavMeshTileParams`].

use glam::Vec3;
use recast_common::Result;

use crate::compressor::TileCacheCompressor;
use crate::layer_contours::build_tile_cache_contours;
use crate::layer_polymesh::{build_tile_cache_poly_mesh, TileCachePolyMesh};
use crate::layer_regions::build_tile_cache_regions;
use crate::obstacle::ObstacleShape;
use crate::tile_cache::TileCacheParams;
use crate::tile_cache_data::{
    decompress_tile_cache_layer, TileCacheLayerHeader, TileCacheStorageParams, NULL_AREA,
};
use crate::tile_cache_integration::{NavMeshTileParams, TileCacheMeshProcess};

/// Runs the per-tile rebuild pipeline with a cache's settings
#[derive(Debug, Clone, Copy)]
pub struct TileCacheBuilder<'a> {
    params: &'a TileCacheParams,
    compressor: &'a dyn TileCacheCompressor,
    storage: &'a TileCacheStorageParams,
    mesh_process: Option<&'a dyn TileCacheMeshProcess>,
}

impl<'a> TileCacheBuilder<'a> {
    /// Creates a builder borrowing the cache's parameters and codec
    pub fn new(
        params: &'a TileCacheParams,
        compressor: &'a dyn TileCacheCompressor,
        storage: &'a TileCacheStorageParams,
    ) -> Self {
        Self {
            params,
            compressor,
            storage,
            mesh_process: None,
        }
    }

    /// Sets the hook applied to every built tile
    pub fn with_mesh_process(mut self, mesh_process: Option<&'a dyn TileCacheMeshProcess>) -> Self {
        self.mesh_process = mesh_process;
        self
    }

    /// Walkable climb in cell-height units
    fn walkable_climb_vx(&self) -> i32 {
        (self.params.walkable_climb / self.params.ch) as i32
    }

    /// Decompresses `data`, carves `obstacles` into it and builds the
    /// polygon mesh. Returns the layer header with the mesh.
    pub fn build_poly_mesh<'o>(
        &self,
        data: &[u8],
        obstacles: impl IntoIterator<Item = &'o ObstacleShape>,
    ) -> Result<(TileCacheLayerHeader, TileCachePolyMesh)> {
        let mut layer = decompress_tile_cache_layer(self.compressor, data, self.storage)?;

        let mut carved = 0;
        for shape in obstacles {
            shape.rasterize(&mut layer, self.params.cs, self.params.ch, NULL_AREA);
            carved += 1;
        }

        let climb = self.walkable_climb_vx();
        build_tile_cache_regions(&mut layer, climb)?;
        let lcset =
            build_tile_cache_contours(&layer, climb, self.params.max_simplification_error)?;
        let mesh = build_tile_cache_poly_mesh(&lcset, self.params.max_verts_per_poly)?;

        log::debug!(
            "Rebuilt tile ({}, {}, {}) with {} obstacles: {} regions, {} polygons",
            layer.header.tx,
            layer.header.ty,
            layer.header.tlayer,
            carved,
            layer.reg_count,
            mesh.poly_count()
        );

        Ok((layer.header, mesh))
    }

    /// Builds the navigation mesh tile for `data`.
    ///
    /// Returns `None` when no walkable polygon remains, in which case the
    /// caller should drop the tile from the navigation mesh.
    pub fn build_tile<'o>(
        &self,
        data: &[u8],
        obstacles: impl IntoIterator<Item = &'o ObstacleShape>,
    ) -> Result<Option<NavMeshTileParams>> {
        let (header, mesh) = self.build_poly_mesh(data, obstacles)?;
        if mesh.polys.is_empty() {
            return Ok(None);
        }

        let mut params = NavMeshTileParams {
            verts: mesh.verts,
            polys: mesh.polys,
            poly_areas: mesh.areas,
            poly_flags: mesh.flags,
            nvp: mesh.nvp,
            tile_x: header.tx,
            tile_y: header.ty,
            tile_layer: header.tlayer,
            bmin: Vec3::from_array(header.bmin),
            bmax: Vec3::from_array(header.bmax),
            cs: self.params.cs,
            ch: self.params.ch,
            walkable_height: self.params.walkable_height,
            walkable_radius: self.params.walkable_radius,
            walkable_climb: self.params.walkable_climb,
        };

        if let Some(process) = self.mesh_process {
            process.process(&mut params);
        }

        Ok(Some(params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::Lz4Compressor;
    use crate::test_layer_helpers::LayerBuilder;

    const NO_OBSTACLES: [&ObstacleShape; 0] = [];

    #[derive(Debug)]
    struct FlagByArea;

    impl TileCacheMeshProcess for FlagByArea {
        fn process(&self, params: &mut NavMeshTileParams) {
            for (flags, &area) in params.poly_flags.iter_mut().zip(&params.poly_areas) {
                *flags = area as u16 + 1;
            }
        }
    }

    fn params() -> TileCacheParams {
        TileCacheParams::default()
            .with_cell_size(1.0, 1.0)
            .with_tile_size(16, 16)
            .with_walkable_climb(2.0)
    }

    #[test]
    fn test_build_flat_tile() {
        let params = params();
        let storage = TileCacheStorageParams::default();
        let data = LayerBuilder::new(16, 16)
            .grid(Vec3::ZERO, 1.0, 1.0)
            .tile(2, 3, 0)
            .encode(&Lz4Compressor, &storage);

        let builder = TileCacheBuilder::new(&params, &Lz4Compressor, &storage);
        let tile = builder.build_tile(&data, NO_OBSTACLES).unwrap().unwrap();
        assert_eq!((tile.tile_x, tile.tile_y, tile.tile_layer), (2, 3, 0));
        assert_eq!(tile.poly_count(), 1);
        assert_eq!(tile.bmin, Vec3::new(32.0, 0.0, 48.0));
        assert_eq!(tile.poly_flags, vec![0]);
        assert_eq!(tile.walkable_climb, 2.0);
    }

    #[test]
    fn test_obstacle_adds_polygons() {
        let params = params();
        let storage = TileCacheStorageParams::default();
        let data = LayerBuilder::new(16, 16)
            .grid(Vec3::ZERO, 1.0, 1.0)
            .encode(&Lz4Compressor, &storage);
        let builder = TileCacheBuilder::new(&params, &Lz4Compressor, &storage);

        let shape = ObstacleShape::aabb(Vec3::new(6.0, 0.0, 6.0), Vec3::new(9.5, 2.0, 9.5));
        let (_, mesh) = builder.build_poly_mesh(&data, [&shape]).unwrap();
        assert!(mesh.poly_count() > 1);
    }

    #[test]
    fn test_fully_covered_tile_is_empty() {
        let params = params();
        let storage = TileCacheStorageParams::default();
        let data = LayerBuilder::new(8, 8)
            .grid(Vec3::ZERO, 1.0, 1.0)
            .encode(&Lz4Compressor, &storage);
        let builder = TileCacheBuilder::new(&params, &Lz4Compressor, &storage);

        let shape = ObstacleShape::aabb(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(9.0, 2.0, 9.0));
        assert!(builder.build_tile(&data, [&shape]).unwrap().is_none());
    }

    #[test]
    fn test_mesh_process_hook_runs() {
        let params = params();
        let storage = TileCacheStorageParams::default();
        let data = LayerBuilder::new(16, 16)
            .grid(Vec3::ZERO, 1.0, 1.0)
            .encode(&Lz4Compressor, &storage);

        let hook = FlagByArea;
        let builder =
            TileCacheBuilder::new(&params, &Lz4Compressor, &storage).with_mesh_process(Some(&hook));
        let tile = builder.build_tile(&data, NO_OBSTACLES).unwrap().unwrap();
        assert!(tile
            .poly_flags
            .iter()
            .zip(&tile.poly_areas)
            .all(|(&f, &a)| f == a as u16 + 1));
    }

    #[test]
    fn test_corrupt_data_is_an_error() {
        let params = params();
        let storage = TileCacheStorageParams::default();
        let mut data = LayerBuilder::new(8, 8).encode(&Lz4Compressor, &storage);
        data.truncate(storage.header_size() + 2);
        let builder = TileCacheBuilder::new(&params, &Lz4Compressor, &storage);
        assert!(builder.build_tile(&data, NO_OBSTACLES).is_err());
    }
}
