//! Tile cache implementation
//!
//! This module contains the [`TileCache`] structure, which stores compressed
//! tile layers, tracks temporary obstacles and rebuilds the navigation mesh
//! tiles they affect, one tile per [`TileCache::update`] call.

use std::collections::{HashMap, VecDeque};

use glam::Vec3;
use recast_common::{overlap_bounds, Error, Result};

use crate::compressor::TileCacheCompressor;
use crate::handle_pool::{ObstacleRef, SlotPool, TileRef};
use crate::layer_polymesh::MAX_VERTS_PER_POLY;
use crate::obstacle::{Obstacle, ObstacleShape, ObstacleState};
use crate::tile_cache_builder::TileCacheBuilder;
use crate::tile_cache_data::{
    decompress_tile_cache_layer, TileCacheLayerHeader, TileCacheStorageParams,
};
use crate::tile_cache_integration::{TileCacheMeshProcess, TileMeshAssembler};

/// Largest obstacle pool addressable by 16 index bits
const MAX_OBSTACLES: u32 = 1 << 16;

/// Tile cache parameters
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileCacheParams {
    /// World position of the corner of tile (0, 0)
    pub origin: Vec3,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,
    /// Width of a tile (in cells)
    pub width: i32,
    /// Height of a tile (in cells)
    pub height: i32,
    /// Agent height
    pub walkable_height: f32,
    /// Agent radius
    pub walkable_radius: f32,
    /// Maximum step height an agent can climb
    pub walkable_climb: f32,
    /// Maximum distance a simplified contour may deviate from the cell outline (in cells)
    pub max_simplification_error: f32,
    /// Maximum number of stored tiles
    pub max_tiles: u32,
    /// Maximum number of obstacles
    pub max_obstacles: u32,
    /// Maximum vertices per navigation mesh polygon
    pub max_verts_per_poly: usize,
}

impl Default for TileCacheParams {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            cs: 0.3,
            ch: 0.2,
            width: 48,
            height: 48,
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
            max_simplification_error: 1.3,
            max_tiles: 128,
            max_obstacles: 128,
            max_verts_per_poly: MAX_VERTS_PER_POLY,
        }
    }
}

impl TileCacheParams {
    pub fn with_origin(mut self, origin: Vec3) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_cell_size(mut self, cs: f32, ch: f32) -> Self {
        self.cs = cs;
        self.ch = ch;
        self
    }

    pub fn with_tile_size(mut self, width: i32, height: i32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_walkable_height(mut self, walkable_height: f32) -> Self {
        self.walkable_height = walkable_height;
        self
    }

    pub fn with_walkable_radius(mut self, walkable_radius: f32) -> Self {
        self.walkable_radius = walkable_radius;
        self
    }

    pub fn with_walkable_climb(mut self, walkable_climb: f32) -> Self {
        self.walkable_climb = walkable_climb;
        self
    }

    pub fn with_max_simplification_error(mut self, max_simplification_error: f32) -> Self {
        self.max_simplification_error = max_simplification_error;
        self
    }

    pub fn with_max_tiles(mut self, max_tiles: u32) -> Self {
        self.max_tiles = max_tiles;
        self
    }

    pub fn with_max_obstacles(mut self, max_obstacles: u32) -> Self {
        self.max_obstacles = max_obstacles;
        self
    }

    pub fn with_max_verts_per_poly(mut self, max_verts_per_poly: usize) -> Self {
        self.max_verts_per_poly = max_verts_per_poly;
        self
    }

    /// Validates the parameters
    pub fn validate(&self) -> Result<()> {
        if !self.origin.is_finite() {
            return Err(Error::InvalidParam(format!(
                "origin {} is not finite",
                self.origin
            )));
        }
        if !(self.cs > 0.0 && self.ch > 0.0) {
            return Err(Error::InvalidParam(format!(
                "cell size {} and height {} must be positive",
                self.cs, self.ch
            )));
        }
        if !(1..=255).contains(&self.width) || !(1..=255).contains(&self.height) {
            return Err(Error::InvalidParam(format!(
                "tile size {}x{} outside 1..=255 cells",
                self.width, self.height
            )));
        }
        if self.walkable_height < 0.0 || self.walkable_radius < 0.0 || self.walkable_climb < 0.0 {
            return Err(Error::InvalidParam(
                "walkable height, radius and climb must not be negative".to_string(),
            ));
        }
        if self.max_simplification_error < 0.0 {
            return Err(Error::InvalidParam(format!(
                "max simplification error {} is negative",
                self.max_simplification_error
            )));
        }
        if self.max_tiles == 0 {
            return Err(Error::InvalidParam("max_tiles must be positive".to_string()));
        }
        if self.max_obstacles == 0 || self.max_obstacles > MAX_OBSTACLES {
            return Err(Error::InvalidParam(format!(
                "max_obstacles {} outside 1..={MAX_OBSTACLES}",
                self.max_obstacles
            )));
        }
        if !(3..=MAX_VERTS_PER_POLY).contains(&self.max_verts_per_poly) {
            return Err(Error::InvalidParam(format!(
                "max_verts_per_poly {} outside 3..={MAX_VERTS_PER_POLY}",
                self.max_verts_per_poly
            )));
        }
        Ok(())
    }

    /// World-space size of a tile along x and z
    pub fn tile_world_size(&self) -> (f32, f32) {
        (self.width as f32 * self.cs, self.height as f32 * self.cs)
    }

    /// Saves the parameters to a file in JSON format
    #[cfg(feature = "serialization")]
    pub fn save_to_json<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Loads parameters from a JSON file
    #[cfg(feature = "serialization")]
    pub fn load_from_json<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let params: Self =
            serde_json::from_str(&json).map_err(|e| Error::Serialization(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Serializes the parameters to JSON bytes
    #[cfg(feature = "serialization")]
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserializes parameters from JSON bytes
    #[cfg(feature = "serialization")]
    pub fn from_json_bytes(data: &[u8]) -> Result<Self> {
        let params: Self =
            serde_json::from_slice(data).map_err(|e| Error::Serialization(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Serializes the parameters to binary bytes
    #[cfg(feature = "serialization")]
    pub fn to_binary_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserializes parameters from binary bytes
    #[cfg(feature = "serialization")]
    pub fn from_binary_bytes(data: &[u8]) -> Result<Self> {
        let params: Self =
            postcard::from_bytes(data).map_err(|e| Error::Serialization(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }
}

/// Compressed tile stored in the cache
#[derive(Debug, Clone)]
pub struct CompressedTile {
    /// Header of the stored layer
    pub header: TileCacheLayerHeader,
    /// Stored layer bytes: header followed by the compressed payload
    pub data: Vec<u8>,
    /// Caller-defined flags passed to `add_tile`
    pub flags: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObstacleRequestAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy)]
struct ObstacleRequest {
    action: ObstacleRequestAction,
    obstacle: ObstacleRef,
}

/// Tile cache structure
#[derive(Debug)]
pub struct TileCache {
    /// Parameters for the tile cache
    params: TileCacheParams,
    /// Framing of stored layers
    storage: TileCacheStorageParams,
    /// Codec for layer payloads
    compressor: Box<dyn TileCacheCompressor>,
    /// Optional hook applied to every rebuilt tile
    mesh_process: Option<Box<dyn TileCacheMeshProcess>>,
    /// Stored tiles
    tiles: SlotPool<CompressedTile>,
    /// Tiles of each (tx, ty) column
    columns: HashMap<(i32, i32), Vec<TileRef>>,
    /// Obstacles in the tile cache
    obstacles: SlotPool<Obstacle>,
    /// Obstacle requests not yet applied
    requests: VecDeque<ObstacleRequest>,
    /// Tiles waiting for a rebuild, without duplicates
    update: VecDeque<TileRef>,
}

impl TileCache {
    /// Creates a new tile cache with the default layer framing
    pub fn new(params: TileCacheParams, compressor: Box<dyn TileCacheCompressor>) -> Result<Self> {
        Self::new_with_storage(params, TileCacheStorageParams::default(), compressor)
    }

    /// Creates a new tile cache reading layers framed with `storage`
    pub fn new_with_storage(
        params: TileCacheParams,
        storage: TileCacheStorageParams,
        compressor: Box<dyn TileCacheCompressor>,
    ) -> Result<Self> {
        params.validate()?;

        let tiles = SlotPool::for_tiles(params.max_tiles)?;
        let obstacles = SlotPool::for_obstacles(params.max_obstacles)?;

        log::debug!(
            "Created tile cache: {} tiles ({} index bits, {} salt bits), {} obstacles",
            params.max_tiles,
            tiles.index_bits(),
            tiles.salt_bits(),
            params.max_obstacles
        );

        Ok(Self {
            params,
            storage,
            compressor,
            mesh_process: None,
            tiles,
            columns: HashMap::new(),
            obstacles,
            requests: VecDeque::new(),
            update: VecDeque::new(),
        })
    }

    /// Sets the hook applied to rebuilt tiles before they reach the assembler
    pub fn set_mesh_process(&mut self, mesh_process: Option<Box<dyn TileCacheMeshProcess>>) {
        self.mesh_process = mesh_process;
    }

    /// Gets the tile cache parameters
    pub fn params(&self) -> &TileCacheParams {
        &self.params
    }

    /// Gets the layer framing
    pub fn storage(&self) -> &TileCacheStorageParams {
        &self.storage
    }

    /// Gets the layer codec
    pub fn compressor(&self) -> &dyn TileCacheCompressor {
        self.compressor.as_ref()
    }

    /// Adds a compressed layer to the cache.
    ///
    /// The layer is fully decoded once so that a malformed header or payload
    /// is rejected before a slot is taken.
    pub fn add_tile(&mut self, data: Vec<u8>, flags: u8) -> Result<TileRef> {
        let layer = decompress_tile_cache_layer(self.compressor.as_ref(), &data, &self.storage)?;
        let header = layer.header;

        if self.get_tile_at(header.tx, header.ty, header.tlayer).is_some() {
            return Err(Error::TileOccupied {
                tx: header.tx,
                ty: header.ty,
                layer: header.tlayer,
            });
        }

        let column = (header.tx, header.ty);
        let handle = self.tiles.allocate(CompressedTile {
            header,
            data,
            flags,
        })?;
        let tile_ref = TileRef::new(handle);
        self.columns.entry(column).or_default().push(tile_ref);

        log::debug!(
            "Added tile ({}, {}) as {:#x}",
            column.0,
            column.1,
            handle
        );

        Ok(tile_ref)
    }

    /// Removes a tile and returns its stored bytes
    pub fn remove_tile(&mut self, tile_ref: TileRef) -> Result<Vec<u8>> {
        let tile = self.tiles.release(tile_ref.id())?;

        let column = (tile.header.tx, tile.header.ty);
        if let Some(refs) = self.columns.get_mut(&column) {
            refs.retain(|&r| r != tile_ref);
            if refs.is_empty() {
                self.columns.remove(&column);
            }
        }

        log::debug!(
            "Removed tile ({}, {}, {})",
            tile.header.tx,
            tile.header.ty,
            tile.header.tlayer
        );

        Ok(tile.data)
    }

    /// Gets the tile at the given tile coordinates and layer
    pub fn get_tile_at(&self, tx: i32, ty: i32, tlayer: i32) -> Option<TileRef> {
        self.columns.get(&(tx, ty))?.iter().copied().find(|&r| {
            self.tiles
                .get(r.id())
                .is_some_and(|tile| tile.header.tlayer == tlayer)
        })
    }

    /// Gets all tiles at the given tile coordinates
    pub fn get_tiles_at(&self, tx: i32, ty: i32) -> Vec<TileRef> {
        self.columns.get(&(tx, ty)).cloned().unwrap_or_default()
    }

    /// Gets a tile by reference
    pub fn get_tile_by_ref(&self, tile_ref: TileRef) -> Option<&CompressedTile> {
        self.tiles.get(tile_ref.id())
    }

    /// Number of stored tiles
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Calculates the bounds of the usable region of a layer
    pub fn calc_tight_tile_bounds(&self, header: &TileCacheLayerHeader) -> (Vec3, Vec3) {
        let cs = self.params.cs;
        let bmin = Vec3::new(
            header.bmin[0] + header.minx as f32 * cs,
            header.bmin[1],
            header.bmin[2] + header.miny as f32 * cs,
        );
        let bmax = Vec3::new(
            header.bmin[0] + (header.maxx as f32 + 1.0) * cs,
            header.bmax[1],
            header.bmin[2] + (header.maxy as f32 + 1.0) * cs,
        );
        (bmin, bmax)
    }

    /// Queries tiles whose usable region overlaps the given bounding box
    pub fn query_tiles(&self, bmin: Vec3, bmax: Vec3) -> Vec<TileRef> {
        let (tw, th) = self.params.tile_world_size();
        let tx0 = ((bmin.x - self.params.origin.x) / tw).floor() as i32;
        let tx1 = ((bmax.x - self.params.origin.x) / tw).floor() as i32;
        let ty0 = ((bmin.z - self.params.origin.z) / th).floor() as i32;
        let ty1 = ((bmax.z - self.params.origin.z) / th).floor() as i32;

        // Wide queries walk the stored columns instead of every coordinate
        let span = (tx1 as i64 - tx0 as i64 + 1) * (ty1 as i64 - ty0 as i64 + 1);
        let columns: Vec<(i32, i32)> = if span > self.columns.len() as i64 {
            let mut keys: Vec<(i32, i32)> = self
                .columns
                .keys()
                .copied()
                .filter(|&(tx, ty)| (tx0..=tx1).contains(&tx) && (ty0..=ty1).contains(&ty))
                .collect();
            keys.sort_unstable_by_key(|&(tx, ty)| (ty, tx));
            keys
        } else {
            (ty0..=ty1)
                .flat_map(|ty| (tx0..=tx1).map(move |tx| (tx, ty)))
                .collect()
        };

        let mut results = Vec::new();
        for column in columns {
            let Some(refs) = self.columns.get(&column) else {
                continue;
            };
            for &tile_ref in refs {
                let Some(tile) = self.tiles.get(tile_ref.id()) else {
                    continue;
                };
                let (tbmin, tbmax) = self.calc_tight_tile_bounds(&tile.header);
                if overlap_bounds(bmin, bmax, tbmin, tbmax) {
                    results.push(tile_ref);
                }
            }
        }
        results
    }

    fn add_obstacle(&mut self, shape: ObstacleShape) -> Result<ObstacleRef> {
        let handle = self.obstacles.allocate(Obstacle::new(shape))?;
        // Obstacle handles are 16 salt bits over 16 index bits
        let obstacle_ref = ObstacleRef::new(handle as u32);
        self.requests.push_back(ObstacleRequest {
            action: ObstacleRequestAction::Add,
            obstacle: obstacle_ref,
        });
        Ok(obstacle_ref)
    }

    /// Adds an upright cylinder obstacle standing on `pos`
    pub fn add_cylinder(&mut self, pos: Vec3, radius: f32, height: f32) -> Result<ObstacleRef> {
        self.add_obstacle(ObstacleShape::cylinder(pos, radius, height))
    }

    /// Adds an axis-aligned box obstacle
    pub fn add_box(&mut self, bmin: Vec3, bmax: Vec3) -> Result<ObstacleRef> {
        self.add_obstacle(ObstacleShape::aabb(bmin, bmax))
    }

    /// Adds a box obstacle rotated by `y_radians` around the Y axis
    pub fn add_oriented_box(
        &mut self,
        center: Vec3,
        half_extents: Vec3,
        y_radians: f32,
    ) -> Result<ObstacleRef> {
        self.add_obstacle(ObstacleShape::oriented_box(center, half_extents, y_radians))
    }

    /// Requests removal of an obstacle.
    ///
    /// The obstacle keeps affecting its tiles until they are rebuilt by
    /// [`update`](Self::update). Removing the null reference does nothing.
    pub fn remove_obstacle(&mut self, obstacle_ref: ObstacleRef) -> Result<()> {
        if !obstacle_ref.is_valid() {
            return Ok(());
        }
        if !self.obstacles.contains(obstacle_ref.id() as u64) {
            return Err(Error::InvalidHandle(obstacle_ref.id() as u64));
        }
        self.requests.push_back(ObstacleRequest {
            action: ObstacleRequestAction::Remove,
            obstacle: obstacle_ref,
        });
        Ok(())
    }

    /// Gets an obstacle by reference
    pub fn get_obstacle_by_ref(&self, obstacle_ref: ObstacleRef) -> Option<&Obstacle> {
        self.obstacles.get(obstacle_ref.id() as u64)
    }

    /// Lifecycle state of an obstacle, `Empty` once its slot has been released
    pub fn obstacle_state(&self, obstacle_ref: ObstacleRef) -> ObstacleState {
        self.get_obstacle_by_ref(obstacle_ref)
            .map_or(ObstacleState::Empty, |ob| ob.state)
    }

    /// Number of live obstacles, including those being removed
    pub fn obstacle_count(&self) -> usize {
        self.obstacles.len()
    }

    /// Iterates live obstacles with their references
    pub fn obstacles(&self) -> impl Iterator<Item = (ObstacleRef, &Obstacle)> + '_ {
        self.obstacles
            .iter()
            .map(|(handle, ob)| (ObstacleRef::new(handle as u32), ob))
    }

    /// Gets the bounds of an obstacle
    pub fn get_obstacle_bounds(&self, obstacle: &Obstacle) -> (Vec3, Vec3) {
        obstacle.shape.bounds()
    }

    /// True when no obstacle request or tile rebuild is outstanding
    pub fn is_up_to_date(&self) -> bool {
        self.requests.is_empty() && self.update.is_empty()
    }

    fn enqueue_tile(&mut self, tile_ref: TileRef) {
        if !self.update.contains(&tile_ref) {
            self.update.push_back(tile_ref);
        }
    }

    /// Applies queued obstacle requests, stopping at the first request for an
    /// obstacle already handled in this pass
    fn process_requests(&mut self) -> Result<()> {
        let mut handled: Vec<ObstacleRef> = Vec::new();

        while let Some(&request) = self.requests.front() {
            if handled.contains(&request.obstacle) {
                break;
            }
            self.requests.pop_front();
            handled.push(request.obstacle);

            let handle = request.obstacle.id() as u64;
            let touched = match request.action {
                ObstacleRequestAction::Add => {
                    let Some(ob) = self.obstacles.get(handle) else {
                        log::debug!("Dropping add request for stale obstacle {:#x}", handle);
                        continue;
                    };
                    let (bmin, bmax) = ob.shape.bounds();
                    self.query_tiles(bmin, bmax)
                }
                ObstacleRequestAction::Remove => {
                    let Some(ob) = self.obstacles.get_mut(handle) else {
                        log::debug!("Dropping remove request for stale obstacle {:#x}", handle);
                        continue;
                    };
                    ob.state = ObstacleState::Removing;
                    ob.touched.clone()
                }
            };

            for &tile_ref in &touched {
                self.enqueue_tile(tile_ref);
            }

            let mut release = false;
            if let Some(ob) = self.obstacles.get_mut(handle) {
                ob.pending = touched.clone();
                if request.action == ObstacleRequestAction::Add {
                    ob.touched = touched;
                }
                // Nothing to rebuild, settle right away
                if ob.pending.is_empty() {
                    match ob.state {
                        ObstacleState::Processing => ob.state = ObstacleState::Processed,
                        ObstacleState::Removing => release = true,
                        _ => {}
                    }
                }
            }
            if release {
                self.obstacles.release(handle)?;
            }
        }

        Ok(())
    }

    /// Marks `tile_ref` as rebuilt for every obstacle waiting on it
    fn settle_obstacles(&mut self, tile_ref: TileRef) -> Result<()> {
        let mut released = Vec::new();
        for (handle, ob) in self.obstacles.iter_mut() {
            if !matches!(
                ob.state,
                ObstacleState::Processing | ObstacleState::Removing
            ) {
                continue;
            }
            // Only the rebuild of a tile the obstacle waits on advances it
            let waiting = ob.pending.len();
            ob.pending.retain(|&r| r != tile_ref);
            if ob.pending.len() == waiting {
                continue;
            }
            if ob.pending.is_empty() {
                if ob.state == ObstacleState::Processing {
                    ob.state = ObstacleState::Processed;
                } else {
                    released.push(handle);
                }
            }
        }
        for handle in released {
            self.obstacles.release(handle)?;
        }
        Ok(())
    }

    /// Advances obstacle processing by one step.
    ///
    /// When no tile is waiting, queued obstacle requests are applied first.
    /// Then at most one waiting tile is rebuilt and handed to `assembler`.
    /// Returns `true` once no request or rebuild is outstanding.
    pub fn update(&mut self, assembler: &mut dyn TileMeshAssembler) -> Result<bool> {
        if self.update.is_empty() {
            self.process_requests()?;
        }

        if let Some(tile_ref) = self.update.pop_front() {
            let result = if self.tiles.contains(tile_ref.id()) {
                self.build_nav_mesh_tile(tile_ref, assembler)
            } else {
                log::warn!("Skipping rebuild of removed tile {:#x}", tile_ref.id());
                Ok(())
            };
            self.settle_obstacles(tile_ref)?;
            result?;
        }

        Ok(self.is_up_to_date())
    }

    /// Rebuilds one tile with its current obstacles and hands it to `assembler`
    pub fn build_nav_mesh_tile(
        &self,
        tile_ref: TileRef,
        assembler: &mut dyn TileMeshAssembler,
    ) -> Result<()> {
        let tile = self
            .tiles
            .get(tile_ref.id())
            .ok_or(Error::InvalidHandle(tile_ref.id()))?;

        let obstacles = self
            .obstacles
            .iter()
            .filter(|(_, ob)| ob.affects(tile_ref))
            .map(|(_, ob)| &ob.shape);

        let builder = TileCacheBuilder::new(&self.params, self.compressor.as_ref(), &self.storage)
            .with_mesh_process(self.mesh_process.as_deref());

        match builder.build_tile(&tile.data, obstacles)? {
            Some(params) => assembler.add_tile(&params),
            None => assembler.remove_tile(tile.header.tx, tile.header.ty, tile.header.tlayer),
        }
    }

    /// Rebuilds every layer of the tile column (tx, ty)
    pub fn build_nav_mesh_tiles_at(
        &self,
        tx: i32,
        ty: i32,
        assembler: &mut dyn TileMeshAssembler,
    ) -> Result<()> {
        for tile_ref in self.get_tiles_at(tx, ty) {
            self.build_nav_mesh_tile(tile_ref, assembler)?;
        }
        Ok(())
    }
}
