//! Synthetic tile layers for unit tests

use glam::Vec3;

use crate::compressor::TileCacheCompressor;
use crate::layer_contours::{dir_offset_x, dir_offset_y};
use crate::tile_cache_data::{
    compress_tile_cache_layer, TileCacheLayer, TileCacheLayerHeader, TileCacheStorageParams,
    NULL_AREA, WALKABLE_AREA,
};

/// Height step up to which neighbouring cells are linked
const LINK_CLIMB: i32 = 2;

/// Builds a layer grid cell by cell, deriving the connection masks from the
/// final areas and heights.
#[derive(Debug, Clone)]
pub struct LayerBuilder {
    width: usize,
    height: usize,
    heights: Vec<u8>,
    areas: Vec<u8>,
    portals: u8,
    tx: i32,
    ty: i32,
    tlayer: i32,
    origin: Vec3,
    cs: f32,
    ch: f32,
}

impl LayerBuilder {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            heights: vec![0; width * height],
            areas: vec![WALKABLE_AREA; width * height],
            portals: 0,
            tx: 0,
            ty: 0,
            tlayer: 0,
            origin: Vec3::ZERO,
            cs: 0.3,
            ch: 0.2,
        }
    }

    pub fn block_cell(self, x: usize, y: usize) -> Self {
        self.area(x, y, NULL_AREA)
    }

    pub fn area(mut self, x: usize, y: usize, area: u8) -> Self {
        self.areas[x + y * self.width] = area;
        self
    }

    pub fn height(mut self, x: usize, y: usize, h: u8) -> Self {
        self.heights[x + y * self.width] = h;
        self
    }

    /// Marks the border cells on side `dir` as leading out of the tile
    pub fn portal_side(mut self, dir: u8) -> Self {
        self.portals |= 1 << dir;
        self
    }

    pub fn tile(mut self, tx: i32, ty: i32, tlayer: i32) -> Self {
        self.tx = tx;
        self.ty = ty;
        self.tlayer = tlayer;
        self
    }

    /// World origin of tile (0, 0) and the voxel size
    pub fn grid(mut self, origin: Vec3, cs: f32, ch: f32) -> Self {
        self.origin = origin;
        self.cs = cs;
        self.ch = ch;
        self
    }

    fn on_side(&self, x: usize, y: usize, dir: usize) -> bool {
        match dir {
            0 => x == 0,
            1 => y + 1 == self.height,
            2 => x + 1 == self.width,
            _ => y == 0,
        }
    }

    pub fn header(&self) -> TileCacheLayerHeader {
        let tile_w = self.width as f32 * self.cs;
        let tile_h = self.height as f32 * self.cs;
        let hmax = self.heights.iter().copied().max().unwrap_or(0);

        let mut header = TileCacheLayerHeader::new();
        header.tx = self.tx;
        header.ty = self.ty;
        header.tlayer = self.tlayer;
        header.bmin = [
            self.origin.x + self.tx as f32 * tile_w,
            self.origin.y,
            self.origin.z + self.ty as f32 * tile_h,
        ];
        header.bmax = [
            header.bmin[0] + tile_w,
            self.origin.y + (hmax as f32 + 1.0) * self.ch,
            header.bmin[2] + tile_h,
        ];
        header.hmin = 0;
        header.hmax = hmax as u16;
        header.width = self.width as u8;
        header.height = self.height as u8;
        header.minx = 0;
        header.maxx = (self.width - 1) as u8;
        header.miny = 0;
        header.maxy = (self.height - 1) as u8;
        header
    }

    fn cons(&self) -> Vec<u8> {
        let (w, h) = (self.width as i32, self.height as i32);
        let mut cons = vec![0u8; self.width * self.height];
        for y in 0..h {
            for x in 0..w {
                let idx = (x + y * w) as usize;
                if self.areas[idx] == NULL_AREA {
                    continue;
                }
                let mut con = 0u8;
                let mut portal = 0u8;
                for dir in 0..4 {
                    let nx = x + dir_offset_x(dir);
                    let ny = y + dir_offset_y(dir);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        if self.portals & (1 << dir) != 0
                            && self.on_side(x as usize, y as usize, dir)
                        {
                            portal |= 1 << dir;
                        }
                        continue;
                    }
                    let nidx = (nx + ny * w) as usize;
                    let step = (self.heights[idx] as i32 - self.heights[nidx] as i32).abs();
                    if self.areas[nidx] != NULL_AREA && step <= LINK_CLIMB {
                        con |= 1 << dir;
                    }
                }
                cons[idx] = con | (portal << 4);
            }
        }
        cons
    }

    pub fn build(&self) -> TileCacheLayer {
        TileCacheLayer::new(
            self.header(),
            self.heights.clone(),
            self.areas.clone(),
            self.cons(),
        )
        .unwrap()
    }

    /// Compressed wire bytes of the layer
    pub fn encode(
        &self,
        compressor: &dyn TileCacheCompressor,
        storage: &TileCacheStorageParams,
    ) -> Vec<u8> {
        compress_tile_cache_layer(
            compressor,
            &self.header(),
            &self.heights,
            &self.areas,
            &self.cons(),
            storage,
        )
        .unwrap()
    }
}

/// Fully walkable layer at height 0 with no portals
pub fn flat_layer(width: usize, height: usize) -> TileCacheLayer {
    LayerBuilder::new(width, height).build()
}
