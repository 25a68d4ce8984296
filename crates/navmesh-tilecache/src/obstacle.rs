//! Temporary obstacles and their rasterization into tile layers

use glam::Vec3;

use crate::handle_pool::TileRef;
use crate::tile_cache_data::TileCacheLayer;

/// Shape of a temporary obstacle, in world units
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ObstacleShape {
    /// Upright cylinder standing on `pos`
    Cylinder {
        /// Center of the base
        pos: Vec3,
        /// Radius
        radius: f32,
        /// Height
        height: f32,
    },
    /// Axis-aligned box
    Box {
        /// Minimum bounds
        bmin: Vec3,
        /// Maximum bounds
        bmax: Vec3,
    },
    /// Box rotated around the Y axis
    OrientedBox {
        /// Center position
        center: Vec3,
        /// Half extents along the box's own axes
        half_extents: Vec3,
        /// [cos(0.5*angle)*sin(-0.5*angle), cos(0.5*angle)*cos(0.5*angle) - 0.5]
        rot_aux: [f32; 2],
    },
}

impl ObstacleShape {
    /// Cylinder obstacle
    pub fn cylinder(pos: Vec3, radius: f32, height: f32) -> Self {
        Self::Cylinder {
            pos,
            radius,
            height,
        }
    }

    /// Axis-aligned box obstacle
    pub fn aabb(bmin: Vec3, bmax: Vec3) -> Self {
        Self::Box { bmin, bmax }
    }

    /// Box obstacle rotated by `y_radians` around the Y axis
    pub fn oriented_box(center: Vec3, half_extents: Vec3, y_radians: f32) -> Self {
        let coshalf = (0.5 * y_radians).cos();
        let sinhalf = (-0.5 * y_radians).sin();
        Self::OrientedBox {
            center,
            half_extents,
            rot_aux: [coshalf * sinhalf, coshalf * coshalf - 0.5],
        }
    }

    /// World-space bounding box. For oriented boxes this is a conservative
    /// bound that holds for any rotation.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        match *self {
            Self::Cylinder {
                pos,
                radius,
                height,
            } => (
                Vec3::new(pos.x - radius, pos.y, pos.z - radius),
                Vec3::new(pos.x + radius, pos.y + height, pos.z + radius),
            ),
            Self::Box { bmin, bmax } => (bmin, bmax),
            Self::OrientedBox {
                center,
                half_extents,
                ..
            } => {
                let max_r = 1.41 * half_extents.x.max(half_extents.z);
                let extent = Vec3::new(max_r, half_extents.y, max_r);
                (center - extent, center + extent)
            }
        }
    }

    /// Writes `area` into every layer cell covered by the shape.
    ///
    /// Coordinates are taken relative to the layer's bmin; `cs` and `ch` are
    /// the cache's cell size and height.
    pub fn rasterize(&self, layer: &mut TileCacheLayer, cs: f32, ch: f32, area: u8) {
        let raster = CellRaster::new(layer, cs, ch);
        match *self {
            Self::Cylinder {
                pos,
                radius,
                height,
            } => raster.mark_cylinder(layer, pos, radius, height, area),
            Self::Box { bmin, bmax } => raster.mark_box(layer, bmin, bmax, area),
            Self::OrientedBox {
                center,
                half_extents,
                rot_aux,
            } => raster.mark_oriented_box(layer, center, half_extents, rot_aux, area),
        }
    }
}

/// Lifecycle of an obstacle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ObstacleState {
    /// Slot is free
    Empty,
    /// Added, some touched tiles have not been rebuilt yet
    Processing,
    /// All touched tiles include the obstacle
    Processed,
    /// Removal requested, some touched tiles still include the obstacle
    Removing,
}

/// Obstacle stored in the cache
#[derive(Debug, Clone)]
pub struct Obstacle {
    /// Shape of the obstacle
    pub shape: ObstacleShape,
    /// Lifecycle state
    pub state: ObstacleState,
    /// Tiles overlapped by the obstacle
    pub(crate) touched: Vec<TileRef>,
    /// Touched tiles that still need a rebuild for the current state
    pub(crate) pending: Vec<TileRef>,
}

impl Obstacle {
    pub(crate) fn new(shape: ObstacleShape) -> Self {
        Self {
            shape,
            state: ObstacleState::Processing,
            touched: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Tiles overlapped by the obstacle when its add request was applied
    pub fn touched(&self) -> &[TileRef] {
        &self.touched
    }

    /// Tiles still waiting for a rebuild
    pub fn pending(&self) -> &[TileRef] {
        &self.pending
    }

    /// True if the obstacle is carved into the tile `tile_ref` when it is rebuilt
    pub(crate) fn affects(&self, tile_ref: TileRef) -> bool {
        matches!(
            self.state,
            ObstacleState::Processing | ObstacleState::Processed
        ) && self.touched.contains(&tile_ref)
    }
}

/// Cell-space view of a layer for obstacle rasterization
struct CellRaster {
    orig: Vec3,
    ics: f32,
    ich: f32,
    width: i32,
    height: i32,
}

impl CellRaster {
    fn new(layer: &TileCacheLayer, cs: f32, ch: f32) -> Self {
        Self {
            orig: Vec3::from_array(layer.header.bmin),
            ics: 1.0 / cs,
            ich: 1.0 / ch,
            width: layer.width(),
            height: layer.height(),
        }
    }

    /// Clamps a cell rectangle to the grid, `None` if it lies fully outside
    fn clamp(&self, minx: i32, maxx: i32, minz: i32, maxz: i32) -> Option<(i32, i32, i32, i32)> {
        if maxx < 0 || minx >= self.width || maxz < 0 || minz >= self.height {
            return None;
        }
        Some((
            minx.max(0),
            maxx.min(self.width - 1),
            minz.max(0),
            maxz.min(self.height - 1),
        ))
    }

    fn cell_y(&self, y: f32) -> i32 {
        ((y - self.orig.y) * self.ich).floor() as i32
    }

    /// Marks the cells of the clamped rectangle accepted by `inside` whose
    /// height lies in `miny..=maxy`
    fn mark(
        &self,
        layer: &mut TileCacheLayer,
        rect: (i32, i32, i32, i32),
        miny: i32,
        maxy: i32,
        area: u8,
        inside: impl Fn(i32, i32) -> bool,
    ) {
        let (minx, maxx, minz, maxz) = rect;
        for z in minz..=maxz {
            for x in minx..=maxx {
                if !inside(x, z) {
                    continue;
                }
                let idx = (x + z * self.width) as usize;
                let y = layer.heights[idx] as i32;
                if y < miny || y > maxy {
                    continue;
                }
                layer.areas[idx] = area;
            }
        }
    }

    fn mark_cylinder(
        &self,
        layer: &mut TileCacheLayer,
        pos: Vec3,
        radius: f32,
        height: f32,
        area: u8,
    ) {
        let r2 = (radius * self.ics + 0.5).powi(2);
        let px = (pos.x - self.orig.x) * self.ics;
        let pz = (pos.z - self.orig.z) * self.ics;

        let minx = ((pos.x - radius - self.orig.x) * self.ics).floor() as i32;
        let maxx = ((pos.x + radius - self.orig.x) * self.ics).floor() as i32;
        let minz = ((pos.z - radius - self.orig.z) * self.ics).floor() as i32;
        let maxz = ((pos.z + radius - self.orig.z) * self.ics).floor() as i32;
        let miny = self.cell_y(pos.y);
        let maxy = self.cell_y(pos.y + height);

        let Some(rect) = self.clamp(minx, maxx, minz, maxz) else {
            return;
        };
        self.mark(layer, rect, miny, maxy, area, |x, z| {
            let dx = x as f32 + 0.5 - px;
            let dz = z as f32 + 0.5 - pz;
            dx * dx + dz * dz <= r2
        });
    }

    fn mark_box(&self, layer: &mut TileCacheLayer, bmin: Vec3, bmax: Vec3, area: u8) {
        let minx = ((bmin.x - self.orig.x) * self.ics).floor() as i32;
        let maxx = ((bmax.x - self.orig.x) * self.ics).floor() as i32;
        let minz = ((bmin.z - self.orig.z) * self.ics).floor() as i32;
        let maxz = ((bmax.z - self.orig.z) * self.ics).floor() as i32;
        let miny = self.cell_y(bmin.y);
        let maxy = self.cell_y(bmax.y);

        let Some(rect) = self.clamp(minx, maxx, minz, maxz) else {
            return;
        };
        self.mark(layer, rect, miny, maxy, area, |_, _| true);
    }

    fn mark_oriented_box(
        &self,
        layer: &mut TileCacheLayer,
        center: Vec3,
        half_extents: Vec3,
        rot_aux: [f32; 2],
        area: u8,
    ) {
        let max_r = 1.41 * half_extents.x.max(half_extents.z);
        let cx = (center.x - self.orig.x) * self.ics;
        let cz = (center.z - self.orig.z) * self.ics;

        let minx = (cx - max_r * self.ics).floor() as i32;
        let maxx = (cx + max_r * self.ics).floor() as i32;
        let minz = (cz - max_r * self.ics).floor() as i32;
        let maxz = (cz + max_r * self.ics).floor() as i32;
        let miny = self.cell_y(center.y - half_extents.y);
        let maxy = self.cell_y(center.y + half_extents.y);

        let Some(rect) = self.clamp(minx, maxx, minz, maxz) else {
            return;
        };

        let xhalf = half_extents.x * self.ics + 0.5;
        let zhalf = half_extents.z * self.ics + 0.5;
        self.mark(layer, rect, miny, maxy, area, |x, z| {
            let x2 = 2.0 * (x as f32 - cx);
            let z2 = 2.0 * (z as f32 - cz);
            let xrot = rot_aux[1] * x2 + rot_aux[0] * z2;
            let zrot = rot_aux[1] * z2 - rot_aux[0] * x2;
            xrot.abs() <= xhalf && zrot.abs() <= zhalf
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_layer_helpers::LayerBuilder;
    use crate::tile_cache_data::{NULL_AREA, WALKABLE_AREA};

    fn blocked(layer: &TileCacheLayer) -> Vec<(i32, i32)> {
        let w = layer.width();
        layer
            .areas
            .iter()
            .enumerate()
            .filter(|&(_, &a)| a == NULL_AREA)
            .map(|(i, _)| (i as i32 % w, i as i32 / w))
            .collect()
    }

    fn unit_layer(w: usize, h: usize) -> TileCacheLayer {
        LayerBuilder::new(w, h).grid(Vec3::ZERO, 1.0, 1.0).build()
    }

    #[test]
    fn test_cylinder_bounds() {
        let shape = ObstacleShape::cylinder(Vec3::new(1.0, 2.0, 3.0), 0.5, 2.0);
        let (bmin, bmax) = shape.bounds();
        assert_eq!(bmin, Vec3::new(0.5, 2.0, 2.5));
        assert_eq!(bmax, Vec3::new(1.5, 4.0, 3.5));
    }

    #[test]
    fn test_box_bounds() {
        let shape = ObstacleShape::aabb(Vec3::new(-1.0, 0.0, -1.0), Vec3::ONE);
        assert_eq!(shape.bounds(), (Vec3::new(-1.0, 0.0, -1.0), Vec3::ONE));
    }

    #[test]
    fn test_oriented_box_bounds_and_rotation() {
        let shape =
            ObstacleShape::oriented_box(Vec3::new(5.0, 1.0, 5.0), Vec3::new(2.0, 1.0, 1.0), 0.0);
        let (bmin, bmax) = shape.bounds();
        assert!((bmin.x - 2.18).abs() < 1e-5);
        assert!((bmax.z - 7.82).abs() < 1e-5);
        assert_eq!(bmin.y, 0.0);
        assert_eq!(bmax.y, 2.0);

        let ObstacleShape::OrientedBox { rot_aux, .. } = shape else {
            panic!("expected an oriented box");
        };
        assert_eq!(rot_aux, [0.0, 0.5]);

        let ObstacleShape::OrientedBox { rot_aux, .. } =
            ObstacleShape::oriented_box(Vec3::ZERO, Vec3::ONE, std::f32::consts::PI)
        else {
            panic!("expected an oriented box");
        };
        // Half a turn maps (x, z) to (-x, -z)
        assert!(rot_aux[0].abs() < 1e-5);
        assert!((rot_aux[1] + 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_cylinder_marks_round_footprint() {
        let mut layer = unit_layer(10, 10);
        ObstacleShape::cylinder(Vec3::new(5.0, 0.0, 5.0), 1.0, 2.0)
            .rasterize(&mut layer, 1.0, 1.0, NULL_AREA);

        // Cells whose centre lies within 1.5 cells of (5, 5)
        assert_eq!(blocked(&layer), vec![(4, 4), (5, 4), (4, 5), (5, 5)]);
    }

    #[test]
    fn test_cylinder_respects_height() {
        // Cells at height 5 are above an obstacle spanning heights 0..=2
        let mut builder = LayerBuilder::new(6, 6).grid(Vec3::ZERO, 1.0, 1.0);
        for z in 0..6 {
            builder = builder.height(3, z, 5);
        }
        let mut layer = builder.build();
        ObstacleShape::cylinder(Vec3::new(3.5, 0.0, 3.5), 1.0, 2.0)
            .rasterize(&mut layer, 1.0, 1.0, NULL_AREA);

        let cells = blocked(&layer);
        assert!(cells.contains(&(2, 3)));
        assert!(!cells.iter().any(|&(x, _)| x == 3));
    }

    #[test]
    fn test_box_marks_floored_range() {
        let mut layer = unit_layer(8, 8);
        ObstacleShape::aabb(Vec3::new(2.2, 0.0, 3.0), Vec3::new(3.9, 1.0, 4.5))
            .rasterize(&mut layer, 1.0, 1.0, NULL_AREA);
        assert_eq!(blocked(&layer), vec![(2, 3), (3, 3), (2, 4), (3, 4)]);
    }

    #[test]
    fn test_box_outside_layer_is_ignored() {
        let mut layer = unit_layer(4, 4);
        ObstacleShape::aabb(Vec3::new(10.0, 0.0, 10.0), Vec3::new(12.0, 1.0, 12.0))
            .rasterize(&mut layer, 1.0, 1.0, NULL_AREA);
        assert!(layer.areas.iter().all(|&a| a == WALKABLE_AREA));

        // Partially outside is clamped to the grid
        ObstacleShape::aabb(Vec3::new(-3.0, 0.0, -3.0), Vec3::new(0.5, 1.0, 0.5))
            .rasterize(&mut layer, 1.0, 1.0, NULL_AREA);
        assert_eq!(blocked(&layer), vec![(0, 0)]);
    }

    #[test]
    fn test_oriented_box_follows_rotation() {
        // A long thin box along x, then the same box turned a quarter
        let half = Vec3::new(3.0, 1.0, 0.6);
        let mut straight = unit_layer(16, 16);
        ObstacleShape::oriented_box(Vec3::new(8.0, 0.0, 8.0), half, 0.0)
            .rasterize(&mut straight, 1.0, 1.0, NULL_AREA);
        let mut turned = unit_layer(16, 16);
        ObstacleShape::oriented_box(Vec3::new(8.0, 0.0, 8.0), half, std::f32::consts::FRAC_PI_2)
            .rasterize(&mut turned, 1.0, 1.0, NULL_AREA);

        let span = |cells: &[(i32, i32)], axis: fn(&(i32, i32)) -> i32| {
            let min = cells.iter().map(axis).min().unwrap();
            let max = cells.iter().map(axis).max().unwrap();
            max - min
        };
        let a = blocked(&straight);
        let b = blocked(&turned);
        assert!(span(&a, |c| c.0) > span(&a, |c| c.1));
        assert!(span(&b, |c| c.1) > span(&b, |c| c.0));
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn test_obstacle_affects_touched_tiles_only() {
        let tile = TileRef::new(5);
        let mut obstacle = Obstacle::new(ObstacleShape::cylinder(Vec3::ZERO, 1.0, 1.0));
        assert!(!obstacle.affects(tile));
        obstacle.touched.push(tile);
        assert!(obstacle.affects(tile));
        obstacle.state = ObstacleState::Removing;
        assert!(!obstacle.affects(tile));
    }
}
