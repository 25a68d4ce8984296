//! Contour tracing and simplification for tile layer regions

use recast_common::{sqr, Error, Result};

use crate::tile_cache_data::{TileCacheLayer, NULL_AREA, NULL_REGION};

/// Neighbour tag of a tile-border edge is `PORTAL_TAG + dir`
const PORTAL_TAG: u8 = 0xf8;

/// X offset of the neighbour in direction `dir` (0: -x, 1: +y, 2: +x, 3: -y)
#[inline]
pub(crate) fn dir_offset_x(dir: usize) -> i32 {
    [-1, 0, 1, 0][dir & 3]
}

/// Y offset of the neighbour in direction `dir`
#[inline]
pub(crate) fn dir_offset_y(dir: usize) -> i32 {
    [0, 1, 0, -1][dir & 3]
}

/// Vertex of a simplified contour, in layer cell units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContourVertex {
    pub x: u8,
    pub y: u8,
    pub z: u8,
    /// Portal direction of the edge starting at this vertex
    pub portal: Option<u8>,
    /// The vertex lies on a straight tile border and can be dropped from the mesh
    pub remove: bool,
}

/// Simplified outline of one region
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileCacheContour {
    pub verts: Vec<ContourVertex>,
    pub reg: u8,
    pub area: u8,
}

/// Contours of all regions of a layer, indexed by region id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileCacheContourSet {
    pub conts: Vec<TileCacheContour>,
}

/// Raw traced vertex; `r` is the neighbour tag of the edge ending here
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawVertex {
    x: i32,
    y: i32,
    z: i32,
    r: u8,
}

struct TempContour {
    verts: Vec<RawVertex>,
    max_verts: usize,
    poly: Vec<usize>,
}

impl TempContour {
    fn new(max_verts: usize) -> Self {
        Self {
            verts: Vec::with_capacity(max_verts),
            max_verts,
            poly: Vec::with_capacity(max_verts),
        }
    }

    /// Appends a vertex, extending the last segment instead when it is collinear
    /// along an axis and has the same neighbour tag. Returns false when full.
    fn append_vertex(&mut self, x: i32, y: i32, z: i32, r: u8) -> bool {
        let n = self.verts.len();
        if n > 1 {
            let pa = self.verts[n - 2];
            let pb = &mut self.verts[n - 1];
            if pb.r == r {
                if pa.x == pb.x && pb.x == x {
                    pb.y = y;
                    pb.z = z;
                    return true;
                } else if pa.z == pb.z && pb.z == z {
                    pb.x = x;
                    pb.y = y;
                    return true;
                }
            }
        }

        if n + 1 > self.max_verts {
            return false;
        }
        self.verts.push(RawVertex { x, y, z, r });
        true
    }
}

fn neighbour_reg(layer: &TileCacheLayer, ax: i32, ay: i32, dir: usize) -> u8 {
    let w = layer.width();
    let ia = (ax + ay * w) as usize;

    let con = layer.cons[ia] & 0xf;
    let portal = layer.cons[ia] >> 4;
    let mask = 1u8 << dir;

    if con & mask == 0 {
        if portal & mask != 0 {
            return PORTAL_TAG + dir as u8;
        }
        return NULL_REGION;
    }

    let bx = ax + dir_offset_x(dir);
    let by = ay + dir_offset_y(dir);
    if bx < 0 || by < 0 || bx >= w || by >= layer.height() {
        return NULL_REGION;
    }
    layer.regs[(bx + by * w) as usize]
}

fn walk_contour(layer: &TileCacheLayer, mut x: i32, mut y: i32, cont: &mut TempContour) -> bool {
    let w = layer.width();
    let h = layer.height();
    let reg = |x: i32, y: i32| layer.regs[(x + y * w) as usize];

    cont.verts.clear();

    let start_x = x;
    let start_y = y;
    let Some(start_dir) = (0..4)
        .map(|i| (i + 3) & 3)
        .find(|&dir| neighbour_reg(layer, x, y, dir) != reg(x, y))
    else {
        return true;
    };

    let mut dir = start_dir;
    // A closed walk visits each (cell, direction) state at most once
    let max_iter = w * h * 4;
    let mut iter = 0;
    while iter < max_iter {
        let rn = neighbour_reg(layer, x, y, dir);

        let mut nx = x;
        let mut ny = y;
        let ndir;

        if rn != reg(x, y) {
            // Solid edge
            let mut px = x;
            let mut pz = y;
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }

            let height = layer.heights[(x + y * w) as usize] as i32;
            if !cont.append_vertex(px, height, pz, rn) {
                return false;
            }

            ndir = (dir + 1) & 3; // Rotate CW
        } else {
            nx = x + dir_offset_x(dir);
            ny = y + dir_offset_y(dir);
            ndir = (dir + 3) & 3; // Rotate CCW
        }

        if iter > 0 && x == start_x && y == start_y && dir == start_dir {
            break;
        }

        x = nx;
        y = ny;
        dir = ndir;
        iter += 1;
    }

    // Drop the closing vertex if it repeats the first one
    if cont.verts.len() > 1 {
        let pa = cont.verts[cont.verts.len() - 1];
        let pb = cont.verts[0];
        if pa.x == pb.x && pa.z == pb.z {
            cont.verts.pop();
        }
    }

    true
}

/// Squared distance from (x, z) to the segment p-q
fn distance_pt_seg(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let mut dx = (x - px) as f32;
    let mut dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);

    dx = px as f32 + t * pqx - x as f32;
    dz = pz as f32 + t * pqz - z as f32;
    dx * dx + dz * dz
}

fn simplify_contour(cont: &mut TempContour, max_error: f32) {
    let n = cont.verts.len();
    cont.poly.clear();
    if n == 0 {
        return;
    }

    // Seed with the vertices where the neighbour tag changes
    for i in 0..n {
        let j = (i + 1) % n;
        if cont.verts[j].r != cont.verts[i].r {
            cont.poly.push(i);
        }
    }

    if cont.poly.len() < 2 {
        // No transitions: start from the lower-left and upper-right vertices
        let mut lli = 0;
        let mut uri = 0;
        for (i, v) in cont.verts.iter().enumerate().skip(1) {
            let ll = cont.verts[lli];
            if v.x < ll.x || (v.x == ll.x && v.z < ll.z) {
                lli = i;
            }
            let ur = cont.verts[uri];
            if v.x > ur.x || (v.x == ur.x && v.z > ur.z) {
                uri = i;
            }
        }
        cont.poly.clear();
        cont.poly.push(lli);
        cont.poly.push(uri);
    }

    let max_error_sq = sqr(max_error);
    let mut i = 0;
    while i < cont.poly.len() {
        let ii = (i + 1) % cont.poly.len();

        let ai = cont.poly[i];
        let ax = cont.verts[ai].x;
        let az = cont.verts[ai].z;

        let bi = cont.poly[ii];
        let bx = cont.verts[bi].x;
        let bz = cont.verts[bi].z;

        // Walk the raw segment in lexicographic order so opposite
        // segments pick the same split vertex.
        let (mut ci, cinc, endi) = if bx > ax || (bx == ax && bz > az) {
            ((ai + 1) % n, 1, bi)
        } else {
            ((bi + n - 1) % n, n - 1, ai)
        };

        let mut max_d = 0.0f32;
        let mut max_i = None;
        while ci != endi {
            let v = cont.verts[ci];
            let d = distance_pt_seg(v.x, v.z, ax, az, bx, bz);
            if d > max_d {
                max_d = d;
                max_i = Some(ci);
            }
            ci = (ci + cinc) % n;
        }

        match max_i {
            Some(mi) if max_d > max_error_sq => cont.poly.insert(i + 1, mi),
            _ => i += 1,
        }
    }

    // Start the simplified loop at its smallest raw index
    let start = (0..cont.poly.len())
        .min_by_key(|&k| cont.poly[k])
        .unwrap_or(0);
    let npoly = cont.poly.len();
    let simplified: Vec<RawVertex> = (0..npoly)
        .map(|k| cont.verts[cont.poly[(start + k) % npoly]])
        .collect();
    cont.verts = simplified;
}

/// Height of the corner at (x, z) and whether it lies on a straight tile border.
///
/// The corner is removable when several walkable cells around it belong to
/// one region and all of them share exactly one portal direction.
fn corner_height(layer: &TileCacheLayer, x: i32, y: i32, z: i32, walkable_climb: i32) -> (u8, bool) {
    let w = layer.width();
    let h = layer.height();

    let mut n = 0;
    let mut portal: u8 = 0xf;
    let mut height: u8 = 0;
    let mut preg = NULL_REGION;
    let mut all_same_reg = true;

    for dz in -1..=0 {
        for dx in -1..=0 {
            let px = x + dx;
            let pz = z + dz;
            if px < 0 || pz < 0 || px >= w || pz >= h {
                continue;
            }
            let idx = (px + pz * w) as usize;
            let lh = layer.heights[idx] as i32;
            if (lh - y).abs() <= walkable_climb && layer.areas[idx] != NULL_AREA {
                height = height.max(lh as u8);
                portal &= layer.cons[idx] >> 4;
                if preg != NULL_REGION && preg != layer.regs[idx] {
                    all_same_reg = false;
                }
                preg = layer.regs[idx];
                n += 1;
            }
        }
    }

    let portal_count = (0..4).filter(|dir| portal & (1 << dir) != 0).count();
    let should_remove = n > 1 && portal_count == 1 && all_same_reg;

    (height, should_remove)
}

/// Traces and simplifies the outline of every region in `layer`.
///
/// `layer` must have been partitioned by
/// [`build_tile_cache_regions`](crate::layer_regions::build_tile_cache_regions).
pub fn build_tile_cache_contours(
    layer: &TileCacheLayer,
    walkable_climb: i32,
    max_error: f32,
) -> Result<TileCacheContourSet> {
    let w = layer.width();
    let h = layer.height();

    let mut lcset = TileCacheContourSet {
        conts: vec![TileCacheContour::default(); layer.reg_count as usize],
    };
    let mut traced = vec![false; layer.reg_count as usize];

    // Twice around the layer
    let max_temp_verts = ((w + h) * 2 * 2) as usize;
    let mut temp = TempContour::new(max_temp_verts);

    for y in 0..h {
        for x in 0..w {
            let idx = (x + y * w) as usize;
            let ri = layer.regs[idx];
            if ri == NULL_REGION || traced[ri as usize] {
                continue;
            }
            traced[ri as usize] = true;

            if !walk_contour(layer, x, y, &mut temp) {
                return Err(Error::CapacityExceeded(format!(
                    "contour of region {ri} needs more than {max_temp_verts} vertices"
                )));
            }

            simplify_contour(&mut temp, max_error);

            let n = temp.verts.len();
            let mut verts = Vec::with_capacity(n);
            for j in 0..n {
                let v = temp.verts[j];
                // The neighbour of edge j -> j+1 is stored on its end vertex
                let nei = temp.verts[(j + 1) % n].r;
                let (lh, remove) = corner_height(layer, v.x, v.y, v.z, walkable_climb);
                verts.push(ContourVertex {
                    x: v.x as u8,
                    y: lh,
                    z: v.z as u8,
                    portal: (nei >= PORTAL_TAG && nei != NULL_REGION).then(|| nei - PORTAL_TAG),
                    remove,
                });
            }

            let cont = &mut lcset.conts[ri as usize];
            cont.reg = ri;
            cont.area = layer.areas[idx];
            cont.verts = verts;
        }
    }

    Ok(lcset)
}
