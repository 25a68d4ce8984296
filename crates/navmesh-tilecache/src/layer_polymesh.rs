//! Convex polygon mesh built from tile layer contours
//!
//! Contours are ear-clipped into triangles, the triangles are greedily merged
//! into convex polygons of at most `nvp` vertices, border vertices flagged by
//! the contour builder are removed, and finally polygon adjacency is computed
//! with open edges on the tile border tagged as portals.

use recast_common::{overlap_range_exclusive, Error, Result};

use crate::layer_contours::TileCacheContourSet;

/// Maximum number of vertices per polygon record
pub const MAX_VERTS_PER_POLY: usize = 6;
/// Sentinel for unused vertex and neighbour slots
pub const MESH_NULL_IDX: u16 = 0xffff;
/// Neighbour slot flag marking a portal edge; the low bits hold the direction
pub const PORTAL_FLAG: u16 = 0x8000;

const VERTEX_BUCKET_COUNT: usize = 1 << 8;
const MAX_REM_EDGES: usize = 48;
/// Diagonal flag stored in the triangulation index list
const EAR_FLAG: u16 = 0x8000;

/// What lies across a polygon edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeLink {
    /// Solid wall
    Wall,
    /// Edge on the tile border leading out in the given direction
    Portal(u8),
    /// Shared with the polygon at this index
    Poly(u16),
}

/// Fixed-size polygon record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCachePoly {
    /// Vertex indices, unused slots hold `MESH_NULL_IDX`
    pub verts: [u16; MAX_VERTS_PER_POLY],
    /// Neighbour per edge, see [`EdgeLink`] for the encoding
    pub neis: [u16; MAX_VERTS_PER_POLY],
}

impl Default for TileCachePoly {
    fn default() -> Self {
        Self {
            verts: [MESH_NULL_IDX; MAX_VERTS_PER_POLY],
            neis: [MESH_NULL_IDX; MAX_VERTS_PER_POLY],
        }
    }
}

impl TileCachePoly {
    fn from_triangle(a: u16, b: u16, c: u16) -> Self {
        let mut poly = Self::default();
        poly.verts[..3].copy_from_slice(&[a, b, c]);
        poly
    }

    /// Number of used vertex slots
    pub fn vert_count(&self) -> usize {
        self.verts
            .iter()
            .take_while(|&&v| v != MESH_NULL_IDX)
            .count()
    }

    /// Decoded neighbour of edge `edge` (from vertex `edge` to the next one)
    pub fn edge_link(&self, edge: usize) -> EdgeLink {
        match self.neis[edge] {
            MESH_NULL_IDX => EdgeLink::Wall,
            n if n & PORTAL_FLAG != 0 => EdgeLink::Portal((n & 0xf) as u8),
            n => EdgeLink::Poly(n),
        }
    }
}

/// Polygon mesh of one tile layer, in layer cell units
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileCachePolyMesh {
    /// Maximum vertices per polygon used when merging
    pub nvp: usize,
    /// Shared vertex pool (x, y, z)
    pub verts: Vec<[u16; 3]>,
    /// Polygons
    pub polys: Vec<TileCachePoly>,
    /// Area id per polygon
    pub areas: Vec<u8>,
    /// User flags per polygon, left zeroed for the mesh-process hook
    pub flags: Vec<u16>,
}

impl TileCachePolyMesh {
    /// Number of polygons
    pub fn poly_count(&self) -> usize {
        self.polys.len()
    }
}

#[inline]
fn prev(i: usize, n: usize) -> usize {
    if i == 0 {
        n - 1
    } else {
        i - 1
    }
}

#[inline]
fn next(i: usize, n: usize) -> usize {
    if i + 1 < n {
        i + 1
    } else {
        0
    }
}

type Pt = [i32; 2];

#[inline]
fn area2(a: Pt, b: Pt, c: Pt) -> i32 {
    (b[0] - a[0]) * (c[1] - a[1]) - (c[0] - a[0]) * (b[1] - a[1])
}

/// True iff c is strictly to the left of the directed line a -> b
#[inline]
fn left(a: Pt, b: Pt, c: Pt) -> bool {
    area2(a, b, c) < 0
}

#[inline]
fn left_on(a: Pt, b: Pt, c: Pt) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
fn collinear(a: Pt, b: Pt, c: Pt) -> bool {
    area2(a, b, c) == 0
}

/// Proper intersection: the segments share a single interior point
fn intersect_prop(a: Pt, b: Pt, c: Pt, d: Pt) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

fn between(a: Pt, b: Pt, c: Pt) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[1] <= c[1] && c[1] <= b[1]) || (a[1] >= c[1] && c[1] >= b[1])
    }
}

/// Proper or improper intersection
fn intersect(a: Pt, b: Pt, c: Pt, d: Pt) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

struct Polygon<'a> {
    verts: &'a [Pt],
    indices: &'a [u16],
}

impl Polygon<'_> {
    #[inline]
    fn pt(&self, i: usize) -> Pt {
        self.verts[(self.indices[i] & !EAR_FLAG) as usize]
    }

    /// (i, j) is a diagonal ignoring edges incident to i and j
    fn diagonalie(&self, i: usize, j: usize, loose: bool) -> bool {
        let n = self.indices.len();
        let d0 = self.pt(i);
        let d1 = self.pt(j);

        for k in 0..n {
            let k1 = next(k, n);
            if k == i || k1 == i || k == j || k1 == j {
                continue;
            }
            let p0 = self.pt(k);
            let p1 = self.pt(k1);
            if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
                continue;
            }
            let hit = if loose {
                intersect_prop(d0, d1, p0, p1)
            } else {
                intersect(d0, d1, p0, p1)
            };
            if hit {
                return false;
            }
        }
        true
    }

    /// The diagonal (i, j) starts inside the cone at vertex i
    fn in_cone(&self, i: usize, j: usize, loose: bool) -> bool {
        let n = self.indices.len();
        let pi = self.pt(i);
        let pj = self.pt(j);
        let pi1 = self.pt(next(i, n));
        let pin1 = self.pt(prev(i, n));

        if left_on(pin1, pi, pi1) {
            // Convex vertex
            if loose {
                return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
            }
            return left(pi, pj, pin1) && left(pj, pi, pi1);
        }
        // Reflex vertex
        !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
    }

    fn diagonal(&self, i: usize, j: usize, loose: bool) -> bool {
        self.in_cone(i, j, loose) && self.diagonalie(i, j, loose)
    }
}

fn is_diagonal(verts: &[Pt], indices: &[u16], i: usize, j: usize, loose: bool) -> bool {
    Polygon { verts, indices }.diagonal(i, j, loose)
}

/// Ear-clips the polygon `verts` into triangles of indices into `verts`.
///
/// Ears closing the shortest diagonal go first. When no regular ear exists a
/// relaxed test is tried; if that fails too the triangles found so far are
/// returned with `false`.
fn triangulate(verts: &[Pt], tris: &mut Vec<[u16; 3]>) -> bool {
    tris.clear();
    let mut indices: Vec<u16> = (0..verts.len() as u16).collect();
    let mut n = indices.len();
    if n < 3 {
        return false;
    }

    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if is_diagonal(verts, &indices, i, i2, false) {
            indices[i1] |= EAR_FLAG;
        }
    }

    let ear_len = |indices: &[u16], i: usize, n: usize| {
        let p0 = verts[(indices[i] & !EAR_FLAG) as usize];
        let p2 = verts[(indices[next(next(i, n), n)] & !EAR_FLAG) as usize];
        let dx = p2[0] - p0[0];
        let dz = p2[1] - p0[1];
        dx * dx + dz * dz
    };

    while n > 3 {
        let mut min_len = -1;
        let mut mini = None;
        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1] & EAR_FLAG != 0 {
                let len = ear_len(&indices, i, n);
                if min_len < 0 || len < min_len {
                    min_len = len;
                    mini = Some(i);
                }
            }
        }

        if mini.is_none() {
            // Overlapping contour segments can leave no strict ear
            min_len = -1;
            for i in 0..n {
                let i2 = next(next(i, n), n);
                if is_diagonal(verts, &indices, i, i2, true) {
                    let len = ear_len(&indices, i, n);
                    if min_len < 0 || len < min_len {
                        min_len = len;
                        mini = Some(i);
                    }
                }
            }
        }

        let Some(i) = mini else {
            return false;
        };
        let mut i1 = next(i, n);
        let i2 = next(i1, n);

        tris.push([
            indices[i] & !EAR_FLAG,
            indices[i1] & !EAR_FLAG,
            indices[i2] & !EAR_FLAG,
        ]);

        // Remove P[i1]
        indices.remove(i1);
        n -= 1;
        if i1 >= n {
            i1 = 0;
        }
        let i = prev(i1, n);

        if is_diagonal(verts, &indices, prev(i, n), i1, false) {
            indices[i] |= EAR_FLAG;
        } else {
            indices[i] &= !EAR_FLAG;
        }
        if is_diagonal(verts, &indices, i, next(i1, n), false) {
            indices[i1] |= EAR_FLAG;
        } else {
            indices[i1] &= !EAR_FLAG;
        }
    }

    tris.push([
        indices[0] & !EAR_FLAG,
        indices[1] & !EAR_FLAG,
        indices[2] & !EAR_FLAG,
    ]);
    true
}

fn vertex_hash(x: u16, y: u16, z: u16) -> usize {
    const H1: u32 = 0x8da6_b343;
    const H2: u32 = 0xd816_3841;
    const H3: u32 = 0xcb1a_b31f;
    let n = H1
        .wrapping_mul(x as u32)
        .wrapping_add(H2.wrapping_mul(y as u32))
        .wrapping_add(H3.wrapping_mul(z as u32));
    (n as usize) & (VERTEX_BUCKET_COUNT - 1)
}

/// Spatial hash deduplicating vertices that share (x, z) within 2 height units
struct VertexWelder {
    first_vert: [u16; VERTEX_BUCKET_COUNT],
    next_vert: Vec<u16>,
}

impl VertexWelder {
    fn new() -> Self {
        Self {
            first_vert: [MESH_NULL_IDX; VERTEX_BUCKET_COUNT],
            next_vert: Vec::new(),
        }
    }

    fn add_vertex(&mut self, x: u16, y: u16, z: u16, verts: &mut Vec<[u16; 3]>) -> Result<u16> {
        let bucket = vertex_hash(x, 0, z);
        let mut i = self.first_vert[bucket];
        while i != MESH_NULL_IDX {
            let v = verts[i as usize];
            if v[0] == x && v[2] == z && (v[1] as i32 - y as i32).abs() <= 2 {
                return Ok(i);
            }
            i = self.next_vert[i as usize];
        }

        if verts.len() >= MESH_NULL_IDX as usize {
            return Err(Error::CapacityExceeded(
                "polygon mesh vertex count exceeds 16-bit indices".to_string(),
            ));
        }
        let i = verts.len() as u16;
        verts.push([x, y, z]);
        self.next_vert.push(self.first_vert[bucket]);
        self.first_vert[bucket] = i;
        Ok(i)
    }
}

/// True iff c is strictly left of a -> b, on mesh vertices
#[inline]
fn uleft(a: &[u16; 3], b: &[u16; 3], c: &[u16; 3]) -> bool {
    (b[0] as i32 - a[0] as i32) * (c[2] as i32 - a[2] as i32)
        - (c[0] as i32 - a[0] as i32) * (b[2] as i32 - a[2] as i32)
        < 0
}

/// Score for merging `pa` and `pb`: the squared length of their shared edge,
/// or `None` when they share no edge, the result would exceed `nvp` vertices
/// or would not be convex. Returns (score, edge in pa, edge in pb).
///
/// Higher scores merge first, so the longest shared edge is dissolved first.
fn poly_merge_value(
    pa: &TileCachePoly,
    pb: &TileCachePoly,
    verts: &[[u16; 3]],
    nvp: usize,
) -> Option<(i32, usize, usize)> {
    let na = pa.vert_count();
    let nb = pb.vert_count();

    if na + nb - 2 > nvp {
        return None;
    }

    let mut shared = None;
    for i in 0..na {
        let mut va0 = pa.verts[i];
        let mut va1 = pa.verts[(i + 1) % na];
        if va0 > va1 {
            std::mem::swap(&mut va0, &mut va1);
        }
        for j in 0..nb {
            let mut vb0 = pb.verts[j];
            let mut vb1 = pb.verts[(j + 1) % nb];
            if vb0 > vb1 {
                std::mem::swap(&mut vb0, &mut vb1);
            }
            if va0 == vb0 && va1 == vb1 {
                shared = Some((i, j));
                break;
            }
        }
    }
    let (ea, eb) = shared?;

    let v = |i: u16| &verts[i as usize];

    let va = pa.verts[(ea + na - 1) % na];
    let vb = pa.verts[ea];
    let vc = pb.verts[(eb + 2) % nb];
    if !uleft(v(va), v(vb), v(vc)) {
        return None;
    }

    let va = pb.verts[(eb + nb - 1) % nb];
    let vb = pb.verts[eb];
    let vc = pa.verts[(ea + 2) % na];
    if !uleft(v(va), v(vb), v(vc)) {
        return None;
    }

    let va = v(pa.verts[ea]);
    let vb = v(pa.verts[(ea + 1) % na]);
    let dx = va[0] as i32 - vb[0] as i32;
    let dz = va[2] as i32 - vb[2] as i32;
    Some((dx * dx + dz * dz, ea, eb))
}

/// Joins `pb` into `pa` across edges `ea` / `eb`
fn merge_polys(pa: &mut TileCachePoly, pb: &TileCachePoly, ea: usize, eb: usize) {
    let na = pa.vert_count();
    let nb = pb.vert_count();

    let mut merged = [MESH_NULL_IDX; MAX_VERTS_PER_POLY];
    let mut n = 0;
    for i in 0..na - 1 {
        merged[n] = pa.verts[(ea + 1 + i) % na];
        n += 1;
    }
    for i in 0..nb - 1 {
        merged[n] = pb.verts[(eb + 1 + i) % nb];
        n += 1;
    }
    pa.verts = merged;
}

/// Repeatedly merges the pair of polygons with the longest shared edge.
/// `areas`, when given, is kept parallel to `polys`.
fn merge_convex_polys(
    polys: &mut Vec<TileCachePoly>,
    mut areas: Option<&mut Vec<u8>>,
    verts: &[[u16; 3]],
    nvp: usize,
) {
    if nvp <= 3 {
        return;
    }
    loop {
        let mut best: Option<(i32, usize, usize, usize, usize)> = None;
        for j in 0..polys.len().saturating_sub(1) {
            for k in j + 1..polys.len() {
                if let Some((value, ea, eb)) = poly_merge_value(&polys[j], &polys[k], verts, nvp) {
                    if best.map_or(value > 0, |b| value > b.0) {
                        best = Some((value, j, k, ea, eb));
                    }
                }
            }
        }

        let Some((_, pa, pb, ea, eb)) = best else {
            break;
        };
        let other = polys[pb];
        merge_polys(&mut polys[pa], &other, ea, eb);
        polys.swap_remove(pb);
        if let Some(areas) = areas.as_deref_mut() {
            areas.swap_remove(pb);
        }
    }
}

fn can_remove_vertex(mesh: &TileCachePolyMesh, rem: u16) -> bool {
    let mut num_touched_verts = 0;
    let mut num_remaining_edges = 0;
    for poly in &mesh.polys {
        let nv = poly.vert_count();
        let num_removed = poly.verts[..nv].iter().filter(|&&v| v == rem).count();
        num_touched_verts += num_removed;
        if num_removed > 0 {
            num_remaining_edges += nv - (num_removed + 1);
        }
    }

    // A lone triangle tip cannot be removed
    if num_remaining_edges <= 2 {
        return false;
    }

    if num_touched_verts * 2 > MAX_REM_EDGES {
        return false;
    }

    // Edges incident to the vertex with their share count
    let mut edges: Vec<(u16, u16, u32)> = Vec::new();
    for poly in &mesh.polys {
        let nv = poly.vert_count();
        let mut k = nv - 1;
        for j in 0..nv {
            if poly.verts[j] == rem || poly.verts[k] == rem {
                let (mut a, mut b) = (poly.verts[j], poly.verts[k]);
                if b == rem {
                    std::mem::swap(&mut a, &mut b);
                }
                let mut exists = false;
                for e in edges.iter_mut().filter(|e| e.1 == b) {
                    e.2 += 1;
                    exists = true;
                }
                if !exists {
                    edges.push((a, b, 1));
                }
            }
            k = j;
        }
    }

    // More than two open edges means two unconnected polygons share the vertex
    let num_open_edges = edges.iter().filter(|e| e.2 < 2).count();
    num_open_edges <= 2
}

fn remove_vertex(mesh: &mut TileCachePolyMesh, rem: u16, max_tris: usize) -> Result<()> {
    let too_complex =
        || Error::CapacityExceeded(format!("hole around vertex {rem} exceeds {MAX_REM_EDGES} edges"));

    // Boundary edges of the polygons around the vertex: (from, to, area)
    let mut edges: Vec<(u16, u16, u8)> = Vec::new();
    let mut i = 0;
    while i < mesh.polys.len() {
        let poly = mesh.polys[i];
        let nv = poly.vert_count();
        if !poly.verts[..nv].contains(&rem) {
            i += 1;
            continue;
        }

        let mut k = nv - 1;
        for j in 0..nv {
            if poly.verts[j] != rem && poly.verts[k] != rem {
                if edges.len() >= MAX_REM_EDGES {
                    return Err(too_complex());
                }
                edges.push((poly.verts[k], poly.verts[j], mesh.areas[i]));
            }
            k = j;
        }

        mesh.polys.swap_remove(i);
        mesh.areas.swap_remove(i);
        mesh.flags.swap_remove(i);
    }

    mesh.verts.remove(rem as usize);
    for poly in &mut mesh.polys {
        let nv = poly.vert_count();
        for v in &mut poly.verts[..nv] {
            if *v > rem {
                *v -= 1;
            }
        }
    }
    for e in &mut edges {
        if e.0 > rem {
            e.0 -= 1;
        }
        if e.1 > rem {
            e.1 -= 1;
        }
    }

    if edges.is_empty() {
        return Ok(());
    }

    // Chain the edges into the hole outline, growing it at both ends
    let mut hole: Vec<u16> = vec![edges[0].0];
    let mut harea: Vec<u8> = vec![edges[0].2];

    while !edges.is_empty() {
        let mut matched = false;
        let mut i = 0;
        while i < edges.len() {
            let (ea, eb, area) = edges[i];
            let add = if hole[0] == eb {
                if hole.len() >= MAX_REM_EDGES {
                    return Err(too_complex());
                }
                hole.insert(0, ea);
                harea.insert(0, area);
                true
            } else if hole[hole.len() - 1] == ea {
                if hole.len() >= MAX_REM_EDGES {
                    return Err(too_complex());
                }
                hole.push(eb);
                harea.push(area);
                true
            } else {
                false
            };
            if add {
                edges.swap_remove(i);
                matched = true;
            } else {
                i += 1;
            }
        }
        if !matched {
            break;
        }
    }

    let tverts: Vec<Pt> = hole
        .iter()
        .map(|&pi| {
            let v = mesh.verts[pi as usize];
            [v[0] as i32, v[2] as i32]
        })
        .collect();

    let mut tris = Vec::new();
    if !triangulate(&tverts, &mut tris) {
        log::warn!(
            "Hole left by vertex {} could not be fully triangulated ({} of {} triangles)",
            rem,
            tris.len(),
            hole.len().saturating_sub(2)
        );
    }
    if tris.len() > MAX_REM_EDGES {
        return Err(too_complex());
    }

    let mut polys = Vec::with_capacity(tris.len());
    let mut pareas = Vec::with_capacity(tris.len());
    for t in &tris {
        if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
            polys.push(TileCachePoly::from_triangle(
                hole[t[0] as usize],
                hole[t[1] as usize],
                hole[t[2] as usize],
            ));
            pareas.push(harea[t[0] as usize]);
        }
    }
    if polys.is_empty() {
        return Ok(());
    }

    merge_convex_polys(&mut polys, Some(&mut pareas), &mesh.verts, mesh.nvp);

    for (poly, area) in polys.into_iter().zip(pareas) {
        if mesh.polys.len() >= max_tris {
            return Err(Error::CapacityExceeded(format!(
                "polygon mesh exceeds {max_tris} polygons"
            )));
        }
        mesh.polys.push(poly);
        mesh.areas.push(area);
        mesh.flags.push(0);
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    vert: [u16; 2],
    poly: [u16; 2],
    poly_edge: [u16; 2],
}

const EDGE_UNSET: u16 = 0xff;

/// Links polygons across shared edges and tags open border edges as portals.
fn build_mesh_adjacency(mesh: &mut TileCachePolyMesh, lcset: &TileCacheContourSet) {
    let nverts = mesh.verts.len();
    let mut first_edge = vec![MESH_NULL_IDX; nverts];
    let mut next_edge: Vec<u16> = Vec::new();
    let mut edges: Vec<Edge> = Vec::new();

    let edge_verts = |poly: &TileCachePoly, j: usize| -> (u16, u16) {
        let v0 = poly.verts[j];
        let v1 = if j + 1 >= MAX_VERTS_PER_POLY || poly.verts[j + 1] == MESH_NULL_IDX {
            poly.verts[0]
        } else {
            poly.verts[j + 1]
        };
        (v0, v1)
    };

    for (i, poly) in mesh.polys.iter().enumerate() {
        for j in 0..poly.vert_count() {
            let (v0, v1) = edge_verts(poly, j);
            if v0 < v1 {
                next_edge.push(first_edge[v0 as usize]);
                first_edge[v0 as usize] = edges.len() as u16;
                edges.push(Edge {
                    vert: [v0, v1],
                    poly: [i as u16, i as u16],
                    poly_edge: [j as u16, EDGE_UNSET],
                });
            }
        }
    }

    for (i, poly) in mesh.polys.iter().enumerate() {
        for j in 0..poly.vert_count() {
            let (v0, v1) = edge_verts(poly, j);
            if v0 > v1 {
                let mut found = false;
                let mut e = first_edge[v1 as usize];
                while e != MESH_NULL_IDX {
                    let edge = &mut edges[e as usize];
                    if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                        edge.poly[1] = i as u16;
                        edge.poly_edge[1] = j as u16;
                        found = true;
                        break;
                    }
                    e = next_edge[e as usize];
                }
                if !found {
                    // Open edge
                    next_edge.push(first_edge[v1 as usize]);
                    first_edge[v1 as usize] = edges.len() as u16;
                    edges.push(Edge {
                        vert: [v1, v0],
                        poly: [i as u16, i as u16],
                        poly_edge: [j as u16, EDGE_UNSET],
                    });
                }
            }
        }
    }

    // Tag open edges lying on contour portal segments
    for cont in lcset.conts.iter().filter(|c| c.verts.len() >= 3) {
        let n = cont.verts.len();
        let mut k = n - 1;
        for j in 0..n {
            let va = cont.verts[k];
            let vb = cont.verts[j];
            k = j;
            let Some(dir) = va.portal else {
                continue;
            };

            // Directions 0 and 2 are the x borders, 1 and 3 the z borders
            let (axis, other) = if dir == 0 || dir == 2 { (0, 2) } else { (2, 0) };
            let fixed = (if axis == 0 { va.x } else { va.z }) as u16;
            let (mut amin, mut amax) = if other == 2 {
                (va.z as u16, vb.z as u16)
            } else {
                (va.x as u16, vb.x as u16)
            };
            if amin > amax {
                std::mem::swap(&mut amin, &mut amax);
            }

            for e in edges.iter_mut().filter(|e| e.poly[0] == e.poly[1]) {
                let eva = mesh.verts[e.vert[0] as usize];
                let evb = mesh.verts[e.vert[1] as usize];
                if eva[axis] != fixed || evb[axis] != fixed {
                    continue;
                }
                let (bmin, bmax) = if eva[other] <= evb[other] {
                    (eva[other], evb[other])
                } else {
                    (evb[other], eva[other])
                };
                if overlap_range_exclusive(amin as i32, amax as i32, bmin as i32, bmax as i32) {
                    // The unused second poly edge carries the direction
                    e.poly_edge[1] = dir as u16;
                }
            }
        }
    }

    for e in &edges {
        if e.poly[0] != e.poly[1] {
            mesh.polys[e.poly[0] as usize].neis[e.poly_edge[0] as usize] = e.poly[1];
            mesh.polys[e.poly[1] as usize].neis[e.poly_edge[1] as usize] = e.poly[0];
        } else if e.poly_edge[1] != EDGE_UNSET {
            mesh.polys[e.poly[0] as usize].neis[e.poly_edge[0] as usize] =
                PORTAL_FLAG | e.poly_edge[1];
        }
    }
}

/// Builds the polygon mesh for a layer's contours.
///
/// `nvp` is the maximum number of vertices per polygon (3 to 6).
pub fn build_tile_cache_poly_mesh(
    lcset: &TileCacheContourSet,
    nvp: usize,
) -> Result<TileCachePolyMesh> {
    if !(3..=MAX_VERTS_PER_POLY).contains(&nvp) {
        return Err(Error::InvalidParam(format!(
            "max verts per poly {nvp} outside 3..={MAX_VERTS_PER_POLY}"
        )));
    }

    let mut max_tris = 0;
    for cont in lcset.conts.iter().filter(|c| c.verts.len() >= 3) {
        max_tris += cont.verts.len() - 2;
    }

    let mut mesh = TileCachePolyMesh {
        nvp,
        ..Default::default()
    };
    let mut vflags: Vec<bool> = Vec::new();
    let mut welder = VertexWelder::new();
    let mut tris = Vec::new();

    for cont in lcset.conts.iter().filter(|c| c.verts.len() >= 3) {
        let pts: Vec<Pt> = cont
            .verts
            .iter()
            .map(|v| [v.x as i32, v.z as i32])
            .collect();
        if !triangulate(&pts, &mut tris) {
            log::warn!(
                "Contour of region {} could not be fully triangulated ({} of {} triangles)",
                cont.reg,
                tris.len(),
                cont.verts.len() - 2
            );
        }

        let mut indices = Vec::with_capacity(cont.verts.len());
        for v in &cont.verts {
            let idx = welder.add_vertex(v.x as u16, v.y as u16, v.z as u16, &mut mesh.verts)?;
            vflags.resize(mesh.verts.len(), false);
            if v.remove {
                vflags[idx as usize] = true;
            }
            indices.push(idx);
        }

        let mut polys: Vec<TileCachePoly> = tris
            .iter()
            .filter(|t| t[0] != t[1] && t[0] != t[2] && t[1] != t[2])
            .map(|t| {
                TileCachePoly::from_triangle(
                    indices[t[0] as usize],
                    indices[t[1] as usize],
                    indices[t[2] as usize],
                )
            })
            .collect();
        if polys.is_empty() {
            continue;
        }

        merge_convex_polys(&mut polys, None, &mesh.verts, nvp);

        for poly in polys {
            mesh.polys.push(poly);
            mesh.areas.push(cont.area);
            mesh.flags.push(0);
            if mesh.polys.len() > max_tris {
                return Err(Error::CapacityExceeded(format!(
                    "polygon mesh exceeds {max_tris} polygons"
                )));
            }
        }
    }

    // Drop border vertices that only add detail along a straight portal edge
    let mut i = 0;
    while i < mesh.verts.len() {
        if vflags[i] && can_remove_vertex(&mesh, i as u16) {
            remove_vertex(&mut mesh, i as u16, max_tris)?;
            vflags.remove(i);
        } else {
            i += 1;
        }
    }

    build_mesh_adjacency(&mut mesh, lcset);

    log::debug!(
        "Built polygon mesh with {} polygons and {} vertices",
        mesh.polys.len(),
        mesh.verts.len()
    );

    Ok(mesh)
}
