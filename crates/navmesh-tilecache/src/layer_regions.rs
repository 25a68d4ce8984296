//! Monotone region partitioning of a decompressed tile layer
//!
//! Each row is swept left to right. Runs of connected cells become sweep
//! spans, and a span continues the region below it only when it is the sole
//! connection to that region in the row. The resulting monotone regions are
//! then greedily merged into their largest same-area neighbour and their ids
//! compacted.

use recast_common::{Error, Result};

use crate::tile_cache_data::{TileCacheLayer, NULL_AREA, NULL_REGION};

/// Per-row run of connected cells
#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    /// Number of cells connected to the neighbour region below
    ns: u16,
    /// Final region id
    id: u8,
    /// Region below this span, `NULL_REGION` if none or ambiguous
    nei: u8,
}

/// Monotone region collected during the sweep
#[derive(Debug, Clone, Default)]
struct MonotoneRegion {
    area: i32,
    neis: Vec<u8>,
    reg_id: u8,
    area_id: u8,
}

/// Two cells are connected when they share an area and the height step is climbable.
#[inline]
fn is_connected(layer: &TileCacheLayer, ia: usize, ib: usize, walkable_climb: i32) -> bool {
    if layer.areas[ia] != layer.areas[ib] {
        return false;
    }
    (layer.heights[ia] as i32 - layer.heights[ib] as i32).abs() <= walkable_climb
}

/// Appends `v` unless it already is the last element
#[inline]
fn add_unique_last(a: &mut Vec<u8>, v: u8) {
    if a.last() != Some(&v) {
        a.push(v);
    }
}

/// A merge is allowed when the two regions are linked through exactly one neighbour entry
fn can_merge(old_reg_id: u8, new_reg_id: u8, regs: &[MonotoneRegion]) -> bool {
    let mut count = 0;
    for reg in regs.iter().filter(|r| r.reg_id == old_reg_id) {
        count += reg
            .neis
            .iter()
            .filter(|&&nei| regs[nei as usize].reg_id == new_reg_id)
            .count();
    }
    count == 1
}

/// Partitions the walkable cells of `layer` into regions.
///
/// Fills `layer.regs` and `layer.reg_count`. Fails with
/// [`Error::CapacityExceeded`] when the sweep needs more than 255 region ids.
pub fn build_tile_cache_regions(layer: &mut TileCacheLayer, walkable_climb: i32) -> Result<()> {
    let w = layer.width() as usize;
    let h = layer.height() as usize;

    layer.regs.clear();
    layer.regs.resize(w * h, NULL_REGION);
    layer.reg_count = 0;

    let mut sweeps = vec![SweepSpan::default(); w];
    let mut prev_count = [0u16; 256];
    let mut reg_id: u16 = 0;

    for y in 0..h {
        prev_count[..reg_id as usize].fill(0);
        let mut sweep_id: usize = 0;

        for x in 0..w {
            let idx = x + y * w;
            if layer.areas[idx] == NULL_AREA {
                continue;
            }

            let mut sid = NULL_REGION;

            // -x
            if x > 0 {
                let xidx = idx - 1;
                if is_connected(layer, idx, xidx, walkable_climb) && layer.regs[xidx] != NULL_REGION
                {
                    sid = layer.regs[xidx];
                }
            }

            if sid == NULL_REGION {
                sid = sweep_id as u8;
                sweeps[sweep_id].nei = NULL_REGION;
                sweeps[sweep_id].ns = 0;
                sweep_id += 1;
            }

            // -y
            if y > 0 {
                let yidx = idx - w;
                if is_connected(layer, idx, yidx, walkable_climb) {
                    let nr = layer.regs[yidx];
                    if nr != NULL_REGION {
                        let sweep = &mut sweeps[sid as usize];
                        if sweep.ns == 0 {
                            sweep.nei = nr;
                        }
                        if sweep.nei == nr {
                            sweep.ns += 1;
                            prev_count[nr as usize] += 1;
                        } else {
                            // More than one neighbour below
                            sweep.nei = NULL_REGION;
                        }
                    }
                }
            }

            layer.regs[idx] = sid;
        }

        // A span inherits the region below only if it is that region's only
        // continuous connection in this row.
        for sweep in sweeps.iter_mut().take(sweep_id) {
            if sweep.nei != NULL_REGION && prev_count[sweep.nei as usize] == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                if reg_id == NULL_REGION as u16 {
                    return Err(Error::CapacityExceeded(
                        "tile layer needs more than 255 regions".to_string(),
                    ));
                }
                sweep.id = reg_id as u8;
                reg_id += 1;
            }
        }

        for reg in &mut layer.regs[y * w..(y + 1) * w] {
            if *reg != NULL_REGION {
                *reg = sweeps[*reg as usize].id;
            }
        }
    }

    let nregs = reg_id as usize;
    let mut regs = vec![
        MonotoneRegion {
            reg_id: NULL_REGION,
            ..Default::default()
        };
        nregs
    ];

    // Region sizes and vertical adjacency
    for y in 0..h {
        for x in 0..w {
            let idx = x + y * w;
            let ri = layer.regs[idx];
            if ri == NULL_REGION {
                continue;
            }

            regs[ri as usize].area += 1;
            regs[ri as usize].area_id = layer.areas[idx];

            if y > 0 {
                let ymi = idx - w;
                if is_connected(layer, idx, ymi, walkable_climb) {
                    let rai = layer.regs[ymi];
                    if rai != NULL_REGION && rai != ri {
                        add_unique_last(&mut regs[ri as usize].neis, rai);
                        add_unique_last(&mut regs[rai as usize].neis, ri);
                    }
                }
            }
        }
    }

    for (i, reg) in regs.iter_mut().enumerate() {
        reg.reg_id = i as u8;
    }

    for i in 0..nregs {
        let mut merge: Option<u8> = None;
        let mut merge_area = 0;
        for &nei in &regs[i].neis {
            let regn = &regs[nei as usize];
            if regs[i].reg_id == regn.reg_id || regs[i].area_id != regn.area_id {
                continue;
            }
            if regn.area > merge_area && can_merge(regs[i].reg_id, regn.reg_id, &regs) {
                merge_area = regn.area;
                merge = Some(nei);
            }
        }

        if let Some(merge) = merge {
            let old_id = regs[i].reg_id;
            let new_id = regs[merge as usize].reg_id;
            for reg in regs.iter_mut().filter(|r| r.reg_id == old_id) {
                reg.reg_id = new_id;
            }
        }
    }

    // Compact ids
    let mut remap = [0u8; 256];
    let mut used = [false; 256];
    for reg in &regs {
        used[reg.reg_id as usize] = true;
    }
    let mut count: u8 = 0;
    for (slot, &is_used) in remap.iter_mut().zip(used.iter()) {
        if is_used {
            *slot = count;
            count += 1;
        }
    }
    for reg in &mut regs {
        reg.reg_id = remap[reg.reg_id as usize];
    }

    layer.reg_count = count;
    for r in layer.regs.iter_mut() {
        if *r != NULL_REGION {
            *r = regs[*r as usize].reg_id;
        }
    }

    log::debug!(
        "Built {} regions from {} monotone spans in {}x{} layer",
        count,
        nregs,
        w,
        h
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_layer_helpers::{flat_layer, LayerBuilder};

    #[test]
    fn test_flat_layer_is_one_region() {
        let mut layer = flat_layer(10, 10);
        build_tile_cache_regions(&mut layer, 2).unwrap();
        assert_eq!(layer.reg_count, 1);
        assert!(layer.regs.iter().all(|&r| r == 0));
    }

    #[test]
    fn test_null_area_cells_have_no_region() {
        let mut layer = LayerBuilder::new(6, 6).block_cell(2, 3).build();
        build_tile_cache_regions(&mut layer, 2).unwrap();
        assert_eq!(layer.regs[2 + 3 * 6], NULL_REGION);
        assert!(layer.reg_count >= 1);
    }

    #[test]
    fn test_separate_areas_do_not_merge() {
        // Left half area 1, right half area 2
        let mut builder = LayerBuilder::new(8, 4);
        for y in 0..4 {
            for x in 4..8 {
                builder = builder.area(x, y, 2);
            }
        }
        let mut layer = builder.build();
        build_tile_cache_regions(&mut layer, 2).unwrap();

        assert_eq!(layer.reg_count, 2);
        let left = layer.regs[0];
        let right = layer.regs[7];
        assert_ne!(left, right);
        for y in 0..4 {
            for x in 0..8 {
                let expected = if x < 4 { left } else { right };
                assert_eq!(layer.regs[x + y * 8], expected);
            }
        }
    }

    #[test]
    fn test_height_step_splits_regions() {
        // A step of 5 cells cannot be climbed with climb 2
        let mut builder = LayerBuilder::new(6, 6);
        for y in 3..6 {
            for x in 0..6 {
                builder = builder.height(x, y, 5);
            }
        }
        let mut layer = builder.build();
        build_tile_cache_regions(&mut layer, 2).unwrap();
        assert_eq!(layer.reg_count, 2);
        assert_ne!(layer.regs[0], layer.regs[3 * 6]);

        // The same step is walkable with a larger climb
        build_tile_cache_regions(&mut layer, 5).unwrap();
        assert_eq!(layer.reg_count, 1);
    }

    #[test]
    fn test_region_ids_are_compact() {
        // A blocked column in the middle makes a U shape
        let mut builder = LayerBuilder::new(9, 9);
        for y in 2..9 {
            builder = builder.block_cell(4, y);
        }
        let mut layer = builder.build();
        build_tile_cache_regions(&mut layer, 2).unwrap();

        let max_id = layer
            .regs
            .iter()
            .copied()
            .filter(|&r| r != NULL_REGION)
            .max()
            .unwrap();
        assert_eq!(max_id + 1, layer.reg_count);
        for id in 0..layer.reg_count {
            assert!(layer.regs.contains(&id));
        }
    }

    #[test]
    fn test_region_overflow_is_an_error() {
        // Isolated single cells in a checkerboard each need their own region
        let mut builder = LayerBuilder::new(32, 32);
        for y in 0..32 {
            for x in 0..32 {
                if (x + y) % 2 == 1 {
                    builder = builder.block_cell(x, y);
                }
            }
        }
        let mut layer = builder.build();
        assert!(matches!(
            build_tile_cache_regions(&mut layer, 2),
            Err(Error::CapacityExceeded(_))
        ));
    }

    #[test]
    fn test_regions_are_deterministic() {
        let mut builder = LayerBuilder::new(12, 12);
        for (x, y) in [(3, 3), (4, 3), (8, 7), (2, 9)] {
            builder = builder.block_cell(x, y);
        }
        let mut a = builder.build();
        let mut b = a.clone();
        build_tile_cache_regions(&mut a, 2).unwrap();
        build_tile_cache_regions(&mut b, 2).unwrap();
        assert_eq!(a.regs, b.regs);
        assert_eq!(a.reg_count, b.reg_count);
    }
}
