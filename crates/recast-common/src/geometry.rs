//! Bounding box tests on the XZ plane (Y-up coordinate system)

use glam::Vec3;

/// Check if two axis-aligned bounding boxes overlap.
#[inline]
pub fn overlap_bounds(amin: Vec3, amax: Vec3, bmin: Vec3, bmax: Vec3) -> bool {
    amin.x <= bmax.x
        && amax.x >= bmin.x
        && amin.y <= bmax.y
        && amax.y >= bmin.y
        && amin.z <= bmax.z
        && amax.z >= bmin.z
}

/// Checks whether the open integer ranges `(amin, amax)` and `(bmin, bmax)` overlap.
#[inline]
pub fn overlap_range_exclusive(amin: i32, amax: i32, bmin: i32, bmax: i32) -> bool {
    !(amin >= bmax || amax <= bmin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_bounds() {
        let a0 = Vec3::new(0.0, 0.0, 0.0);
        let a1 = Vec3::new(1.0, 1.0, 1.0);
        assert!(overlap_bounds(a0, a1, Vec3::splat(0.5), Vec3::splat(2.0)));
        // Touching faces count as overlap
        assert!(overlap_bounds(a0, a1, Vec3::new(1.0, 0.0, 0.0), Vec3::splat(2.0)));
        assert!(!overlap_bounds(a0, a1, Vec3::new(1.5, 0.0, 0.0), Vec3::splat(2.0)));
    }

    #[test]
    fn test_overlap_range_exclusive() {
        assert!(overlap_range_exclusive(0, 4, 2, 6));
        assert!(!overlap_range_exclusive(0, 4, 4, 6));
        assert!(!overlap_range_exclusive(4, 0, 1, 2));
    }
}
