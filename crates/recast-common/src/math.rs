//! Integer helpers used by the handle pools and the layer builders

/// Rounds up to the next power of two. Zero maps to one.
#[inline]
pub fn next_pow2(x: u32) -> u32 {
    if x == 0 {
        return 1;
    }
    let mut n = x - 1;
    n |= n >> 1;
    n |= n >> 2;
    n |= n >> 4;
    n |= n >> 8;
    n |= n >> 16;
    n.wrapping_add(1)
}

/// Integer base-2 logarithm (floor). Zero maps to zero.
#[inline]
pub fn ilog2(x: u32) -> u32 {
    if x == 0 {
        return 0;
    }
    31 - x.leading_zeros()
}

/// Square a value
#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}
