//! Morton encoding (Z-order curve) for spatial indexing
//!
//! The octree builder consumes leaf nodes in Morton order, which groups
//! siblings together so that a parent can be finished with bounded
//! look-ahead.

use crate::core::types::UVec3;

/// Spread bits of a 21-bit integer into every third bit of a 64-bit integer
fn spread_bits(x: u32) -> u64 {
    let mut x = x as u64 & 0x1fffff; // 21 bits max
    x = (x | (x << 32)) & 0x1f00000000ffff;
    x = (x | (x << 16)) & 0x1f0000ff0000ff;
    x = (x | (x << 8)) & 0x100f00f00f00f00f;
    x = (x | (x << 4)) & 0x10c30c30c30c30c3;
    x = (x | (x << 2)) & 0x1249249249249249;
    x
}

/// Compact every third bit of a 64-bit integer into a 21-bit integer
fn compact_bits(x: u64) -> u32 {
    let mut x = x & 0x1249249249249249;
    x = (x | (x >> 2)) & 0x10c30c30c30c30c3;
    x = (x | (x >> 4)) & 0x100f00f00f00f00f;
    x = (x | (x >> 8)) & 0x1f0000ff0000ff;
    x = (x | (x >> 16)) & 0x1f00000000ffff;
    x = (x | (x >> 32)) & 0x1fffff;
    x as u32
}

/// Encode 3D cell coordinates into a Morton code (Z-order curve)
/// Each coordinate can be up to 21 bits (0..2097151)
pub fn morton_encode(cell: UVec3) -> u64 {
    spread_bits(cell.x) | (spread_bits(cell.y) << 1) | (spread_bits(cell.z) << 2)
}

/// Decode a Morton code back to 3D cell coordinates
pub fn morton_decode(code: u64) -> UVec3 {
    UVec3::new(
        compact_bits(code),
        compact_bits(code >> 1),
        compact_bits(code >> 2),
    )
}
