//! The hcloud binary format
//!
//! An hcloud file is `magic | version | header | data | index`, with the
//! header recording absolute byte offsets of the index and data sections.
//! All multi-byte fields are little-endian fixed-width.

pub mod codec;
pub mod header;

pub use header::{HCloudHeader, HCLOUD_MAGIC, HCLOUD_VERSION};

/// Per-node flag: the node payload is raw leaf points, not brick voxels.
pub const NODE_FLAG_POINTS: u8 = 0x01;

/// Per-node flag: this brick node is an octree leaf; its child slot 0, if
/// present, holds the node's raw point payload rather than an octant.
///
/// This is a deliberate on-disk space optimization inherited from the
/// format: the discriminant is this flag, never the child geometry.
pub const NODE_FLAG_LEAF: u8 = 0x02;
