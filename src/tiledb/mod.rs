//! Disk-tiled point database
//!
//! Staging store used during ingestion: points stream in once through
//! [`PointDbWriter`], which buckets them into fixed-size grid tiles and
//! appends cold tiles to per-tile files to bound memory. The voxelizer then
//! re-reads them spatially through [`PointDb`], which keeps a byte-budgeted
//! cache of loaded tiles.
//!
//! On disk a database is a directory: one `config.txt` (tile size, bounding
//! box, offset, tile list) plus one `{x}_{y}_{z}.dat` payload file per
//! occupied tile holding raw interleaved little-endian records of
//! `f32 x, f32 y, f32 z, f32 intensity` (positions offset-relative).

mod writer;
mod reader;

pub use writer::{PointDbWriter, convert_text_to_pointdb};
pub use reader::PointDb;

/// Integer 3D grid cell coordinates of a tile
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TilePos {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl TilePos {
    pub fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    /// Payload file name for this tile within the database directory
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.dat", self.x, self.y, self.z)
    }
}
