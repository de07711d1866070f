//! hcloud - hierarchical point cloud storage and LOD engine
//!
//! Converts massive unordered point clouds into an on-disk octree of
//! fixed-resolution voxel bricks (the "hcloud" format) which can be re-read
//! progressively, plus an in-memory octree for fully resident point sets.

pub mod core;
pub mod math;
pub mod hcloud;
pub mod tiledb;
pub mod voxel;
pub mod streaming;
pub mod points;
pub mod render;
