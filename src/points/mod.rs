//! Fully-resident point clouds
//!
//! For clouds that fit in memory, an octree over an in-place permuted
//! index array supports nearest-point picking, frustum culling and
//! progressive quality-budgeted drawing. Leaf index ranges are shuffled
//! once at build time so any prefix of a leaf is an unbiased sample of
//! it, which turns cursor advancement into stochastic simplification.

mod octree;
mod cloud;

pub use octree::Octree;
pub use cloud::PointCloud;
