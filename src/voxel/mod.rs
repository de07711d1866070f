//! Voxel bricks and the streaming bottom-up octree builder
//!
//! A brick is a fixed-resolution raster summarizing the points inside one
//! octree node. Leaf bricks are rendered directly from raw points; internal
//! bricks are downsampled from their children. The builder consumes leaf
//! bricks in Morton order and serializes the finished tree to the hcloud
//! binary format.

mod brick;
mod builder;
mod voxelize;

pub use brick::VoxelBrick;
pub use builder::OctreeBuilder;
pub use voxelize::voxelize_point_cloud;
