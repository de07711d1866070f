//! Mathematical utilities and data structures

pub mod aabb;
pub mod morton;
pub mod frustum;
pub mod ray;
pub mod partition;

pub use aabb::{Aabb, DAabb};
pub use frustum::{Plane, Frustum};
pub use ray::{Ray, closest_point_to_ray};
pub use partition::multi_partition;
