//! Fully-resident point cloud with progressive LOD drawing

use crate::core::types::{DVec3, Mat4, Vec3};
use crate::math::{Aabb, Frustum, Ray};
use crate::render::{DrawCount, DrawSink};
use super::Octree;

/// Camera distance below which a leaf draws all of its points at
/// quality 1
const DRAW_ALL_DIST: f64 = 100.0;

/// A point cloud held entirely in memory, spatially indexed for picking
/// and stochastic LOD drawing.
///
/// Positions are stored relative to a double-precision offset taken from
/// the first point; attribute arrays are permuted at build time so octree
/// leaf ranges slice them directly.
pub struct PointCloud {
    offset: DVec3,
    bounding_box: Aabb,
    position: Vec<Vec3>,
    intensity: Vec<f32>,
    octree: Octree,
}

impl PointCloud {
    pub fn from_points(points: &[DVec3], intensity: Vec<f32>) -> Self {
        assert_eq!(points.len(), intensity.len());
        let offset = points.first().copied().unwrap_or(DVec3::ZERO);
        let position: Vec<Vec3> = points.iter().map(|&p| (p - offset).as_vec3()).collect();
        let mut bounding_box = Aabb::empty();
        for &p in &position {
            bounding_box.expand(p);
        }

        // Cubic root cell keeps splits unbiased and the LOD distribution
        // even across the axes
        let diag = bounding_box.size();
        let root_radius = diag.x.max(diag.y).max(diag.z) / 2.0;
        let mut inds: Vec<usize> = (0..position.len()).collect();
        let octree = Octree::build(&position, &mut inds, bounding_box.center(), root_radius);

        // Reorder attributes once so node ranges index them directly
        let position = reorder(&position, &inds);
        let intensity = reorder(&intensity, &inds);
        log::debug!(
            "Built point octree: {} points, {} nodes",
            position.len(),
            octree.num_nodes()
        );
        Self {
            offset,
            bounding_box,
            position,
            intensity,
            octree,
        }
    }

    pub fn num_points(&self) -> usize {
        self.position.len()
    }

    pub fn offset(&self) -> DVec3 {
        self.offset
    }

    /// Bounding box relative to [`Self::offset`]
    pub fn bounding_box(&self) -> Aabb {
        self.bounding_box
    }

    /// Number of vertices the next draw at this quality would emit,
    /// without mutating any cursors.
    pub fn simplified_size(&self, camera_pos: DVec3, quality: f64, incremental: bool) -> usize {
        let rel_camera = (camera_pos - self.offset).as_vec3();
        self.octree
            .nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| {
                let chunk = desired_chunk(n.size(), n.bbox, rel_camera, quality);
                if incremental {
                    chunk.min(n.end - n.next_begin)
                } else {
                    chunk
                }
            })
            .sum()
    }

    /// Draw one frame into `sink`.
    ///
    /// Leaves draw a distance-scaled chunk of their shuffled range; since
    /// the ranges are shuffled this is a stochastic simplification of the
    /// cloud. Incremental frames advance each leaf's cursor instead of
    /// restarting, so repeated calls at fixed quality refine until
    /// nothing remains (`more_to_draw == false`). A non-incremental draw
    /// resets the cursors first.
    ///
    /// `view_proj`, when given, culls whole subtrees against the frustum.
    pub fn draw(
        &mut self,
        view_proj: Option<&Mat4>,
        camera_pos: DVec3,
        quality: f64,
        incremental: bool,
        sink: &mut dyn DrawSink,
    ) -> DrawCount {
        let frustum = view_proj.map(Frustum::from_view_projection);
        let rel_camera = (camera_pos - self.offset).as_vec3();
        let mut count = DrawCount::default();
        let mut stack = vec![self.octree.root];
        while let Some(id) = stack.pop() {
            let node = &self.octree.nodes[id];
            if let Some(frustum) = &frustum {
                if !frustum.intersects_aabb(&node.bbox) {
                    continue;
                }
            }
            if !node.is_leaf() {
                for child in node.children.iter().rev().flatten() {
                    stack.push(*child);
                }
                continue;
            }
            let chunk = desired_chunk(node.size(), node.bbox, rel_camera, quality);
            let node = &mut self.octree.nodes[id];
            if !incremental {
                node.next_begin = node.begin;
            }
            let ndraw = chunk.min(node.end - node.next_begin);
            if ndraw > 0 {
                let idx = node.next_begin;
                sink.draw_points(
                    &self.position[idx..idx + ndraw],
                    &self.intensity[idx..idx + ndraw],
                );
                node.next_begin += ndraw;
                count.num_vertices += ndraw as u64;
            }
            if node.next_begin < node.end {
                count.more_to_draw = true;
            }
        }
        count
    }

    /// Restart progressive refinement, e.g. after the camera moves.
    pub fn reset_draw(&mut self) {
        self.octree.reset_cursors();
    }

    /// Pick the point closest to a world-space ray under the anisotropic
    /// metric. Returns the world position and distance.
    pub fn pick_vertex(
        &self,
        ray_origin: DVec3,
        ray_direction: Vec3,
        longitudinal_scale: f32,
    ) -> Option<(DVec3, f32)> {
        let ray = Ray::new((ray_origin - self.offset).as_vec3(), ray_direction);
        self.octree
            .nearest_to_ray(&self.position, &ray, longitudinal_scale)
            .map(|(idx, dist)| (self.offset + self.position[idx].as_dvec3(), dist))
    }
}

/// Number of a leaf's points a frame wants, given its distance from the
/// camera: an inverse-square falloff hitting "all of them" at
/// `DRAW_ALL_DIST` for quality 1. The bucket's diagonal radius is
/// subtracted from the distance since the nearest point in the bucket is
/// what matters, not its center.
fn desired_chunk(size: usize, bbox: Aabb, rel_camera: Vec3, quality: f64) -> usize {
    let mut dist = (bbox.center() - rel_camera).length() as f64;
    let diag_radius = (bbox.size().length() / 2.0) as f64;
    dist = (dist - diag_radius).max(10.0);
    let desired_fraction = (quality * (DRAW_ALL_DIST / dist).powi(2)).min(1.0);
    (size as f64 * desired_fraction).ceil() as usize
}

/// Gather `data` into a new array ordered by `inds`.
fn reorder<T: Copy>(data: &[T], inds: &[usize]) -> Vec<T> {
    inds.iter().map(|&i| data[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::CountingSink;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_cloud(n: usize, seed: u64) -> PointCloud {
        let mut rng = StdRng::seed_from_u64(seed);
        let points: Vec<DVec3> = (0..n)
            .map(|_| {
                DVec3::new(
                    rng.random_range(0.0..200.0),
                    rng.random_range(0.0..200.0),
                    rng.random_range(0.0..20.0),
                )
            })
            .collect();
        let intensity: Vec<f32> = (0..n).map(|i| i as f32).collect();
        PointCloud::from_points(&points, intensity)
    }

    #[test]
    fn test_near_camera_draws_everything_in_one_frame() {
        let mut cloud = random_cloud(2000, 3);
        let camera = cloud.offset() + cloud.bounding_box().center().as_dvec3();
        let mut sink = CountingSink::default();
        let count = cloud.draw(None, camera, 1.0, false, &mut sink);
        assert_eq!(count.num_vertices, 2000);
        assert!(!count.more_to_draw);
    }

    #[test]
    fn test_incremental_draw_is_monotonic_and_converges() {
        let mut cloud = random_cloud(5000, 4);
        // Far camera so each frame draws only a fraction
        let camera = cloud.offset() + DVec3::new(100.0, 100.0, 5000.0);
        let mut total = 0u64;
        let mut prev_frame = u64::MAX;
        let mut frames = 0;
        loop {
            let mut sink = CountingSink::default();
            let count = cloud.draw(None, camera, 0.1, true, &mut sink);
            assert_eq!(sink.num_points, count.num_vertices);
            // Chunk size is fixed at fixed quality, so per-frame counts
            // never grow
            assert!(count.num_vertices <= prev_frame);
            if count.num_vertices > 0 {
                prev_frame = count.num_vertices;
            }
            total += count.num_vertices;
            frames += 1;
            assert!(frames < 10_000, "never converged");
            if !count.more_to_draw {
                break;
            }
        }
        // Every point drawn exactly once across the incremental frames
        assert_eq!(total, 5000);
        assert!(frames > 1, "expected more than one frame at low quality");
    }

    #[test]
    fn test_non_incremental_draw_resets_cursors() {
        let mut cloud = random_cloud(1000, 5);
        let camera = cloud.offset() + DVec3::new(100.0, 100.0, 10.0);
        let mut sink = CountingSink::default();
        let first = cloud.draw(None, camera, 1.0, false, &mut sink);
        let second = cloud.draw(None, camera, 1.0, false, &mut sink);
        assert_eq!(first.num_vertices, second.num_vertices);
    }

    #[test]
    fn test_simplified_size_predicts_draw() {
        let mut cloud = random_cloud(3000, 6);
        let camera = cloud.offset() + DVec3::new(0.0, 0.0, 2000.0);
        for quality in [0.05, 0.5, 1.0] {
            let predicted = cloud.simplified_size(camera, quality, false);
            let mut sink = CountingSink::default();
            let count = cloud.draw(None, camera, quality, false, &mut sink);
            assert_eq!(predicted as u64, count.num_vertices, "quality {}", quality);
        }
    }

    #[test]
    fn test_frustum_culling_skips_offscreen_points() {
        let mut cloud = random_cloud(2000, 8);
        let camera = cloud.offset() + DVec3::new(100.0, 100.0, 10_000.0);
        let eye = Vec3::new(100.0, 100.0, 10_000.0);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100_000.0);

        // Looking away from the cloud: everything culled
        let away = proj * Mat4::look_at_rh(eye, eye + Vec3::Z, Vec3::Y);
        let mut sink = CountingSink::default();
        let count = cloud.draw(Some(&away), camera, 1.0, false, &mut sink);
        assert_eq!(count.num_vertices, 0);

        // Turning around sees it
        let toward = proj * Mat4::look_at_rh(eye, Vec3::new(100.0, 100.0, 10.0), Vec3::Y);
        let mut sink = CountingSink::default();
        let count = cloud.draw(Some(&toward), camera, 1.0, false, &mut sink);
        assert!(count.num_vertices > 0);
    }

    #[test]
    fn test_pick_vertex_world_coordinates() {
        let points = vec![
            DVec3::new(1000.0, 1000.0, 50.0),
            DVec3::new(1010.0, 1000.0, 50.0),
            DVec3::new(1000.0, 1010.0, 50.0),
        ];
        let cloud = PointCloud::from_points(&points, vec![1.0, 2.0, 3.0]);
        let (picked, _dist) = cloud
            .pick_vertex(
                DVec3::new(1010.0, 1000.0, 100.0),
                Vec3::new(0.0, 0.0, -1.0),
                0.5,
            )
            .unwrap();
        assert!((picked - points[1]).length() < 1e-3);
    }
}
