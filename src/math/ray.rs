//! Ray utilities for point picking
//!
//! Picking a point under the mouse cursor uses an anisotropic distance to
//! the pick ray: the longitudinal component (along the ray) is scaled down
//! relative to the perpendicular one, so that of several points under the
//! cursor the nearest to the viewer wins.

use crate::core::types::Vec3;

/// A ray with origin and normalized direction
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    /// Squared anisotropic distance from the ray to a point.
    ///
    /// `longitudinal_scale` weights displacement along the ray direction;
    /// values below 1 favor points closer to the origin among points at
    /// similar perpendicular distance.
    pub fn distance_squared(&self, point: Vec3, longitudinal_scale: f32) -> f32 {
        let v = self.origin - point;
        let dist_n = self.direction.dot(v);
        let dist_perp2 = (v - dist_n * self.direction).length_squared();
        let f = longitudinal_scale * longitudinal_scale;
        f * dist_n * dist_n + dist_perp2
    }
}

/// Find the point in `points` closest to `ray` under the anisotropic
/// metric. Returns the index and the distance, or None for an empty slice.
pub fn closest_point_to_ray(
    points: &[Vec3],
    ray: &Ray,
    longitudinal_scale: f32,
) -> Option<(usize, f32)> {
    let mut nearest = None;
    let mut nearest_dist2 = f32::INFINITY;
    for (i, &p) in points.iter().enumerate() {
        let d2 = ray.distance_squared(p, longitudinal_scale);
        if d2 < nearest_dist2 {
            nearest_dist2 = d2;
            nearest = Some(i);
        }
    }
    nearest.map(|i| (i, nearest_dist2.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anisotropic_distance() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        // Purely perpendicular offset
        let d2 = ray.distance_squared(Vec3::new(0.0, 2.0, 0.0), 1.0);
        assert!((d2 - 4.0).abs() < 1e-6);
        // At unit scale the longitudinal term counts in full:
        // 5^2 + 2^2
        let d2 = ray.distance_squared(Vec3::new(5.0, 2.0, 0.0), 1.0);
        assert!((d2 - 29.0).abs() < 1e-5);
        // Scale 0.5 quarters the longitudinal contribution
        let d2 = ray.distance_squared(Vec3::new(5.0, 2.0, 0.0), 0.5);
        assert!((d2 - 10.25).abs() < 1e-5);
    }

    #[test]
    fn test_longitudinal_scale_prefers_near() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        // Same perpendicular offset, different depth along the ray
        let near = Vec3::new(1.0, 0.5, 0.0);
        let far = Vec3::new(100.0, 0.5, 0.0);
        let scale = 0.3;
        assert!(ray.distance_squared(near, scale) < ray.distance_squared(far, scale));
    }

    #[test]
    fn test_closest_point() {
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let points = [
            Vec3::new(3.0, 0.0, 1.0),
            Vec3::new(0.1, 0.0, 5.0),
            Vec3::new(2.0, 2.0, 2.0),
        ];
        let (idx, _) = closest_point_to_ray(&points, &ray, 0.5).unwrap();
        assert_eq!(idx, 1);
        assert!(closest_point_to_ray(&[], &ray, 0.5).is_none());
    }
}
