//! Fixed-resolution voxel brick

use crate::core::types::{UVec3, Vec3};
use crate::math::morton::morton_decode;

/// Supersampling factor of the ortho render raster, samples per voxel edge
const PIX_PER_VOXEL: usize = 4;

/// A res³ grid of voxels, each holding a scalar color (intensity), a
/// coverage fraction in [0, 1], and an averaged position.
///
/// The position channel stores the mean position of the raster samples
/// that survived the z-test rather than the voxel center. This greatly
/// reduces the terracing effect where level transitions cut through a
/// surface, since voxels get pulled back onto the surface they sample.
pub struct VoxelBrick {
    res: usize,
    color: Vec<f32>,
    coverage: Vec<f32>,
    position: Vec<Vec3>,
}

impl VoxelBrick {
    pub fn new(res: usize) -> Self {
        let n = res * res * res;
        Self {
            res,
            color: vec![0.0; n],
            coverage: vec![0.0; n],
            position: vec![Vec3::ZERO; n],
        }
    }

    /// Edge resolution of the brick
    pub fn resolution(&self) -> usize {
        self.res
    }

    pub fn num_voxels(&self) -> usize {
        self.res * self.res * self.res
    }

    /// Number of voxels with nonzero coverage
    pub fn num_occupied_voxels(&self) -> usize {
        self.coverage.iter().filter(|&&c| c > 0.0).count()
    }

    fn idx(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < self.res && y < self.res && z < self.res);
        x + self.res * (y + self.res * z)
    }

    pub fn coverage(&self, x: usize, y: usize, z: usize) -> f32 {
        self.coverage[self.idx(x, y, z)]
    }

    pub fn color(&self, x: usize, y: usize, z: usize) -> f32 {
        self.color[self.idx(x, y, z)]
    }

    pub fn position(&self, x: usize, y: usize, z: usize) -> Vec3 {
        self.position[self.idx(x, y, z)]
    }

    /// Visit every occupied voxel as (position, coverage, color)
    pub fn occupied(&self) -> impl Iterator<Item = (Vec3, f32, f32)> + '_ {
        self.coverage
            .iter()
            .enumerate()
            .filter(|(_, &c)| c > 0.0)
            .map(move |(i, &c)| (self.position[i], c, self.color[i]))
    }

    /// Render raw points into the brick's voxels.
    ///
    /// Candidate points (given by `indices` into the flat `position` /
    /// `intensity` arrays) are bucketed into z layers, each layer is
    /// rendered by z-buffered orthographic projection from +z onto a
    /// supersampled raster, and the surviving samples are averaged per
    /// voxel to produce color, position centroid and coverage.
    pub fn voxelize_points(
        &mut self,
        lower_corner: Vec3,
        brick_width: f32,
        point_radius: f32,
        position: &[f32],
        intensity: &[f32],
        indices: &[usize],
    ) {
        let res = self.res;
        let inv_voxel_width = res as f32 / brick_width;
        // Sort points into voxel layers by z
        let mut layer_inds: Vec<Vec<usize>> = vec![Vec::new(); res];
        for &pidx in indices {
            let pz = position[3 * pidx + 2];
            let layer = (inv_voxel_width * (pz - lower_corner.z)).floor() as i64;
            let layer = layer.clamp(0, res as i64 - 1) as usize;
            layer_inds[layer].push(pidx);
        }
        // For each layer, render at higher resolution, then average down
        // to get voxel values.
        let raster_width = res * PIX_PER_VOXEL;
        let mut raster = vec![0.0f32; raster_width * raster_width];
        let mut zbuf = vec![0.0f32; raster_width * raster_width];
        let pixel_size = brick_width / raster_width as f32;
        for z in 0..res {
            ortho_z_render(
                &mut raster,
                &mut zbuf,
                raster_width,
                lower_corner.x,
                lower_corner.y,
                pixel_size,
                position,
                intensity,
                point_radius,
                &layer_inds[z],
            );
            for y in 0..res {
                for x in 0..res {
                    let mut samp_count = 0u32;
                    let mut col_sum = 0.0f32;
                    let mut zsum = 0.0f32;
                    let mut xsum = 0.0f32;
                    let mut ysum = 0.0f32;
                    for j in 0..PIX_PER_VOXEL {
                        for i in 0..PIX_PER_VOXEL {
                            let idx =
                                x * PIX_PER_VOXEL + i + (y * PIX_PER_VOXEL + j) * raster_width;
                            if zbuf[idx] != f32::NEG_INFINITY {
                                col_sum += raster[idx];
                                zsum += zbuf[idx];
                                xsum += pixel_size * ((x * PIX_PER_VOXEL + i) as f32 + 0.5);
                                ysum += pixel_size * ((y * PIX_PER_VOXEL + j) as f32 + 0.5);
                                samp_count += 1;
                            }
                        }
                    }
                    let vidx = self.idx(x, y, z);
                    if samp_count != 0 {
                        let inv = 1.0 / samp_count as f32;
                        self.color[vidx] = col_sum * inv;
                        self.position[vidx] = Vec3::new(
                            xsum * inv + lower_corner.x,
                            ysum * inv + lower_corner.y,
                            zsum * inv,
                        );
                    }
                    self.coverage[vidx] =
                        samp_count as f32 / (PIX_PER_VOXEL * PIX_PER_VOXEL) as f32;
                }
            }
        }
    }

    /// Build this brick by 2×2×2 mip downsampling of up to eight child
    /// bricks, given in Morton slot order.
    ///
    /// Unusual compositing rule when merging the two z-adjacent samples:
    /// geometry in child bricks is assumed perfectly coherent and
    /// complementary, so opacities add (clamped), instead of the usual
    /// `(1-c1)*c0` rule for incoherent geometry. This is the correct rule
    /// for linear surfaces passing through the children; in the general
    /// case it overestimates opacity.
    pub fn render_from_bricks(&mut self, children: &[Option<&VoxelBrick>; 8]) {
        let res = self.res;
        let half = res / 2;
        for (child_idx, child) in children.iter().enumerate() {
            let Some(child) = child else { continue };
            assert_eq!(child.res, res);
            let child_pos = morton_decode(child_idx as u64);
            let off = UVec3::new(
                half as u32 * child_pos.x,
                half as u32 * child_pos.y,
                half as u32 * child_pos.z,
            );
            for z in (0..res).step_by(2) {
                for y in (0..res).step_by(2) {
                    for x in (0..res).step_by(2) {
                        let mut col_sum = 0.0f32;
                        let mut pos_sum = Vec3::ZERO;
                        let mut coverage_sum = 0.0f32;
                        for j in 0..2 {
                            for i in 0..2 {
                                let (x1, y1) = (x + i, y + j);
                                let c1 = child.coverage(x1, y1, z + 1);
                                let c0 = composite_z_pair(child.coverage(x1, y1, z), c1);
                                col_sum += c0 * child.color(x1, y1, z)
                                    + c1 * child.color(x1, y1, z + 1);
                                pos_sum += c0 * child.position(x1, y1, z)
                                    + c1 * child.position(x1, y1, z + 1);
                                coverage_sum += c0 + c1;
                            }
                        }
                        if coverage_sum != 0.0 {
                            let vidx = self.idx(
                                x / 2 + off.x as usize,
                                y / 2 + off.y as usize,
                                z / 2 + off.z as usize,
                            );
                            let w = 1.0 / coverage_sum;
                            self.color[vidx] = w * col_sum;
                            self.position[vidx] = w * pos_sum;
                            // Coverage is a special case: the average over
                            // the four child sample columns.
                            self.coverage[vidx] = coverage_sum / 4.0;
                        }
                    }
                }
            }
        }
    }
}

/// Composite the near z sample against the far one, assuming coherent
/// complementary geometry.
#[inline]
fn composite_z_pair(c0: f32, c1: f32) -> f32 {
    (1.0 - c1).min(c0)
}

/// Render points into `raster`, viewed orthographically from +z.
///
/// Each point splats as a square of the given radius; the depth buffer
/// keeps the topmost splat per sample. `zbuf` samples left at -inf were
/// never touched.
fn ortho_z_render(
    raster: &mut [f32],
    zbuf: &mut [f32],
    buf_width: usize,
    xoff: f32,
    yoff: f32,
    pixel_size: f32,
    position: &[f32],
    intensity: &[f32],
    radius: f32,
    point_indices: &[usize],
) {
    raster.fill(0.0);
    zbuf.fill(f32::NEG_INFINITY);
    let inv_pixel_size = 1.0 / pixel_size;
    let r_pix = radius / pixel_size;
    let clamp = |v: f32| (v.floor() as i64).clamp(0, buf_width as i64) as usize;
    for &pidx in point_indices {
        let x = inv_pixel_size * (position[3 * pidx] - xoff);
        let y = inv_pixel_size * (position[3 * pidx + 1] - yoff);
        let z = position[3 * pidx + 2];
        let x0 = clamp(x - r_pix + 0.5);
        let y0 = clamp(y - r_pix + 0.5);
        let x1 = clamp(x + r_pix + 0.5);
        let y1 = clamp(y + r_pix + 0.5);
        for yi in y0..y1 {
            for xi in x0..x1 {
                let i = xi + yi * buf_width;
                if z > zbuf[i] {
                    zbuf[i] = z;
                    raster[i] = intensity[pidx];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fill a brick so every voxel is fully covered with the given color,
    /// positions at voxel centers.
    fn full_brick(res: usize, color: f32) -> VoxelBrick {
        let mut b = VoxelBrick::new(res);
        let voxel_width = 1.0 / res as f32;
        for z in 0..res {
            for y in 0..res {
                for x in 0..res {
                    let i = b.idx(x, y, z);
                    b.coverage[i] = 1.0;
                    b.color[i] = color;
                    b.position[i] = voxel_width
                        * Vec3::new(x as f32 + 0.5, y as f32 + 0.5, z as f32 + 0.5);
                }
            }
        }
        b
    }

    #[test]
    fn test_voxelize_single_point() {
        let mut brick = VoxelBrick::new(4);
        // One fat point in the middle of voxel (1,2,3)
        let position = [0.375f32, 0.625, 0.875];
        let intensity = [7.0f32];
        brick.voxelize_points(Vec3::ZERO, 1.0, 0.05, &position, &intensity, &[0]);
        assert!(brick.coverage(1, 2, 3) > 0.0);
        assert_eq!(brick.color(1, 2, 3), 7.0);
        assert_eq!(brick.num_occupied_voxels(), 1);
        // Averaged position sits on the point's z and near its xy
        let p = brick.position(1, 2, 3);
        assert_eq!(p.z, 0.875);
        assert!((p.x - 0.375).abs() < 0.1 && (p.y - 0.625).abs() < 0.1);
    }

    #[test]
    fn test_grid_aligned_point_needs_half_pixel_radius() {
        // A point sitting exactly on a supersample boundary touches no
        // sample until its radius reaches half a pixel (1/32 here); below
        // that the splat rectangle is empty and the voxel stays vacant.
        let position = [0.5f32, 0.5, 0.5];
        let intensity = [1.0f32];
        let mut brick = VoxelBrick::new(4);
        brick.voxelize_points(Vec3::ZERO, 1.0, 0.03, &position, &intensity, &[0]);
        assert_eq!(brick.num_occupied_voxels(), 0);
        let mut brick = VoxelBrick::new(4);
        brick.voxelize_points(Vec3::ZERO, 1.0, 0.04, &position, &intensity, &[0]);
        assert!(brick.num_occupied_voxels() > 0);
    }

    #[test]
    fn test_voxelize_big_point_covers_voxel() {
        let mut brick = VoxelBrick::new(2);
        // Radius covering an entire voxel face
        let position = [0.25f32, 0.25, 0.25];
        let intensity = [1.0f32];
        brick.voxelize_points(Vec3::ZERO, 1.0, 0.25, &position, &intensity, &[0]);
        assert_eq!(brick.coverage(0, 0, 0), 1.0);
    }

    #[test]
    fn test_downsample_coverage_in_unit_range() {
        let children: Vec<VoxelBrick> = (0..8).map(|i| full_brick(4, i as f32)).collect();
        let refs: [Option<&VoxelBrick>; 8] = std::array::from_fn(|i| Some(&children[i]));
        let mut parent = VoxelBrick::new(4);
        parent.render_from_bricks(&refs);
        for &c in &parent.coverage {
            assert!((0.0..=1.0).contains(&c), "coverage {} out of range", c);
        }
    }

    #[test]
    fn test_downsample_full_coverage_is_full() {
        // All eight children fully covered: the parent must be fully
        // covered too, with no opacity lost at the seams.
        let children: Vec<VoxelBrick> = (0..8).map(|_| full_brick(4, 2.0)).collect();
        let refs: [Option<&VoxelBrick>; 8] = std::array::from_fn(|i| Some(&children[i]));
        let mut parent = VoxelBrick::new(4);
        parent.render_from_bricks(&refs);
        assert_eq!(parent.num_occupied_voxels(), parent.num_voxels());
        for &c in &parent.coverage {
            assert_eq!(c, 1.0);
        }
        for &col in &parent.color {
            assert_eq!(col, 2.0);
        }
    }

    #[test]
    fn test_downsample_missing_children_leave_gaps() {
        let child = full_brick(4, 1.0);
        let mut refs: [Option<&VoxelBrick>; 8] = [None; 8];
        refs[0] = Some(&child);
        let mut parent = VoxelBrick::new(4);
        parent.render_from_bricks(&refs);
        // Only the lower Morton octant of the parent is populated
        assert_eq!(parent.num_occupied_voxels(), 2 * 2 * 2);
        assert!(parent.coverage(0, 0, 0) > 0.0);
        assert_eq!(parent.coverage(3, 3, 3), 0.0);
    }

    #[test]
    fn test_composite_rule_complementary_surfaces() {
        // Two half-covered complementary layers composite to full opacity
        assert_eq!(composite_z_pair(0.5, 0.5), 0.5);
        // A fully opaque near layer hides the far one entirely
        assert_eq!(composite_z_pair(0.7, 1.0), 0.0);
        // Empty far layer leaves the near one untouched
        assert_eq!(composite_z_pair(0.3, 0.0), 0.3);
    }
}
