//! Whole-cloud voxelization driver
//!
//! Walks the root bound in z-order chunks, queries each chunk's points
//! from the tile database, bins them into leaf cells, renders a brick per
//! occupied leaf and feeds the bricks to the octree builder in Morton
//! order. Traversing both chunks and leaves in z-order means the builder
//! only ever holds O(depth) full bricks.

use std::io::{Seek, Write};

use crate::core::progress::Progress;
use crate::core::types::{DVec3, Result, Vec3};
use crate::hcloud::HCloudHeader;
use crate::math::morton::morton_decode;
use crate::math::DAabb;
use crate::tiledb::PointDb;
use super::{OctreeBuilder, VoxelBrick};

/// Chunk sizing targets roughly this many points per tile DB query
const DESIRED_CHUNK_POINT_COUNT: f64 = 1_000_000.0;

/// Assumed area density for the chunk size estimate, points per square
/// unit of an essentially 2D scan
const ASSUMED_POINT_DENSITY: f64 = 50.0;

/// Voxelize `point_db` into a complete hcloud stream on `out`.
///
/// The octree covers the cube of width `root_node_width` with minimum
/// corner `origin`; leaves sit at a fixed depth `leaf_depth` and hold
/// `brick_res`³ voxels each.
pub fn voxelize_point_cloud<W: Write + Seek>(
    out: W,
    point_db: &mut PointDb,
    point_radius: f32,
    origin: DVec3,
    root_node_width: f64,
    leaf_depth: usize,
    brick_res: usize,
    progress: &mut dyn Progress,
) -> Result<HCloudHeader> {
    let tree_bound = DAabb::new(origin, origin + DVec3::splat(root_node_width));
    let leaf_node_width = root_node_width / (1u64 << leaf_depth) as f64;

    // Estimate chunk depth assuming an essentially 2D point distribution
    let expected_points = ASSUMED_POINT_DENSITY * root_node_width * root_node_width;
    let chunk_depth = ((expected_points / DESIRED_CHUNK_POINT_COUNT).ln() / 4f64.ln())
        .ceil()
        .max(0.0) as usize;
    let chunk_depth = chunk_depth.min(leaf_depth);
    log::info!("Depth of chunk root: {}", chunk_depth);
    log::info!(
        "Estimated points per chunk: {:.0}",
        expected_points / 4f64.powi(chunk_depth as i32)
    );

    let chunk_res = 1u64 << chunk_depth;
    let chunk_width = root_node_width / chunk_res as f64;
    let num_chunks = chunk_res * chunk_res * chunk_res;
    log::info!("Tree depth in chunk: {}", leaf_depth - chunk_depth);
    let chunk_leaf_res = 1u64 << (leaf_depth - chunk_depth);
    let leaves_per_chunk = chunk_leaf_res * chunk_leaf_res * chunk_leaf_res;

    let inv_leaf_node_width = (1.0 / leaf_node_width) as f32;
    let fractional_point_radius = point_radius / leaf_node_width as f32;

    let mut builder = OctreeBuilder::new(
        out,
        brick_res,
        leaf_depth,
        point_db.offset(),
        point_db.bounding_box(),
        tree_bound,
    )?;

    let mut position: Vec<f32> = Vec::new();
    let mut intensity: Vec<f32> = Vec::new();
    progress.begin("Render chunks");
    for chunk_idx in 0..num_chunks {
        progress.update(chunk_idx as f64 / (num_chunks as f64 - 1.0).max(1.0));
        let chunk_pos = morton_decode(chunk_idx);
        let chunk_min = origin + chunk_width * chunk_pos.as_dvec3();
        let chunk_bbox = DAabb::new(chunk_min, chunk_min + DVec3::splat(chunk_width));
        // Query with a buffer zone so splats from points just outside the
        // chunk still land in its rasters
        let buffered = DAabb::new(
            chunk_bbox.min - DVec3::splat(point_radius as f64),
            chunk_bbox.max + DVec3::splat(point_radius as f64),
        );
        // Chunk origin relative to the cloud offset, matching the frame
        // the query results come back in
        let rel_origin = (chunk_bbox.min - point_db.offset()).as_vec3();
        point_db.query(&buffered, &mut position, &mut intensity)?;
        let num_points = intensity.len();
        log::debug!("Chunk {:?} has {} points", chunk_pos, num_points);
        if num_points == 0 {
            continue;
        }

        // Bin point indices into the chunk's full leaf grid; the spilled
        // binning (point radius widened) feeds the rasterizer, the strict
        // binning becomes the leaf's raw point payload so each point is
        // stored exactly once.
        let n_leaves = leaves_per_chunk as usize;
        let res = chunk_leaf_res as i64;
        let mut leaf_indices: Vec<Vec<usize>> = vec![Vec::new(); n_leaves];
        let mut payload_indices: Vec<Vec<usize>> = vec![Vec::new(); n_leaves];
        let grid_idx =
            |x: i64, y: i64, z: i64| ((z * res + y) * res + x) as usize;
        for point_idx in 0..num_points {
            let x = inv_leaf_node_width * (position[3 * point_idx] - rel_origin.x);
            let y = inv_leaf_node_width * (position[3 * point_idx + 1] - rel_origin.y);
            let z = inv_leaf_node_width * (position[3 * point_idx + 2] - rel_origin.z);
            let clamp_cell = |v: f32| (v.floor() as i64).clamp(0, res);
            let (x0, x1) = (
                clamp_cell(x - fractional_point_radius),
                (((x + fractional_point_radius).ceil()) as i64).clamp(0, res),
            );
            let (y0, y1) = (
                clamp_cell(y - fractional_point_radius),
                (((y + fractional_point_radius).ceil()) as i64).clamp(0, res),
            );
            let (z0, z1) = (
                clamp_cell(z - fractional_point_radius),
                (((z + fractional_point_radius).ceil()) as i64).clamp(0, res),
            );
            for zi in z0..z1 {
                for yi in y0..y1 {
                    for xi in x0..x1 {
                        leaf_indices[grid_idx(xi, yi, zi)].push(point_idx);
                    }
                }
            }
            let (cx, cy, cz) = (x.floor() as i64, y.floor() as i64, z.floor() as i64);
            if (0..res).contains(&cx) && (0..res).contains(&cy) && (0..res).contains(&cz) {
                payload_indices[grid_idx(cx, cy, cz)].push(point_idx);
            }
        }

        // Render each occupied leaf into a brick, in z-order
        for i in 0..leaves_per_chunk {
            let leaf_pos = morton_decode(i);
            let cell = grid_idx(leaf_pos.x as i64, leaf_pos.y as i64, leaf_pos.z as i64);
            let inds = &leaf_indices[cell];
            if inds.is_empty() {
                continue;
            }
            let leaf_width = (chunk_width / chunk_leaf_res as f64) as f32;
            let leaf_min = rel_origin + leaf_width * leaf_pos.as_vec3();
            let mut brick = VoxelBrick::new(brick_res);
            brick.voxelize_points(
                leaf_min,
                leaf_width,
                point_radius,
                &position,
                &intensity,
                inds,
            );
            let mut leaf_position = Vec::with_capacity(3 * payload_indices[cell].len());
            let mut leaf_intensity = Vec::with_capacity(payload_indices[cell].len());
            for &pidx in &payload_indices[cell] {
                leaf_position.extend_from_slice(&position[3 * pidx..3 * pidx + 3]);
                leaf_intensity.push(intensity[pidx]);
            }
            let leaf_morton_index = chunk_idx * leaves_per_chunk + i;
            builder.add_leaf(leaf_morton_index, brick, &leaf_position, &leaf_intensity)?;
        }
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::NullProgress;
    use crate::tiledb::PointDbWriter;
    use std::io::Cursor;

    #[test]
    fn test_voxelize_small_cloud() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("db");
        let mut writer =
            PointDbWriter::create(&dir, DAabb::empty(), 100.0, 1000).unwrap();
        // A small grid of points on a plane
        let mut n = 0u64;
        for i in 0..20 {
            for j in 0..20 {
                writer
                    .write_point(
                        DVec3::new(i as f64 * 0.4 + 0.2, j as f64 * 0.4 + 0.2, 1.0),
                        1.0,
                    )
                    .unwrap();
                n += 1;
            }
        }
        writer.close().unwrap();
        let mut db = PointDb::open(&dir, 10 << 20).unwrap();

        let mut out = Cursor::new(Vec::new());
        let header = voxelize_point_cloud(
            &mut out,
            &mut db,
            0.1,
            DVec3::ZERO,
            16.0,
            2,
            4,
            &mut NullProgress,
        )
        .unwrap();
        assert_eq!(header.num_points, n);
        assert!(header.num_voxels > 0);
        assert_eq!(header.brick_size, 4);
        assert_eq!(
            header.tree_bounding_box,
            DAabb::new(DVec3::ZERO, DVec3::splat(16.0))
        );
    }
}
