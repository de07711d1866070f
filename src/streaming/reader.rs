//! Runtime reader for hcloud files
//!
//! Holds the full index tree in memory (it is small) and fetches node
//! payloads through the page cache as the camera demands them. A frame
//! never stalls on I/O: at most `FETCH_QUOTA` pages are read per draw
//! call, and a node whose children aren't cached yet is drawn itself as
//! the coarser stand-in.

use std::io::{Read, Seek, SeekFrom};

use crate::core::types::{DVec3, Result, Vec3};
use crate::core::Error;
use crate::hcloud::{codec, HCloudHeader, NODE_FLAG_LEAF, NODE_FLAG_POINTS};
use crate::math::{closest_point_to_ray, Aabb, Ray};
use crate::render::{DrawCount, DrawSink};
use super::StreamPageCache;

/// Pages fetched per draw call
const FETCH_QUOTA: usize = 10;

/// Angular size (bounding radius over camera distance) below which a node
/// is detailed enough to draw as-is, at quality 1
const BASE_ANGULAR_SIZE_LIMIT: f64 = 0.01;

const ROOT_PRIORITY: f64 = 1000.0;

type NodeId = usize;

struct Payload {
    position: Vec<Vec3>,
    coverage: Vec<f32>,
    intensity: Vec<f32>,
}

struct Node {
    flags: u8,
    bbox: Aabb,
    data_offset: u64,
    /// Occupied voxels for brick nodes, raw points for points nodes
    count: u32,
    children: [Option<NodeId>; 8],
    payload: Option<Payload>,
}

impl Node {
    fn is_cached(&self) -> bool {
        self.payload.is_some()
    }

    fn radius(&self) -> f32 {
        self.bbox.max.x - self.bbox.min.x
    }
}

/// Progressive reader over a serialized hierarchical point cloud.
///
/// All positions on this interface are relative to the header's global
/// offset; `pick_vertex` converts back to world coordinates on return.
pub struct HCloudReader<R: Read + Seek> {
    header: HCloudHeader,
    cache: StreamPageCache<R>,
    nodes: Vec<Node>,
    root: NodeId,
    bytes_cached: u64,
}

impl<R: Read + Seek> HCloudReader<R> {
    /// Read and validate the header and index tree. Payloads are not
    /// touched; they stream in over subsequent `draw` calls.
    pub fn open(mut input: R) -> Result<Self> {
        let header = HCloudHeader::read(&mut input)?;
        if header.num_voxels == 0 {
            return Err(Error::Format(
                "hierarchical point cloud contains no voxels".to_string(),
            ));
        }
        log::info!(
            "Opened hcloud: {} points, {} voxels, brick size {}",
            header.num_points,
            header.num_voxels,
            header.brick_size
        );
        let root_bbox = Aabb::new(
            (header.tree_bounding_box.min - header.offset).as_vec3(),
            (header.tree_bounding_box.max - header.offset).as_vec3(),
        );
        input.seek(SeekFrom::Start(header.index_offset))?;
        let mut nodes = Vec::new();
        let root = read_index(&mut input, root_bbox, &mut nodes)?;
        let cache = StreamPageCache::new(input)?;
        Ok(Self {
            header,
            cache,
            nodes,
            root,
            bytes_cached: 0,
        })
    }

    pub fn header(&self) -> &HCloudHeader {
        &self.header
    }

    /// Total payload bytes resident so far
    pub fn cached_bytes(&self) -> u64 {
        self.bytes_cached
    }

    /// Draw one frame's worth of nodes into `sink`.
    ///
    /// `camera_pos` is offset-relative. Nodes subtending less than the
    /// quality-scaled angular limit are drawn as voxel bricks; leaves that
    /// subtend more have their raw points drawn instead once fetched.
    /// `more_to_draw` reports whether any desired payload was still
    /// missing, so callers keep scheduling frames until it clears.
    pub fn draw(
        &mut self,
        camera_pos: Vec3,
        quality: f64,
        sink: &mut dyn DrawSink,
    ) -> Result<DrawCount> {
        let fetched_pages = self.cache.fetch_now(FETCH_QUOTA)?;
        let angular_size_limit = BASE_ANGULAR_SIZE_LIMIT / quality.min(1.0).max(1e-6);
        let mut count = DrawCount::default();
        let mut nodes_rendered = 0u64;

        if !self.nodes[self.root].is_cached()
            && !self.read_node_data(self.root, ROOT_PRIORITY)?
        {
            count.more_to_draw = true;
            return Ok(count);
        }
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let angular_size =
                self.nodes[id].radius() as f64
                    / (self.nodes[id].bbox.center() - camera_pos).length() as f64;
            let is_leaf = self.nodes[id].flags & NODE_FLAG_LEAF != 0;
            let mut draw_node = angular_size < angular_size_limit || is_leaf;
            if !draw_node {
                // Descend only if every child can be drawn; otherwise draw
                // this node as the coarser stand-in and try again next
                // frame.
                for slot in 0..8 {
                    let Some(child) = self.nodes[id].children[slot] else {
                        continue;
                    };
                    if !self.nodes[child].is_cached()
                        && !self.read_node_data(child, angular_size)?
                    {
                        draw_node = true;
                        count.more_to_draw = true;
                    }
                }
            }
            if draw_node {
                let mut drew_points = false;
                if is_leaf && angular_size >= angular_size_limit {
                    // The leaf brick is too coarse; upgrade to its raw
                    // point payload when available
                    if let Some(points) = self.nodes[id].children[0] {
                        debug_assert!(self.nodes[points].flags & NODE_FLAG_POINTS != 0);
                        if self.nodes[points].is_cached()
                            || self.read_node_data(points, angular_size)?
                        {
                            let payload = self.payload(points);
                            sink.draw_points(&payload.position, &payload.intensity);
                            count.num_vertices += payload.position.len() as u64;
                            drew_points = true;
                        } else {
                            count.more_to_draw = true;
                        }
                    }
                }
                if !drew_points {
                    let lod_multiplier =
                        0.5 * self.nodes[id].radius() / self.header.brick_size as f32;
                    let payload = self.payload(id);
                    sink.draw_voxels(
                        &payload.position,
                        &payload.coverage,
                        &payload.intensity,
                        lod_multiplier,
                    );
                    count.num_vertices += payload.position.len() as u64;
                }
                nodes_rendered += 1;
            } else {
                for slot in (0..8).rev() {
                    if let Some(child) = self.nodes[id].children[slot] {
                        stack.push(child);
                    }
                }
            }
        }
        log::debug!(
            "hcloud draw: {:.1} MB cached, {} nodes, {} fetched pages",
            self.bytes_cached as f64 / 1e6,
            nodes_rendered,
            fetched_pages
        );
        Ok(count)
    }

    /// Find the cached vertex closest to `ray` under the anisotropic pick
    /// metric. Ray and camera are offset-relative; the returned position
    /// is in world coordinates.
    pub fn pick_vertex(
        &self,
        camera_pos: Vec3,
        ray: &Ray,
        longitudinal_scale: f32,
    ) -> Option<(DVec3, f32)> {
        let mut best: Option<(Vec3, f32)> = None;
        let mut stack = Vec::new();
        if self.nodes[self.root].is_cached() {
            stack.push(self.root);
        }
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            let angular_size = node.radius() as f64
                / (node.bbox.center() - camera_pos).length() as f64;
            let is_leaf = node.flags & NODE_FLAG_LEAF != 0;
            let mut use_node = angular_size < BASE_ANGULAR_SIZE_LIMIT || is_leaf;
            if !use_node {
                // Only pick against children when the whole finer level is
                // resident, mirroring what draw() would have shown
                let children_cached = node.children.iter().flatten().all(|&c| {
                    self.nodes[c].is_cached()
                });
                if !children_cached {
                    use_node = true;
                }
            }
            if use_node {
                if let Some(payload) = &node.payload {
                    if let Some((idx, dist)) =
                        closest_point_to_ray(&payload.position, ray, longitudinal_scale)
                    {
                        if best.map_or(true, |(_, d)| dist < d) {
                            best = Some((payload.position[idx], dist));
                        }
                    }
                }
            } else {
                for child in node.children.iter().rev().flatten() {
                    stack.push(*child);
                }
            }
        }
        best.map(|(p, d)| (self.header.offset + p.as_dvec3(), d))
    }

    fn payload(&self, id: NodeId) -> &Payload {
        self.nodes[id]
            .payload
            .as_ref()
            .unwrap_or_else(|| unreachable!("payload read before fetch"))
    }

    /// Try to populate a node's payload from the page cache. On a miss
    /// the byte range is prefetched at `priority` and false is returned.
    fn read_node_data(&mut self, id: NodeId, priority: f64) -> Result<bool> {
        let (flags, offset, n) = {
            let node = &self.nodes[id];
            (node.flags, node.data_offset, node.count as u64)
        };
        let is_points = flags & NODE_FLAG_POINTS != 0;
        let total = if is_points { 16 * n } else { 20 * n };
        let mut payload = Payload {
            position: Vec::new(),
            coverage: Vec::new(),
            intensity: Vec::new(),
        };
        if total > 0 {
            let mut bytes = vec![0u8; total as usize];
            if !self.cache.read(&mut bytes, offset, total) {
                self.cache.prefetch(offset, total, priority)?;
                return Ok(false);
            }
            let floats = codec::decode_f32_slab(&bytes);
            let n = n as usize;
            payload.position = floats[..3 * n]
                .chunks_exact(3)
                .map(|c| Vec3::new(c[0], c[1], c[2]))
                .collect();
            if is_points {
                payload.intensity = floats[3 * n..4 * n].to_vec();
            } else {
                payload.coverage = floats[3 * n..4 * n].to_vec();
                payload.intensity = floats[4 * n..5 * n].to_vec();
            }
            self.bytes_cached += total;
        }
        self.nodes[id].payload = Some(payload);
        Ok(true)
    }
}

/// Parse one index node and, recursively, its children.
fn read_index<R: Read>(input: &mut R, bbox: Aabb, nodes: &mut Vec<Node>) -> Result<NodeId> {
    let flags = codec::read_u8(input)?;
    let data_offset = codec::read_u64(input)?;
    let count = codec::read_u32(input)?;
    let child_mask = codec::read_u8(input)?;
    let id = nodes.len();
    nodes.push(Node {
        flags,
        bbox,
        data_offset,
        count,
        children: [None; 8],
        payload: None,
    });
    let is_leaf = flags & NODE_FLAG_LEAF != 0;
    for slot in 0..8u8 {
        if child_mask >> slot & 1 == 0 {
            continue;
        }
        // A leaf brick's slot 0 holds its raw points node, which spans
        // the whole leaf cell rather than an octant of it
        let child_bbox = if is_leaf && slot == 0 {
            bbox
        } else {
            bbox.child_octant(slot)
        };
        let child = read_index(input, child_bbox, nodes)?;
        nodes[id].children[slot as usize] = Some(child);
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::NullProgress;
    use crate::math::DAabb;
    use crate::render::CountingSink;
    use crate::tiledb::{PointDb, PointDbWriter};
    use crate::voxel::voxelize_point_cloud;
    use std::io::Cursor;

    /// Build a small cloud end to end: points -> tile DB -> voxelizer ->
    /// hcloud bytes.
    fn build_hcloud(points: &[(DVec3, f32)]) -> (Vec<u8>, HCloudHeader) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("db");
        let mut writer = PointDbWriter::create(&dir, DAabb::empty(), 100.0, 10).unwrap();
        for &(p, i) in points {
            writer.write_point(p, i).unwrap();
        }
        writer.close().unwrap();
        let mut db = PointDb::open(&dir, 10 << 20).unwrap();
        let mut out = Cursor::new(Vec::new());
        // Radius comfortably above half a raster pixel (leaf width 4,
        // brick 4 gives 0.25 wide pixels) so grid-aligned points splat
        let header = voxelize_point_cloud(
            &mut out,
            &mut db,
            0.5,
            DVec3::ZERO,
            16.0,
            2,
            4,
            &mut NullProgress,
        )
        .unwrap();
        (out.into_inner(), header)
    }

    fn grid_points() -> Vec<(DVec3, f32)> {
        let mut points = Vec::new();
        for i in 0..16 {
            for j in 0..16 {
                points.push((
                    DVec3::new(i as f64 + 0.5, j as f64 + 0.5, 3.0),
                    (i + j) as f32,
                ));
            }
        }
        points
    }

    #[test]
    fn test_open_validates_totals() {
        let points = grid_points();
        let (bytes, header) = build_hcloud(&points);
        let reader = HCloudReader::open(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.header().num_points, points.len() as u64);
        assert_eq!(reader.header().num_voxels, header.num_voxels);
    }

    #[test]
    fn test_open_rejects_empty_cloud() {
        let (bytes, _) = build_hcloud(&[]);
        assert!(matches!(
            HCloudReader::open(Cursor::new(bytes)),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_draw_converges_from_far_camera() {
        let (bytes, header) = build_hcloud(&grid_points());
        let mut reader = HCloudReader::open(Cursor::new(bytes)).unwrap();
        // Far camera: the root alone subtends less than the angular limit
        let camera = Vec3::new(8.0, 8.0, 100_000.0);
        let mut sink = CountingSink::default();
        let mut frames = 0;
        loop {
            let count = reader.draw(camera, 1.0, &mut sink).unwrap();
            frames += 1;
            assert!(frames < 100, "draw never converged");
            if !count.more_to_draw {
                assert!(count.num_vertices > 0);
                break;
            }
        }
        // From this far away only the root brick is drawn
        assert!(sink.num_voxels <= header.num_voxels);
    }

    #[test]
    fn test_draw_converges_to_full_detail() {
        let points = grid_points();
        let (bytes, _) = build_hcloud(&points);
        let mut reader = HCloudReader::open(Cursor::new(bytes)).unwrap();
        // Close camera: everything refines down to raw leaf points
        let camera = Vec3::new(8.0, 8.0, 10.0);
        let mut last = DrawCount::default();
        for frame in 0.. {
            assert!(frame < 1000, "draw never converged");
            let mut sink = CountingSink::default();
            last = reader.draw(camera, 1.0, &mut sink).unwrap();
            if !last.more_to_draw {
                // All leaf points visible at full refinement
                assert_eq!(sink.num_points, points.len() as u64);
                break;
            }
        }
        assert!(!last.more_to_draw);
    }

    #[test]
    fn test_pick_vertex_finds_nearby_point() {
        let points = grid_points();
        let (bytes, _) = build_hcloud(&points);
        let mut reader = HCloudReader::open(Cursor::new(bytes)).unwrap();
        let camera = Vec3::new(8.0, 8.0, 10.0);
        let mut sink = CountingSink::default();
        while reader.draw(camera, 1.0, &mut sink).unwrap().more_to_draw {}
        // Ray straight down onto the point at (4.5, 4.5, 3.0)
        let offset = reader.header().offset;
        let target = DVec3::new(4.5, 4.5, 3.0);
        let ray = Ray::new(
            (target - offset).as_vec3() + Vec3::new(0.0, 0.0, 20.0),
            Vec3::new(0.0, 0.0, -1.0),
        );
        let (picked, _dist) = reader.pick_vertex(camera, &ray, 0.5).unwrap();
        assert!((picked - target).length() < 0.5, "picked {:?}", picked);
    }
}
