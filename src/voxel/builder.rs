//! Streaming bottom-up octree builder
//!
//! Consumes leaf bricks strictly in Morton order of leaf cells. Each level
//! buffers at most eight pending siblings; when an incoming node's parent
//! differs from the buffered one, the pending set is downsampled into a
//! parent brick one level up. Payload bytes accumulate in per-level output
//! queues and are only assigned absolute stream offsets when a queue
//! flushes, so peak buffered memory stays bounded independent of tree
//! shape.

use std::io::{Seek, SeekFrom, Write};

use crate::core::types::{DVec3, Result};
use crate::hcloud::{codec, HCloudHeader, NODE_FLAG_LEAF, NODE_FLAG_POINTS};
use crate::math::DAabb;
use super::VoxelBrick;

/// Index into the builder's node arena
type NodeId = usize;

/// Queue flush threshold in bytes
const QUEUE_FLUSH_SIZE: usize = 10 * 1024 * 1024;

struct IndexNode {
    flags: u8,
    /// Byte offset of the node payload; relative to its queue's buffer
    /// until the queue flushes and patches it to an absolute offset
    data_offset: u64,
    /// Occupied voxel count for brick nodes, raw point count for points
    /// nodes
    num_points: u32,
    children: [Option<NodeId>; 8],
}

/// Serialized payloads awaiting a home in the output stream.
///
/// Nodes queued here carry queue-relative data offsets; `flush` writes the
/// buffer at the stream's current end and patches them to absolute.
#[derive(Default)]
struct NodeOutputQueue {
    buf: Vec<u8>,
    pending: Vec<NodeId>,
}

impl NodeOutputQueue {
    fn begin_payload(&mut self, id: NodeId) -> u64 {
        self.pending.push(id);
        self.buf.len() as u64
    }

    fn flush<W: Write>(
        &mut self,
        out: &mut W,
        nodes: &mut [IndexNode],
        file_pos: &mut u64,
    ) -> Result<()> {
        if self.buf.is_empty() && self.pending.is_empty() {
            return Ok(());
        }
        out.write_all(&self.buf)?;
        for &id in &self.pending {
            nodes[id].data_offset += *file_pos;
        }
        *file_pos += self.buf.len() as u64;
        self.buf.clear();
        self.pending.clear();
        Ok(())
    }
}

struct PendingChild {
    id: NodeId,
    brick: VoxelBrick,
}

/// Up to eight sibling nodes of one level awaiting their parent
#[derive(Default)]
struct LevelBuffer {
    parent_morton: Option<u64>,
    pending: [Option<PendingChild>; 8],
}

/// Writes a complete hcloud stream from Morton-ordered leaf bricks.
///
/// Physical layout is header | data | index; a placeholder header goes out
/// first and is rewritten by [`finish`](Self::finish) once the final
/// offsets and totals are known.
pub struct OctreeBuilder<W: Write + Seek> {
    out: W,
    header: HCloudHeader,
    leaf_depth: usize,
    nodes: Vec<IndexNode>,
    levels: Vec<LevelBuffer>,
    // One queue per tree level, plus a trailing queue for raw leaf point
    // payloads
    queues: Vec<NodeOutputQueue>,
    root: Option<NodeId>,
    file_pos: u64,
}

impl<W: Write + Seek> OctreeBuilder<W> {
    pub fn new(
        mut out: W,
        brick_res: usize,
        leaf_depth: usize,
        offset: DVec3,
        bounding_box: DAabb,
        tree_bounding_box: DAabb,
    ) -> Result<Self> {
        let mut header = HCloudHeader {
            offset,
            bounding_box,
            tree_bounding_box,
            brick_size: brick_res as u16,
            ..HCloudHeader::default()
        };
        header.write(&mut out)?;
        let file_pos = header.header_size as u64;
        header.data_offset = file_pos;
        Ok(Self {
            out,
            header,
            leaf_depth,
            nodes: Vec::new(),
            levels: (0..=leaf_depth).map(|_| LevelBuffer::default()).collect(),
            queues: (0..=leaf_depth + 1)
                .map(|_| NodeOutputQueue::default())
                .collect(),
            root: None,
            file_pos,
        })
    }

    /// Add the next leaf in Morton order, with the raw points that fall
    /// inside the leaf cell.
    ///
    /// `leaf_position` holds offset-relative xyz triples; the brick must
    /// have been rendered from the same coordinate frame.
    pub fn add_leaf(
        &mut self,
        morton_index: u64,
        brick: VoxelBrick,
        leaf_position: &[f32],
        leaf_intensity: &[f32],
    ) -> Result<()> {
        debug_assert_eq!(leaf_position.len(), 3 * leaf_intensity.len());
        let mut brick_node = IndexNode {
            flags: NODE_FLAG_LEAF,
            data_offset: 0,
            num_points: 0,
            children: [None; 8],
        };
        if !leaf_intensity.is_empty() {
            // Raw point payload rides in child slot 0 of its leaf brick
            let points_id = self.nodes.len();
            self.nodes.push(IndexNode {
                flags: NODE_FLAG_POINTS,
                data_offset: 0,
                num_points: leaf_intensity.len() as u32,
                children: [None; 8],
            });
            let queue = self
                .queues
                .last_mut()
                .unwrap_or_else(|| unreachable!("queues are non-empty"));
            let rel = queue.begin_payload(points_id);
            self.nodes[points_id].data_offset = rel;
            for &v in leaf_position {
                codec::write_f32(&mut queue.buf, v)?;
            }
            for &v in leaf_intensity {
                codec::write_f32(&mut queue.buf, v)?;
            }
            brick_node.children[0] = Some(points_id);
            self.header.num_points += leaf_intensity.len() as u64;
        }
        let brick_id = self.nodes.len();
        self.nodes.push(brick_node);
        self.serialize_brick(brick_id, &brick, self.leaf_depth)?;
        self.flush_full_queues()?;
        self.insert_node(self.leaf_depth, morton_index, brick, brick_id)
    }

    /// Serialize a brick's occupied voxels into its level's queue:
    /// positions, then coverage, then intensity.
    fn serialize_brick(&mut self, id: NodeId, brick: &VoxelBrick, level: usize) -> Result<()> {
        let queue = &mut self.queues[level];
        let rel = queue.begin_payload(id);
        for (p, _, _) in brick.occupied() {
            codec::write_f32(&mut queue.buf, p.x)?;
            codec::write_f32(&mut queue.buf, p.y)?;
            codec::write_f32(&mut queue.buf, p.z)?;
        }
        for (_, coverage, _) in brick.occupied() {
            codec::write_f32(&mut queue.buf, coverage)?;
        }
        for (_, _, intensity) in brick.occupied() {
            codec::write_f32(&mut queue.buf, intensity)?;
        }
        let occupied = brick.num_occupied_voxels() as u32;
        self.nodes[id].data_offset = rel;
        self.nodes[id].num_points = occupied;
        self.header.num_voxels += occupied as u64;
        Ok(())
    }

    fn flush_full_queues(&mut self) -> Result<()> {
        for queue in &mut self.queues {
            if queue.buf.len() >= QUEUE_FLUSH_SIZE {
                queue.flush(&mut self.out, &mut self.nodes, &mut self.file_pos)?;
            }
        }
        Ok(())
    }

    /// Buffer a finished node at its sibling slot, downsampling the
    /// previously pending siblings first if this node starts a new parent.
    fn insert_node(
        &mut self,
        level: usize,
        morton_index: u64,
        brick: VoxelBrick,
        id: NodeId,
    ) -> Result<()> {
        if level == 0 {
            debug_assert!(self.root.is_none(), "root node delivered twice");
            self.root = Some(id);
            return Ok(());
        }
        let parent = morton_index / 8;
        let slot = (morton_index % 8) as usize;
        if let Some(buffered_parent) = self.levels[level].parent_morton {
            if buffered_parent != parent {
                debug_assert!(
                    buffered_parent < parent,
                    "nodes must arrive in ascending Morton order"
                );
                self.downsample_level(level)?;
            }
        }
        let buffer = &mut self.levels[level];
        buffer.parent_morton = Some(parent);
        assert!(
            buffer.pending[slot].is_none(),
            "duplicate node in Morton sibling slot {}",
            slot
        );
        buffer.pending[slot] = Some(PendingChild { id, brick });
        Ok(())
    }

    /// Downsample the pending siblings of `level` into their parent brick
    /// and push the parent one level up.
    fn downsample_level(&mut self, level: usize) -> Result<()> {
        let buffer = std::mem::take(&mut self.levels[level]);
        let parent_morton = buffer
            .parent_morton
            .unwrap_or_else(|| unreachable!("downsample of an empty level"));
        let brick_res = self.header.brick_size as usize;
        let mut parent_brick = VoxelBrick::new(brick_res);
        let child_bricks: [Option<&VoxelBrick>; 8] =
            std::array::from_fn(|i| buffer.pending[i].as_ref().map(|c| &c.brick));
        parent_brick.render_from_bricks(&child_bricks);

        let mut children = [None; 8];
        for (i, child) in buffer.pending.iter().enumerate() {
            children[i] = child.as_ref().map(|c| c.id);
        }
        let parent_id = self.nodes.len();
        self.nodes.push(IndexNode {
            flags: 0,
            data_offset: 0,
            num_points: 0,
            children,
        });
        self.serialize_brick(parent_id, &parent_brick, level - 1)?;
        self.flush_full_queues()?;
        self.insert_node(level - 1, parent_morton, parent_brick, parent_id)
    }

    /// Flush remaining levels and queues, write the index, and rewrite
    /// the header with the final totals and offsets.
    pub fn finish(mut self) -> Result<HCloudHeader> {
        for level in (1..=self.leaf_depth).rev() {
            if self.levels[level].parent_morton.is_some() {
                self.downsample_level(level)?;
            }
        }
        // Flush queues root-first so coarse levels land early in the file
        for i in 0..self.queues.len() {
            self.queues[i].flush(&mut self.out, &mut self.nodes, &mut self.file_pos)?;
        }
        self.header.index_offset = self.file_pos;
        if let Some(root) = self.root {
            // Pre-order traversal; children pushed in reverse so they land
            // on disk in ascending slot order
            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                let node = &self.nodes[id];
                let mut child_mask = 0u8;
                for (i, child) in node.children.iter().enumerate() {
                    if child.is_some() {
                        child_mask |= 1 << i;
                    }
                }
                codec::write_u8(&mut self.out, node.flags)?;
                codec::write_u64(&mut self.out, node.data_offset)?;
                codec::write_u32(&mut self.out, node.num_points)?;
                codec::write_u8(&mut self.out, child_mask)?;
                for child in node.children.iter().rev().flatten() {
                    stack.push(*child);
                }
            }
        }
        self.out.seek(SeekFrom::Start(0))?;
        self.header.write(&mut self.out)?;
        self.out.flush()?;
        log::info!(
            "Wrote hcloud: {} points, {} voxels, {} index nodes",
            self.header.num_points,
            self.header.num_voxels,
            self.nodes.len()
        );
        Ok(self.header)
    }
}
