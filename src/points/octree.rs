//! Arena octree over an externally owned point array

use std::collections::BinaryHeap;

use rand::seq::SliceRandom;

use crate::core::types::Vec3;
use crate::math::{closest_point_to_ray, Aabb, Ray};

/// Stop splitting below this population
const POINTS_PER_NODE: usize = 100_000;

/// Floats carry ~24 mantissa bits, so splitting more than this many times
/// cannot separate coincident points; this bounds recursion for degenerate
/// input.
const MAX_DEPTH: usize = 24;

pub(crate) type NodeId = usize;

pub(crate) struct OctreeNode {
    pub children: [Option<NodeId>; 8],
    /// Half-open range of this node's points in the permuted arrays
    pub begin: usize,
    pub end: usize,
    /// Progressive draw cursor within `[begin, end)`
    pub next_begin: usize,
    /// Tight bounding box of the points actually in the node
    pub bbox: Aabb,
    pub center: Vec3,
    pub radius: f32,
}

impl OctreeNode {
    pub fn size(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_leaf(&self) -> bool {
        self.begin != self.end
    }
}

/// Spatial partition of a point array into leaf index ranges.
///
/// Built once over an index permutation; after building, the caller
/// reorders its attribute arrays by the same permutation so node ranges
/// index them directly.
pub struct Octree {
    pub(crate) nodes: Vec<OctreeNode>,
    pub(crate) root: NodeId,
}

impl Octree {
    /// Partition `inds` in place into an octree over `positions`.
    ///
    /// `center` and `radius` give the cubic root cell. Leaf ranges are
    /// left randomly shuffled.
    pub fn build(positions: &[Vec3], inds: &mut [usize], center: Vec3, radius: f32) -> Self {
        Self::with_max_leaf_size(positions, inds, center, radius, POINTS_PER_NODE)
    }

    /// As [`build`](Self::build) with an explicit leaf capacity.
    pub fn with_max_leaf_size(
        positions: &[Vec3],
        inds: &mut [usize],
        center: Vec3,
        radius: f32,
        points_per_node: usize,
    ) -> Self {
        let mut nodes = Vec::new();
        let n = inds.len();
        let root = make_tree(
            &mut nodes,
            0,
            inds,
            0,
            n,
            positions,
            center,
            radius,
            points_per_node,
        );
        Self { nodes, root }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Reset every progressive cursor, restarting refinement from scratch.
    pub fn reset_cursors(&mut self) {
        for node in &mut self.nodes {
            node.next_begin = node.begin;
        }
    }

    /// Find the point nearest to `ray` under the anisotropic pick metric
    /// by branch-and-bound. Returns the index into the permuted arrays
    /// and the distance.
    ///
    /// A node is expanded only while its lower bound beats the best exact
    /// distance found so far; the bound is the metric distance to the
    /// node center minus the node's scaled half-diagonal, which can never
    /// exceed the true minimum over the node (the metric is Lipschitz
    /// with constant `max(1, longitudinal_scale)`).
    pub fn nearest_to_ray(
        &self,
        positions: &[Vec3],
        ray: &Ray,
        longitudinal_scale: f32,
    ) -> Option<(usize, f32)> {
        let s_max = longitudinal_scale.max(1.0);
        let lower_bound = |node: &OctreeNode| -> f32 {
            let half_diag = node.bbox.size().length() * 0.5;
            let center_dist = ray
                .distance_squared(node.bbox.center(), longitudinal_scale)
                .sqrt();
            (center_dist - s_max * half_diag).max(0.0)
        };
        let mut best: Option<(usize, f32)> = None;
        let mut queue = BinaryHeap::new();
        queue.push(QueueEntry {
            lower_bound: lower_bound(&self.nodes[self.root]),
            node: self.root,
        });
        while let Some(entry) = queue.pop() {
            if let Some((_, best_dist)) = best {
                // No unvisited node can contain anything closer
                if entry.lower_bound >= best_dist {
                    break;
                }
            }
            let node = &self.nodes[entry.node];
            if node.is_leaf() {
                let slice = &positions[node.begin..node.end];
                if let Some((i, dist)) = closest_point_to_ray(slice, ray, longitudinal_scale)
                {
                    if best.map_or(true, |(_, d)| dist < d) {
                        best = Some((node.begin + i, dist));
                    }
                }
            } else {
                for child in node.children.iter().flatten() {
                    queue.push(QueueEntry {
                        lower_bound: lower_bound(&self.nodes[*child]),
                        node: *child,
                    });
                }
            }
        }
        best
    }
}

/// Min-heap entry; ordering is reversed so BinaryHeap pops the smallest
/// lower bound first.
struct QueueEntry {
    lower_bound: f32,
    node: NodeId,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.lower_bound == other.lower_bound
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.lower_bound.total_cmp(&self.lower_bound)
    }
}

/// Octant of `p` relative to `center`: bit 0 = x, bit 1 = y, bit 2 = z
fn octant(p: Vec3, center: Vec3) -> usize {
    (p.x >= center.x) as usize
        + 2 * ((p.y >= center.y) as usize)
        + 4 * ((p.z >= center.z) as usize)
}

#[allow(clippy::too_many_arguments)]
fn make_tree(
    nodes: &mut Vec<OctreeNode>,
    depth: usize,
    inds: &mut [usize],
    begin: usize,
    end: usize,
    positions: &[Vec3],
    center: Vec3,
    radius: f32,
    points_per_node: usize,
) -> NodeId {
    let id = nodes.len();
    nodes.push(OctreeNode {
        children: [None; 8],
        begin: 0,
        end: 0,
        next_begin: 0,
        bbox: Aabb::empty(),
        center,
        radius,
    });
    if end - begin <= points_per_node || depth >= MAX_DEPTH {
        inds[begin..end].shuffle(&mut rand::rng());
        let mut bbox = Aabb::empty();
        for &i in &inds[begin..end] {
            bbox.expand(positions[i]);
        }
        let node = &mut nodes[id];
        node.begin = begin;
        node.end = end;
        node.next_begin = begin;
        node.bbox = bbox;
        return id;
    }
    // Partition this node's index range into the 8 octants
    let mut class_ends = [0usize; 8];
    crate::math::multi_partition(
        &mut inds[begin..end],
        |&i| octant(positions[i], center),
        &mut class_ends,
        8,
    );
    let r = radius / 2.0;
    let mut child_begin = begin;
    for (i, &class_end) in class_ends.iter().enumerate() {
        let child_end = begin + class_end;
        if child_end == child_begin {
            continue;
        }
        let c = center
            + Vec3::new(
                if i & 1 == 0 { -r } else { r },
                if i & 2 == 0 { -r } else { r },
                if i & 4 == 0 { -r } else { r },
            );
        let child = make_tree(
            nodes,
            depth + 1,
            inds,
            child_begin,
            child_end,
            positions,
            c,
            r,
            points_per_node,
        );
        let child_bbox = nodes[child].bbox;
        nodes[id].children[i] = Some(child);
        nodes[id].bbox.expand_box(&child_bbox);
        child_begin = child_end;
    }
    id
}
