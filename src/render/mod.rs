//! Render-side consumer contract
//!
//! Draw-call issuance lives outside this crate; drawing components hand
//! attribute slices to a [`DrawSink`] and report what they did through
//! [`DrawCount`].

use crate::core::types::Vec3;

/// Result of one frame's draw pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawCount {
    /// Number of vertices handed to the sink this frame
    pub num_vertices: u64,
    /// Whether another frame at the same quality would draw more
    pub more_to_draw: bool,
}

impl DrawCount {
    pub fn accumulate(&mut self, other: DrawCount) {
        self.num_vertices += other.num_vertices;
        self.more_to_draw |= other.more_to_draw;
    }
}

/// Receiver for the attribute arrays of each drawn node.
///
/// `lod_multiplier` scales voxel footprints so a coarse brick's voxels
/// cover the same screen area the finer geometry would have.
pub trait DrawSink {
    fn draw_voxels(
        &mut self,
        position: &[Vec3],
        coverage: &[f32],
        intensity: &[f32],
        lod_multiplier: f32,
    );

    fn draw_points(&mut self, position: &[Vec3], intensity: &[f32]);
}

/// Sink that only counts what it receives. Used in tests and for dry-run
/// draw cost estimates.
#[derive(Default, Debug)]
pub struct CountingSink {
    pub num_voxels: u64,
    pub num_points: u64,
    pub draw_calls: u64,
}

impl DrawSink for CountingSink {
    fn draw_voxels(
        &mut self,
        position: &[Vec3],
        coverage: &[f32],
        intensity: &[f32],
        _lod_multiplier: f32,
    ) {
        debug_assert_eq!(position.len(), coverage.len());
        debug_assert_eq!(position.len(), intensity.len());
        self.num_voxels += position.len() as u64;
        self.draw_calls += 1;
    }

    fn draw_points(&mut self, position: &[Vec3], intensity: &[f32]) {
        debug_assert_eq!(position.len(), intensity.len());
        self.num_points += position.len() as u64;
        self.draw_calls += 1;
    }
}
