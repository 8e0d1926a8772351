//! Volume sampler (patchify)

use super::PatchGrid;
use crate::error::{Error, Result};
use crate::model::PatchBatch;
use crate::volume::FlowFrame;
use ndarray::{s, Array4, ArrayView3, ArrayView4, Axis};
use tracing::debug;

/// Default patch edge length
pub const DEFAULT_PATCH_SIZE: usize = 14;

/// Default overlap between neighbouring patches
pub const DEFAULT_PATCH_OVERLAP: usize = 4;

/// Cuts 3D frames into overlapping cubic patches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeSampler {
    patch_size: usize,
    overlap: usize,
}

impl Default for VolumeSampler {
    fn default() -> Self {
        VolumeSampler {
            patch_size: DEFAULT_PATCH_SIZE,
            overlap: DEFAULT_PATCH_OVERLAP,
        }
    }
}

impl VolumeSampler {
    /// Create a sampler, validating the patch geometry
    pub fn new(patch_size: usize, overlap: usize) -> Result<Self> {
        if patch_size == 0 {
            return Err(Error::invalid_input("Patch size must be >= 1"));
        }
        if overlap >= patch_size {
            return Err(Error::invalid_input(format!(
                "Overlap {} must be smaller than patch size {}",
                overlap, patch_size
            )));
        }
        Ok(VolumeSampler {
            patch_size,
            overlap,
        })
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Grid this sampler lays over a frame of `shape`
    pub fn grid(&self, shape: (usize, usize, usize)) -> Result<PatchGrid> {
        PatchGrid::for_shape(shape, self.patch_size, self.overlap)
    }

    /// Cut a single channel into a `(n, P, P, P)` patch stack
    pub fn patchify_channel(&self, volume: ArrayView3<'_, f32>) -> Result<(Array4<f32>, PatchGrid)> {
        let grid = self.grid(volume.dim())?;
        Ok((extract(&grid, volume), grid))
    }

    /// Cut all six channels of a frame into parallel patch stacks
    pub fn patchify(&self, frame: &FlowFrame) -> Result<PatchSet> {
        let grid = self.grid(frame.shape())?;

        let velocity = frame.velocity().each_ref().map(|c| extract(&grid, c.view()));
        let magnitude = frame.magnitude().each_ref().map(|c| extract(&grid, c.view()));

        debug!(
            "Patchified frame {:?} into {} patches ({}x{}x{})",
            frame.shape(),
            grid.len(),
            grid.nr_x,
            grid.nr_y,
            grid.nr_z
        );

        Ok(PatchSet {
            velocity,
            magnitude,
            grid,
        })
    }
}

fn extract(grid: &PatchGrid, volume: ArrayView3<'_, f32>) -> Array4<f32> {
    let p = grid.patch_size;
    let mut patches = Array4::zeros((grid.len(), p, p, p));
    for (index, mut patch) in patches.axis_iter_mut(Axis(0)).enumerate() {
        let (a, b, c) = grid.origin(index);
        patch.assign(&volume.slice(s![a..a + p, b..b + p, c..c + p]));
    }
    patches
}

/// Six parallel patch stacks of one frame, plus the grid that produced them
#[derive(Debug, Clone)]
pub struct PatchSet {
    /// Velocity patches (u, v, w), each `(n, P, P, P)`
    pub velocity: [Array4<f32>; 3],
    /// Magnitude patches (mag_u, mag_v, mag_w), each `(n, P, P, P)`
    pub magnitude: [Array4<f32>; 3],
    /// Grid used for sampling
    pub grid: PatchGrid,
}

impl PatchSet {
    /// Number of patches in every stack
    pub fn len(&self) -> usize {
        self.velocity[0].len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow patches `start..end` (clamped to the stack length) as a model batch
    pub fn batch(&self, start: usize, end: usize) -> PatchBatch<'_> {
        let end = end.min(self.len());
        let start = start.min(end);
        PatchBatch {
            velocity: self.velocity.each_ref().map(|a| rows(a, start, end)),
            magnitude: self.magnitude.each_ref().map(|a| rows(a, start, end)),
        }
    }
}

fn rows(stack: &Array4<f32>, start: usize, end: usize) -> ArrayView4<'_, f32> {
    stack.slice(s![start..end, .., .., ..])
}
