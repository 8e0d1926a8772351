//! Patch tiling and overlap reconstruction
//!
//! Large 3D frames are cut into fixed-size cubic patches for batched
//! inference and reassembled afterwards.
//!
//! ## Grid
//!
//! Along every axis of length `dim` the sampler places
//! `ceil((dim - overlap) / (patch_size - overlap))` patches whose origins step
//! by `patch_size - overlap`. The last patch is pulled back to
//! `dim - patch_size` so it stays inside the frame; it can therefore overlap
//! its neighbour by more than `overlap`.
//!
//! ```text
//! dim = 10, patch_size = 4, overlap = 1
//! origins: 0, 3, 6 -> last pulled back to 6 (already in bounds)
//! dim = 11, patch_size = 4, overlap = 1
//! origins: 0, 3, 6, 7 (9 pulled back to 7)
//! ```
//!
//! Patches are ordered with `x` outermost and `z` fastest. The stitcher walks
//! the same order, so a grid produced by [`VolumeSampler`] is all it needs to
//! put predictions back.

pub mod sampler;
pub mod stitcher;

use crate::error::{Error, Result};

pub use sampler::{PatchSet, VolumeSampler};
pub use stitcher::PatchStitcher;

/// Patch layout for one 3D frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchGrid {
    /// Patches along the first frame axis
    pub nr_x: usize,
    /// Patches along the second frame axis
    pub nr_y: usize,
    /// Patches along the third frame axis
    pub nr_z: usize,
    /// Edge length of the cubic patch
    pub patch_size: usize,
    /// Nominal overlap between neighbouring patches
    pub overlap: usize,
    shape: (usize, usize, usize),
}

impl PatchGrid {
    /// Compute the grid covering a frame of `shape`
    pub fn for_shape(shape: (usize, usize, usize), patch_size: usize, overlap: usize) -> Result<Self> {
        if patch_size == 0 {
            return Err(Error::invalid_input("Patch size must be >= 1"));
        }
        if overlap >= patch_size {
            return Err(Error::invalid_input(format!(
                "Overlap {} must be smaller than patch size {}",
                overlap, patch_size
            )));
        }
        let (d0, d1, d2) = shape;
        if d0 < patch_size || d1 < patch_size || d2 < patch_size {
            return Err(Error::invalid_input(format!(
                "Patch size {} exceeds frame shape {:?}",
                patch_size, shape
            )));
        }

        Ok(PatchGrid {
            nr_x: axis_count(d0, patch_size, overlap),
            nr_y: axis_count(d1, patch_size, overlap),
            nr_z: axis_count(d2, patch_size, overlap),
            patch_size,
            overlap,
            shape,
        })
    }

    /// Total number of patches per frame
    pub fn len(&self) -> usize {
        self.nr_x * self.nr_y * self.nr_z
    }

    /// Whether the grid holds no patches (never true for a valid grid)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape of the frame the grid was built for
    pub fn frame_shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    /// Linear patch index of grid coordinates
    pub fn index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        (ix * self.nr_y + iy) * self.nr_z + iz
    }

    /// Grid coordinates `(ix, iy, iz)` of a linear patch index
    pub fn coords(&self, index: usize) -> (usize, usize, usize) {
        let iz = index % self.nr_z;
        let iy = (index / self.nr_z) % self.nr_y;
        let ix = index / (self.nr_z * self.nr_y);
        (ix, iy, iz)
    }

    /// Voxel origin of the patch at `index` inside the frame
    pub fn origin(&self, index: usize) -> (usize, usize, usize) {
        let (ix, iy, iz) = self.coords(index);
        let step = self.patch_size - self.overlap;
        (
            axis_start(ix, step, self.shape.0, self.patch_size),
            axis_start(iy, step, self.shape.1, self.patch_size),
            axis_start(iz, step, self.shape.2, self.patch_size),
        )
    }
}

fn axis_count(dim: usize, patch_size: usize, overlap: usize) -> usize {
    (dim - overlap).div_ceil(patch_size - overlap)
}

fn axis_start(i: usize, step: usize, dim: usize, patch_size: usize) -> usize {
    (i * step).min(dim - patch_size)
}
