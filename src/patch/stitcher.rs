//! Patch stitcher (patch-up with overlap)
//!
//! Inverse of [`VolumeSampler`](super::VolumeSampler). Every voxel of the
//! output is the plain arithmetic mean of all patch values that cover it;
//! there is no distance weighting towards patch centres. Predictions may be
//! upsampled by an integer factor along the first (time) axis, in which case
//! patch origins and the output are scaled along that axis as well.

use super::PatchGrid;
use crate::error::{Error, Result};
use ndarray::{s, Array3, ArrayView4, Axis, Zip};

/// Reassembles a patch stack into a full 3D frame
#[derive(Debug, Clone, Copy)]
pub struct PatchStitcher {
    grid: PatchGrid,
    upsample: usize,
}

impl PatchStitcher {
    /// Create a stitcher for patches sampled with `grid`
    ///
    /// `upsample` is the integer factor the predictions were scaled by along
    /// their first axis (1 for identity).
    pub fn new(grid: PatchGrid, upsample: usize) -> Result<Self> {
        if upsample == 0 {
            return Err(Error::invalid_input("Upsampling factor must be >= 1"));
        }
        Ok(PatchStitcher { grid, upsample })
    }

    /// Shape of the stitched frame
    pub fn output_shape(&self) -> (usize, usize, usize) {
        let (d0, d1, d2) = self.grid.frame_shape();
        (d0 * self.upsample, d1, d2)
    }

    /// Shape every incoming patch must have
    pub fn patch_shape(&self) -> (usize, usize, usize) {
        let p = self.grid.patch_size;
        (p * self.upsample, p, p)
    }

    /// Merge `(n, P·up, P, P)` predicted patches into one frame
    pub fn stitch(&self, patches: ArrayView4<'_, f32>) -> Result<Array3<f32>> {
        let (n, p0, p1, p2) = patches.dim();
        if n != self.grid.len() {
            return Err(Error::shape_mismatch(
                format!(
                    "patch count for grid {}x{}x{}",
                    self.grid.nr_x, self.grid.nr_y, self.grid.nr_z
                ),
                &[self.grid.len()],
                &[n],
            ));
        }
        let (e0, e1, e2) = self.patch_shape();
        if (p0, p1, p2) != (e0, e1, e2) {
            return Err(Error::shape_mismatch("predicted patch", &[e0, e1, e2], &[p0, p1, p2]));
        }

        let mut sum = Array3::<f32>::zeros(self.output_shape());
        let mut count = Array3::<u32>::zeros(self.output_shape());

        for (index, patch) in patches.axis_iter(Axis(0)).enumerate() {
            let (a, b, c) = self.grid.origin(index);
            let a = a * self.upsample;

            let mut target = sum.slice_mut(s![a..a + p0, b..b + p1, c..c + p2]);
            target += &patch;
            count
                .slice_mut(s![a..a + p0, b..b + p1, c..c + p2])
                .mapv_inplace(|n| n + 1);
        }

        if let Some((position, _)) = count.indexed_iter().find(|(_, n)| **n == 0) {
            return Err(Error::invalid_input(format!(
                "Voxel {:?} is not covered by any patch",
                position
            )));
        }

        Zip::from(&mut sum)
            .and(&count)
            .for_each(|value, &n| *value /= n as f32);

        let expected = self.output_shape();
        if sum.dim() != expected {
            return Err(Error::shape_mismatch(
                "stitched frame",
                &[expected.0, expected.1, expected.2],
                sum.shape(),
            ));
        }

        Ok(sum)
    }
}
