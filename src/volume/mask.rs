//! Fluid-region masks
//!
//! Masks come either static (`(x, y, z)`) or time-varying (`(t, x, y, z)`).
//! A static mask is broadcast to every frame by copying, so each frame of the
//! resulting temporal mask is an independent buffer.

use crate::error::{Error, Result};
use ndarray::{Array3, Array4, ArrayD, Axis, Ix3, Ix4};

/// Repeat a static 3D mask across `n_frames` frames
pub fn temporal_mask(mask: &Array3<f32>, n_frames: usize) -> Array4<f32> {
    let (x, y, z) = mask.dim();
    let mut out = Array4::zeros((n_frames, x, y, z));
    for mut frame in out.axis_iter_mut(Axis(0)) {
        frame.assign(mask);
    }
    out
}

/// A mask that is either static or already time-resolved
#[derive(Debug, Clone, PartialEq)]
pub enum TemporalMask {
    Static(Array3<f32>),
    Temporal(Array4<f32>),
}

impl TemporalMask {
    /// Classify a dynamic-rank mask
    ///
    /// Leading singleton axes are squeezed first, so a `(1, x, y, z)` mask is
    /// treated as static and broadcast like one.
    pub fn from_dyn(mask: ArrayD<f32>) -> Result<Self> {
        let mut mask = mask;
        while mask.ndim() > 3 && mask.shape()[0] == 1 {
            mask = mask.index_axis_move(Axis(0), 0);
        }

        match mask.ndim() {
            3 => Ok(TemporalMask::Static(
                mask.into_dimensionality::<Ix3>()
                    .map_err(|e| Error::invalid_input(e.to_string()))?,
            )),
            4 => Ok(TemporalMask::Temporal(
                mask.into_dimensionality::<Ix4>()
                    .map_err(|e| Error::invalid_input(e.to_string()))?,
            )),
            n => Err(Error::invalid_input(format!(
                "Mask must be 3D or 4D, got {} dimensions",
                n
            ))),
        }
    }

    /// Expand to `(n_frames, x, y, z)`, validating the frame count of temporal masks
    pub fn expand(&self, n_frames: usize) -> Result<Array4<f32>> {
        match self {
            TemporalMask::Static(mask) => Ok(temporal_mask(mask, n_frames)),
            TemporalMask::Temporal(mask) => {
                if mask.len_of(Axis(0)) != n_frames {
                    return Err(Error::shape_mismatch(
                        "temporal mask frames",
                        &[n_frames],
                        &[mask.len_of(Axis(0))],
                    ));
                }
                Ok(mask.clone())
            }
        }
    }
}
