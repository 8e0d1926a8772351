//! Stride downsampling

use crate::error::{Error, Result};
use ndarray::{s, Array4, ArrayView4, Axis};

/// Keep frames `offset, offset + factor, offset + 2 * factor, ...`
///
/// An offset at or past the last frame yields an empty series.
pub fn cartesian_downsample(hr: ArrayView4<'_, f32>, factor: usize, offset: usize) -> Result<Array4<f32>> {
    if factor < 1 {
        return Err(Error::invalid_input("Sampling factor should be >= 1"));
    }
    let frames = hr.len_of(Axis(0));
    let start = offset.min(frames);
    Ok(hr.slice(s![start..;factor, .., .., ..]).to_owned())
}
