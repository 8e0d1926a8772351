//! Symmetric windowed averaging with periodic wraparound

use crate::error::{Error, Result};
use ndarray::{Array4, ArrayView4, Axis};

/// Average each frame with its `radius / 2` neighbours on either side
///
/// Indices wrap around both ends of the series. The sum is always divided
/// by `radius`, even when the window covers fewer distinct frames (an even
/// radius sums `radius + 1` frames, a radius longer than the series visits
/// frames more than once).
pub fn temporal_averaging(hr: ArrayView4<'_, f32>, radius: usize) -> Result<Array4<f32>> {
    if radius < 1 {
        return Err(Error::invalid_input("Radius should be >= 1"));
    }
    let frames = hr.len_of(Axis(0));
    let mut out = Array4::<f32>::zeros(hr.raw_dim());
    if frames == 0 {
        return Ok(out);
    }

    let half = (radius / 2) as isize;
    let period = frames as isize;
    let scale = 1.0 / radius as f32;
    for (t, mut frame) in out.axis_iter_mut(Axis(0)).enumerate() {
        let t = t as isize;
        for i in (t - half)..=(t + half) {
            let source = i.rem_euclid(period) as usize;
            frame += &hr.index_axis(Axis(0), source);
        }
        frame.mapv_inplace(|x| x * scale);
    }
    Ok(out)
}
