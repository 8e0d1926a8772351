//! Periodic soft box-kernel smoothing
//!
//! Each output frame is a weighted sum of all input frames. Weights come
//! from a smoothed rectangular window one sample wide,
//!
//! ```text
//! k(t) = L(t - (t0 - dt/2)) - L(t - (t0 + dt/2)),   L(x) = 1 / (1 + e^(-x / sigma))
//! ```
//!
//! evaluated over the time grid extended by a quarter cycle on each side.
//! The weights are normalised to a discrete sum of one and the extension
//! weights are folded back onto the opposite end of the cycle:
//!
//! ```text
//!  left ext   |        t_range         |  right ext
//!  L0 .. Ln-1 | 0 1 2 ............ T-1 | R0 .. Rn-1
//!       \____________________________/\_____/
//!   Lj -> T - n + j                      Rj -> j
//! ```

use crate::error::{Error, Result};
use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView4, Axis};
use rayon::prelude::*;
use tracing::debug;

/// Weight sums below this fall back to a unit impulse at `t0`
const WEIGHT_EPSILON: f64 = 1e-12;

/// Relative tolerance for the uniform time grid check
const GRID_TOLERANCE: f64 = 1e-6;

/// Quarter-cycle extension of a uniform time grid
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicExtension {
    times: Vec<f64>,
    dt: f64,
    /// Samples added on each side after length reconciliation
    n_ext: usize,
}

impl PeriodicExtension {
    /// Build the extension for a uniform, strictly increasing `t_range`
    pub fn new(t_range: &[f64]) -> Result<Self> {
        if t_range.len() < 2 {
            return Err(Error::invalid_input("Time range needs at least 2 samples"));
        }
        let dt = t_range[1] - t_range[0];
        if !(dt.is_finite() && dt > 0.0) {
            return Err(Error::invalid_input("Time range must be strictly increasing"));
        }
        for pair in t_range.windows(2) {
            let step = pair[1] - pair[0];
            if (step - dt).abs() > GRID_TOLERANCE * dt.abs().max(1.0) {
                return Err(Error::invalid_input(format!(
                    "Time range must be uniform: step {} differs from {}",
                    step, dt
                )));
            }
        }

        let start = t_range[0];
        let end = t_range[t_range.len() - 1];
        let quarter = (end - start) / 4.0;

        // Samples strictly inside (start - quarter, start), excluding start itself
        let left = ((quarter / dt).ceil() as usize).saturating_sub(1);
        // Samples in [end + dt, end + quarter)
        let right_span = (end + quarter) - (end + dt);
        let right = if right_span > 0.0 {
            (right_span / dt).ceil() as usize
        } else {
            0
        };
        // Reconcile by dropping the outermost samples of the longer side
        let n_ext = left.min(right);

        Ok(PeriodicExtension {
            times: t_range.to_vec(),
            dt,
            n_ext,
        })
    }

    /// Number of samples in the cycle
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Sample spacing
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Samples added on each side
    pub fn extension_len(&self) -> usize {
        self.n_ext
    }

    /// Full extended grid: left extension, the cycle, right extension
    pub fn extended_times(&self) -> Vec<f64> {
        let start = self.times[0];
        let end = self.times[self.times.len() - 1];
        let n = self.n_ext;

        let mut out = Vec::with_capacity(self.times.len() + 2 * n);
        out.extend((1..=n).rev().map(|k| start - k as f64 * self.dt));
        out.extend_from_slice(&self.times);
        out.extend((1..=n).map(|k| end + k as f64 * self.dt));
        out
    }

    /// Fold weights over the extended grid back onto the cycle
    pub fn fold(&self, extended: &[f64]) -> Result<Vec<f64>> {
        let t = self.times.len();
        let n = self.n_ext;
        if extended.len() != t + 2 * n {
            return Err(Error::shape_mismatch(
                "extended weights",
                &[t + 2 * n],
                &[extended.len()],
            ));
        }

        let mut periodic = extended[n..n + t].to_vec();
        for j in 0..n {
            // right extension sample j is one cycle after index j
            periodic[j] += extended[n + t + j];
            // left extension sample j is one cycle before index t - n + j
            periodic[t - n + j] += extended[j];
        }
        Ok(periodic)
    }
}

fn logistic(x: f64, sigma: f64) -> f64 {
    1.0 / (1.0 + (-x / sigma).exp())
}

fn soft_box(t: f64, t0: f64, width: f64, sigma: f64) -> f64 {
    logistic(t - (t0 - width / 2.0), sigma) - logistic(t - (t0 + width / 2.0), sigma)
}

fn kernel_weights(extension: &PeriodicExtension, extended: &[f64], t0_index: usize, sigma: f64) -> Result<Vec<f64>> {
    let t0 = extension.times[t0_index];
    let mut weights: Vec<f64> = extended
        .iter()
        .map(|&t| soft_box(t, t0, extension.dt, sigma))
        .collect();

    let sum: f64 = weights.iter().sum();
    if sum.is_finite() && sum > WEIGHT_EPSILON {
        weights.iter_mut().for_each(|w| *w /= sum);
    } else {
        weights.iter_mut().for_each(|w| *w = 0.0);
        weights[extension.n_ext + t0_index] = 1.0;
    }
    extension.fold(&weights)
}

/// Periodic weight vector for output frame `t0_index`
///
/// The returned weights have one entry per sample of `t_range` and sum
/// to one.
pub fn periodic_box_weights(t_range: &[f64], t0_index: usize, sigma: f64) -> Result<Vec<f64>> {
    check_sigma(sigma)?;
    let extension = PeriodicExtension::new(t_range)?;
    if t0_index >= extension.len() {
        return Err(Error::invalid_input(format!(
            "Frame index {} out of range for {} samples",
            t0_index,
            extension.len()
        )));
    }
    kernel_weights(&extension, &extension.extended_times(), t0_index, sigma)
}

fn check_sigma(sigma: f64) -> Result<()> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(Error::invalid_input(format!("Sigma must be positive, got {}", sigma)));
    }
    Ok(())
}

/// Smooth a periodic series with the soft box kernel
///
/// `t_range` holds the acquisition time of every frame of `hr`.
pub fn box_smoothing(hr: ArrayView4<'_, f32>, t_range: &[f64], sigma: f64) -> Result<Array4<f32>> {
    check_sigma(sigma)?;
    let frames = hr.len_of(Axis(0));
    if t_range.len() != frames {
        return Err(Error::shape_mismatch("time range", &[frames], &[t_range.len()]));
    }
    let extension = PeriodicExtension::new(t_range)?;
    let extended = extension.extended_times();

    let weights = (0..frames)
        .into_par_iter()
        .map(|i| kernel_weights(&extension, &extended, i, sigma))
        .collect::<Result<Vec<_>>>()?;

    let mut out = Array4::<f32>::zeros(hr.raw_dim());
    for (mut frame, row) in out.axis_iter_mut(Axis(0)).zip(weights.iter()) {
        // accumulate in f64
        let mut acc = Array3::<f64>::zeros(frame.raw_dim());
        for (source, &w) in hr.axis_iter(Axis(0)).zip(row.iter()) {
            acc.scaled_add(w, &source.mapv(f64::from));
        }
        frame.assign(&acc.mapv(|x| x as f32));
    }

    debug!(
        "Box smoothing: sigma {}, range {}..{}, dt {}, {} extension samples",
        sigma,
        t_range[0],
        t_range[frames - 1],
        extension.dt(),
        extension.extension_len()
    );
    Ok(out)
}

/// Smooth `stride` interleaved sub-series independently
///
/// Frames `offset, offset + stride, ...` are smoothed against
/// `t_range[offset..;stride]` for every offset and written back in place.
/// With `stride == 2` this treats even and odd frames as two separate
/// low-resolution acquisitions of the same cycle.
pub fn interleaved_box_smoothing(
    hr: ArrayView4<'_, f32>,
    t_range: &[f64],
    sigma: f64,
    stride: usize,
) -> Result<Array4<f32>> {
    if stride == 0 {
        return Err(Error::invalid_input("Interleave stride must be >= 1"));
    }
    let frames = hr.len_of(Axis(0));
    if t_range.len() != frames {
        return Err(Error::shape_mismatch("time range", &[frames], &[t_range.len()]));
    }

    let mut out = Array4::<f32>::zeros(hr.raw_dim());
    for offset in 0..stride.min(frames) {
        let sub = hr.slice(s![offset..;stride, .., .., ..]);
        let sub_times: Vec<f64> = t_range.iter().skip(offset).step_by(stride).copied().collect();
        let smoothed = box_smoothing(sub, &sub_times, sigma)?;
        out.slice_mut(s![offset..;stride, .., .., ..]).assign(&smoothed);
    }
    Ok(out)
}

/// Weight matrix of [`box_smoothing`], one row per output frame
pub fn box_weight_matrix(t_range: &[f64], sigma: f64) -> Result<Array2<f64>> {
    check_sigma(sigma)?;
    let extension = PeriodicExtension::new(t_range)?;
    let extended = extension.extended_times();
    let n = extension.len();
    let mut matrix = Array2::<f64>::zeros((n, n));
    for (i, mut row) in matrix.outer_iter_mut().enumerate() {
        row.assign(&Array1::from(kernel_weights(&extension, &extended, i, sigma)?));
    }
    Ok(matrix)
}
