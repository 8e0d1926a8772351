//! Temporal interpolation baselines
//!
//! The low-resolution series is sampled at integer times `0..T`. Output
//! frames are evaluated at `linspace(0, T - 0.5, n)`; any time past the last
//! input frame is outside the support and filled with zeros, so the final
//! frame of a doubled series is always zero.

use crate::error::{Error, Result};
use nalgebra::DMatrix;
use ndarray::{Array4, ArrayView4, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Interpolation kernel along time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Nearest frame, ties rounding towards the earlier frame
    Nearest,
    /// Piecewise linear between neighbouring frames
    Linear,
    /// Not-a-knot cubic spline; needs at least four frames
    Cubic,
}

impl InterpolationMethod {
    /// Minimum number of input frames the method supports
    pub fn min_frames(&self) -> usize {
        match self {
            InterpolationMethod::Nearest | InterpolationMethod::Linear => 2,
            InterpolationMethod::Cubic => 4,
        }
    }
}

impl fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterpolationMethod::Nearest => "nearest",
            InterpolationMethod::Linear => "linear",
            InterpolationMethod::Cubic => "cubic",
        };
        f.write_str(name)
    }
}

impl FromStr for InterpolationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" | "nn" => Ok(InterpolationMethod::Nearest),
            "linear" => Ok(InterpolationMethod::Linear),
            "cubic" => Ok(InterpolationMethod::Cubic),
            other => Err(Error::invalid_input(format!(
                "Unknown interpolation method '{}'",
                other
            ))),
        }
    }
}

/// `n` evenly spaced samples over `[start, stop]`, endpoint included
fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            let mut out: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
            out[n - 1] = stop;
            out
        }
    }
}

/// Double the frame count of `lr`
pub fn grid_interpolate(lr: ArrayView4<'_, f32>, method: InterpolationMethod) -> Result<Array4<f32>> {
    let frames = lr.len_of(Axis(0));
    grid_interpolate_to(lr, 2 * frames, method)
}

/// Resample `lr` to `hr_frames` frames on `linspace(0, T - 0.5, hr_frames)`
pub fn grid_interpolate_to(
    lr: ArrayView4<'_, f32>,
    hr_frames: usize,
    method: InterpolationMethod,
) -> Result<Array4<f32>> {
    let frames = lr.len_of(Axis(0));
    if frames < method.min_frames() {
        return Err(Error::invalid_input(format!(
            "{} interpolation needs at least {} frames, got {}",
            method,
            method.min_frames(),
            frames
        )));
    }

    let times = linspace(0.0, frames as f64 - 0.5, hr_frames);
    let spline = match method {
        InterpolationMethod::Cubic => Some(SplineWeights::not_a_knot(frames)?),
        _ => None,
    };

    let (_, x, y, z) = lr.dim();
    let mut out = Array4::<f32>::zeros((hr_frames, x, y, z));
    for (mut frame, &t) in out.axis_iter_mut(Axis(0)).zip(times.iter()) {
        let weights = match (&spline, method) {
            (Some(spline), _) => spline.weights_at(t),
            (None, InterpolationMethod::Nearest) => nearest_weights(t, frames),
            _ => linear_weights(t, frames),
        };
        for (index, w) in weights {
            if w != 0.0 {
                frame.scaled_add(w as f32, &lr.index_axis(Axis(0), index));
            }
        }
    }
    Ok(out)
}

fn in_support(t: f64, frames: usize) -> bool {
    t >= 0.0 && t <= (frames - 1) as f64
}

/// Interval index and fractional position of an in-support time
fn locate(t: f64, frames: usize) -> (usize, f64) {
    let i = (t.floor() as usize).min(frames - 2);
    (i, t - i as f64)
}

fn nearest_weights(t: f64, frames: usize) -> Vec<(usize, f64)> {
    if !in_support(t, frames) {
        return Vec::new();
    }
    let (i, f) = locate(t, frames);
    let index = if f <= 0.5 { i } else { i + 1 };
    vec![(index, 1.0)]
}

fn linear_weights(t: f64, frames: usize) -> Vec<(usize, f64)> {
    if !in_support(t, frames) {
        return Vec::new();
    }
    let (i, f) = locate(t, frames);
    vec![(i, 1.0 - f), (i + 1, f)]
}

/// Cubic spline on unit-spaced knots as a linear map of the knot values
///
/// Second derivatives `M = C y` solve
///
/// ```text
/// M[i-1] + 4 M[i] + M[i+1] = 6 (y[i+1] - 2 y[i] + y[i-1])   interior
/// M[0] - 2 M[1] + M[2] = 0,  M[n-3] - 2 M[n-2] + M[n-1] = 0  not-a-knot
/// ```
struct SplineWeights {
    frames: usize,
    second_derivative: DMatrix<f64>,
}

impl SplineWeights {
    fn not_a_knot(frames: usize) -> Result<Self> {
        let n = frames;
        let mut a = DMatrix::<f64>::zeros(n, n);
        let mut b = DMatrix::<f64>::zeros(n, n);

        a[(0, 0)] = 1.0;
        a[(0, 1)] = -2.0;
        a[(0, 2)] = 1.0;
        a[(n - 1, n - 3)] = 1.0;
        a[(n - 1, n - 2)] = -2.0;
        a[(n - 1, n - 1)] = 1.0;
        for i in 1..n - 1 {
            a[(i, i - 1)] = 1.0;
            a[(i, i)] = 4.0;
            a[(i, i + 1)] = 1.0;
            b[(i, i - 1)] = 6.0;
            b[(i, i)] = -12.0;
            b[(i, i + 1)] = 6.0;
        }

        let second_derivative = a
            .lu()
            .solve(&b)
            .ok_or_else(|| Error::invalid_input("Spline system is singular"))?;
        Ok(SplineWeights {
            frames,
            second_derivative,
        })
    }

    fn weights_at(&self, t: f64) -> Vec<(usize, f64)> {
        if !in_support(t, self.frames) {
            return Vec::new();
        }
        let (i, f) = locate(t, self.frames);
        let g = 1.0 - f;
        let ci = (g * g * g - g) / 6.0;
        let cj = (f * f * f - f) / 6.0;

        let mut weights: Vec<(usize, f64)> = (0..self.frames)
            .map(|k| {
                let m = ci * self.second_derivative[(i, k)] + cj * self.second_derivative[(i + 1, k)];
                (k, m)
            })
            .collect();
        weights[i].1 += g;
        weights[i + 1].1 += f;
        weights
    }
}

/// Insert `lr` at even output indices and average neighbours at odd ones
///
/// Requires `ceil(hr_frames / 2) == T`. For an even `hr_frames` the last odd
/// frame has no successor and stays zero.
pub fn linear_interpolate_fast(lr: ArrayView4<'_, f32>, hr_frames: usize) -> Result<Array4<f32>> {
    let frames = lr.len_of(Axis(0));
    if hr_frames.div_ceil(2) != frames {
        return Err(Error::invalid_input(format!(
            "{} output frames cannot hold {} input frames at even indices",
            hr_frames, frames
        )));
    }

    let (_, x, y, z) = lr.dim();
    let mut out = Array4::<f32>::zeros((hr_frames, x, y, z));
    for (k, frame) in lr.axis_iter(Axis(0)).enumerate() {
        out.index_axis_mut(Axis(0), 2 * k).assign(&frame);
    }
    for t in (0..hr_frames.saturating_sub(2)).step_by(2) {
        let mid = (&out.index_axis(Axis(0), t) + &out.index_axis(Axis(0), t + 2)) / 2.0;
        out.index_axis_mut(Axis(0), t + 1).assign(&mid);
    }
    Ok(out)
}
