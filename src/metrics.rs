//! Evaluation metrics for super-resolved flow
//!
//! Every metric is reported per frame. Masks may be static or temporal; a
//! static mask is broadcast over all frames first. Voxels count as fluid
//! where the mask equals one (relative error) or is non-zero (RMSE).

use crate::error::{Error, Result};
use crate::volume::{TemporalMask, VelocityVolume};
use ndarray::{Array4, ArrayView3, ArrayView4, Axis, Zip};

/// Guards the relative error against division by a zero reference speed
pub const RELATIVE_ERROR_EPSILON: f64 = 1e-5;

/// Errors are rounded to this resolution before averaging
const ROUNDING: f64 = 1e4;

/// How the ratio `|dv| / |v|` is squashed into `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    Tanh,
    Clip,
}

fn expand_mask(mask: &TemporalMask, reference: &VelocityVolume) -> Result<Array4<f32>> {
    let (t, x, y, z) = reference.shape();
    let expanded = mask.expand(t)?;
    if expanded.dim() != (t, x, y, z) {
        let d = expanded.dim();
        return Err(Error::shape_mismatch("mask", &[t, x, y, z], &[d.0, d.1, d.2, d.3]));
    }
    Ok(expanded)
}

fn check_pair(pred: &VelocityVolume, gt: &VelocityVolume) -> Result<()> {
    if pred.shape() != gt.shape() {
        let (a, b) = (gt.shape(), pred.shape());
        return Err(Error::shape_mismatch(
            "prediction vs ground truth",
            &[a.0, a.1, a.2, a.3],
            &[b.0, b.1, b.2, b.3],
        ));
    }
    Ok(())
}

fn frame(a: &Array4<f32>, t: usize) -> ArrayView3<'_, f32> {
    a.index_axis(Axis(0), t)
}

fn speed(u: f32, v: f32, w: f32) -> f64 {
    let (u, v, w) = (f64::from(u), f64::from(v), f64::from(w));
    (u * u + v * v + w * w).sqrt()
}

/// Mean relative speed error per frame, in percent
///
/// Where the reference speed is exactly zero the absolute speed error is
/// used instead. The per-frame sum is divided by the fluid voxel count
/// plus one.
pub fn relative_error(
    pred: &VelocityVolume,
    gt: &VelocityVolume,
    mask: &TemporalMask,
    normalization: Normalization,
) -> Result<Vec<f64>> {
    check_pair(pred, gt)?;
    let mask = expand_mask(mask, gt)?;
    let frames = gt.shape().0;

    let mut errors = Vec::with_capacity(frames);
    for t in 0..frames {
        let diff = Zip::from(&(&frame(&pred.u, t) - &frame(&gt.u, t)))
            .and(&(&frame(&pred.v, t) - &frame(&gt.v, t)))
            .and(&(&frame(&pred.w, t) - &frame(&gt.w, t)))
            .map_collect(|&u, &v, &w| speed(u, v, w));
        let actual = Zip::from(frame(&gt.u, t))
            .and(frame(&gt.v, t))
            .and(frame(&gt.w, t))
            .map_collect(|&u, &v, &w| speed(u, v, w));

        let mut total = 0.0f64;
        let mut fluid = 0.0f64;
        Zip::from(&diff)
            .and(&actual)
            .and(mask.index_axis(Axis(0), t))
            .for_each(|&diff, &actual, &m| {
                fluid += f64::from(m);
                if m != 1.0 {
                    return;
                }
                let error = if actual != 0.0 {
                    let ratio = diff / (actual + RELATIVE_ERROR_EPSILON);
                    match normalization {
                        Normalization::Tanh => ratio.tanh(),
                        Normalization::Clip => ratio.clamp(0.0, 1.0),
                    }
                } else {
                    diff
                };
                total += (error * ROUNDING).round_ties_even() / ROUNDING;
            });
        errors.push(total / (fluid + 1.0) * 100.0);
    }
    Ok(errors)
}

fn check_rmse_inputs(pred: &ArrayView4<'_, f32>, gt: &ArrayView4<'_, f32>, mask: &Array4<f32>) -> Result<()> {
    if pred.shape() != gt.shape() {
        return Err(Error::shape_mismatch("rmse prediction vs ground truth", gt.shape(), pred.shape()));
    }
    if mask.shape() != gt.shape() {
        return Err(Error::shape_mismatch("rmse mask", gt.shape(), mask.shape()));
    }
    Ok(())
}

/// Prediction and ground truth values at the fluid voxels (`mask != 0`) of one frame
fn fluid_values(pred: ArrayView3<'_, f32>, gt: ArrayView3<'_, f32>, mask: ArrayView3<'_, f32>) -> (Vec<f64>, Vec<f64>) {
    let mut p_vals = Vec::new();
    let mut g_vals = Vec::new();
    Zip::from(&pred).and(&gt).and(&mask).for_each(|&p, &g, &m| {
        if m != 0.0 {
            p_vals.push(f64::from(p));
            g_vals.push(f64::from(g));
        }
    });
    (p_vals, g_vals)
}

fn frame_rmse(p_vals: &[f64], g_vals: &[f64]) -> f64 {
    if p_vals.is_empty() {
        return 0.0;
    }
    let sum: f64 = p_vals.iter().zip(g_vals).map(|(p, g)| (p - g) * (p - g)).sum();
    (sum / p_vals.len() as f64).sqrt()
}

/// Root mean squared error of one component per frame over the fluid region
///
/// Frames without fluid voxels report zero.
pub fn rmse(pred: ArrayView4<'_, f32>, gt: ArrayView4<'_, f32>, mask: &Array4<f32>) -> Result<Vec<f64>> {
    check_rmse_inputs(&pred, &gt, mask)?;
    let per_frame = pred
        .outer_iter()
        .zip(gt.outer_iter())
        .zip(mask.outer_iter())
        .map(|((p, g), m)| {
            let (p_vals, g_vals) = fluid_values(p, g, m);
            frame_rmse(&p_vals, &g_vals)
        })
        .collect();
    Ok(per_frame)
}

/// [`rmse`] together with the spread of the squared deviation from the mean
/// ground truth value
///
/// The spread is the population standard deviation over the fluid voxels of
/// `(pred - mean(gt))^2`.
pub fn rmse_with_variance(
    pred: ArrayView4<'_, f32>,
    gt: ArrayView4<'_, f32>,
    mask: &Array4<f32>,
) -> Result<(Vec<f64>, Vec<f64>)> {
    check_rmse_inputs(&pred, &gt, mask)?;
    let frames = pred.len_of(Axis(0));
    let mut errors = Vec::with_capacity(frames);
    let mut spread = Vec::with_capacity(frames);
    for ((p, g), m) in pred.outer_iter().zip(gt.outer_iter()).zip(mask.outer_iter()) {
        let (p_vals, g_vals) = fluid_values(p, g, m);
        errors.push(frame_rmse(&p_vals, &g_vals));
        if p_vals.is_empty() {
            spread.push(0.0);
            continue;
        }
        let n = p_vals.len() as f64;
        let gt_mean = g_vals.iter().sum::<f64>() / n;
        let squared: Vec<f64> = p_vals.iter().map(|p| (p - gt_mean) * (p - gt_mean)).collect();
        let mean = squared.iter().sum::<f64>() / n;
        let variance = squared.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;
        spread.push(variance.sqrt());
    }
    Ok((errors, spread))
}

/// Least-squares fit `pred = k * gt + m` over the fluid voxels of one frame
///
/// Returns the slope `k` and the coefficient of determination `R^2`. A
/// constant prediction yields `R^2 = 0`. Fewer than two fluid voxels, or a
/// constant ground truth, leave the slope undefined and are rejected.
pub fn k_r2(pred: ArrayView3<'_, f32>, gt: ArrayView3<'_, f32>, mask: ArrayView3<'_, f32>) -> Result<(f64, f64)> {
    if pred.shape() != gt.shape() {
        return Err(Error::shape_mismatch("k/R2 prediction vs ground truth", gt.shape(), pred.shape()));
    }
    if mask.shape() != gt.shape() {
        return Err(Error::shape_mismatch("k/R2 mask", gt.shape(), mask.shape()));
    }
    let (y, x) = fluid_values(pred, gt, mask);
    if x.len() < 2 {
        return Err(Error::invalid_input(format!(
            "Regression needs at least two fluid voxels, got {}",
            x.len()
        )));
    }

    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;
    let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);
    for (xi, yi) in x.iter().zip(&y) {
        let (dx, dy) = (xi - x_mean, yi - y_mean);
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx == 0.0 {
        return Err(Error::invalid_input("Ground truth is constant over the fluid region"));
    }

    let slope = sxy / sxx;
    let r2 = if syy == 0.0 {
        0.0
    } else {
        let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
        r * r
    };
    Ok((slope, r2))
}

/// Voxel-wise errors between a prediction and ground truth
#[derive(Debug, Clone)]
pub struct PointwiseError {
    /// `|dv| / (|v| + eps)`, zero outside the fluid region
    pub relative_speed: Array4<f32>,
    pub u: Array4<f32>,
    pub v: Array4<f32>,
    pub w: Array4<f32>,
    /// `| |v_pred| - |v_gt| |`
    pub speed: Array4<f32>,
}

/// Relative speed error per voxel plus absolute component and speed errors
///
/// The absolute errors cover the whole volume; only the relative error is
/// masked.
pub fn pointwise_error(pred: &VelocityVolume, gt: &VelocityVolume, mask: &TemporalMask) -> Result<PointwiseError> {
    check_pair(pred, gt)?;
    let mask = expand_mask(mask, gt)?;

    let abs_diff = |a: &Array4<f32>, b: &Array4<f32>| Zip::from(a).and(b).map_collect(|&a, &b| (a - b).abs());
    let u = abs_diff(&pred.u, &gt.u);
    let v = abs_diff(&pred.v, &gt.v);
    let w = abs_diff(&pred.w, &gt.w);

    let gt_speed = Zip::from(&gt.u)
        .and(&gt.v)
        .and(&gt.w)
        .map_collect(|&u, &v, &w| speed(u, v, w));
    let pred_speed = Zip::from(&pred.u)
        .and(&pred.v)
        .and(&pred.w)
        .map_collect(|&u, &v, &w| speed(u, v, w));

    let relative_speed = Zip::from(&u)
        .and(&v)
        .and(&w)
        .and(&gt_speed)
        .and(&mask)
        .map_collect(|&du, &dv, &dw, &actual, &m| {
            if m == 0.0 {
                0.0
            } else {
                (speed(du, dv, dw) / (actual + RELATIVE_ERROR_EPSILON)) as f32
            }
        });
    let speed = Zip::from(&pred_speed)
        .and(&gt_speed)
        .map_collect(|&p, &g| (p - g).abs() as f32);

    Ok(PointwiseError {
        relative_speed,
        u,
        v,
        w,
        speed,
    })
}

/// Summed speed per frame divided by the fluid voxel count plus one, times 100
///
/// Velocities outside the fluid region are expected to be zero already.
pub fn mean_speed(velocity: &VelocityVolume, mask: &TemporalMask) -> Result<Vec<f64>> {
    let mask = expand_mask(mask, velocity)?;
    let frames = velocity.shape().0;
    let mut out = Vec::with_capacity(frames);
    for t in 0..frames {
        let mut total = 0.0f64;
        Zip::from(frame(&velocity.u, t))
            .and(frame(&velocity.v, t))
            .and(frame(&velocity.w, t))
            .for_each(|&u, &v, &w| total += speed(u, v, w));
        let fluid: f64 = mask.index_axis(Axis(0), t).iter().map(|&m| f64::from(m)).sum();
        out.push(total / (fluid + 1.0) * 100.0);
    }
    Ok(out)
}

/// Absolute forward difference `|x[t + step] - x[t]| / step`
///
/// Frames without a successor `step` frames ahead stay zero.
pub fn temporal_derivative(data: ArrayView4<'_, f32>, step: usize) -> Result<Array4<f32>> {
    if step < 1 {
        return Err(Error::invalid_input("Time step should be >= 1"));
    }
    let frames = data.len_of(Axis(0));
    let mut out = Array4::<f32>::zeros(data.raw_dim());
    for t in 0..frames.saturating_sub(step) {
        let next = data.index_axis(Axis(0), t + step);
        let current = data.index_axis(Axis(0), t);
        Zip::from(out.index_axis_mut(Axis(0), t))
            .and(&next)
            .and(&current)
            .for_each(|o, &n, &c| *o = ((n - c) / step as f32).abs());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn volume(shape: (usize, usize, usize, usize), u: f32) -> VelocityVolume {
        let mut v = VelocityVolume::zeros(shape);
        v.u.fill(u);
        v
    }

    fn full_mask(shape: (usize, usize, usize)) -> TemporalMask {
        TemporalMask::Static(Array3::ones(shape))
    }

    #[test]
    fn test_relative_error_perfect_prediction() {
        let gt = volume((2, 2, 2, 2), 1.0);
        let err = relative_error(&gt, &gt, &full_mask((2, 2, 2)), Normalization::Tanh).unwrap();
        assert_eq!(err, vec![0.0, 0.0]);
    }

    #[test]
    fn test_relative_error_uses_absolute_error_on_zero_reference() {
        let gt = volume((1, 1, 1, 3), 0.0);
        let pred = volume((1, 1, 1, 3), 0.5);
        let err = relative_error(&pred, &gt, &full_mask((1, 1, 3)), Normalization::Clip).unwrap();
        // 3 voxels * 0.5 / (3 + 1) * 100
        assert!((err[0] - 37.5).abs() < 1e-9);
    }

    #[test]
    fn test_relative_error_clip_vs_tanh() {
        let gt = volume((1, 1, 1, 1), 1.0);
        let pred = volume((1, 1, 1, 1), 4.0);
        let clip = relative_error(&pred, &gt, &full_mask((1, 1, 1)), Normalization::Clip).unwrap();
        let tanh = relative_error(&pred, &gt, &full_mask((1, 1, 1)), Normalization::Tanh).unwrap();
        assert!((clip[0] - 50.0).abs() < 1e-9);
        assert!(tanh[0] < 50.0 && tanh[0] > 49.0);
    }

    #[test]
    fn test_relative_error_ignores_voxels_outside_mask() {
        let gt = volume((1, 1, 1, 2), 1.0);
        let mut pred = volume((1, 1, 1, 2), 1.0);
        pred.u[[0, 0, 0, 1]] = 100.0;
        let mask = TemporalMask::Static(Array3::from_shape_vec((1, 1, 2), vec![1.0, 0.0]).unwrap());
        let err = relative_error(&pred, &gt, &mask, Normalization::Tanh).unwrap();
        assert_eq!(err[0], 0.0);
    }

    #[test]
    fn test_rmse_per_frame() {
        let gt = Array4::<f32>::zeros((2, 1, 1, 2));
        let mut pred = gt.clone();
        pred[[1, 0, 0, 0]] = 3.0;
        pred[[1, 0, 0, 1]] = 4.0;
        let mask = Array4::<f32>::ones((2, 1, 1, 2));
        let r = rmse(pred.view(), gt.view(), &mask).unwrap();
        assert_eq!(r[0], 0.0);
        assert!((r[1] - (12.5f64).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_rmse_reports_mask_shape() {
        let gt = Array4::<f32>::zeros((2, 1, 1, 2));
        let mask = Array4::<f32>::ones((2, 1, 2, 2));
        match rmse(gt.view(), gt.view(), &mask) {
            Err(Error::ShapeMismatch { actual, .. }) => assert_eq!(actual, vec![2, 1, 2, 2]),
            other => panic!("expected shape mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_rmse_with_variance() {
        // fluid voxels: gt = [1, 3] (mean 2), pred = [2, 4]
        let gt = Array4::from_shape_vec((1, 1, 1, 3), vec![1.0f32, 3.0, 50.0]).unwrap();
        let pred = Array4::from_shape_vec((1, 1, 1, 3), vec![2.0f32, 4.0, -50.0]).unwrap();
        let mask = Array4::from_shape_vec((1, 1, 1, 3), vec![1.0f32, 1.0, 0.0]).unwrap();
        let (errors, spread) = rmse_with_variance(pred.view(), gt.view(), &mask).unwrap();
        assert!((errors[0] - 1.0).abs() < 1e-12);
        // squared deviations from 2: [0, 4], population std 2
        assert!((spread[0] - 2.0).abs() < 1e-12);
        assert_eq!(errors, rmse(pred.view(), gt.view(), &mask).unwrap());
    }

    #[test]
    fn test_k_r2_exact_line_over_fluid() {
        let gt = Array3::from_shape_fn((2, 2, 3), |(x, y, z)| (x * 6 + y * 3 + z) as f32 * 0.25);
        let mut pred = gt.mapv(|g| 2.0 * g + 1.0);
        let mut mask = Array3::<f32>::ones((2, 2, 3));
        // outliers outside the fluid region are ignored
        pred[[1, 1, 2]] = -40.0;
        mask[[1, 1, 2]] = 0.0;
        let (k, r2) = k_r2(pred.view(), gt.view(), mask.view()).unwrap();
        assert!((k - 2.0).abs() < 1e-9);
        assert!((r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_k_r2_uncorrelated_and_degenerate() {
        let gt = Array3::from_shape_vec((1, 1, 4), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let mask = Array3::<f32>::ones((1, 1, 4));

        let flat = Array3::from_elem((1, 1, 4), 0.5f32);
        let (k, r2) = k_r2(flat.view(), gt.view(), mask.view()).unwrap();
        assert_eq!((k, r2), (0.0, 0.0));

        let symmetric = Array3::from_shape_vec((1, 1, 4), vec![1.0f32, -1.0, -1.0, 1.0]).unwrap();
        let (k, r2) = k_r2(symmetric.view(), gt.view(), mask.view()).unwrap();
        assert!(k.abs() < 1e-12 && r2 < 1e-12);

        let constant = Array3::from_elem((1, 1, 4), 3.0f32);
        assert!(matches!(
            k_r2(gt.view(), constant.view(), mask.view()),
            Err(Error::InvalidInput(_))
        ));
        let single = Array3::from_shape_vec((1, 1, 4), vec![1.0f32, 0.0, 0.0, 0.0]).unwrap();
        assert!(matches!(
            k_r2(gt.view(), gt.view(), single.view()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_pointwise_error() {
        let mut gt = VelocityVolume::zeros((1, 1, 1, 2));
        gt.u.fill(3.0);
        gt.v.fill(4.0);
        let mut pred = gt.clone();
        pred.u.fill(0.0);
        let mask = TemporalMask::Static(Array3::from_shape_vec((1, 1, 2), vec![1.0, 0.0]).unwrap());

        let err = pointwise_error(&pred, &gt, &mask).unwrap();
        assert!((err.relative_speed[[0, 0, 0, 0]] - 0.6).abs() < 1e-5);
        assert_eq!(err.relative_speed[[0, 0, 0, 1]], 0.0);
        assert_eq!(err.u[[0, 0, 0, 1]], 3.0);
        assert_eq!(err.v[[0, 0, 0, 0]], 0.0);
        // |5 - 4| everywhere, mask does not apply
        assert!((err.speed[[0, 0, 0, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_speed() {
        let mut vel = VelocityVolume::zeros((1, 1, 1, 1));
        vel.u.fill(3.0);
        vel.v.fill(4.0);
        let speed = mean_speed(&vel, &full_mask((1, 1, 1))).unwrap();
        assert!((speed[0] - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_temporal_derivative() {
        let data = Array4::from_shape_fn((4, 1, 1, 1), |(t, _, _, _)| (t * t) as f32);
        let d = temporal_derivative(data.view(), 1).unwrap();
        let frames: Vec<f32> = d.iter().copied().collect();
        assert_eq!(frames, vec![1.0, 3.0, 5.0, 0.0]);

        let d2 = temporal_derivative(data.view(), 2).unwrap();
        let frames: Vec<f32> = d2.iter().copied().collect();
        assert_eq!(frames, vec![2.0, 4.0, 0.0, 0.0]);
    }
}
