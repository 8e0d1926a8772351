//! Temporal resampling integration tests
//!
//! Exercises the periodic downsampling, averaging, smoothing and
//! interpolation routines on synthetic pulsatile series.

use flowsr_lib::temporal::{
    box_smoothing, box_weight_matrix, cartesian_downsample, grid_interpolate, grid_interpolate_to,
    interleaved_box_smoothing, linear_interpolate_fast, temporal_averaging, InterpolationMethod,
};
use ndarray::{Array4, Axis};

#[path = "common/mod.rs"]
mod common;

use common::*;

fn temporal_mean(series: &Array4<f32>) -> Array4<f32> {
    series
        .mean_axis(Axis(0))
        .expect("non-empty series")
        .insert_axis(Axis(0))
}

fn temporal_variance(series: &Array4<f32>) -> Vec<f64> {
    let (t, x, y, z) = series.dim();
    let mut out = Vec::with_capacity(x * y * z);
    for xi in 0..x {
        for yi in 0..y {
            for zi in 0..z {
                let values: Vec<f64> = (0..t).map(|ti| f64::from(series[[ti, xi, yi, zi]])).collect();
                let mean = values.iter().sum::<f64>() / t as f64;
                out.push(values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / t as f64);
            }
        }
    }
    out
}

// ============================================================================
// Downsampling and Fast Interpolation
// ============================================================================

#[test]
fn test_downsample_then_fast_interpolate_restores_even_frames() {
    let [u, _, _] = pulsatile_velocity((20, 4, 4, 3), 1.5);
    let lr = cartesian_downsample(u.view(), 2, 0).unwrap();
    assert_eq!(lr.len_of(Axis(0)), 10);

    let hr = linear_interpolate_fast(lr.view(), 20).unwrap();
    for t in (0..20).step_by(2) {
        assert_eq!(hr.index_axis(Axis(0), t), u.index_axis(Axis(0), t));
    }
    for t in (1..18).step_by(2) {
        let expected = (&u.index_axis(Axis(0), t - 1) + &u.index_axis(Axis(0), t + 1)) / 2.0;
        assert_eq!(hr.index_axis(Axis(0), t), expected);
    }
    // last odd frame has no successor
    assert!(hr.index_axis(Axis(0), 19).iter().all(|&x| x == 0.0));
}

#[test]
fn test_downsample_offsets_partition_series() {
    let series = noise_series((9, 2, 2, 2), 3);
    let total: usize = (0..3)
        .map(|offset| cartesian_downsample(series.view(), 3, offset).unwrap().len_of(Axis(0)))
        .sum();
    assert_eq!(total, 9);
}

// ============================================================================
// Averaging
// ============================================================================

#[test]
fn test_odd_radius_averaging_preserves_cycle_mean() {
    let series = noise_series((12, 3, 3, 3), 11);
    for radius in [1, 3, 5] {
        let averaged = temporal_averaging(series.view(), radius).unwrap();
        assert_all_close(&temporal_mean(&averaged), &temporal_mean(&series), 1e-5);
    }
}

#[test]
fn test_radius_one_is_identity() {
    let series = noise_series((5, 2, 3, 4), 5);
    let averaged = temporal_averaging(series.view(), 1).unwrap();
    assert_eq!(averaged, series);
}

// ============================================================================
// Box Smoothing
// ============================================================================

#[test]
fn test_weight_matrix_is_nearly_circulant() {
    let t = linspace(0.0, 1.0, 20);
    let matrix = box_weight_matrix(&t, 0.01).unwrap();
    for i in 0..20 {
        assert!((matrix.row(i).sum() - 1.0).abs() < 1e-9);
        for j in 0..20 {
            let shifted = matrix[[(i + 1) % 20, (j + 1) % 20]];
            assert!((matrix[[i, j]] - shifted).abs() < 1e-8, "({}, {})", i, j);
        }
    }
}

#[test]
fn test_smoothing_does_not_increase_temporal_variance() {
    let series = noise_series((20, 3, 3, 2), 42);
    let t = linspace(0.0, 1.0, 20);
    let smoothed = box_smoothing(series.view(), &t, 0.01).unwrap();

    assert_all_close(&temporal_mean(&smoothed), &temporal_mean(&series), 1e-4);
    let before = temporal_variance(&series);
    let after = temporal_variance(&smoothed);
    for (b, a) in before.iter().zip(after.iter()) {
        assert!(*a <= b + 1e-6, "variance grew from {} to {}", b, a);
    }
    assert!(after.iter().sum::<f64>() < before.iter().sum::<f64>());
}

#[test]
fn test_interleaved_smoothing_of_two_acquisitions() {
    // even and odd frames sampled from two different constant fields
    let (even, odd) = (2.0f32, -1.0f32);
    let series = Array4::from_shape_fn((16, 2, 2, 2), |(t, _, _, _)| if t % 2 == 0 { even } else { odd });
    let t = linspace(0.0, 1.0, 16);

    let smoothed = interleaved_box_smoothing(series.view(), &t, 0.004, 2).unwrap();
    assert_all_close(&smoothed, &series, 1e-5);
}

// ============================================================================
// Grid Interpolation
// ============================================================================

#[test]
fn test_cubic_reproduces_cubic_polynomial() {
    let poly = |t: f64| t * t * t - 2.0 * t * t + 1.0;
    let lr = Array4::from_shape_fn((6, 1, 1, 2), |(t, _, _, _)| poly(t as f64) as f32);
    let hr = grid_interpolate(lr.view(), InterpolationMethod::Cubic).unwrap();
    assert_eq!(hr.len_of(Axis(0)), 12);

    for k in 0..11 {
        let t = k as f64 * 0.5;
        let got = f64::from(hr[[k, 0, 0, 1]]);
        assert!((got - poly(t)).abs() < 1e-3, "t = {}: {} vs {}", t, got, poly(t));
    }
    // t = 5.5 lies past the last frame
    assert_eq!(hr[[11, 0, 0, 0]], 0.0);
}

#[test]
fn test_linear_and_nearest_on_ramp() {
    let lr = Array4::from_shape_fn((4, 1, 1, 1), |(t, _, _, _)| 10.0 * t as f32);

    let linear = grid_interpolate(lr.view(), InterpolationMethod::Linear).unwrap();
    let values: Vec<f32> = linear.iter().copied().collect();
    assert_eq!(values, vec![0.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 0.0]);

    // ties at half frames round to the earlier frame
    let nearest = grid_interpolate(lr.view(), InterpolationMethod::Nearest).unwrap();
    let values: Vec<f32> = nearest.iter().copied().collect();
    assert_eq!(values, vec![0.0, 0.0, 10.0, 10.0, 20.0, 20.0, 30.0, 0.0]);
}

#[test]
fn test_interpolation_to_custom_frame_count() {
    let lr = noise_series((5, 2, 2, 2), 9);
    let hr = grid_interpolate_to(lr.view(), 7, InterpolationMethod::Linear).unwrap();
    assert_eq!(hr.dim(), (7, 2, 2, 2));
    // first sample is always the first input frame
    assert_eq!(hr.index_axis(Axis(0), 0), lr.index_axis(Axis(0), 0));
}

#[test]
fn test_interpolation_frame_requirements() {
    let three = Array4::<f32>::zeros((3, 1, 1, 1));
    assert!(grid_interpolate(three.view(), InterpolationMethod::Cubic).is_err());
    assert!(grid_interpolate(three.view(), InterpolationMethod::Linear).is_ok());

    let one = Array4::<f32>::zeros((1, 1, 1, 1));
    assert!(grid_interpolate(one.view(), InterpolationMethod::Nearest).is_err());
    assert!(linear_interpolate_fast(three.view(), 8).is_err());
}
