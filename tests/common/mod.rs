//! Common test utilities for flowsr integration tests
//!
//! Synthetic pulsatile flow fields and helpers to persist them in a store.

#![allow(dead_code)]

use flowsr_lib::storage::{ArrayStore, StoredArray};
use flowsr_lib::volume::{MAGNITUDE_KEYS, VELOCITY_KEYS};
use ndarray::{Array3, Array4, ArrayD, IxDyn};
use std::f32::consts::PI;
use std::path::Path;

// ============================================================================
// Flow Generation
// ============================================================================

/// Pipe-like velocity profile pulsing once over the series
///
/// Each component gets its own phase so u, v and w differ.
pub fn pulsatile_velocity(shape: (usize, usize, usize, usize), peak: f32) -> [Array4<f32>; 3] {
    let (t, x, y, z) = shape;
    let profile = |xi: usize, yi: usize| {
        let cx = (xi as f32 + 0.5) / x as f32 - 0.5;
        let cy = (yi as f32 + 0.5) / y as f32 - 0.5;
        (1.0 - 4.0 * (cx * cx + cy * cy)).max(0.0)
    };
    let component = |phase: f32| {
        Array4::from_shape_fn(shape, |(ti, xi, yi, zi)| {
            let cycle = (2.0 * PI * ti as f32 / t as f32 + phase).sin();
            peak * profile(xi, yi) * cycle * (1.0 + 0.1 * zi as f32 / z as f32)
        })
    };
    [component(0.0), component(PI / 3.0), component(2.0 * PI / 3.0)]
}

/// Deterministic pseudo-random series in `[-1, 1)`
pub fn noise_series(shape: (usize, usize, usize, usize), seed: u64) -> Array4<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    Array4::from_shape_simple_fn(shape, || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
    })
}

/// Magnitudes: ones inside a cylindrical lumen, a tenth outside
pub fn magnitudes(shape: (usize, usize, usize, usize)) -> [Array4<f32>; 3] {
    let mask = lumen_mask((shape.1, shape.2, shape.3));
    let mag = Array4::from_shape_fn(shape, |(_, x, y, z)| 0.1 + 0.9 * mask[[x, y, z]]);
    [mag.clone(), mag.clone(), mag]
}

/// Binary mask of a cylinder along the last axis
pub fn lumen_mask(shape: (usize, usize, usize)) -> Array3<f32> {
    let (x, y, _) = shape;
    Array3::from_shape_fn(shape, |(xi, yi, _)| {
        let cx = (xi as f32 + 0.5) / x as f32 - 0.5;
        let cy = (yi as f32 + 0.5) / y as f32 - 0.5;
        if cx * cx + cy * cy < 0.16 {
            1.0
        } else {
            0.0
        }
    })
}

/// `n` evenly spaced values over `[start, end]`
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + i as f64 * step).collect()
}

// ============================================================================
// Storage
// ============================================================================

/// Write a complete flow dataset (velocities, magnitudes, venc) to `path`
pub fn store_flow<S: ArrayStore + ?Sized>(
    store: &S,
    path: &Path,
    velocity: &[Array4<f32>; 3],
    magnitude: &[Array4<f32>; 3],
    venc: f64,
) {
    for (key, array) in VELOCITY_KEYS.iter().zip(velocity.iter()) {
        store
            .save(path, key, StoredArray::F32(array.clone().into_dyn()), None)
            .expect("Failed to save velocity");
    }
    for (key, array) in MAGNITUDE_KEYS.iter().zip(magnitude.iter()) {
        store
            .save(path, key, StoredArray::F32(array.clone().into_dyn()), None)
            .expect("Failed to save magnitude");
    }
    let venc = ArrayD::from_shape_vec(IxDyn(&[1]), vec![venc]).expect("scalar shape");
    store
        .save(path, "venc", StoredArray::F64(venc), None)
        .expect("Failed to save venc");
}

// ============================================================================
// Assertions
// ============================================================================

/// Assert two arrays agree element-wise within `tolerance`
pub fn assert_all_close(actual: &Array4<f32>, expected: &Array4<f32>, tolerance: f32) {
    assert_eq!(actual.dim(), expected.dim(), "shape mismatch");
    for ((index, a), e) in actual.indexed_iter().zip(expected.iter()) {
        assert!(
            (a - e).abs() <= tolerance,
            "value at {:?}: {} vs {} (tolerance {})",
            index,
            a,
            e,
            tolerance
        );
    }
}
