//! Periodic temporal resampling
//!
//! All routines operate on 4D `(time, x, y, z)` series and treat the time
//! axis as one period of a cyclic signal (for example a cardiac cycle).
//!
//! - [`cartesian_downsample`]: keep every n-th frame
//! - [`temporal_averaging`]: symmetric windowed mean with wraparound
//! - [`box_smoothing`]: soft box kernel with periodic extension
//! - [`interleaved_box_smoothing`]: the same, per interleaved sub-series
//! - [`grid_interpolate`] / [`linear_interpolate_fast`]: upsampling baselines

pub mod averaging;
pub mod downsample;
pub mod interpolation;
pub mod smoothing;

pub use averaging::temporal_averaging;
pub use downsample::cartesian_downsample;
pub use interpolation::{grid_interpolate, grid_interpolate_to, linear_interpolate_fast, InterpolationMethod};
pub use smoothing::{
    box_smoothing, box_weight_matrix, interleaved_box_smoothing, periodic_box_weights, PeriodicExtension,
};
