//! Super-resolution model boundary
//!
//! The network is opaque to this crate: it receives six parallel patch
//! stacks (three velocity components, three magnitude channels) and returns
//! one stack of upsampled velocity patches.
//!
//! ```text
//! inputs : 6 x (batch, P, P, P)
//! output : (batch, P * up, P, P, 3)
//! ```
//!
//! [`FrameRepeatModel`] is a network-free stand-in that satisfies the same
//! contract. The ONNX Runtime backend lives behind the `onnx` feature.

#[cfg(feature = "onnx")]
pub mod onnx;

use crate::error::{Error, Result};
use ndarray::{s, Array5, ArrayView4, Axis};

#[cfg(feature = "onnx")]
pub use onnx::{Device, ModelConfig, OnnxFlowModel, OptimizationLevel};

/// Number of velocity components predicted per voxel
pub const VELOCITY_COMPONENTS: usize = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Patch Batch
// ─────────────────────────────────────────────────────────────────────────────

/// Borrowed batch of model inputs
#[derive(Debug, Clone)]
pub struct PatchBatch<'a> {
    /// Normalised velocity patches (u, v, w)
    pub velocity: [ArrayView4<'a, f32>; 3],
    /// Magnitude patches (mag_u, mag_v, mag_w)
    pub magnitude: [ArrayView4<'a, f32>; 3],
}

impl<'a> PatchBatch<'a> {
    /// Number of patches in the batch
    pub fn len(&self) -> usize {
        self.velocity[0].len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape of a single input patch
    pub fn patch_shape(&self) -> (usize, usize, usize) {
        let (_, a, b, c) = self.velocity[0].dim();
        (a, b, c)
    }

    /// All six inputs in network order
    pub fn inputs(&self) -> [&ArrayView4<'a, f32>; 6] {
        let [u, v, w] = &self.velocity;
        let [mu, mv, mw] = &self.magnitude;
        [u, v, w, mu, mv, mw]
    }

    /// Check that all six inputs share one shape
    pub fn validate(&self) -> Result<()> {
        let expected = self.velocity[0].shape();
        for input in self.inputs() {
            if input.shape() != expected {
                return Err(Error::shape_mismatch("model input", expected, input.shape()));
            }
        }
        Ok(())
    }

    /// Output shape a conforming model must produce for this batch
    pub fn expected_output(&self, upsample: usize) -> [usize; 5] {
        let (a, b, c) = self.patch_shape();
        [self.len(), a * upsample, b, c, VELOCITY_COMPONENTS]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Temporal super-resolution network
pub trait FlowModel {
    /// Predict upsampled velocity patches for a batch
    ///
    /// # Returns
    ///
    /// Array of shape `(batch, P * up, P, P, 3)` with the last axis holding
    /// (u, v, w)
    fn predict(&self, batch: &PatchBatch<'_>) -> Result<Array5<f32>>;

    /// Integer factor applied to the first patch axis
    fn upsample_factor(&self) -> usize;

    /// Human readable model name for logs
    fn name(&self) -> &str;
}

impl<M: FlowModel + ?Sized> FlowModel for Box<M> {
    fn predict(&self, batch: &PatchBatch<'_>) -> Result<Array5<f32>> {
        (**self).predict(batch)
    }

    fn upsample_factor(&self) -> usize {
        (**self).upsample_factor()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame Repeat Model
// ─────────────────────────────────────────────────────────────────────────────

/// Baseline that repeats every input frame `upsample` times
///
/// Magnitudes are ignored. Useful for dry runs of the reconstruction
/// pipeline and as a deterministic model in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRepeatModel {
    upsample: usize,
}

impl FrameRepeatModel {
    pub fn new(upsample: usize) -> Result<Self> {
        if upsample == 0 {
            return Err(Error::invalid_input("Upsampling factor must be >= 1"));
        }
        Ok(FrameRepeatModel { upsample })
    }
}

impl FlowModel for FrameRepeatModel {
    fn predict(&self, batch: &PatchBatch<'_>) -> Result<Array5<f32>> {
        batch.validate()?;
        let [n, p0, p1, p2, c] = batch.expected_output(self.upsample);
        let mut out = Array5::<f32>::zeros((n, p0, p1, p2, c));

        for (component, input) in batch.velocity.iter().enumerate() {
            for repeat in 0..self.upsample {
                out.slice_mut(s![.., repeat..;self.upsample, .., .., component])
                    .assign(input);
            }
        }
        Ok(out)
    }

    fn upsample_factor(&self) -> usize {
        self.upsample
    }

    fn name(&self) -> &str {
        "frame-repeat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn stack(value: f32) -> Array4<f32> {
        Array4::from_shape_fn((2, 3, 2, 2), |(n, t, _, _)| value + (n * 10 + t) as f32)
    }

    #[test]
    fn test_frame_repeat_shape_and_values() {
        let (u, v, w) = (stack(0.0), stack(100.0), stack(200.0));
        let mag = Array4::<f32>::ones((2, 3, 2, 2));
        let batch = PatchBatch {
            velocity: [u.view(), v.view(), w.view()],
            magnitude: [mag.view(), mag.view(), mag.view()],
        };

        let model = FrameRepeatModel::new(2).unwrap();
        let out = model.predict(&batch).unwrap();
        assert_eq!(out.shape(), &[2, 6, 2, 2, 3]);

        // frame t of the input lands on output frames 2t and 2t + 1
        assert_eq!(out[[1, 4, 0, 0, 0]], u[[1, 2, 0, 0]]);
        assert_eq!(out[[1, 5, 0, 0, 0]], u[[1, 2, 0, 0]]);
        assert_eq!(out[[0, 1, 1, 1, 2]], w[[0, 0, 1, 1]]);
    }

    #[test]
    fn test_batch_validate_rejects_mixed_shapes() {
        let a = Array4::<f32>::zeros((2, 3, 2, 2));
        let b = Array4::<f32>::zeros((1, 3, 2, 2));
        let batch = PatchBatch {
            velocity: [a.view(), a.view(), a.view()],
            magnitude: [a.view(), b.view(), a.view()],
        };
        assert!(matches!(batch.validate(), Err(Error::ShapeMismatch { .. })));
        assert!(FrameRepeatModel::new(2).unwrap().predict(&batch).is_err());
    }

    #[test]
    fn test_zero_upsample_rejected() {
        assert!(FrameRepeatModel::new(0).is_err());
    }
}
