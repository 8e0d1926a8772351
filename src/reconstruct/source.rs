//! Frame sources
//!
//! A [`FrameSource`] hands out one [`FlowFrame`] per scan row. Implementors
//! normalise velocities by `venc` and report the noise floor
//! `velocity_per_px = venc / 2048`.

use crate::error::{Error, Result};
use crate::volume::{FlowFrame, ScanAxis, MAGNITUDE_KEYS, VELOCITY_KEYS};
use ndarray::Array4;

/// Quantisation steps across the velocity encoding range
pub const VENC_STEPS: f32 = 2048.0;

/// Noise floor for a given velocity encoding
pub fn velocity_per_px(venc: f32) -> f32 {
    venc / VENC_STEPS
}

/// Something frames can be loaded from, row by row
pub trait FrameSource {
    /// Full dataset shape `(t, x, y, z)`
    fn shape(&self) -> Result<(usize, usize, usize, usize)>;

    /// Load the frame at `row` perpendicular to `axis`
    fn load_frame(&self, axis: ScanAxis, row: usize) -> Result<FlowFrame>;

    /// Voxel spacing, if the dataset records one
    fn spacing(&self) -> Result<Option<[f64; 3]>>;

    /// Number of rows along `axis`
    fn row_count(&self, axis: ScanAxis) -> Result<usize> {
        Ok(axis.row_count(self.shape()?))
    }
}

/// Flow dataset held in memory
#[derive(Debug, Clone)]
pub struct InMemoryFlow {
    velocity: [Array4<f32>; 3],
    magnitude: [Array4<f32>; 3],
    venc: f32,
    dx: Option<[f64; 3]>,
}

impl InMemoryFlow {
    /// Wrap denormalised velocities and magnitudes of one shape
    pub fn new(velocity: [Array4<f32>; 3], magnitude: [Array4<f32>; 3], venc: f32) -> Result<Self> {
        let shape = velocity[0].shape().to_vec();
        for (name, channel) in VELOCITY_KEYS
            .iter()
            .chain(MAGNITUDE_KEYS.iter())
            .zip(velocity.iter().chain(magnitude.iter()))
        {
            if channel.shape() != shape.as_slice() {
                return Err(Error::shape_mismatch(
                    format!("dataset '{}'", name),
                    &shape,
                    channel.shape(),
                ));
            }
        }
        if !(venc.is_finite() && venc > 0.0) {
            return Err(Error::invalid_input(format!("venc must be positive, got {}", venc)));
        }
        Ok(InMemoryFlow {
            velocity,
            magnitude,
            venc,
            dx: None,
        })
    }

    pub fn with_spacing(mut self, dx: [f64; 3]) -> Self {
        self.dx = Some(dx);
        self
    }

    pub fn venc(&self) -> f32 {
        self.venc
    }
}

impl FrameSource for InMemoryFlow {
    fn shape(&self) -> Result<(usize, usize, usize, usize)> {
        Ok(self.velocity[0].dim())
    }

    fn load_frame(&self, axis: ScanAxis, row: usize) -> Result<FlowFrame> {
        let rows = self.row_count(axis)?;
        if row >= rows {
            return Err(Error::invalid_input(format!(
                "Row {} out of range for axis {} ({} rows)",
                row, axis, rows
            )));
        }
        let venc = self.venc;
        let velocity = self
            .velocity
            .each_ref()
            .map(|c| axis.slice_row(c.view(), row).mapv(|x| x / venc));
        let magnitude = self
            .magnitude
            .each_ref()
            .map(|c| axis.slice_row(c.view(), row).to_owned());

        Ok(FlowFrame::new(velocity, magnitude, venc, velocity_per_px(venc))?.with_spacing(self.dx))
    }

    fn spacing(&self) -> Result<Option<[f64; 3]>> {
        Ok(self.dx)
    }
}
