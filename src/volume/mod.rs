//! Volumetric flow data model
//!
//! A flow dataset is a set of 4D arrays laid out as `(time, x, y, z)`:
//! three velocity components (`u`, `v`, `w`) and three magnitude channels.
//! Reconstruction works on 3D *frames* cut perpendicular to a [`ScanAxis`];
//! such a frame keeps the time axis first, followed by the two remaining
//! spatial axes.
//!
//! ## Layout
//!
//! ```text
//! volume (T, X, Y, Z)
//!   ScanAxis::X, row r -> frame (T, Y, Z) = volume[:, r, :, :]
//!   ScanAxis::Y, row r -> frame (T, X, Z) = volume[:, :, r, :]
//!   ScanAxis::Z, row r -> frame (T, X, Y) = volume[:, :, :, r]
//! ```

pub mod mask;

use crate::error::{Error, Result};
use ndarray::{s, Array3, Array4, ArrayD, ArrayView3, ArrayView4, ArrayViewMut4, Ix3, Ix4};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use mask::{temporal_mask, TemporalMask};

/// Velocity component names in storage order
pub const VELOCITY_KEYS: [&str; 3] = ["u", "v", "w"];

/// Magnitude channel names in storage order
pub const MAGNITUDE_KEYS: [&str; 3] = ["mag_u", "mag_v", "mag_w"];

// ─────────────────────────────────────────────────────────────────────────────
// Rank checks
// ─────────────────────────────────────────────────────────────────────────────

/// Convert a dynamic-rank array into a 4D `(time, x, y, z)` array
pub fn ensure_4d<T>(array: ArrayD<T>) -> Result<Array4<T>> {
    let ndim = array.ndim();
    array
        .into_dimensionality::<Ix4>()
        .map_err(|_| Error::invalid_input(format!("Input should be 4D, got {} dimensions", ndim)))
}

/// Convert a dynamic-rank array into a 3D array
pub fn ensure_3d<T>(array: ArrayD<T>) -> Result<Array3<T>> {
    let ndim = array.ndim();
    array
        .into_dimensionality::<Ix3>()
        .map_err(|_| Error::invalid_input(format!("Input should be 3D, got {} dimensions", ndim)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Scan Axis
// ─────────────────────────────────────────────────────────────────────────────

/// Spatial axis iterated row by row during reconstruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum ScanAxis {
    /// First spatial dimension (array axis 1)
    X,
    /// Second spatial dimension (array axis 2)
    Y,
    /// Third spatial dimension (array axis 3)
    Z,
}

impl ScanAxis {
    /// All three scan axes in order
    pub fn all() -> [ScanAxis; 3] {
        [ScanAxis::X, ScanAxis::Y, ScanAxis::Z]
    }

    /// Spatial index of this axis (0, 1 or 2)
    pub fn index(&self) -> usize {
        match self {
            ScanAxis::X => 0,
            ScanAxis::Y => 1,
            ScanAxis::Z => 2,
        }
    }

    /// Number of rows along this axis for a `(t, x, y, z)` shape
    pub fn row_count(&self, shape: (usize, usize, usize, usize)) -> usize {
        match self {
            ScanAxis::X => shape.1,
            ScanAxis::Y => shape.2,
            ScanAxis::Z => shape.3,
        }
    }

    /// Cut the 3D frame at `row` perpendicular to this axis
    pub fn slice_row<'a>(&self, volume: ArrayView4<'a, f32>, row: usize) -> ArrayView3<'a, f32> {
        match self {
            ScanAxis::X => volume.slice_move(s![.., row, .., ..]),
            ScanAxis::Y => volume.slice_move(s![.., .., row, ..]),
            ScanAxis::Z => volume.slice_move(s![.., .., .., row]),
        }
    }

    /// Write a reconstructed frame back into the 4D volume at `row`
    ///
    /// The frame shape must match the slice exactly.
    pub fn write_row(
        &self,
        target: &mut ArrayViewMut4<'_, f32>,
        row: usize,
        frame: &ArrayView3<'_, f32>,
    ) -> Result<()> {
        let mut dest = match self {
            ScanAxis::X => target.slice_mut(s![.., row, .., ..]),
            ScanAxis::Y => target.slice_mut(s![.., .., row, ..]),
            ScanAxis::Z => target.slice_mut(s![.., .., .., row]),
        };
        if dest.shape() != frame.shape() {
            return Err(Error::shape_mismatch(
                format!("write row {} along axis {}", row, self),
                dest.shape(),
                frame.shape(),
            ));
        }
        dest.assign(frame);
        Ok(())
    }
}

impl TryFrom<usize> for ScanAxis {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self> {
        match value {
            0 => Ok(ScanAxis::X),
            1 => Ok(ScanAxis::Y),
            2 => Ok(ScanAxis::Z),
            _ => Err(Error::invalid_input(format!(
                "Scan axis must be 0, 1 or 2, got {}",
                value
            ))),
        }
    }
}

impl From<ScanAxis> for usize {
    fn from(axis: ScanAxis) -> usize {
        axis.index()
    }
}

impl fmt::Display for ScanAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Flow Frame
// ─────────────────────────────────────────────────────────────────────────────

/// One 3D frame of a flow dataset, ready for patch sampling
///
/// Velocities are stored normalised by `venc`; magnitudes are stored as read.
/// The frame is an immutable value produced by a load operation and passed
/// through the pipeline by argument.
#[derive(Debug, Clone)]
pub struct FlowFrame {
    velocity: [Array3<f32>; 3],
    magnitude: [Array3<f32>; 3],
    venc: f32,
    velocity_per_px: f32,
    dx: Option<[f64; 3]>,
}

impl FlowFrame {
    /// Build a frame from already-normalised velocities and magnitudes
    pub fn new(
        velocity: [Array3<f32>; 3],
        magnitude: [Array3<f32>; 3],
        venc: f32,
        velocity_per_px: f32,
    ) -> Result<Self> {
        let shape = velocity[0].shape().to_vec();
        for (name, channel) in VELOCITY_KEYS
            .iter()
            .chain(MAGNITUDE_KEYS.iter())
            .zip(velocity.iter().chain(magnitude.iter()))
        {
            if channel.shape() != shape.as_slice() {
                return Err(Error::shape_mismatch(
                    format!("flow frame channel '{}'", name),
                    &shape,
                    channel.shape(),
                ));
            }
        }
        if !(venc.is_finite() && venc > 0.0) {
            return Err(Error::invalid_input(format!(
                "venc must be a positive finite value, got {}",
                venc
            )));
        }

        Ok(FlowFrame {
            velocity,
            magnitude,
            venc,
            velocity_per_px,
            dx: None,
        })
    }

    /// Attach voxel spacing metadata
    pub fn with_spacing(mut self, dx: Option<[f64; 3]>) -> Self {
        self.dx = dx;
        self
    }

    /// Frame shape `(time, a, b)`
    pub fn shape(&self) -> (usize, usize, usize) {
        self.velocity[0].dim()
    }

    /// Normalised velocity channels (u, v, w)
    pub fn velocity(&self) -> &[Array3<f32>; 3] {
        &self.velocity
    }

    /// Magnitude channels (mag_u, mag_v, mag_w)
    pub fn magnitude(&self) -> &[Array3<f32>; 3] {
        &self.magnitude
    }

    /// Velocity encoding scale
    pub fn venc(&self) -> f32 {
        self.venc
    }

    /// Noise floor below which denormalised velocities are zeroed
    pub fn velocity_per_px(&self) -> f32 {
        self.velocity_per_px
    }

    /// Voxel spacing, when the dataset carries it
    pub fn dx(&self) -> Option<[f64; 3]> {
        self.dx
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Velocity Volume
// ─────────────────────────────────────────────────────────────────────────────

/// Three 4D velocity components sharing one shape
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityVolume {
    pub u: Array4<f32>,
    pub v: Array4<f32>,
    pub w: Array4<f32>,
}

impl VelocityVolume {
    /// Zero-initialised volume of the given `(t, x, y, z)` shape
    pub fn zeros(shape: (usize, usize, usize, usize)) -> Self {
        VelocityVolume {
            u: Array4::zeros(shape),
            v: Array4::zeros(shape),
            w: Array4::zeros(shape),
        }
    }

    /// Shape shared by all components
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.u.dim()
    }

    /// Components in (u, v, w) order
    pub fn components(&self) -> [&Array4<f32>; 3] {
        [&self.u, &self.v, &self.w]
    }

    /// Mutable components in (u, v, w) order
    pub fn components_mut(&mut self) -> [&mut Array4<f32>; 3] {
        [&mut self.u, &mut self.v, &mut self.w]
    }

    /// Element-wise accumulate another volume of the same shape
    pub fn accumulate(&mut self, other: &VelocityVolume) -> Result<()> {
        if self.shape() != other.shape() {
            let (a, b) = (self.shape(), other.shape());
            return Err(Error::shape_mismatch(
                "velocity accumulation",
                &[a.0, a.1, a.2, a.3],
                &[b.0, b.1, b.2, b.3],
            ));
        }
        self.u += &other.u;
        self.v += &other.v;
        self.w += &other.w;
        Ok(())
    }

    /// Multiply every component by a scalar
    pub fn scale(&mut self, factor: f32) {
        for component in self.components_mut() {
            component.mapv_inplace(|x| x * factor);
        }
    }
}
