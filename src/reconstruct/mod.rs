//! Three-axis ensemble reconstruction
//!
//! Every configured [`ScanAxis`] is swept row by row. Each row is a 3D frame
//! `(t, a, b)` that is patchified, passed through the model in fixed-size
//! batches, stitched back and written into a `(t * up, x, y, z)` volume. The
//! per-axis volumes are summed and divided by the number of axes used.
//!
//! ```text
//! for axis in axes:
//!     for row in 0..rows(axis):
//!         frame   = source.load_frame(axis, row)
//!         patches = sampler.patchify(frame)
//!         preds   = model.predict(batch) ...       (n, P*up, P, P, 3)
//!         u, v, w = stitch(preds[..., c]) * venc
//!         volume[axis, row] = (u, v, w)
//!     ensemble += volume
//! ensemble /= len(axes)
//! ```
//!
//! Rows and axes are processed sequentially with a single writer.

pub mod config;
pub mod source;

use crate::error::{Error, Result};
use crate::model::FlowModel;
use crate::patch::{PatchSet, PatchStitcher, VolumeSampler};
use crate::volume::{FlowFrame, ScanAxis, VelocityVolume};
use ndarray::{concatenate, Array3, Array5, ArrayView5, Axis};
use std::time::Instant;
use tracing::{debug, info};

pub use config::ReconstructionConfig;
pub use source::{velocity_per_px, FrameSource, InMemoryFlow};

/// Run the model over a patch set in batches of `batch_size`
///
/// Batches are processed in order and concatenated along the patch axis.
/// Every model output is checked against `(batch, P * up, P, P, 3)`.
pub fn predict_patches<M: FlowModel + ?Sized>(
    model: &M,
    patches: &PatchSet,
    batch_size: usize,
) -> Result<Array5<f32>> {
    if batch_size == 0 {
        return Err(Error::invalid_input("Batch size must be >= 1"));
    }
    let total = patches.len();
    let upsample = model.upsample_factor();
    let start_time = Instant::now();

    let mut results: Vec<Array5<f32>> = Vec::with_capacity(total.div_ceil(batch_size));
    for start in (0..total).step_by(batch_size) {
        let batch = patches.batch(start, start + batch_size);
        let prediction = model.predict(&batch)?;

        let expected = batch.expected_output(upsample);
        if prediction.shape() != &expected[..] {
            return Err(Error::shape_mismatch(
                format!("{} output", model.name()),
                &expected,
                prediction.shape(),
            ));
        }
        debug!(
            "Processed {}/{} patches, elapsed {:.2}s",
            start + batch.len(),
            total,
            start_time.elapsed().as_secs_f64()
        );
        results.push(prediction);
    }

    if results.is_empty() {
        return Err(Error::invalid_input("No patches to predict"));
    }
    let views: Vec<ArrayView5<'_, f32>> = results.iter().map(|r| r.view()).collect();
    concatenate(Axis(0), &views).map_err(|e| Error::model(format!("Failed to join batches: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Ensemble
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a multi-axis reconstruction
#[derive(Debug, Clone)]
pub struct Ensemble {
    /// Averaged velocity volume `(t * up, x, y, z)`
    pub volume: VelocityVolume,
    /// Axes that contributed, in processing order
    pub axes_used: Vec<ScanAxis>,
    /// Input spacing divided by the upsampling factor
    pub spacing: Option<[f64; 3]>,
}

/// Drives per-row reconstruction along one or more scan axes
pub struct AxisEnsembler<M: FlowModel> {
    model: M,
    sampler: VolumeSampler,
    config: ReconstructionConfig,
}

impl<M: FlowModel> AxisEnsembler<M> {
    /// Create an ensembler; the model factor must equal `config.res_increase`
    pub fn new(model: M, config: ReconstructionConfig) -> Result<Self> {
        config.validate()?;
        if model.upsample_factor() != config.res_increase {
            return Err(Error::config(format!(
                "Model '{}' upsamples by {} but res_increase is {}",
                model.name(),
                model.upsample_factor(),
                config.res_increase
            )));
        }
        let sampler = VolumeSampler::new(config.patch_size, config.overlap)?;
        Ok(AxisEnsembler {
            model,
            sampler,
            config,
        })
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Super-resolve a single frame into denormalised (u, v, w)
    pub fn reconstruct_frame(&self, frame: &FlowFrame) -> Result<[Array3<f32>; 3]> {
        let patches = self.sampler.patchify(frame)?;
        let predictions = predict_patches(&self.model, &patches, self.config.batch_size)?;
        let stitcher = PatchStitcher::new(patches.grid, self.config.res_increase)?;

        let venc = frame.venc();
        let floor = frame.velocity_per_px();
        let round = self.config.round_small_values;

        let stitch_component = |component: usize| -> Result<Array3<f32>> {
            let mut v = stitcher.stitch(predictions.index_axis(Axis(4), component))?;
            v.mapv_inplace(|x| {
                let x = x * venc;
                if round && x.abs() < floor {
                    0.0
                } else {
                    x
                }
            });
            Ok(v)
        };

        Ok([stitch_component(0)?, stitch_component(1)?, stitch_component(2)?])
    }

    /// Sweep every row along `axis` into a full upsampled volume
    pub fn reconstruct_axis<S: FrameSource + ?Sized>(
        &self,
        source: &S,
        axis: ScanAxis,
    ) -> Result<VelocityVolume> {
        let (t, x, y, z) = source.shape()?;
        let rows = source.row_count(axis)?;
        let mut volume = VelocityVolume::zeros((t * self.config.res_increase, x, y, z));

        info!("Reconstructing axis {} ({} rows)", axis, rows);
        let start_time = Instant::now();
        for row in 0..rows {
            let frame = source.load_frame(axis, row)?;
            let components = self.reconstruct_frame(&frame)?;
            for (target, stitched) in volume.components_mut().into_iter().zip(components.iter()) {
                axis.write_row(&mut target.view_mut(), row, &stitched.view())?;
            }
            debug!(
                "Axis {}: processed row {}/{} ({:.2}s)",
                axis,
                row + 1,
                rows,
                start_time.elapsed().as_secs_f64()
            );
        }
        Ok(volume)
    }

    /// Reconstruct along every configured axis and average the results
    pub fn reconstruct<S: FrameSource + ?Sized>(&self, source: &S) -> Result<Ensemble> {
        let (t, x, y, z) = source.shape()?;
        let mut sum = VelocityVolume::zeros((t * self.config.res_increase, x, y, z));

        for &axis in &self.config.axes {
            let volume = self.reconstruct_axis(source, axis)?;
            sum.accumulate(&volume)?;
        }
        sum.scale(1.0 / self.config.axes.len() as f32);

        let factor = self.config.res_increase as f64;
        let spacing = source.spacing()?.map(|dx| dx.map(|d| d / factor));

        info!(
            "Ensembled {} axes into volume {:?}",
            self.config.axes.len(),
            sum.shape()
        );
        Ok(Ensemble {
            volume: sum,
            axes_used: self.config.axes.clone(),
            spacing,
        })
    }
}
