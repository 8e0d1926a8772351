//! Reconstruction parameters

use crate::error::{Error, Result};
use crate::patch::sampler::{DEFAULT_PATCH_OVERLAP, DEFAULT_PATCH_SIZE};
use crate::volume::ScanAxis;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default temporal upsampling factor
pub const DEFAULT_RES_INCREASE: usize = 2;

/// Default number of patches per model call
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// Settings for patch-based super-resolution of a whole volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Edge length of the cubic patches fed to the model
    pub patch_size: usize,
    /// Overlap between neighbouring patches
    pub overlap: usize,
    /// Temporal upsampling factor of the model
    pub res_increase: usize,
    /// Patches per model call
    pub batch_size: usize,
    /// Zero out denormalised velocities below the dataset noise floor
    pub round_small_values: bool,
    /// Scan axes that take part in the ensemble
    pub axes: Vec<ScanAxis>,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        ReconstructionConfig {
            patch_size: DEFAULT_PATCH_SIZE,
            overlap: DEFAULT_PATCH_OVERLAP,
            res_increase: DEFAULT_RES_INCREASE,
            batch_size: DEFAULT_BATCH_SIZE,
            round_small_values: true,
            axes: ScanAxis::all().to_vec(),
        }
    }
}

impl ReconstructionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON config file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: ReconstructionConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_patch_size(mut self, patch_size: usize) -> Self {
        self.patch_size = patch_size;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_res_increase(mut self, res_increase: usize) -> Self {
        self.res_increase = res_increase;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_round_small_values(mut self, enable: bool) -> Self {
        self.round_small_values = enable;
        self
    }

    pub fn with_axes(mut self, axes: Vec<ScanAxis>) -> Self {
        self.axes = axes;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.patch_size == 0 {
            return Err(Error::config("patch_size must be >= 1"));
        }
        if self.overlap >= self.patch_size {
            return Err(Error::config(format!(
                "overlap ({}) must be smaller than patch_size ({})",
                self.overlap, self.patch_size
            )));
        }
        if self.res_increase == 0 {
            return Err(Error::config("res_increase must be >= 1"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be >= 1"));
        }
        if self.axes.is_empty() {
            return Err(Error::config("at least one scan axis is required"));
        }
        let mut seen = self.axes.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.axes.len() {
            return Err(Error::config(format!("duplicate scan axes in {:?}", self.axes)));
        }
        Ok(())
    }
}
