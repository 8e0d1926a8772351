//! ONNX Runtime backend for [`FlowModel`]
//!
//! The exported network must take six `(batch, P, P, P)` float inputs in the
//! order u, v, w, mag_u, mag_v, mag_w and produce one
//! `(batch, P * up, P, P, 3)` float output.

use super::{FlowModel, PatchBatch};
use crate::error::{Error, Result};
use ndarray::{Array5, Ix5};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
    session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session},
    value::Tensor,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Compute device for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    /// CUDA GPU with device index
    Cuda(usize),
}

/// Graph optimization level, kept free of ort types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptimizationLevel {
    Disable,
    Basic,
    Extended,
    #[default]
    All,
}

impl From<OptimizationLevel> for GraphOptimizationLevel {
    fn from(level: OptimizationLevel) -> Self {
        match level {
            OptimizationLevel::Disable => GraphOptimizationLevel::Disable,
            OptimizationLevel::Basic => GraphOptimizationLevel::Level1,
            OptimizationLevel::Extended => GraphOptimizationLevel::Level2,
            OptimizationLevel::All => GraphOptimizationLevel::Level3,
        }
    }
}

/// Session settings for [`OnnxFlowModel`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub device: Device,
    pub optimization_level: OptimizationLevel,
    /// Intra-op threads (0 = runtime default)
    pub num_threads: usize,
    /// Temporal upsampling factor the network was trained for
    pub upsample: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            device: Device::Cpu,
            optimization_level: OptimizationLevel::All,
            num_threads: 0,
            upsample: 2,
        }
    }
}

impl ModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }

    pub fn with_num_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    pub fn with_upsample(mut self, upsample: usize) -> Self {
        self.upsample = upsample;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model
// ─────────────────────────────────────────────────────────────────────────────

/// Super-resolution network loaded from an `.onnx` file
pub struct OnnxFlowModel {
    session: Mutex<Session>,
    output_name: String,
    name: String,
    config: ModelConfig,
}

impl OnnxFlowModel {
    /// Load a model from `path`
    pub fn load(path: &Path, config: ModelConfig) -> Result<Self> {
        if config.upsample == 0 {
            return Err(Error::config("Model upsampling factor must be >= 1"));
        }

        let session = create_session(path, &config)?;
        if session.inputs.len() != 6 {
            return Err(Error::model(format!(
                "Expected 6 model inputs, found {}",
                session.inputs.len()
            )));
        }
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| Error::model("Session has no outputs"))?;

        info!(
            "Loaded model {} ({:?}, output '{}')",
            path.display(),
            config.device,
            output_name
        );

        Ok(OnnxFlowModel {
            session: Mutex::new(session),
            output_name,
            name: model_name(path),
            config,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

fn model_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| PathBuf::from(path).display().to_string())
}

fn create_session(path: &Path, config: &ModelConfig) -> Result<Session> {
    let load_err = |stage: &str, e: ort::Error| {
        Error::model(format!("{} ({}): {}", stage, path.display(), e))
    };

    let mut builder =
        Session::builder().map_err(|e| load_err("Failed to create session builder", e))?;
    builder = builder
        .with_optimization_level(config.optimization_level.into())
        .map_err(|e| load_err("Failed to set optimization level", e))?;
    if config.num_threads > 0 {
        builder = builder
            .with_intra_threads(config.num_threads)
            .map_err(|e| load_err("Failed to set thread count", e))?;
    }
    builder = configure_execution_providers(builder, config.device)
        .map_err(|e| load_err("Failed to configure execution providers", e))?;

    builder
        .commit_from_file(path)
        .map_err(|e| load_err("Failed to load model", e))
}

fn configure_execution_providers(
    builder: SessionBuilder,
    device: Device,
) -> std::result::Result<SessionBuilder, ort::Error> {
    match device {
        Device::Cpu => builder.with_execution_providers([CPUExecutionProvider::default().build()]),
        Device::Cuda(id) => builder.with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(id as i32)
                .build(),
            CPUExecutionProvider::default().build(),
        ]),
    }
}

impl FlowModel for OnnxFlowModel {
    fn predict(&self, batch: &PatchBatch<'_>) -> Result<Array5<f32>> {
        batch.validate()?;

        let tensor = |view: &ndarray::ArrayView4<'_, f32>| {
            Tensor::from_array(view.to_owned())
                .map_err(|e| Error::model(format!("Failed to create input tensor: {}", e)))
        };
        let [u, v, w, mu, mv, mw] = batch.inputs();
        let (u, v, w) = (tensor(u)?, tensor(v)?, tensor(w)?);
        let (mu, mv, mw) = (tensor(mu)?, tensor(mv)?, tensor(mw)?);

        let mut session = self
            .session
            .lock()
            .map_err(|_| Error::model("Failed to acquire session lock"))?;
        let outputs = session
            .run(ort::inputs![u, v, w, mu, mv, mw])
            .map_err(|e| Error::model(format!("Inference failed: {}", e)))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| Error::model(format!("Output '{}' not found", self.output_name)))?;
        let array = output
            .try_extract_array::<f32>()
            .map_err(|e| Error::model(format!("Failed to extract tensor: {}", e)))?;

        debug!("{} predicted batch of {} -> {:?}", self.name, batch.len(), array.shape());

        array
            .to_owned()
            .into_dimensionality::<Ix5>()
            .map_err(|e| Error::model(format!("Expected 5D output: {}", e)))
    }

    fn upsample_factor(&self) -> usize {
        self.config.upsample
    }

    fn name(&self) -> &str {
        &self.name
    }
}
