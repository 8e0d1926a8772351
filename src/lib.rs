//! flowsr - data preparation and reassembly for 4D flow super-resolution
//!
//! flowsr prepares time-resolved volumetric velocity fields
//! (`time × x × y × z`, three velocity components plus three magnitude
//! channels) for a temporal super-resolution network and reassembles its
//! predictions.
//!
//! # Architecture
//!
//! - `volume`: flow frames, scan axes and masks
//! - `patch`: cutting frames into overlapping patches and stitching them back
//! - `model`: the network boundary ([`model::FlowModel`])
//! - `reconstruct`: per-axis reconstruction and the three-axis ensemble
//! - `temporal`: periodic downsampling, averaging, smoothing, interpolation
//! - `metrics`: evaluation of super-resolved flow against ground truth
//! - `storage`: key/array persistence backends

pub mod error;
pub mod metrics;
pub mod model;
pub mod patch;
pub mod reconstruct;
pub mod storage;
pub mod temporal;
pub mod volume;

pub use error::{Error, Result};

/// flowsr version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;

/// Configuration for the flowsr library
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Maximum number of threads to use for parallel processing
    pub max_threads: Option<usize>,
    /// Enable verbose logging
    pub verbose: bool,
    /// Enable debug output
    pub debug: bool,
}

/// Initialize the flowsr library with the given configuration
///
/// `max_threads` sizes the global rayon pool used by temporal smoothing.
/// Logging is only installed when `verbose` or `debug` is set, so library
/// users keep control of their own subscriber otherwise. Calling `init`
/// again after a pool or subscriber was installed fails with [`Error::Init`].
pub fn init(config: Config) -> Result<()> {
    if let Some(threads) = config.max_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| Error::Init(format!("Failed to initialize thread pool: {}", e)))?;
    }

    if config.verbose || config.debug {
        let level = if config.debug { "debug" } else { "info" };
        tracing_subscriber::fmt()
            .with_env_filter(level)
            .try_init()
            .map_err(|e| Error::Init(format!("Failed to initialize logging: {}", e)))?;
    }

    Ok(())
}
