//! flowsr CLI - 4D flow super-resolution data preparation
//!
//! Temporal resampling of velocity series, three-axis patch reconstruction
//! and evaluation of the results.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use flowsr_lib::metrics::{k_r2, mean_speed, relative_error, rmse, Normalization};
use flowsr_lib::model::{FlowModel, FrameRepeatModel};
use flowsr_lib::reconstruct::{AxisEnsembler, ReconstructionConfig};
use flowsr_lib::storage::dataset::COMBINED_KEYS;
use flowsr_lib::storage::{merge_stores, open_store, save_ensemble, ArrayStore, FlowDataset, StoredArray};
use flowsr_lib::temporal::{
    box_smoothing, cartesian_downsample, grid_interpolate_to, interleaved_box_smoothing,
    linear_interpolate_fast, temporal_averaging, InterpolationMethod,
};
use flowsr_lib::volume::{ensure_4d, ScanAxis, TemporalMask, VelocityVolume, VELOCITY_KEYS};
use flowsr_lib::{init, Config, Error};
use ndarray::{Array4, ArrayView4, Axis};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "flowsr")]
#[command(about = "flowsr - 4D flow MRI super-resolution toolkit", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Number of threads to use
    #[arg(short = 't', long)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the keys and shapes stored in a file
    Info {
        /// Input file path
        input: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Keep every n-th frame of the velocity series
    Downsample {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Keep one frame out of this many
        #[arg(short, long, default_value = "2")]
        factor: usize,

        /// Index of the first kept frame
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Copy the remaining keys of the input into the output
        #[arg(long)]
        merge: bool,
    },

    /// Periodic windowed mean over neighbouring frames
    Average {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Window length in frames
        #[arg(short, long, default_value = "3")]
        radius: usize,

        #[arg(long)]
        merge: bool,
    },

    /// Periodic soft box-kernel smoothing
    Smooth {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Logistic edge width of the kernel, in cycle time units
        #[arg(short, long, default_value = "0.004")]
        sigma: f64,

        /// Time of the first frame
        #[arg(long, default_value = "0.0")]
        cycle_start: f64,

        /// Time of the last frame
        #[arg(long, default_value = "1.0")]
        cycle_end: f64,

        /// Smooth this many interleaved sub-series separately
        #[arg(long)]
        interleave: Option<usize>,

        #[arg(long)]
        merge: bool,
    },

    /// Temporal upsampling baseline
    Interpolate {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Interpolation kernel (nearest, linear, cubic)
        #[arg(short, long, default_value = "linear")]
        method: InterpolationMethod,

        /// Output frame count (defaults to twice the input)
        #[arg(long)]
        frames: Option<usize>,

        /// Use the two-tap linear shortcut
        #[arg(long)]
        fast: bool,

        #[arg(long)]
        merge: bool,
    },

    /// Reconstruct a super-resolved series from three scan axes
    Predict {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Reconstruction settings as JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// ONNX network (falls back to frame repetition without one)
        #[arg(short, long)]
        model: Option<PathBuf>,

        #[arg(long)]
        patch_size: Option<usize>,

        #[arg(long)]
        overlap: Option<usize>,

        #[arg(long)]
        res_increase: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Scan axes to ensemble (0 = x, 1 = y, 2 = z)
        #[arg(long, value_delimiter = ',')]
        axes: Option<Vec<usize>>,

        /// Keep values below one velocity step
        #[arg(long)]
        no_round: bool,

        /// Deflate level for HDF5 outputs
        #[arg(long)]
        compression: Option<u8>,
    },

    /// Compare a prediction against ground truth
    Evaluate {
        /// Predicted series
        #[arg(short, long)]
        prediction: PathBuf,

        /// Ground truth series holding u, v, w and the mask
        #[arg(short, long)]
        ground_truth: PathBuf,

        /// Read u_combined, v_combined, w_combined from the prediction
        #[arg(long)]
        combined: bool,

        /// Key of the fluid mask in the ground truth
        #[arg(long, default_value = "mask")]
        mask_key: String,

        #[arg(long, value_enum, default_value = "tanh")]
        normalization: NormalizationArg,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Copy keys missing from the target out of the source
    Merge {
        #[arg(short, long)]
        target: PathBuf,

        #[arg(short, long)]
        source: PathBuf,
    },

    /// Remove keys from a file
    Delete {
        input: PathBuf,

        /// Keys to remove
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum NormalizationArg {
    Tanh,
    Clip,
}

impl From<NormalizationArg> for Normalization {
    fn from(arg: NormalizationArg) -> Self {
        match arg {
            NormalizationArg::Tanh => Normalization::Tanh,
            NormalizationArg::Clip => Normalization::Clip,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config {
        max_threads: cli.threads,
        verbose: cli.verbose,
        debug: cli.debug,
    };
    init(config)?;

    info!("flowsr v{}", flowsr_lib::VERSION);

    match cli.command {
        Commands::Info { input, json } => {
            cmd_info(&input, json)?;
        }
        Commands::Downsample {
            input,
            output,
            factor,
            offset,
            merge,
        } => {
            Resample::new(&input, &output, merge)
                .run(|series| Ok(cartesian_downsample(series, factor, offset)?))?;
        }
        Commands::Average {
            input,
            output,
            radius,
            merge,
        } => {
            Resample::new(&input, &output, merge).run(|series| Ok(temporal_averaging(series, radius)?))?;
        }
        Commands::Smooth {
            input,
            output,
            sigma,
            cycle_start,
            cycle_end,
            interleave,
            merge,
        } => {
            cmd_smooth(&input, &output, sigma, (cycle_start, cycle_end), interleave, merge)?;
        }
        Commands::Interpolate {
            input,
            output,
            method,
            frames,
            fast,
            merge,
        } => {
            Resample::new(&input, &output, merge).run(|series| {
                let target = frames.unwrap_or(2 * series.len_of(Axis(0)));
                if fast {
                    Ok(linear_interpolate_fast(series, target)?)
                } else {
                    Ok(grid_interpolate_to(series, target, method)?)
                }
            })?;
        }
        Commands::Predict {
            input,
            output,
            config,
            model,
            patch_size,
            overlap,
            res_increase,
            batch_size,
            axes,
            no_round,
            compression,
        } => {
            let mut settings = match config {
                Some(path) => ReconstructionConfig::from_json_file(&path)?,
                None => ReconstructionConfig::new(),
            };
            if let Some(p) = patch_size {
                settings = settings.with_patch_size(p);
            }
            if let Some(o) = overlap {
                settings = settings.with_overlap(o);
            }
            if let Some(r) = res_increase {
                settings = settings.with_res_increase(r);
            }
            if let Some(b) = batch_size {
                settings = settings.with_batch_size(b);
            }
            if let Some(axes) = axes {
                let axes = axes
                    .into_iter()
                    .map(ScanAxis::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                settings = settings.with_axes(axes);
            }
            if no_round {
                settings = settings.with_round_small_values(false);
            }
            cmd_predict(&input, &output, settings, model.as_deref(), compression)?;
        }
        Commands::Evaluate {
            prediction,
            ground_truth,
            combined,
            mask_key,
            normalization,
            json,
        } => {
            cmd_evaluate(&prediction, &ground_truth, combined, &mask_key, normalization.into(), json)?;
        }
        Commands::Merge { target, source } => {
            cmd_merge(&target, &source)?;
        }
        Commands::Delete { input, keys } => {
            cmd_delete(&input, &keys)?;
        }
    }

    Ok(())
}

fn cmd_info(input: &Path, json: bool) -> anyhow::Result<()> {
    let store = open_store(input)?;
    let keys = store
        .keys(input)
        .with_context(|| format!("Failed to open {}", input.display()))?;

    let mut entries = Vec::with_capacity(keys.len());
    for key in &keys {
        let array = store.load(input, key)?;
        let dtype = if array.is_f64() { "f64" } else { "f32" };
        entries.push((key.clone(), array.shape().to_vec(), dtype, array.max()));
    }

    if json {
        let document: Vec<_> = entries
            .iter()
            .map(|(key, shape, dtype, max)| {
                json!({ "key": key, "shape": shape, "dtype": dtype, "max": max })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    println!("File: {}", input.display());
    println!("Keys: {}", entries.len());
    println!();
    for (key, shape, dtype, max) in &entries {
        print!("  {:<12} {:?} {}", key, shape, dtype);
        if let Some(max) = max {
            print!("  max {:.4}", max);
        }
        println!();
    }
    Ok(())
}

/// Applies one series transform to u, v and w of an input file
struct Resample<'a> {
    input: &'a Path,
    output: &'a Path,
    merge: bool,
}

impl<'a> Resample<'a> {
    fn new(input: &'a Path, output: &'a Path, merge: bool) -> Self {
        Resample { input, output, merge }
    }

    fn run<F>(&self, transform: F) -> anyhow::Result<()>
    where
        F: Fn(ArrayView4<'_, f32>) -> anyhow::Result<Array4<f32>>,
    {
        let source = open_store(self.input)?;
        let target = open_store(self.output)?;
        target.ensure_absent(self.output)?;

        for key in VELOCITY_KEYS {
            let series = load_series(&*source, self.input, key)?;
            let result = transform(series.view())
                .with_context(|| format!("Failed to resample '{}'", key))?;
            info!("{}: {:?} -> {:?}", key, series.dim(), result.dim());
            target.save(self.output, key, StoredArray::F32(result.into_dyn()), None)?;
        }

        if self.merge {
            let added = merge_stores(&*target, self.output, &*source, self.input)?;
            info!("Merged {} keys from {}", added.len(), self.input.display());
        }
        println!("Wrote {}", self.output.display());
        Ok(())
    }
}

fn load_series(store: &dyn ArrayStore, path: &Path, key: &str) -> anyhow::Result<Array4<f32>> {
    let array = store
        .load(path, key)
        .with_context(|| format!("Failed to load '{}' from {}", key, path.display()))?;
    Ok(ensure_4d(array.into_f32())?)
}

fn cmd_smooth(
    input: &Path,
    output: &Path,
    sigma: f64,
    cycle: (f64, f64),
    interleave: Option<usize>,
    merge: bool,
) -> anyhow::Result<()> {
    Resample::new(input, output, merge).run(|series| {
        let frames = series.len_of(Axis(0));
        let t_range = cycle_times(cycle, frames);
        match interleave {
            Some(stride) => Ok(interleaved_box_smoothing(series, &t_range, sigma, stride)?),
            None => Ok(box_smoothing(series, &t_range, sigma)?),
        }
    })
}

/// `frames` acquisition times evenly spread over `[start, end]`
fn cycle_times((start, end): (f64, f64), frames: usize) -> Vec<f64> {
    if frames < 2 {
        return vec![start; frames];
    }
    let step = (end - start) / (frames - 1) as f64;
    (0..frames).map(|i| start + i as f64 * step).collect()
}

fn cmd_predict(
    input: &Path,
    output: &Path,
    settings: ReconstructionConfig,
    model_path: Option<&Path>,
    compression: Option<u8>,
) -> anyhow::Result<()> {
    let model = load_model(model_path, settings.res_increase)?;
    info!("Using model '{}'", model.name());

    let source_store = open_store(input)?;
    let target_store = open_store(output)?;
    target_store.ensure_absent(output)?;

    let dataset = FlowDataset::open(&*source_store, input)?;
    let ensembler = AxisEnsembler::new(model, settings)?;
    let ensemble = ensembler.reconstruct(&dataset)?;

    save_ensemble(&*target_store, output, &ensemble, compression)?;
    println!(
        "Wrote {:?} from axes {:?} to {}",
        ensemble.volume.shape(),
        ensemble.axes_used.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
        output.display()
    );
    Ok(())
}

#[cfg(feature = "onnx")]
fn load_model(path: Option<&Path>, upsample: usize) -> anyhow::Result<Box<dyn FlowModel>> {
    use flowsr_lib::model::{ModelConfig, OnnxFlowModel};

    match path {
        Some(path) => {
            let config = ModelConfig::new().with_upsample(upsample);
            Ok(Box::new(OnnxFlowModel::load(path, config)?))
        }
        None => Ok(Box::new(FrameRepeatModel::new(upsample)?)),
    }
}

#[cfg(not(feature = "onnx"))]
fn load_model(path: Option<&Path>, upsample: usize) -> anyhow::Result<Box<dyn FlowModel>> {
    if path.is_some() {
        anyhow::bail!("Loading ONNX models requires building with the 'onnx' feature");
    }
    Ok(Box::new(FrameRepeatModel::new(upsample)?))
}

fn load_volume(store: &dyn ArrayStore, path: &Path, keys: [&str; 3]) -> anyhow::Result<VelocityVolume> {
    let [u, v, w] = keys;
    Ok(VelocityVolume {
        u: load_series(store, path, u)?,
        v: load_series(store, path, v)?,
        w: load_series(store, path, w)?,
    })
}

fn cmd_evaluate(
    prediction: &Path,
    ground_truth: &Path,
    combined: bool,
    mask_key: &str,
    normalization: Normalization,
    json: bool,
) -> anyhow::Result<()> {
    let pred_store = open_store(prediction)?;
    let gt_store = open_store(ground_truth)?;

    let pred_keys = if combined {
        COMBINED_KEYS
    } else {
        VELOCITY_KEYS
    };
    let pred = load_volume(&*pred_store, prediction, pred_keys)?;
    let gt = load_volume(&*gt_store, ground_truth, VELOCITY_KEYS)?;
    let mask = TemporalMask::from_dyn(gt_store.load(ground_truth, mask_key)?.into_f32())?;

    let errors = relative_error(&pred, &gt, &mask, normalization)?;
    let expanded = mask.expand(gt.shape().0)?;
    let rmse_u = rmse(pred.u.view(), gt.u.view(), &expanded)?;
    let rmse_v = rmse(pred.v.view(), gt.v.view(), &expanded)?;
    let rmse_w = rmse(pred.w.view(), gt.w.view(), &expanded)?;
    let speed_pred = mean_speed(&pred, &mask)?;
    let speed_gt = mean_speed(&gt, &mask)?;
    let fit_u = regression_per_frame(&pred.u, &gt.u, &expanded)?;
    let fit_v = regression_per_frame(&pred.v, &gt.v, &expanded)?;
    let fit_w = regression_per_frame(&pred.w, &gt.w, &expanded)?;

    if json {
        let fits = |fit: &[Option<(f64, f64)>]| -> Vec<serde_json::Value> {
            fit.iter()
                .map(|f| match f {
                    Some((k, r2)) => json!({ "k": k, "r2": r2 }),
                    None => serde_json::Value::Null,
                })
                .collect()
        };
        let document = json!({
            "relative_error": errors,
            "rmse": { "u": rmse_u, "v": rmse_v, "w": rmse_w },
            "k_r2": { "u": fits(&fit_u), "v": fits(&fit_v), "w": fits(&fit_w) },
            "mean_speed": { "prediction": speed_pred, "ground_truth": speed_gt },
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    println!(
        "{:>5} {:>10} {:>10} {:>10} {:>10} {:>14} {:>14} {:>14} {:>12} {:>12}",
        "frame", "rel err %", "rmse u", "rmse v", "rmse w", "k/R2 u", "k/R2 v", "k/R2 w", "speed pred", "speed gt"
    );
    for t in 0..errors.len() {
        println!(
            "{:>5} {:>10.3} {:>10.4} {:>10.4} {:>10.4} {:>14} {:>14} {:>14} {:>12.4} {:>12.4}",
            t,
            errors[t],
            rmse_u[t],
            rmse_v[t],
            rmse_w[t],
            format_fit(fit_u[t]),
            format_fit(fit_v[t]),
            format_fit(fit_w[t]),
            speed_pred[t],
            speed_gt[t]
        );
    }
    let mean = errors.iter().sum::<f64>() / errors.len().max(1) as f64;
    println!();
    println!("Mean relative error: {:.3} %", mean);
    Ok(())
}

/// Slope and R^2 of each frame; frames without a defined fit report `None`
fn regression_per_frame(
    pred: &Array4<f32>,
    gt: &Array4<f32>,
    mask: &Array4<f32>,
) -> anyhow::Result<Vec<Option<(f64, f64)>>> {
    let mut fits = Vec::with_capacity(gt.len_of(Axis(0)));
    for ((p, g), m) in pred.outer_iter().zip(gt.outer_iter()).zip(mask.outer_iter()) {
        match k_r2(p, g, m) {
            Ok(fit) => fits.push(Some(fit)),
            Err(Error::InvalidInput(_)) => fits.push(None),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(fits)
}

fn format_fit(fit: Option<(f64, f64)>) -> String {
    match fit {
        Some((k, r2)) => format!("{:.3}/{:.3}", k, r2),
        None => "-".to_string(),
    }
}

fn cmd_merge(target: &Path, source: &Path) -> anyhow::Result<()> {
    let target_store = open_store(target)?;
    let source_store = open_store(source)?;
    let added = merge_stores(&*target_store, target, &*source_store, source)?;
    if added.is_empty() {
        println!("Nothing to merge");
    } else {
        println!("Added {} keys: {}", added.len(), added.join(", "));
    }
    Ok(())
}

fn cmd_delete(input: &Path, keys: &[String]) -> anyhow::Result<()> {
    let store = open_store(input)?;
    let removed = store.delete(input, keys)?;
    for key in keys.iter().filter(|k| !removed.contains(k)) {
        println!("Key '{}' not present", key);
    }
    println!("Removed {} keys from {}", removed.len(), input.display());
    Ok(())
}
