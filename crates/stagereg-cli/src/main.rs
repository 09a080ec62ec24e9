use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use clap::Parser;
use stagereg_core::interpolation::InterpolationKind;
use stagereg_core::spatial::Point;
use stagereg_registration::{
    Accuracy, ConsoleProgressCallback, InitialMethod, Landmarks, MaskRegion, MetricKind, PipelineConfig, PipelineError,
    ProgressTracker, RegistrationInputs, RegistrationMode, RegistrationPipeline,
};
use stagereg_io::{load_config, load_transform, read_nifti, save_config, save_transform, write_nifti};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type Backend = Autodiff<NdArray<f32>>;

#[derive(Parser, Debug)]
#[command(name = "stagereg")]
#[command(about = "Staged rigid, affine and B-spline registration of 3-D NIfTI images")]
struct Cli {
    /// Fixed (reference) image
    fixed: PathBuf,

    /// Moving image, mapped onto the fixed image
    moving: PathBuf,

    /// Registration mode (none, initial, rigid, affine, bspline, pipeline-rigid, pipeline-affine, pipeline-bspline)
    #[arg(long)]
    mode: Option<RegistrationMode>,

    /// Similarity metric (NormCorr, MeanSqrd, MattesMI)
    #[arg(long)]
    metric: Option<MetricKind>,

    /// Initialization (none, image-centers, centers-of-mass, second-moments, landmarks)
    #[arg(long)]
    initial_method: Option<InitialMethod>,

    /// Fixed landmark as x,y,z (repeatable)
    #[arg(long, value_parser = parse_point)]
    fixed_landmark: Vec<[f64; 3]>,

    /// Moving landmark as x,y,z (repeatable)
    #[arg(long, value_parser = parse_point)]
    moving_landmark: Vec<[f64; 3]>,

    #[arg(long)]
    rigid_iterations: Option<usize>,
    #[arg(long)]
    rigid_sampling_ratio: Option<f64>,
    #[arg(long)]
    affine_iterations: Option<usize>,
    #[arg(long)]
    affine_sampling_ratio: Option<f64>,
    #[arg(long)]
    bspline_iterations: Option<usize>,
    #[arg(long)]
    bspline_sampling_ratio: Option<f64>,

    /// B-spline control point spacing (physical units)
    #[arg(long)]
    control_point_spacing: Option<f64>,

    #[arg(long)]
    expected_offset: Option<f64>,
    #[arg(long)]
    expected_rotation: Option<f64>,
    #[arg(long)]
    expected_scale: Option<f64>,
    #[arg(long)]
    expected_skew: Option<f64>,

    /// Restrict sampling to the overlap of the two images
    #[arg(long)]
    use_overlap_as_roi: bool,

    /// Ignore fixed voxels below this intensity
    #[arg(long)]
    intensity_threshold: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads (0 uses the library default)
    #[arg(long)]
    threads: Option<usize>,

    /// B-spline level schedule (full, fast, draft)
    #[arg(long)]
    accuracy: Option<Accuracy>,

    /// Interpolator (nearest, linear, bspline, windowed-sinc)
    #[arg(long)]
    interpolation: Option<InterpolationKind>,

    #[arg(long)]
    fixed_mask: Option<PathBuf>,
    #[arg(long)]
    moving_mask: Option<PathBuf>,

    /// Transform file to start from
    #[arg(long)]
    load_transform: Option<PathBuf>,
    #[arg(long)]
    save_transform: Option<PathBuf>,

    /// Parameter file; command line flags override its values
    #[arg(long)]
    load_parameters: Option<PathBuf>,
    #[arg(long)]
    save_parameters: Option<PathBuf>,

    /// Moving image resampled onto the fixed grid
    #[arg(long)]
    resampled_image: Option<PathBuf>,

    /// Fixed minus resampled moving image
    #[arg(long)]
    difference_image: Option<PathBuf>,

    /// Debug-level logging and per-iteration progress reports
    #[arg(short, long)]
    verbose: bool,
}

/// How a run that produced outputs ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Registered,
    StageFailed,
}

fn parse_point(s: &str) -> std::result::Result<[f64; 3], String> {
    let coords = s
        .split(',')
        .map(|c| c.trim().parse::<f64>().map_err(|e| format!("invalid coordinate '{}': {}", c, e)))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    match coords.as_slice() {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(format!("expected x,y,z, got '{}'", s)),
    }
}

/// Parameter file (or defaults) with the command line applied on top.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.load_parameters {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };

    macro_rules! apply {
        ($($field:ident),* $(,)?) => {
            $(if let Some(value) = cli.$field { config.$field = value; })*
        };
    }
    apply!(
        mode,
        metric,
        initial_method,
        rigid_iterations,
        rigid_sampling_ratio,
        affine_iterations,
        affine_sampling_ratio,
        bspline_iterations,
        bspline_sampling_ratio,
        control_point_spacing,
        expected_offset,
        expected_rotation,
        expected_scale,
        expected_skew,
        seed,
        threads,
        accuracy,
        interpolation,
    );
    if cli.use_overlap_as_roi {
        config.use_overlap_as_roi = true;
    }
    if cli.intensity_threshold.is_some() {
        config.intensity_threshold = cli.intensity_threshold;
    }

    config.validate().context("Invalid registration parameters")?;
    Ok(config)
}

fn landmarks(cli: &Cli) -> Option<Landmarks<3>> {
    if cli.fixed_landmark.is_empty() && cli.moving_landmark.is_empty() {
        return None;
    }
    Some(Landmarks::new(
        cli.fixed_landmark.iter().map(|p| Point::new(*p)).collect(),
        cli.moving_landmark.iter().map(|p| Point::new(*p)).collect(),
    ))
}

/// Console progress reports when running verbosely.
fn progress(cli: &Cli, log_interval: usize) -> ProgressTracker {
    let tracker = ProgressTracker::new();
    if cli.verbose {
        tracker.with_callback(Arc::new(ConsoleProgressCallback::new(log_interval)))
    } else {
        tracker
    }
}

fn run(cli: &Cli) -> Result<Outcome> {
    let config = build_config(cli)?;
    if let Some(path) = &cli.save_parameters {
        save_config(path, &config)?;
    }

    let device = Default::default();
    let fixed = read_nifti::<Backend, _>(&cli.fixed, &device)?;
    let moving = read_nifti::<Backend, _>(&cli.moving, &device)?;
    info!("Fixed image {:?}, moving image {:?}", fixed.size(), moving.size());

    let fixed_mask = cli
        .fixed_mask
        .as_ref()
        .map(|path| read_nifti::<Backend, _>(path, &device).map(MaskRegion::Image))
        .transpose()?;
    let moving_mask = cli
        .moving_mask
        .as_ref()
        .map(|path| read_nifti::<Backend, _>(path, &device).map(MaskRegion::Image))
        .transpose()?;
    let (loaded_matrix, loaded_deformable) = match &cli.load_transform {
        Some(path) => load_transform::<3, _>(path)?,
        None => (None, None),
    };

    let mut inputs =
        RegistrationInputs::new(&fixed, &moving).with_loaded_transform(loaded_matrix, loaded_deformable);
    if let Some(mask) = &fixed_mask {
        inputs = inputs.with_fixed_mask(mask);
    }
    if let Some(mask) = &moving_mask {
        inputs = inputs.with_moving_mask(mask);
    }
    if let Some(landmarks) = landmarks(cli) {
        inputs = inputs.with_landmarks(landmarks);
    }

    let progress = progress(cli, config.log_interval);
    let mut pipeline = RegistrationPipeline::new(config, inputs)
        .context("Registration inputs rejected")?
        .with_progress(progress);
    let outcome = match pipeline.update() {
        Ok(report) => {
            info!(
                "Registration finished after {} stage(s), final metric {:.6}",
                report.stages.len(),
                report.metric_value
            );
            Outcome::Registered
        }
        Err(err @ PipelineError::Stage { .. }) => {
            error!("{}", err);
            warn!("Writing outputs from the last completed stage ({})", pipeline.completed_stage());
            Outcome::StageFailed
        }
        Err(err) => return Err(err.into()),
    };

    if let Some(path) = &cli.save_transform {
        save_transform(path, Some(pipeline.current_matrix_transform()), pipeline.current_bspline_transform())?;
        info!("Saved transform to {}", path.display());
    }
    if let Some(path) = &cli.resampled_image {
        let resampled = pipeline.resample_moving().context("Failed to resample the moving image")?;
        write_nifti(path, &resampled)?;
        info!("Saved resampled image to {}", path.display());
    }
    if let Some(path) = &cli.difference_image {
        let difference = pipeline.difference_image().context("Failed to compute the difference image")?;
        write_nifti(path, &difference)?;
        info!("Saved difference image to {}", path.display());
    }
    Ok(outcome)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match run(&cli) {
        Ok(Outcome::Registered) => ExitCode::SUCCESS,
        Ok(Outcome::StageFailed) => ExitCode::from(2),
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(1)
        }
    }
}
