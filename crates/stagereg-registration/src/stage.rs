//! Single-stage registration method.
//!
//! One stage fixes a transform model and drives the optimizer against the
//! sampled metric until it converges, runs out of iterations or time. Every
//! stage kind goes through [`run_stage`]; the kinds differ only in how the
//! parameter vector becomes a tensor transform.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor, TensorData};
use serde::{Deserialize, Serialize};
use stagereg_core::error::CoreError;
use stagereg_core::image::{Image, ImageGeometry};
use stagereg_core::interpolation::{Interpolation, InterpolationKind, Interpolator};
use stagereg_core::spatial::Vector;
use stagereg_core::transform::rigid::point_tensor;
use stagereg_core::transform::{
    physical_shifts, scale_vector, shift_scale_vector, AffineTransform, BSplineGrid, BSplineTransform,
    DeformableTransform, ExpectedMagnitudes, MatrixTransform, RegistrationTransform, RigidTransform, Transform,
    TransformKind, TransformParameters,
};
use crate::error::{Result, StageError};
use crate::metric::{Metric, MetricKind, SimilarityMetric};
use crate::optimizer::{Optimizer, RegularStepGradientDescent};
use crate::pipeline::PipelineStage;
use crate::progress::ProgressTracker;
use crate::sampler::{FixedSampler, MaskRegion, SampleSet, SamplingConfig};

/// Speed/accuracy trade-off of the deformable stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    #[default]
    Full,
    Fast,
    Draft,
}

impl Accuracy {
    /// Number of coarse-to-fine levels, and how many times the finest level is
    /// coarsened relative to the requested control-point spacing.
    pub fn schedule(self) -> (usize, u32) {
        match self {
            Accuracy::Full => (1, 0),
            Accuracy::Fast => (2, 0),
            Accuracy::Draft => (2, 1),
        }
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Accuracy::Full => "full",
            Accuracy::Fast => "fast",
            Accuracy::Draft => "draft",
        })
    }
}

impl FromStr for Accuracy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Accuracy::Full),
            "fast" => Ok(Accuracy::Fast),
            "draft" => Ok(Accuracy::Draft),
            _ => Err(format!("unknown accuracy '{}'", s)),
        }
    }
}

/// Iteration and step budget of one optimizing stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerStageConfig {
    /// Iteration cap.
    pub iterations: usize,
    /// Fraction of candidate voxels sampled.
    pub sampling_ratio: f64,
    /// Step length (scaled units) at which the search counts as converged.
    pub target_error: f64,
    /// Initial step length (scaled units).
    pub max_step: f64,
    /// Step multiplier on gradient reversal.
    pub relaxation: f64,
    /// Gradient norm below which the search counts as converged.
    pub gradient_tolerance: f64,
    /// Wall-clock budget; exhausting it ends the stage unconverged.
    pub time_budget: Option<Duration>,
}

impl Default for OptimizerStageConfig {
    fn default() -> Self {
        Self {
            iterations: 200,
            sampling_ratio: 0.1,
            target_error: 1e-3,
            max_step: 0.25,
            relaxation: 0.5,
            gradient_tolerance: 1e-8,
            time_budget: None,
        }
    }
}

impl OptimizerStageConfig {
    fn optimizer<B: AutodiffBackend>(&self) -> RegularStepGradientDescent<B> {
        RegularStepGradientDescent::new(self.max_step, self.target_error)
            .with_relaxation(self.relaxation)
            .with_gradient_tolerance(self.gradient_tolerance)
    }
}

/// Deformable stage parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BSplineStageConfig {
    pub optimizer: OptimizerStageConfig,
    /// Physical control-point spacing of the finest level.
    pub control_point_spacing: f64,
    pub accuracy: Accuracy,
}

/// Resolution level of the deformable stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BSplineLevel {
    pub spacing: f64,
    pub sampling_ratio: f64,
    pub iterations: usize,
}

impl BSplineStageConfig {
    /// Coarse-to-fine schedule.
    ///
    /// Level `l` of `L` doubles the spacing `L − 1 − l` times, samples
    /// `1 − l·(1 − ratio)/(L − 1)` of the candidates and runs
    /// `iterations · (L − l)` iterations.
    pub fn levels(&self) -> Vec<BSplineLevel> {
        let (count, coarsen) = self.accuracy.schedule();
        let ratio = self.optimizer.sampling_ratio;
        (0..count)
            .map(|level| {
                let doublings = (count - 1 - level) as i32 + coarsen as i32;
                let sampling_ratio = if count > 1 {
                    1.0 - level as f64 * (1.0 - ratio) / (count - 1) as f64
                } else {
                    ratio
                };
                BSplineLevel {
                    spacing: self.control_point_spacing * 2f64.powi(doublings),
                    sampling_ratio,
                    iterations: self.optimizer.iterations * (count - level),
                }
            })
            .collect()
    }
}

/// Configuration of one optimizing stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageConfig {
    Rigid(OptimizerStageConfig),
    Affine(OptimizerStageConfig),
    BSpline(BSplineStageConfig),
}

impl StageConfig {
    pub fn kind(&self) -> TransformKind {
        match self {
            StageConfig::Rigid(_) => TransformKind::Rigid,
            StageConfig::Affine(_) => TransformKind::Affine,
            StageConfig::BSpline(_) => TransformKind::BSpline,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        match self {
            StageConfig::Rigid(_) => PipelineStage::Rigid,
            StageConfig::Affine(_) => PipelineStage::Affine,
            StageConfig::BSpline(_) => PipelineStage::BSpline,
        }
    }

    pub fn optimizer(&self) -> &OptimizerStageConfig {
        match self {
            StageConfig::Rigid(c) | StageConfig::Affine(c) => c,
            StageConfig::BSpline(c) => &c.optimizer,
        }
    }
}

/// Everything a stage evaluates against. Images are borrowed read-only.
#[derive(Debug)]
pub struct StageProblem<'a, B: Backend, const D: usize> {
    pub sampler: &'a FixedSampler<D>,
    pub moving: &'a Image<B, D>,
    pub moving_mask: Option<&'a MaskRegion<B, D>>,
    pub metric: MetricKind,
    pub interpolation: InterpolationKind,
    pub magnitudes: ExpectedMagnitudes,
    pub sampling: SamplingConfig,
    pub log_interval: usize,
}

/// Starting point of a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageInitial<const D: usize> {
    /// Seed of a matrix stage; also the fixed baseline of a deformable stage.
    Matrix(MatrixTransform<D>),
    /// Deformable stage baseline with an optional displacement field to continue from.
    Deformable {
        bulk: MatrixTransform<D>,
        field: Option<DeformableTransform<D>>,
    },
}

impl<const D: usize> StageInitial<D> {
    fn parts(self) -> (MatrixTransform<D>, Option<DeformableTransform<D>>) {
        match self {
            StageInitial::Matrix(m) => (m, None),
            StageInitial::Deformable { bulk, field } => (bulk, field),
        }
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult<const D: usize> {
    /// Result transform, relative to the moving image the stage saw.
    pub transform: RegistrationTransform<D>,
    /// Metric value of the returned parameters.
    pub metric_value: f64,
    /// Iterations performed (summed over levels).
    pub iterations: usize,
    /// False when the iteration cap or time budget ended the search.
    pub converged: bool,
}

/// Samples the moving image through a tensor transform and scores the match.
pub struct MetricEvaluator<'a, B: Backend, const D: usize> {
    lattice: Tensor<B, D>,
    geometry: ImageGeometry<D>,
    interpolator: Interpolation,
    metric: SimilarityMetric,
    mask: Option<&'a MaskRegion<B, D>>,
}

impl<'a, B: Backend, const D: usize> MetricEvaluator<'a, B, D> {
    pub fn new(problem: &StageProblem<'a, B, D>) -> Result<Self> {
        let interpolator = Interpolation::from(problem.interpolation);
        let lattice = interpolator.prepare(problem.moving.data().clone())?;
        Ok(Self {
            lattice,
            geometry: problem.moving.geometry(),
            interpolator,
            metric: problem.metric.build(),
            mask: problem.moving_mask,
        })
    }

    pub fn metric(&self) -> &SimilarityMetric {
        &self.metric
    }

    /// Loss `[1]` and the number of samples that landed inside the moving image and mask.
    pub fn evaluate(
        &self,
        transform: &impl Transform<B, D>,
        points: Tensor<B, 2>,
        fixed_values: Tensor<B, 1>,
    ) -> (Tensor<B, 1>, usize) {
        let mapped = transform.transform_points(points);
        let indices = self.geometry.world_to_index_tensor(mapped.clone());
        let mut weights = self.geometry.inside_weights(indices.clone().detach());
        if let Some(mask) = self.mask {
            weights = weights * mask.weights(mapped.detach());
        }
        let valid = weights.clone().detach().sum().into_scalar().elem::<f64>().round() as usize;
        let moving_values = self.interpolator.interpolate(&self.lattice, indices);
        (self.metric.evaluate(fixed_values, moving_values, weights), valid)
    }
}

struct Outcome {
    parameters: Vec<f64>,
    value: f64,
    iterations: usize,
    converged: bool,
}

fn read_vec<B: Backend>(tensor: Tensor<B, 1>) -> Result<Vec<f64>> {
    tensor
        .into_data()
        .convert::<f64>()
        .to_vec::<f64>()
        .map_err(|e| StageError::Core(CoreError::data(format!("{:?}", e))))
}

fn vector_tensor<B: Backend>(values: impl Iterator<Item = f64>, device: &B::Device) -> Tensor<B, 1> {
    let values: Vec<f32> = values.map(|v| v as f32).collect();
    let count = values.len();
    Tensor::from_data(TensorData::new(values, [count]), device)
}

/// Optimize `initial` (unscaled parameters) with `scales` (reciprocal magnitudes).
///
/// The optimizer moves `q = p · s`; the transform sees `p = q / s`, so the
/// gradient it receives is already taken with respect to the scaled position.
/// A step that makes the metric worse is undone: the search returns to the
/// best position and continues from there with a relaxed step.
#[allow(clippy::too_many_arguments)]
fn optimize<B, const D: usize, T, F>(
    name: &str,
    problem: &StageProblem<'_, B, D>,
    samples: &SampleSet<D>,
    initial: &[f64],
    scales: &[f64],
    config: &OptimizerStageConfig,
    iterations: usize,
    progress: &ProgressTracker,
    build: F,
) -> Result<Outcome>
where
    B: AutodiffBackend,
    T: Transform<B, D>,
    F: Fn(Tensor<B, 1>) -> T,
{
    let device = problem.moving.data().device();
    let evaluator = MetricEvaluator::new(problem)?;
    let (points, fixed_values) = samples.to_tensors::<B>(&device);
    let scale = vector_tensor::<B>(scales.iter().copied(), &device);

    let mut optimizer = config.optimizer::<B>();
    let mut position = vector_tensor::<B>(initial.iter().zip(scales).map(|(p, s)| p * s), &device);
    let mut best: Option<(Tensor<B, 1>, Tensor<B::InnerBackend, 1>)> = None;
    let mut best_value = f64::INFINITY;
    let mut reference: Option<f64> = None;
    let mut performed = 0;
    let mut converged = false;
    let started = Instant::now();
    let log_interval = problem.log_interval.max(1);

    progress.start(name);
    for iteration in 0..iterations {
        if let Some(budget) = config.time_budget {
            if started.elapsed() >= budget {
                tracing::warn!("{} stage hit its time budget after {} iterations", name, iteration);
                break;
            }
        }

        let scaled = position.clone().require_grad();
        let transform = build(scaled.clone() / scale.clone());
        let (loss, valid_samples) = evaluator.evaluate(&transform, points.clone(), fixed_values.clone());
        let value = loss.clone().into_scalar().elem::<f64>();
        performed = iteration + 1;

        if !value.is_finite() {
            return Err(StageError::UndefinedMetric {
                iteration,
                valid_samples,
            });
        }
        let limit = 1e6 * *reference.get_or_insert(value.abs().max(1.0));
        if value > limit {
            return Err(StageError::Diverged { iteration, value });
        }

        let grads = loss.backward();
        let gradient = scaled
            .grad(&grads)
            .unwrap_or_else(|| position.clone().inner().zeros_like());

        progress.update(iteration, Some(iterations), value, optimizer.learning_rate());
        if iteration % log_interval == 0 {
            tracing::info!(
                "{} iteration {}: metric {:.6} | step {:.3e} | samples {}",
                name,
                iteration,
                value,
                optimizer.learning_rate(),
                valid_samples
            );
        }

        let (from, direction) = match best.take() {
            Some(previous) if value >= best_value => {
                optimizer.relax();
                tracing::debug!(
                    "{} iteration {}: metric {:.6} above best {:.6}, stepping back",
                    name,
                    iteration,
                    value,
                    best_value
                );
                best = Some(previous.clone());
                previous
            }
            _ => {
                best_value = value;
                best = Some((position.clone(), gradient.clone()));
                (position, gradient)
            }
        };

        let next = optimizer.step(from, direction);
        if optimizer.converged() {
            converged = true;
            break;
        }
        let norm = next.clone().powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        if !norm.is_finite() {
            return Err(StageError::Diverged { iteration, value });
        }
        position = next;
    }

    if !converged {
        tracing::warn!("{} stage stopped after {} iterations without converging", name, performed);
    }
    progress.complete(best_value, optimizer.learning_rate());

    let parameters = match best {
        Some((scaled, _)) => read_vec(scaled / scale)?,
        None => initial.to_vec(),
    };
    Ok(Outcome {
        parameters,
        value: best_value,
        iterations: performed,
        converged,
    })
}

fn matrix_stage<B: AutodiffBackend, const D: usize>(
    kind: TransformKind,
    config: &OptimizerStageConfig,
    problem: &StageProblem<'_, B, D>,
    seed: MatrixTransform<D>,
    progress: &ProgressTracker,
) -> Result<StageResult<D>> {
    let device = problem.moving.data().device();
    let start = seed.to_parameters(kind)?;
    let samples = problem.sampler.draw(&problem.sampling.with_ratio(config.sampling_ratio))?;
    let shifts = physical_shifts(&start, &samples.physical_points())?;
    let scales = shift_scale_vector(kind, D, &shifts, &problem.magnitudes);
    tracing::debug!("{} parameter scales {:?}", kind, scales);
    let center = point_tensor::<B, D>(seed.center(), &device);

    let outcome = match kind {
        TransformKind::Rigid => optimize(
            kind.name(),
            problem,
            &samples,
            &start.parameters,
            &scales,
            config,
            config.iterations,
            progress,
            |p| RigidTransform::<B, D>::from_parameter_tensor(p, center.clone()),
        )?,
        _ => optimize(
            kind.name(),
            problem,
            &samples,
            &start.parameters,
            &scales,
            config,
            config.iterations,
            progress,
            |p| AffineTransform::<B, D>::from_parameter_tensor(p, center.clone()),
        )?,
    };

    let result = TransformParameters::new(kind, D, outcome.parameters, start.fixed_parameters);
    Ok(StageResult {
        transform: RegistrationTransform::from_matrix(MatrixTransform::from_parameters(&result)?),
        metric_value: outcome.value,
        iterations: outcome.iterations,
        converged: outcome.converged,
    })
}

fn bspline_stage<B: AutodiffBackend, const D: usize>(
    config: &BSplineStageConfig,
    problem: &StageProblem<'_, B, D>,
    bulk: MatrixTransform<D>,
    field: Option<DeformableTransform<D>>,
    progress: &ProgressTracker,
) -> Result<StageResult<D>> {
    let device = problem.moving.data().device();
    let bounds = problem.sampler.geometry().physical_bounds();
    let bulk_tensor = AffineTransform::<B, D>::from_matrix_transform(&bulk, &device);
    let levels = config.levels();

    let mut current = field;
    let mut metric_value = f64::NAN;
    let mut iterations = 0;
    let mut converged = false;
    for (index, level) in levels.iter().enumerate() {
        let grid = BSplineGrid::covering(&bounds, &Vector::new([level.spacing; D]))?;
        let start = match current.take() {
            Some(f) if f.grid() == &grid => f,
            Some(f) => f.refine(grid),
            None => DeformableTransform::zeros(grid),
        };
        tracing::debug!(
            "B-spline level {}/{}: spacing {:.3}, {} control points, ratio {:.3}",
            index + 1,
            levels.len(),
            level.spacing,
            grid.num_nodes(),
            level.sampling_ratio
        );

        let samples = problem.sampler.draw(&problem.sampling.with_ratio(level.sampling_ratio))?;
        let scales = scale_vector(TransformKind::BSpline, D, grid.num_parameters(), &problem.magnitudes);
        let outcome = optimize(
            "BSpline",
            problem,
            &samples,
            start.coefficients(),
            &scales,
            &config.optimizer,
            level.iterations,
            progress,
            |p| BSplineTransform::from_parameter_tensor(grid, p, Some(bulk_tensor.clone())),
        )?;

        current = Some(DeformableTransform::new(grid, outcome.parameters)?);
        metric_value = outcome.value;
        iterations += outcome.iterations;
        converged = outcome.converged;
    }

    Ok(StageResult {
        transform: RegistrationTransform::new(bulk, current),
        metric_value,
        iterations,
        converged,
    })
}

/// Run one optimizing stage.
///
/// Non-convergence is reported through [`StageResult::converged`]; an undefined
/// metric, divergence or a singular decomposition is an error.
pub fn run_stage<B: AutodiffBackend, const D: usize>(
    stage: &StageConfig,
    problem: &StageProblem<'_, B, D>,
    initial: StageInitial<D>,
    progress: &ProgressTracker,
) -> Result<StageResult<D>> {
    tracing::info!("Starting {} stage ({} metric)", stage.stage(), problem.metric);
    let (matrix, field) = initial.parts();
    let result = match stage {
        StageConfig::Rigid(config) => matrix_stage(TransformKind::Rigid, config, problem, matrix, progress)?,
        StageConfig::Affine(config) => matrix_stage(TransformKind::Affine, config, problem, matrix, progress)?,
        StageConfig::BSpline(config) => bspline_stage(config, problem, matrix, field, progress)?,
    };
    tracing::info!(
        "{} stage finished: metric {:.6} after {} iterations (converged: {})",
        stage.stage(),
        result.metric_value,
        result.iterations,
        result.converged
    );
    Ok(result)
}

/// Evaluate the metric once at a fixed transform.
pub fn evaluate_transform<B: Backend, const D: usize>(
    problem: &StageProblem<'_, B, D>,
    transform: &RegistrationTransform<D>,
    sampling_ratio: f64,
) -> Result<f64> {
    let device = problem.moving.data().device();
    let samples = problem.sampler.draw(&problem.sampling.with_ratio(sampling_ratio))?;
    let (points, fixed_values) = samples.to_tensors::<B>(&device);
    let evaluator = MetricEvaluator::new(problem)?;
    let (loss, valid_samples) = evaluator.evaluate(&transform.to_tensor_transform::<B>(&device), points, fixed_values);
    let value = loss.into_scalar().elem::<f64>();
    if !value.is_finite() {
        return Err(StageError::UndefinedMetric {
            iteration: 0,
            valid_samples,
        });
    }
    Ok(value)
}
