//! Staged registration orchestrator.
//!
//! A [`RegistrationPipeline`] validates its inputs once, then makes a single
//! forward pass Load → Init → Rigid → Affine → BSpline over the enabled stages.
//! Each stage is seeded with the transform in force when it starts; a failing
//! stage aborts the pass but leaves the last good transform in place.

use std::borrow::Cow;
use std::fmt;
use burn::tensor::backend::AutodiffBackend;
use rayon::prelude::*;
use stagereg_core::error::CoreError;
use stagereg_core::filter::resample;
use stagereg_core::image::{grid_indices, Image, ImageGeometry};
use stagereg_core::spatial::{BoundingBox, Point};
use stagereg_core::transform::{
    DeformableTransform, MatrixTransform, RegistrationTransform, TransformKind, TransformParameters,
};
use crate::config::PipelineConfig;
use crate::error::{InputError, PipelineError, Result, StageError};
use crate::initializer::{initialize, InitialMethod, Landmarks};
use crate::progress::ProgressTracker;
use crate::sampler::{FixedSampler, MaskRegion, MIN_VALID_SAMPLES};
use crate::stage::{evaluate_transform, run_stage, StageInitial, StageProblem, StageResult};
use crate::validation::{validate_image, validate_mask};

/// Pipeline position, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    Pre,
    Load,
    Init,
    Rigid,
    Affine,
    BSpline,
}

impl PipelineStage {
    pub fn name(self) -> &'static str {
        match self {
            PipelineStage::Pre => "Pre",
            PipelineStage::Load => "Load",
            PipelineStage::Init => "Init",
            PipelineStage::Rigid => "Rigid",
            PipelineStage::Affine => "Affine",
            PipelineStage::BSpline => "BSpline",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Images, masks and optional seeds of one registration run.
///
/// Images and masks are borrowed read-only for the lifetime of the pipeline.
#[derive(Debug, Clone)]
pub struct RegistrationInputs<'a, B: AutodiffBackend, const D: usize> {
    pub fixed: &'a Image<B, D>,
    pub moving: &'a Image<B, D>,
    pub fixed_mask: Option<&'a MaskRegion<B, D>>,
    pub moving_mask: Option<&'a MaskRegion<B, D>>,
    /// Explicit sampling region in fixed physical space.
    pub roi: Option<BoundingBox<D>>,
    pub loaded_matrix: Option<MatrixTransform<D>>,
    pub loaded_deformable: Option<DeformableTransform<D>>,
    pub landmarks: Option<Landmarks<D>>,
}

impl<'a, B: AutodiffBackend, const D: usize> RegistrationInputs<'a, B, D> {
    pub fn new(fixed: &'a Image<B, D>, moving: &'a Image<B, D>) -> Self {
        Self {
            fixed,
            moving,
            fixed_mask: None,
            moving_mask: None,
            roi: None,
            loaded_matrix: None,
            loaded_deformable: None,
            landmarks: None,
        }
    }

    pub fn with_fixed_mask(mut self, mask: &'a MaskRegion<B, D>) -> Self {
        self.fixed_mask = Some(mask);
        self
    }

    pub fn with_moving_mask(mut self, mask: &'a MaskRegion<B, D>) -> Self {
        self.moving_mask = Some(mask);
        self
    }

    pub fn with_roi(mut self, roi: BoundingBox<D>) -> Self {
        self.roi = Some(roi);
        self
    }

    /// Previously saved transform parts.
    pub fn with_loaded_transform(
        mut self,
        matrix: Option<MatrixTransform<D>>,
        deformable: Option<DeformableTransform<D>>,
    ) -> Self {
        self.loaded_matrix = matrix;
        self.loaded_deformable = deformable;
        self
    }

    pub fn with_landmarks(mut self, landmarks: Landmarks<D>) -> Self {
        self.landmarks = Some(landmarks);
        self
    }
}

/// Outcome of one optimizing stage, with the absolute transform after it.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport<const D: usize> {
    pub stage: PipelineStage,
    pub transform: RegistrationTransform<D>,
    pub metric_value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationReport<const D: usize> {
    pub stages: Vec<StageReport<D>>,
    pub completed: PipelineStage,
    pub metric_value: f64,
    pub transform: RegistrationTransform<D>,
}

/// Running state of the forward pass.
#[derive(Debug)]
struct PipelineState<'a, B: AutodiffBackend, const D: usize> {
    /// Fixed → original moving.
    current_matrix: MatrixTransform<D>,
    /// Displacement added on top of `current_matrix`.
    current_bspline: Option<DeformableTransform<D>>,
    current_moving: Cow<'a, Image<B, D>>,
    current_moving_mask: Option<Cow<'a, MaskRegion<B, D>>>,
    /// Matrix baked into `current_moving`; `None` while it is the original image.
    baked: Option<MatrixTransform<D>>,
    completed: PipelineStage,
}

/// Staged registration of a moving image onto a fixed image.
#[derive(Debug)]
pub struct RegistrationPipeline<'a, B: AutodiffBackend, const D: usize> {
    config: PipelineConfig,
    inputs: RegistrationInputs<'a, B, D>,
    fixed_geometry: ImageGeometry<D>,
    sampler: FixedSampler<D>,
    progress: ProgressTracker,
    state: PipelineState<'a, B, D>,
    reports: Vec<StageReport<D>>,
    has_run: bool,
}

impl<'a, B: AutodiffBackend, const D: usize> RegistrationPipeline<'a, B, D> {
    /// Validate configuration and inputs.
    ///
    /// Every input error surfaces here, before any stage runs.
    pub fn new(config: PipelineConfig, inputs: RegistrationInputs<'a, B, D>) -> std::result::Result<Self, InputError> {
        config.validate()?;
        validate_image("fixed", inputs.fixed)?;
        validate_image("moving", inputs.moving)?;
        validate_mask("fixed", inputs.fixed_mask, inputs.fixed)?;
        validate_mask("moving", inputs.moving_mask, inputs.moving)?;

        let mode = config.mode;
        if mode.enables(PipelineStage::Init) && config.initial_method == InitialMethod::Landmarks {
            match &inputs.landmarks {
                Some(landmarks) => landmarks.validate()?,
                None => {
                    return Err(InputError::invalid_configuration(
                        "landmark initialization requires fixed and moving landmarks",
                    ))
                }
            }
        }
        if inputs.loaded_deformable.is_some() && mode.has_matrix_stage() {
            return Err(InputError::IncompatibleLoadedTransform(format!(
                "a deformable transform cannot seed mode {}, which runs matrix stages",
                mode
            )));
        }
        if let Some(loaded) = &inputs.loaded_matrix {
            loaded.inverse().map_err(|e| InputError::IncompatibleLoadedTransform(e.to_string()))?;
        }

        let overlap = config.use_overlap_as_roi.then(|| inputs.moving.physical_bounds());
        let sampler = FixedSampler::new(inputs.fixed, inputs.fixed_mask, inputs.roi, overlap)?;
        let candidates = sampler.candidates(config.intensity_threshold).len();
        if mode.stages().iter().any(|s| config.stage_config(*s).is_some()) && candidates < MIN_VALID_SAMPLES {
            return Err(InputError::EmptyRegion(format!(
                "{} candidate samples in the sampling region, need at least {}",
                candidates, MIN_VALID_SAMPLES
            )));
        }

        let fixed_geometry = inputs.fixed.geometry();
        let state = PipelineState {
            current_matrix: MatrixTransform::identity(fixed_geometry.center()),
            current_bspline: None,
            current_moving: Cow::Borrowed(inputs.moving),
            current_moving_mask: inputs.moving_mask.map(Cow::Borrowed),
            baked: None,
            completed: PipelineStage::Pre,
        };
        Ok(Self {
            config,
            inputs,
            fixed_geometry,
            sampler,
            progress: ProgressTracker::new(),
            state,
            reports: Vec::new(),
            has_run: false,
        })
    }

    /// Attach progress callbacks.
    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the enabled stages once.
    ///
    /// On a stage failure the transforms completed so far stay available through
    /// the accessors.
    pub fn update(&mut self) -> std::result::Result<RegistrationReport<D>, PipelineError> {
        if self.has_run {
            return Err(PipelineError::AlreadyRun);
        }
        self.has_run = true;

        match self.config.threads {
            0 => self.run(),
            threads => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| InputError::invalid_configuration(format!("thread pool: {}", e)))?;
                pool.install(|| self.run())
            }
        }
    }

    fn run(&mut self) -> std::result::Result<RegistrationReport<D>, PipelineError> {
        tracing::info!(
            "Starting registration: mode {}, metric {}, interpolation {}",
            self.config.mode,
            self.config.metric,
            self.config.interpolation
        );

        self.load().map_err(|e| self.fail(PipelineStage::Load, e))?;
        self.state.completed = PipelineStage::Load;

        for &stage in self.config.mode.stages() {
            let outcome = match stage {
                PipelineStage::Init => self.run_init(),
                PipelineStage::Rigid => self.run_rigid(),
                PipelineStage::Affine => self.run_affine(),
                PipelineStage::BSpline => self.run_bspline(),
                PipelineStage::Pre | PipelineStage::Load => Ok(()),
            };
            outcome.map_err(|e| self.fail(stage, e))?;
            self.state.completed = stage;
        }

        let metric_value = match self.reports.last() {
            Some(report) => report.metric_value,
            None => self.evaluate_final().map_err(|e| self.fail(self.state.completed, e))?,
        };
        tracing::info!(
            "Registration finished after {} stage with metric {:.6}",
            self.state.completed,
            metric_value
        );
        Ok(RegistrationReport {
            stages: self.reports.clone(),
            completed: self.state.completed,
            metric_value,
            transform: self.final_transform(),
        })
    }

    fn fail(&self, stage: PipelineStage, source: StageError) -> PipelineError {
        tracing::error!("{} stage failed: {}", stage, source);
        self.progress.error(&format!("{} stage: {}", stage, source));
        let snapshot = self
            .state
            .current_matrix
            .to_parameters(TransformKind::Affine)
            .unwrap_or_else(|_| {
                TransformParameters::new(
                    TransformKind::Identity,
                    D,
                    Vec::new(),
                    self.state.current_matrix.center().to_vec(),
                )
            });
        PipelineError::Stage {
            stage,
            source,
            snapshot,
        }
    }

    fn fixed_center(&self) -> Point<D> {
        self.fixed_geometry.center()
    }

    /// Express an absolute matrix relative to the image the stages currently see.
    fn relative(&self, matrix: &MatrixTransform<D>) -> Result<MatrixTransform<D>> {
        let relative = match &self.state.baked {
            Some(baked) => baked.inverse()?.compose(matrix),
            None => *matrix,
        };
        Ok(relative.recentered(self.fixed_center()))
    }

    fn absolute(&self, relative: &MatrixTransform<D>) -> MatrixTransform<D> {
        match &self.state.baked {
            Some(baked) => baked.compose(relative),
            None => *relative,
        }
    }

    fn problem(&self) -> StageProblem<'_, B, D> {
        StageProblem {
            sampler: &self.sampler,
            moving: self.state.current_moving.as_ref(),
            moving_mask: self.state.current_moving_mask.as_deref(),
            metric: self.config.metric,
            interpolation: self.config.interpolation,
            magnitudes: self.config.magnitudes(),
            sampling: self.config.sampling(),
            log_interval: self.config.log_interval,
        }
    }

    fn optimize(&self, stage: PipelineStage, initial: StageInitial<D>) -> Result<StageResult<D>> {
        let config = self
            .config
            .stage_config(stage)
            .ok_or_else(|| StageError::Core(CoreError::data(format!("{} is not an optimizing stage", stage))))?;
        run_stage(&config, &self.problem(), initial, &self.progress)
    }

    fn record(&mut self, stage: PipelineStage, result: &StageResult<D>) {
        self.reports.push(StageReport {
            stage,
            transform: self.final_transform(),
            metric_value: result.metric_value,
            iterations: result.iterations,
            converged: result.converged,
        });
    }

    /// Valid region of the original moving image (and its mask), pulled back
    /// onto the fixed grid through `matrix`.
    fn validity_mask(&self, matrix: &MatrixTransform<D>) -> Result<Image<B, D>> {
        let moving_geometry = self.inputs.moving.geometry();
        let lookup = self
            .inputs
            .moving_mask
            .map(|m| m.lookup())
            .transpose()
            .map_err(|e| StageError::Core(CoreError::data(e.to_string())))?;
        let indices: Vec<[usize; D]> = grid_indices(self.fixed_geometry.size()).collect();
        let values: Vec<f32> = indices
            .par_iter()
            .map(|index| {
                let continuous: [f64; D] = std::array::from_fn(|i| index[i] as f64);
                let mapped = matrix.transform_point(&self.fixed_geometry.index_to_physical(&continuous));
                let inside = moving_geometry.contains_index(&moving_geometry.physical_to_index(&mapped))
                    && lookup.as_ref().map_or(true, |l| l.contains(&mapped));
                if inside {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        Ok(Image::from_vec(values, &self.fixed_geometry, &self.inputs.moving.data().device())?)
    }

    /// Resample the original moving image through the current matrix.
    fn bake(&mut self) -> Result<()> {
        let matrix = self.state.current_matrix;
        if self.state.baked == Some(matrix) {
            return Ok(());
        }
        let resampled = resample(
            &self.fixed_geometry,
            self.inputs.moving,
            &RegistrationTransform::from_matrix(matrix),
            self.config.interpolation,
            self.config.default_pixel_value,
        )?;
        let mask = self.validity_mask(&matrix)?;
        self.state.current_moving = Cow::Owned(resampled);
        self.state.current_moving_mask = Some(Cow::Owned(MaskRegion::Image(mask)));
        self.state.baked = Some(matrix);
        tracing::debug!("Resampled moving image through the current matrix transform");
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        if let Some(matrix) = self.inputs.loaded_matrix {
            tracing::info!("Using loaded matrix transform");
            self.state.current_matrix = matrix;
            if self.config.enable_loaded_registration {
                self.bake()?;
            }
        }
        if let Some(field) = &self.inputs.loaded_deformable {
            tracing::info!("Using loaded deformable transform ({} control points)", field.grid().num_nodes());
            self.state.current_bspline = Some(field.clone());
        }
        Ok(())
    }

    fn run_init(&mut self) -> Result<()> {
        if self.inputs.loaded_matrix.is_some() {
            tracing::info!("Loaded transform supersedes initialization");
            return Ok(());
        }
        let moving_values = self.inputs.moving.to_vec()?;
        let seed = initialize(
            self.config.initial_method,
            &self.fixed_geometry,
            self.sampler.values(),
            &self.inputs.moving.geometry(),
            &moving_values,
            self.inputs.landmarks.as_ref(),
        )?;
        tracing::info!("Initialized with {} (offset {:?})", self.config.initial_method, seed.offset().to_vec());
        self.state.current_matrix = seed;
        Ok(())
    }

    fn run_rigid(&mut self) -> Result<()> {
        let seed = self.relative(&self.state.current_matrix)?;
        let seed = match seed.to_rigid() {
            Ok(rigid) => rigid,
            Err(CoreError::Singular(msg)) => {
                tracing::warn!("Rigid seed is singular ({}); starting from identity", msg);
                MatrixTransform::identity(self.fixed_center())
            }
            Err(e) => return Err(e.into()),
        };
        let result = self.optimize(PipelineStage::Rigid, StageInitial::Matrix(seed))?;
        self.state.current_matrix = self.absolute(&result.transform.matrix);
        self.record(PipelineStage::Rigid, &result);
        Ok(())
    }

    fn run_affine(&mut self) -> Result<()> {
        if self.config.resample_between_stages {
            self.bake()?;
        }
        let seed = self.relative(&self.state.current_matrix)?;
        let result = self.optimize(PipelineStage::Affine, StageInitial::Matrix(seed))?;
        self.state.current_matrix = self.absolute(&result.transform.matrix);
        self.record(PipelineStage::Affine, &result);
        Ok(())
    }

    fn run_bspline(&mut self) -> Result<()> {
        if self.config.resample_between_stages {
            self.bake()?;
        }
        let bulk = self.relative(&self.state.current_matrix)?;
        let baked_linear = self.state.baked.map(|b| *b.linear());
        let field = match (&self.state.current_bspline, baked_linear) {
            (Some(field), Some(linear)) => {
                let inverse = linear
                    .try_inverse()
                    .ok_or_else(|| StageError::SingularTransform("baked matrix is not invertible".into()))?;
                Some(field.map_displacements(&inverse))
            }
            (field, None) => field.clone(),
            (None, Some(_)) => None,
        };

        let result = self.optimize(PipelineStage::BSpline, StageInitial::Deformable { bulk, field })?;
        let relative_field = result
            .transform
            .deformable
            .clone()
            .ok_or_else(|| StageError::Core(CoreError::data("deformable stage returned no field")))?;
        self.state.current_bspline = Some(match baked_linear {
            Some(linear) => relative_field.map_displacements(&linear),
            None => relative_field,
        });
        self.record(PipelineStage::BSpline, &result);
        Ok(())
    }

    fn evaluate_final(&self) -> Result<f64> {
        let ratio = self.config.rigid_sampling_ratio;
        let problem = StageProblem {
            moving: self.inputs.moving,
            moving_mask: self.inputs.moving_mask,
            ..self.problem()
        };
        evaluate_transform(&problem, &self.final_transform(), ratio)
    }

    /// Matrix transform in force (fixed → original moving).
    pub fn current_matrix_transform(&self) -> &MatrixTransform<D> {
        &self.state.current_matrix
    }

    /// Deformable part, once a BSpline stage completed or one was loaded.
    pub fn current_bspline_transform(&self) -> Option<&DeformableTransform<D>> {
        self.state.current_bspline.as_ref()
    }

    /// Last stage that completed.
    pub fn completed_stage(&self) -> PipelineStage {
        self.state.completed
    }

    pub fn stage_reports(&self) -> &[StageReport<D>] {
        &self.reports
    }

    /// Composed transform `T = M + d` in force.
    pub fn final_transform(&self) -> RegistrationTransform<D> {
        RegistrationTransform::new(self.state.current_matrix, self.state.current_bspline.clone())
    }

    /// Original moving image resampled onto the fixed grid through the final transform.
    pub fn resample_moving(&self) -> stagereg_core::Result<Image<B, D>> {
        resample(
            &self.fixed_geometry,
            self.inputs.moving,
            &self.final_transform(),
            self.config.interpolation,
            self.config.default_pixel_value,
        )
    }

    /// `fixed − resampled moving` on the fixed grid.
    pub fn difference_image(&self) -> stagereg_core::Result<Image<B, D>> {
        let resampled = self.resample_moving()?;
        Ok(self
            .inputs
            .fixed
            .with_data(self.inputs.fixed.data().clone() - resampled.data().clone()))
    }

    /// Hand the final transform to the caller.
    pub fn into_transform(self) -> RegistrationTransform<D> {
        RegistrationTransform::new(self.state.current_matrix, self.state.current_bspline)
    }
}
