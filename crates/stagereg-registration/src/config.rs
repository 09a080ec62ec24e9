//! Pipeline configuration.
//!
//! [`PipelineConfig`] is a flat record of every knob the orchestrator exposes, so
//! that it persists as a plain key/value document. It is validated once and then
//! turned into per-stage [`StageConfig`] values.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use stagereg_core::interpolation::InterpolationKind;
use stagereg_core::transform::ExpectedMagnitudes;
use crate::error::InputError;
use crate::initializer::InitialMethod;
use crate::metric::MetricKind;
use crate::pipeline::PipelineStage;
use crate::sampler::SamplingConfig;
use crate::stage::{Accuracy, BSplineStageConfig, OptimizerStageConfig, StageConfig};
use crate::validation::{require_nonzero, require_positive, require_ratio};

/// Which stages a run enables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegistrationMode {
    None,
    Initial,
    Rigid,
    Affine,
    BSpline,
    PipelineRigid,
    #[default]
    PipelineAffine,
    PipelineBSpline,
}

impl RegistrationMode {
    pub fn name(self) -> &'static str {
        match self {
            RegistrationMode::None => "None",
            RegistrationMode::Initial => "Initial",
            RegistrationMode::Rigid => "Rigid",
            RegistrationMode::Affine => "Affine",
            RegistrationMode::BSpline => "BSpline",
            RegistrationMode::PipelineRigid => "PipelineRigid",
            RegistrationMode::PipelineAffine => "PipelineAffine",
            RegistrationMode::PipelineBSpline => "PipelineBSpline",
        }
    }

    /// Enabled stages in execution order.
    pub fn stages(self) -> &'static [PipelineStage] {
        use PipelineStage::*;
        match self {
            RegistrationMode::None => &[],
            RegistrationMode::Initial => &[Init],
            RegistrationMode::Rigid => &[Rigid],
            RegistrationMode::Affine => &[Affine],
            RegistrationMode::BSpline => &[BSpline],
            RegistrationMode::PipelineRigid => &[Init, Rigid],
            RegistrationMode::PipelineAffine => &[Init, Rigid, Affine],
            RegistrationMode::PipelineBSpline => &[Init, Rigid, Affine, BSpline],
        }
    }

    pub fn enables(self, stage: PipelineStage) -> bool {
        self.stages().contains(&stage)
    }

    /// Whether any stage producing a matrix transform is enabled.
    pub fn has_matrix_stage(self) -> bool {
        self.stages()
            .iter()
            .any(|s| matches!(s, PipelineStage::Init | PipelineStage::Rigid | PipelineStage::Affine))
    }
}

impl fmt::Display for RegistrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RegistrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase().replace(['-', '_'], "");
        Ok(match lower.as_str() {
            "none" => RegistrationMode::None,
            "initial" => RegistrationMode::Initial,
            "rigid" => RegistrationMode::Rigid,
            "affine" => RegistrationMode::Affine,
            "bspline" => RegistrationMode::BSpline,
            "pipelinerigid" => RegistrationMode::PipelineRigid,
            "pipelineaffine" => RegistrationMode::PipelineAffine,
            "pipelinebspline" => RegistrationMode::PipelineBSpline,
            _ => return Err(format!("unknown registration mode '{}'", s)),
        })
    }
}

/// Longest accepted per-stage time budget (one year).
pub const MAX_TIME_BUDGET_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// Whole-pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: RegistrationMode,
    pub metric: MetricKind,
    pub interpolation: InterpolationKind,
    pub initial_method: InitialMethod,

    pub expected_offset: f64,
    pub expected_rotation: f64,
    pub expected_scale: f64,
    pub expected_skew: f64,

    pub use_overlap_as_roi: bool,
    pub intensity_threshold: Option<f64>,
    /// Explicit per-stage sample count; overrides the sampling ratios.
    pub sample_count: Option<usize>,
    /// 0 draws a fresh seed every run.
    pub seed: u64,

    pub rigid_iterations: usize,
    pub rigid_sampling_ratio: f64,
    pub rigid_target_error: f64,
    pub rigid_max_step: f64,

    pub affine_iterations: usize,
    pub affine_sampling_ratio: f64,
    pub affine_target_error: f64,
    pub affine_max_step: f64,

    pub bspline_iterations: usize,
    pub bspline_sampling_ratio: f64,
    pub bspline_target_error: f64,
    pub bspline_max_step: f64,
    pub control_point_spacing: f64,
    pub accuracy: Accuracy,

    pub relaxation: f64,
    pub gradient_tolerance: f64,
    /// Per-stage wall-clock budget in seconds.
    pub time_budget_secs: Option<f64>,

    /// Bake the current matrix into the moving image before the Affine and BSpline stages.
    pub resample_between_stages: bool,
    /// Bake a loaded matrix transform into the moving image up front.
    pub enable_loaded_registration: bool,
    pub default_pixel_value: f64,
    /// Worker threads; 0 uses the global pool.
    pub threads: usize,
    pub log_interval: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let magnitudes = ExpectedMagnitudes::default();
        Self {
            mode: RegistrationMode::default(),
            metric: MetricKind::default(),
            interpolation: InterpolationKind::default(),
            initial_method: InitialMethod::ImageCenters,
            expected_offset: magnitudes.offset,
            expected_rotation: magnitudes.rotation,
            expected_scale: magnitudes.scale,
            expected_skew: magnitudes.skew,
            use_overlap_as_roi: false,
            intensity_threshold: None,
            sample_count: None,
            seed: 0,
            rigid_iterations: 100,
            rigid_sampling_ratio: 0.1,
            rigid_target_error: 1e-3,
            rigid_max_step: 0.25,
            affine_iterations: 100,
            affine_sampling_ratio: 0.1,
            affine_target_error: 1e-3,
            affine_max_step: 0.25,
            bspline_iterations: 50,
            bspline_sampling_ratio: 0.05,
            bspline_target_error: 1e-3,
            bspline_max_step: 0.25,
            control_point_spacing: 20.0,
            accuracy: Accuracy::Full,
            relaxation: 0.5,
            gradient_tolerance: 1e-8,
            time_budget_secs: None,
            resample_between_stages: false,
            enable_loaded_registration: true,
            default_pixel_value: 0.0,
            threads: 0,
            log_interval: 50,
        }
    }
}

impl PipelineConfig {
    pub fn new(mode: RegistrationMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: RegistrationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_metric(mut self, metric: MetricKind) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_interpolation(mut self, interpolation: InterpolationKind) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_initial_method(mut self, method: InitialMethod) -> Self {
        self.initial_method = method;
        self
    }

    pub fn with_magnitudes(mut self, magnitudes: ExpectedMagnitudes) -> Self {
        self.expected_offset = magnitudes.offset;
        self.expected_rotation = magnitudes.rotation;
        self.expected_scale = magnitudes.scale;
        self.expected_skew = magnitudes.skew;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_rigid(mut self, iterations: usize, sampling_ratio: f64) -> Self {
        self.rigid_iterations = iterations;
        self.rigid_sampling_ratio = sampling_ratio;
        self
    }

    pub fn with_affine(mut self, iterations: usize, sampling_ratio: f64) -> Self {
        self.affine_iterations = iterations;
        self.affine_sampling_ratio = sampling_ratio;
        self
    }

    pub fn with_bspline(mut self, iterations: usize, sampling_ratio: f64, control_point_spacing: f64) -> Self {
        self.bspline_iterations = iterations;
        self.bspline_sampling_ratio = sampling_ratio;
        self.control_point_spacing = control_point_spacing;
        self
    }

    pub fn with_accuracy(mut self, accuracy: Accuracy) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_resample_between_stages(mut self, enabled: bool) -> Self {
        self.resample_between_stages = enabled;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget_secs = Some(budget.as_secs_f64());
        self
    }

    pub fn magnitudes(&self) -> ExpectedMagnitudes {
        ExpectedMagnitudes {
            offset: self.expected_offset,
            rotation: self.expected_rotation,
            scale: self.expected_scale,
            skew: self.expected_skew,
        }
    }

    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            ratio: 1.0,
            count: self.sample_count,
            use_overlap_as_roi: self.use_overlap_as_roi,
            intensity_threshold: self.intensity_threshold,
            seed: self.seed,
        }
    }

    fn optimizer(&self, iterations: usize, sampling_ratio: f64, target_error: f64, max_step: f64) -> OptimizerStageConfig {
        OptimizerStageConfig {
            iterations,
            sampling_ratio,
            target_error,
            max_step,
            relaxation: self.relaxation,
            gradient_tolerance: self.gradient_tolerance,
            time_budget: self.time_budget_secs.and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        }
    }

    /// Settings of an optimizing stage; `None` for stages that do not optimize.
    pub fn stage_config(&self, stage: PipelineStage) -> Option<StageConfig> {
        match stage {
            PipelineStage::Rigid => Some(StageConfig::Rigid(self.optimizer(
                self.rigid_iterations,
                self.rigid_sampling_ratio,
                self.rigid_target_error,
                self.rigid_max_step,
            ))),
            PipelineStage::Affine => Some(StageConfig::Affine(self.optimizer(
                self.affine_iterations,
                self.affine_sampling_ratio,
                self.affine_target_error,
                self.affine_max_step,
            ))),
            PipelineStage::BSpline => Some(StageConfig::BSpline(BSplineStageConfig {
                optimizer: self.optimizer(
                    self.bspline_iterations,
                    self.bspline_sampling_ratio,
                    self.bspline_target_error,
                    self.bspline_max_step,
                ),
                control_point_spacing: self.control_point_spacing,
                accuracy: self.accuracy,
            })),
            _ => None,
        }
    }

    /// Range and consistency checks.
    pub fn validate(&self) -> Result<(), InputError> {
        if !self.magnitudes().is_valid() {
            return Err(InputError::invalid_configuration(format!(
                "expected magnitudes must be positive: {:?}",
                self.magnitudes()
            )));
        }
        self.sampling().validate()?;

        for (name, iterations, ratio, target, max_step) in [
            ("rigid", self.rigid_iterations, self.rigid_sampling_ratio, self.rigid_target_error, self.rigid_max_step),
            ("affine", self.affine_iterations, self.affine_sampling_ratio, self.affine_target_error, self.affine_max_step),
            (
                "bspline",
                self.bspline_iterations,
                self.bspline_sampling_ratio,
                self.bspline_target_error,
                self.bspline_max_step,
            ),
        ] {
            require_nonzero(&format!("{}_iterations", name), iterations)?;
            require_ratio(&format!("{}_sampling_ratio", name), ratio)?;
            require_positive(&format!("{}_target_error", name), target)?;
            require_positive(&format!("{}_max_step", name), max_step)?;
            if max_step < target {
                return Err(InputError::invalid_configuration(format!(
                    "{}_max_step ({}) is below {}_target_error ({})",
                    name, max_step, name, target
                )));
            }
        }

        require_positive("control_point_spacing", self.control_point_spacing)?;
        if !(self.relaxation > 0.0 && self.relaxation < 1.0) {
            return Err(InputError::invalid_configuration(format!(
                "relaxation must be in (0, 1), got {}",
                self.relaxation
            )));
        }
        if !(self.gradient_tolerance >= 0.0 && self.gradient_tolerance.is_finite()) {
            return Err(InputError::invalid_configuration("gradient_tolerance must be a non-negative number"));
        }
        if let Some(budget) = self.time_budget_secs {
            require_positive("time_budget_secs", budget)?;
            if budget > MAX_TIME_BUDGET_SECS {
                return Err(InputError::invalid_configuration(format!(
                    "time_budget_secs must be at most {}, got {}",
                    MAX_TIME_BUDGET_SECS, budget
                )));
            }
        }
        if !self.default_pixel_value.is_finite() {
            return Err(InputError::invalid_configuration("default_pixel_value must be finite"));
        }
        require_nonzero("log_interval", self.log_interval)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_stage_sets() {
        assert!(RegistrationMode::None.stages().is_empty());
        assert_eq!(RegistrationMode::Initial.stages(), &[PipelineStage::Init]);
        assert_eq!(RegistrationMode::BSpline.stages(), &[PipelineStage::BSpline]);
        assert_eq!(
            RegistrationMode::PipelineBSpline.stages(),
            &[PipelineStage::Init, PipelineStage::Rigid, PipelineStage::Affine, PipelineStage::BSpline]
        );
        assert!(RegistrationMode::PipelineAffine.enables(PipelineStage::Rigid));
        assert!(!RegistrationMode::PipelineAffine.enables(PipelineStage::BSpline));
        assert!(!RegistrationMode::BSpline.has_matrix_stage());
        assert!(RegistrationMode::Affine.has_matrix_stage());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("PipelineBSpline".parse::<RegistrationMode>().unwrap(), RegistrationMode::PipelineBSpline);
        assert_eq!("pipeline-rigid".parse::<RegistrationMode>().unwrap(), RegistrationMode::PipelineRigid);
        assert!("warp".parse::<RegistrationMode>().is_err());
    }

    #[test]
    fn test_default_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = PipelineConfig::default().with_rigid(0, 0.1);
        assert!(matches!(config.validate(), Err(InputError::InvalidConfiguration(m)) if m.contains("rigid_iterations")));

        let config = PipelineConfig::default().with_affine(10, 0.0);
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            expected_rotation: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            rigid_max_step: 1e-4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_time_budget_limits() {
        for secs in [f64::INFINITY, f64::NAN, 1e300, -1.0] {
            let config = PipelineConfig {
                time_budget_secs: Some(secs),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{} accepted", secs);
            // Never panics even when unvalidated.
            let stage = config.stage_config(PipelineStage::Rigid).unwrap();
            assert!(stage.optimizer().time_budget.is_none());
        }

        let config = PipelineConfig::default().with_time_budget(Duration::from_secs(30));
        assert!(config.validate().is_ok());
        let stage = config.stage_config(PipelineStage::Affine).unwrap();
        assert_eq!(stage.optimizer().time_budget, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_stage_config() {
        let config = PipelineConfig::default()
            .with_bspline(30, 0.2, 12.0)
            .with_accuracy(Accuracy::Fast)
            .with_time_budget(Duration::from_secs(5));
        match config.stage_config(PipelineStage::BSpline) {
            Some(StageConfig::BSpline(b)) => {
                assert_eq!(b.optimizer.iterations, 30);
                assert_eq!(b.control_point_spacing, 12.0);
                assert_eq!(b.accuracy, Accuracy::Fast);
                assert_eq!(b.optimizer.time_budget, Some(Duration::from_secs(5)));
            }
            other => panic!("unexpected stage config {:?}", other),
        }
        assert!(config.stage_config(PipelineStage::Init).is_none());
        assert_eq!(config.stage_config(PipelineStage::Rigid).map(|s| s.stage()), Some(PipelineStage::Rigid));
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"mode": "PipelineRigid", "metric": "MattesMI", "rigid_iterations": 40}"#).unwrap();
        assert_eq!(config.mode, RegistrationMode::PipelineRigid);
        assert_eq!(config.metric, MetricKind::MattesMI);
        assert_eq!(config.rigid_iterations, 40);
        assert_eq!(config.affine_iterations, PipelineConfig::default().affine_iterations);
    }
}
