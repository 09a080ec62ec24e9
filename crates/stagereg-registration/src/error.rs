//! Error types for registration operations.
//!
//! Errors are split by how far they reach: input errors abort before any stage
//! runs, stage errors end the current stage only, and the pipeline error wraps
//! either with enough context to recover the last good transform.

use thiserror::Error;
use stagereg_core::error::CoreError;
use stagereg_core::transform::TransformParameters;
use crate::pipeline::PipelineStage;

/// Problems with the inputs or the configuration, detected before any stage runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    /// An image has an unusable grid.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Fixed and moving inputs disagree on dimensionality.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A mask does not fit the image it restricts.
    #[error("Mask geometry error: {0}")]
    MaskGeometry(String),

    /// The region samples would be drawn from is empty.
    #[error("Empty sampling region: {0}")]
    EmptyRegion(String),

    /// A configuration value is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A loaded transform cannot be combined with the enabled stages.
    #[error("Incompatible loaded transform: {0}")]
    IncompatibleLoadedTransform(String),
}

impl InputError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a mask geometry error.
    pub fn mask_geometry(msg: impl Into<String>) -> Self {
        Self::MaskGeometry(msg.into())
    }
}

impl From<CoreError> for InputError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::DimensionMismatch { expected, actual } => Self::DimensionMismatch { expected, actual },
            CoreError::InvalidGeometry(msg) => Self::InvalidGeometry(msg),
            other => Self::InvalidConfiguration(other.to_string()),
        }
    }
}

/// Numeric failures that end a single stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// The metric evaluated to NaN or infinity.
    #[error("Metric undefined at iteration {iteration} ({valid_samples} valid samples)")]
    UndefinedMetric { iteration: usize, valid_samples: usize },

    /// Too few candidate samples in the sampling region.
    #[error("Insufficient samples: found {found}, need at least {required}")]
    InsufficientSamples { found: usize, required: usize },

    /// A transform decomposition met a singular matrix.
    #[error("Singular transform: {0}")]
    SingularTransform(String),

    /// The optimizer left the finite domain or blew the metric up.
    #[error("Optimizer diverged at iteration {iteration} (value {value})")]
    Diverged { iteration: usize, value: f64 },

    /// Any other failure raised by the transform or image model.
    #[error("Transform model error: {0}")]
    Core(CoreError),
}

impl From<CoreError> for StageError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Singular(msg) => Self::SingularTransform(msg),
            other => Self::Core(other),
        }
    }
}

/// Error returned by [`RegistrationPipeline`](crate::pipeline::RegistrationPipeline).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The inputs or configuration were rejected.
    #[error(transparent)]
    Input(#[from] InputError),

    /// A stage failed; `snapshot` holds the matrix transform in force at that point.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: PipelineStage,
        source: StageError,
        snapshot: TransformParameters,
    },

    /// `update()` was called a second time.
    #[error("Registration pipeline has already run")]
    AlreadyRun,
}

impl PipelineError {
    /// Stage that failed, if this is a stage error.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Result type for stage operations.
pub type Result<T> = std::result::Result<T, StageError>;
