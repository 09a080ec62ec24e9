//! Staged image registration.
//!
//! A [`RegistrationPipeline`] sequences initialization, rigid, affine and
//! B-spline stages against a similarity metric, carrying each stage's result
//! forward and keeping the last good transform when a stage fails.

pub mod error;
pub mod validation;
pub mod sampler;
pub mod metric;
pub mod optimizer;
pub mod initializer;
pub mod progress;
pub mod stage;
pub mod config;
pub mod pipeline;

pub use error::{InputError, PipelineError, Result, StageError};
pub use sampler::{FixedSampler, MaskRegion, SampleSet, SamplingConfig};
pub use metric::{Metric, MetricKind, SimilarityMetric};
pub use optimizer::{Optimizer, RegularStepGradientDescent};
pub use initializer::{InitialMethod, Landmarks};
pub use progress::{ConsoleProgressCallback, HistoryCallback, ProgressCallback, ProgressInfo, ProgressTracker};
pub use stage::{run_stage, Accuracy, BSplineStageConfig, OptimizerStageConfig, StageConfig, StageInitial, StageProblem, StageResult};
pub use config::{PipelineConfig, RegistrationMode};
pub use pipeline::{PipelineStage, RegistrationInputs, RegistrationPipeline, RegistrationReport, StageReport};
