//! Metric implementations.
//!
//! This module contains the similarity metrics used for image registration
//! and the runtime selection between them.

use std::fmt;
use std::str::FromStr;
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

pub mod trait_;
pub mod mse;
pub mod ncc;
pub mod mattes;

pub use trait_::Metric;
pub use mse::MeanSquaredError;
pub use ncc::NormalizedCorrelation;
pub use mattes::MattesMutualInformation;

/// Metric selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetricKind {
    NormCorr,
    #[default]
    MeanSqrd,
    MattesMI,
}

impl MetricKind {
    pub fn name(self) -> &'static str {
        match self {
            MetricKind::NormCorr => "NormCorr",
            MetricKind::MeanSqrd => "MeanSqrd",
            MetricKind::MattesMI => "MattesMI",
        }
    }

    /// Instantiate the metric.
    pub fn build(self) -> SimilarityMetric {
        match self {
            MetricKind::NormCorr => SimilarityMetric::NormCorr(NormalizedCorrelation::new()),
            MetricKind::MeanSqrd => SimilarityMetric::MeanSqrd(MeanSquaredError::new()),
            MetricKind::MattesMI => SimilarityMetric::MattesMI(MattesMutualInformation::default()),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normcorr" | "ncc" => Ok(MetricKind::NormCorr),
            "meansqrd" | "mse" => Ok(MetricKind::MeanSqrd),
            "mattesmi" | "mi" => Ok(MetricKind::MattesMI),
            _ => Err(format!("unknown metric '{}'", s)),
        }
    }
}

/// Runtime-selected metric.
#[derive(Debug, Clone, Copy)]
pub enum SimilarityMetric {
    NormCorr(NormalizedCorrelation),
    MeanSqrd(MeanSquaredError),
    MattesMI(MattesMutualInformation),
}

impl<B: Backend> Metric<B> for SimilarityMetric {
    fn evaluate(&self, fixed: Tensor<B, 1>, moving: Tensor<B, 1>, weights: Tensor<B, 1>) -> Tensor<B, 1> {
        match self {
            SimilarityMetric::NormCorr(m) => m.evaluate(fixed, moving, weights),
            SimilarityMetric::MeanSqrd(m) => m.evaluate(fixed, moving, weights),
            SimilarityMetric::MattesMI(m) => m.evaluate(fixed, moving, weights),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SimilarityMetric::NormCorr(m) => Metric::<B>::name(m),
            SimilarityMetric::MeanSqrd(m) => Metric::<B>::name(m),
            SimilarityMetric::MattesMI(m) => Metric::<B>::name(m),
        }
    }

    fn optimal_value(&self) -> f64 {
        match self {
            SimilarityMetric::NormCorr(m) => Metric::<B>::optimal_value(m),
            SimilarityMetric::MeanSqrd(m) => Metric::<B>::optimal_value(m),
            SimilarityMetric::MattesMI(m) => Metric::<B>::optimal_value(m),
        }
    }
}
