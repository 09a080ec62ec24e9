//! Normalized Cross Correlation (NCC) metric implementation.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use super::trait_::{weighted_mean, Metric};

/// Normalized Cross Correlation Metric.
///
/// Computes the zero-normalized cross correlation between intensities:
/// NCC = Σ w (F - mean(F)) (M - mean(M)) / sqrt(Σ w (F - mean(F))² · Σ w (M - mean(M))²)
///
/// Returns negative NCC as loss (to be minimized).
/// Range: [-1, 1], where -1 is perfect correlation (minimized loss).
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedCorrelation;

impl NormalizedCorrelation {
    /// Create a new NCC metric.
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Metric<B> for NormalizedCorrelation {
    fn evaluate(&self, fixed: Tensor<B, 1>, moving: Tensor<B, 1>, weights: Tensor<B, 1>) -> Tensor<B, 1> {
        let total = weights.clone().sum();
        let mean_f = weighted_mean(fixed.clone(), weights.clone(), total.clone());
        let mean_m = weighted_mean(moving.clone(), weights.clone(), total);

        let f_centered = fixed - mean_f;
        let m_centered = moving - mean_m;

        let numerator = (f_centered.clone() * m_centered.clone() * weights.clone()).sum();
        let denom_f = (f_centered.powf_scalar(2.0) * weights.clone()).sum();
        let denom_m = (m_centered.powf_scalar(2.0) * weights).sum();

        (numerator / (denom_f * denom_m).sqrt()).neg()
    }

    fn name(&self) -> &'static str {
        "NormalizedCorrelation"
    }

    fn optimal_value(&self) -> f64 {
        -1.0
    }
}
