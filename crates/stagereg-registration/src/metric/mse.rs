//! Mean Squared Error metric implementation.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use super::trait_::{weighted_mean, Metric};

/// Mean Squared Error Metric.
///
/// Computes the weighted mean squared difference between intensities:
/// MSE = Σ w (Fixed(x) - Moving(T(x)))² / Σ w
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaredError;

impl MeanSquaredError {
    /// Create a new MSE metric.
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Metric<B> for MeanSquaredError {
    fn evaluate(&self, fixed: Tensor<B, 1>, moving: Tensor<B, 1>, weights: Tensor<B, 1>) -> Tensor<B, 1> {
        let total = weights.clone().sum();
        let diff = moving - fixed;
        weighted_mean(diff.powf_scalar(2.0), weights, total)
    }

    fn name(&self) -> &'static str {
        "MeanSquaredError"
    }

    fn optimal_value(&self) -> f64 {
        0.0
    }
}
