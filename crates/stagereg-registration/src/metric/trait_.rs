//! Metric trait for image similarity measurement.
//!
//! This module defines the core Metric trait that all similarity metrics
//! must implement for image registration.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

/// Metric trait for measuring similarity between sampled intensities.
///
/// Metrics compute a loss value that represents the dissimilarity between
/// fixed intensities and the moving intensities found at the mapped sample
/// points. Lower values indicate better alignment.
///
/// Each sample carries a weight in `[0, 1]`; samples mapped outside the moving
/// image or its mask have weight 0 and must not contribute. A zero total
/// weight yields NaN.
///
/// # Type Parameters
/// * `B` - The tensor backend
pub trait Metric<B: Backend> {
    /// Calculate the loss between fixed and moving samples.
    ///
    /// # Arguments
    /// * `fixed` - Fixed image intensities `[N]`
    /// * `moving` - Interpolated moving image intensities `[N]`
    /// * `weights` - Sample validity weights `[N]`
    ///
    /// # Returns
    /// Tensor of shape `[1]` holding the loss
    fn evaluate(&self, fixed: Tensor<B, 1>, moving: Tensor<B, 1>, weights: Tensor<B, 1>) -> Tensor<B, 1>;

    /// Get the name of this metric.
    fn name(&self) -> &'static str;

    /// Loss value of a perfect match.
    fn optimal_value(&self) -> f64;
}

/// Weighted mean of `values`: `Σ w·v / Σ w`.
pub(crate) fn weighted_mean<B: Backend>(values: Tensor<B, 1>, weights: Tensor<B, 1>, total: Tensor<B, 1>) -> Tensor<B, 1> {
    (values * weights).sum() / total
}
