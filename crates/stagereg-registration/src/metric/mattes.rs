//! Mattes mutual information metric implementation.

use burn::tensor::{Int, Tensor};
use burn::tensor::backend::Backend;
use super::trait_::Metric;

/// Default number of histogram bins per image.
pub const DEFAULT_BINS: usize = 32;

/// Mutual Information Metric using Parzen Window estimation.
///
/// Computes the mutual information between the sampled intensities:
/// MI(F, M) = H(F) + H(M) - H(F, M)
/// where H is the Shannon entropy.
///
/// Every sample spreads its weight over neighbouring bins with a Gaussian
/// window one bin wide, so the joint histogram is differentiable in the
/// moving intensities. The bin ranges follow the sample extrema and are held
/// constant for the gradient.
#[derive(Debug, Clone, Copy)]
pub struct MattesMutualInformation {
    num_bins: usize,
}

impl MattesMutualInformation {
    /// Create a new Mattes metric.
    ///
    /// # Arguments
    /// * `num_bins` - Number of histogram bins per image (at least 2)
    pub fn new(num_bins: usize) -> Self {
        Self {
            num_bins: num_bins.max(2),
        }
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Parzen window weights `[N, bins]` of `values` against bins spanning their range.
    fn parzen_weights<B: Backend>(values: Tensor<B, 1>, num_bins: usize) -> Tensor<B, 2> {
        let n = values.dims()[0];
        let device = values.device();
        let detached = values.clone().detach();
        let min = detached.clone().min();
        let width = (detached.max() - min.clone()).clamp_min(1e-6) / ((num_bins - 1) as f64);

        let steps = Tensor::<B, 1, Int>::arange(0..num_bins as i64, &device).float();
        let centers = (min + steps * width.clone()).reshape([1, num_bins]);

        // Gaussian kernel: exp(-0.5 * ((x - c) / width)^2)
        let diff = (values.reshape([n, 1]) - centers) / width.reshape([1, 1]);
        (diff.powf_scalar(2.0) * -0.5).exp()
    }

    /// Compute entropy of a probability distribution.
    fn entropy<B: Backend, const D: usize>(probs: Tensor<B, D>) -> Tensor<B, 1> {
        let epsilon = 1e-10;
        let log_probs = (probs.clone() + epsilon).log();
        (probs * log_probs).sum().neg()
    }
}

impl Default for MattesMutualInformation {
    fn default() -> Self {
        Self::new(DEFAULT_BINS)
    }
}

impl<B: Backend> Metric<B> for MattesMutualInformation {
    fn evaluate(&self, fixed: Tensor<B, 1>, moving: Tensor<B, 1>, weights: Tensor<B, 1>) -> Tensor<B, 1> {
        let n = fixed.dims()[0];
        let bins = self.num_bins;

        let w_fixed = Self::parzen_weights(fixed, bins) * weights.reshape([n, 1]);
        let w_moving = Self::parzen_weights(moving, bins);

        // Joint histogram entry (i, j) is Σ_k w_f(k, i) · w_m(k, j)
        let joint = w_fixed.transpose().matmul(w_moving);
        let total = joint.clone().sum().reshape([1, 1]);
        let p_fm = joint / total;

        let p_f = p_fm.clone().sum_dim(1);
        let p_m = p_fm.clone().sum_dim(0);

        // -MI = H(F, M) - H(F) - H(M)
        Self::entropy(p_fm) - Self::entropy(p_f) - Self::entropy(p_m)
    }

    fn name(&self) -> &'static str {
        "MattesMutualInformation"
    }

    /// Mutual information has no fixed optimum; zero is its lower bound.
    fn optimal_value(&self) -> f64 {
        f64::NEG_INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn samples(n: usize) -> Vec<f32> {
        (0..n).map(|i| ((i * 37) % 101) as f32).collect()
    }

    #[test]
    fn test_identical_beats_shuffled() {
        let device = Default::default();
        let values = samples(400);
        let fixed = Tensor::<B, 1>::from_floats(values.as_slice(), &device);
        let shuffled: Vec<f32> = values.iter().rev().map(|v| (v * 13.0) % 101.0).collect();
        let moving = Tensor::<B, 1>::from_floats(shuffled.as_slice(), &device);
        let weights = Tensor::<B, 1>::ones([400], &device);
        let metric = MattesMutualInformation::default();

        let same = metric.evaluate(fixed.clone(), fixed.clone(), weights.clone()).into_scalar();
        let other = metric.evaluate(fixed, moving, weights).into_scalar();
        assert!(same < other, "identical {} vs shuffled {}", same, other);
        assert!(same < 0.0);
    }

    #[test]
    fn test_zero_weight_is_nan() {
        let device = Default::default();
        let fixed = Tensor::<B, 1>::from_floats([1.0, 2.0, 3.0], &device);
        let weights = Tensor::<B, 1>::zeros([3], &device);
        let loss = MattesMutualInformation::default().evaluate(fixed.clone(), fixed, weights).into_scalar();
        assert!(loss.is_nan());
    }
}
