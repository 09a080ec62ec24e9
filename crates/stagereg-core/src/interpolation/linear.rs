//! Linear interpolation implementation.
//!
//! This module provides linear interpolation (bilinear for 2D, trilinear for 3D).

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use serde::{Serialize, Deserialize};
use super::kernel::{sample_separable, AxisTaps, Boundary};
use super::trait_::Interpolator;

/// Linear Interpolator.
///
/// Performs linear interpolation (bilinear for 2D, trilinear for 3D).
/// Differentiable with respect to the sample coordinates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LinearInterpolator;

impl LinearInterpolator {
    /// Create a new linear interpolator.
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Interpolator<B> for LinearInterpolator {
    fn interpolate<const D: usize>(&self, data: &Tensor<B, D>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        sample_separable(data, indices, AxisTaps::linear, Boundary::Clamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_linear_interpolation_2d() {
        let device = Default::default();
        // 2x2 image:
        // [[0, 1],
        //  [2, 3]]
        let data = Tensor::<TestBackend, 2>::from_floats([[0.0, 1.0], [2.0, 3.0]], &device);

        // (0.5, 0.5) is the average of all four, (1.0, 0.5) interpolates the right column
        let indices = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.5], [1.0, 0.5], [0.0, 0.0]], &device);
        let values = LinearInterpolator::new().interpolate(&data, indices);
        let values = values.into_data().to_vec::<f32>().unwrap();

        assert!((values[0] - 1.5).abs() < 1e-6);
        assert!((values[1] - 2.0).abs() < 1e-6);
        assert!((values[2] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_linear_interpolation_3d() {
        let device = Default::default();
        // value = x + 2y + 4z on a 2x2x2 volume
        let data = Tensor::<TestBackend, 1>::from_floats(
            [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
            &device,
        )
        .reshape([2, 2, 2]);
        let indices = Tensor::<TestBackend, 2>::from_floats([[0.25, 0.5, 0.75]], &device);
        let value = LinearInterpolator::new().interpolate(&data, indices).into_scalar();
        assert!((value - (0.25 + 1.0 + 3.0)).abs() < 1e-5);
    }

    #[test]
    fn test_linear_gradient_wrt_coordinates() {
        type AD = Autodiff<TestBackend>;
        let device = Default::default();
        // value = 3x along a row
        let data = Tensor::<AD, 2>::from_floats([[0.0, 3.0, 6.0, 9.0]], &device);
        let indices = Tensor::<AD, 2>::from_floats([[1.4, 0.0]], &device).require_grad();
        let value = LinearInterpolator::new().interpolate(&data, indices.clone()).sum();
        let grads = value.backward();
        let g = indices.grad(&grads).unwrap().into_data().to_vec::<f32>().unwrap();
        assert!((g[0] - 3.0).abs() < 1e-5);
    }
}
