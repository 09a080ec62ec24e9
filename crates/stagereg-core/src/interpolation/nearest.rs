//! Nearest neighbor interpolation implementation.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use super::kernel::{sample_separable, AxisTaps, Boundary};
use super::trait_::Interpolator;

/// Nearest Neighbor Interpolator.
///
/// Picks the value of the closest voxel. Not differentiable with respect to
/// the sample coordinates; intended for label images and masks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NearestNeighborInterpolator;

impl NearestNeighborInterpolator {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Interpolator<B> for NearestNeighborInterpolator {
    fn interpolate<const D: usize>(&self, data: &Tensor<B, D>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        sample_separable(data, indices, AxisTaps::nearest, Boundary::Clamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_nearest_3d() {
        let device = Default::default();
        let data = Tensor::<TestBackend, 1>::from_floats(
            [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
            &device,
        )
        .reshape([2, 2, 2]);

        let indices = Tensor::<TestBackend, 2>::from_floats(
            [[0.2, 0.1, 0.0], [0.6, 0.0, 0.9], [1.4, 1.4, 1.4]],
            &device,
        );
        let result = NearestNeighborInterpolator::new().interpolate(&data, indices);
        assert_eq!(result.into_data().to_vec::<f32>().unwrap(), vec![0.0, 5.0, 7.0]);
    }

    #[test]
    fn test_nearest_clamps_outside() {
        let device = Default::default();
        let data = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);
        let indices = Tensor::<TestBackend, 2>::from_floats([[-3.0, 0.0], [5.0, 5.0]], &device);
        let result = NearestNeighborInterpolator::new().interpolate(&data, indices);
        assert_eq!(result.into_data().to_vec::<f32>().unwrap(), vec![1.0, 4.0]);
    }
}
