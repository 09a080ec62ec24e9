//! Affine transform implementation.
//!
//! This module provides an affine transform (linear transformation + translation).

use burn::tensor::{Tensor, TensorData};
use burn::tensor::backend::Backend;
use super::matrix::MatrixTransform;
use super::parameters::angle_count;
use super::rigid::{point_tensor, rotation_matrix};
use super::trait_::{map_chunked, Transform};

/// Affine Transform (Linear transformation + Translation).
///
/// Represents a general affine transformation with a fixed center:
/// T(x) = A(x - c) + c + t
///
/// where:
/// * A is a D×D matrix (linear transformation: rotation, scale, shear)
/// * t is a D-dimensional translation vector
/// * c is a D-dimensional fixed center of rotation/scaling
#[derive(Debug, Clone)]
pub struct AffineTransform<B: Backend, const D: usize> {
    matrix: Tensor<B, 2>,      // [D, D] linear transformation matrix
    translation: Tensor<B, 1>, // [D] translation vector
    center: Tensor<B, 1>,      // [D] fixed center
}

impl<B: Backend, const D: usize> AffineTransform<B, D> {
    /// Create a new affine transform.
    ///
    /// # Arguments
    /// * `matrix` - Tensor of shape `[D, D]` containing the linear transformation matrix
    /// * `translation` - Tensor of shape `[D]` containing the translation vector
    /// * `center` - Tensor of shape `[D]` containing the fixed center
    pub fn new(matrix: Tensor<B, 2>, translation: Tensor<B, 1>, center: Tensor<B, 1>) -> Self {
        Self {
            matrix,
            translation,
            center,
        }
    }

    /// Create an identity affine transform.
    ///
    /// # Arguments
    /// * `center` - Optional center of rotation. If None, uses origin (0,0...0).
    /// * `device` - Device to create tensors on.
    pub fn identity(center: Option<Tensor<B, 1>>, device: &B::Device) -> Self {
        let matrix = Tensor::<B, 2>::eye(D, device);
        let translation = Tensor::<B, 1>::zeros([D], device);
        let center = center.unwrap_or_else(|| Tensor::<B, 1>::zeros([D], device));
        Self::new(matrix, translation, center)
    }

    /// Constant tensor copy of a CPU matrix transform.
    pub fn from_matrix_transform(transform: &MatrixTransform<D>, device: &B::Device) -> Self {
        let linear = transform.linear();
        let mut values = Vec::with_capacity(D * D);
        for r in 0..D {
            for c in 0..D {
                values.push(linear[(r, c)] as f32);
            }
        }
        let matrix = Tensor::from_data(TensorData::new(values, [D, D]), device);
        let translation: Vec<f32> = transform.translation().to_vec().into_iter().map(|v| v as f32).collect();
        let translation = Tensor::from_data(TensorData::new(translation, [D]), device);
        Self::new(matrix, translation, point_tensor(transform.center(), device))
    }

    /// Build from a flat parameter tensor in the affine layout
    /// `[angles.., translation.., scales.., skews..]`, with `A = R · S · K`.
    pub fn from_parameter_tensor(parameters: Tensor<B, 1>, center: Tensor<B, 1>) -> Self {
        let device = parameters.device();
        let angles = angle_count(D);
        let rotation = rotation_matrix::<B, D>(parameters.clone().slice([0..angles]));
        let translation = parameters.clone().slice([angles..angles + D]);

        // S · K is upper triangular: diagonal s_i, entries s_i * k_ij above it
        let scale_start = angles + D;
        let skew_start = angles + 2 * D;
        let mut skew_index = skew_start;
        let mut rows = Vec::with_capacity(D);
        for i in 0..D {
            let s = parameters.clone().slice([scale_start + i..scale_start + i + 1]);
            let mut row = Vec::with_capacity(D);
            for j in 0..D {
                if j < i {
                    row.push(Tensor::<B, 1>::zeros([1], &device));
                } else if j == i {
                    row.push(s.clone());
                } else {
                    let k = parameters.clone().slice([skew_index..skew_index + 1]);
                    skew_index += 1;
                    row.push(s.clone() * k);
                }
            }
            rows.push(Tensor::cat(row, 0).reshape([1, D]));
        }
        let scale_shear = Tensor::cat(rows, 0);

        Self::new(rotation.matmul(scale_shear), translation, center)
    }

    /// Get the transformation matrix.
    pub fn matrix(&self) -> Tensor<B, 2> {
        self.matrix.clone()
    }

    /// Get the translation vector.
    pub fn translation(&self) -> Tensor<B, 1> {
        self.translation.clone()
    }

    /// Get the center of rotation.
    pub fn center(&self) -> Tensor<B, 1> {
        self.center.clone()
    }
}

impl<B: Backend, const D: usize> Transform<B, D> for AffineTransform<B, D> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        // In row vector notation (standard for Burn inputs [N, D]):
        // y = (x - c) @ A^T + c + t
        let c = self.center.clone().reshape([1, D]);
        let t = self.translation.clone().reshape([1, D]);
        let a_t = self.matrix.clone().transpose();

        map_chunked(points, |chunk| {
            let centered = chunk - c.clone();
            centered.matmul(a_t.clone()) + c.clone() + t.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{Point, Vector};
    use crate::transform::parameters::{TransformKind, TransformParameters};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_affine_transform_identity() {
        let device = Default::default();
        let transform = AffineTransform::<TestBackend, 3>::identity(None, &device);

        let points = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], &device);
        let transformed = transform.transform_points(points);

        // Identity transform should not change points
        assert_eq!(
            transformed.into_data().to_vec::<f32>().unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
    }

    #[test]
    fn test_affine_transform_scale_with_center() {
        let device = Default::default();

        // Matrix: Scale by 2.0
        let matrix = Tensor::<TestBackend, 2>::eye(2, &device) * 2.0;
        let translation = Tensor::<TestBackend, 1>::zeros([2], &device);
        let center = Tensor::<TestBackend, 1>::from_floats([1.0, 1.0], &device);
        let transform = AffineTransform::<TestBackend, 2>::new(matrix, translation, center);

        // x - c = [1, 0], A(x-c) = [2, 0], + c = [3, 1]
        let points = Tensor::<TestBackend, 2>::from_floats([[2.0, 1.0]], &device);
        let slice = transform.transform_points(points).into_data().to_vec::<f32>().unwrap();

        assert!((slice[0] - 3.0).abs() < 1e-6);
        assert!((slice[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_parameter_tensor_matches_cpu_model() {
        let device = Default::default();
        let raw = vec![0.2, -0.1, 0.3, 1.0, -2.0, 0.5, 1.1, 0.9, 1.3, 0.1, -0.05, 0.2];
        let center = Point::new([5.0, 6.0, 7.0]);
        let cpu = MatrixTransform::<3>::from_parameters(&TransformParameters::new(
            TransformKind::Affine,
            3,
            raw.clone(),
            center.to_vec(),
        ))
        .unwrap();

        let params: Vec<f32> = raw.iter().map(|&v| v as f32).collect();
        let tensor = AffineTransform::<TestBackend, 3>::from_parameter_tensor(
            Tensor::from_floats(params.as_slice(), &device),
            point_tensor(&center, &device),
        );

        let p = Point::new([1.0, 2.0, 3.0]);
        let expected = cpu.transform_point(&p);
        let points = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 3.0]], &device);
        let got = tensor.transform_points(points).into_data().to_vec::<f32>().unwrap();
        for i in 0..3 {
            assert!((got[i] as f64 - expected[i]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_from_matrix_transform() {
        let device = Default::default();
        let cpu = MatrixTransform::translation_only(Vector::new([1.5, -0.5]), Point::new([3.0, 3.0]));
        let tensor = AffineTransform::<TestBackend, 2>::from_matrix_transform(&cpu, &device);
        let points = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0]], &device);
        assert_eq!(tensor.transform_points(points).into_data().to_vec::<f32>().unwrap(), vec![1.5, -0.5]);
    }
}
