//! The composed result of a registration: a matrix transform plus an optional
//! B-spline displacement field.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use crate::spatial::Point;
use super::affine::AffineTransform;
use super::bspline::BSplineTransform;
use super::deformable::DeformableTransform;
use super::matrix::MatrixTransform;
use super::trait_::Transform;

/// Fixed → moving mapping `T(x) = M(x) + d(x)`.
///
/// The matrix part is applied first and the displacement of the deformable
/// part, evaluated at the fixed point, is added to its result. Without a
/// deformable part `T = M` exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationTransform<const D: usize> {
    pub matrix: MatrixTransform<D>,
    pub deformable: Option<DeformableTransform<D>>,
}

impl<const D: usize> RegistrationTransform<D> {
    pub fn new(matrix: MatrixTransform<D>, deformable: Option<DeformableTransform<D>>) -> Self {
        Self { matrix, deformable }
    }

    /// Identity mapping with the matrix centred at `center`.
    pub fn identity(center: Point<D>) -> Self {
        Self::new(MatrixTransform::identity(center), None)
    }

    /// Matrix-only transform.
    pub fn from_matrix(matrix: MatrixTransform<D>) -> Self {
        Self::new(matrix, None)
    }

    /// Map one physical point.
    pub fn transform_point(&self, point: &Point<D>) -> Point<D> {
        let mapped = self.matrix.transform_point(point);
        match &self.deformable {
            Some(field) => mapped + field.displacement_at(point),
            None => mapped,
        }
    }

    /// Map a point set (fixed physical space → moving physical space).
    pub fn transform_points(&self, points: &[Point<D>]) -> Vec<Point<D>> {
        points.iter().map(|p| self.transform_point(p)).collect()
    }

    /// Tensor form of this transform on `device`.
    pub fn to_tensor_transform<B: Backend>(&self, device: &B::Device) -> TensorTransform<B, D> {
        match &self.deformable {
            Some(field) => TensorTransform::BSpline(BSplineTransform::from_deformable(field, Some(&self.matrix), device)),
            None => TensorTransform::Affine(AffineTransform::from_matrix_transform(&self.matrix, device)),
        }
    }
}

/// Tensor evaluation of a [`RegistrationTransform`].
#[derive(Debug, Clone)]
pub enum TensorTransform<B: Backend, const D: usize> {
    Affine(AffineTransform<B, D>),
    BSpline(BSplineTransform<B, D>),
}

impl<B: Backend, const D: usize> Transform<B, D> for TensorTransform<B, D> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            TensorTransform::Affine(t) => t.transform_points(points),
            TensorTransform::BSpline(t) => t.transform_points(points),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{BoundingBox, Vector};
    use crate::transform::deformable::BSplineGrid;
    use crate::transform::matrix::rotation_from_angles;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn rigid() -> MatrixTransform<2> {
        MatrixTransform::new(
            rotation_from_angles::<2>(&[0.25]).unwrap(),
            Vector::new([2.0, -1.0]),
            Point::new([8.0, 8.0]),
        )
    }

    #[test]
    fn test_identity_deformable_is_matrix() {
        let bounds = BoundingBox::new(Point::new([0.0, 0.0]), Point::new([16.0, 16.0]));
        let grid = BSplineGrid::covering(&bounds, &Vector::new([4.0, 4.0])).unwrap();
        let with_field = RegistrationTransform::new(rigid(), Some(DeformableTransform::zeros(grid)));
        let matrix_only = RegistrationTransform::from_matrix(rigid());
        for p in [Point::new([0.0, 0.0]), Point::new([3.5, 12.25]), Point::new([16.0, 9.0])] {
            assert!(with_field.transform_point(&p).distance(&matrix_only.transform_point(&p)) < 1e-12);
        }
    }

    #[test]
    fn test_tensor_form_matches_cpu() {
        let device = Default::default();
        let bounds = BoundingBox::new(Point::new([0.0, 0.0]), Point::new([16.0, 16.0]));
        let grid = BSplineGrid::covering(&bounds, &Vector::new([4.0, 4.0])).unwrap();
        let coefficients = (0..grid.num_parameters()).map(|i| (i % 5) as f64 * 0.2).collect();
        let field = DeformableTransform::new(grid, coefficients).unwrap();
        let transform = RegistrationTransform::new(rigid(), Some(field));

        let p = Point::new([5.0, 6.0]);
        let expected = transform.transform_point(&p);
        let tensor = transform.to_tensor_transform::<TestBackend>(&device);
        let points = Tensor::<TestBackend, 2>::from_floats([[5.0, 6.0]], &device);
        let got = tensor.transform_points(points).into_data().to_vec::<f32>().unwrap();
        assert!((got[0] as f64 - expected[0]).abs() < 1e-4);
        assert!((got[1] as f64 - expected[1]).abs() < 1e-4);
    }
}
