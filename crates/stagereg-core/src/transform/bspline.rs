//! B-Spline transform implementation.
//!
//! This module provides a B-Spline free-form deformation transform on tensors.
//! An optional bulk affine transform is applied first and the spline
//! displacement is added to its result: `T(x) = M(x) + d(x)`.

use burn::tensor::{Tensor, TensorData};
use burn::tensor::backend::Backend;
use crate::interpolation::kernel::{axis_columns, gather_separable, AxisTaps, Boundary};
use super::affine::AffineTransform;
use super::deformable::{BSplineGrid, DeformableTransform};
use super::matrix::MatrixTransform;
use super::trait_::{map_chunked, Transform};

/// B-Spline Transform (Free-form deformation).
///
/// Uses a grid of control points to define a smooth deformation field.
/// The displacement is the cubic B-Spline interpolation of the control point
/// coefficients; node indices outside the grid are clamped.
#[derive(Debug, Clone)]
pub struct BSplineTransform<B: Backend, const D: usize> {
    /// Control point lattice
    grid: BSplineGrid<D>,
    /// Control point displacements [num_control_points, D]
    coefficients: Tensor<B, 2>,
    /// Matrix part applied before the displacement
    bulk: Option<AffineTransform<B, D>>,
}

impl<B: Backend, const D: usize> BSplineTransform<B, D> {
    /// Create a new B-Spline transform.
    ///
    /// # Arguments
    /// * `grid` - Control point lattice
    /// * `coefficients` - Control point displacements `[num_control_points, D]`, x fastest
    /// * `bulk` - Optional matrix transform applied before the displacement
    pub fn new(grid: BSplineGrid<D>, coefficients: Tensor<B, 2>, bulk: Option<AffineTransform<B, D>>) -> Self {
        Self {
            grid,
            coefficients,
            bulk,
        }
    }

    /// Build from a flat (control-point-major) parameter tensor.
    pub fn from_parameter_tensor(grid: BSplineGrid<D>, parameters: Tensor<B, 1>, bulk: Option<AffineTransform<B, D>>) -> Self {
        let coefficients = parameters.reshape([grid.num_nodes(), D]);
        Self::new(grid, coefficients, bulk)
    }

    /// Constant tensor copy of a CPU displacement field.
    pub fn from_deformable(
        field: &DeformableTransform<D>,
        bulk: Option<&MatrixTransform<D>>,
        device: &B::Device,
    ) -> Self {
        let grid = *field.grid();
        let values: Vec<f32> = field.coefficients().iter().map(|&v| v as f32).collect();
        let coefficients = Tensor::from_data(TensorData::new(values, [grid.num_nodes(), D]), device);
        let bulk = bulk.map(|m| AffineTransform::from_matrix_transform(m, device));
        Self::new(grid, coefficients, bulk)
    }

    /// Get the control point lattice.
    pub fn grid(&self) -> &BSplineGrid<D> {
        &self.grid
    }

    /// Get the coefficients.
    pub fn coefficients(&self) -> Tensor<B, 2> {
        self.coefficients.clone()
    }

    /// Displacement `d(x)` at a batch of physical points `[Batch, D]`.
    pub fn displacement(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = points.device();
        let origin: Vec<f32> = self.grid.origin.to_vec().into_iter().map(|v| v as f32).collect();
        let spacing: Vec<f32> = self.grid.spacing.to_vec().into_iter().map(|v| v as f32).collect();
        let origin = Tensor::<B, 1>::from_data(TensorData::new(origin, [D]), &device).reshape([1, D]);
        let spacing = Tensor::<B, 1>::from_data(TensorData::new(spacing, [D]), &device).reshape([1, D]);

        // continuous control grid coordinates
        let u = (points - origin) / spacing;
        let taps = axis_columns(u).into_iter().map(AxisTaps::cubic_bspline).collect();
        gather_separable(self.coefficients.clone(), self.grid.size, taps, Boundary::Clamp)
    }
}

impl<B: Backend, const D: usize> Transform<B, D> for BSplineTransform<B, D> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        map_chunked(points, |chunk| {
            let base = match &self.bulk {
                Some(bulk) => bulk.transform_points(chunk.clone()),
                None => chunk.clone(),
            };
            base + self.displacement(chunk)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{BoundingBox, Point, Vector};
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn grid() -> BSplineGrid<2> {
        let bounds = BoundingBox::new(Point::new([0.0, 0.0]), Point::new([20.0, 20.0]));
        BSplineGrid::covering(&bounds, &Vector::new([5.0, 5.0])).unwrap()
    }

    #[test]
    fn test_zero_field_is_identity() {
        let device = Default::default();
        let field = DeformableTransform::zeros(grid());
        let transform = BSplineTransform::<TestBackend, 2>::from_deformable(&field, None, &device);
        let points = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [13.5, 19.0]], &device);
        assert_eq!(
            transform.transform_points(points).into_data().to_vec::<f32>().unwrap(),
            vec![1.0, 2.0, 13.5, 19.0]
        );
    }

    #[test]
    fn test_matches_cpu_displacement() {
        let device = Default::default();
        let g = grid();
        let coefficients: Vec<f64> = (0..g.num_parameters()).map(|i| ((i * 7) % 11) as f64 * 0.1 - 0.5).collect();
        let field = DeformableTransform::new(g, coefficients).unwrap();
        let transform = BSplineTransform::<TestBackend, 2>::from_deformable(&field, None, &device);

        let p = Point::new([7.3, 12.9]);
        let expected = field.displacement_at(&p);
        let points = Tensor::<TestBackend, 2>::from_floats([[7.3, 12.9]], &device);
        let got = transform.displacement(points).into_data().to_vec::<f32>().unwrap();
        assert!((got[0] as f64 - expected[0]).abs() < 1e-5);
        assert!((got[1] as f64 - expected[1]).abs() < 1e-5);
    }

    #[test]
    fn test_bulk_transform_applied_first() {
        let device = Default::default();
        let g = grid();
        let coefficients = (0..g.num_nodes()).flat_map(|_| [1.0, 0.0]).collect();
        let field = DeformableTransform::new(g, coefficients).unwrap();
        let bulk = MatrixTransform::translation_only(Vector::new([0.0, 3.0]), Point::origin());
        let transform = BSplineTransform::<TestBackend, 2>::from_deformable(&field, Some(&bulk), &device);
        let points = Tensor::<TestBackend, 2>::from_floats([[4.0, 4.0]], &device);
        let out = transform.transform_points(points).into_data().to_vec::<f32>().unwrap();
        assert!((out[0] - 5.0).abs() < 1e-5);
        assert!((out[1] - 7.0).abs() < 1e-5);
    }

    #[test]
    fn test_gradient_reaches_coefficients() {
        type AD = Autodiff<TestBackend>;
        let device = Default::default();
        let g = grid();
        let params = Tensor::<AD, 1>::zeros([g.num_parameters()], &device).require_grad();
        let transform = BSplineTransform::<AD, 2>::from_parameter_tensor(g, params.clone(), None);
        let points = Tensor::<AD, 2>::from_floats([[10.0, 10.0]], &device);
        let grads = transform.transform_points(points).sum().backward();
        let g = params.grad(&grads).unwrap().into_data().to_vec::<f32>().unwrap();
        // the weights of all touched nodes sum to one per component
        let total: f32 = g.iter().sum();
        assert!((total - 2.0).abs() < 1e-5);
    }
}
