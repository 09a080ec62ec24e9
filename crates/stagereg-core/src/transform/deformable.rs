//! CPU model of the cubic B-spline free-form deformation.
//!
//! The control grid is axis-aligned in physical space. Coefficients are stored
//! control-point-major: node `j` owns `coefficients[j*D..(j+1)*D]`, and nodes are
//! ordered with `x` varying fastest.

use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};
use crate::error::{CoreError, Result};
use crate::image::grid_indices;
use crate::spatial::{BoundingBox, Point, Vector};
use super::parameters::{TransformKind, TransformParameters};

/// Cubic B-spline weights for the four nodes `floor(u)-1 ..= floor(u)+2`.
pub fn cubic_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    let s = 1.0 - t;
    [
        s * s * s / 6.0,
        (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
        (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
        t3 / 6.0,
    ]
}

/// Control-point lattice of a B-spline transform.
///
/// Serialized through [`GridRecord`], which keeps the per-axis fields as lists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "GridRecord", try_from = "GridRecord")]
pub struct BSplineGrid<const D: usize> {
    /// Number of control points along each axis, `x` first.
    pub size: [usize; D],
    /// Physical position of node `(0, 0, 0)`.
    pub origin: Point<D>,
    /// Physical distance between neighbouring nodes.
    pub spacing: Vector<D>,
}

impl<const D: usize> BSplineGrid<D> {
    /// Grid covering `bounds` with the requested physical node spacing.
    ///
    /// `n_d = ceil(extent_d / spacing_d) + 3` and `origin_d = min_d − spacing_d`:
    /// one node before the domain and two after it, the support of the cubic kernel.
    pub fn covering(bounds: &BoundingBox<D>, spacing: &Vector<D>) -> Result<Self> {
        if (0..D).any(|i| !(spacing[i].is_finite() && spacing[i] > 0.0)) {
            return Err(CoreError::invalid_geometry(format!(
                "control point spacing must be positive, got {:?}",
                spacing.to_vec()
            )));
        }
        let extent = bounds.extent();
        let size = std::array::from_fn(|i| (extent[i] / spacing[i]).ceil().max(0.0) as usize + 3);
        let origin = bounds.min - *spacing;
        Ok(Self {
            size,
            origin,
            spacing: *spacing,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.size.iter().product()
    }

    /// Number of optimised parameters (`nodes × D`).
    pub fn num_parameters(&self) -> usize {
        self.num_nodes() * D
    }

    /// Physical position of an integer node index.
    pub fn node_position(&self, index: &[usize; D]) -> Point<D> {
        let mut p = self.origin;
        for i in 0..D {
            p[i] += index[i] as f64 * self.spacing[i];
        }
        p
    }

    /// Continuous grid coordinate of a physical point.
    pub fn continuous_index(&self, point: &Point<D>) -> [f64; D] {
        std::array::from_fn(|i| (point[i] - self.origin[i]) / self.spacing[i])
    }

    /// Fixed parameters `[size.., origin.., spacing..]`.
    pub fn to_fixed_parameters(&self) -> Vec<f64> {
        let mut fixed: Vec<f64> = self.size.iter().map(|&n| n as f64).collect();
        fixed.extend(self.origin.to_vec());
        fixed.extend(self.spacing.to_vec());
        fixed
    }

    pub fn from_fixed_parameters(fixed: &[f64]) -> Result<Self> {
        if fixed.len() != 3 * D {
            return Err(CoreError::ParameterCount {
                kind: TransformKind::BSpline.to_string(),
                what: "fixed parameters",
                expected: 3 * D,
                actual: fixed.len(),
            });
        }
        if fixed[..D].iter().any(|&n| !(n >= 1.0 && n.fract() == 0.0)) {
            return Err(CoreError::invalid_geometry("control grid size must be a positive integer"));
        }
        let size = std::array::from_fn(|i| fixed[i] as usize);
        let origin = Point::new(std::array::from_fn(|i| fixed[D + i]));
        let spacing = Vector::new(std::array::from_fn(|i| fixed[2 * D + i]));
        if (0..D).any(|i| !(spacing[i] > 0.0)) {
            return Err(CoreError::invalid_geometry("control grid spacing must be positive"));
        }
        Ok(Self { size, origin, spacing })
    }

    /// Clamped node index along `axis`.
    fn clamp_axis(&self, axis: usize, index: i64) -> usize {
        index.clamp(0, self.size[axis] as i64 - 1) as usize
    }

    /// Flat node offset (x fastest).
    fn offset(&self, index: &[usize; D]) -> usize {
        let mut offset = 0;
        let mut stride = 1;
        for i in 0..D {
            offset += index[i] * stride;
            stride *= self.size[i];
        }
        offset
    }
}

/// Serialized form of a [`BSplineGrid`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRecord {
    pub size: Vec<usize>,
    pub origin: Vec<f64>,
    pub spacing: Vec<f64>,
}

impl<const D: usize> From<BSplineGrid<D>> for GridRecord {
    fn from(grid: BSplineGrid<D>) -> Self {
        Self {
            size: grid.size.to_vec(),
            origin: grid.origin.to_vec(),
            spacing: grid.spacing.to_vec(),
        }
    }
}

impl<const D: usize> TryFrom<GridRecord> for BSplineGrid<D> {
    type Error = CoreError;

    fn try_from(record: GridRecord) -> Result<Self> {
        for len in [record.size.len(), record.origin.len(), record.spacing.len()] {
            if len != D {
                return Err(CoreError::DimensionMismatch { expected: D, actual: len });
            }
        }
        let mut fixed: Vec<f64> = record.size.iter().map(|&n| n as f64).collect();
        fixed.extend(record.origin);
        fixed.extend(record.spacing);
        Self::from_fixed_parameters(&fixed)
    }
}

/// B-spline displacement field `d(x) = Σ_j β(x − x_j) c_j`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeformableTransform<const D: usize> {
    grid: BSplineGrid<D>,
    coefficients: Vec<f64>,
}

impl<const D: usize> DeformableTransform<D> {
    pub fn new(grid: BSplineGrid<D>, coefficients: Vec<f64>) -> Result<Self> {
        if coefficients.len() != grid.num_parameters() {
            return Err(CoreError::ParameterCount {
                kind: TransformKind::BSpline.to_string(),
                what: "parameters",
                expected: grid.num_parameters(),
                actual: coefficients.len(),
            });
        }
        Ok(Self { grid, coefficients })
    }

    /// Zero displacement on `grid`.
    pub fn zeros(grid: BSplineGrid<D>) -> Self {
        let coefficients = vec![0.0; grid.num_parameters()];
        Self { grid, coefficients }
    }

    pub fn grid(&self) -> &BSplineGrid<D> {
        &self.grid
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// True when every coefficient is zero.
    pub fn is_zero(&self) -> bool {
        self.coefficients.iter().all(|&c| c == 0.0)
    }

    /// Largest coefficient magnitude.
    pub fn max_coefficient(&self) -> f64 {
        self.coefficients.iter().fold(0.0, |m, c| m.max(c.abs()))
    }

    /// Displacement at a physical point.
    ///
    /// Node indices outside the lattice are clamped to its border.
    pub fn displacement_at(&self, point: &Point<D>) -> Vector<D> {
        let u = self.grid.continuous_index(point);
        let mut starts = [0i64; D];
        let mut weights = [[0.0; 4]; D];
        for i in 0..D {
            let f = u[i].floor();
            starts[i] = f as i64 - 1;
            weights[i] = cubic_weights(u[i] - f);
        }

        let mut displacement = Vector::zeros();
        for taps in grid_indices([4usize; D]) {
            let mut w = 1.0;
            let mut node = [0usize; D];
            for i in 0..D {
                w *= weights[i][taps[i]];
                node[i] = self.grid.clamp_axis(i, starts[i] + taps[i] as i64);
            }
            if w == 0.0 {
                continue;
            }
            let base = self.grid.offset(&node) * D;
            for i in 0..D {
                displacement[i] += w * self.coefficients[base + i];
            }
        }
        displacement
    }

    /// Transfer the field onto a (usually finer) grid.
    ///
    /// Each new coefficient is the current displacement at the new node, which
    /// reproduces the field approximately; smooth fields transfer closely.
    pub fn refine(&self, grid: BSplineGrid<D>) -> Self {
        let mut coefficients = Vec::with_capacity(grid.num_parameters());
        for index in grid_indices(grid.size) {
            let d = self.displacement_at(&grid.node_position(&index));
            coefficients.extend(d.to_vec());
        }
        Self { grid, coefficients }
    }

    /// Left-multiply every displacement vector by `linear`.
    ///
    /// The field is linear in its coefficients, so this maps the whole field.
    pub fn map_displacements(&self, linear: &SMatrix<f64, D, D>) -> Self {
        let mut coefficients = self.coefficients.clone();
        for node in coefficients.chunks_exact_mut(D) {
            let v = nalgebra::SVector::<f64, D>::from_fn(|i, _| node[i]);
            let mapped = linear * v;
            for i in 0..D {
                node[i] = mapped[i];
            }
        }
        Self {
            grid: self.grid,
            coefficients,
        }
    }

    pub fn from_parameters(params: &TransformParameters) -> Result<Self> {
        if params.kind != TransformKind::BSpline {
            return Err(CoreError::KindMismatch {
                expected: TransformKind::BSpline.to_string(),
                actual: params.kind.to_string(),
            });
        }
        if params.dimension != D {
            return Err(CoreError::DimensionMismatch {
                expected: D,
                actual: params.dimension,
            });
        }
        let grid = BSplineGrid::from_fixed_parameters(&params.fixed_parameters)?;
        Self::new(grid, params.parameters.clone())
    }

    pub fn to_parameters(&self) -> TransformParameters {
        TransformParameters::new(
            TransformKind::BSpline,
            D,
            self.coefficients.clone(),
            self.grid.to_fixed_parameters(),
        )
    }
}
