//! CPU matrix transforms in double precision.
//!
//! `MatrixTransform` is the value type the pipeline carries between stages. The
//! tensor transforms ([`super::RigidTransform`], [`super::AffineTransform`]) are
//! built from its parameter vectors when a stage needs to evaluate gradients.

use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};
use crate::error::{CoreError, Result};
use crate::linalg;
use crate::spatial::{Point, Vector};
use super::parameters::{angle_count, TransformKind, TransformParameters};

/// Threshold on `|cos(ry)|` below which 3-D Euler extraction is treated as gimbal locked.
const GIMBAL_EPSILON: f64 = 1e-9;

/// Parameter increment of the finite differences in [`physical_shifts`].
const SHIFT_DELTA: f64 = 1e-4;

/// Rotation matrix from Euler angles.
///
/// 2-D takes `[θ]`; 3-D takes `[rx, ry, rz]` and returns `Rz · Ry · Rx`.
pub fn rotation_from_angles<const D: usize>(angles: &[f64]) -> Result<SMatrix<f64, D, D>> {
    if angles.len() != angle_count(D) {
        return Err(CoreError::ParameterCount {
            kind: "Rotation".into(),
            what: "angles",
            expected: angle_count(D),
            actual: angles.len(),
        });
    }
    match D {
        2 => {
            let (s, c) = angles[0].sin_cos();
            let m = [[c, -s], [s, c]];
            Ok(SMatrix::from_fn(|r, col| m[r][col]))
        }
        3 => {
            let (sx, cx) = angles[0].sin_cos();
            let (sy, cy) = angles[1].sin_cos();
            let (sz, cz) = angles[2].sin_cos();
            let m = [
                [cz * cy, cz * sy * sx - sz * cx, cz * sy * cx + sz * sx],
                [sz * cy, sz * sy * sx + cz * cx, sz * sy * cx - cz * sx],
                [-sy, cy * sx, cy * cx],
            ];
            Ok(SMatrix::from_fn(|r, col| m[r][col]))
        }
        _ => Err(CoreError::DimensionMismatch { expected: 3, actual: D }),
    }
}

/// Euler angles of a proper rotation matrix, inverse of [`rotation_from_angles`].
pub fn angles_from_rotation<const D: usize>(rotation: &SMatrix<f64, D, D>) -> Result<Vec<f64>> {
    match D {
        2 => Ok(vec![rotation[(1, 0)].atan2(rotation[(0, 0)])]),
        3 => {
            let sy = (-rotation[(2, 0)]).clamp(-1.0, 1.0);
            let ry = sy.asin();
            if ry.cos().abs() > GIMBAL_EPSILON {
                let rx = rotation[(2, 1)].atan2(rotation[(2, 2)]);
                let rz = rotation[(1, 0)].atan2(rotation[(0, 0)]);
                Ok(vec![rx, ry, rz])
            } else {
                let rz = (-rotation[(0, 1)]).atan2(rotation[(1, 1)]);
                Ok(vec![0.0, ry, rz])
            }
        }
        _ => Err(CoreError::DimensionMismatch { expected: 3, actual: D }),
    }
}

/// Affine map `T(x) = A(x − c) + c + t` in physical space.
///
/// Maps fixed-image points to moving-image points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatrixTransform<const D: usize> {
    linear: SMatrix<f64, D, D>,
    translation: Vector<D>,
    center: Point<D>,
}

impl<const D: usize> MatrixTransform<D> {
    pub fn new(linear: SMatrix<f64, D, D>, translation: Vector<D>, center: Point<D>) -> Self {
        Self {
            linear,
            translation,
            center,
        }
    }

    /// Identity transform rotating about `center`.
    pub fn identity(center: Point<D>) -> Self {
        Self::new(SMatrix::identity(), Vector::zeros(), center)
    }

    /// Pure translation.
    pub fn translation_only(translation: Vector<D>, center: Point<D>) -> Self {
        Self::new(SMatrix::identity(), translation, center)
    }

    /// Build from a linear part and the offset `o` of `T(x) = A x + o`.
    pub fn from_offset(linear: SMatrix<f64, D, D>, offset: Vector<D>, center: Point<D>) -> Self {
        let c = center.coords().inner().clone_owned();
        let translation = Vector::from(offset.inner() + linear * c - c);
        Self::new(linear, translation, center)
    }

    pub fn linear(&self) -> &SMatrix<f64, D, D> {
        &self.linear
    }

    pub fn translation(&self) -> &Vector<D> {
        &self.translation
    }

    pub fn center(&self) -> &Point<D> {
        &self.center
    }

    /// Offset `o` of `T(x) = A x + o`.
    pub fn offset(&self) -> Vector<D> {
        let c = self.center.coords().inner().clone_owned();
        Vector::from(c + self.translation.inner() - self.linear * c)
    }

    /// Apply the transform to a point.
    pub fn transform_point(&self, point: &Point<D>) -> Point<D> {
        let relative = (*point - self.center).inner().clone_owned();
        let mapped = self.linear * relative;
        self.center + Vector::from(mapped) + self.translation
    }

    /// Apply the linear part to a vector.
    pub fn transform_vector(&self, vector: &Vector<D>) -> Vector<D> {
        Vector::from(self.linear * vector.inner())
    }

    /// Composition `self ∘ inner`: `x ↦ self(inner(x))`, centred at `inner`'s centre.
    pub fn compose(&self, inner: &MatrixTransform<D>) -> Self {
        let linear = self.linear * inner.linear;
        let offset = Vector::from(self.linear * inner.offset().inner() + self.offset().inner());
        Self::from_offset(linear, offset, inner.center)
    }

    /// Inverse mapping, centred at the same point.
    pub fn inverse(&self) -> Result<Self> {
        let inv = self
            .linear
            .try_inverse()
            .ok_or_else(|| CoreError::singular("matrix transform is not invertible"))?;
        let offset = Vector::from(-(inv * self.offset().inner()));
        Ok(Self::from_offset(inv, offset, self.center))
    }

    /// Same mapping expressed about a different centre.
    pub fn recentered(&self, center: Point<D>) -> Self {
        Self::from_offset(self.linear, self.offset(), center)
    }

    /// Largest absolute deviation from the identity mapping's matrix and offset.
    pub fn distance_from_identity(&self) -> f64 {
        let linear = (self.linear - SMatrix::<f64, D, D>::identity()).amax();
        let offset = self.offset().inner().amax();
        linear.max(offset)
    }

    /// Closest rigid transform: the rotation factor of the polar decomposition of
    /// the linear part. Translation and centre are kept; scale and skew are dropped.
    pub fn to_rigid(&self) -> Result<Self> {
        let rotation = linalg::polar_rotation(&self.linear)
            .ok_or_else(|| CoreError::singular("polar decomposition of a singular matrix"))?;
        Ok(Self::new(rotation, self.translation, self.center))
    }

    /// Decompose the linear part into `R · S · K` parameters.
    ///
    /// Returns `[angles.., translation.., scales.., skews..]` in the affine layout.
    pub fn to_affine_parameters(&self) -> Result<Vec<f64>> {
        let (q, r) = linalg::rotation_qr(&self.linear)
            .ok_or_else(|| CoreError::singular("QR decomposition of a non-finite matrix"))?;
        let scales: Vec<f64> = (0..D).map(|i| r[(i, i)]).collect();
        if scales.iter().any(|s| s.abs() < linalg::SINGULAR_TOLERANCE) {
            return Err(CoreError::singular("affine matrix has a zero scale factor"));
        }
        let mut params = angles_from_rotation(&q)?;
        params.extend(self.translation.to_vec());
        params.extend(scales.iter().copied());
        for i in 0..D {
            for j in (i + 1)..D {
                params.push(r[(i, j)] / scales[i]);
            }
        }
        Ok(params)
    }

    /// Linear part `R · S · K` from affine-layout parameters.
    fn affine_linear(params: &[f64]) -> Result<SMatrix<f64, D, D>> {
        let angles = angle_count(D);
        let rotation = rotation_from_angles::<D>(&params[..angles])?;
        let scales = &params[angles + D..angles + 2 * D];
        let skews = &params[angles + 2 * D..];
        let mut shear = SMatrix::<f64, D, D>::identity();
        let mut k = 0;
        for i in 0..D {
            for j in (i + 1)..D {
                shear[(i, j)] = skews[k];
                k += 1;
            }
        }
        let scale = SMatrix::<f64, D, D>::from_fn(|r, c| if r == c { scales[r] } else { 0.0 });
        Ok(rotation * scale * shear)
    }

    /// Build from a parameter description of a matrix kind.
    pub fn from_parameters(params: &TransformParameters) -> Result<Self> {
        if params.dimension != D {
            return Err(CoreError::DimensionMismatch {
                expected: D,
                actual: params.dimension,
            });
        }
        params.validate()?;
        let center = Point::from_slice(&params.fixed_parameters)
            .ok_or_else(|| CoreError::invalid_geometry("centre has the wrong dimension"))?;
        let p = &params.parameters;
        let angles = angle_count(D);
        match params.kind {
            TransformKind::Identity => Ok(Self::identity(center)),
            TransformKind::Rigid => {
                let rotation = rotation_from_angles::<D>(&p[..angles])?;
                let translation = Vector::new(std::array::from_fn(|i| p[angles + i]));
                Ok(Self::new(rotation, translation, center))
            }
            TransformKind::Affine => {
                let linear = Self::affine_linear(p)?;
                let translation = Vector::new(std::array::from_fn(|i| p[angles + i]));
                Ok(Self::new(linear, translation, center))
            }
            TransformKind::BSpline => Err(CoreError::KindMismatch {
                expected: "matrix".into(),
                actual: params.kind.to_string(),
            }),
        }
    }

    /// Describe this transform with the parameters of `kind`.
    ///
    /// `Rigid` uses the rotation factor of the linear part; `Identity` only
    /// records the centre.
    pub fn to_parameters(&self, kind: TransformKind) -> Result<TransformParameters> {
        let parameters = match kind {
            TransformKind::Identity => Vec::new(),
            TransformKind::Rigid => {
                let rigid = self.to_rigid()?;
                let mut p = angles_from_rotation(&rigid.linear)?;
                p.extend(self.translation.to_vec());
                p
            }
            TransformKind::Affine => self.to_affine_parameters()?,
            TransformKind::BSpline => {
                return Err(CoreError::KindMismatch {
                    expected: "matrix".into(),
                    actual: kind.to_string(),
                })
            }
        };
        Ok(TransformParameters::new(kind, D, parameters, self.center.to_vec()))
    }
}

/// Mean distance `points` move per unit change of each parameter of `params`.
///
/// Translations give one; rotations, scale factors and skews give roughly the
/// distance of the points from the centre. Forward differences around the
/// current parameters.
pub fn physical_shifts<const D: usize>(params: &TransformParameters, points: &[Point<D>]) -> Result<Vec<f64>> {
    let base = MatrixTransform::<D>::from_parameters(params)?;
    if points.is_empty() {
        return Ok(vec![0.0; params.parameters.len()]);
    }
    let mapped: Vec<Point<D>> = points.iter().map(|p| base.transform_point(p)).collect();
    let mut nudged = params.clone();
    let mut shifts = Vec::with_capacity(params.parameters.len());
    for i in 0..params.parameters.len() {
        nudged.parameters[i] += SHIFT_DELTA;
        let moved = MatrixTransform::<D>::from_parameters(&nudged)?;
        nudged.parameters[i] = params.parameters[i];
        let total: f64 = points
            .iter()
            .zip(&mapped)
            .map(|(p, m)| moved.transform_point(p).distance(m))
            .sum();
        shifts.push(total / (points.len() as f64 * SHIFT_DELTA));
    }
    Ok(shifts)
}
