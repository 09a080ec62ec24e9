//! Flat parameter representation shared by every transform model.
//!
//! A transform instance is fully determined by its kind, its dimension, an
//! optimised parameter vector and a vector of fixed (non-optimised) parameters.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::{CoreError, Result};

/// Transform model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformKind {
    Identity,
    Rigid,
    Affine,
    BSpline,
}

/// Number of rotation angles in `dimension` dimensions (1 in 2-D, 3 in 3-D).
pub const fn angle_count(dimension: usize) -> usize {
    dimension * dimension.saturating_sub(1) / 2
}

impl TransformKind {
    /// Number of optimised parameters for matrix kinds, `None` for B-spline
    /// (which depends on the control grid).
    pub fn parameter_count(self, dimension: usize) -> Option<usize> {
        match self {
            TransformKind::Identity => Some(0),
            TransformKind::Rigid => Some(angle_count(dimension) + dimension),
            TransformKind::Affine => Some(2 * angle_count(dimension) + 2 * dimension),
            TransformKind::BSpline => None,
        }
    }

    /// True for kinds represented by a matrix and an offset.
    pub fn is_matrix(self) -> bool {
        !matches!(self, TransformKind::BSpline)
    }

    pub fn name(self) -> &'static str {
        match self {
            TransformKind::Identity => "Identity",
            TransformKind::Rigid => "Rigid",
            TransformKind::Affine => "Affine",
            TransformKind::BSpline => "BSpline",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransformKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "identity" => Ok(TransformKind::Identity),
            "rigid" => Ok(TransformKind::Rigid),
            "affine" => Ok(TransformKind::Affine),
            "bspline" | "b-spline" => Ok(TransformKind::BSpline),
            _ => Err(CoreError::UnknownKind(s.to_string())),
        }
    }
}

/// Serializable description of one transform instance.
///
/// Layouts:
/// * Rigid 2-D `[θ, tx, ty]`, Rigid 3-D `[rx, ry, rz, tx, ty, tz]`
/// * Affine 2-D `[θ, tx, ty, sx, sy, k]`, Affine 3-D
///   `[rx, ry, rz, tx, ty, tz, sx, sy, sz, kxy, kxz, kyz]`
/// * B-spline: control-point-major displacements `[d0x, d0y, (d0z), d1x, ...]`
///
/// Matrix kinds carry the centre of rotation as fixed parameters; B-spline
/// carries `[size.., origin.., spacing..]` of its control grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformParameters {
    pub kind: TransformKind,
    pub dimension: usize,
    pub parameters: Vec<f64>,
    pub fixed_parameters: Vec<f64>,
}

impl TransformParameters {
    pub fn new(kind: TransformKind, dimension: usize, parameters: Vec<f64>, fixed_parameters: Vec<f64>) -> Self {
        Self {
            kind,
            dimension,
            parameters,
            fixed_parameters,
        }
    }

    /// Identity parameters of a matrix kind centred at `center`.
    ///
    /// Scale factors start at one, every other parameter at zero.
    pub fn identity(kind: TransformKind, center: &[f64]) -> Result<Self> {
        let dimension = center.len();
        let count = kind.parameter_count(dimension).ok_or_else(|| CoreError::KindMismatch {
            expected: "matrix".into(),
            actual: kind.to_string(),
        })?;
        let mut parameters = vec![0.0; count];
        if kind == TransformKind::Affine {
            let first_scale = angle_count(dimension) + dimension;
            for p in &mut parameters[first_scale..first_scale + dimension] {
                *p = 1.0;
            }
        }
        Ok(Self::new(kind, dimension, parameters, center.to_vec()))
    }

    /// Check the parameter and fixed-parameter counts against the model.
    pub fn validate(&self) -> Result<()> {
        let d = self.dimension;
        let (expected_fixed, expected) = match self.kind.parameter_count(d) {
            Some(count) => (d, count),
            None => {
                if self.fixed_parameters.len() != 3 * d {
                    return Err(self.count_error("fixed parameters", 3 * d, self.fixed_parameters.len()));
                }
                let expected = self.fixed_parameters[..d]
                    .iter()
                    .try_fold(d, |acc, &n| {
                        if n >= 1.0 && n.fract() == 0.0 && n <= usize::MAX as f64 {
                            acc.checked_mul(n as usize)
                        } else {
                            None
                        }
                    })
                    .ok_or_else(|| CoreError::invalid_geometry("control grid size is not a usable node count"))?;
                (3 * d, expected)
            }
        };
        if self.fixed_parameters.len() != expected_fixed {
            return Err(self.count_error("fixed parameters", expected_fixed, self.fixed_parameters.len()));
        }
        if self.parameters.len() != expected {
            return Err(self.count_error("parameters", expected, self.parameters.len()));
        }
        Ok(())
    }

    fn count_error(&self, what: &'static str, expected: usize, actual: usize) -> CoreError {
        CoreError::ParameterCount {
            kind: self.kind.to_string(),
            what,
            expected,
            actual,
        }
    }
}

/// Expected magnitudes of each parameter class, used to scale the search space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedMagnitudes {
    /// Translation (and B-spline displacement), physical units.
    pub offset: f64,
    /// Rotation angles, radians.
    pub rotation: f64,
    /// Deviation of scale factors from one.
    pub scale: f64,
    /// Shear coefficients.
    pub skew: f64,
}

impl Default for ExpectedMagnitudes {
    fn default() -> Self {
        Self {
            offset: 10.0,
            rotation: 0.2,
            scale: 0.05,
            skew: 0.01,
        }
    }
}

impl ExpectedMagnitudes {
    /// True when every magnitude is finite and positive.
    pub fn is_valid(&self) -> bool {
        [self.offset, self.rotation, self.scale, self.skew]
            .iter()
            .all(|m| m.is_finite() && *m > 0.0)
    }

    /// Per-parameter magnitude vector for a model with `count` parameters.
    pub fn parameter_magnitudes(&self, kind: TransformKind, dimension: usize, count: usize) -> Vec<f64> {
        let angles = angle_count(dimension);
        match kind {
            TransformKind::Identity => Vec::new(),
            TransformKind::BSpline => vec![self.offset; count],
            TransformKind::Rigid | TransformKind::Affine => (0..count)
                .map(|i| {
                    if i < angles {
                        self.rotation
                    } else if i < angles + dimension {
                        self.offset
                    } else if i < angles + 2 * dimension {
                        self.scale
                    } else {
                        self.skew
                    }
                })
                .collect(),
        }
    }

    /// Per-parameter magnitudes balanced by physical shift.
    ///
    /// `shifts[i]` is the mean distance the sample points move per unit change of
    /// parameter `i`. Each magnitude is raised to at least `offset / shifts[i]`, so
    /// one scaled unit of any parameter moves the points by no less than the
    /// expected offset. Parameters that move nothing keep their class magnitude.
    pub fn shift_balanced_magnitudes(&self, kind: TransformKind, dimension: usize, shifts: &[f64]) -> Vec<f64> {
        self.parameter_magnitudes(kind, dimension, shifts.len())
            .into_iter()
            .zip(shifts)
            .map(|(m, &shift)| {
                if shift > f64::EPSILON {
                    m.max(self.offset / shift)
                } else {
                    m
                }
            })
            .collect()
    }
}

/// Optimizer scales: reciprocals of the expected magnitudes.
pub fn scale_vector(kind: TransformKind, dimension: usize, count: usize, magnitudes: &ExpectedMagnitudes) -> Vec<f64> {
    magnitudes
        .parameter_magnitudes(kind, dimension, count)
        .into_iter()
        .map(|m| 1.0 / m)
        .collect()
}

/// Optimizer scales for a matrix kind from measured physical shifts.
///
/// See [`ExpectedMagnitudes::shift_balanced_magnitudes`].
pub fn shift_scale_vector(
    kind: TransformKind,
    dimension: usize,
    shifts: &[f64],
    magnitudes: &ExpectedMagnitudes,
) -> Vec<f64> {
    magnitudes
        .shift_balanced_magnitudes(kind, dimension, shifts)
        .into_iter()
        .map(|m| 1.0 / m)
        .collect()
}
