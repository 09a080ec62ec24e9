//! Coarse initial alignment.
//!
//! Initializers produce the seed matrix transform handed to the first
//! optimizing stage. They never produce the final answer.

use std::fmt;
use std::str::FromStr;
use nalgebra::SMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use stagereg_core::image::ImageGeometry;
use stagereg_core::linalg;
use stagereg_core::spatial::{Point, Vector};
use stagereg_core::transform::MatrixTransform;
use crate::error::{InputError, Result, StageError};

/// Method of the initialization stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitialMethod {
    #[default]
    None,
    ImageCenters,
    CentersOfMass,
    SecondMoments,
    Landmarks,
}

impl InitialMethod {
    pub fn name(self) -> &'static str {
        match self {
            InitialMethod::None => "none",
            InitialMethod::ImageCenters => "image-centers",
            InitialMethod::CentersOfMass => "centers-of-mass",
            InitialMethod::SecondMoments => "second-moments",
            InitialMethod::Landmarks => "landmarks",
        }
    }
}

impl fmt::Display for InitialMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InitialMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(InitialMethod::None),
            "image-centers" | "geometry" => Ok(InitialMethod::ImageCenters),
            "centers-of-mass" | "com" => Ok(InitialMethod::CentersOfMass),
            "second-moments" | "moments" => Ok(InitialMethod::SecondMoments),
            "landmarks" => Ok(InitialMethod::Landmarks),
            _ => Err(format!("unknown initialization method '{}'", s)),
        }
    }
}

/// Corresponding point sets in fixed and moving physical space.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmarks<const D: usize> {
    pub fixed: Vec<Point<D>>,
    pub moving: Vec<Point<D>>,
}

impl<const D: usize> Landmarks<D> {
    pub fn new(fixed: Vec<Point<D>>, moving: Vec<Point<D>>) -> Self {
        Self { fixed, moving }
    }

    /// Minimum number of pairs for a rigid fit.
    pub fn required_pairs() -> usize {
        if D <= 2 {
            2
        } else {
            3
        }
    }

    pub fn validate(&self) -> std::result::Result<(), InputError> {
        if self.fixed.len() != self.moving.len() {
            return Err(InputError::invalid_configuration(format!(
                "landmark counts differ: {} fixed, {} moving",
                self.fixed.len(),
                self.moving.len()
            )));
        }
        if self.fixed.len() < Self::required_pairs() {
            return Err(InputError::invalid_configuration(format!(
                "landmark initialization needs at least {} pairs, got {}",
                Self::required_pairs(),
                self.fixed.len()
            )));
        }
        if self.fixed.iter().chain(&self.moving).any(|p| !p.is_finite()) {
            return Err(InputError::invalid_configuration("landmarks must be finite"));
        }
        Ok(())
    }
}

/// Intensity moments of an image in physical space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments<const D: usize> {
    pub mass: f64,
    pub centroid: Point<D>,
    pub covariance: SMatrix<f64, D, D>,
}

fn physical_point<const D: usize>(geometry: &ImageGeometry<D>, offset: usize) -> Point<D> {
    let size = geometry.size();
    let mut rest = offset;
    let index: [f64; D] = std::array::from_fn(|i| {
        let v = rest % size[i];
        rest /= size[i];
        v as f64
    });
    geometry.index_to_physical(&index)
}

/// Zeroth, first and second intensity moments. Negative intensities count as zero.
///
/// Returns `None` when the image has no positive mass.
pub fn moments<const D: usize>(geometry: &ImageGeometry<D>, values: &[f32]) -> Option<Moments<D>> {
    let (mass, weighted) = values
        .par_iter()
        .enumerate()
        .map(|(offset, &v)| {
            let w = (v as f64).max(0.0);
            (w, physical_point(geometry, offset).coords() * w)
        })
        .reduce(|| (0.0, Vector::zeros()), |a, b| (a.0 + b.0, a.1 + b.1));
    if !(mass > 0.0) {
        return None;
    }
    let centroid = Point::origin() + weighted / mass;

    let second = values
        .par_iter()
        .enumerate()
        .map(|(offset, &v)| {
            let w = (v as f64).max(0.0);
            let d = *(physical_point(geometry, offset) - centroid).inner();
            d * d.transpose() * w
        })
        .reduce(SMatrix::<f64, D, D>::zeros, |a, b| a + b);

    Some(Moments {
        mass,
        centroid,
        covariance: second / mass,
    })
}

/// Align geometric centres: `T(x) = x + (c_moving − c_fixed)`, centred at `c_fixed`.
pub fn align_image_centers<const D: usize>(fixed: &ImageGeometry<D>, moving: &ImageGeometry<D>) -> MatrixTransform<D> {
    let center = fixed.center();
    MatrixTransform::translation_only(moving.center() - center, center)
}

/// Align intensity-weighted centroids.
///
/// Falls back to geometric centres when either image has no positive mass.
pub fn align_centers_of_mass<const D: usize>(
    fixed: &ImageGeometry<D>,
    fixed_values: &[f32],
    moving: &ImageGeometry<D>,
    moving_values: &[f32],
) -> MatrixTransform<D> {
    match (moments(fixed, fixed_values), moments(moving, moving_values)) {
        (Some(f), Some(m)) => MatrixTransform::translation_only(m.centroid - f.centroid, f.centroid),
        _ => {
            tracing::warn!("Image without positive intensity, aligning geometric centres instead");
            align_image_centers(fixed, moving)
        }
    }
}

/// Principal axes as the columns of a proper rotation.
///
/// Each axis is signed to point along the positive image axis of the same rank.
fn principal_axes<const D: usize>(covariance: &SMatrix<f64, D, D>) -> Result<SMatrix<f64, D, D>> {
    let (_, mut axes) = linalg::symmetric_eigen(covariance)
        .ok_or_else(|| StageError::SingularTransform("non-finite second moments".into()))?;
    for c in 0..D {
        if axes[(c, c)] < 0.0 {
            for r in 0..D {
                axes[(r, c)] = -axes[(r, c)];
            }
        }
    }
    if linalg::determinant(&axes) < 0.0 {
        for r in 0..D {
            axes[(r, D - 1)] = -axes[(r, D - 1)];
        }
    }
    Ok(axes)
}

/// Align centroids and principal axes.
pub fn align_second_moments<const D: usize>(
    fixed: &ImageGeometry<D>,
    fixed_values: &[f32],
    moving: &ImageGeometry<D>,
    moving_values: &[f32],
) -> Result<MatrixTransform<D>> {
    let (f, m) = match (moments(fixed, fixed_values), moments(moving, moving_values)) {
        (Some(f), Some(m)) => (f, m),
        _ => {
            tracing::warn!("Image without positive intensity, aligning geometric centres instead");
            return Ok(align_image_centers(fixed, moving));
        }
    };
    let fixed_axes = principal_axes(&f.covariance)?;
    let moving_axes = principal_axes(&m.covariance)?;
    let rotation = moving_axes * fixed_axes.transpose();
    Ok(MatrixTransform::new(rotation, m.centroid - f.centroid, f.centroid))
}

/// Least-squares rigid fit of fixed landmarks onto moving landmarks (Kabsch).
pub fn align_landmarks<const D: usize>(landmarks: &Landmarks<D>) -> Result<MatrixTransform<D>> {
    let n = landmarks.fixed.len() as f64;
    let centroid = |points: &[Point<D>]| {
        let sum = points.iter().fold(Vector::<D>::zeros(), |acc, p| acc + p.coords());
        Point::origin() + sum / n
    };
    let p_bar = centroid(&landmarks.fixed);
    let q_bar = centroid(&landmarks.moving);

    let mut h = SMatrix::<f64, D, D>::zeros();
    for (p, q) in landmarks.fixed.iter().zip(&landmarks.moving) {
        h += *(*p - p_bar).inner() * (*q - q_bar).inner().transpose();
    }
    let decomposition = linalg::svd(&h)
        .ok_or_else(|| StageError::SingularTransform("non-finite landmark covariance".into()))?;
    let v = decomposition.v_t.transpose();
    let u_t = decomposition.u.transpose();
    let mut correction = SMatrix::<f64, D, D>::identity();
    if linalg::determinant(&(v * u_t)) < 0.0 {
        correction[(D - 1, D - 1)] = -1.0;
    }
    let rotation = v * correction * u_t;
    Ok(MatrixTransform::new(rotation, q_bar - p_bar, p_bar))
}

/// Run an initialization method.
///
/// `None` yields the identity centred on the fixed image.
pub fn initialize<const D: usize>(
    method: InitialMethod,
    fixed: &ImageGeometry<D>,
    fixed_values: &[f32],
    moving: &ImageGeometry<D>,
    moving_values: &[f32],
    landmarks: Option<&Landmarks<D>>,
) -> Result<MatrixTransform<D>> {
    let transform = match method {
        InitialMethod::None => MatrixTransform::identity(fixed.center()),
        InitialMethod::ImageCenters => align_image_centers(fixed, moving),
        InitialMethod::CentersOfMass => align_centers_of_mass(fixed, fixed_values, moving, moving_values),
        InitialMethod::SecondMoments => align_second_moments(fixed, fixed_values, moving, moving_values)?,
        InitialMethod::Landmarks => {
            let landmarks = landmarks.ok_or_else(|| {
                StageError::Core(stagereg_core::CoreError::data("landmark initialization without landmarks"))
            })?;
            align_landmarks(landmarks)?
        }
    };
    tracing::debug!(
        "Initialization {} offset {:?}",
        method,
        transform.offset().to_vec()
    );
    Ok(transform)
}
