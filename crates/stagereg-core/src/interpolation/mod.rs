//! Interpolation types and operations.
//!
//! This module provides interpolation traits and implementations
//! for sampling values at continuous coordinates.

pub mod trait_;
pub mod kernel;
pub mod nearest;
pub mod linear;
pub mod bspline;
pub mod windowed_sinc;

use std::fmt;
use std::str::FromStr;
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use crate::error::{CoreError, Result};

pub use trait_::Interpolator;
pub use linear::LinearInterpolator;
pub use nearest::NearestNeighborInterpolator;
pub use bspline::BSplineInterpolator;
pub use windowed_sinc::WindowedSincInterpolator;

/// Interpolation kernel choice, from cheapest to most expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterpolationKind {
    Nearest,
    #[default]
    Linear,
    #[serde(rename = "bspline")]
    BSpline,
    WindowedSinc,
}

impl InterpolationKind {
    pub fn name(self) -> &'static str {
        match self {
            InterpolationKind::Nearest => "nearest",
            InterpolationKind::Linear => "linear",
            InterpolationKind::BSpline => "bspline",
            InterpolationKind::WindowedSinc => "windowed-sinc",
        }
    }
}

impl fmt::Display for InterpolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InterpolationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" | "nearest-neighbor" => Ok(InterpolationKind::Nearest),
            "linear" => Ok(InterpolationKind::Linear),
            "bspline" | "b-spline" => Ok(InterpolationKind::BSpline),
            "windowed-sinc" | "sinc" => Ok(InterpolationKind::WindowedSinc),
            _ => Err(CoreError::data(format!("unknown interpolation '{}'", s))),
        }
    }
}

/// Runtime-selected interpolator.
#[derive(Debug, Clone, Copy)]
pub enum Interpolation {
    Nearest(NearestNeighborInterpolator),
    Linear(LinearInterpolator),
    BSpline(BSplineInterpolator),
    WindowedSinc(WindowedSincInterpolator),
}

impl From<InterpolationKind> for Interpolation {
    fn from(kind: InterpolationKind) -> Self {
        match kind {
            InterpolationKind::Nearest => Interpolation::Nearest(NearestNeighborInterpolator::new()),
            InterpolationKind::Linear => Interpolation::Linear(LinearInterpolator::new()),
            InterpolationKind::BSpline => Interpolation::BSpline(BSplineInterpolator::new()),
            InterpolationKind::WindowedSinc => Interpolation::WindowedSinc(WindowedSincInterpolator::new()),
        }
    }
}

impl Interpolation {
    pub fn kind(&self) -> InterpolationKind {
        match self {
            Interpolation::Nearest(_) => InterpolationKind::Nearest,
            Interpolation::Linear(_) => InterpolationKind::Linear,
            Interpolation::BSpline(_) => InterpolationKind::BSpline,
            Interpolation::WindowedSinc(_) => InterpolationKind::WindowedSinc,
        }
    }
}

impl<B: Backend> Interpolator<B> for Interpolation {
    fn interpolate<const D: usize>(&self, data: &Tensor<B, D>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            Interpolation::Nearest(i) => i.interpolate(data, indices),
            Interpolation::Linear(i) => i.interpolate(data, indices),
            Interpolation::BSpline(i) => i.interpolate(data, indices),
            Interpolation::WindowedSinc(i) => i.interpolate(data, indices),
        }
    }

    fn prepare<const D: usize>(&self, data: Tensor<B, D>) -> Result<Tensor<B, D>> {
        match self {
            Interpolation::Nearest(i) => Interpolator::<B>::prepare(i, data),
            Interpolation::Linear(i) => Interpolator::<B>::prepare(i, data),
            Interpolation::BSpline(i) => Interpolator::<B>::prepare(i, data),
            Interpolation::WindowedSinc(i) => Interpolator::<B>::prepare(i, data),
        }
    }
}
