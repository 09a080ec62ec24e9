//! B-Spline interpolation implementation.
//!
//! This module provides cubic B-Spline interpolation for smooth sampling
//! of image values at continuous coordinates. The image is first converted into
//! B-spline coefficients with the recursive filter of Unser et al. (mirror
//! boundary), after which sampling is a 4-tap separable gather.

use burn::tensor::{Shape, Tensor, TensorData};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use crate::error::{CoreError, Result};
use super::kernel::{sample_separable, AxisTaps, Boundary};
use super::trait_::Interpolator;

/// Pole of the cubic B-spline prefilter, `√3 − 2`.
const POLE: f64 = -0.267_949_192_431_122_7;

/// Accuracy of the truncated causal initialisation sum.
const INIT_TOLERANCE: f64 = 1e-10;

/// Cubic B-Spline interpolator.
///
/// Provides smooth interpolation using cubic B-Spline basis functions.
/// [`Interpolator::prepare`] must be applied to the image before sampling.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BSplineInterpolator;

impl BSplineInterpolator {
    /// Create a new B-Spline interpolator.
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Interpolator<B> for BSplineInterpolator {
    fn interpolate<const D: usize>(&self, data: &Tensor<B, D>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        sample_separable(data, indices, AxisTaps::cubic_bspline, Boundary::Mirror)
    }

    fn prepare<const D: usize>(&self, data: Tensor<B, D>) -> Result<Tensor<B, D>> {
        let device = data.device();
        let shape = data.dims();
        let mut values: Vec<f64> = data
            .into_data()
            .convert::<f64>()
            .to_vec::<f64>()
            .map_err(|e| CoreError::data(format!("{:?}", e)))?;

        // tensor axis D-1 is contiguous
        let mut stride = 1;
        for axis in (0..D).rev() {
            prefilter_axis(&mut values, shape[axis], stride);
            stride *= shape[axis];
        }

        let coefficients: Vec<f32> = values.into_iter().map(|v| v as f32).collect();
        Ok(Tensor::from_data(TensorData::new(coefficients, Shape::new(shape)), &device))
    }
}

/// Filter every line of length `len` with element stride `stride`.
fn prefilter_axis(values: &mut [f64], len: usize, stride: usize) {
    if len < 2 {
        return;
    }
    let block = len * stride;
    let mut line = vec![0.0; len];
    for start_block in (0..values.len()).step_by(block) {
        for offset in 0..stride {
            let base = start_block + offset;
            for (k, v) in line.iter_mut().enumerate() {
                *v = values[base + k * stride];
            }
            prefilter_line(&mut line);
            for (k, v) in line.iter().enumerate() {
                values[base + k * stride] = *v;
            }
        }
    }
}

/// In-place conversion of samples to cubic B-spline coefficients.
fn prefilter_line(c: &mut [f64]) {
    let n = c.len();
    let z = POLE;
    let gain = (1.0 - z) * (1.0 - 1.0 / z);
    for v in c.iter_mut() {
        *v *= gain;
    }

    // causal initialisation with mirror boundary
    let horizon = (INIT_TOLERANCE.ln() / z.abs().ln()).ceil() as usize;
    if horizon < n {
        let mut zn = z;
        let mut sum = c[0];
        for v in c.iter().take(horizon).skip(1) {
            sum += zn * v;
            zn *= z;
        }
        c[0] = sum;
    } else {
        let iz = 1.0 / z;
        let mut zn = z;
        let mut z2n = z.powi(n as i32 - 1);
        let mut sum = c[0] + z2n * c[n - 1];
        z2n *= z2n * iz;
        for v in c.iter().take(n - 1).skip(1) {
            sum += (zn + z2n) * v;
            zn *= z;
            z2n *= iz;
        }
        c[0] = sum / (1.0 - zn * zn);
    }

    for k in 1..n {
        c[k] += z * c[k - 1];
    }

    c[n - 1] = (z / (z * z - 1.0)) * (c[n - 1] + z * c[n - 2]);
    for k in (0..n - 1).rev() {
        c[k] = z * (c[k + 1] - c[k]);
    }
}
