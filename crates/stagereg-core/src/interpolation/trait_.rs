//! Interpolator trait for sampling values at continuous coordinates.
//!
//! This module defines the core Interpolator trait that all interpolation methods must implement.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use crate::error::Result;

/// Interpolator trait for sampling values at continuous coordinates.
///
/// Interpolators are used to sample image values at non-integer coordinates,
/// which is essential for image registration and resampling.
///
/// # Type Parameters
/// * `B` - The Burn backend
pub trait Interpolator<B: Backend> {
    /// Interpolate values from a tensor at given continuous indices.
    ///
    /// # Arguments
    /// * `data` - The source tensor (3D volume `[Z, Y, X]` or 2D image `[Y, X]`),
    ///   as returned by [`Interpolator::prepare`]
    /// * `indices` - The indices at which to interpolate `[Batch, D]`, ordered `(x, y, z)`
    ///
    /// # Returns
    /// Tensor of sampled values `[Batch]`
    fn interpolate<const D: usize>(&self, data: &Tensor<B, D>, indices: Tensor<B, 2>) -> Tensor<B, 1>;

    /// Convert image voxels into the lattice the kernel samples.
    ///
    /// Most kernels sample voxels directly; cubic B-spline interpolation samples
    /// pre-filtered coefficients.
    fn prepare<const D: usize>(&self, data: Tensor<B, D>) -> Result<Tensor<B, D>> {
        Ok(data)
    }
}
