//! Transform trait for spatial coordinate transformations.
//!
//! This module defines the core Transform trait that all tensor transforms implement.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

/// Largest batch of points mapped in one kernel launch.
pub const CHUNK_SIZE: usize = 32768;

/// Transform trait for spatial coordinate transformations.
///
/// Maps points from fixed physical space to moving physical space.
/// Implementations hold plain tensors rather than `Param`s so that they can be
/// rebuilt from a differentiable parameter tensor on every optimizer iteration.
///
/// # Type Parameters
/// * `B` - The Burn backend
/// * `D` - The spatial dimensionality (2 or 3)
pub trait Transform<B: Backend, const D: usize> {
    /// Apply transform to a batch of points.
    ///
    /// # Arguments
    /// * `points` - Tensor of shape `[Batch, D]` containing the input points
    ///
    /// # Returns
    /// Tensor of shape `[Batch, D]` containing the transformed points
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// Apply `f` to consecutive row blocks of at most [`CHUNK_SIZE`] points.
pub fn map_chunked<B, F>(points: Tensor<B, 2>, f: F) -> Tensor<B, 2>
where
    B: Backend,
    F: Fn(Tensor<B, 2>) -> Tensor<B, 2>,
{
    let [n_points, _] = points.dims();
    if n_points <= CHUNK_SIZE {
        return f(points);
    }
    let chunks = (0..n_points)
        .step_by(CHUNK_SIZE)
        .map(|start| {
            let end = (start + CHUNK_SIZE).min(n_points);
            f(points.clone().narrow(0, start, end - start))
        })
        .collect();
    Tensor::cat(chunks, 0)
}
