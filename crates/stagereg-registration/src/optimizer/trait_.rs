//! Optimizer trait for parameter optimization.
//!
//! Optimizers work on a flat parameter tensor in scaled space: every component
//! has been divided by its magnitude, so one unit means a comparable amount of
//! motion for rotations, translations, scales and skews.

use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;

/// Optimizer trait for registration parameters.
///
/// The caller evaluates the metric at `position`, backpropagates, hands the
/// gradient to [`Optimizer::step`] and stops once [`Optimizer::converged`]
/// reports true.
///
/// # Type Parameters
/// * `B` - The backend for tensor operations (must support autodiff)
///
/// # Examples
///
/// ```rust,ignore
/// use stagereg_registration::optimizer::{Optimizer, RegularStepGradientDescent};
///
/// let mut optimizer = RegularStepGradientDescent::<B>::new(1.0, 1e-3);
/// let position = optimizer.step(position, gradient);
/// ```
pub trait Optimizer<B: AutodiffBackend> {
    /// Take one step from `position` given the loss gradient there.
    ///
    /// # Returns
    /// The next position to evaluate, detached from any graph.
    fn step(&mut self, position: Tensor<B, 1>, gradient: Tensor<B::InnerBackend, 1>) -> Tensor<B, 1>;

    /// True once the stopping criterion has been met.
    fn converged(&self) -> bool;

    /// Current step length.
    fn learning_rate(&self) -> f64;

    /// Set the current step length.
    fn set_learning_rate(&mut self, lr: f64);
}
