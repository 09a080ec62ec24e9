//! Regular step gradient descent.
//!
//! The update rule lives in [`RegularStepCore`], a burn [`SimpleOptimizer`]
//! whose state carries the previous gradient and the current step length.
//! [`RegularStepGradientDescent`] owns that state for a single parameter tensor.

use burn::optim::SimpleOptimizer;
use burn::record::Record;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use super::trait_::Optimizer;

/// Update rule of regular step gradient descent.
///
/// Each step moves the current step length along the normalized negative
/// gradient. When the new gradient points against the previous one the minimum
/// has been overshot and the step is multiplied by `relaxation`. The search has
/// converged once the step falls below `min_step` or the gradient norm below
/// `gradient_tolerance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegularStepCore {
    pub min_step: f64,
    pub relaxation: f64,
    pub gradient_tolerance: f64,
}

/// Per-tensor state of [`RegularStepCore`].
#[derive(Clone, Debug, Record)]
pub struct RegularStepState<B: Backend, const D: usize> {
    /// Gradient of the last step; cleared by a relaxation.
    pub previous_gradient: Option<Tensor<B, D>>,
    /// Current step length.
    pub step: f64,
    /// Norm of the last gradient.
    pub gradient_norm: f64,
}

impl RegularStepCore {
    /// True when `state` meets the stopping criterion.
    pub fn converged<B: Backend, const D: usize>(&self, state: &RegularStepState<B, D>) -> bool {
        state.gradient_norm < self.gradient_tolerance || state.step < self.min_step
    }
}

impl<B: Backend> SimpleOptimizer<B> for RegularStepCore {
    type State<const D: usize> = RegularStepState<B, D>;

    /// `lr` is the initial step length, used when there is no state yet.
    fn step<const D: usize>(
        &self,
        lr: f64,
        tensor: Tensor<B, D>,
        grad: Tensor<B, D>,
        state: Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Option<Self::State<D>>) {
        let gradient_norm = grad.clone().powf_scalar(2.0).sum().sqrt().into_scalar().elem::<f64>();

        let (mut step, previous) = match state {
            Some(state) => (state.step, state.previous_gradient),
            None => (lr, None),
        };
        if let Some(previous) = previous {
            let dot = (previous * grad.clone()).sum().into_scalar().elem::<f64>();
            if dot < 0.0 {
                step *= self.relaxation;
            }
        }

        let state = RegularStepState {
            previous_gradient: Some(grad.clone()),
            step,
            gradient_norm,
        };
        if self.converged(&state) {
            return (tensor, Some(state));
        }
        let update = grad.mul_scalar(step / gradient_norm);
        (tensor - update, Some(state))
    }

    fn to_device<const D: usize>(mut state: Self::State<D>, device: &B::Device) -> Self::State<D> {
        state.previous_gradient = state.previous_gradient.map(|g| g.to_device(device));
        state
    }
}

/// Regular step gradient descent over one flat parameter tensor.
#[derive(Debug, Clone)]
pub struct RegularStepGradientDescent<B: AutodiffBackend> {
    core: RegularStepCore,
    max_step: f64,
    state: Option<RegularStepState<B::InnerBackend, 1>>,
}

impl<B: AutodiffBackend> RegularStepGradientDescent<B> {
    /// Create a new optimizer.
    ///
    /// # Arguments
    /// * `max_step` - Initial step length
    /// * `min_step` - Step length at which the search stops
    pub fn new(max_step: f64, min_step: f64) -> Self {
        Self {
            core: RegularStepCore {
                min_step,
                relaxation: 0.5,
                gradient_tolerance: 1e-8,
            },
            max_step,
            state: None,
        }
    }

    pub fn with_relaxation(mut self, relaxation: f64) -> Self {
        self.core.relaxation = relaxation;
        self
    }

    pub fn with_gradient_tolerance(mut self, tolerance: f64) -> Self {
        self.core.gradient_tolerance = tolerance;
        self
    }

    pub fn core(&self) -> &RegularStepCore {
        &self.core
    }

    /// Restart from `max_step`.
    pub fn reset(&mut self) {
        self.state = None;
    }

    /// Shrink the step after a step that made the metric worse.
    ///
    /// The previous gradient is dropped so the next step is not relaxed twice.
    pub fn relax(&mut self) {
        let relaxation = self.core.relaxation;
        let state = self.state.get_or_insert_with(|| RegularStepState {
            previous_gradient: None,
            step: self.max_step,
            gradient_norm: f64::INFINITY,
        });
        state.step *= relaxation;
        state.previous_gradient = None;
    }
}

impl<B: AutodiffBackend> Optimizer<B> for RegularStepGradientDescent<B> {
    fn step(&mut self, position: Tensor<B, 1>, gradient: Tensor<B::InnerBackend, 1>) -> Tensor<B, 1> {
        let (next, state) = SimpleOptimizer::<B::InnerBackend>::step(
            &self.core,
            self.max_step,
            position.inner(),
            gradient,
            self.state.take(),
        );
        self.state = state;
        Tensor::from_inner(next)
    }

    fn converged(&self) -> bool {
        self.state.as_ref().is_some_and(|state| self.core.converged(state))
    }

    fn learning_rate(&self) -> f64 {
        self.state.as_ref().map_or(self.max_step, |state| state.step)
    }

    fn set_learning_rate(&mut self, lr: f64) {
        match self.state.as_mut() {
            Some(state) => state.step = lr,
            None => self.max_step = lr,
        }
    }
}
