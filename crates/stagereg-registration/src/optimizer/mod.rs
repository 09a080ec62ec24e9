//! Optimizer module for registration parameters.
//!
//! This module provides the optimizer contract and the regular step gradient
//! descent used by every optimizing stage.

pub mod trait_;
pub mod regular_step;

pub use trait_::Optimizer;
pub use regular_step::{RegularStepCore, RegularStepGradientDescent, RegularStepState};
