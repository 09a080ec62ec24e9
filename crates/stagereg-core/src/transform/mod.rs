//! Transform types and operations.
//!
//! This module provides the transform model: flat parameter descriptions, CPU
//! value types carried between registration stages, and tensor transforms used
//! when a stage needs gradients or resamples an image.

pub mod trait_;
pub mod parameters;
pub mod matrix;
pub mod deformable;
pub mod rigid;
pub mod affine;
pub mod bspline;
pub mod composite;

pub use trait_::Transform;
pub use parameters::{scale_vector, shift_scale_vector, ExpectedMagnitudes, TransformKind, TransformParameters};
pub use matrix::{physical_shifts, MatrixTransform};
pub use deformable::{BSplineGrid, DeformableTransform};
pub use rigid::RigidTransform;
pub use affine::AffineTransform;
pub use bspline::BSplineTransform;
pub use composite::{RegistrationTransform, TensorTransform};
