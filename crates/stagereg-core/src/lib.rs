//! Image, transform and interpolation model for staged image registration.
//!
//! Images are burn tensors laid out `[Z, Y, X]` with physical metadata;
//! transforms map fixed physical space to moving physical space.

pub mod error;
pub mod linalg;
pub mod spatial;
pub mod image;
pub mod transform;
pub mod interpolation;
pub mod filter;

pub use error::{CoreError, Result};
pub use image::{Image, ImageGeometry};
pub use spatial::{BoundingBox, Direction, Point, Spacing, Vector};
