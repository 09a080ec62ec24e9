//! Image filters.

pub mod resample;

pub use resample::{resample, resample_points, ResampleImageFilter};
