//! Image types and operations.
//!
//! This module provides the Image type, its sampling geometry and grid helpers
//! for representing medical images with physical metadata.

pub mod image;
pub mod metadata;
pub mod grid;

pub use image::Image;
pub use metadata::ImageGeometry;
pub use grid::{generate_grid, grid_indices};
