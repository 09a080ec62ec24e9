//! File I/O for stagereg: NIfTI volumes, transform files and parameter files.

pub mod nifti_io;
pub mod transform_io;
pub mod config_io;

pub use nifti_io::{read_nifti, write_nifti};
pub use transform_io::{load_transform, save_transform, TransformDocument};
pub use config_io::{load_config, save_config};
