//! Input validation run before any stage.
//!
//! Everything here returns [`InputError`]: a failure means the registration
//! never starts.

use burn::tensor::backend::Backend;
use stagereg_core::image::Image;
use crate::error::InputError;
use crate::sampler::MaskRegion;

/// Check an image's grid and that its voxels are finite.
pub fn validate_image<B: Backend, const D: usize>(name: &str, image: &Image<B, D>) -> Result<(), InputError> {
    image
        .validate_geometry()
        .map_err(|e| InputError::InvalidGeometry(format!("{} image: {}", name, e)))?;
    if image.num_voxels() == 0 {
        return Err(InputError::InvalidGeometry(format!("{} image is empty", name)));
    }
    let values = image.to_vec()?;
    if let Some(position) = values.iter().position(|v| !v.is_finite()) {
        return Err(InputError::InvalidGeometry(format!(
            "{} image has a non-finite voxel at linear offset {}",
            name, position
        )));
    }
    Ok(())
}

/// Check an optional mask against the image it restricts.
pub fn validate_mask<B: Backend, const D: usize>(
    name: &str,
    mask: Option<&MaskRegion<B, D>>,
    image: &Image<B, D>,
) -> Result<(), InputError> {
    match mask {
        Some(mask) => mask.validate(&image.geometry()).map_err(|e| match e {
            InputError::MaskGeometry(msg) => InputError::mask_geometry(format!("{} mask: {}", name, msg)),
            other => other,
        }),
        None => Ok(()),
    }
}

/// A strictly positive, finite value.
pub fn require_positive(name: &str, value: f64) -> Result<(), InputError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(InputError::invalid_configuration(format!("{} must be positive, got {}", name, value)))
    }
}

/// A fraction in `(0, 1]`.
pub fn require_ratio(name: &str, value: f64) -> Result<(), InputError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(InputError::invalid_configuration(format!("{} must be in (0, 1], got {}", name, value)))
    }
}

/// A non-zero count.
pub fn require_nonzero(name: &str, value: usize) -> Result<(), InputError> {
    if value > 0 {
        Ok(())
    } else {
        Err(InputError::invalid_configuration(format!("{} must be at least 1", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use stagereg_core::image::ImageGeometry;
    use stagereg_core::spatial::{BoundingBox, Point};

    type B = NdArray<f32>;

    #[test]
    fn test_validate_image() {
        let geometry = ImageGeometry::with_size([4, 4]);
        let image = Image::<B, 2>::filled(1.0, &geometry, &Default::default());
        assert!(validate_image("fixed", &image).is_ok());

        let mut values = vec![0.0f32; 16];
        values[5] = f32::NAN;
        let image = Image::<B, 2>::from_vec(values, &geometry, &Default::default()).unwrap();
        let err = validate_image("moving", &image).unwrap_err();
        assert!(matches!(err, InputError::InvalidGeometry(ref m) if m.contains("offset 5")));
    }

    #[test]
    fn test_validate_mask_outside_image() {
        let geometry = ImageGeometry::with_size([4, 4]);
        let image = Image::<B, 2>::filled(1.0, &geometry, &Default::default());
        let mask = MaskRegion::BoundingBox(BoundingBox::new(Point::new([50.0, 50.0]), Point::new([60.0, 60.0])));
        assert!(matches!(
            validate_mask("fixed", Some(&mask), &image),
            Err(InputError::MaskGeometry(_))
        ));
        assert!(validate_mask::<B, 2>("fixed", None, &image).is_ok());
    }

    #[test]
    fn test_range_checks() {
        assert!(require_positive("spacing", 2.0).is_ok());
        assert!(require_positive("spacing", 0.0).is_err());
        assert!(require_positive("spacing", f64::NAN).is_err());
        assert!(require_ratio("ratio", 1.0).is_ok());
        assert!(require_ratio("ratio", 1.5).is_err());
        assert!(require_nonzero("iterations", 0).is_err());
    }
}
