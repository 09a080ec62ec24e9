//! JSON persistence of registration transforms.
//!
//! A transform file holds the optional matrix part and the optional B-spline
//! part, each as [`TransformParameters`]. The matrix is always written with
//! the Affine layout so any linear part survives a round trip.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stagereg_core::transform::{DeformableTransform, MatrixTransform, TransformKind, TransformParameters};
use std::fs;
use std::path::Path;

/// On-disk layout of a transform file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransformDocument {
    #[serde(default)]
    pub matrix: Option<TransformParameters>,
    #[serde(default)]
    pub deformable: Option<TransformParameters>,
}

impl TransformDocument {
    pub fn new<const D: usize>(
        matrix: Option<&MatrixTransform<D>>,
        deformable: Option<&DeformableTransform<D>>,
    ) -> Result<Self> {
        let matrix = matrix
            .map(|m| m.to_parameters(TransformKind::Affine))
            .transpose()
            .context("Matrix transform has no affine parameterisation")?;
        Ok(Self {
            matrix,
            deformable: deformable.map(|d| d.to_parameters()),
        })
    }

    /// Rebuild both parts, checking their dimension against `D`.
    pub fn into_transforms<const D: usize>(
        self,
    ) -> Result<(Option<MatrixTransform<D>>, Option<DeformableTransform<D>>)> {
        let matrix = self
            .matrix
            .as_ref()
            .map(MatrixTransform::<D>::from_parameters)
            .transpose()
            .context("Invalid matrix transform parameters")?;
        let deformable = self
            .deformable
            .as_ref()
            .map(DeformableTransform::<D>::from_parameters)
            .transpose()
            .context("Invalid B-spline transform parameters")?;
        Ok((matrix, deformable))
    }
}

/// Write a transform as pretty-printed JSON.
pub fn save_transform<const D: usize, P: AsRef<Path>>(
    path: P,
    matrix: Option<&MatrixTransform<D>>,
    deformable: Option<&DeformableTransform<D>>,
) -> Result<()> {
    let path = path.as_ref();
    let document = TransformDocument::new(matrix, deformable)?;
    let json = serde_json::to_string_pretty(&document)?;
    fs::write(path, json).with_context(|| format!("Failed to write transform file {}", path.display()))?;
    tracing::debug!(
        "Saved transform to {} (matrix: {}, deformable: {})",
        path.display(),
        document.matrix.is_some(),
        document.deformable.is_some()
    );
    Ok(())
}

/// Read a transform written by [`save_transform`].
pub fn load_transform<const D: usize, P: AsRef<Path>>(
    path: P,
) -> Result<(Option<MatrixTransform<D>>, Option<DeformableTransform<D>>)> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read transform file {}", path.display()))?;
    let document: TransformDocument =
        serde_json::from_str(&text).with_context(|| format!("Malformed transform file {}", path.display()))?;
    document
        .into_transforms()
        .with_context(|| format!("Unusable transform in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::SMatrix;
    use stagereg_core::spatial::{BoundingBox, Point, Vector};
    use stagereg_core::transform::BSplineGrid;
    use tempfile::tempdir;

    #[test]
    fn test_matrix_and_field_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("transform.json");

        let linear = SMatrix::<f64, 3, 3>::new(1.1, 0.05, 0.0, -0.02, 0.95, 0.1, 0.0, 0.0, 1.0);
        let matrix = MatrixTransform::new(linear, Vector::new([2.0, -1.0, 0.5]), Point::new([10.0, 10.0, 5.0]));
        let bounds = BoundingBox::new(Point::new([0.0, 0.0, 0.0]), Point::new([20.0, 20.0, 10.0]));
        let grid = BSplineGrid::covering(&bounds, &Vector::new([10.0, 10.0, 10.0]))?;
        let coefficients = (0..grid.num_parameters()).map(|i| (i % 7) as f64 * 0.1).collect();
        let field = DeformableTransform::new(grid, coefficients)?;

        save_transform(&path, Some(&matrix), Some(&field))?;
        let (loaded_matrix, loaded_field) = load_transform::<3, _>(&path)?;

        let loaded_matrix = loaded_matrix.expect("matrix part");
        let point = Point::new([3.0, 7.0, 1.0]);
        assert!(loaded_matrix.transform_point(&point).distance(&matrix.transform_point(&point)) < 1e-9);
        assert_eq!(loaded_field.expect("field part"), field);
        Ok(())
    }

    #[test]
    fn test_missing_parts_and_wrong_dimension() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.json");
        save_transform::<2, _>(&path, None, None)?;
        let (matrix, field) = load_transform::<2, _>(&path)?;
        assert!(matrix.is_none() && field.is_none());

        let path = dir.path().join("planar.json");
        let planar = MatrixTransform::translation_only(Vector::new([1.0, 2.0]), Point::origin());
        save_transform::<2, _>(&path, Some(&planar), None)?;
        assert!(load_transform::<3, _>(&path).is_err());
        Ok(())
    }
}
