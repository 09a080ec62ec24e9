use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use nalgebra::{SMatrix, Vector3};
use ndarray::{Array3, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use stagereg_core::image::{Image, ImageGeometry};
use stagereg_core::spatial::{Direction, Point, Spacing};
use std::path::Path;

/// Voxel-to-world affine rows of a header: sform, then qform, then pixdim only.
fn header_affine(header: &NiftiHeader) -> [[f64; 4]; 3] {
    if header.sform_code > 0 {
        let row = |r: [f32; 4]| [r[0] as f64, r[1] as f64, r[2] as f64, r[3] as f64];
        return [row(header.srow_x), row(header.srow_y), row(header.srow_z)];
    }

    let dx = header.pixdim[1] as f64;
    let dy = header.pixdim[2] as f64;
    let dz = header.pixdim[3] as f64;
    if header.qform_code > 0 {
        let b = header.quatern_b as f64;
        let c = header.quatern_c as f64;
        let d = header.quatern_d as f64;
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let dz = dz * qfac;

        return [
            [
                (a * a + b * b - c * c - d * d) * dx,
                (2.0 * b * c - 2.0 * a * d) * dy,
                (2.0 * b * d + 2.0 * a * c) * dz,
                header.quatern_x as f64,
            ],
            [
                (2.0 * b * c + 2.0 * a * d) * dx,
                (a * a + c * c - b * b - d * d) * dy,
                (2.0 * c * d - 2.0 * a * b) * dz,
                header.quatern_y as f64,
            ],
            [
                (2.0 * b * d - 2.0 * a * c) * dx,
                (2.0 * c * d + 2.0 * a * b) * dy,
                (a * a + d * d - c * c - b * b) * dz,
                header.quatern_z as f64,
            ],
        ];
    }

    [[dx, 0.0, 0.0, 0.0], [0.0, dy, 0.0, 0.0], [0.0, 0.0, dz, 0.0]]
}

/// Split an affine into origin, spacing (column norms) and direction cosines.
fn affine_geometry(affine: &[[f64; 4]; 3], size: [usize; 3]) -> ImageGeometry<3> {
    let origin = Point::new([affine[0][3], affine[1][3], affine[2][3]]);
    let axes = [Vector3::x(), Vector3::y(), Vector3::z()];
    let mut spacing = [1.0; 3];
    let mut columns = [Vector3::zeros(); 3];
    for i in 0..3 {
        let column = Vector3::new(affine[0][i], affine[1][i], affine[2][i]);
        let norm = column.norm();
        if norm > 1e-9 {
            spacing[i] = norm;
            columns[i] = column / norm;
        } else {
            columns[i] = axes[i];
        }
    }
    let direction = Direction(SMatrix::<f64, 3, 3>::from_columns(&columns));
    ImageGeometry::new(size, origin, Spacing::new(spacing), direction)
}

/// Read a 3-D NIfTI volume as an `f32` image laid out `[Z, Y, X]`.
pub fn read_nifti<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Image<B, 3>> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;
    let affine = header_affine(obj.header());

    let volume = obj
        .into_volume()
        .into_ndarray::<f32>()
        .context("Failed to convert volume to ndarray")?;
    if volume.ndim() != 3 {
        anyhow::bail!("Expected a 3-D NIfTI volume in {}, found {} dimensions", path.display(), volume.ndim());
    }
    let volume = volume.into_dimensionality::<Ix3>()?;
    let (nx, ny, nz) = volume.dim();

    // Indexing by (x, y, z) keeps this independent of the array's memory order.
    let mut values = Vec::with_capacity(nx * ny * nz);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                values.push(volume[[x, y, z]]);
            }
        }
    }

    let geometry = affine_geometry(&affine, [nx, ny, nz]);
    tracing::debug!(
        "Read {} with size {:?}, spacing {:?}",
        path.display(),
        geometry.size(),
        geometry.spacing()
    );
    Ok(Image::from_vec(values, &geometry, device)?)
}

/// Write an image to a NIfTI file, recording its geometry in the sform.
pub fn write_nifti<B: Backend, P: AsRef<Path>>(path: P, image: &Image<B, 3>) -> Result<()> {
    use nifti::writer::WriterOptions;

    let path = path.as_ref();
    let values = image.to_vec()?;
    let [nx, ny, nz] = image.size();
    let array = Array3::from_shape_fn((nx, ny, nz), |(x, y, z)| values[(z * ny + y) * nx + x]);

    let spacing = image.spacing();
    let direction = image.direction();
    let origin = image.origin();
    let mut header = NiftiHeader::default();
    header.pixdim = [1.0, spacing[0] as f32, spacing[1] as f32, spacing[2] as f32, 1.0, 1.0, 1.0, 1.0];
    header.sform_code = 1;
    header.qform_code = 0;
    let row = |r: usize| {
        [
            (direction[(r, 0)] * spacing[0]) as f32,
            (direction[(r, 1)] * spacing[1]) as f32,
            (direction[(r, 2)] * spacing[2]) as f32,
            origin[r] as f32,
        ]
    };
    header.srow_x = row(0);
    header.srow_y = row(1);
    header.srow_z = row(2);

    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&array)
        .with_context(|| format!("Failed to write NIfTI file {}", path.display()))?;
    tracing::debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use burn_ndarray::NdArray;
    use nifti::writer::WriterOptions;
    use tempfile::tempdir;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_read_nifti_basic() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.nii");

        // X=3, Y=4, Z=5, value encodes the index.
        let array = Array3::from_shape_fn((3, 4, 5), |(x, y, z)| (x + 10 * y + 100 * z) as f32);
        WriterOptions::new(&file_path).write_nifti(&array)?;

        let image = read_nifti::<TestBackend, _>(&file_path, &Default::default())?;
        assert_eq!(image.shape(), [5, 4, 3]);
        assert_eq!(image.size(), [3, 4, 5]);

        let values = image.to_vec()?;
        assert_eq!(values.len(), 60);
        // Buffer is x fastest.
        assert_eq!(values[1], 1.0);
        assert_eq!(values[3], 10.0);
        assert_eq!(values[12], 100.0);
        assert_eq!(values[59], 2.0 + 30.0 + 400.0);
        Ok(())
    }

    #[test]
    fn test_geometry_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("geom.nii");

        let direction = Direction(SMatrix::<f64, 3, 3>::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0));
        let geometry = ImageGeometry::new(
            [4, 3, 2],
            Point::new([10.0, -5.0, 2.5]),
            Spacing::new([0.5, 1.0, 2.0]),
            direction,
        );
        let values: Vec<f32> = (0..24).map(|v| v as f32 * 0.5).collect();
        let image = Image::<TestBackend, 3>::from_vec(values.clone(), &geometry, &Default::default())?;
        write_nifti(&file_path, &image)?;

        let read = read_nifti::<TestBackend, _>(&file_path, &Default::default())?;
        assert_eq!(read.size(), [4, 3, 2]);
        assert_eq!(read.to_vec()?, values);
        for i in 0..3 {
            assert!((read.origin()[i] - geometry.origin()[i]).abs() < 1e-5);
            assert!((read.spacing()[i] - geometry.spacing()[i]).abs() < 1e-5);
            for j in 0..3 {
                assert!((read.direction()[(i, j)] - direction[(i, j)]).abs() < 1e-5);
            }
        }
        Ok(())
    }
}
