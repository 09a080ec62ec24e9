use anyhow::Result;
use burn_ndarray::NdArray;
use stagereg_core::image::{Image, ImageGeometry};
use stagereg_core::spatial::Point;
use stagereg_io::{load_transform, read_nifti, write_nifti};
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

type B = NdArray<f32>;

fn write_sphere(path: &Path, center: [f64; 3]) -> Result<()> {
    let geometry = ImageGeometry::with_size([16, 16, 16]);
    let mut data = Vec::with_capacity(geometry.num_voxels());
    for z in 0..16 {
        for y in 0..16 {
            for x in 0..16 {
                let r = ((x as f64 - center[0]).powi(2) + (y as f64 - center[1]).powi(2) + (z as f64 - center[2]).powi(2))
                    .sqrt();
                data.push((100.0 / (1.0 + ((r - 4.0) / 1.0).exp())) as f32);
            }
        }
    }
    let image = Image::<B, 3>::from_vec(data, &geometry, &Default::default())?;
    write_nifti(path, &image)
}

fn stagereg() -> Command {
    Command::new(env!("CARGO_BIN_EXE_stagereg"))
}

#[test]
fn test_rigid_run_writes_outputs() -> Result<()> {
    let dir = tempdir()?;
    let fixed = dir.path().join("fixed.nii");
    let moving = dir.path().join("moving.nii");
    write_sphere(&fixed, [8.0, 8.0, 8.0])?;
    write_sphere(&moving, [9.0, 8.0, 8.0])?;

    let transform = dir.path().join("transform.json");
    let resampled = dir.path().join("resampled.nii");
    let difference = dir.path().join("difference.nii");
    let parameters = dir.path().join("params.json");
    let status = stagereg()
        .arg(&fixed)
        .arg(&moving)
        .args(["--mode", "rigid", "--rigid-iterations", "30", "--rigid-sampling-ratio", "0.5", "--seed", "1"])
        .arg("--verbose")
        .arg("--save-transform")
        .arg(&transform)
        .arg("--resampled-image")
        .arg(&resampled)
        .arg("--difference-image")
        .arg(&difference)
        .arg("--save-parameters")
        .arg(&parameters)
        .status()?;

    assert_eq!(status.code(), Some(0));
    let (matrix, field) = load_transform::<3, _>(&transform)?;
    assert!(matrix.is_some());
    assert!(field.is_none());
    let image = read_nifti::<B, _>(&resampled, &Default::default())?;
    assert_eq!(image.size(), [16, 16, 16]);
    assert!(difference.exists());
    assert!(parameters.exists());
    Ok(())
}

#[test]
fn test_missing_input_exits_with_one() -> Result<()> {
    let dir = tempdir()?;
    let fixed = dir.path().join("fixed.nii");
    write_sphere(&fixed, [8.0, 8.0, 8.0])?;

    let status = stagereg().arg(&fixed).arg(dir.path().join("absent.nii")).status()?;
    assert_eq!(status.code(), Some(1));
    Ok(())
}

#[test]
fn test_stage_failure_exits_with_two_and_keeps_outputs() -> Result<()> {
    let dir = tempdir()?;
    let fixed = dir.path().join("fixed.nii");
    write_sphere(&fixed, [8.0, 8.0, 8.0])?;
    let transform = dir.path().join("transform.json");
    let resampled = dir.path().join("resampled.nii");

    // Landmarks that send every sample far outside the moving image.
    let status = stagereg()
        .arg(&fixed)
        .arg(&fixed)
        .args(["--mode", "pipeline-rigid", "--initial-method", "landmarks"])
        .args(["--fixed-landmark", "0,0,0", "--fixed-landmark", "10,0,0", "--fixed-landmark", "0,10,0"])
        .args(["--moving-landmark", "500,500,500", "--moving-landmark", "510,500,500"])
        .args(["--moving-landmark", "500,510,500"])
        .arg("--save-transform")
        .arg(&transform)
        .arg("--resampled-image")
        .arg(&resampled)
        .status()?;

    assert_eq!(status.code(), Some(2));
    let (matrix, _) = load_transform::<3, _>(&transform)?;
    let mapped = matrix.expect("matrix part").transform_point(&Point::new([3.0, 4.0, 5.0]));
    assert!((mapped[0] - 503.0).abs() < 1e-3 && (mapped[1] - 504.0).abs() < 1e-3, "{:?}", mapped);
    assert!(resampled.exists());
    Ok(())
}
