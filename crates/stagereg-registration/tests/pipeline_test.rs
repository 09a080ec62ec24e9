use std::sync::Arc;
use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use stagereg_core::image::{Image, ImageGeometry};
use stagereg_core::spatial::Point;
use stagereg_core::transform::{BSplineGrid, DeformableTransform, RegistrationTransform};
use stagereg_core::filter::resample;
use stagereg_core::interpolation::InterpolationKind;
use stagereg_registration::{
    HistoryCallback, InitialMethod, Landmarks, MetricKind, PipelineConfig, PipelineError, PipelineStage, ProgressTracker,
    RegistrationInputs, RegistrationMode, RegistrationPipeline, StageError,
};

type B = Autodiff<NdArray<f32>>;

/// Sphere with a logistic edge, intensity 100 inside.
fn soft_sphere(geometry: &ImageGeometry<3>, center: [f64; 3], radius: f64) -> Image<B, 3> {
    let size = geometry.size();
    let mut data = Vec::with_capacity(geometry.num_voxels());
    for z in 0..size[2] {
        for y in 0..size[1] {
            for x in 0..size[0] {
                let p = geometry.index_to_physical(&[x as f64, y as f64, z as f64]);
                let r = ((p[0] - center[0]).powi(2) + (p[1] - center[1]).powi(2) + (p[2] - center[2]).powi(2)).sqrt();
                data.push((100.0 / (1.0 + ((r - radius) / 1.5).exp())) as f32);
            }
        }
    }
    Image::from_vec(data, geometry, &Default::default()).unwrap()
}

/// Anisotropic Gaussian blob.
fn blob(geometry: &ImageGeometry<2>, center: [f64; 2], sigma: [f64; 2]) -> Image<B, 2> {
    let size = geometry.size();
    let mut data = Vec::with_capacity(geometry.num_voxels());
    for y in 0..size[1] {
        for x in 0..size[0] {
            let p = geometry.index_to_physical(&[x as f64, y as f64]);
            let dx = (p[0] - center[0]) / sigma[0];
            let dy = (p[1] - center[1]) / sigma[1];
            data.push((100.0 * (-(dx * dx + dy * dy) / 2.0).exp()) as f32);
        }
    }
    Image::from_vec(data, geometry, &Default::default()).unwrap()
}

#[test]
fn test_rigid_recovers_sphere_translation() {
    let geometry = ImageGeometry::with_size([40, 40, 40]);
    let fixed = soft_sphere(&geometry, [20.0, 20.0, 20.0], 9.0);
    let moving = soft_sphere(&geometry, [25.0, 20.0, 20.0], 9.0);

    let config = PipelineConfig::new(RegistrationMode::Rigid)
        .with_metric(MetricKind::MeanSqrd)
        .with_rigid(200, 0.1)
        .with_seed(42);
    let mut pipeline = RegistrationPipeline::new(config, RegistrationInputs::new(&fixed, &moving)).unwrap();
    let report = pipeline.update().unwrap();

    assert_eq!(report.completed, PipelineStage::Rigid);
    assert_eq!(report.stages.len(), 1);
    let mapped = report.transform.transform_point(&Point::new([20.0, 20.0, 20.0]));
    println!("Mapped sphere centre: {:?}, metric {}", mapped, report.metric_value);
    assert!((mapped[0] - 25.0).abs() < 0.5, "x error: {}", mapped[0]);
    assert!((mapped[1] - 20.0).abs() < 0.5, "y error: {}", mapped[1]);
    assert!((mapped[2] - 20.0).abs() < 0.5, "z error: {}", mapped[2]);
    assert!(report.metric_value < 1.0, "metric {}", report.metric_value);
}

#[test]
fn test_identical_images_stay_at_identity() {
    let geometry = ImageGeometry::with_size([32, 32]);
    let image = blob(&geometry, [16.0, 15.0], [5.0, 3.0]);

    let config = PipelineConfig::new(RegistrationMode::PipelineAffine)
        .with_rigid(30, 0.5)
        .with_affine(30, 0.5)
        .with_seed(3);
    let mut pipeline = RegistrationPipeline::new(config, RegistrationInputs::new(&image, &image)).unwrap();
    let report = pipeline.update().unwrap();

    assert_eq!(report.stages.len(), 2);
    for stage in &report.stages {
        assert!(stage.metric_value.abs() < 1e-6, "{} metric {}", stage.stage, stage.metric_value);
        assert!(stage.transform.matrix.distance_from_identity() < 1e-6);
    }
    assert!(report.metric_value.abs() < 1e-6);
}

#[test]
fn test_mode_none_resamples_with_identity() {
    let geometry = ImageGeometry::with_size([24, 24]);
    let fixed = blob(&geometry, [12.0, 12.0], [4.0, 4.0]);
    let moving = blob(&geometry, [13.0, 11.0], [4.0, 4.0]);

    let mut pipeline =
        RegistrationPipeline::new(PipelineConfig::new(RegistrationMode::None), RegistrationInputs::new(&fixed, &moving))
            .unwrap();
    pipeline.update().unwrap();

    assert!(pipeline.final_transform().matrix.distance_from_identity() < 1e-12);
    assert!(pipeline.current_bspline_transform().is_none());

    let resampled = pipeline.resample_moving().unwrap().to_vec().unwrap();
    let original = moving.to_vec().unwrap();
    for (a, b) in resampled.iter().zip(&original) {
        assert!((a - b).abs() < 1e-4);
    }
}

#[test]
fn test_rigid_then_affine_no_worse_than_affine_alone() {
    let geometry = ImageGeometry::with_size([32, 32]);
    let fixed = blob(&geometry, [16.0, 16.0], [5.0, 3.5]);
    let moving = blob(&geometry, [18.0, 15.0], [5.0, 3.5]);

    let run = |mode: RegistrationMode| {
        let config = PipelineConfig::new(mode)
            .with_initial_method(InitialMethod::ImageCenters)
            .with_rigid(150, 1.0)
            .with_affine(150, 1.0)
            .with_seed(11);
        let mut pipeline = RegistrationPipeline::new(config, RegistrationInputs::new(&fixed, &moving)).unwrap();
        pipeline.update().unwrap().metric_value
    };

    let staged = run(RegistrationMode::PipelineAffine);
    let affine_only = run(RegistrationMode::Affine);
    println!("staged {} vs affine only {}", staged, affine_only);
    assert!(staged <= affine_only + 0.1 * affine_only.abs().max(1.0), "staged {} affine {}", staged, affine_only);
}

#[test]
fn test_stage_failure_keeps_previous_transform() {
    let geometry = ImageGeometry::with_size([24, 24]);
    let fixed = blob(&geometry, [12.0, 12.0], [4.0, 4.0]);
    let moving = blob(&geometry, [12.0, 12.0], [4.0, 4.0]);

    // Landmarks that push every sample far outside the moving image.
    let landmarks = Landmarks::new(
        vec![Point::new([0.0, 0.0]), Point::new([10.0, 0.0]), Point::new([0.0, 10.0])],
        vec![Point::new([500.0, 500.0]), Point::new([510.0, 500.0]), Point::new([500.0, 510.0])],
    );
    let history = Arc::new(HistoryCallback::new());
    let config = PipelineConfig::new(RegistrationMode::PipelineRigid)
        .with_initial_method(InitialMethod::Landmarks)
        .with_seed(5);
    let inputs = RegistrationInputs::new(&fixed, &moving).with_landmarks(landmarks);
    let mut pipeline = RegistrationPipeline::new(config, inputs)
        .unwrap()
        .with_progress(ProgressTracker::new().with_callback(history.clone()));

    let err = pipeline.update().unwrap_err();
    match &err {
        PipelineError::Stage { stage, source, snapshot } => {
            assert_eq!(*stage, PipelineStage::Rigid);
            assert!(matches!(source, StageError::UndefinedMetric { iteration: 0, valid_samples: 0 }));
            assert_eq!(snapshot.parameters.len(), 6);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(pipeline.completed_stage(), PipelineStage::Init);
    let mapped = pipeline.current_matrix_transform().transform_point(&Point::new([3.0, 4.0]));
    assert!((mapped[0] - 503.0).abs() < 1e-6 && (mapped[1] - 504.0).abs() < 1e-6, "{:?}", mapped);
    assert_eq!(history.errors().len(), 1);

    // The best transform so far still resamples.
    let resampled = pipeline.resample_moving().unwrap();
    assert_eq!(resampled.shape(), fixed.shape());
    assert!(matches!(pipeline.update(), Err(PipelineError::AlreadyRun)));
}

#[test]
fn test_bspline_pipeline_adds_field() {
    let geometry = ImageGeometry::with_size([32, 32]);
    let fixed = blob(&geometry, [16.0, 16.0], [5.0, 4.0]);
    let moving = blob(&geometry, [17.0, 16.0], [5.5, 4.0]);

    let history = Arc::new(HistoryCallback::new());
    let config = PipelineConfig::new(RegistrationMode::PipelineBSpline)
        .with_rigid(40, 1.0)
        .with_affine(40, 1.0)
        .with_bspline(20, 1.0, 12.0)
        .with_resample_between_stages(true)
        .with_seed(9);
    let mut pipeline = RegistrationPipeline::new(config, RegistrationInputs::new(&fixed, &moving))
        .unwrap()
        .with_progress(ProgressTracker::new().with_callback(history.clone()));
    let report = pipeline.update().unwrap();

    assert_eq!(report.completed, PipelineStage::BSpline);
    assert_eq!(
        report.stages.iter().map(|s| s.stage).collect::<Vec<_>>(),
        vec![PipelineStage::Rigid, PipelineStage::Affine, PipelineStage::BSpline]
    );
    let field = pipeline.current_bspline_transform().expect("deformable stage ran");
    assert_eq!(field.grid().spacing[0], 12.0);
    assert_eq!(report.transform.matrix, *pipeline.current_matrix_transform());
    assert!(!history.stage_history("BSpline").is_empty());

    let transform = pipeline.into_transform();
    assert!(transform.deformable.is_some());
}

#[test]
fn test_identity_field_does_not_change_resampling() {
    let geometry = ImageGeometry::with_size([24, 24]);
    let fixed = blob(&geometry, [12.0, 12.0], [4.0, 3.0]);
    let moving = blob(&geometry, [14.0, 11.0], [4.0, 3.0]);

    let config = PipelineConfig::new(RegistrationMode::Rigid).with_rigid(60, 1.0).with_seed(2);
    let mut pipeline = RegistrationPipeline::new(config, RegistrationInputs::new(&fixed, &moving)).unwrap();
    pipeline.update().unwrap();
    let matrix = *pipeline.current_matrix_transform();

    let grid = BSplineGrid::covering(&geometry.physical_bounds(), &stagereg_core::spatial::Vector::new([6.0, 6.0])).unwrap();
    let with_field = RegistrationTransform::new(matrix, Some(DeformableTransform::zeros(grid)));
    let without = RegistrationTransform::from_matrix(matrix);

    let a = resample(&geometry, &moving, &with_field, InterpolationKind::Linear, 0.0).unwrap().to_vec().unwrap();
    let b = resample(&geometry, &moving, &without, InterpolationKind::Linear, 0.0).unwrap().to_vec().unwrap();
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() < 1e-3);
    }
}

#[test]
fn test_sampling_region_outside_fixed_is_input_error() {
    let geometry = ImageGeometry::with_size([16, 16]);
    let fixed = blob(&geometry, [8.0, 8.0], [3.0, 3.0]);
    let roi = stagereg_core::spatial::BoundingBox::new(Point::new([100.0, 100.0]), Point::new([120.0, 120.0]));
    let inputs = RegistrationInputs::new(&fixed, &fixed).with_roi(roi);
    let err = RegistrationPipeline::new(PipelineConfig::new(RegistrationMode::Rigid), inputs).unwrap_err();
    assert!(matches!(err, stagereg_registration::InputError::EmptyRegion(_)));
}

#[test]
fn test_rigid_recovers_five_voxel_shift_of_large_sphere() {
    let geometry = ImageGeometry::with_size([64, 64, 64]);
    let fixed = soft_sphere(&geometry, [32.0, 32.0, 32.0], 14.0);
    let moving = soft_sphere(&geometry, [37.0, 32.0, 32.0], 14.0);

    let config = PipelineConfig::new(RegistrationMode::Rigid)
        .with_metric(MetricKind::MeanSqrd)
        .with_magnitudes(stagereg_core::transform::ExpectedMagnitudes {
            offset: 10.0,
            ..Default::default()
        })
        .with_rigid(200, 0.1)
        .with_seed(8);
    let mut pipeline = RegistrationPipeline::new(config, RegistrationInputs::new(&fixed, &moving)).unwrap();
    let report = pipeline.update().unwrap();

    let mapped = report.transform.transform_point(&Point::new([32.0, 32.0, 32.0]));
    println!("Mapped centre: {:?}, metric {}", mapped, report.metric_value);
    assert!((mapped[0] - 37.0).abs() < 0.5, "x error: {}", mapped[0]);
    assert!((mapped[1] - 32.0).abs() < 0.5, "y error: {}", mapped[1]);
    assert!((mapped[2] - 32.0).abs() < 0.5, "z error: {}", mapped[2]);
    assert!(report.metric_value < 1.0, "metric {}", report.metric_value);
}

#[test]
fn test_resampling_between_stages_reaches_same_transform() {
    let geometry = ImageGeometry::with_size([32, 32]);
    let fixed = blob(&geometry, [16.0, 16.0], [5.0, 3.5]);
    let moving = blob(&geometry, [18.0, 15.0], [5.0, 3.85]);

    let run = |resample: bool| {
        let config = PipelineConfig::new(RegistrationMode::PipelineAffine)
            .with_rigid(150, 1.0)
            .with_affine(200, 1.0)
            .with_resample_between_stages(resample)
            .with_seed(4);
        let mut pipeline = RegistrationPipeline::new(config, RegistrationInputs::new(&fixed, &moving)).unwrap();
        pipeline.update().unwrap().transform
    };

    let direct = run(false);
    let baked = run(true);
    for p in [[16.0, 16.0], [20.0, 19.0], [12.0, 13.0]] {
        let a = direct.transform_point(&Point::new(p));
        let b = baked.transform_point(&Point::new(p));
        assert!(a.distance(&b) < 0.35, "{:?}: {:?} vs {:?}", p, a, b);
    }
}

#[test]
fn test_affine_pipeline_recovers_scale() {
    let geometry = ImageGeometry::with_size([48, 48]);
    let fixed = blob(&geometry, [24.0, 24.0], [5.0, 3.0]);
    // 15% wider along x
    let moving = blob(&geometry, [24.0, 24.0], [5.75, 3.0]);

    let config = PipelineConfig::new(RegistrationMode::PipelineAffine)
        .with_rigid(50, 1.0)
        .with_affine(300, 1.0)
        .with_seed(6);
    let mut pipeline = RegistrationPipeline::new(config, RegistrationInputs::new(&fixed, &moving)).unwrap();
    let report = pipeline.update().unwrap();

    let linear = report.transform.matrix.linear();
    println!("Recovered linear part {:?}, metric {}", linear, report.metric_value);
    assert!((linear[(0, 0)] - 1.15).abs() < 0.04, "linear {:?}", linear);
    assert!((linear[(1, 1)] - 1.0).abs() < 0.04, "linear {:?}", linear);
}
