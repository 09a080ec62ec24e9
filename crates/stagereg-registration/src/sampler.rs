//! Sample selection for metric evaluation.
//!
//! The fixed image is read back once; each stage then draws its own subset of
//! voxel centres from the candidate region (ROI box, overlap box, fixed mask and
//! intensity threshold). Moving-side restrictions are applied per evaluation as
//! sample weights, since they depend on the current transform.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use stagereg_core::image::{grid_indices, Image, ImageGeometry};
use stagereg_core::interpolation::nearest::NearestNeighborInterpolator;
use stagereg_core::interpolation::Interpolator;
use stagereg_core::spatial::{BoundingBox, Point};
use crate::error::{InputError, Result, StageError};

/// Minimum number of candidate samples a stage needs.
pub const MIN_VALID_SAMPLES: usize = 16;

/// Spatial restriction of one image side.
#[derive(Debug, Clone)]
pub enum MaskRegion<B: Backend, const D: usize> {
    /// Physical box, boundary inclusive.
    BoundingBox(BoundingBox<D>),
    /// Mask image; non-zero voxels are inside.
    Image(Image<B, D>),
}

impl<B: Backend, const D: usize> MaskRegion<B, D> {
    /// Physical extent of the region.
    pub fn bounds(&self) -> BoundingBox<D> {
        match self {
            MaskRegion::BoundingBox(b) => *b,
            MaskRegion::Image(mask) => mask.physical_bounds(),
        }
    }

    /// Check the mask against the image it restricts.
    pub fn validate(&self, image: &ImageGeometry<D>) -> std::result::Result<(), InputError> {
        if let MaskRegion::Image(mask) = self {
            mask.validate_geometry()
                .map_err(|e| InputError::mask_geometry(e.to_string()))?;
        }
        if self.bounds().intersection(&image.physical_bounds()).is_none() {
            return Err(InputError::mask_geometry("mask does not overlap its image"));
        }
        Ok(())
    }

    /// CPU lookup for repeated point queries.
    pub fn lookup(&self) -> std::result::Result<MaskLookup<D>, InputError> {
        Ok(match self {
            MaskRegion::BoundingBox(b) => MaskLookup::Box(*b),
            MaskRegion::Image(mask) => MaskLookup::Image {
                geometry: mask.geometry(),
                values: mask.to_vec().map_err(|e| InputError::mask_geometry(e.to_string()))?,
            },
        })
    }

    /// Per-point weight (1 inside, 0 outside) for physical points `[N, D]`.
    pub fn weights(&self, points: Tensor<B, 2>) -> Tensor<B, 1> {
        let [n, _] = points.dims();
        let device = points.device();
        match self {
            MaskRegion::BoundingBox(b) => {
                let min: Vec<f32> = b.min.to_vec().into_iter().map(|v| v as f32).collect();
                let max: Vec<f32> = b.max.to_vec().into_iter().map(|v| v as f32).collect();
                let min = Tensor::<B, 1>::from_data(TensorData::new(min, [D]), &device).reshape([1, D]);
                let max = Tensor::<B, 1>::from_data(TensorData::new(max, [D]), &device).reshape([1, D]);
                let above = (points.clone() - min).greater_equal_elem(0.0).float();
                let below = (max - points).greater_equal_elem(0.0).float();
                (above * below)
                    .sum_dim(1)
                    .reshape([n])
                    .greater_equal_elem(D as f32 - 0.5)
                    .float()
            }
            MaskRegion::Image(mask) => {
                let indices = mask.world_to_index_tensor(points);
                let inside = mask.inside_weights(indices.clone());
                let values = NearestNeighborInterpolator::new().interpolate(mask.data(), indices);
                values.greater_elem(0.0).float() * inside
            }
        }
    }
}

/// Mask evaluated on the CPU.
#[derive(Debug, Clone)]
pub enum MaskLookup<const D: usize> {
    Box(BoundingBox<D>),
    Image { geometry: ImageGeometry<D>, values: Vec<f32> },
}

impl<const D: usize> MaskLookup<D> {
    /// True when `point` falls on a non-zero mask voxel (nearest neighbour).
    pub fn contains(&self, point: &Point<D>) -> bool {
        match self {
            MaskLookup::Box(b) => b.contains(point),
            MaskLookup::Image { geometry, values } => {
                let index = geometry.physical_to_index(point);
                let size = geometry.size();
                let mut nearest = [0usize; D];
                for i in 0..D {
                    let r = index[i].round();
                    if r < 0.0 || r > (size[i] - 1) as f64 {
                        return false;
                    }
                    nearest[i] = r as usize;
                }
                values[geometry.linear_offset(&nearest)] != 0.0
            }
        }
    }
}

/// How samples are drawn from the fixed image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Fraction of candidate voxels to keep, in `(0, 1]`.
    pub ratio: f64,
    /// Explicit sample count; overrides `ratio`.
    pub count: Option<usize>,
    /// Restrict candidates to the overlap of the fixed and moving bounding boxes.
    pub use_overlap_as_roi: bool,
    /// Exclude fixed voxels below this intensity.
    pub intensity_threshold: Option<f64>,
    /// Seed for sample selection; 0 draws from OS entropy.
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            ratio: 1.0,
            count: None,
            use_overlap_as_roi: false,
            intensity_threshold: None,
            seed: 0,
        }
    }
}

impl SamplingConfig {
    pub fn with_ratio(mut self, ratio: f64) -> Self {
        self.ratio = ratio;
        self
    }

    /// Range checks.
    pub fn validate(&self) -> std::result::Result<(), InputError> {
        if !(self.ratio > 0.0 && self.ratio <= 1.0) {
            return Err(InputError::invalid_configuration(format!(
                "sampling ratio must be in (0, 1], got {}",
                self.ratio
            )));
        }
        if self.count == Some(0) {
            return Err(InputError::invalid_configuration("sample count must be positive"));
        }
        if matches!(self.intensity_threshold, Some(t) if !t.is_finite()) {
            return Err(InputError::invalid_configuration("intensity threshold must be finite"));
        }
        Ok(())
    }
}

/// Sample points with their fixed intensities.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet<const D: usize> {
    /// Physical points, row-major `[N, D]`.
    pub points: Vec<f32>,
    /// Fixed image values at the points.
    pub values: Vec<f32>,
}

impl<const D: usize> SampleSet<D> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sample positions as physical points.
    pub fn physical_points(&self) -> Vec<Point<D>> {
        self.points
            .chunks_exact(D)
            .map(|c| Point::new(std::array::from_fn(|i| c[i] as f64)))
            .collect()
    }

    /// Upload as `(points [N, D], values [N])`.
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let n = self.len();
        let points = Tensor::from_data(TensorData::new(self.points.clone(), [n, D]), device);
        let values = Tensor::from_data(TensorData::new(self.values.clone(), [n]), device);
        (points, values)
    }
}

/// Candidate region of the fixed image, fixed once per registration run.
#[derive(Debug, Clone)]
pub struct FixedSampler<const D: usize> {
    geometry: ImageGeometry<D>,
    values: Vec<f32>,
    region: Option<BoundingBox<D>>,
    mask: Option<MaskLookup<D>>,
}

impl<const D: usize> FixedSampler<D> {
    /// Read back the fixed image and intersect the optional regions.
    ///
    /// `roi` is an explicit region box, `overlap_with` the moving image bounds when
    /// the overlap is used as region of interest.
    pub fn new<B: Backend>(
        fixed: &Image<B, D>,
        mask: Option<&MaskRegion<B, D>>,
        roi: Option<BoundingBox<D>>,
        overlap_with: Option<BoundingBox<D>>,
    ) -> std::result::Result<Self, InputError> {
        if roi.is_some() && mask.is_some() {
            return Err(InputError::invalid_configuration(
                "an explicit region box and a fixed mask cannot be combined",
            ));
        }
        let geometry = fixed.geometry();
        let values = fixed.to_vec()?;
        let mut region: Option<BoundingBox<D>> = None;
        for bounds in [roi, overlap_with].into_iter().flatten() {
            let current = region.unwrap_or_else(|| geometry.physical_bounds());
            region = Some(current.intersection(&bounds).ok_or_else(|| {
                InputError::EmptyRegion("region of interest does not overlap the fixed image".into())
            })?);
        }
        let mask = mask.map(|m| m.lookup()).transpose()?;
        Ok(Self {
            geometry,
            values,
            region,
            mask,
        })
    }

    pub fn geometry(&self) -> &ImageGeometry<D> {
        &self.geometry
    }

    /// Fixed image values in buffer order.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    fn is_candidate(&self, offset: usize, point: &Point<D>, threshold: Option<f64>) -> bool {
        if let Some(t) = threshold {
            if (self.values[offset] as f64) < t {
                return false;
            }
        }
        if let Some(region) = &self.region {
            if !region.contains(point) {
                return false;
            }
        }
        match &self.mask {
            Some(mask) => mask.contains(point),
            None => true,
        }
    }

    /// Indices (x fastest) of every voxel eligible for sampling, in raster order.
    pub fn candidates(&self, threshold: Option<f64>) -> Vec<usize> {
        let indices: Vec<[usize; D]> = grid_indices(self.geometry.size()).collect();
        indices
            .par_iter()
            .enumerate()
            .filter(|(offset, index)| {
                let continuous: [f64; D] = std::array::from_fn(|i| index[i] as f64);
                self.is_candidate(*offset, &self.geometry.index_to_physical(&continuous), threshold)
            })
            .map(|(offset, _)| offset)
            .collect()
    }

    /// Draw a sample set.
    pub fn draw(&self, config: &SamplingConfig) -> Result<SampleSet<D>> {
        let candidates = self.candidates(config.intensity_threshold);
        if candidates.len() < MIN_VALID_SAMPLES {
            return Err(StageError::InsufficientSamples {
                found: candidates.len(),
                required: MIN_VALID_SAMPLES,
            });
        }
        let wanted = match config.count {
            Some(count) => count,
            None => (candidates.len() as f64 * config.ratio).round() as usize,
        }
        .clamp(MIN_VALID_SAMPLES, candidates.len());

        let chosen = if wanted == candidates.len() {
            candidates
        } else {
            let mut rng = if config.seed == 0 {
                StdRng::from_os_rng()
            } else {
                StdRng::seed_from_u64(config.seed)
            };
            let mut picked = rand::seq::index::sample(&mut rng, candidates.len(), wanted).into_vec();
            picked.sort_unstable();
            picked.into_iter().map(|i| candidates[i]).collect()
        };

        let size = self.geometry.size();
        let mut points = Vec::with_capacity(chosen.len() * D);
        let mut values = Vec::with_capacity(chosen.len());
        for offset in chosen {
            let mut rest = offset;
            let index: [f64; D] = std::array::from_fn(|i| {
                let v = rest % size[i];
                rest /= size[i];
                v as f64
            });
            let p = self.geometry.index_to_physical(&index);
            points.extend((0..D).map(|i| p[i] as f32));
            values.push(self.values[offset]);
        }
        tracing::debug!("Drew {} samples (ratio {:.3})", values.len(), config.ratio);
        Ok(SampleSet { points, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn ramp(size: [usize; 2]) -> Image<B, 2> {
        let n = size[0] * size[1];
        let values = (0..n).map(|i| i as f32).collect();
        Image::from_vec(values, &ImageGeometry::with_size(size), &Default::default()).unwrap()
    }

    #[test]
    fn test_full_ratio_keeps_raster_order() {
        let sampler = FixedSampler::new(&ramp([8, 8]), None, None, None).unwrap();
        let samples = sampler.draw(&SamplingConfig::default()).unwrap();
        assert_eq!(samples.len(), 64);
        assert_eq!(samples.values[..3], [0.0, 1.0, 2.0]);
        assert_eq!(samples.points[2..4], [1.0, 0.0]);
    }

    #[test]
    fn test_seeded_selection_is_reproducible() {
        let sampler = FixedSampler::new(&ramp([16, 16]), None, None, None).unwrap();
        let config = SamplingConfig {
            ratio: 0.25,
            seed: 42,
            ..Default::default()
        };
        let a = sampler.draw(&config).unwrap();
        let b = sampler.draw(&config).unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_threshold_and_roi() {
        let image = ramp([8, 8]);
        let roi = BoundingBox::new(Point::new([0.0, 0.0]), Point::new([7.0, 3.0]));
        let sampler = FixedSampler::new(&image, None, Some(roi), None).unwrap();
        assert_eq!(sampler.candidates(None).len(), 32);
        assert_eq!(sampler.candidates(Some(8.0)).len(), 24);
    }

    #[test]
    fn test_too_few_candidates() {
        let sampler = FixedSampler::new(&ramp([4, 4]), None, None, None).unwrap();
        let err = sampler
            .draw(&SamplingConfig {
                intensity_threshold: Some(10.0),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, StageError::InsufficientSamples { found: 6, required: MIN_VALID_SAMPLES });
    }

    #[test]
    fn test_disjoint_roi_is_input_error() {
        let roi = BoundingBox::new(Point::new([100.0, 100.0]), Point::new([110.0, 110.0]));
        assert!(matches!(
            FixedSampler::new(&ramp([8, 8]), None, Some(roi), None),
            Err(InputError::EmptyRegion(_))
        ));
    }

    #[test]
    fn test_region_box_and_fixed_mask_are_exclusive() {
        let image = ramp([8, 8]);
        let roi = BoundingBox::new(Point::new([0.0, 0.0]), Point::new([4.0, 4.0]));
        let mask = MaskRegion::BoundingBox(roi);
        assert!(matches!(
            FixedSampler::new(&image, Some(&mask), Some(roi), None),
            Err(InputError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_mask_image_weights() {
        let device = Default::default();
        let geometry = ImageGeometry::with_size([4, 4]);
        let mut values = vec![0.0; 16];
        values[5] = 1.0;
        let mask = MaskRegion::Image(Image::<B, 2>::from_vec(values, &geometry, &device).unwrap());
        let points = Tensor::<B, 2>::from_floats([[1.0, 1.0], [1.2, 0.9], [2.0, 2.0], [9.0, 9.0]], &device);
        let w = mask.weights(points).into_data().to_vec::<f32>().unwrap();
        assert_eq!(w, vec![1.0, 1.0, 0.0, 0.0]);
        let lookup = mask.lookup().unwrap();
        assert!(lookup.contains(&Point::new([1.0, 1.0])));
        assert!(!lookup.contains(&Point::new([3.0, 1.0])));
    }

    #[test]
    fn test_box_mask_weights() {
        let device = Default::default();
        let mask = MaskRegion::<B, 2>::BoundingBox(BoundingBox::new(Point::new([0.0, 0.0]), Point::new([2.0, 2.0])));
        let points = Tensor::<B, 2>::from_floats([[1.0, 1.0], [2.0, 2.5]], &device);
        assert_eq!(mask.weights(points).into_data().to_vec::<f32>().unwrap(), vec![1.0, 0.0]);
    }
}
