//! Image type with physical metadata and coordinate transformations.
//!
//! This module provides the Image struct which represents scalar images
//! with tensor data and physical space metadata (origin, spacing, direction).

use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use crate::error::{CoreError, Result};
use crate::spatial::{BoundingBox, Direction, Point, Spacing};
use super::metadata::ImageGeometry;

/// Scalar image with physical metadata.
///
/// The Image type combines tensor data with physical space metadata that
/// describes how image indices map to physical coordinates.
///
/// # Type Parameters
/// * `B` - The backend for tensor operations
/// * `D` - The dimensionality of the image (2 or 3)
///
/// # Coordinate Systems
/// * **Index Space**: continuous voxel indices ordered `(x, y, z)`
/// * **Physical Space**: continuous coordinates in mm or other units
///
/// The tensor is laid out `[Z, Y, X]` (`[Y, X]` in 2D), so `x` is the fastest axis.
///
/// # Examples
/// ```rust
/// use stagereg_core::Image;
/// use stagereg_core::spatial::{Point3, Spacing3, Direction3};
/// use burn::tensor::Tensor;
/// use burn_ndarray::NdArray;
///
/// type Backend = NdArray<f32>;
///
/// let device = Default::default();
/// let data = Tensor::<Backend, 3>::zeros([10, 10, 10], &device);
/// let image = Image::new(data, Point3::origin(), Spacing3::uniform(1.0), Direction3::identity());
/// assert_eq!(image.size(), [10, 10, 10]);
/// ```
#[derive(Debug, Clone)]
pub struct Image<B: Backend, const D: usize> {
    /// The voxel data.
    data: Tensor<B, D>,
    /// Physical coordinate of the first voxel (index 0,0,0).
    origin: Point<D>,
    /// Physical distance between voxels along each index axis.
    spacing: Spacing<D>,
    /// Orientation of the image axes.
    direction: Direction<D>,
}

impl<B: Backend, const D: usize> Image<B, D> {
    /// Create a new image with the given data and metadata.
    pub fn new(
        data: Tensor<B, D>,
        origin: Point<D>,
        spacing: Spacing<D>,
        direction: Direction<D>,
    ) -> Self {
        Self {
            data,
            origin,
            spacing,
            direction,
        }
    }

    /// Create an image from a flat voxel buffer (x fastest) on the given geometry.
    pub fn from_vec(values: Vec<f32>, geometry: &ImageGeometry<D>, device: &B::Device) -> Result<Self> {
        if values.len() != geometry.num_voxels() {
            return Err(CoreError::invalid_geometry(format!(
                "buffer holds {} voxels, geometry {:?} needs {}",
                values.len(),
                geometry.size(),
                geometry.num_voxels()
            )));
        }
        let data = Tensor::<B, D>::from_data(TensorData::new(values, Shape::new(geometry.shape())), device);
        Ok(Self::new(data, *geometry.origin(), *geometry.spacing(), *geometry.direction()))
    }

    /// Image of constant value on the given geometry.
    pub fn filled(value: f32, geometry: &ImageGeometry<D>, device: &B::Device) -> Self {
        let data = Tensor::<B, D>::full(geometry.shape(), value, device);
        Self::new(data, *geometry.origin(), *geometry.spacing(), *geometry.direction())
    }

    /// Get the image data tensor.
    pub fn data(&self) -> &Tensor<B, D> {
        &self.data
    }

    /// Get the origin (physical coordinate of first voxel).
    pub fn origin(&self) -> &Point<D> {
        &self.origin
    }

    /// Get the spacing.
    pub fn spacing(&self) -> &Spacing<D> {
        &self.spacing
    }

    /// Get the direction (orientation matrix).
    pub fn direction(&self) -> &Direction<D> {
        &self.direction
    }

    /// Tensor shape `[Z, Y, X]`.
    pub fn shape(&self) -> [usize; D] {
        let dims = self.data.dims();
        std::array::from_fn(|i| dims[i])
    }

    /// Number of voxels along each index axis, `(x, y, z)` order.
    pub fn size(&self) -> [usize; D] {
        let shape = self.shape();
        std::array::from_fn(|i| shape[D - 1 - i])
    }

    /// Total number of voxels.
    pub fn num_voxels(&self) -> usize {
        self.shape().iter().product()
    }

    /// Grid geometry of this image.
    pub fn geometry(&self) -> ImageGeometry<D> {
        ImageGeometry::new(self.size(), self.origin, self.spacing, self.direction)
    }

    /// Physical bounding box of the voxel centers.
    pub fn physical_bounds(&self) -> BoundingBox<D> {
        self.geometry().physical_bounds()
    }

    /// Geometric center in physical space.
    pub fn center(&self) -> Point<D> {
        self.geometry().center()
    }

    /// Copy the voxel values to the CPU (x fastest).
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        self.data
            .to_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| CoreError::data(format!("{:?}", e)))
    }

    /// Replace the voxel data, keeping the metadata.
    pub fn with_data(&self, data: Tensor<B, D>) -> Self {
        Self::new(data, self.origin, self.spacing, self.direction)
    }

    /// Convert a continuous physical point to a continuous index.
    ///
    /// `index = (Direction^-1 * (point - origin)) / spacing`
    pub fn transform_physical_point_to_continuous_index(&self, point: &Point<D>) -> Point<D> {
        Point::new(self.geometry().physical_to_index(point))
    }

    /// Convert a continuous index to a physical point.
    ///
    /// `point = origin + Direction * (index * spacing)`
    pub fn transform_continuous_index_to_physical_point(&self, index: &Point<D>) -> Point<D> {
        self.geometry().index_to_physical(&index.to_array())
    }

    /// Batch transform physical points to continuous indices.
    ///
    /// # Arguments
    /// * `points` - A tensor of shape `[Batch, D]` containing physical points
    ///
    /// # Returns
    /// A tensor of shape `[Batch, D]` containing continuous indices
    pub fn world_to_index_tensor(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        self.geometry().world_to_index_tensor(points)
    }

    /// Batch transform continuous indices to physical points.
    ///
    /// # Arguments
    /// * `indices` - A tensor of shape `[Batch, D]` containing continuous indices
    ///
    /// # Returns
    /// A tensor of shape `[Batch, D]` containing physical points
    pub fn index_to_world_tensor(&self, indices: Tensor<B, 2>) -> Tensor<B, 2> {
        self.geometry().index_to_world_tensor(indices)
    }

    /// Per-row weight that is 1 when a continuous index lies inside the buffer and 0 otherwise.
    pub fn inside_weights(&self, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        self.geometry().inside_weights(indices)
    }

    /// Check that the image geometry can be used for registration.
    pub fn validate_geometry(&self) -> Result<()> {
        self.geometry().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;
    type Point3 = Point<3>;
    type Spacing3 = Spacing<3>;
    type Direction3 = Direction<3>;

    fn image_3d(shape: [usize; 3], origin: [f64; 3], spacing: [f64; 3]) -> Image<Backend, 3> {
        let device = Default::default();
        let data = Tensor::<Backend, 3>::zeros(shape, &device);
        Image::new(data, Point3::new(origin), Spacing3::new(spacing), Direction3::identity())
    }

    #[test]
    fn test_image_creation() {
        let image = image_3d([4, 6, 8], [0.0; 3], [1.0; 3]);
        assert_eq!(image.shape(), [4, 6, 8]);
        assert_eq!(image.size(), [8, 6, 4]);
        assert_eq!(image.num_voxels(), 192);
    }

    #[test]
    fn test_physical_to_index_transform() {
        let image = image_3d([10, 10, 10], [10.0, 20.0, 30.0], [2.0, 2.0, 2.0]);
        let index = image.transform_physical_point_to_continuous_index(&Point3::new([20.0, 30.0, 40.0]));
        for i in 0..3 {
            assert!((index[i] - 5.0).abs() < 1e-9);
        }
        let point = image.transform_continuous_index_to_physical_point(&index);
        assert!((point[0] - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_tensor_mapping_roundtrip() {
        let image = image_3d([10, 10, 10], [1.0, -2.0, 3.0], [0.5, 1.0, 2.0]);
        let device = Default::default();
        let indices = Tensor::<Backend, 2>::from_floats([[1.0, 2.0, 3.0], [4.5, 0.0, 9.0]], &device);
        let world = image.index_to_world_tensor(indices.clone());
        let back = image.world_to_index_tensor(world.clone());

        let w = world.into_data();
        let w = w.as_slice::<f32>().unwrap();
        assert!((w[0] - 1.5).abs() < 1e-5);
        assert!((w[1] - 0.0).abs() < 1e-5);
        assert!((w[2] - 9.0).abs() < 1e-5);

        let diff = (back - indices).abs().max().into_scalar();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_inside_weights() {
        let image = image_3d([4, 4, 4], [0.0; 3], [1.0; 3]);
        let device = Default::default();
        let indices = Tensor::<Backend, 2>::from_floats(
            [[0.0, 0.0, 0.0], [3.0, 3.0, 3.0], [3.5, 1.0, 1.0], [1.0, -0.5, 1.0]],
            &device,
        );
        let w = image.inside_weights(indices).into_data();
        assert_eq!(w.as_slice::<f32>().unwrap(), &[1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_from_vec_checks_length() {
        let device = Default::default();
        let geometry = ImageGeometry::<2>::with_size([3, 2]);
        assert!(Image::<Backend, 2>::from_vec(vec![0.0; 5], &geometry, &device).is_err());
        let image = Image::<Backend, 2>::from_vec((0..6).map(|v| v as f32).collect(), &geometry, &device).unwrap();
        assert_eq!(image.shape(), [2, 3]);
        assert_eq!(image.to_vec().unwrap()[4], 4.0);
    }
}
