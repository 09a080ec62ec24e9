//! Image geometry: the sampling grid of an image without its voxel data.
//!
//! The geometry owns all index↔physical arithmetic so it can be shared by
//! images, masks, resampling targets and B-spline control grids.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use crate::error::{CoreError, Result};
use crate::spatial::{BoundingBox, Direction, Point, Spacing, Vector};

/// Tolerance (in voxels) when deciding whether a continuous index is inside the buffer.
pub const INDEX_EDGE_TOLERANCE: f32 = 1e-3;

/// Grid geometry of an image.
///
/// `size` is the number of voxels along each index axis in `(x, y, z)` order,
/// which is the reverse of the tensor shape `[Z, Y, X]`.
///
/// Mapping: `point = origin + Direction · (index ⊙ spacing)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageGeometry<const D: usize> {
    size: [usize; D],
    origin: Point<D>,
    spacing: Spacing<D>,
    direction: Direction<D>,
}

impl<const D: usize> ImageGeometry<D> {
    /// Create a geometry from its components.
    pub fn new(size: [usize; D], origin: Point<D>, spacing: Spacing<D>, direction: Direction<D>) -> Self {
        Self {
            size,
            origin,
            spacing,
            direction,
        }
    }

    /// Geometry with unit spacing, zero origin and identity direction.
    pub fn with_size(size: [usize; D]) -> Self {
        Self::new(size, Point::origin(), Spacing::uniform(1.0), Direction::identity())
    }

    pub fn size(&self) -> [usize; D] {
        self.size
    }

    /// Tensor shape (`size` reversed).
    pub fn shape(&self) -> [usize; D] {
        std::array::from_fn(|i| self.size[D - 1 - i])
    }

    pub fn origin(&self) -> &Point<D> {
        &self.origin
    }

    pub fn spacing(&self) -> &Spacing<D> {
        &self.spacing
    }

    pub fn direction(&self) -> &Direction<D> {
        &self.direction
    }

    /// Total number of voxels.
    pub fn num_voxels(&self) -> usize {
        self.size.iter().product()
    }

    /// Check that the geometry can be used for registration.
    pub fn validate(&self) -> Result<()> {
        if self.size.iter().any(|&n| n == 0) {
            return Err(CoreError::invalid_geometry(format!("empty extent {:?}", self.size)));
        }
        if !self.spacing.is_valid_spacing() {
            return Err(CoreError::invalid_geometry(format!(
                "spacing must be positive and finite, got {:?}",
                self.spacing.to_vec()
            )));
        }
        if !self.origin.is_finite() {
            return Err(CoreError::invalid_geometry("origin is not finite"));
        }
        if self.direction.try_inverse().is_none() || self.direction.determinant().abs() < 1e-12 {
            return Err(CoreError::invalid_geometry("direction matrix is singular"));
        }
        Ok(())
    }

    /// Map a continuous index to a physical point.
    pub fn index_to_physical(&self, index: &[f64; D]) -> Point<D> {
        let scaled = Vector::new(std::array::from_fn(|i| index[i] * self.spacing[i]));
        self.origin + self.direction * scaled
    }

    /// Map a physical point to a continuous index.
    ///
    /// A singular direction matrix falls back to the identity; [`Self::validate`]
    /// rejects such geometries before registration starts.
    pub fn physical_to_index(&self, point: &Point<D>) -> [f64; D] {
        let inv_dir = self.direction.try_inverse().unwrap_or_else(Direction::identity);
        let rotated = inv_dir * (*point - self.origin);
        std::array::from_fn(|i| rotated[i] / self.spacing[i])
    }

    /// True when a continuous index lies within the voxel-center extent.
    pub fn contains_index(&self, index: &[f64; D]) -> bool {
        (0..D).all(|i| index[i] >= -1e-6 && index[i] <= (self.size[i] as f64 - 1.0) + 1e-6)
    }

    /// Axis-aligned physical bounding box of the voxel centers.
    pub fn physical_bounds(&self) -> BoundingBox<D> {
        let last: [f64; D] = std::array::from_fn(|i| self.size[i].saturating_sub(1) as f64);
        let index_box = BoundingBox::new(Point::origin(), Point::new(last));
        let corners = index_box.corners().into_iter().map(|c| self.index_to_physical(&c.to_array()));
        BoundingBox::enclosing(corners).unwrap_or(BoundingBox::new(self.origin, self.origin))
    }

    /// Physical position of the grid center.
    pub fn center(&self) -> Point<D> {
        let mid: [f64; D] = std::array::from_fn(|i| (self.size[i] as f64 - 1.0) / 2.0);
        self.index_to_physical(&mid)
    }

    /// Batch map physical points `[N, D]` to continuous indices `[N, D]`.
    ///
    /// `I = (P − O) · T` with `T_rc = (Direction⁻¹)_cr / spacing_c`.
    pub fn world_to_index_tensor<B: Backend>(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = points.device();
        let inv_dir = self.direction.try_inverse().unwrap_or_else(Direction::identity);
        let mut t_data = Vec::with_capacity(D * D);
        for r in 0..D {
            for c in 0..D {
                t_data.push((inv_dir[(c, r)] / self.spacing[c]) as f32);
            }
        }
        let t = Tensor::<B, 2>::from_data(TensorData::new(t_data, [D, D]), &device);
        (points - self.origin_tensor(&device)).matmul(t)
    }

    /// Batch map continuous indices `[N, D]` to physical points `[N, D]`.
    ///
    /// `P = O + I · M` with `M_rc = spacing_r · Direction_cr`.
    pub fn index_to_world_tensor<B: Backend>(&self, indices: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = indices.device();
        let mut m_data = Vec::with_capacity(D * D);
        for r in 0..D {
            for c in 0..D {
                m_data.push((self.spacing[r] * self.direction[(c, r)]) as f32);
            }
        }
        let m = Tensor::<B, 2>::from_data(TensorData::new(m_data, [D, D]), &device);
        indices.matmul(m) + self.origin_tensor(&device)
    }

    /// Per-row weight: 1 when a continuous index `[N, D]` lies inside the buffer, else 0.
    pub fn inside_weights<B: Backend>(&self, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        let [n, _] = indices.dims();
        let device = indices.device();
        let upper: Vec<f32> = self.size.iter().map(|&s| s as f32 - 1.0).collect();
        let upper = Tensor::<B, 1>::from_data(TensorData::new(upper, [D]), &device).reshape([1, D]);

        let above = indices.clone().greater_equal_elem(-INDEX_EDGE_TOLERANCE).float();
        let below = (upper - indices).greater_equal_elem(-INDEX_EDGE_TOLERANCE).float();
        (above * below)
            .sum_dim(1)
            .reshape([n])
            .greater_equal_elem(D as f32 - 0.5)
            .float()
    }

    fn origin_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let origin: Vec<f32> = (0..D).map(|i| self.origin[i] as f32).collect();
        Tensor::<B, 1>::from_data(TensorData::new(origin, [D]), device).reshape([1, D])
    }

    /// Flat buffer offset of an integer index (x fastest).
    pub fn linear_offset(&self, index: &[usize; D]) -> usize {
        let mut offset = 0;
        let mut stride = 1;
        for i in 0..D {
            offset += index[i] * stride;
            stride *= self.size[i];
        }
        offset
    }
}
