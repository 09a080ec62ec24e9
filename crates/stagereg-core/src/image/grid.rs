use burn::tensor::{Tensor, TensorData, Shape};
use burn::tensor::backend::Backend;

/// Iterate over every integer index of a grid with `size` voxels per axis.
///
/// Indices are yielded in `(x, y, z)` order with `x` varying fastest, which
/// matches the flat buffer layout of a `[Z, Y, X]` tensor.
pub fn grid_indices<const D: usize>(size: [usize; D]) -> impl Iterator<Item = [usize; D]> {
    let total: usize = size.iter().product();
    (0..total).map(move |mut flat| {
        let mut index = [0usize; D];
        for (i, n) in size.iter().enumerate() {
            index[i] = flat % n;
            flat /= n;
        }
        index
    })
}

/// Generate a grid of continuous indices for the given image shape.
///
/// Returns a tensor of shape `[N, D]` where N is the total number of voxels
/// and D is the dimensionality. Columns are `(x, y, z)`; rows follow the
/// flat buffer order of the image tensor.
///
/// # Arguments
/// * `shape` - The tensor shape `[Z, Y, X]` (or `[Y, X]`)
/// * `device` - The device to create the tensor on
pub fn generate_grid<B, const D: usize>(
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, 2>
where
    B: Backend,
{
    let size: [usize; D] = std::array::from_fn(|i| shape[D - 1 - i]);
    let total: usize = size.iter().product();

    let mut grid = Vec::with_capacity(total * D);
    for index in grid_indices(size) {
        grid.extend(index.iter().map(|&v| v as f32));
    }

    Tensor::<B, 1>::from_data(TensorData::new(grid, Shape::new([total * D])), device)
        .reshape([total, D])
}
