//! Separable kernel evaluation on tensors.
//!
//! Every interpolator (and the B-spline transform) samples a regular lattice
//! with a separable kernel: per axis, a run of `taps` consecutive nodes starting
//! at an integer index with one weight each. [`gather_separable`] combines the
//! per-axis runs into `taps^D` neighbours, gathers them with `select` and sums.
//!
//! Tap positions come from detached coordinates, so gradients flow through the
//! weights (and the gathered values) only.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Lanczos window radius used by the windowed-sinc kernel.
pub const LANCZOS_RADIUS: usize = 3;

/// Shift applied to sinc arguments so `sin(πx)/(πx)` is never evaluated at zero.
const SINC_EPSILON: f32 = 1e-4;

/// How node indices outside the lattice are brought back onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Repeat the edge node.
    Clamp,
    /// Reflect about the edge node (`-i`, `2n-2-i`), matching the mirror
    /// boundary of the B-spline prefilter.
    Mirror,
}

impl Boundary {
    fn apply<B: Backend>(self, index: Tensor<B, 2, Int>, len: usize) -> Tensor<B, 2, Int> {
        let last = len as i64 - 1;
        match self {
            Boundary::Clamp => index.clamp(0, last),
            // last - ||i| - last| folds one period each way; clamp covers the rest
            Boundary::Mirror => index.abs().sub_scalar(last).abs().neg().add_scalar(last).clamp(0, last),
        }
    }
}

/// Kernel support along one axis.
#[derive(Debug, Clone)]
pub struct AxisTaps<B: Backend> {
    /// First node index of the run, `[N]`.
    pub start: Tensor<B, 1, Int>,
    /// Weight of each node in the run, `[N, taps]`.
    pub weights: Tensor<B, 2>,
}

impl<B: Backend> AxisTaps<B> {
    /// Single nearest node with unit weight.
    pub fn nearest(u: Tensor<B, 1>) -> Self {
        let [n] = u.dims();
        let device = u.device();
        let start = u.detach().add_scalar(0.5).floor().int();
        Self {
            start,
            weights: Tensor::ones([n, 1], &device),
        }
    }

    /// Two nodes `floor(u)`, `floor(u)+1` with weights `1-t`, `t`.
    pub fn linear(u: Tensor<B, 1>) -> Self {
        let [n] = u.dims();
        let floor = u.clone().detach().floor();
        let t = (u - floor.clone()).reshape([n, 1]);
        let weights = Tensor::cat(vec![t.clone().neg().add_scalar(1.0), t], 1);
        Self {
            start: floor.int(),
            weights,
        }
    }

    /// Four nodes `floor(u)-1 ..= floor(u)+2` with cubic B-spline weights.
    pub fn cubic_bspline(u: Tensor<B, 1>) -> Self {
        let [n] = u.dims();
        let floor = u.clone().detach().floor();
        let t = u - floor.clone();
        let t2 = t.clone() * t.clone();
        let t3 = t2.clone() * t.clone();
        let s = t.clone().neg().add_scalar(1.0);

        // B0 = (1-t)^3 / 6
        let b0 = s.clone() * s.clone() * s / 6.0;
        // B1 = (3t^3 - 6t^2 + 4) / 6
        let b1 = (t3.clone().mul_scalar(3.0) - t2.clone().mul_scalar(6.0)).add_scalar(4.0) / 6.0;
        // B2 = (-3t^3 + 3t^2 + 3t + 1) / 6
        let b2 = (t3.clone().mul_scalar(-3.0) + t2.mul_scalar(3.0) + t.mul_scalar(3.0)).add_scalar(1.0) / 6.0;
        // B3 = t^3 / 6
        let b3 = t3 / 6.0;

        let weights = Tensor::cat(
            vec![
                b0.reshape([n, 1]),
                b1.reshape([n, 1]),
                b2.reshape([n, 1]),
                b3.reshape([n, 1]),
            ],
            1,
        );
        Self {
            start: floor.int().sub_scalar(1),
            weights,
        }
    }

    /// `2·radius` nodes `floor(u)-radius+1 ..= floor(u)+radius` with normalised
    /// Lanczos-windowed sinc weights.
    pub fn lanczos(u: Tensor<B, 1>, radius: usize) -> Self {
        let [n] = u.dims();
        let device = u.device();
        let taps = 2 * radius;
        let floor = u.clone().detach().floor();
        let t = (u - floor.clone()).reshape([n, 1]);

        let offsets: Vec<f32> = (0..taps).map(|k| k as f32 - radius as f32 + 1.0).collect();
        let offsets = Tensor::<B, 1>::from_floats(offsets.as_slice(), &device).reshape([1, taps]);
        // distance from each node, shifted off the removable singularity
        let x = (t - offsets).add_scalar(SINC_EPSILON);

        let pi = std::f32::consts::PI;
        let r = radius as f32;
        let numerator = x.clone().mul_scalar(pi).sin() * x.clone().mul_scalar(pi / r).sin();
        let denominator = (x.clone() * x).mul_scalar(pi * pi / r);
        let raw = numerator / denominator;
        let total = raw.clone().sum_dim(1);
        Self {
            start: floor.int().sub_scalar(radius as i64 - 1),
            weights: raw / total,
        }
    }
}

/// Split `[N, D]` coordinates into their `D` columns.
pub fn axis_columns<B: Backend>(coords: Tensor<B, 2>) -> Vec<Tensor<B, 1>> {
    let [n, d] = coords.dims();
    (0..d)
        .map(|i| coords.clone().narrow(1, i, 1).reshape([n]))
        .collect()
}

/// Weighted sum of lattice values over a separable neighbourhood.
///
/// # Arguments
/// * `values` - `[M, C]` lattice values, flat index with axis 0 (`x`) fastest
/// * `size` - lattice extent per axis, `x` first
/// * `taps` - one [`AxisTaps`] per axis, in the same order as `size`
/// * `boundary` - handling of node indices outside the lattice
///
/// # Returns
/// `[N, C]` interpolated values.
pub fn gather_separable<B: Backend, const D: usize>(
    values: Tensor<B, 2>,
    size: [usize; D],
    taps: Vec<AxisTaps<B>>,
    boundary: Boundary,
) -> Tensor<B, 2> {
    let device = values.device();
    let [_, channels] = values.dims();
    let n = taps.first().map(|t| t.weights.dims()[0]).unwrap_or(0);

    let mut flat = Tensor::<B, 2, Int>::zeros([n, 1], &device);
    let mut weights = Tensor::<B, 2>::ones([n, 1], &device);
    let mut stride = 1i64;

    for (axis, tap) in taps.into_iter().enumerate() {
        let [_, k] = tap.weights.dims();
        let current = flat.dims()[1];
        let offsets = Tensor::<B, 1, Int>::arange(0..k as i64, &device).reshape([1, k]);
        let index = boundary
            .apply(tap.start.reshape([n, 1]) + offsets, size[axis])
            .mul_scalar(stride);

        flat = (flat.reshape([n, current, 1]) + index.reshape([n, 1, k])).reshape([n, current * k]);
        weights = (weights.reshape([n, current, 1]) * tap.weights.reshape([n, 1, k])).reshape([n, current * k]);
        stride *= size[axis] as i64;
    }

    let k = flat.dims()[1];
    let gathered = values.select(0, flat.reshape([n * k])).reshape([n, k, channels]);
    (gathered * weights.reshape([n, k, 1]))
        .sum_dim(1)
        .reshape([n, channels])
}

/// Sample a `[Z, Y, X]` image tensor at `[N, D]` continuous indices `(x, y, z)`.
pub fn sample_separable<B, const D: usize, F>(
    data: &Tensor<B, D>,
    indices: Tensor<B, 2>,
    kernel: F,
    boundary: Boundary,
) -> Tensor<B, 1>
where
    B: Backend,
    F: Fn(Tensor<B, 1>) -> AxisTaps<B>,
{
    let dims = data.dims();
    let size: [usize; D] = std::array::from_fn(|i| dims[D - 1 - i]);
    let voxels: usize = size.iter().product();
    let [n, _] = indices.dims();
    let taps = axis_columns(indices).into_iter().map(kernel).collect();
    gather_separable(data.clone().reshape([voxels, 1]), size, taps, boundary).reshape([n])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    fn row_sums(taps: &AxisTaps<Backend>) -> Vec<f32> {
        let [n, _] = taps.weights.dims();
        taps.weights.clone().sum_dim(1).reshape([n]).into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_weights_sum_to_one() {
        let device = Default::default();
        let u = Tensor::<Backend, 1>::from_floats([0.0, 0.3, 2.7, 5.5], &device);
        for taps in [
            AxisTaps::linear(u.clone()),
            AxisTaps::cubic_bspline(u.clone()),
            AxisTaps::lanczos(u.clone(), LANCZOS_RADIUS),
        ] {
            for s in row_sums(&taps) {
                assert!((s - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_lanczos_is_interpolating_at_nodes() {
        let device = Default::default();
        let u = Tensor::<Backend, 1>::from_floats([2.0], &device);
        let taps = AxisTaps::lanczos(u, LANCZOS_RADIUS);
        let start = taps.start.into_data().to_vec::<i64>().unwrap();
        assert_eq!(start, vec![0]);
        let w = taps.weights.into_data().to_vec::<f32>().unwrap();
        // node 2 is the third tap
        assert!((w[2] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_gather_separable_bilinear() {
        let device = Default::default();
        // 3 x 2 lattice, value = x + 10 y
        let values = Tensor::<Backend, 1>::from_floats([0.0, 1.0, 2.0, 10.0, 11.0, 12.0], &device).reshape([6, 1]);
        let x = Tensor::<Backend, 1>::from_floats([0.5, 2.0], &device);
        let y = Tensor::<Backend, 1>::from_floats([0.5, 1.0], &device);
        let out = gather_separable(values, [3, 2], vec![AxisTaps::linear(x), AxisTaps::linear(y)], Boundary::Clamp);
        let out = out.into_data().to_vec::<f32>().unwrap();
        assert!((out[0] - 5.5).abs() < 1e-5);
        assert!((out[1] - 12.0).abs() < 1e-5);
    }

    #[test]
    fn test_mirror_boundary_reflects_about_edge_nodes() {
        let device = Default::default();
        // 5 nodes, value = index
        let values = Tensor::<Backend, 1>::from_floats([0.0, 1.0, 2.0, 3.0, 4.0], &device).reshape([5, 1]);
        // nearest taps at -2, -1, 5, 6 land on 2, 1, 3, 2
        let u = Tensor::<Backend, 1>::from_floats([-2.0, -1.0, 5.0, 6.0], &device);
        let mirrored = gather_separable(values.clone(), [5], vec![AxisTaps::nearest(u.clone())], Boundary::Mirror);
        assert_eq!(mirrored.reshape([4]).into_data().to_vec::<f32>().unwrap(), vec![2.0, 1.0, 3.0, 2.0]);
        let clamped = gather_separable(values, [5], vec![AxisTaps::nearest(u)], Boundary::Clamp);
        assert_eq!(clamped.reshape([4]).into_data().to_vec::<f32>().unwrap(), vec![0.0, 0.0, 4.0, 4.0]);
    }
}
