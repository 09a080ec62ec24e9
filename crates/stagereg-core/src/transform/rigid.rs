//! Rigid transform implementation.
//!
//! This module provides a rigid transform (rotation + translation) evaluated on
//! tensors, so gradients flow from the mapped points back to the parameters.

use burn::tensor::{Tensor, TensorData};
use burn::tensor::backend::Backend;
use crate::spatial::Point;
use super::parameters::angle_count;
use super::trait_::{map_chunked, Transform};

/// Rotation matrix `[D, D]` from Euler angles.
///
/// 2D takes one angle; 3D takes `(x, y, z)` angles and returns `R = Rz · Ry · Rx`.
/// Other dimensionalities get the identity.
pub fn rotation_matrix<B: Backend, const D: usize>(angles: Tensor<B, 1>) -> Tensor<B, 2> {
    if D == 3 {
        // Euler angles: x (alpha), y (beta), z (gamma)
        let alpha = angles.clone().slice([0..1]);
        let beta = angles.clone().slice([1..2]);
        let gamma = angles.slice([2..3]);

        let cx = alpha.clone().cos();
        let sx = alpha.sin();
        let cy = beta.clone().cos();
        let sy = beta.sin();
        let cz = gamma.clone().cos();
        let sz = gamma.sin();

        // Row 1
        let r11 = cz.clone().mul(cy.clone());
        let r12 = cz.clone().mul(sy.clone()).mul(sx.clone()).sub(sz.clone().mul(cx.clone()));
        let r13 = cz.clone().mul(sy.clone()).mul(cx.clone()).add(sz.clone().mul(sx.clone()));

        // Row 2
        let r21 = sz.clone().mul(cy.clone());
        let r22 = sz.clone().mul(sy.clone()).mul(sx.clone()).add(cz.clone().mul(cx.clone()));
        let r23 = sz.mul(sy.clone()).mul(cx.clone()).sub(cz.mul(sx.clone()));

        // Row 3
        let r31 = sy.neg();
        let r32 = cy.clone().mul(sx);
        let r33 = cy.mul(cx);

        let row1 = Tensor::cat(vec![r11, r12, r13], 0).reshape([1, 3]);
        let row2 = Tensor::cat(vec![r21, r22, r23], 0).reshape([1, 3]);
        let row3 = Tensor::cat(vec![r31, r32, r33], 0).reshape([1, 3]);

        Tensor::cat(vec![row1, row2, row3], 0)
    } else if D == 2 {
        let theta = angles.slice([0..1]);
        let c = theta.clone().cos();
        let s = theta.sin();

        let row1 = Tensor::cat(vec![c.clone(), s.clone().neg()], 0).reshape([1, 2]);
        let row2 = Tensor::cat(vec![s, c], 0).reshape([1, 2]);

        Tensor::cat(vec![row1, row2], 0)
    } else {
        Tensor::eye(D, &angles.device())
    }
}

/// Centre point as a `[D]` tensor.
pub fn point_tensor<B: Backend, const D: usize>(point: &Point<D>, device: &B::Device) -> Tensor<B, 1> {
    let values: Vec<f32> = point.to_vec().into_iter().map(|v| v as f32).collect();
    Tensor::from_data(TensorData::new(values, [D]), device)
}

/// Rigid Transform (Rotation + Translation).
///
/// Supports 2D (1 angle) and 3D (3 Euler angles: ZYX convention).
/// Includes a fixed center of rotation: T(x) = R(x - c) + c + t
#[derive(Debug, Clone)]
pub struct RigidTransform<B: Backend, const D: usize> {
    translation: Tensor<B, 1>,
    rotation: Tensor<B, 1>, // [3] for 3D (x, y, z radians), [1] for 2D
    center: Tensor<B, 1>,   // Fixed center of rotation
}

impl<B: Backend, const D: usize> RigidTransform<B, D> {
    /// Create a new rigid transform.
    ///
    /// # Arguments
    /// * `translation` - Tensor of shape `[D]` containing the translation vector
    /// * `rotation` - Tensor of shape `[1]` for 2D (angle in radians) or `[3]` for 3D (Euler angles in radians)
    /// * `center` - Tensor of shape `[D]` containing the fixed center of rotation
    pub fn new(translation: Tensor<B, 1>, rotation: Tensor<B, 1>, center: Tensor<B, 1>) -> Self {
        Self {
            translation,
            rotation,
            center,
        }
    }

    /// Build from a flat parameter tensor `[angles.., translation..]`.
    ///
    /// The parameter tensor may be a tracked autodiff leaf; the transform
    /// slices it without detaching.
    pub fn from_parameter_tensor(parameters: Tensor<B, 1>, center: Tensor<B, 1>) -> Self {
        let angles = angle_count(D);
        let rotation = parameters.clone().slice([0..angles]);
        let translation = parameters.slice([angles..angles + D]);
        Self::new(translation, rotation, center)
    }

    /// Create an identity rigid transform (no rotation, no translation).
    ///
    /// # Arguments
    /// * `center` - Optional center of rotation. If None, uses origin (0,0...0).
    /// * `device` - Device to create tensors on.
    pub fn identity(center: Option<Tensor<B, 1>>, device: &B::Device) -> Self {
        let translation = Tensor::<B, 1>::zeros([D], device);
        let rotation = Tensor::<B, 1>::zeros([angle_count(D)], device);
        let center = center.unwrap_or_else(|| Tensor::<B, 1>::zeros([D], device));
        Self::new(translation, rotation, center)
    }

    /// Get the translation vector.
    pub fn translation(&self) -> Tensor<B, 1> {
        self.translation.clone()
    }

    /// Get the rotation angles.
    pub fn rotation(&self) -> Tensor<B, 1> {
        self.rotation.clone()
    }

    /// Get the center of rotation.
    pub fn center(&self) -> Tensor<B, 1> {
        self.center.clone()
    }
}

impl<B: Backend, const D: usize> Transform<B, D> for RigidTransform<B, D> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        // In row vector notation: y = (x - c) @ R^T + c + t
        let r_t = rotation_matrix::<B, D>(self.rotation.clone()).transpose();
        let t = self.translation.clone().reshape([1, D]);
        let c = self.center.clone().reshape([1, D]);

        map_chunked(points, |chunk| {
            let centered = chunk - c.clone();
            centered.matmul(r_t.clone()) + c.clone() + t.clone()
        })
    }
}
