//! Small dense linear algebra on const-generic matrices.
//!
//! nalgebra's decompositions carry dimension bounds that a generic `const D` cannot
//! satisfy, so these helpers route through dynamically sized matrices. Everything
//! here is `f64` and runs on the CPU; the matrices are at most 3×3 in practice.

use nalgebra::{DMatrix, SMatrix, SVector};

/// Relative singular-value threshold below which a matrix is treated as singular.
pub const SINGULAR_TOLERANCE: f64 = 1e-10;

fn to_dynamic<const R: usize, const C: usize>(m: &SMatrix<f64, R, C>) -> DMatrix<f64> {
    DMatrix::from_fn(R, C, |r, c| m[(r, c)])
}

fn to_static<const R: usize, const C: usize>(m: &DMatrix<f64>) -> SMatrix<f64, R, C> {
    SMatrix::from_fn(|r, c| m[(r, c)])
}

/// Determinant of a square matrix.
pub fn determinant<const D: usize>(m: &SMatrix<f64, D, D>) -> f64 {
    to_dynamic(m).determinant()
}

/// Singular value decomposition `m = U · diag(σ) · Vᵀ`.
#[derive(Debug, Clone)]
pub struct Svd<const D: usize> {
    pub u: SMatrix<f64, D, D>,
    pub singular_values: SVector<f64, D>,
    pub v_t: SMatrix<f64, D, D>,
}

/// Compute the SVD, returning `None` when the input is not finite.
pub fn svd<const D: usize>(m: &SMatrix<f64, D, D>) -> Option<Svd<D>> {
    if m.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let decomposition = to_dynamic(m).svd(true, true);
    let u = decomposition.u.as_ref()?;
    let v_t = decomposition.v_t.as_ref()?;
    Some(Svd {
        u: to_static(u),
        singular_values: SVector::from_fn(|i, _| decomposition.singular_values[i]),
        v_t: to_static(v_t),
    })
}

/// Rotation factor of the polar decomposition `m = R · P`.
///
/// `R = U·Vᵀ`; when that product is a reflection the singular vector belonging to
/// the smallest singular value is flipped so `R` is a proper rotation. Returns
/// `None` for singular or non-finite input.
pub fn polar_rotation<const D: usize>(m: &SMatrix<f64, D, D>) -> Option<SMatrix<f64, D, D>> {
    let Svd { mut u, singular_values, v_t } = svd(m)?;
    let max_sv = singular_values.max();
    let (min_idx, min_sv) = singular_values.argmin();
    if !(max_sv > 0.0) || min_sv <= SINGULAR_TOLERANCE * max_sv {
        return None;
    }
    let mut rotation = u * v_t;
    if determinant(&rotation) < 0.0 {
        for r in 0..D {
            u[(r, min_idx)] = -u[(r, min_idx)];
        }
        rotation = u * v_t;
    }
    Some(rotation)
}

/// QR decomposition `m = Q · R` with `Q` a proper rotation and `R` upper triangular.
///
/// Signs are normalized so `R` has a positive diagonal except possibly its last
/// entry, which absorbs the reflection when `det(m) < 0`.
pub fn rotation_qr<const D: usize>(
    m: &SMatrix<f64, D, D>,
) -> Option<(SMatrix<f64, D, D>, SMatrix<f64, D, D>)> {
    if m.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let qr = to_dynamic(m).qr();
    let mut q: SMatrix<f64, D, D> = to_static(&qr.q());
    let mut r: SMatrix<f64, D, D> = to_static(&qr.r());
    for i in 0..D {
        if r[(i, i)] < 0.0 {
            for k in 0..D {
                q[(k, i)] = -q[(k, i)];
                r[(i, k)] = -r[(i, k)];
            }
        }
    }
    if D > 0 && determinant(&q) < 0.0 {
        let last = D - 1;
        for k in 0..D {
            q[(k, last)] = -q[(k, last)];
            r[(last, k)] = -r[(last, k)];
        }
    }
    Some((q, r))
}

/// Eigen-decomposition of a symmetric matrix, eigenvalues sorted in descending order.
///
/// Column `i` of the returned matrix is the eigenvector for eigenvalue `i`.
pub fn symmetric_eigen<const D: usize>(
    m: &SMatrix<f64, D, D>,
) -> Option<(SVector<f64, D>, SMatrix<f64, D, D>)> {
    if m.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let eigen = to_dynamic(m).symmetric_eigen();
    let mut order: Vec<usize> = (0..D).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
    let values = SVector::from_fn(|i, _| eigen.eigenvalues[order[i]]);
    let vectors = SMatrix::from_fn(|r, c| eigen.eigenvectors[(r, order[c])]);
    Some((values, vectors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    fn rot_z(angle: f64) -> Matrix3<f64> {
        let (s, c) = angle.sin_cos();
        Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
    }

    #[test]
    fn test_determinant() {
        let m = Matrix3::new(2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 4.0);
        assert!((determinant(&m) - 24.0).abs() < 1e-12);
    }

    #[test]
    fn test_polar_rotation_strips_scale() {
        let scale = Matrix3::new(2.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 1.5);
        let rotation = rot_z(0.3);
        let recovered = polar_rotation(&(rotation * scale)).unwrap();
        assert!((recovered - rotation).amax() < 1e-9);
    }

    #[test]
    fn test_polar_rotation_singular() {
        let m = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0);
        assert!(polar_rotation(&m).is_none());
    }

    #[test]
    fn test_rotation_qr_reconstructs() {
        let m = rot_z(0.7) * Matrix3::new(1.2, 0.1, 0.0, 0.0, 0.9, 0.2, 0.0, 0.0, 1.1);
        let (q, r) = rotation_qr(&m).unwrap();
        assert!((q * r - m).amax() < 1e-9);
        assert!((determinant(&q) - 1.0).abs() < 1e-9);
        assert!(r[(1, 0)].abs() < 1e-12 && r[(2, 0)].abs() < 1e-12 && r[(2, 1)].abs() < 1e-12);
    }

    #[test]
    fn test_symmetric_eigen_sorted() {
        let m = Matrix3::new(1.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 3.0);
        let (values, vectors) = symmetric_eigen(&m).unwrap();
        assert!((values[0] - 5.0).abs() < 1e-9);
        assert!((values[2] - 1.0).abs() < 1e-9);
        assert!(vectors[(1, 0)].abs() > 0.999);
    }
}
