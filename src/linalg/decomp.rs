//! linalg::decomp — eigen/Cholesky/SVD helpers over `ndarray` tensors.
//!
//! Purpose
//! -------
//! Bridge `ndarray` storage into `nalgebra` decompositions and expose the
//! handful of factorizations the extractor and its re-estimation need:
//! floored inversion of a precision matrix, eigen pseudo-inverses, SPD
//! inverses and log-determinants, flooring of a covariance against a floor
//! matrix, and the polar projection onto the Stiefel manifold.
//!
//! Key behaviors
//! -------------
//! - Copy square `ndarray` matrices into `DMatrix<f64>` ([`to_dmatrix`]) and
//!   back ([`from_dmatrix`]) without altering symmetry.
//! - [`invert_with_flooring`] floors every eigenvalue of a quadratic term to
//!   [`PRECISION_FLOOR`] before inverting. The prior contributes unit
//!   precision in every direction, so 1.0 is a lower bound on the true
//!   posterior precision, not a tuning choice.
//! - [`floor_covariance`] floors a covariance in the metric of a floor matrix
//!   `F`: eigenvalues of `L⁻¹ C L⁻ᵀ` (with `F = L Lᵀ`) are raised to 1.
//!
//! Invariants & assumptions
//! ------------------------
//! - Inputs are square and finite; symmetric routines read both triangles
//!   through `symmetric_eigen`, which only uses the lower one.
//! - Functions that can fail on non-SPD input return `Option`; callers
//!   decide whether that is an error or a skip.
//!
//! Conventions
//! -----------
//! - Eigenvectors are returned as matrix columns.
//! - No logging; callers report counts of floored eigenvalues.
//! - [`householder_to_first_axis`] is the one non-factorization helper; it
//!   rotates a whitened mean onto the first coordinate axis.
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Lower bound on the eigenvalues of an ivector posterior precision.
pub const PRECISION_FLOOR: f64 = 1.0;

/// Relative eigenvalue cutoff for pseudo-inverses.
pub const EIGEN_EPS: f64 = 1e-10;

/// Copy an `ndarray` matrix into a `DMatrix`.
pub fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::<f64>::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// Copy a `DMatrix` into an `ndarray` matrix.
pub fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Average `a` with its transpose in place.
pub fn symmetrize(a: &mut Array2<f64>) {
    let n = a.nrows();
    for r in 0..n {
        for c in 0..r {
            let v = 0.5 * (a[[r, c]] + a[[c, r]]);
            a[[r, c]] = v;
            a[[c, r]] = v;
        }
    }
}

/// Symmetric eigendecomposition `A = P diag(s) Pᵀ`; returns `(s, P)`.
pub fn sym_eigen(a: ArrayView2<f64>) -> (Array1<f64>, Array2<f64>) {
    let eig = to_dmatrix(a).symmetric_eigen();
    let s = Array1::from_iter(eig.eigenvalues.iter().copied());
    (s, from_dmatrix(&eig.eigenvectors))
}

/// `P diag(s) Pᵀ`.
pub fn recompose(s: &Array1<f64>, p: &Array2<f64>) -> Array2<f64> {
    let scaled = p * &s.view().insert_axis(ndarray::Axis(0));
    let mut out = scaled.dot(&p.t());
    symmetrize(&mut out);
    out
}

/// invert_with_flooring — covariance from a posterior precision.
///
/// Parameters
/// ----------
/// - `quadratic`: `ArrayView2<f64>`
///   Symmetric `S×S` quadratic term of the ivector log-posterior. Need not be
///   positive definite on entry.
///
/// Returns
/// -------
/// `(Array2<f64>, usize)`
///   The inverse of the floored matrix and the number of eigenvalues that
///   were raised to [`PRECISION_FLOOR`].
///
/// Notes
/// -----
/// - Eigenvalues already ≥ 1.0 are kept exactly; only those below are
///   replaced.
pub fn invert_with_flooring(quadratic: ArrayView2<f64>) -> (Array2<f64>, usize) {
    let (mut s, p) = sym_eigen(quadratic);
    let mut num_floored = 0;
    s.mapv_inplace(|lambda| {
        if lambda < PRECISION_FLOOR {
            num_floored += 1;
            1.0 / PRECISION_FLOOR
        } else {
            1.0 / lambda
        }
    });
    (recompose(&s, &p), num_floored)
}

/// Eigen pseudo-inverse of a symmetric matrix.
///
/// Eigenvalues at or below `EIGEN_EPS · max|λ|` are treated as zero, so the
/// result acts as the inverse on the well-determined subspace and as zero on
/// its complement.
pub fn sym_pseudo_inverse(a: ArrayView2<f64>) -> Array2<f64> {
    let (s, p) = sym_eigen(a);
    let max_abs = s.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
    let cutoff = EIGEN_EPS * max_abs;
    let inv = s.mapv(|lambda| if lambda > cutoff && lambda > 0.0 { 1.0 / lambda } else { 0.0 });
    recompose(&inv, &p)
}

/// Lower Cholesky factor of an SPD matrix, or `None`.
pub fn cholesky_lower(a: ArrayView2<f64>) -> Option<Array2<f64>> {
    to_dmatrix(a).cholesky().map(|c| from_dmatrix(&c.l()))
}

/// Inverse of an SPD matrix via Cholesky, or `None` if not SPD.
pub fn spd_inverse(a: ArrayView2<f64>) -> Option<Array2<f64>> {
    let chol = to_dmatrix(a).cholesky()?;
    let mut out = from_dmatrix(&chol.inverse());
    symmetrize(&mut out);
    Some(out)
}

/// `ln det(A)` for an SPD matrix, or `None` if not SPD.
pub fn log_det_spd(a: ArrayView2<f64>) -> Option<f64> {
    let chol = to_dmatrix(a).cholesky()?;
    let l = chol.l();
    Some(2.0 * (0..l.nrows()).map(|i| l[(i, i)].ln()).sum::<f64>())
}

/// Inverse of a general square matrix via LU, or `None` if singular.
pub fn general_inverse(a: ArrayView2<f64>) -> Option<Array2<f64>> {
    to_dmatrix(a).try_inverse().map(|m| from_dmatrix(&m))
}

/// floor_covariance — raise a covariance above a floor matrix.
///
/// Parameters
/// ----------
/// - `cov`: symmetric covariance `C` to be floored.
/// - `floor`: SPD floor matrix `F`.
///
/// Returns
/// -------
/// `Option<(Array2<f64>, usize)>`
///   The floored covariance `L P max(Λ, 1) Pᵀ Lᵀ`, where `F = L Lᵀ` and
///   `L⁻¹ C L⁻ᵀ = P Λ Pᵀ`, together with the number of eigenvalues that
///   were raised. `None` when `F` is not SPD.
///
/// Notes
/// -----
/// - When `C ⪰ F` already, `C` is returned unchanged up to rounding.
/// - Floored directions get exactly the floor's variance; others keep `C`'s.
pub fn floor_covariance(cov: ArrayView2<f64>, floor: ArrayView2<f64>) -> Option<(Array2<f64>, usize)> {
    let l = to_dmatrix(floor).cholesky()?.l();
    let l_inv = l.clone().try_inverse()?;
    let whitened = &l_inv * to_dmatrix(cov) * l_inv.transpose();
    let (mut s, p) = sym_eigen(from_dmatrix(&whitened).view());
    let mut num_floored = 0;
    s.mapv_inplace(|lambda| {
        if lambda < 1.0 {
            num_floored += 1;
            1.0
        } else {
            lambda
        }
    });
    let floored = to_dmatrix(recompose(&s, &p).view());
    let mut out = from_dmatrix(&(&l * floored * l.transpose()));
    symmetrize(&mut out);
    Some((out, num_floored))
}

/// Householder reflection `H` with `H x = ‖x‖ e₀`.
///
/// Returns the identity when `x` already points along `+e₀` or is zero.
pub fn householder_to_first_axis(x: ArrayView1<f64>) -> Array2<f64> {
    let n = x.len();
    let norm = x.dot(&x).sqrt();
    let mut v = x.to_owned();
    // v = x − ‖x‖e₀, with v₀ computed without cancellation.
    let tail = norm * norm - x[0] * x[0];
    v[0] = if x[0] > 0.0 { -tail / (x[0] + norm) } else { x[0] - norm };
    let vv = v.dot(&v);
    let mut h = Array2::<f64>::eye(n);
    if vv <= f64::MIN_POSITIVE || norm == 0.0 {
        return h;
    }
    let outer = v.view().insert_axis(ndarray::Axis(1)).dot(&v.view().insert_axis(ndarray::Axis(0)));
    h.scaled_add(-2.0 / vv, &outer);
    h
}

/// Closest matrix with orthonormal columns (polar factor `U Vᵀ`).
///
/// Expects `nrows ≥ ncols`; for a wide matrix, project its transpose.
pub fn polar_projection(a: ArrayView2<f64>) -> Array2<f64> {
    let svd = to_dmatrix(a).svd(true, true);
    match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => from_dmatrix(&(u * v_t)),
        _ => a.to_owned(),
    }
}
