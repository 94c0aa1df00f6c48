//! optimization::quadratic — closed-form maximizers of quadratic auxiliary
//! functions.
//!
//! Purpose
//! -------
//! Solve the two quadratic problems that appear in EM re-estimation of the
//! extractor: the vector problem `gᵀw − ½wᵀQw` (weight projections) and the
//! matrix problem `tr(MᵀΣ⁻¹Y) − ½tr(MᵀΣ⁻¹MR)` (mean projections).
//!
//! Key behaviors
//! -------------
//! - Both solvers take a Newton step from the current point using an eigen
//!   pseudo-inverse, so rank-deficient `Q`/`R` (a Gaussian that saw only a
//!   few utterances) leaves the unidentified directions at their old values.
//! - Both report the objective improvement and refuse a step that would
//!   lower the objective; the input is then left untouched and the
//!   improvement is reported as `0.0`.
//!
//! Invariants & assumptions
//! ------------------------
//! - `Q`, `R` are symmetric positive semi-definite (accumulated scatters).
//! - `Σ⁻¹` is symmetric positive definite.
//!
//! Conventions
//! -----------
//! - Objectives are expressed as quantities to *maximize*.
//! - No logging here; callers decide whether a refused step deserves a
//!   warning.
use crate::linalg::decomp::sym_pseudo_inverse;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Result of a closed-form quadratic solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadraticOutcome {
    /// Objective value at the starting point.
    pub objf_old: f64,
    /// Objective value at the returned point.
    pub objf_new: f64,
    /// `false` when the Newton step was refused and the start was kept.
    pub accepted: bool,
}

impl QuadraticOutcome {
    /// `objf_new − objf_old` (never negative).
    pub fn improvement(&self) -> f64 {
        self.objf_new - self.objf_old
    }
}

/// `gᵀw − ½wᵀQw`.
pub fn quadratic_vector_objf(q: ArrayView2<f64>, g: ArrayView1<f64>, w: ArrayView1<f64>) -> f64 {
    g.dot(&w) - 0.5 * w.dot(&q.dot(&w))
}

/// `tr(MᵀΣ⁻¹Y) − ½tr(MᵀΣ⁻¹MR)`.
pub fn quadratic_matrix_objf(
    m: ArrayView2<f64>, y: ArrayView2<f64>, r: ArrayView2<f64>, sigma_inv: ArrayView2<f64>,
) -> f64 {
    let sigma_inv_m = sigma_inv.dot(&m);
    let linear = (&sigma_inv_m * &y).sum();
    let quadratic = (&sigma_inv_m * &m.dot(&r)).sum();
    linear - 0.5 * quadratic
}

/// Gradient of [`quadratic_matrix_objf`] with respect to `M`: `Σ⁻¹(Y − MR)`.
pub fn quadratic_matrix_grad(
    m: ArrayView2<f64>, y: ArrayView2<f64>, r: ArrayView2<f64>, sigma_inv: ArrayView2<f64>,
) -> Array2<f64> {
    sigma_inv.dot(&(&y - &m.dot(&r)))
}

/// solve_quadratic_problem — maximize `gᵀw − ½wᵀQw` in place.
///
/// Parameters
/// ----------
/// - `q`: symmetric PSD `S×S` matrix.
/// - `g`: linear term of length `S`.
/// - `w`: current point; replaced by `w + Q⁺(g − Qw)` when that improves.
///
/// Returns
/// -------
/// [`QuadraticOutcome`] with the objective before and after.
pub fn solve_quadratic_problem(
    q: ArrayView2<f64>, g: ArrayView1<f64>, w: &mut Array1<f64>,
) -> QuadraticOutcome {
    let objf_old = quadratic_vector_objf(q, g, w.view());
    let residual = &g - &q.dot(w);
    let candidate = &*w + &sym_pseudo_inverse(q).dot(&residual);
    let objf_new = quadratic_vector_objf(q, g, candidate.view());
    if objf_new >= objf_old && objf_new.is_finite() {
        *w = candidate;
        QuadraticOutcome { objf_old, objf_new, accepted: true }
    } else {
        QuadraticOutcome { objf_old, objf_new: objf_old, accepted: false }
    }
}

/// solve_quadratic_matrix_problem — maximize `tr(MᵀΣ⁻¹Y) − ½tr(MᵀΣ⁻¹MR)`.
///
/// Parameters
/// ----------
/// - `r`: symmetric PSD `S×S` scatter.
/// - `y`: `D×S` linear statistics.
/// - `sigma_inv`: SPD `D×D` precision.
/// - `m`: current `D×S` projection; replaced by `M + (Y − MR)R⁺` when that
///   improves.
///
/// Notes
/// -----
/// - `Σ⁻¹` cancels from the stationarity condition, so it only enters the
///   reported objective.
pub fn solve_quadratic_matrix_problem(
    r: ArrayView2<f64>, y: ArrayView2<f64>, sigma_inv: ArrayView2<f64>, m: &mut Array2<f64>,
) -> QuadraticOutcome {
    let objf_old = quadratic_matrix_objf(m.view(), y, r, sigma_inv);
    let residual = &y - &m.dot(&r);
    let candidate = &*m + &residual.dot(&sym_pseudo_inverse(r));
    let objf_new = quadratic_matrix_objf(candidate.view(), y, r, sigma_inv);
    if objf_new >= objf_old && objf_new.is_finite() {
        *m = candidate;
        QuadraticOutcome { objf_old, objf_new, accepted: true }
    } else {
        QuadraticOutcome { objf_old, objf_new: objf_old, accepted: false }
    }
}
