//! optimization::stiefel — Cayley-transform curvilinear search on the
//! Stiefel manifold.
//!
//! Purpose
//! -------
//! Maximize a smooth objective `f(X)` over matrices with orthonormal
//! columns (`XᵀX = I`). Used by projection re-estimation when the subspace
//! projections are constrained to stay orthogonal.
//!
//! Key behaviors
//! -------------
//! - Each outer iteration builds the skew matrix `A = G Xᵀ − X Gᵀ` from the
//!   cost gradient `G = −∇f(X)` and walks the curve
//!   `Y(τ) = (I + τ/2·A)⁻¹ (I − τ/2·A) X`, which stays on the manifold for
//!   every `τ`.
//! - A step is accepted when the sufficient-decrease (`rho_1`) and
//!   curvature (`rho_2`) conditions both hold. A trial that overshoots is
//!   bisected back toward the last short step, and `τ` doubles while every
//!   trial is too short, for at most `max_halvings + 1` trials. If only
//!   sufficient decrease could be met the best such step is taken; if
//!   neither, the search stops and the last accepted point is returned with
//!   `converged = false`.
//! - Converges only when the Riemannian gradient norm `‖AX‖_F` falls below
//!   `tol·(1 + |f|)`; otherwise stops after `max_iters` outer iterations.
//! - Every accepted step strictly increases `f`.
//!
//! Invariants & assumptions
//! ------------------------
//! - `x0` has orthonormal columns and `nrows ≥ ncols`.
//! - `I + τ/2·A` is always invertible because `A` is skew-symmetric.
//!
//! Conventions
//! -----------
//! - Like the rest of the optimization layer, the user-facing objective is
//!   *maximized*; internally the search works on the cost `−f`.
//! - No logging; callers inspect [`ManifoldOutcome`] and report.
//!
//! Downstream usage
//! ----------------
//! - `ivector::training::update` calls [`orthonormal_projection_update`]
//!   per Gaussian when `do_orthogonalization` is set.
//!
//! Testing notes
//! -------------
//! - The analytic gradient of [`ProjectionObjective`] is checked against
//!   central finite differences.
//! - The search is checked on an orthogonal Procrustes problem whose
//!   optimum is known in closed form.
use crate::linalg::decomp::{general_inverse, polar_projection};
use crate::optimization::quadratic::{
    quadratic_matrix_grad, quadratic_matrix_objf, solve_quadratic_matrix_problem,
};
use ndarray::{Array2, ArrayView2};

/// Objective maximized over the Stiefel manifold.
pub trait ManifoldObjective {
    /// `f(X)`.
    fn value(&self, x: ArrayView2<f64>) -> f64;
    /// Euclidean gradient `∇f(X)`, same shape as `X`.
    fn grad(&self, x: ArrayView2<f64>) -> Array2<f64>;
}

/// Curvilinear-search configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManifoldOptions {
    pub tau: f64,
    pub rho_1: f64,
    pub rho_2: f64,
    pub max_halvings: usize,
    pub max_iters: usize,
    pub tol: f64,
}

impl Default for ManifoldOptions {
    fn default() -> Self {
        ManifoldOptions {
            tau: 1.0,
            rho_1: 1e-4,
            rho_2: 0.9,
            max_halvings: 20,
            max_iters: 100,
            tol: 1e-6,
        }
    }
}

/// Result of [`curvilinear_search`].
#[derive(Debug, Clone, PartialEq)]
pub struct ManifoldOutcome {
    /// Final point (orthonormal columns).
    pub x: Array2<f64>,
    /// `f(x)`.
    pub value: f64,
    /// Objective at the starting point.
    pub initial_value: f64,
    /// Accepted outer steps.
    pub iterations: usize,
    /// Riemannian gradient norm `‖AX‖_F` at `x`.
    pub grad_norm: f64,
    pub converged: bool,
    pub status: String,
}

/// The projection auxiliary function `tr(MᵀΣ⁻¹Y) − ½tr(MᵀΣ⁻¹MR)` as a
/// manifold objective.
///
/// When `D < S` the columns of `M` cannot be orthonormal, so the search runs
/// on `X = Mᵀ` instead (`transposed = true`).
#[derive(Debug, Clone, Copy)]
pub struct ProjectionObjective<'a> {
    pub r: ArrayView2<'a, f64>,
    pub y: ArrayView2<'a, f64>,
    pub sigma_inv: ArrayView2<'a, f64>,
    pub transposed: bool,
}

impl ManifoldObjective for ProjectionObjective<'_> {
    fn value(&self, x: ArrayView2<f64>) -> f64 {
        let m = if self.transposed { x.reversed_axes() } else { x };
        quadratic_matrix_objf(m, self.y, self.r, self.sigma_inv)
    }

    fn grad(&self, x: ArrayView2<f64>) -> Array2<f64> {
        if self.transposed {
            quadratic_matrix_grad(x.t(), self.y, self.r, self.sigma_inv).reversed_axes()
        } else {
            quadratic_matrix_grad(x, self.y, self.r, self.sigma_inv)
        }
    }
}

/// Point and tangent of the Cayley curve at step `tau`.
fn cayley_curve(
    a: &Array2<f64>, x: &Array2<f64>, tau: f64,
) -> Option<(Array2<f64>, Array2<f64>)> {
    let n = a.nrows();
    let eye = Array2::<f64>::eye(n);
    let half = 0.5 * tau;
    let lhs_inv = general_inverse((&eye + &(a * half)).view())?;
    let rhs = (&eye - &(a * half)).dot(x);
    let y = lhs_inv.dot(&rhs);
    let tangent = lhs_inv.dot(&a.dot(&(x + &y))) * -0.5;
    Some((y, tangent))
}

fn frobenius_norm(a: &Array2<f64>) -> f64 {
    a.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// One Wolfe step along the Cayley curve of `a` through `x`.
///
/// Bracketing search on `τ`: a trial failing sufficient decrease shrinks
/// the bracket from above, one failing only the curvature condition (step
/// too short) raises it from below, doubling `τ` while no upper bound is
/// known. At most `max_halvings + 1` trials. Falls back to the best
/// sufficient-decrease trial; `None` if no trial decreased the cost enough.
fn wolfe_step<O: ManifoldObjective>(
    obj: &O, a: &Array2<f64>, x: &Array2<f64>, cost0: f64, deriv0: f64, opts: &ManifoldOptions,
) -> Option<(Array2<f64>, f64)> {
    let (mut lo, mut hi) = (0.0, f64::INFINITY);
    let mut tau = opts.tau;
    let mut best: Option<(Array2<f64>, f64)> = None;
    for _ in 0..=opts.max_halvings {
        match cayley_curve(a, x, tau) {
            Some((y, tangent)) => {
                let cost = -obj.value(y.view());
                if cost.is_finite() && cost <= cost0 + opts.rho_1 * tau * deriv0 {
                    let gy = obj.grad(y.view()).mapv(|v| -v);
                    if (&gy * &tangent).sum() >= opts.rho_2 * deriv0 {
                        return Some((y, -cost));
                    }
                    if best.as_ref().is_none_or(|(_, value)| -cost > *value) {
                        best = Some((y, -cost));
                    }
                    lo = tau;
                } else {
                    hi = tau;
                }
            }
            None => hi = tau,
        }
        tau = if hi.is_finite() { 0.5 * (lo + hi) } else { 2.0 * tau };
    }
    best
}

/// curvilinear_search — maximize `obj` over the Stiefel manifold from `x0`.
///
/// Parameters
/// ----------
/// - `obj`: objective to maximize.
/// - `x0`: starting point with orthonormal columns.
/// - `opts`: step size, line-search constants and stopping rules.
///
/// Returns
/// -------
/// [`ManifoldOutcome`]; `x` is the last accepted point, never a rejected
/// trial, so `value ≥ initial_value`.
///
/// Notes
/// -----
/// - `converged` means the Riemannian gradient satisfies
///   `‖AX‖_F ≤ tol·(1 + |f(X)|)`; a short accepted step alone never ends
///   the search.
pub fn curvilinear_search<O: ManifoldObjective>(
    obj: &O, x0: Array2<f64>, opts: &ManifoldOptions,
) -> ManifoldOutcome {
    let mut x = x0;
    let mut value = obj.value(x.view());
    let initial_value = value;
    let mut iterations = 0;
    let (grad_norm, converged, status) = loop {
        let g = obj.grad(x.view()).mapv(|v| -v);
        let a = g.dot(&x.t()) - x.dot(&g.t());
        let ax = a.dot(&x);
        let grad_norm = frobenius_norm(&ax);
        if grad_norm <= opts.tol * (1.0 + value.abs()) {
            break (grad_norm, true, String::from("Converged: Riemannian gradient below tolerance"));
        }
        if iterations == opts.max_iters {
            break (grad_norm, false, format!("Max iterations reached (gradient norm {grad_norm:.3e})"));
        }
        let deriv0 = -(&g * &ax).sum();
        match wolfe_step(obj, &a, &x, -value, deriv0, opts) {
            Some((y, new_value)) => {
                x = y;
                value = new_value;
                iterations += 1;
            }
            None => {
                let status = format!(
                    "Line search failed after {} trials (gradient norm {grad_norm:.3e})",
                    opts.max_halvings + 1
                );
                break (grad_norm, false, status);
            }
        }
    };

    ManifoldOutcome { x, value, initial_value, iterations, grad_norm, converged, status }
}

/// `‖XᵀX − I‖_max ≤ 1e-8`.
fn has_orthonormal_columns(x: ArrayView2<f64>) -> bool {
    let gram = x.t().dot(&x);
    gram.indexed_iter().all(|((r, c), &v)| {
        let target = if r == c { 1.0 } else { 0.0 };
        (v - target).abs() <= 1e-8
    })
}

/// orthonormal_projection_update — re-estimate one projection on the
/// Stiefel manifold.
///
/// Parameters
/// ----------
/// - `r`, `y`, `sigma_inv`: statistics and precision of one Gaussian.
/// - `m`: `D×S` projection, overwritten with the constrained optimum.
/// - `opts`: curvilinear-search configuration.
///
/// Returns
/// -------
/// [`ManifoldOutcome`] for the search; `initial_value` is the objective at
/// the starting point.
///
/// Notes
/// -----
/// - The search starts from the better of the current `M` (when it already
///   has orthonormal columns) and the polar projection of the unconstrained
///   maximizer, so an orthonormal `M` is never made worse.
/// - When `D < S` the constraint is applied to the rows of `M`.
pub fn orthonormal_projection_update<'a>(
    r: ArrayView2<'a, f64>, y: ArrayView2<'a, f64>, sigma_inv: ArrayView2<'a, f64>,
    m: &mut Array2<f64>, opts: &ManifoldOptions,
) -> ManifoldOutcome {
    let (d, s) = m.dim();
    let transposed = d < s;
    let obj = ProjectionObjective { r, y, sigma_inv, transposed };
    let current = if transposed { m.t().to_owned() } else { m.clone() };
    let mut unconstrained = m.clone();
    solve_quadratic_matrix_problem(r, y, sigma_inv, &mut unconstrained);
    let polar = if transposed {
        polar_projection(unconstrained.t())
    } else {
        polar_projection(unconstrained.view())
    };
    let x0 = if has_orthonormal_columns(current.view())
        && obj.value(current.view()) >= obj.value(polar.view())
    {
        current
    } else {
        polar
    };
    let outcome = curvilinear_search(&obj, x0, opts);
    *m = if transposed { outcome.x.t().to_owned() } else { outcome.x.clone() };
    outcome
}
