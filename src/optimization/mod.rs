//! optimization — closed-form quadratic solvers and the Stiefel-manifold
//! search used by EM re-estimation.
//!
//! Purpose
//! -------
//! Provide the numerical optimizers behind the M-step: exact maximizers of
//! quadratic auxiliary functions, and a curvilinear search for the
//! orthogonality-constrained projection update.
//!
//! Key behaviors
//! -------------
//! - `quadratic`: Newton steps with eigen pseudo-inverses for the weight
//!   (`gᵀw − ½wᵀQw`) and projection (`tr(MᵀΣ⁻¹Y) − ½tr(MᵀΣ⁻¹MR)`) problems,
//!   with improvement reporting and refusal of non-improving steps.
//! - `stiefel`: Cayley-transform curvilinear search with sufficient-decrease
//!   and curvature conditions and bounded step halving.
//!
//! Invariants & assumptions
//! ------------------------
//! - Inputs are finite; statistics matrices are symmetric PSD and precisions
//!   SPD. Degenerate inputs degrade (refused step, failed search) rather
//!   than error.
//!
//! Conventions
//! -----------
//! - Objectives are *maximized*; the manifold search minimizes the negated
//!   objective internally, mirroring the log-likelihood convention.
//! - This module avoids logging; the training layer reports outcomes.
//!
//! Downstream usage
//! ----------------
//! - `ivector::training::update` calls both submodules per Gaussian.
//!
//! Testing notes
//! -------------
//! - Quadratic solvers are checked against analytic optima; the manifold
//!   search against an orthogonal Procrustes problem and finite-difference
//!   gradients.

pub mod quadratic;
pub mod stiefel;

// ---- Optional convenience prelude for downstream crates -------------------
//
// Downstream crates can write
//
//     use rust_ivector::optimization::prelude::*;
//
// to import the main optimization surface in a single line.

pub mod prelude {
    pub use super::quadratic::{
        QuadraticOutcome, quadratic_matrix_grad, quadratic_matrix_objf, quadratic_vector_objf,
        solve_quadratic_matrix_problem, solve_quadratic_problem,
    };
    pub use super::stiefel::{
        ManifoldObjective, ManifoldOptions, ManifoldOutcome, ProjectionObjective,
        curvilinear_search, orthonormal_projection_update,
    };
}
