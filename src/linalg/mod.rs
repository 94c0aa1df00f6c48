//! linalg — dense linear-algebra helpers shared by the extractor and its
//! re-estimation.
//!
//! Purpose
//! -------
//! Keep storage conventions (row-packed symmetric matrices) and the
//! `ndarray` → `nalgebra` decomposition bridge in one place, so model code
//! works on `ndarray` tensors only.
//!
//! Key behaviors
//! -------------
//! - [`packed`]: lower-triangle row-packed storage and the batched
//!   operations built on it.
//! - [`decomp`]: eigen, Cholesky, LU and SVD based routines
//!   (floored inversion, pseudo-inverse, log-determinants, covariance
//!   flooring, polar projection).
//!
//! Conventions
//! -----------
//! - All routines are pure and operate on `f64`.
//! - Failures on non-SPD input surface as `None`; no error type lives here.

pub mod decomp;
pub mod packed;

pub mod prelude {
    pub use super::decomp::{
        EIGEN_EPS, PRECISION_FLOOR, cholesky_lower, floor_covariance, general_inverse,
        householder_to_first_axis, invert_with_flooring, log_det_spd, polar_projection,
        spd_inverse, sym_eigen, sym_pseudo_inverse, symmetrize,
    };
    pub use super::packed::{
        add_packed_to, pack_symmetric, packed_dim, packed_index, packed_len, packed_outer,
        trace_packed_product, unpack_symmetric,
    };
}
