//! rust_ivector — ivector extraction and training for speech processing.
//!
//! Purpose
//! -------
//! Serve as the crate root for the ivector model: a full-covariance
//! Gaussian mixture whose component means (and optionally weights) are
//! shifted per utterance by a low-dimensional latent vector. The crate
//! infers that vector from utterance statistics and re-estimates the model
//! from many utterances by EM.
//!
//! Key behaviors
//! -------------
//! - [`ivector`]: options, statistics, the extractor, inference, auxiliary
//!   functions, the concurrent accumulator and the update phase.
//! - [`optimization`]: closed-form quadratic maximizers and the Cayley
//!   curvilinear search on the Stiefel manifold.
//! - [`linalg`]: packed symmetric storage and the eigen/Cholesky helpers
//!   built on `nalgebra`.
//! - [`utils`]: log-sum-exp, softmax and Gaussian constants.
//!
//! Invariants & assumptions
//! ------------------------
//! - All numerics are `f64` on `ndarray` storage.
//! - Library code does not panic on data; shape errors surface as
//!   [`ivector::IvectorError`], numerical degeneracy is floored or skipped
//!   and logged with `tracing`.
//!
//! Conventions
//! -----------
//! - Objectives are maximized.
//! - Feature extraction, Gaussian selection and file framing are left to
//!   callers; persistence here is MessagePack through `rmp-serde`.
//!
//! Downstream usage
//! ----------------
//! - Most callers need only `use rust_ivector::prelude::*;`.
//!
//! Testing notes
//! -------------
//! - Unit tests sit at the bottom of each source file; `tests/` holds the
//!   end-to-end training pipeline; `benches/` measures accumulation
//!   throughput.

pub mod ivector;
pub mod linalg;
pub mod optimization;
pub mod utils;

pub mod prelude {
    pub use crate::ivector::prelude::*;
}
