//! models — the ivector extractor and its inference routines.
//!
//! Purpose
//! -------
//! Hold the trained extractor ([`IvectorExtractor`]) together with the
//! operations that read it: per-utterance statistics, posterior inference
//! over the ivector, and the auxiliary-function decomposition.
//!
//! Key behaviors
//! -------------
//! - [`extractor`]: parameters, derived caches, ivector-space transforms,
//!   persistence.
//! - [`inference`]: statistics, the three quadratic terms of the
//!   log-posterior, the posterior itself, and ivector extraction.
//! - [`auxf`]: gconst/mean/weight/variance acoustic terms and the prior term.
//!
//! Invariants & assumptions
//! ------------------------
//! - Derived caches are refreshed by every call that changes `M` or `Σ⁻¹`.
//! - Inference never mutates the model or the statistics.
//!
//! Downstream usage
//! ----------------
//! - `ivector::training` reads per-Gaussian quantities through the
//!   extractor's accessors and mutates it only through
//!   `update_gaussian`, `set_weight_projection_row` and
//!   `transform_ivectors`.

pub mod auxf;
pub mod extractor;
pub mod inference;

pub use self::extractor::{IvectorExtractor, WeightModel};
pub use self::inference::{ExtractedIvector, IvectorPosterior};
