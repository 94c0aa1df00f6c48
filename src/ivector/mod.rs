//! ivector — subspace-adapted full-covariance GMM: inference and training.
//!
//! Purpose
//! -------
//! Provide the complete ivector layer: configuration and per-utterance
//! statistics ([`core`]), the trained extractor with posterior inference and
//! auxiliary functions ([`models`]), cross-utterance accumulation and EM
//! re-estimation ([`training`]), and the shared error type ([`errors`]).
//!
//! Key behaviors
//! -------------
//! - Per utterance: frames + sparse posteriors → [`UtteranceStats`] →
//!   [`IvectorExtractor::get_ivector_distribution`] → `N(mean, var)` over
//!   the ivector.
//! - Per training iteration: [`IvectorStats`] collects five statistic
//!   groups from many threads, then [`IvectorStats::update`] re-estimates
//!   projections, weights, variances and the prior.
//!
//! Invariants & assumptions
//! ------------------------
//! - The prior over ivectors is `N((prior_offset, 0, …, 0), I)`; the prior
//!   update re-whitens ivector space to keep it so.
//! - Shape mismatches against `(I, D, S)` are the only errors raised by
//!   accumulation and update; low counts, non-SPD quadratic terms and
//!   manifold stalls are handled by skipping or flooring and are logged
//!   through `tracing`.
//! - The crate never installs a `tracing` subscriber.
//!
//! Conventions
//! -----------
//! - `I` Gaussians, feature dimension `D`, ivector dimension `S`; 0-based
//!   indices. Symmetric `S×S` per-Gaussian quantities are row-packed
//!   (`S(S+1)/2`, see `linalg::packed`).
//!
//! Downstream usage
//! ----------------
//! - Build a [`FullGmm`], create an [`IvectorExtractor`] from it, iterate
//!   accumulation and update, then call
//!   [`IvectorExtractor::extract_ivector`] per utterance.
//!
//! Testing notes
//! -------------
//! - Unit tests live next to each submodule; `tests/` runs the full
//!   pipeline with concurrent accumulation and persistence.

pub mod core;
pub mod errors;
pub mod models;
pub mod training;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::core::{
    EstimationOptions, ExtractionOptions, ExtractorOptions, FullGmm, InferenceOptions, Posterior,
    StatsOptions, UtteranceStats,
};

pub use self::errors::{IvectorError, IvectorResult};

pub use self::models::{ExtractedIvector, IvectorExtractor, IvectorPosterior, WeightModel};

pub use self::training::{IvectorStats, PriorDiagnostics, StatsSnapshot, UpdateSummary};

// ---- Optional convenience prelude for downstream crates -------------------
//
// Downstream crates can write
//
//     use rust_ivector::ivector::prelude::*;
//
// to import the main ivector surface in a single line.

pub mod prelude {
    pub use super::{
        EstimationOptions, ExtractedIvector, ExtractionOptions, ExtractorOptions, FullGmm,
        InferenceOptions, IvectorError, IvectorExtractor, IvectorPosterior, IvectorResult,
        IvectorStats, Posterior, PriorDiagnostics, StatsOptions, StatsSnapshot, UpdateSummary,
        UtteranceStats, WeightModel,
    };
}
