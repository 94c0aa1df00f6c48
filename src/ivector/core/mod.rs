//! core — options, validation, sufficient statistics, and the UBM.
//!
//! Purpose
//! -------
//! Collect the data carriers and configuration shared by the extractor
//! model and the training layer: option structs, validators, per-utterance
//! sufficient statistics, and the full-covariance mixture the extractor is
//! built from.
//!
//! Key behaviors
//! -------------
//! - [`options`]: serde-loadable option structs with documented defaults.
//! - [`validation`]: typed checks for options, tensor extents and frame
//!   posteriors.
//! - [`stats`]: [`UtteranceStats`] and the sparse [`Posterior`] frame type.
//! - [`ubm`]: [`FullGmm`] with exact frame posteriors.
//!
//! Conventions
//! -----------
//! - Shapes are written `[I, D, S]` for Gaussians, feature dimension and
//!   ivector dimension. Indices are 0-based.
//! - No logging in this layer.

pub mod options;
pub mod stats;
pub mod ubm;
pub mod validation;

pub use self::options::{
    EstimationOptions, ExtractionOptions, ExtractorOptions, InferenceOptions, StatsOptions,
};
pub use self::stats::{Posterior, UtteranceStats};
pub use self::ubm::FullGmm;
