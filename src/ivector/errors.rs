//! Errors for i-vector extraction and estimation (dimension checks,
//! options validation, model construction, and persistence).
//!
//! This module defines the domain error type, [`IvectorError`], used across
//! the extractor, the statistics accumulator, and the update routines.
//!
//! ## Conventions
//! - **Indices are 0-based.** Gaussian indices run over `0..I`, feature
//!   dimensions over `0..D`, and ivector dimensions over `0..S`.
//! - A shape disagreement with the model's `(D, I, S)` is the only condition
//!   that aborts an accumulation or update call. Low counts, non-positive
//!   quadratic terms, and line-search stalls degrade gracefully and are
//!   logged instead of surfacing here.
//! - Persistence failures from `rmp_serde` and `std::io` are normalized into
//!   [`IvectorError::Serialization`] / [`IvectorError::Io`] with a
//!   human-readable message.

/// Crate-wide result alias for i-vector operations that may produce
/// [`IvectorError`].
pub type IvectorResult<T> = Result<T, IvectorError>;

/// Unified error type for i-vector modeling.
///
/// Covers shape/precondition violations, options checks, model construction
/// failures, and persistence errors. Implements `Display`/`Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum IvectorError {
    // ---- Dimension / precondition ----
    /// A tensor's extent disagrees with the model's (D, I, S).
    DimensionMismatch { what: &'static str, expected: usize, found: usize },

    /// A posterior entry references a Gaussian outside `0..num_gauss`.
    GaussianIndexOutOfRange { frame: usize, index: usize, num_gauss: usize },

    /// Number of posterior frames differs from number of feature frames.
    PosteriorLengthMismatch { frames: usize, posteriors: usize },

    /// Two accumulators disagree on which optional statistic groups exist.
    IncompatibleStats { what: &'static str },

    // ---- Options validation ----
    /// ivector_dim must be ≥ 1.
    InvalidIvectorDim { value: usize },

    /// num_iters must be ≥ 1.
    InvalidNumIters { value: usize },

    /// change_threshold must be finite and ≥ 0.
    InvalidChangeThreshold { value: f64 },

    /// weight_safety_factor must be finite and ≥ 1.
    InvalidSafetyFactor { value: f64 },

    /// cache_size must be ≥ 1.
    InvalidCacheSize { value: usize },

    /// num_samples_for_weights must be ≥ 2.
    InvalidNumSamples { value: usize },

    /// variance_floor_factor must lie in (0, 1].
    InvalidVarianceFloorFactor { value: f64 },

    /// gaussian_min_count must be finite and ≥ 0.
    InvalidMinCount { value: f64 },

    /// tau must be finite and > 0.
    InvalidStepSize { value: f64 },

    /// Line-search constants must satisfy 0 < rho_1 < rho_2 < 1.
    InvalidLineSearch { rho_1: f64, rho_2: f64, reason: &'static str },

    /// num_threads must be ≥ 1.
    InvalidNumThreads { value: usize },

    /// acoustic_weight must be finite and > 0.
    InvalidAcousticWeight { value: f64 },

    /// prior_offset must be finite and non-zero when built from a UBM.
    InvalidPriorOffset { value: f64 },

    // ---- Model construction ----
    /// Model or UBM has no Gaussians or a zero feature dimension.
    EmptyModel,

    /// A covariance / inverse covariance is not symmetric positive definite.
    NotPositiveDefinite { gaussian: usize },

    /// Mixture weights must be finite and > 0.
    InvalidMixtureWeight { index: usize, value: f64 },

    /// A parameter tensor holds a NaN/±inf.
    NonFiniteParameter { what: &'static str },

    // ---- Runtime ----
    /// Ivector-space transform is not invertible.
    SingularTransform,

    /// Worker thread pool could not be created.
    ThreadPool { text: String },

    // ---- Persistence ----
    /// Encode/decode failure from the MessagePack layer.
    Serialization { text: String },

    /// Underlying reader/writer failed.
    Io { text: String },
}

impl std::error::Error for IvectorError {}

impl std::fmt::Display for IvectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Dimension / precondition ----
            IvectorError::DimensionMismatch { what, expected, found } => {
                write!(f, "Dimension mismatch for {what}: expected {expected}, got {found}.")
            }
            IvectorError::GaussianIndexOutOfRange { frame, index, num_gauss } => {
                write!(
                    f,
                    "Posterior at frame {frame} references Gaussian {index}, but the model has {num_gauss} Gaussians (mismatched posteriors?)."
                )
            }
            IvectorError::PosteriorLengthMismatch { frames, posteriors } => {
                write!(f, "Got {frames} feature frames but {posteriors} posterior frames.")
            }
            IvectorError::IncompatibleStats { what } => {
                write!(f, "Accumulators are incompatible: {what}.")
            }
            // ---- Options validation ----
            IvectorError::InvalidIvectorDim { value } => {
                write!(f, "ivector_dim must be >= 1; got: {value}")
            }
            IvectorError::InvalidNumIters { value } => {
                write!(f, "num_iters must be >= 1; got: {value}")
            }
            IvectorError::InvalidChangeThreshold { value } => {
                write!(f, "change_threshold must be finite and >= 0; got: {value}")
            }
            IvectorError::InvalidSafetyFactor { value } => {
                write!(f, "weight_safety_factor must be finite and >= 1; got: {value}")
            }
            IvectorError::InvalidCacheSize { value } => {
                write!(f, "cache_size must be >= 1; got: {value}")
            }
            IvectorError::InvalidNumSamples { value } => {
                write!(f, "num_samples_for_weights must be >= 2; got: {value}")
            }
            IvectorError::InvalidVarianceFloorFactor { value } => {
                write!(f, "variance_floor_factor must lie in (0, 1]; got: {value}")
            }
            IvectorError::InvalidMinCount { value } => {
                write!(f, "gaussian_min_count must be finite and >= 0; got: {value}")
            }
            IvectorError::InvalidStepSize { value } => {
                write!(f, "tau must be finite and > 0; got: {value}")
            }
            IvectorError::InvalidLineSearch { rho_1, rho_2, reason } => {
                write!(f, "Line-search constants rho_1 = {rho_1}, rho_2 = {rho_2} are invalid; {reason}")
            }
            IvectorError::InvalidNumThreads { value } => {
                write!(f, "num_threads must be >= 1; got: {value}")
            }
            IvectorError::InvalidAcousticWeight { value } => {
                write!(f, "acoustic_weight must be finite and > 0; got: {value}")
            }
            IvectorError::InvalidPriorOffset { value } => {
                write!(f, "prior_offset must be finite and non-zero; got: {value}")
            }
            // ---- Model construction ----
            IvectorError::EmptyModel => {
                write!(f, "Model has no Gaussians or a zero feature dimension.")
            }
            IvectorError::NotPositiveDefinite { gaussian } => {
                write!(f, "Covariance of Gaussian {gaussian} is not positive definite.")
            }
            IvectorError::InvalidMixtureWeight { index, value } => {
                write!(f, "Mixture weight {index} must be finite and > 0; got: {value}")
            }
            IvectorError::NonFiniteParameter { what } => {
                write!(f, "Parameter {what} contains non-finite values.")
            }
            // ---- Runtime ----
            IvectorError::SingularTransform => {
                write!(f, "Ivector-space transform is singular.")
            }
            IvectorError::ThreadPool { text } => {
                write!(f, "Failed to build worker thread pool: {text}")
            }
            // ---- Persistence ----
            IvectorError::Serialization { text } => {
                write!(f, "Serialization failed: {text}")
            }
            IvectorError::Io { text } => {
                write!(f, "I/O failed: {text}")
            }
        }
    }
}

impl From<rmp_serde::encode::Error> for IvectorError {
    fn from(err: rmp_serde::encode::Error) -> IvectorError {
        IvectorError::Serialization { text: err.to_string() }
    }
}

impl From<rmp_serde::decode::Error> for IvectorError {
    fn from(err: rmp_serde::decode::Error) -> IvectorError {
        IvectorError::Serialization { text: err.to_string() }
    }
}

impl From<std::io::Error> for IvectorError {
    fn from(err: std::io::Error) -> IvectorError {
        IvectorError::Io { text: err.to_string() }
    }
}

impl From<rayon::ThreadPoolBuildError> for IvectorError {
    fn from(err: rayon::ThreadPoolBuildError) -> IvectorError {
        IvectorError::ThreadPool { text: err.to_string() }
    }
}
