//! ivector validation helpers — reusable checks for options, shapes, and
//! frame posteriors.
//!
//! Purpose
//! -------
//! Centralize the small validation routines used by option builders, model
//! construction, and statistics accumulation, so every entry point fails
//! fast with the same structured [`IvectorError`] variants.
//!
//! Key behaviors
//! -------------
//! - Validate scalar tunables (ivector dimension, iteration counts, cache
//!   size, sample counts, flooring factor, minimum counts, step sizes,
//!   line-search constants, thread counts, acoustic weights).
//! - Validate tensor extents against the model's `(D, I, S)`.
//! - Validate sparse frame posteriors against the number of frames and
//!   Gaussians.
//!
//! Invariants & assumptions
//! ------------------------
//! - Dimension checks are the only data-dependent failures in the crate;
//!   numeric pathologies in the data itself are handled downstream by
//!   flooring and skipping.
//!
//! Conventions
//! -----------
//! - Validators return the validated value (or `()`) inside
//!   [`IvectorResult`] and never panic.
//! - No I/O and no logging.
use crate::ivector::{
    core::stats::Posterior,
    errors::{IvectorError, IvectorResult},
};

/// Validate the ivector dimension `S ≥ 1`.
pub fn validate_ivector_dim(value: usize) -> IvectorResult<usize> {
    if value == 0 {
        return Err(IvectorError::InvalidIvectorDim { value });
    }
    Ok(value)
}

/// Validate the number of inference iterations (≥ 1).
pub fn validate_num_iters(value: usize) -> IvectorResult<usize> {
    if value == 0 {
        return Err(IvectorError::InvalidNumIters { value });
    }
    Ok(value)
}

/// Validate the early-exit threshold of the weight iteration (finite, ≥ 0).
pub fn validate_change_threshold(value: f64) -> IvectorResult<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(IvectorError::InvalidChangeThreshold { value });
    }
    Ok(value)
}

/// Validate the weight-term clamp multiplier (finite, ≥ 1).
///
/// Values below one would let the clamped quadratic coefficient fall under
/// `γ·wᵢ`, at which point the weight term's quadratic is no longer PSD.
pub fn validate_safety_factor(value: f64) -> IvectorResult<f64> {
    if !value.is_finite() || value < 1.0 {
        return Err(IvectorError::InvalidSafetyFactor { value });
    }
    Ok(value)
}

/// Validate the R-cache capacity (≥ 1).
pub fn validate_cache_size(value: usize) -> IvectorResult<usize> {
    if value == 0 {
        return Err(IvectorError::InvalidCacheSize { value });
    }
    Ok(value)
}

/// Validate the Monte-Carlo sample count for weight statistics (≥ 2).
///
/// Samples are re-centred on their empirical mean, so a single sample would
/// collapse onto the posterior mean and carry no spread.
pub fn validate_num_samples(value: usize) -> IvectorResult<usize> {
    if value < 2 {
        return Err(IvectorError::InvalidNumSamples { value });
    }
    Ok(value)
}

/// Validate the variance floor factor, which must lie in `(0, 1]`.
pub fn validate_variance_floor_factor(value: f64) -> IvectorResult<f64> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(IvectorError::InvalidVarianceFloorFactor { value });
    }
    Ok(value)
}

/// Validate the per-Gaussian minimum occupation (finite, ≥ 0).
pub fn validate_min_count(value: f64) -> IvectorResult<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(IvectorError::InvalidMinCount { value });
    }
    Ok(value)
}

/// Validate the initial manifold step size (finite, > 0).
pub fn validate_step_size(value: f64) -> IvectorResult<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(IvectorError::InvalidStepSize { value });
    }
    Ok(value)
}

/// Validate line-search constants.
///
/// Parameters
/// ----------
/// - `rho_1`: sufficient-decrease constant.
/// - `rho_2`: curvature constant.
///
/// Errors
/// ------
/// - `IvectorError::InvalidLineSearch` unless `0 < rho_1 < rho_2 < 1` and
///   both are finite.
pub fn validate_line_search(rho_1: f64, rho_2: f64) -> IvectorResult<()> {
    if !rho_1.is_finite() || !rho_2.is_finite() {
        return Err(IvectorError::InvalidLineSearch {
            rho_1,
            rho_2,
            reason: "constants must be finite.",
        });
    }
    if rho_1 <= 0.0 || rho_2 >= 1.0 {
        return Err(IvectorError::InvalidLineSearch {
            rho_1,
            rho_2,
            reason: "constants must lie strictly inside (0, 1).",
        });
    }
    if rho_1 >= rho_2 {
        return Err(IvectorError::InvalidLineSearch {
            rho_1,
            rho_2,
            reason: "rho_1 must be below rho_2.",
        });
    }
    Ok(())
}

/// Validate the worker-pool size (≥ 1).
pub fn validate_num_threads(value: usize) -> IvectorResult<usize> {
    if value == 0 {
        return Err(IvectorError::InvalidNumThreads { value });
    }
    Ok(value)
}

/// Validate the acoustic weight used to scale statistics (finite, > 0).
pub fn validate_acoustic_weight(value: f64) -> IvectorResult<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(IvectorError::InvalidAcousticWeight { value });
    }
    Ok(value)
}

/// Validate the prior offset used to initialize `M` (finite, non-zero).
pub fn validate_prior_offset(value: f64) -> IvectorResult<f64> {
    if !value.is_finite() || value == 0.0 {
        return Err(IvectorError::InvalidPriorOffset { value });
    }
    Ok(value)
}

/// Check one extent against its expected value.
pub fn validate_dim(what: &'static str, expected: usize, found: usize) -> IvectorResult<()> {
    if expected != found {
        return Err(IvectorError::DimensionMismatch { what, expected, found });
    }
    Ok(())
}

/// Check that every value of a tensor is finite.
pub fn validate_finite<'a, I>(what: &'static str, values: I) -> IvectorResult<()>
where
    I: IntoIterator<Item = &'a f64>,
{
    if values.into_iter().any(|v| !v.is_finite()) {
        return Err(IvectorError::NonFiniteParameter { what });
    }
    Ok(())
}

/// Validate sparse frame posteriors.
///
/// Parameters
/// ----------
/// - `post`: one list of `(gaussian, responsibility)` pairs per frame.
/// - `num_frames`: number of feature frames.
/// - `num_gauss`: number of Gaussians `I`.
///
/// Errors
/// ------
/// - `PosteriorLengthMismatch` if `post.len() != num_frames`.
/// - `GaussianIndexOutOfRange` for the first index `≥ num_gauss`.
pub fn validate_posteriors(post: &Posterior, num_frames: usize, num_gauss: usize) -> IvectorResult<()> {
    if post.len() != num_frames {
        return Err(IvectorError::PosteriorLengthMismatch { frames: num_frames, posteriors: post.len() });
    }
    for (frame, entries) in post.iter().enumerate() {
        if let Some(&(index, _)) = entries.iter().find(|(index, _)| *index >= num_gauss) {
            return Err(IvectorError::GaussianIndexOutOfRange { frame, index, num_gauss });
        }
    }
    Ok(())
}
