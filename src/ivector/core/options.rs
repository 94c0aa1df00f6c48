//! ivector options — configuration for construction, inference, statistics
//! accumulation, re-estimation, and extraction.
//!
//! Purpose
//! -------
//! Collect every tunable of the ivector stack in plain, serde-loadable
//! structs with documented defaults, so drivers can read them from any
//! serde format and pass validated values down instead of ad-hoc flags.
//!
//! Key behaviors
//! -------------
//! - [`ExtractorOptions`]: ivector dimension, weight projection toggle,
//!   prior offset and initialization seed, plus the nested
//!   [`InferenceOptions`] carried by the model.
//! - [`StatsOptions`]: which optional statistic groups an accumulator keeps
//!   and how it samples and caches.
//! - [`EstimationOptions`]: flooring, minimum counts, manifold search and
//!   thread-pool size for the update phase.
//! - [`ExtractionOptions`]: acoustic scaling and diagnostics for extraction.
//!
//! Invariants & assumptions
//! ------------------------
//! - Every struct exposes `validate`, which delegates to the helpers in
//!   `core::validation`; consumers call it once at their entry point.
//! - `Default` values are always valid.
//!
//! Conventions
//! -----------
//! - Fields are public; `#[serde(default)]` lets partial configs fill the
//!   rest from `Default`.
//!
//! Testing notes
//! -------------
//! - Unit tests check that defaults validate, that invalid fields surface
//!   the matching error, and that partial serde input picks up defaults.
use crate::ivector::{
    core::validation::{
        validate_acoustic_weight, validate_cache_size, validate_change_threshold,
        validate_ivector_dim, validate_line_search, validate_min_count, validate_num_iters,
        validate_num_samples, validate_num_threads, validate_prior_offset,
        validate_safety_factor, validate_step_size, validate_variance_floor_factor,
    },
    errors::IvectorResult,
};
use crate::optimization::stiefel::ManifoldOptions;
use serde::{Deserialize, Serialize};

/// Options controlling posterior inference over the ivector.
///
/// Fields
/// ------
/// - `num_iters`: number of re-linearizations of the weight term (only
///   meaningful with weight projections). Default 2.
/// - `change_threshold`: stop iterating once the posterior mean moves by
///   less than this (2-norm). Default 0.1.
/// - `weight_safety_factor`: multiplier `k ≥ 1` in the clamp
///   `max(γᵢ, k·γ·wᵢ)` that keeps the weight term's quadratic PSD.
///   Default 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceOptions {
    pub num_iters: usize,
    pub change_threshold: f64,
    pub weight_safety_factor: f64,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        InferenceOptions { num_iters: 2, change_threshold: 0.1, weight_safety_factor: 1.0 }
    }
}

impl InferenceOptions {
    pub fn validate(&self) -> IvectorResult<()> {
        validate_num_iters(self.num_iters)?;
        validate_change_threshold(self.change_threshold)?;
        validate_safety_factor(self.weight_safety_factor)?;
        Ok(())
    }
}

/// ExtractorOptions — construction-time configuration of an extractor.
///
/// Fields
/// ------
/// - `ivector_dim`: latent dimension `S`. Default 400.
/// - `use_weights`: model per-utterance mixture weights through a projection
///   `w[I][S]` (`true`) or keep the UBM weights fixed (`false`). Default
///   `true`.
/// - `prior_offset`: first coordinate of the prior mean. Default 100.0.
/// - `seed`: seed for the random initialization of `M`'s columns `1..S`.
/// - `inference`: [`InferenceOptions`] stored with the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorOptions {
    pub ivector_dim: usize,
    pub use_weights: bool,
    pub prior_offset: f64,
    pub seed: u64,
    pub inference: InferenceOptions,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        ExtractorOptions {
            ivector_dim: 400,
            use_weights: true,
            prior_offset: 100.0,
            seed: 0,
            inference: InferenceOptions::default(),
        }
    }
}

impl ExtractorOptions {
    /// Options with the given dimension and weight toggle, defaults elsewhere.
    pub fn new(ivector_dim: usize, use_weights: bool) -> IvectorResult<Self> {
        let opts = ExtractorOptions { ivector_dim, use_weights, ..ExtractorOptions::default() };
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> IvectorResult<()> {
        validate_ivector_dim(self.ivector_dim)?;
        validate_prior_offset(self.prior_offset)?;
        self.inference.validate()
    }
}

/// StatsOptions — what an accumulator stores and how it samples.
///
/// Fields
/// ------
/// - `update_variances`: keep raw second-order stats `S_var`. Default `true`.
/// - `compute_auxf`: add each utterance's auxiliary function to the running
///   total. Default `true`.
/// - `num_samples_for_weights`: posterior draws per utterance for the
///   weight statistics (≥ 2). Default 10.
/// - `cache_size`: capacity of the R-scatter cache (≥ 1). Default 100.
/// - `seed`: `Some(s)` makes weight sampling reproducible per utterance;
///   `None` draws from entropy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsOptions {
    pub update_variances: bool,
    pub compute_auxf: bool,
    pub num_samples_for_weights: usize,
    pub cache_size: usize,
    pub seed: Option<u64>,
}

impl Default for StatsOptions {
    fn default() -> Self {
        StatsOptions {
            update_variances: true,
            compute_auxf: true,
            num_samples_for_weights: 10,
            cache_size: 100,
            seed: None,
        }
    }
}

impl StatsOptions {
    pub fn validate(&self) -> IvectorResult<()> {
        validate_num_samples(self.num_samples_for_weights)?;
        validate_cache_size(self.cache_size)?;
        Ok(())
    }
}

/// EstimationOptions — configuration of the update phase.
///
/// Fields
/// ------
/// - `variance_floor_factor`: fraction of the count-weighted average
///   covariance used as the variance floor, in `(0, 1]`. Default 0.1.
/// - `gaussian_min_count`: Gaussians with less occupation are left
///   unchanged. Default 100.0.
/// - `tau`, `rho_1`, `rho_2`, `max_halvings`, `max_manifold_iters`,
///   `manifold_tol`: curvilinear search settings used when
///   `do_orthogonalization` is set. Defaults 1.0, 1e-4, 0.9, 20, 100, 1e-6.
/// - `do_orthogonalization`: constrain projections to the Stiefel manifold.
///   Default `false`.
/// - `num_threads`: worker threads for per-Gaussian updates. Default 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationOptions {
    pub variance_floor_factor: f64,
    pub gaussian_min_count: f64,
    pub tau: f64,
    pub rho_1: f64,
    pub rho_2: f64,
    pub do_orthogonalization: bool,
    pub max_halvings: usize,
    pub max_manifold_iters: usize,
    pub manifold_tol: f64,
    pub num_threads: usize,
}

impl Default for EstimationOptions {
    fn default() -> Self {
        EstimationOptions {
            variance_floor_factor: 0.1,
            gaussian_min_count: 100.0,
            tau: 1.0,
            rho_1: 1e-4,
            rho_2: 0.9,
            do_orthogonalization: false,
            max_halvings: 20,
            max_manifold_iters: 100,
            manifold_tol: 1e-6,
            num_threads: 1,
        }
    }
}

impl EstimationOptions {
    pub fn validate(&self) -> IvectorResult<()> {
        validate_variance_floor_factor(self.variance_floor_factor)?;
        validate_min_count(self.gaussian_min_count)?;
        validate_step_size(self.tau)?;
        validate_line_search(self.rho_1, self.rho_2)?;
        validate_num_threads(self.num_threads)?;
        Ok(())
    }

    /// Settings handed to the curvilinear search.
    pub fn manifold_options(&self) -> ManifoldOptions {
        ManifoldOptions {
            tau: self.tau,
            rho_1: self.rho_1,
            rho_2: self.rho_2,
            max_halvings: self.max_halvings,
            max_iters: self.max_manifold_iters,
            tol: self.manifold_tol,
        }
    }
}

/// ExtractionOptions — per-utterance extraction settings.
///
/// - `acoustic_weight`: statistics are scaled by this before inference.
/// - `compute_objf_change`: also report the auxf gain of the posterior mean
///   over the prior mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionOptions {
    pub acoustic_weight: f64,
    pub compute_objf_change: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        ExtractionOptions { acoustic_weight: 1.0, compute_objf_change: false }
    }
}

impl ExtractionOptions {
    pub fn validate(&self) -> IvectorResult<()> {
        validate_acoustic_weight(self.acoustic_weight)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ivector::errors::IvectorError;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Documented defaults and their validity.
    // - Propagation of field-level validation errors.
    // - serde defaults for partial input.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Verify the documented defaults and that all of them validate.
    //
    // Given
    // -----
    // - `Default::default()` for every options struct.
    //
    // Expect
    // ------
    // - Values match the documentation; every `validate` returns Ok.
    fn defaults_match_documentation_and_validate() {
        let ext = ExtractorOptions::default();
        let stats = StatsOptions::default();
        let est = EstimationOptions::default();
        let extraction = ExtractionOptions::default();

        assert_eq!(ext.ivector_dim, 400);
        assert!(ext.use_weights);
        assert_eq!(ext.prior_offset, 100.0);
        assert_eq!(ext.inference.num_iters, 2);
        assert_eq!(stats.num_samples_for_weights, 10);
        assert_eq!(stats.cache_size, 100);
        assert_eq!(est.variance_floor_factor, 0.1);
        assert_eq!(est.gaussian_min_count, 100.0);
        assert!(!est.do_orthogonalization);
        assert_eq!(extraction.acoustic_weight, 1.0);

        assert!(ext.validate().is_ok());
        assert!(stats.validate().is_ok());
        assert!(est.validate().is_ok());
        assert!(extraction.validate().is_ok());
    }

    #[test]
    // Purpose
    // -------
    // Ensure invalid fields surface the matching error variant.
    //
    // Given
    // -----
    // - A zero ivector dimension, a single weight sample, swapped rho's.
    //
    // Expect
    // ------
    // - InvalidIvectorDim, InvalidNumSamples, InvalidLineSearch respectively.
    fn validate_propagates_field_errors() {
        assert_eq!(ExtractorOptions::new(0, false), Err(IvectorError::InvalidIvectorDim { value: 0 }));

        let stats = StatsOptions { num_samples_for_weights: 1, ..StatsOptions::default() };
        assert_eq!(stats.validate(), Err(IvectorError::InvalidNumSamples { value: 1 }));

        let est = EstimationOptions { rho_1: 0.95, ..EstimationOptions::default() };
        assert!(matches!(est.validate(), Err(IvectorError::InvalidLineSearch { .. })));
    }

    #[test]
    // Purpose
    // -------
    // Check that partial serialized input is completed from defaults.
    //
    // Given
    // -----
    // - A MessagePack map holding only `gaussian_min_count = 5.0`.
    //
    // Expect
    // ------
    // - That field is set; all others equal their defaults.
    fn partial_input_is_completed_from_defaults() {
        // Arrange
        #[derive(Serialize)]
        struct Partial {
            gaussian_min_count: f64,
        }
        let bytes = rmp_serde::to_vec_named(&Partial { gaussian_min_count: 5.0 }).unwrap();

        // Act
        let est: EstimationOptions = rmp_serde::from_slice(&bytes).unwrap();

        // Assert
        assert_eq!(est.gaussian_min_count, 5.0);
        assert_eq!(est.tau, 1.0);
        assert_eq!(est.num_threads, 1);
        assert_eq!(est.manifold_options().max_halvings, 20);
    }
}
