//! ivector inference — posterior distribution of the ivector given one
//! utterance's statistics.
//!
//! Purpose
//! -------
//! Turn [`UtteranceStats`] into the Gaussian posterior `N(mean, var)` over
//! the ivector, by summing local quadratic approximations
//! `log p(x) ≈ xᵀ·linear − ½·xᵀ·quadratic·x + const` contributed by the
//! Gaussian means, the prior and (optionally) the mixture weights.
//!
//! Key behaviors
//! -------------
//! - [`IvectorExtractor::get_stats`]: frame features + sparse posteriors →
//!   sufficient statistics, after checking them against the model.
//! - `get_ivector_dist_mean` / `_prior` / `_weight`: each *adds* its
//!   contribution to caller-owned `linear` / `quadratic` buffers.
//! - [`IvectorExtractor::get_ivector_distribution`]: one solve without
//!   weight projections; otherwise re-linearizes the weight term around the
//!   current mean up to `num_iters` times, stopping early when the mean
//!   moves less than `change_threshold`.
//! - [`IvectorExtractor::extract_ivector`]: acoustic scaling, inference and
//!   removal of the prior offset for downstream use.
//!
//! Invariants & assumptions
//! ------------------------
//! - Every solve goes through `invert_with_flooring`, so the returned
//!   covariance's inverse has all eigenvalues ≥ 1 (the prior's precision).
//! - The weight term's quadratic uses the clamp
//!   `max(γᵢ, k·γ·wᵢ)` with `k = weight_safety_factor ≥ 1`, which keeps it
//!   positive semi-definite far from the expansion point.
//! - Statistics are never mutated by inference.
//!
//! Conventions
//! -----------
//! - Shape mismatches are the only errors; they are reported before any
//!   buffer is touched.
use crate::ivector::{
    core::{
        options::ExtractionOptions,
        stats::{Posterior, UtteranceStats},
        validation::validate_dim,
    },
    errors::IvectorResult,
    models::extractor::IvectorExtractor,
};
use crate::linalg::{decomp::invert_with_flooring, packed::add_packed_to};
use crate::utils::softmax;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use tracing::trace;

/// Posterior over the ivector.
#[derive(Debug, Clone, PartialEq)]
pub struct IvectorPosterior {
    pub mean: Array1<f64>,
    /// Present when requested.
    pub var: Option<Array2<f64>>,
}

/// Result of [`IvectorExtractor::extract_ivector`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedIvector {
    /// Posterior mean with the prior offset removed from coordinate 0.
    pub ivector: Array1<f64>,
    /// `auxf(posterior mean) − auxf(prior mean)` per frame, when requested.
    pub objf_change_per_frame: Option<f64>,
    /// Total (scaled) occupation of the utterance.
    pub num_frames: f64,
}

impl IvectorExtractor {
    /// Check that `stats` matches this model's `(I, D)`.
    pub fn validate_stats(&self, stats: &UtteranceStats) -> IvectorResult<()> {
        validate_dim("num gauss (stats gamma)", self.num_gauss(), stats.gamma.len())?;
        validate_dim("num gauss (stats X)", self.num_gauss(), stats.x.nrows())?;
        validate_dim("feature dim (stats X)", self.feat_dim(), stats.x.ncols())?;
        if let Some(s) = &stats.s {
            validate_dim("num gauss (stats S)", self.num_gauss(), s.shape()[0])?;
            validate_dim("feature dim (stats S rows)", self.feat_dim(), s.shape()[1])?;
            validate_dim("feature dim (stats S cols)", self.feat_dim(), s.shape()[2])?;
        }
        Ok(())
    }

    fn validate_dist_buffers(&self, linear: &Array1<f64>, quadratic: &Array2<f64>) -> IvectorResult<()> {
        let s = self.ivector_dim();
        validate_dim("ivector dim (linear)", s, linear.len())?;
        validate_dim("ivector dim (quadratic rows)", s, quadratic.nrows())?;
        validate_dim("ivector dim (quadratic cols)", s, quadratic.ncols())?;
        Ok(())
    }

    /// get_stats — accumulate one utterance into `stats`.
    ///
    /// Parameters
    /// ----------
    /// - `feats`: `[T, D]` features.
    /// - `post`: `T` sparse posteriors over this model's Gaussians.
    /// - `stats`: statistics sized for this model; second-order stats are
    ///   accumulated only if `stats` carries them.
    ///
    /// Errors
    /// ------
    /// - `DimensionMismatch`, `PosteriorLengthMismatch`,
    ///   `GaussianIndexOutOfRange`.
    pub fn get_stats(
        &self, feats: ArrayView2<f64>, post: &Posterior, stats: &mut UtteranceStats,
    ) -> IvectorResult<()> {
        self.validate_stats(stats)?;
        stats.accumulate(feats, post)
    }

    /// Mean term: `linear += Σᵢ (Σᵢ⁻¹Mᵢ)ᵀXᵢ`, `quadratic += Σᵢ γᵢUᵢ`.
    pub fn get_ivector_dist_mean(
        &self, stats: &UtteranceStats, linear: &mut Array1<f64>, quadratic: &mut Array2<f64>,
    ) -> IvectorResult<()> {
        self.validate_stats(stats)?;
        self.validate_dist_buffers(linear, quadratic)?;
        for (i, sim) in self.sigma_inv_m.axis_iter(Axis(0)).enumerate() {
            if stats.gamma[i] != 0.0 {
                linear.scaled_add(1.0, &sim.t().dot(&stats.x.row(i)));
            }
        }
        let weighted_u = self.u.t().dot(&stats.gamma);
        add_packed_to(weighted_u.view(), 1.0, quadratic);
        Ok(())
    }

    /// Prior term: `linear[0] += prior_offset`, `quadratic += I`.
    pub fn get_ivector_dist_prior(
        &self, linear: &mut Array1<f64>, quadratic: &mut Array2<f64>,
    ) -> IvectorResult<()> {
        self.validate_dist_buffers(linear, quadratic)?;
        linear[0] += self.prior_offset;
        quadratic.diag_mut().mapv_inplace(|v| v + 1.0);
        Ok(())
    }

    /// get_ivector_dist_weight — weight term linearized around `mean`.
    ///
    /// With `logwᵢ = wᵢᵀ·mean`, `pᵢ = softmax(logw)ᵢ`, `γ = Σγᵢ` and
    /// `cᵢ = max(γᵢ, k·γ·pᵢ)`:
    ///
    /// - `linear += Σᵢ (γᵢ − γpᵢ + cᵢ·logwᵢ) wᵢ`
    /// - `quadratic += Σᵢ cᵢ wᵢwᵢᵀ`
    ///
    /// No-op when weights do not depend on the ivector.
    pub fn get_ivector_dist_weight(
        &self, stats: &UtteranceStats, mean: ArrayView1<f64>, linear: &mut Array1<f64>,
        quadratic: &mut Array2<f64>,
    ) -> IvectorResult<()> {
        self.validate_stats(stats)?;
        self.validate_dist_buffers(linear, quadratic)?;
        validate_dim("ivector dim (mean)", self.ivector_dim(), mean.len())?;
        let Some(w) = self.weight_projection() else {
            return Ok(());
        };
        let (linear_coeff, quad_coeff) = self.weight_term_coefficients(stats, mean, w);
        linear.scaled_add(1.0, &w.t().dot(&linear_coeff));
        let scaled_w = w * &quad_coeff.view().insert_axis(Axis(1));
        *quadratic += &w.t().dot(&scaled_w);
        Ok(())
    }

    /// Per-Gaussian linear and quadratic coefficients of the weight term.
    pub(crate) fn weight_term_coefficients(
        &self, stats: &UtteranceStats, mean: ArrayView1<f64>, w: &Array2<f64>,
    ) -> (Array1<f64>, Array1<f64>) {
        let logw_unnorm = w.dot(&mean);
        let p = softmax(logw_unnorm.view());
        let gamma = stats.total_count();
        let safety = self.inference.weight_safety_factor;
        let num_gauss = self.num_gauss();
        let mut linear_coeff = Array1::<f64>::zeros(num_gauss);
        let mut quad_coeff = Array1::<f64>::zeros(num_gauss);
        for i in 0..num_gauss {
            let gamma_i = stats.gamma[i];
            let max_term = gamma_i.max(safety * gamma * p[i]);
            linear_coeff[i] = gamma_i - gamma * p[i] + max_term * logw_unnorm[i];
            quad_coeff[i] = max_term;
        }
        (linear_coeff, quad_coeff)
    }

    /// get_ivector_distribution — posterior mean and (optionally) covariance.
    ///
    /// Parameters
    /// ----------
    /// - `stats`: utterance statistics, already scaled by any acoustic weight.
    /// - `need_var`: also return the covariance.
    ///
    /// Returns
    /// -------
    /// [`IvectorPosterior`] whose covariance is the floored inverse of the
    /// final quadratic term.
    ///
    /// Errors
    /// ------
    /// - `DimensionMismatch` if `stats` does not match the model.
    pub fn get_ivector_distribution(
        &self, stats: &UtteranceStats, need_var: bool,
    ) -> IvectorResult<IvectorPosterior> {
        let s = self.ivector_dim();
        let mut linear = Array1::<f64>::zeros(s);
        let mut quadratic = Array2::<f64>::zeros((s, s));
        self.get_ivector_dist_mean(stats, &mut linear, &mut quadratic)?;
        self.get_ivector_dist_prior(&mut linear, &mut quadratic)?;

        let (mut var, _) = invert_with_flooring(quadratic.view());
        let mut mean = var.dot(&linear);

        if self.ivector_dependent_weights() {
            for iter in 0..self.inference.num_iters {
                let mut this_linear = linear.clone();
                let mut this_quadratic = quadratic.clone();
                self.get_ivector_dist_weight(stats, mean.view(), &mut this_linear, &mut this_quadratic)?;
                let (new_var, num_floored) = invert_with_flooring(this_quadratic.view());
                let new_mean = new_var.dot(&this_linear);
                let change = (&new_mean - &mean).iter().map(|v| v * v).sum::<f64>().sqrt();
                trace!(iter, change, num_floored, "weight-term iteration");
                mean = new_mean;
                var = new_var;
                if change < self.inference.change_threshold {
                    break;
                }
            }
        }

        Ok(IvectorPosterior { mean, var: need_var.then_some(var) })
    }

    /// extract_ivector — the ivector as used downstream.
    ///
    /// Scales a copy of `stats` by `acoustic_weight`, computes the posterior
    /// mean and subtracts the prior offset from its first coordinate. With
    /// `compute_objf_change`, also reports the per-frame auxf gain of the
    /// posterior mean over the prior mean.
    pub fn extract_ivector(
        &self, stats: &UtteranceStats, opts: &ExtractionOptions,
    ) -> IvectorResult<ExtractedIvector> {
        opts.validate()?;
        let mut scaled = stats.clone();
        scaled.scale(opts.acoustic_weight);
        let posterior = self.get_ivector_distribution(&scaled, false)?;
        let num_frames = scaled.total_count();

        let objf_change_per_frame = if opts.compute_objf_change {
            let mut prior_mean = Array1::<f64>::zeros(self.ivector_dim());
            prior_mean[0] = self.prior_offset;
            let objf_post = self.get_auxf(&scaled, posterior.mean.view(), None)?;
            let objf_prior = self.get_auxf(&scaled, prior_mean.view(), None)?;
            Some((objf_post - objf_prior) / num_frames.max(f64::MIN_POSITIVE))
        } else {
            None
        };

        let mut ivector = posterior.mean;
        ivector[0] -= self.prior_offset;
        Ok(ExtractedIvector { ivector, objf_change_per_frame, num_frames })
    }
}
