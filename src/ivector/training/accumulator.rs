//! ivector accumulator — cross-utterance statistics for re-estimating an
//! [`IvectorExtractor`].
//!
//! Purpose
//! -------
//! Collect, over many utterances, everything the update phase needs: the
//! linear and quadratic terms for the projections, the Monte-Carlo terms for
//! the weight projections, raw second-order statistics for the variances and
//! the moments of the ivector posteriors for the prior.
//!
//! Key behaviors
//! -------------
//! - [`IvectorStats::commit_stats_for_utterance`] infers the ivector
//!   posterior `N(μ, Var)` of one utterance outside any lock and then adds
//!   into five independently locked groups:
//!   1. `γᵢ`, `Yᵢ += Xᵢμᵀ`;
//!   2. `Rᵢ += γᵢ·packed(Var + μμᵀ)` through the [`ScatterCache`];
//!   3. `Gᵢ`, `Qᵢ` from re-centred posterior samples (weight projections only);
//!   4. `S_var += S` (only with `update_variances`);
//!   5. `count += 1`, `sum += μ`, `scatter += Var + μμᵀ`.
//!
//!   With `compute_auxf`, the utterance's auxiliary function is also added
//!   to a running total.
//! - [`IvectorStats::add`], [`IvectorStats::write`], [`IvectorStats::read`],
//!   [`IvectorStats::read_into`] and [`IvectorStats::snapshot`] merge,
//!   persist and inspect the groups.
//!
//! Invariants & assumptions
//! ------------------------
//! - Every read of `R` goes through the flushing guard, so pending cache
//!   rows are always folded in first.
//! - Lock order is linear → cache → `R` → weight → variance → prior →
//!   auxf; no method holds two locks in any other order. Commits take one
//!   group at a time (cache and `R` together).
//! - The model is read-only while statistics are being committed.
//!
//! Conventions
//! -----------
//! - All methods take `&self`; one accumulator is shared by reference
//!   across worker threads.
//! - With `StatsOptions::seed = Some(s)`, each utterance samples from a
//!   stream derived from `s` and its own statistics, so `Q` and `G` are
//!   additive across commit orders and shards.
//!
//! Downstream usage
//! ----------------
//! - `training::update` consumes the groups through the crate-visible
//!   fields and the flushing guard.
//!
//! Testing notes
//! -------------
//! - Unit tests cover additivity (order, `add`, self-add), cache
//!   transparency, persistence round-trips and seeded reproducibility.
use crate::ivector::{
    core::{
        options::StatsOptions,
        stats::{Posterior, UtteranceStats},
        ubm::FullGmm,
        validation::validate_dim,
    },
    errors::{IvectorError, IvectorResult},
    models::{extractor::IvectorExtractor, inference::IvectorPosterior},
    training::cache::ScatterCache,
};
use crate::linalg::{
    decomp::{cholesky_lower, recompose, sym_eigen},
    packed::{pack_symmetric, packed_len, packed_outer},
};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use parking_lot::{Mutex, MutexGuard};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use tracing::{debug, trace};

/// Group 1: occupations and the linear projection term.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LinearStats {
    /// `[I]`
    pub gamma: Array1<f64>,
    /// `[I, D, S]`
    pub y: Array3<f64>,
}

/// Group 3: weight-projection terms.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WeightStats {
    /// `[I, S(S+1)/2]`
    pub q: Array2<f64>,
    /// `[I, S]`
    pub g: Array2<f64>,
}

/// Group 5: moments of the ivector posteriors.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PriorStats {
    pub count: f64,
    pub sum: Array1<f64>,
    pub scatter: Array2<f64>,
}

/// Flushed copy of every statistic group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub gamma: Array1<f64>,
    pub y: Array3<f64>,
    pub r: Array2<f64>,
    pub q: Option<Array2<f64>>,
    pub g: Option<Array2<f64>>,
    pub s_var: Option<Array3<f64>>,
    pub ivector_count: f64,
    pub ivector_sum: Array1<f64>,
    pub ivector_scatter: Array2<f64>,
    pub tot_auxf: f64,
}

#[derive(Serialize, Deserialize)]
struct StatsRecord {
    options: StatsOptions,
    stats: StatsSnapshot,
}

/// Shared accumulator of ivector training statistics.
#[derive(Debug)]
pub struct IvectorStats {
    pub(super) opts: StatsOptions,
    pub(super) num_gauss: usize,
    pub(super) feat_dim: usize,
    pub(super) ivector_dim: usize,
    pub(super) linear: Mutex<LinearStats>,
    r: Mutex<Array2<f64>>,
    r_cache: Mutex<ScatterCache>,
    pub(super) weight: Option<Mutex<WeightStats>>,
    pub(super) variance: Option<Mutex<Array3<f64>>>,
    pub(super) prior: Mutex<PriorStats>,
    tot_auxf: Mutex<f64>,
}

impl IvectorStats {
    /// IvectorStats::new — empty statistics shaped for `model`.
    ///
    /// Parameters
    /// ----------
    /// - `model`: extractor whose `(I, D, S)` and weight model fix the
    ///   layout. Weight statistics exist iff the model has weight
    ///   projections.
    /// - `opts`: which optional groups to keep, sampling and cache size.
    ///
    /// Errors
    /// ------
    /// - Option validation errors.
    pub fn new(model: &IvectorExtractor, opts: StatsOptions) -> IvectorResult<Self> {
        opts.validate()?;
        Ok(Self::with_dims(
            opts,
            model.num_gauss(),
            model.feat_dim(),
            model.ivector_dim(),
            model.ivector_dependent_weights(),
        ))
    }

    fn with_dims(
        opts: StatsOptions, num_gauss: usize, feat_dim: usize, ivector_dim: usize, use_weights: bool,
    ) -> Self {
        let packed = packed_len(ivector_dim);
        IvectorStats {
            opts,
            num_gauss,
            feat_dim,
            ivector_dim,
            linear: Mutex::new(LinearStats {
                gamma: Array1::zeros(num_gauss),
                y: Array3::zeros((num_gauss, feat_dim, ivector_dim)),
            }),
            r: Mutex::new(Array2::zeros((num_gauss, packed))),
            r_cache: Mutex::new(ScatterCache::new(opts.cache_size, num_gauss, packed)),
            weight: use_weights.then(|| {
                Mutex::new(WeightStats {
                    q: Array2::zeros((num_gauss, packed)),
                    g: Array2::zeros((num_gauss, ivector_dim)),
                })
            }),
            variance: opts
                .update_variances
                .then(|| Mutex::new(Array3::zeros((num_gauss, feat_dim, feat_dim)))),
            prior: Mutex::new(PriorStats {
                count: 0.0,
                sum: Array1::zeros(ivector_dim),
                scatter: Array2::zeros((ivector_dim, ivector_dim)),
            }),
            tot_auxf: Mutex::new(0.0),
        }
    }

    pub fn options(&self) -> &StatsOptions {
        &self.opts
    }

    /// Check that `model` has this accumulator's layout.
    pub(crate) fn check_model(&self, model: &IvectorExtractor) -> IvectorResult<()> {
        validate_dim("num gauss (model)", self.num_gauss, model.num_gauss())?;
        validate_dim("feature dim (model)", self.feat_dim, model.feat_dim())?;
        validate_dim("ivector dim (model)", self.ivector_dim, model.ivector_dim())?;
        if self.weight.is_some() != model.ivector_dependent_weights() {
            return Err(IvectorError::IncompatibleStats { what: "weight projection" });
        }
        Ok(())
    }

    // ---- Commitment ----

    /// acc_stats_for_utterance — statistics from frames and posteriors,
    /// then [`IvectorStats::commit_stats_for_utterance`].
    ///
    /// Errors
    /// ------
    /// - `DimensionMismatch`, `PosteriorLengthMismatch`,
    ///   `GaussianIndexOutOfRange` for inconsistent inputs.
    pub fn acc_stats_for_utterance(
        &self, model: &IvectorExtractor, feats: ArrayView2<f64>, post: &Posterior,
    ) -> IvectorResult<()> {
        let mut stats = UtteranceStats::new(self.num_gauss, self.feat_dim, self.variance.is_some());
        model.get_stats(feats, post, &mut stats)?;
        self.commit_stats_for_utterance(model, &stats)
    }

    /// Accumulate with exact frame posteriors from `gmm`; returns the total
    /// log-likelihood of the frames under `gmm`.
    ///
    /// Intended for tests and small experiments; production posteriors come
    /// from a pruned, external source.
    pub fn acc_stats_for_utterance_with_gmm(
        &self, model: &IvectorExtractor, gmm: &FullGmm, feats: ArrayView2<f64>,
    ) -> IvectorResult<f64> {
        validate_dim("num gauss (gmm)", self.num_gauss, gmm.num_gauss())?;
        let (post, loglike) = gmm.utterance_posteriors(feats)?;
        self.acc_stats_for_utterance(model, feats, &post)?;
        Ok(loglike)
    }

    /// commit_stats_for_utterance — add one utterance to every group.
    ///
    /// Parameters
    /// ----------
    /// - `model`: the current extractor (read-only).
    /// - `stats`: utterance statistics, already scaled by any acoustic
    ///   weight. Must carry second-order statistics when variances are
    ///   being accumulated.
    ///
    /// Errors
    /// ------
    /// - `DimensionMismatch` if `model` or `stats` do not match.
    /// - `IncompatibleStats` if second-order statistics are required but
    ///   absent, or the weight model disagrees.
    ///
    /// Notes
    /// -----
    /// - Inference, sampling and the auxf are computed before any lock is
    ///   taken; each group's lock covers only its additive update.
    pub fn commit_stats_for_utterance(
        &self, model: &IvectorExtractor, stats: &UtteranceStats,
    ) -> IvectorResult<()> {
        self.check_model(model)?;
        model.validate_stats(stats)?;
        if self.variance.is_some() && !stats.has_second_order() {
            return Err(IvectorError::IncompatibleStats { what: "second-order stats" });
        }

        let IvectorPosterior { mean, var } = model.get_ivector_distribution(stats, true)?;
        let var = var.unwrap_or_else(|| Array2::zeros((self.ivector_dim, self.ivector_dim)));
        let auxf = if self.opts.compute_auxf {
            Some(model.get_auxf(stats, mean.view(), Some(var.view()))?)
        } else {
            None
        };
        let weight_terms = match (&self.weight, model.weight_projection()) {
            (Some(_), Some(w)) => Some(self.weight_terms(model, stats, &mean, &var, w)),
            _ => None,
        };
        let mut second_moment = var.clone();
        second_moment += &outer(mean.view(), mean.view());

        self.commit_linear(stats, &mean);
        self.commit_scatter(stats, &second_moment);
        if let (Some(group), Some((q, g))) = (&self.weight, weight_terms) {
            let mut weight = group.lock();
            weight.q += &q;
            weight.g += &g;
        }
        if let (Some(group), Some(s)) = (&self.variance, &stats.s) {
            *group.lock() += s;
        }
        {
            let mut prior = self.prior.lock();
            prior.count += 1.0;
            prior.sum += &mean;
            prior.scatter += &second_moment;
        }
        if let Some(auxf) = auxf {
            *self.tot_auxf.lock() += auxf;
        }
        Ok(())
    }

    fn commit_linear(&self, stats: &UtteranceStats, mean: &Array1<f64>) {
        let mut linear = self.linear.lock();
        linear.gamma += &stats.gamma;
        for (i, x_i) in stats.x.axis_iter(Axis(0)).enumerate() {
            if stats.gamma[i] != 0.0 {
                let mut y_i = linear.y.index_axis_mut(Axis(0), i);
                y_i += &outer(x_i, mean.view());
            }
        }
    }

    fn commit_scatter(&self, stats: &UtteranceStats, second_moment: &Array2<f64>) {
        let packed = pack_symmetric(second_moment.view());
        let mut cache = self.r_cache.lock();
        if cache.push(stats.gamma.view(), packed.view()) {
            if let Some(batch) = cache.drain() {
                let mut r = self.r.lock();
                batch.fold_into(&mut r);
                trace!(rows = batch.len(), "folded full scatter cache");
            }
        }
    }

    /// Monte-Carlo `(Q, G)` contribution of one utterance.
    ///
    /// Samples `x ~ N(mean, var)` are re-centred so their average is exactly
    /// `mean`, each linearizes the weight term, and the per-Gaussian
    /// coefficients are averaged.
    fn weight_terms(
        &self, model: &IvectorExtractor, stats: &UtteranceStats, mean: &Array1<f64>,
        var: &Array2<f64>, w: &Array2<f64>,
    ) -> (Array2<f64>, Array2<f64>) {
        let (num_gauss, s) = (self.num_gauss, self.ivector_dim);
        let n = self.opts.num_samples_for_weights;
        let mut rng = self.utterance_rng(stats);
        let factor = covariance_factor(var.view());
        let noise = Array2::from_shape_fn((n, s), |_| rng.sample::<f64, _>(StandardNormal));
        let mut samples = noise.dot(&factor.t());
        let avg = samples.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(s));
        samples -= &avg;
        samples *= (n as f64 / (n as f64 - 1.0)).sqrt();
        samples += mean;

        let weight = 1.0 / n as f64;
        let mut q = Array2::<f64>::zeros((num_gauss, packed_len(s)));
        let mut g = Array2::<f64>::zeros((num_gauss, s));
        for sample in samples.axis_iter(Axis(0)) {
            let (linear_coeff, quad_coeff) = model.weight_term_coefficients(stats, sample, w);
            let sample_outer = packed_outer(sample);
            for i in 0..num_gauss {
                g.row_mut(i).scaled_add(weight * linear_coeff[i], &sample);
                q.row_mut(i).scaled_add(weight * quad_coeff[i], &sample_outer);
            }
        }
        (q, g)
    }

    /// Sampling stream for one utterance: keyed by the seed and the bits of
    /// `gamma` and `X`, so it does not depend on commit order or thread.
    fn utterance_rng(&self, stats: &UtteranceStats) -> StdRng {
        let Some(seed) = self.opts.seed else {
            return StdRng::from_entropy();
        };
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(seed);
        for v in stats.gamma.iter().chain(stats.x.iter()) {
            hasher.write_u64(v.to_bits());
        }
        StdRng::seed_from_u64(hasher.finish())
    }

    // ---- Reads ----

    /// Fold any pending cache rows into `R`.
    pub fn flush_cache(&self) {
        drop(self.flushed_r());
    }

    /// Lock `R` after folding pending cache rows into it.
    pub(super) fn flushed_r(&self) -> MutexGuard<'_, Array2<f64>> {
        let mut cache = self.r_cache.lock();
        let mut r = self.r.lock();
        if let Some(batch) = cache.drain() {
            batch.fold_into(&mut r);
            debug!(rows = batch.len(), "flushed scatter cache");
        }
        r
    }

    /// Flushed copy of every group.
    pub fn snapshot(&self) -> StatsSnapshot {
        let (gamma, y) = {
            let linear = self.linear.lock();
            (linear.gamma.clone(), linear.y.clone())
        };
        let r = self.flushed_r().clone();
        let (q, g) = match &self.weight {
            Some(group) => {
                let weight = group.lock();
                (Some(weight.q.clone()), Some(weight.g.clone()))
            }
            None => (None, None),
        };
        let s_var = self.variance.as_ref().map(|group| group.lock().clone());
        let prior = self.prior.lock().clone();
        StatsSnapshot {
            gamma,
            y,
            r,
            q,
            g,
            s_var,
            ivector_count: prior.count,
            ivector_sum: prior.sum,
            ivector_scatter: prior.scatter,
            tot_auxf: *self.tot_auxf.lock(),
        }
    }

    /// Sum of all occupations.
    pub fn total_count(&self) -> f64 {
        self.linear.lock().gamma.sum()
    }

    /// Number of committed utterances.
    pub fn num_ivectors(&self) -> f64 {
        self.prior.lock().count
    }

    /// Accumulated auxiliary function per frame (0 before any data).
    pub fn auxf_per_frame(&self) -> f64 {
        let count = self.total_count();
        if count > 0.0 { *self.tot_auxf.lock() / count } else { 0.0 }
    }

    // ---- Merging and persistence ----

    /// add — merge `other` into `self` group by group.
    ///
    /// `other` is flushed and copied first, so `acc.add(&acc)` doubles the
    /// statistics instead of deadlocking.
    ///
    /// Errors
    /// ------
    /// - `DimensionMismatch` / `IncompatibleStats` if the layouts differ.
    pub fn add(&self, other: &IvectorStats) -> IvectorResult<()> {
        let snapshot = other.snapshot();
        self.absorb(&snapshot, true)
    }

    /// Independent copy of the flushed statistics.
    pub fn try_clone(&self) -> IvectorResult<Self> {
        let copy = Self::with_dims(
            self.opts,
            self.num_gauss,
            self.feat_dim,
            self.ivector_dim,
            self.weight.is_some(),
        );
        copy.absorb(&self.snapshot(), false)?;
        Ok(copy)
    }

    fn absorb(&self, snapshot: &StatsSnapshot, add: bool) -> IvectorResult<()> {
        self.check_snapshot(snapshot)?;
        {
            let mut linear = self.linear.lock();
            accumulate_or_assign(&mut linear.gamma, &snapshot.gamma, add);
            accumulate_or_assign(&mut linear.y, &snapshot.y, add);
        }
        accumulate_or_assign(&mut *self.flushed_r(), &snapshot.r, add);
        if let (Some(group), Some(q), Some(g)) = (&self.weight, &snapshot.q, &snapshot.g) {
            let mut weight = group.lock();
            accumulate_or_assign(&mut weight.q, q, add);
            accumulate_or_assign(&mut weight.g, g, add);
        }
        if let (Some(group), Some(s_var)) = (&self.variance, &snapshot.s_var) {
            accumulate_or_assign(&mut *group.lock(), s_var, add);
        }
        {
            let mut prior = self.prior.lock();
            prior.count = if add { prior.count + snapshot.ivector_count } else { snapshot.ivector_count };
            accumulate_or_assign(&mut prior.sum, &snapshot.ivector_sum, add);
            accumulate_or_assign(&mut prior.scatter, &snapshot.ivector_scatter, add);
        }
        let mut tot_auxf = self.tot_auxf.lock();
        *tot_auxf = if add { *tot_auxf + snapshot.tot_auxf } else { snapshot.tot_auxf };
        Ok(())
    }

    fn check_snapshot(&self, snapshot: &StatsSnapshot) -> IvectorResult<()> {
        let (num_gauss, feat_dim, ivector_dim) = (self.num_gauss, self.feat_dim, self.ivector_dim);
        let packed = packed_len(ivector_dim);
        validate_dim("num gauss (gamma)", num_gauss, snapshot.gamma.len())?;
        let (yi, yd, ys) = snapshot.y.dim();
        validate_dim("num gauss (Y)", num_gauss, yi)?;
        validate_dim("feature dim (Y)", feat_dim, yd)?;
        validate_dim("ivector dim (Y)", ivector_dim, ys)?;
        validate_dim("num gauss (R)", num_gauss, snapshot.r.nrows())?;
        validate_dim("packed ivector dim (R)", packed, snapshot.r.ncols())?;
        match (&self.weight, &snapshot.q, &snapshot.g) {
            (Some(_), Some(q), Some(g)) => {
                validate_dim("num gauss (Q)", num_gauss, q.nrows())?;
                validate_dim("packed ivector dim (Q)", packed, q.ncols())?;
                validate_dim("num gauss (G)", num_gauss, g.nrows())?;
                validate_dim("ivector dim (G)", ivector_dim, g.ncols())?;
            }
            (None, None, None) => {}
            _ => return Err(IvectorError::IncompatibleStats { what: "weight statistics" }),
        }
        match (&self.variance, &snapshot.s_var) {
            (Some(_), Some(s_var)) => {
                let (si, sr, sc) = s_var.dim();
                validate_dim("num gauss (S_var)", num_gauss, si)?;
                validate_dim("feature dim (S_var rows)", feat_dim, sr)?;
                validate_dim("feature dim (S_var cols)", feat_dim, sc)?;
            }
            (None, None) => {}
            _ => return Err(IvectorError::IncompatibleStats { what: "variance statistics" }),
        }
        validate_dim("ivector dim (prior sum)", ivector_dim, snapshot.ivector_sum.len())?;
        validate_dim("ivector dim (prior scatter rows)", ivector_dim, snapshot.ivector_scatter.nrows())?;
        validate_dim("ivector dim (prior scatter cols)", ivector_dim, snapshot.ivector_scatter.ncols())?;
        Ok(())
    }

    /// Flush and write options plus every group in MessagePack.
    pub fn write<W: Write>(&self, writer: &mut W) -> IvectorResult<()> {
        let record = StatsRecord { options: self.opts, stats: self.snapshot() };
        rmp_serde::encode::write(writer, &record)?;
        Ok(())
    }

    /// Read statistics written by [`IvectorStats::write`].
    pub fn read<R: Read>(reader: &mut R) -> IvectorResult<Self> {
        let record: StatsRecord = rmp_serde::decode::from_read(reader)?;
        record.options.validate()?;
        let snapshot = &record.stats;
        let (num_gauss, feat_dim, ivector_dim) = snapshot.y.dim();
        let stats = Self::with_dims(
            record.options,
            num_gauss,
            feat_dim,
            ivector_dim,
            snapshot.q.is_some(),
        );
        stats.absorb(snapshot, false)?;
        Ok(stats)
    }

    /// Read statistics into `self`, adding to (`add = true`) or replacing
    /// the current values. Options of `self` are kept.
    pub fn read_into<R: Read>(&self, reader: &mut R, add: bool) -> IvectorResult<()> {
        let record: StatsRecord = rmp_serde::decode::from_read(reader)?;
        self.absorb(&record.stats, add)
    }
}

fn accumulate_or_assign<D: ndarray::Dimension>(
    dst: &mut ndarray::Array<f64, D>, src: &ndarray::Array<f64, D>, add: bool,
) {
    if add {
        *dst += src;
    } else {
        dst.assign(src);
    }
}

/// `a bᵀ`.
pub(super) fn outer(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array2<f64> {
    a.insert_axis(Axis(1)).dot(&b.insert_axis(Axis(0)))
}

/// `L` with `L Lᵀ = var`: Cholesky, or the eigen square root for a
/// semi-definite `var`.
fn covariance_factor(var: ArrayView2<f64>) -> Array2<f64> {
    cholesky_lower(var).unwrap_or_else(|| {
        let (s, p) = sym_eigen(var);
        recompose(&s.mapv(|lambda| lambda.max(0.0).sqrt()), &p)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ivector::training::testing::{fixture_gmm, fixture_model, utterance};
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Additivity under commit order, `add`, and self-add.
    // - Cache transparency: cache size never changes the flushed `R`.
    // - Persistence round-trip (bit-exact) and additive reads.
    // - Seeded weight sampling and the second-order-stats requirement.
    //
    // They intentionally DO NOT cover:
    // - Re-estimation (see `update.rs`).
    // -------------------------------------------------------------------------

    fn assert_snapshots_close(a: &StatsSnapshot, b: &StatsSnapshot) {
        assert_relative_eq!(a.gamma, b.gamma, epsilon = 1e-9, max_relative = 1e-9);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-9, max_relative = 1e-9);
        assert_relative_eq!(a.r, b.r, epsilon = 1e-9, max_relative = 1e-9);
        assert_eq!(a.q.is_some(), b.q.is_some());
        if let (Some(qa), Some(qb)) = (&a.q, &b.q) {
            assert_relative_eq!(qa, qb, epsilon = 1e-9, max_relative = 1e-9);
        }
        if let (Some(ga), Some(gb)) = (&a.g, &b.g) {
            assert_relative_eq!(ga, gb, epsilon = 1e-9, max_relative = 1e-9);
        }
        if let (Some(sa), Some(sb)) = (&a.s_var, &b.s_var) {
            assert_relative_eq!(sa, sb, epsilon = 1e-9, max_relative = 1e-9);
        }
        assert_abs_diff_eq!(a.ivector_count, b.ivector_count);
        assert_relative_eq!(a.ivector_sum, b.ivector_sum, epsilon = 1e-9, max_relative = 1e-9);
        assert_relative_eq!(a.ivector_scatter, b.ivector_scatter, epsilon = 1e-9, max_relative = 1e-9);
        assert_abs_diff_eq!(a.tot_auxf, b.tot_auxf, epsilon = 1e-8);
    }

    #[test]
    // Purpose
    // -------
    // Verify that the accumulated statistics do not depend on commit order
    // or on whether utterances were split across accumulators.
    //
    // Given
    // -----
    // - A weight-projection model with seeded sampling and three
    //   utterances A, B, C.
    //
    // Expect
    // ------
    // - A,B,C == C,B,A == (A) + (B,C) merged with `add`, for every group
    //   including the sampled weight statistics Q and G.
    fn commits_are_additive_across_order_and_merge() {
        // Arrange
        let gmm = fixture_gmm();
        let model = fixture_model(&gmm, true);
        let utts: Vec<UtteranceStats> = (0..3).map(|k| utterance(&model, &gmm, k, true)).collect();
        let opts = StatsOptions { cache_size: 2, seed: Some(21), ..StatsOptions::default() };
        let forward = IvectorStats::new(&model, opts).unwrap();
        let backward = IvectorStats::new(&model, opts).unwrap();
        let left = IvectorStats::new(&model, opts).unwrap();
        let right = IvectorStats::new(&model, opts).unwrap();

        // Act
        for stats in &utts {
            forward.commit_stats_for_utterance(&model, stats).unwrap();
        }
        for stats in utts.iter().rev() {
            backward.commit_stats_for_utterance(&model, stats).unwrap();
        }
        left.commit_stats_for_utterance(&model, &utts[0]).unwrap();
        right.commit_stats_for_utterance(&model, &utts[1]).unwrap();
        right.commit_stats_for_utterance(&model, &utts[2]).unwrap();
        left.add(&right).unwrap();

        // Assert
        let expected = forward.snapshot();
        assert!(expected.q.as_ref().is_some_and(|q| q.iter().any(|&v| v != 0.0)));
        assert_snapshots_close(&expected, &backward.snapshot());
        assert_snapshots_close(&expected, &left.snapshot());
        assert_abs_diff_eq!(forward.num_ivectors(), 3.0);
        assert!(expected.tot_auxf < 0.0);
    }

    #[test]
    // Purpose
    // -------
    // Verify that adding an accumulator to itself doubles it.
    //
    // Given
    // -----
    // - One committed utterance, pending in the cache.
    //
    // Expect
    // ------
    // - Every group doubles; the call returns instead of deadlocking.
    fn self_add_doubles_statistics() {
        // Arrange
        let gmm = fixture_gmm();
        let model = fixture_model(&gmm, false);
        let acc = IvectorStats::new(&model, StatsOptions::default()).unwrap();
        acc.commit_stats_for_utterance(&model, &utterance(&model, &gmm, 7, true)).unwrap();
        let before = acc.snapshot();

        // Act
        acc.add(&acc).unwrap();

        // Assert
        let after = acc.snapshot();
        assert_relative_eq!(after.r, &before.r * 2.0, epsilon = 1e-12, max_relative = 1e-12);
        assert_relative_eq!(after.gamma, &before.gamma * 2.0, epsilon = 1e-12, max_relative = 1e-12);
        assert_abs_diff_eq!(after.ivector_count, 2.0);
    }

    #[test]
    // Purpose
    // -------
    // Check that the scatter cache is transparent to readers of `R`.
    //
    // Given
    // -----
    // - cache_size = 2 and cache_size + 1 = 3 utterances.
    // - One accumulator flushed manually before the third commit, one not.
    //
    // Expect
    // ------
    // - Identical flushed `R`, equal to the row-by-row sum with cache_size 1.
    fn scatter_cache_is_transparent() {
        // Arrange
        let gmm = fixture_gmm();
        let model = fixture_model(&gmm, false);
        let utts: Vec<UtteranceStats> = (0..3).map(|k| utterance(&model, &gmm, k, false)).collect();
        let base = StatsOptions { update_variances: false, ..StatsOptions::default() };
        let lazy = IvectorStats::new(&model, StatsOptions { cache_size: 2, ..base }).unwrap();
        let eager = IvectorStats::new(&model, StatsOptions { cache_size: 2, ..base }).unwrap();
        let unit = IvectorStats::new(&model, StatsOptions { cache_size: 1, ..base }).unwrap();

        // Act
        for (k, stats) in utts.iter().enumerate() {
            if k == 2 {
                eager.flush_cache();
            }
            lazy.commit_stats_for_utterance(&model, stats).unwrap();
            eager.commit_stats_for_utterance(&model, stats).unwrap();
            unit.commit_stats_for_utterance(&model, stats).unwrap();
        }

        // Assert
        let r_lazy = lazy.snapshot().r;
        assert_relative_eq!(r_lazy, eager.snapshot().r, epsilon = 1e-12, max_relative = 1e-12);
        assert_relative_eq!(r_lazy, unit.snapshot().r, epsilon = 1e-12, max_relative = 1e-12);
        assert!(r_lazy.iter().any(|&v| v != 0.0));
    }

    #[test]
    // Purpose
    // -------
    // Verify the persistence round-trip and additive reads.
    //
    // Given
    // -----
    // - A weight-projection model with seeded sampling, two utterances, one
    //   still pending in the cache when writing.
    //
    // Expect
    // ------
    // - `read` reproduces the snapshot bit for bit.
    // - `read_into(add = true)` on a copy doubles it; `add = false` restores it.
    fn write_read_round_trip_is_exact() {
        // Arrange
        let gmm = fixture_gmm();
        let model = fixture_model(&gmm, true);
        let opts = StatsOptions { seed: Some(11), cache_size: 4, ..StatsOptions::default() };
        let acc = IvectorStats::new(&model, opts).unwrap();
        for k in 0..2 {
            acc.commit_stats_for_utterance(&model, &utterance(&model, &gmm, k, true)).unwrap();
        }
        let mut bytes = Vec::new();

        // Act
        acc.write(&mut bytes).unwrap();
        let restored = IvectorStats::read(&mut bytes.as_slice()).unwrap();
        let doubled = restored.try_clone().unwrap();
        doubled.read_into(&mut bytes.as_slice(), true).unwrap();

        // Assert
        let original = acc.snapshot();
        assert_eq!(restored.snapshot(), original);
        assert_eq!(restored.options(), &opts);
        let twice = doubled.snapshot();
        assert_eq!(twice.ivector_count, 2.0 * original.ivector_count);
        assert_relative_eq!(
            twice.g.unwrap(),
            original.g.as_ref().unwrap() * 2.0,
            epsilon = 1e-12,
            max_relative = 1e-12
        );
        doubled.read_into(&mut bytes.as_slice(), false).unwrap();
        assert_eq!(doubled.snapshot(), original);
    }

    #[test]
    // Purpose
    // -------
    // Check seeded reproducibility of the weight statistics.
    //
    // Given
    // -----
    // - Two accumulators with the same seed fed the same utterances, and a
    //   third with a different seed.
    //
    // Expect
    // ------
    // - Identical, non-zero Q and G for the shared seed; Q rows have
    //   non-negative diagonals.
    // - A different seed gives different Q.
    fn seeded_weight_sampling_is_reproducible() {
        // Arrange
        let gmm = fixture_gmm();
        let model = fixture_model(&gmm, true);
        let opts = StatsOptions { seed: Some(3), update_variances: false, ..StatsOptions::default() };
        let a = IvectorStats::new(&model, opts).unwrap();
        let b = IvectorStats::new(&model, opts).unwrap();
        let c = IvectorStats::new(&model, StatsOptions { seed: Some(4), ..opts }).unwrap();

        // Act
        for k in 0..3 {
            let stats = utterance(&model, &gmm, k, false);
            a.commit_stats_for_utterance(&model, &stats).unwrap();
            b.commit_stats_for_utterance(&model, &stats).unwrap();
            c.commit_stats_for_utterance(&model, &stats).unwrap();
        }

        // Assert
        let (sa, sb) = (a.snapshot(), b.snapshot());
        assert_ne!(sa.q, c.snapshot().q);
        assert_eq!(sa.q, sb.q);
        assert_eq!(sa.g, sb.g);
        let q = sa.q.unwrap();
        assert!(q.iter().any(|&v| v != 0.0));
        for row in q.axis_iter(Axis(0)) {
            assert!(row[0] >= 0.0 && row[2] >= 0.0);
        }
    }

    #[test]
    // Purpose
    // -------
    // Verify the second-order-statistics requirement and layout checks.
    //
    // Given
    // -----
    // - An accumulator with variance statistics, utterance stats without S.
    // - A weight-projection accumulator merged into a fixed-weight one.
    //
    // Expect
    // ------
    // - `IncompatibleStats` in both cases; nothing is committed.
    fn incompatible_inputs_are_rejected() {
        // Arrange
        let gmm = fixture_gmm();
        let model = fixture_model(&gmm, false);
        let weighted = fixture_model(&gmm, true);
        let acc = IvectorStats::new(&model, StatsOptions::default()).unwrap();
        let other = IvectorStats::new(&weighted, StatsOptions::default()).unwrap();

        // Act
        let missing_s = acc.commit_stats_for_utterance(&model, &utterance(&model, &gmm, 0, false));
        let merged = acc.add(&other);

        // Assert
        assert_eq!(missing_s, Err(IvectorError::IncompatibleStats { what: "second-order stats" }));
        assert_eq!(merged, Err(IvectorError::IncompatibleStats { what: "weight statistics" }));
        assert_eq!(acc.total_count(), 0.0);
        assert_eq!(acc.auxf_per_frame(), 0.0);
    }
}
