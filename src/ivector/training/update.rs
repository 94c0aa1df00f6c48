//! ivector re-estimation — one EM update of an [`IvectorExtractor`] from
//! accumulated [`IvectorStats`].
//!
//! Purpose
//! -------
//! Maximize the auxiliary function implied by the accumulated statistics
//! with respect to the projections, weight projections, precisions and the
//! prior, and report the per-frame improvement of each step.
//!
//! Key behaviors
//! -------------
//! - [`IvectorStats::update_projections`]: per Gaussian, maximize
//!   `tr(MᵢᵀΣᵢ⁻¹Yᵢ) − ½tr(MᵢᵀΣᵢ⁻¹MᵢRᵢ)`, optionally on the Stiefel manifold.
//! - [`IvectorStats::update_weights`]: per Gaussian, maximize
//!   `Gᵢᵀwᵢ − ½wᵢᵀQᵢwᵢ`.
//! - [`IvectorStats::update_variances`]: `Cᵢ = (S_varᵢ + MᵢRᵢMᵢᵀ − MᵢYᵢᵀ −
//!   YᵢMᵢᵀ)/γᵢ`, floored against a fraction of the count-weighted average
//!   covariance, then inverted.
//! - [`IvectorStats::update_prior`]: fit `N(mean, cov)` to the ivector
//!   posteriors and re-whiten ivector space so the prior becomes
//!   `N(‖x‖e₀, I)` again.
//! - [`IvectorStats::update`]: all four in the order projections,
//!   variances, weights, prior, returning an [`UpdateSummary`].
//!
//! Invariants & assumptions
//! ------------------------
//! - Gaussians with `γᵢ < gaussian_min_count` keep their parameters; this is
//!   logged, never an error.
//! - The variance update reads the *new* projections, so it runs after the
//!   projection update; the prior update changes ivector coordinates, so it
//!   runs last.
//! - Per-Gaussian work runs on a rayon pool of `num_threads` workers;
//!   results are committed to the model serially through the extractor's
//!   atomic per-Gaussian update.
//!
//! Conventions
//! -----------
//! - Improvements are per frame: `Σ improvements / Σγ`.
//! - `info!` for summaries, `warn!` for skipped or degraded steps,
//!   `debug!` for per-Gaussian detail.
//!
//! Testing notes
//! -------------
//! - Projection and variance improvements are checked against the change of
//!   the auxiliary function at fixed posteriors; the prior update against
//!   the unchanged Gaussian means it implies.
use crate::ivector::{
    core::options::EstimationOptions,
    errors::IvectorResult,
    models::extractor::IvectorExtractor,
    training::accumulator::{IvectorStats, outer},
};
use crate::linalg::{
    decomp::{
        cholesky_lower, floor_covariance, householder_to_first_axis, log_det_spd, spd_inverse,
        sym_eigen, symmetrize,
    },
    packed::unpack_symmetric,
};
use crate::optimization::{
    quadratic::{quadratic_matrix_objf, solve_quadratic_matrix_problem, solve_quadratic_problem},
    stiefel::orthonormal_projection_update,
};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Eigenvalue floor for the ivector covariance in the prior update.
const PRIOR_EIGEN_FLOOR: f64 = 1e-7;

/// Below this norm the whitened ivector mean is treated as zero.
const MIN_PRIOR_OFFSET: f64 = 1e-10;

/// Per-frame improvements of one [`IvectorStats::update`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub projections: f64,
    pub weights: f64,
    pub variances: f64,
    pub prior: f64,
    pub total: f64,
}

/// Fit of the ivector prior.
///
/// `old_auxf` is `−½ tr E[(x − μ₀)(x − μ₀)ᵀ]` under the current prior mean
/// `μ₀`; `new_auxf` is `−½(ln det C + S)` for the fitted covariance `C`
/// (eigenvalues floored). Constants shared by both are omitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorDiagnostics {
    pub num_ivectors: f64,
    pub old_auxf: f64,
    pub new_auxf: f64,
    /// `(new_auxf − old_auxf)·num_ivectors / Σγ`.
    pub improvement_per_frame: f64,
    pub num_floored: usize,
}

struct PriorFit {
    count: f64,
    mean: Array1<f64>,
    cov: Array2<f64>,
    /// Floored eigenvalues of `cov`.
    eigvals: Array1<f64>,
    /// Eigenvectors of `cov`, as columns.
    eigvecs: Array2<f64>,
    num_floored: usize,
}

fn per_frame(total: f64, count: f64) -> f64 {
    if count > 0.0 { total / count } else { 0.0 }
}

/// `½γ(ln det Σ⁻¹ − tr(CΣ⁻¹))`, or `None` if `Σ⁻¹` is not SPD.
fn variance_objf(gamma: f64, cov: &Array2<f64>, sigma_inv: ArrayView2<f64>) -> Option<f64> {
    let logdet = log_det_spd(sigma_inv)?;
    Some(0.5 * gamma * (logdet - (cov * &sigma_inv).sum()))
}

impl IvectorStats {
    /// update — re-estimate every parameter group in place.
    ///
    /// Parameters
    /// ----------
    /// - `opts`: flooring, minimum counts, manifold search, threads.
    /// - `model`: the extractor the statistics were accumulated with.
    ///
    /// Returns
    /// -------
    /// [`UpdateSummary`] of per-frame improvements. Steps whose statistics
    /// were not accumulated (weights, variances) contribute 0.
    ///
    /// Errors
    /// ------
    /// - Option validation errors, `DimensionMismatch` /
    ///   `IncompatibleStats` for a model of another layout, `ThreadPool`.
    pub fn update(
        &self, opts: &EstimationOptions, model: &mut IvectorExtractor,
    ) -> IvectorResult<UpdateSummary> {
        opts.validate()?;
        self.check_model(model)?;
        info!(
            auxf_per_frame = self.auxf_per_frame(),
            num_ivectors = self.num_ivectors(),
            count = self.total_count(),
            "updating ivector extractor"
        );
        let projections = self.update_projections(opts, model)?;
        let variances = self.update_variances(opts, model)?;
        let weights = self.update_weights(opts, model)?;
        let prior = self.update_prior(model)?;
        let total = projections + weights + variances + prior;
        info!(projections, weights, variances, prior, total, "overall auxf improvement per frame");
        Ok(UpdateSummary { projections, weights, variances, prior, total })
    }

    fn thread_pool(opts: &EstimationOptions) -> IvectorResult<rayon::ThreadPool> {
        Ok(rayon::ThreadPoolBuilder::new().num_threads(opts.num_threads).build()?)
    }

    /// update_projections — re-estimate every `Mᵢ` with enough data.
    ///
    /// Returns
    /// -------
    /// Per-frame auxf improvement, measured against the old `Mᵢ`. On the
    /// Stiefel manifold it is non-negative whenever the old `Mᵢ` already has
    /// orthonormal columns; it can be negative only when the constraint is
    /// first imposed (or after the prior update re-whitened `Mᵢ`), and the
    /// constrained point is kept regardless.
    pub fn update_projections(
        &self, opts: &EstimationOptions, model: &mut IvectorExtractor,
    ) -> IvectorResult<f64> {
        opts.validate()?;
        self.check_model(model)?;
        let s = self.ivector_dim;
        let manifold = opts.manifold_options();
        let pool = Self::thread_pool(opts)?;

        let linear_guard = self.linear.lock();
        let r_guard = self.flushed_r();
        let (gamma, y, r) = (&linear_guard.gamma, &linear_guard.y, &*r_guard);
        let current: &IvectorExtractor = model;
        let results: Vec<Option<(Array2<f64>, f64)>> = pool.install(|| {
            (0..self.num_gauss)
                .into_par_iter()
                .map(|i| {
                    if gamma[i] < opts.gaussian_min_count {
                        debug!(gaussian = i, count = gamma[i], "skipping projection update");
                        return None;
                    }
                    let r_i = unpack_symmetric(r.row(i), s);
                    let y_i = y.index_axis(Axis(0), i);
                    let sigma_inv_i = current.sigma_inv(i);
                    let old_m = current.projection(i);
                    let mut m_i = old_m.to_owned();
                    let improvement = if opts.do_orthogonalization {
                        let objf_old = quadratic_matrix_objf(old_m, y_i, r_i.view(), sigma_inv_i);
                        let outcome = orthonormal_projection_update(
                            r_i.view(),
                            y_i,
                            sigma_inv_i,
                            &mut m_i,
                            &manifold,
                        );
                        if !outcome.converged {
                            warn!(gaussian = i, status = %outcome.status, "manifold search did not converge");
                        }
                        outcome.value - objf_old
                    } else {
                        solve_quadratic_matrix_problem(r_i.view(), y_i, sigma_inv_i, &mut m_i)
                            .improvement()
                    };
                    debug!(gaussian = i, improvement, "projection updated");
                    Some((m_i, improvement))
                })
                .collect()
        });
        let tot_count = gamma.sum();
        drop(r_guard);
        drop(linear_guard);

        let mut tot_impr = 0.0;
        let mut skipped = 0;
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Some((m_i, improvement)) => {
                    model.update_gaussian(i, Some(m_i.view()), None)?;
                    tot_impr += improvement;
                }
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(skipped, min_count = opts.gaussian_min_count, "projections left unchanged for low-count Gaussians");
        }
        let improvement = per_frame(tot_impr, tot_count);
        info!(improvement, orthogonal = opts.do_orthogonalization, "updated projections");
        Ok(improvement)
    }

    /// update_weights — re-estimate every weight-projection row with enough
    /// data; 0 when the model has fixed weights.
    pub fn update_weights(
        &self, opts: &EstimationOptions, model: &mut IvectorExtractor,
    ) -> IvectorResult<f64> {
        opts.validate()?;
        self.check_model(model)?;
        let (Some(group), Some(w)) = (&self.weight, model.weight_projection()) else {
            return Ok(0.0);
        };
        let s = self.ivector_dim;
        let pool = Self::thread_pool(opts)?;
        let gamma = self.linear.lock().gamma.clone();

        let weight_guard = group.lock();
        let (q, g) = (&weight_guard.q, &weight_guard.g);
        let results: Vec<Option<(Array1<f64>, f64)>> = pool.install(|| {
            (0..self.num_gauss)
                .into_par_iter()
                .map(|i| {
                    if gamma[i] < opts.gaussian_min_count {
                        debug!(gaussian = i, count = gamma[i], "skipping weight update");
                        return None;
                    }
                    let mut w_i = w.row(i).to_owned();
                    let q_i = unpack_symmetric(q.row(i), s);
                    let outcome = solve_quadratic_problem(q_i.view(), g.row(i), &mut w_i);
                    if !outcome.accepted {
                        debug!(gaussian = i, "weight step refused");
                    }
                    Some((w_i, outcome.improvement()))
                })
                .collect()
        });
        drop(weight_guard);

        let mut tot_impr = 0.0;
        let mut skipped = 0;
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Some((w_i, improvement)) => {
                    model.set_weight_projection_row(i, w_i.view());
                    tot_impr += improvement;
                }
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(skipped, min_count = opts.gaussian_min_count, "weights left unchanged for low-count Gaussians");
        }
        let improvement = per_frame(tot_impr, gamma.sum());
        info!(improvement, "updated weight projections");
        Ok(improvement)
    }

    /// update_variances — re-estimate every `Σᵢ⁻¹` with enough data; 0 when
    /// variance statistics were not accumulated.
    ///
    /// Notes
    /// -----
    /// - The floor is `variance_floor_factor · Σᵢγᵢ Cᵢ / Σᵢγᵢ`; flooring acts
    ///   on the eigen-directions of `Cᵢ` relative to it.
    /// - A floor that is not positive definite skips the whole step with a
    ///   warning.
    pub fn update_variances(
        &self, opts: &EstimationOptions, model: &mut IvectorExtractor,
    ) -> IvectorResult<f64> {
        opts.validate()?;
        self.check_model(model)?;
        let Some(group) = &self.variance else {
            return Ok(0.0);
        };
        let (d, s) = (self.feat_dim, self.ivector_dim);

        let (gamma, raw) = {
            let linear = self.linear.lock();
            let r = self.flushed_r();
            let s_var = group.lock();
            let raw: Vec<Option<Array2<f64>>> = (0..self.num_gauss)
                .map(|i| {
                    let gamma_i = linear.gamma[i];
                    if gamma_i <= 0.0 {
                        return None;
                    }
                    let m_i = model.projection(i);
                    let r_i = unpack_symmetric(r.row(i), s);
                    let my = m_i.dot(&linear.y.index_axis(Axis(0), i).t());
                    let mut cov = &s_var.index_axis(Axis(0), i) + &m_i.dot(&r_i).dot(&m_i.t());
                    cov -= &my;
                    cov -= &my.t();
                    cov /= gamma_i;
                    symmetrize(&mut cov);
                    Some(cov)
                })
                .collect();
            (linear.gamma.clone(), raw)
        };

        let mut floor = Array2::<f64>::zeros((d, d));
        let mut floor_count = 0.0;
        for (i, cov) in raw.iter().enumerate() {
            if let Some(cov) = cov {
                floor.scaled_add(gamma[i], cov);
                floor_count += gamma[i];
            }
        }
        if floor_count <= 0.0 {
            warn!("no occupation accumulated; skipping variance update");
            return Ok(0.0);
        }
        floor *= opts.variance_floor_factor / floor_count;
        if cholesky_lower(floor.view()).is_none() {
            warn!("variance floor is not positive definite; skipping variance update");
            return Ok(0.0);
        }

        let mut tot_impr = 0.0;
        let mut skipped = 0;
        let mut num_floored = 0;
        for (i, cov) in raw.iter().enumerate() {
            let Some(cov) = cov.as_ref().filter(|_| gamma[i] >= opts.gaussian_min_count) else {
                skipped += 1;
                continue;
            };
            let Some(sigma_inv) = floor_covariance(cov.view(), floor.view())
                .and_then(|(floored, n)| {
                    num_floored += n;
                    spd_inverse(floored.view())
                })
            else {
                warn!(gaussian = i, "floored covariance is not invertible; keeping old variance");
                continue;
            };
            let (Some(objf_old), Some(objf_new)) = (
                variance_objf(gamma[i], cov, model.sigma_inv(i)),
                variance_objf(gamma[i], cov, sigma_inv.view()),
            ) else {
                warn!(gaussian = i, "precision is not positive definite; keeping old variance");
                continue;
            };
            if let Err(err) = model.update_gaussian(i, None, Some(sigma_inv.view())) {
                warn!(gaussian = i, %err, "variance update rejected");
                continue;
            }
            debug!(gaussian = i, improvement = objf_new - objf_old, "variance updated");
            tot_impr += objf_new - objf_old;
        }
        if skipped > 0 {
            warn!(skipped, min_count = opts.gaussian_min_count, "variances left unchanged for low-count Gaussians");
        }
        let improvement = per_frame(tot_impr, gamma.sum());
        info!(improvement, num_floored, "updated variances");
        Ok(improvement)
    }

    fn fit_prior(&self) -> Option<PriorFit> {
        let (count, mean, second_moment) = {
            let prior = self.prior.lock();
            if prior.count <= 0.0 {
                return None;
            }
            (prior.count, &prior.sum / prior.count, &prior.scatter / prior.count)
        };
        let mut cov = second_moment - outer(mean.view(), mean.view());
        symmetrize(&mut cov);
        let (mut eigvals, eigvecs) = sym_eigen(cov.view());
        let mut num_floored = 0;
        eigvals.mapv_inplace(|lambda| {
            if lambda < PRIOR_EIGEN_FLOOR {
                num_floored += 1;
                PRIOR_EIGEN_FLOOR
            } else {
                lambda
            }
        });
        Some(PriorFit { count, mean, cov, eigvals, eigvecs, num_floored })
    }

    fn diagnostics_for(&self, fit: &PriorFit, prior_offset: f64) -> PriorDiagnostics {
        let mut offset_mean = fit.mean.clone();
        offset_mean[0] -= prior_offset;
        let old_auxf = -0.5 * (fit.cov.diag().sum() + offset_mean.dot(&offset_mean));
        let logdet: f64 = fit.eigvals.iter().map(|lambda| lambda.ln()).sum();
        let new_auxf = -0.5 * (logdet + self.ivector_dim as f64);
        PriorDiagnostics {
            num_ivectors: fit.count,
            old_auxf,
            new_auxf,
            improvement_per_frame: per_frame((new_auxf - old_auxf) * fit.count, self.total_count()),
            num_floored: fit.num_floored,
        }
    }

    /// Fit of the prior against `model`'s current offset, or `None` before
    /// any ivector was accumulated.
    pub fn prior_diagnostics(&self, model: &IvectorExtractor) -> IvectorResult<Option<PriorDiagnostics>> {
        self.check_model(model)?;
        Ok(self.fit_prior().map(|fit| self.diagnostics_for(&fit, model.prior_offset())))
    }

    /// update_prior — re-whiten ivector space around the fitted prior.
    ///
    /// With `cov = P diag(λ) Pᵀ` (λ floored at 1e-7), `T = diag(λ^-½)Pᵀ`,
    /// `x = T·mean` and `H` the reflection taking `x` to `‖x‖e₀`, the model
    /// is transformed by `V = H·T` and the new prior offset is `‖x‖`.
    ///
    /// Returns
    /// -------
    /// Per-frame improvement from [`PriorDiagnostics`], 0 when no ivectors
    /// were accumulated.
    pub fn update_prior(&self, model: &mut IvectorExtractor) -> IvectorResult<f64> {
        self.check_model(model)?;
        let Some(fit) = self.fit_prior() else {
            warn!("no ivectors accumulated; skipping prior update");
            return Ok(0.0);
        };
        if fit.num_floored > 0 {
            warn!(num_floored = fit.num_floored, "floored eigenvalues of the ivector covariance");
        }
        let diagnostics = self.diagnostics_for(&fit, model.prior_offset());

        let mut t = fit.eigvecs.t().to_owned();
        for (mut row, &lambda) in t.axis_iter_mut(Axis(0)).zip(fit.eigvals.iter()) {
            row /= lambda.sqrt();
        }
        let x = t.dot(&fit.mean);
        let offset = x.dot(&x).sqrt();
        if offset < MIN_PRIOR_OFFSET {
            warn!(offset, "whitened ivector mean is numerically zero");
        }
        let v = householder_to_first_axis(x.view()).dot(&t);
        model.transform_ivectors(v.view(), offset)?;
        info!(
            improvement = diagnostics.improvement_per_frame,
            old_auxf = diagnostics.old_auxf,
            new_auxf = diagnostics.new_auxf,
            prior_offset = offset,
            "updated ivector prior"
        );
        Ok(diagnostics.improvement_per_frame)
    }
}
