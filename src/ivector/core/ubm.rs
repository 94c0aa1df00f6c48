//! ivector ubm — the full-covariance Gaussian mixture the extractor adapts.
//!
//! Purpose
//! -------
//! Represent the acoustic model ("UBM") supplied by the caller: mixture
//! weights, means and full covariances. The extractor reads it once at
//! construction; the statistics accumulator can also use it to compute exact
//! frame posteriors when no external posteriors are available.
//!
//! Key behaviors
//! -------------
//! - [`FullGmm::new`] validates shapes, weights and positive definiteness,
//!   and caches inverse covariances and per-component normalizers.
//! - [`FullGmm::component_log_likes`] / [`FullGmm::component_posteriors`]
//!   score one frame; [`FullGmm::utterance_posteriors`] scores a whole
//!   utterance and returns dense-as-sparse posteriors plus the total
//!   log-likelihood.
//!
//! Invariants & assumptions
//! ------------------------
//! - Weights are finite and strictly positive; they are not renormalized.
//! - Every covariance is symmetric positive definite.
//!
//! Conventions
//! -----------
//! - Shapes: `weights [I]`, `means [I, D]`, `covars [I, D, D]`.
//! - Posteriors are normalized with log-sum-exp; no pruning is performed.
use crate::ivector::{
    core::{
        stats::Posterior,
        validation::{validate_dim, validate_finite},
    },
    errors::{IvectorError, IvectorResult},
};
use crate::linalg::decomp::{log_det_spd, spd_inverse};
use crate::utils::{LN_2PI, log_sum_exp};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};

/// Full-covariance Gaussian mixture model.
#[derive(Debug, Clone, PartialEq)]
pub struct FullGmm {
    weights: Array1<f64>,
    means: Array2<f64>,
    covars: Array3<f64>,
    inv_covars: Array3<f64>,
    gconsts: Array1<f64>,
}

impl FullGmm {
    /// FullGmm::new — validated construction.
    ///
    /// Parameters
    /// ----------
    /// - `weights`: `[I]` mixture weights, finite and > 0.
    /// - `means`: `[I, D]` component means.
    /// - `covars`: `[I, D, D]` SPD covariances.
    ///
    /// Errors
    /// ------
    /// - `EmptyModel` if `I == 0` or `D == 0`.
    /// - `DimensionMismatch` if the three tensors disagree on `I` or `D`.
    /// - `InvalidMixtureWeight` for the first bad weight.
    /// - `NonFiniteParameter` for NaN/±inf in means or covariances.
    /// - `NotPositiveDefinite` for the first non-SPD covariance.
    pub fn new(weights: Array1<f64>, means: Array2<f64>, covars: Array3<f64>) -> IvectorResult<Self> {
        let (num_gauss, dim) = means.dim();
        if num_gauss == 0 || dim == 0 {
            return Err(IvectorError::EmptyModel);
        }
        validate_dim("num gauss (weights)", num_gauss, weights.len())?;
        validate_dim("num gauss (covars)", num_gauss, covars.shape()[0])?;
        validate_dim("feature dim (covars rows)", dim, covars.shape()[1])?;
        validate_dim("feature dim (covars cols)", dim, covars.shape()[2])?;
        for (index, &value) in weights.iter().enumerate() {
            if !value.is_finite() || value <= 0.0 {
                return Err(IvectorError::InvalidMixtureWeight { index, value });
            }
        }
        validate_finite("gmm means", means.iter())?;
        validate_finite("gmm covars", covars.iter())?;

        let mut inv_covars = Array3::<f64>::zeros((num_gauss, dim, dim));
        let mut gconsts = Array1::<f64>::zeros(num_gauss);
        for i in 0..num_gauss {
            let cov = covars.index_axis(Axis(0), i);
            let inv = spd_inverse(cov).ok_or(IvectorError::NotPositiveDefinite { gaussian: i })?;
            let logdet = log_det_spd(cov).ok_or(IvectorError::NotPositiveDefinite { gaussian: i })?;
            inv_covars.index_axis_mut(Axis(0), i).assign(&inv);
            gconsts[i] = weights[i].ln() - 0.5 * (dim as f64 * LN_2PI + logdet);
        }
        Ok(FullGmm { weights, means, covars, inv_covars, gconsts })
    }

    pub fn num_gauss(&self) -> usize {
        self.weights.len()
    }

    pub fn dim(&self) -> usize {
        self.means.ncols()
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    pub fn means(&self) -> ArrayView2<'_, f64> {
        self.means.view()
    }

    pub fn covars(&self) -> &Array3<f64> {
        &self.covars
    }

    pub fn inv_covars(&self) -> &Array3<f64> {
        &self.inv_covars
    }

    /// `ln(wᵢ N(x; μᵢ, Σᵢ))` for every component.
    pub fn component_log_likes(&self, frame: ArrayView1<f64>) -> Array1<f64> {
        Array1::from_shape_fn(self.num_gauss(), |i| {
            let diff = &frame - &self.means.row(i);
            let mahal = diff.dot(&self.inv_covars.index_axis(Axis(0), i).dot(&diff));
            self.gconsts[i] - 0.5 * mahal
        })
    }

    /// Component posteriors of one frame and the frame's log-likelihood.
    pub fn component_posteriors(&self, frame: ArrayView1<f64>) -> (Array1<f64>, f64) {
        let loglikes = self.component_log_likes(frame);
        let total = log_sum_exp(loglikes.view());
        (loglikes.mapv(|l| (l - total).exp()), total)
    }

    /// utterance_posteriors — exact posteriors for every frame.
    ///
    /// Returns
    /// -------
    /// `(Posterior, f64)`: one list per frame holding every Gaussian with a
    /// non-zero responsibility, and the utterance's total log-likelihood.
    ///
    /// Errors
    /// ------
    /// - `DimensionMismatch` if `feats` is not `[T, D]`.
    pub fn utterance_posteriors(&self, feats: ArrayView2<f64>) -> IvectorResult<(Posterior, f64)> {
        validate_dim("feature dim", self.dim(), feats.ncols())?;
        let mut post = Posterior::with_capacity(feats.nrows());
        let mut total = 0.0;
        for frame in feats.axis_iter(Axis(0)) {
            let (p, loglike) = self.component_posteriors(frame);
            total += loglike;
            post.push(p.iter().enumerate().filter(|(_, w)| **w > 0.0).map(|(i, &w)| (i, w)).collect());
        }
        Ok((post, total))
    }
}
