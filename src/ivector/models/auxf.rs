//! Auxiliary functions of the ivector model.
//!
//! `get_auxf = get_acoustic_auxf + get_prior_auxf`, and the acoustic part
//! splits into gconst, mean, weight and variance terms, each exposed for
//! diagnostics. With a posterior covariance `var` the terms are
//! expectations over `x ~ N(mean, var)`; without it they are evaluated at
//! the point `mean`. The two modes are not comparable with each other.
use crate::ivector::{
    core::{stats::UtteranceStats, validation::validate_dim},
    errors::IvectorResult,
    models::extractor::{IvectorExtractor, WeightModel},
};
use crate::linalg::packed::{pack_symmetric, trace_packed_product};
use crate::utils::{LN_2PI, log_sum_exp, softmax};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

impl IvectorExtractor {
    fn validate_point(&self, mean: ArrayView1<f64>, var: Option<ArrayView2<f64>>) -> IvectorResult<()> {
        let s = self.ivector_dim();
        validate_dim("ivector dim (mean)", s, mean.len())?;
        if let Some(var) = var {
            validate_dim("ivector dim (var rows)", s, var.nrows())?;
            validate_dim("ivector dim (var cols)", s, var.ncols())?;
        }
        Ok(())
    }

    /// Total auxiliary function: acoustic + prior.
    pub fn get_auxf(
        &self, stats: &UtteranceStats, mean: ArrayView1<f64>, var: Option<ArrayView2<f64>>,
    ) -> IvectorResult<f64> {
        let acoustic = self.get_acoustic_auxf(stats, mean, var)?;
        let prior = self.get_prior_auxf(mean, var)?;
        Ok(acoustic + prior)
    }

    /// Acoustic auxiliary function: gconst + mean + weight + variance terms.
    pub fn get_acoustic_auxf(
        &self, stats: &UtteranceStats, mean: ArrayView1<f64>, var: Option<ArrayView2<f64>>,
    ) -> IvectorResult<f64> {
        self.validate_stats(stats)?;
        self.validate_point(mean, var)?;
        let gconst = self.get_acoustic_auxf_gconst(stats)?;
        let mean_term = self.get_acoustic_auxf_mean(stats, mean, var)?;
        let weight = self.get_acoustic_auxf_weight(stats, mean, var)?;
        let variance = self.get_acoustic_auxf_variance(stats)?;
        Ok(gconst + mean_term + weight + variance)
    }

    /// `Σᵢ γᵢ·gconstᵢ`.
    pub fn get_acoustic_auxf_gconst(&self, stats: &UtteranceStats) -> IvectorResult<f64> {
        self.validate_stats(stats)?;
        Ok(stats.gamma.dot(&self.gconsts))
    }

    /// Variance term `Σᵢ −½γᵢ tr((Sᵢ/γᵢ − x̄ᵢx̄ᵢᵀ)Σᵢ⁻¹)`.
    ///
    /// Without second-order statistics the data are assumed to match the
    /// model covariance, giving `−½·γ·D`.
    pub fn get_acoustic_auxf_variance(&self, stats: &UtteranceStats) -> IvectorResult<f64> {
        self.validate_stats(stats)?;
        let Some(s) = &stats.s else {
            return Ok(-0.5 * stats.total_count() * self.feat_dim() as f64);
        };
        let mut ans = 0.0;
        for i in 0..self.num_gauss() {
            let gamma = stats.gamma[i];
            if gamma <= 0.0 {
                continue;
            }
            let xbar = stats.x.row(i).mapv(|v| v / gamma);
            let outer = xbar.view().insert_axis(Axis(1)).dot(&xbar.view().insert_axis(Axis(0)));
            let centered = &s.index_axis(Axis(0), i).mapv(|v| v / gamma) - &outer;
            ans += -0.5 * gamma * (&centered * &self.sigma_inv.index_axis(Axis(0), i)).sum();
        }
        Ok(ans)
    }

    /// Mean term `Σᵢ −½γᵢ (x̄ᵢ − Mᵢμ)ᵀΣᵢ⁻¹(x̄ᵢ − Mᵢμ)`, plus
    /// `−½γᵢ tr(Uᵢ·var)` when a covariance is given.
    pub fn get_acoustic_auxf_mean(
        &self, stats: &UtteranceStats, mean: ArrayView1<f64>, var: Option<ArrayView2<f64>>,
    ) -> IvectorResult<f64> {
        self.validate_stats(stats)?;
        self.validate_point(mean, var)?;
        let var_packed = var.map(pack_symmetric);
        let mut ans = 0.0;
        for i in 0..self.num_gauss() {
            let gamma = stats.gamma[i];
            if gamma <= 0.0 {
                continue;
            }
            let dev = &stats.x.row(i).mapv(|v| v / gamma) - &self.m.index_axis(Axis(0), i).dot(&mean);
            ans += -0.5 * gamma * dev.dot(&self.sigma_inv.index_axis(Axis(0), i).dot(&dev));
            if let Some(vp) = &var_packed {
                ans += -0.5 * gamma * trace_packed_product(vp.view(), self.u.row(i));
            }
        }
        Ok(ans)
    }

    /// Weight term.
    ///
    /// - Fixed weights: `Σᵢ γᵢ ln wᵢ`.
    /// - Projected, point: `Σᵢ γᵢ (wᵢᵀμ − lse(Wμ))`.
    /// - Projected, with `var`: second-order expansion of the expected
    ///   log-softmax, `Σᵢ γᵢ ln pᵢ − ½γ·tr(var·Wᵀ(diag p − ppᵀ)W)`.
    pub fn get_acoustic_auxf_weight(
        &self, stats: &UtteranceStats, mean: ArrayView1<f64>, var: Option<ArrayView2<f64>>,
    ) -> IvectorResult<f64> {
        self.validate_stats(stats)?;
        self.validate_point(mean, var)?;
        match &self.weights {
            WeightModel::Fixed(w) => Ok(stats.gamma.dot(&w.mapv(f64::ln))),
            WeightModel::Projected(w) => {
                let logw_unnorm = w.dot(&mean);
                let lse = log_sum_exp(logw_unnorm.view());
                let point = stats.gamma.dot(&logw_unnorm) - stats.total_count() * lse;
                let Some(var) = var else {
                    return Ok(point);
                };
                let p = softmax(logw_unnorm.view());
                let weighted_w = w * &p.view().insert_axis(Axis(1));
                let mut curvature: Array2<f64> = w.t().dot(&weighted_w);
                let wp = w.t().dot(&p);
                curvature -= &wp.view().insert_axis(Axis(1)).dot(&wp.view().insert_axis(Axis(0)));
                let trace = (&curvature * &var).sum();
                Ok(point - 0.5 * stats.total_count() * trace)
            }
        }
    }

    /// Prior term.
    ///
    /// With `var`: `−½(‖μ − μ₀‖² + tr(var) + S ln 2π)`, the expected log
    /// density of `N(μ₀, I)`. Without: `−½‖μ − μ₀‖²`.
    pub fn get_prior_auxf(&self, mean: ArrayView1<f64>, var: Option<ArrayView2<f64>>) -> IvectorResult<f64> {
        self.validate_point(mean, var)?;
        let mut offset = mean.to_owned();
        offset[0] -= self.prior_offset;
        let sq = offset.dot(&offset);
        match var {
            None => Ok(-0.5 * sq),
            Some(var) => Ok(-0.5 * (sq + var.diag().sum() + self.ivector_dim() as f64 * LN_2PI)),
        }
    }
}
