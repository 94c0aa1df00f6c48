//! ivector extractor — trained parameters and their derived caches.
//!
//! Purpose
//! -------
//! Own the parameters of the ivector model: per-Gaussian subspace
//! projections `M[I][D][S]`, inverse covariances `Σ⁻¹[I][D][D]`, the mixture
//! weight model (a projection `W[I][S]` or fixed weights `w[I]`) and the
//! prior offset. Keep the derived caches that inference needs consistent
//! with those parameters at all times.
//!
//! Key behaviors
//! -------------
//! - [`IvectorExtractor::new`] initializes from a [`FullGmm`]: `Σᵢ⁻¹` is the
//!   UBM precision, the first column of `Mᵢ` is `μᵢ / prior_offset` (so the
//!   prior mean reproduces the UBM means) and the remaining columns are
//!   seeded standard-normal draws.
//! - Derived fields (`gconstᵢ`, packed `Uᵢ = MᵢᵀΣᵢ⁻¹Mᵢ`, `Σᵢ⁻¹Mᵢ`) are
//!   recomputed inside the same call that changes `Mᵢ` or `Σᵢ⁻¹`; there is
//!   no separate "recompute" entry point for callers to forget.
//! - [`IvectorExtractor::transform_ivectors`] reparameterizes ivector space
//!   (`Mᵢ ← MᵢT⁻¹`, `W ← WT⁻¹`) and resets the prior offset.
//! - [`IvectorExtractor::write`] / [`IvectorExtractor::read`] persist the
//!   parameters in MessagePack and rebuild the caches on read.
//!
//! Invariants & assumptions
//! ------------------------
//! - `I, D, S ≥ 1`; every `Σᵢ⁻¹` is SPD; every parameter is finite.
//! - The prior over the ivector is `N((prior_offset, 0, …, 0), I)`; only
//!   the offset is stored.
//! - The model is read-only during accumulation and mutated only by the
//!   update phase, which holds `&mut self`.
//!
//! Conventions
//! -----------
//! - Inference lives in `models::inference`, auxiliary functions in
//!   `models::auxf`; both are `impl IvectorExtractor` blocks over the
//!   fields declared here.
//! - The training layer reads per-Gaussian quantities through the
//!   crate-visible accessors below, never through the fields.
use crate::ivector::{
    core::{
        options::{ExtractorOptions, InferenceOptions},
        ubm::FullGmm,
        validation::{validate_dim, validate_finite},
    },
    errors::{IvectorError, IvectorResult},
};
use crate::linalg::{
    decomp::{general_inverse, log_det_spd},
    packed::{pack_symmetric, packed_len},
};
use crate::utils::LN_2PI;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::debug;

/// How per-utterance mixture weights are modeled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WeightModel {
    /// `log wᵢ(x) = wᵢᵀx − lse(Wx)`; rows of the `[I, S]` matrix are `wᵢᵀ`.
    Projected(Array2<f64>),
    /// Weights independent of the ivector, shape `[I]`.
    Fixed(Array1<f64>),
}

/// IvectorExtractor — the ivector model.
///
/// Fields are visible to the sibling `inference` and `auxf` modules only.
#[derive(Debug, Clone, PartialEq)]
pub struct IvectorExtractor {
    pub(super) weights: WeightModel,
    /// `[I, D, S]`.
    pub(super) m: Array3<f64>,
    /// `[I, D, D]`.
    pub(super) sigma_inv: Array3<f64>,
    pub(super) prior_offset: f64,
    // ---- Derived ----
    /// `−½(D ln 2π − ln|Σᵢ⁻¹|)`, shape `[I]`.
    pub(super) gconsts: Array1<f64>,
    /// Packed `MᵢᵀΣᵢ⁻¹Mᵢ`, shape `[I, S(S+1)/2]`.
    pub(super) u: Array2<f64>,
    /// `Σᵢ⁻¹Mᵢ`, shape `[I, D, S]`.
    pub(super) sigma_inv_m: Array3<f64>,
    pub(super) inference: InferenceOptions,
}

#[derive(Serialize)]
struct ExtractorRecordRef<'a> {
    weights: &'a WeightModel,
    m: &'a Array3<f64>,
    sigma_inv: &'a Array3<f64>,
    prior_offset: f64,
}

#[derive(Deserialize)]
struct ExtractorRecord {
    weights: WeightModel,
    m: Array3<f64>,
    sigma_inv: Array3<f64>,
    prior_offset: f64,
}

impl IvectorExtractor {
    /// IvectorExtractor::new — initialize from a full-covariance UBM.
    ///
    /// Parameters
    /// ----------
    /// - `opts`: ivector dimension, weight model, prior offset, seed and
    ///   inference settings.
    /// - `gmm`: the UBM.
    ///
    /// Errors
    /// ------
    /// - Option validation errors.
    /// - `NotPositiveDefinite` if a UBM precision is not SPD (cannot happen
    ///   for a validated [`FullGmm`], but is re-checked by the caches).
    pub fn new(opts: &ExtractorOptions, gmm: &FullGmm) -> IvectorResult<Self> {
        opts.validate()?;
        let (num_gauss, dim, ivector_dim) = (gmm.num_gauss(), gmm.dim(), opts.ivector_dim);
        let means = gmm.means();
        let mut rng = StdRng::seed_from_u64(opts.seed);
        let m = Array3::from_shape_fn((num_gauss, dim, ivector_dim), |(i, d, s)| {
            if s == 0 { means[[i, d]] / opts.prior_offset } else { rng.sample(StandardNormal) }
        });
        let weights = if opts.use_weights {
            WeightModel::Projected(Array2::zeros((num_gauss, ivector_dim)))
        } else {
            WeightModel::Fixed(gmm.weights().to_owned())
        };
        Self::from_parts(weights, m, gmm.inv_covars().clone(), opts.prior_offset, opts.inference)
    }

    /// IvectorExtractor::from_parts — assemble a model from explicit tensors.
    ///
    /// Errors
    /// ------
    /// - `EmptyModel` for a zero extent.
    /// - `DimensionMismatch` when the tensors disagree on `I`, `D` or `S`.
    /// - `NonFiniteParameter` / `InvalidMixtureWeight` for bad values.
    /// - `NotPositiveDefinite` for a non-SPD `Σᵢ⁻¹`.
    pub fn from_parts(
        weights: WeightModel, m: Array3<f64>, sigma_inv: Array3<f64>, prior_offset: f64,
        inference: InferenceOptions,
    ) -> IvectorResult<Self> {
        inference.validate()?;
        let (num_gauss, dim, ivector_dim) = m.dim();
        if num_gauss == 0 || dim == 0 || ivector_dim == 0 {
            return Err(IvectorError::EmptyModel);
        }
        validate_dim("num gauss (sigma_inv)", num_gauss, sigma_inv.shape()[0])?;
        validate_dim("feature dim (sigma_inv rows)", dim, sigma_inv.shape()[1])?;
        validate_dim("feature dim (sigma_inv cols)", dim, sigma_inv.shape()[2])?;
        match &weights {
            WeightModel::Projected(w) => {
                validate_dim("num gauss (weight projection)", num_gauss, w.nrows())?;
                validate_dim("ivector dim (weight projection)", ivector_dim, w.ncols())?;
                validate_finite("weight projection", w.iter())?;
            }
            WeightModel::Fixed(w) => {
                validate_dim("num gauss (weights)", num_gauss, w.len())?;
                for (index, &value) in w.iter().enumerate() {
                    if !value.is_finite() || value <= 0.0 {
                        return Err(IvectorError::InvalidMixtureWeight { index, value });
                    }
                }
            }
        }
        validate_finite("M", m.iter())?;
        validate_finite("sigma_inv", sigma_inv.iter())?;
        validate_finite("prior_offset", std::iter::once(&prior_offset))?;

        let mut model = IvectorExtractor {
            weights,
            m,
            sigma_inv,
            prior_offset,
            gconsts: Array1::zeros(num_gauss),
            u: Array2::zeros((num_gauss, packed_len(ivector_dim))),
            sigma_inv_m: Array3::zeros((num_gauss, dim, ivector_dim)),
            inference,
        };
        model.compute_derived_vars()?;
        Ok(model)
    }

    fn compute_derived_for(&mut self, i: usize) -> IvectorResult<()> {
        let dim = self.feat_dim() as f64;
        let sigma_inv_i = self.sigma_inv.index_axis(Axis(0), i);
        let logdet =
            log_det_spd(sigma_inv_i).ok_or(IvectorError::NotPositiveDefinite { gaussian: i })?;
        let m_i = self.m.index_axis(Axis(0), i);
        let sim = sigma_inv_i.dot(&m_i);
        let u_i = pack_symmetric(m_i.t().dot(&sim).view());
        self.gconsts[i] = -0.5 * (dim * LN_2PI - logdet);
        self.u.row_mut(i).assign(&u_i);
        self.sigma_inv_m.index_axis_mut(Axis(0), i).assign(&sim);
        Ok(())
    }

    fn compute_derived_vars(&mut self) -> IvectorResult<()> {
        for i in 0..self.num_gauss() {
            self.compute_derived_for(i)?;
        }
        debug!(num_gauss = self.num_gauss(), "recomputed derived extractor variables");
        Ok(())
    }

    /// update_gaussian — replace `Mᵢ` and/or `Σᵢ⁻¹` and refresh Gaussian
    /// `i`'s caches in one step.
    ///
    /// On error (a non-SPD `Σᵢ⁻¹`) the previous parameters are restored.
    pub(crate) fn update_gaussian(
        &mut self, i: usize, m_i: Option<ArrayView2<f64>>, sigma_inv_i: Option<ArrayView2<f64>>,
    ) -> IvectorResult<()> {
        let old_m = self.m.index_axis(Axis(0), i).to_owned();
        let old_sigma_inv = self.sigma_inv.index_axis(Axis(0), i).to_owned();
        if let Some(m_i) = m_i {
            self.m.index_axis_mut(Axis(0), i).assign(&m_i);
        }
        if let Some(sigma_inv_i) = sigma_inv_i {
            self.sigma_inv.index_axis_mut(Axis(0), i).assign(&sigma_inv_i);
        }
        if let Err(err) = self.compute_derived_for(i) {
            self.m.index_axis_mut(Axis(0), i).assign(&old_m);
            self.sigma_inv.index_axis_mut(Axis(0), i).assign(&old_sigma_inv);
            self.compute_derived_for(i)?;
            return Err(err);
        }
        Ok(())
    }

    /// Replace row `i` of the weight projection; no-op for fixed weights.
    pub(crate) fn set_weight_projection_row(&mut self, i: usize, w_i: ArrayView1<f64>) {
        if let WeightModel::Projected(w) = &mut self.weights {
            w.row_mut(i).assign(&w_i);
        }
    }

    /// transform_ivectors — apply `x ← T x` to ivector space.
    ///
    /// Parameters
    /// ----------
    /// - `t`: invertible `S×S` transform.
    /// - `new_prior_offset`: prior offset after the transform.
    ///
    /// Errors
    /// ------
    /// - `DimensionMismatch` if `t` is not `S×S`.
    /// - `SingularTransform` if `t` cannot be inverted.
    ///
    /// Notes
    /// -----
    /// - `Mᵢ ← MᵢT⁻¹` and `W ← WT⁻¹` keep every Gaussian mean and weight
    ///   unchanged as a function of the original ivector.
    /// - Takes `&mut self`, so no inference can observe a half-updated model.
    pub fn transform_ivectors(&mut self, t: ArrayView2<f64>, new_prior_offset: f64) -> IvectorResult<()> {
        let s = self.ivector_dim();
        validate_dim("transform rows", s, t.nrows())?;
        validate_dim("transform cols", s, t.ncols())?;
        let t_inv = general_inverse(t).ok_or(IvectorError::SingularTransform)?;
        validate_finite("transform inverse", t_inv.iter())?;
        for i in 0..self.num_gauss() {
            let new_m = self.m.index_axis(Axis(0), i).dot(&t_inv);
            self.m.index_axis_mut(Axis(0), i).assign(&new_m);
        }
        if let WeightModel::Projected(w) = &mut self.weights {
            *w = w.dot(&t_inv);
        }
        self.prior_offset = new_prior_offset;
        self.compute_derived_vars()
    }

    // ---- Dimensions / accessors ----

    pub fn num_gauss(&self) -> usize {
        self.m.shape()[0]
    }

    pub fn feat_dim(&self) -> usize {
        self.m.shape()[1]
    }

    pub fn ivector_dim(&self) -> usize {
        self.m.shape()[2]
    }

    pub fn prior_offset(&self) -> f64 {
        self.prior_offset
    }

    /// `true` when mixture weights depend on the ivector.
    pub fn ivector_dependent_weights(&self) -> bool {
        matches!(self.weights, WeightModel::Projected(_))
    }

    pub fn weights(&self) -> &WeightModel {
        &self.weights
    }

    pub fn inference_options(&self) -> &InferenceOptions {
        &self.inference
    }

    pub fn set_inference_options(&mut self, inference: InferenceOptions) -> IvectorResult<()> {
        inference.validate()?;
        self.inference = inference;
        Ok(())
    }

    /// Projection `Mᵢ`, `D×S`.
    pub fn projection(&self, i: usize) -> ArrayView2<'_, f64> {
        self.m.index_axis(Axis(0), i)
    }

    /// Precision `Σᵢ⁻¹`, `D×D`.
    pub fn sigma_inv(&self, i: usize) -> ArrayView2<'_, f64> {
        self.sigma_inv.index_axis(Axis(0), i)
    }

    /// Per-Gaussian normalizers `gconstᵢ`.
    pub fn gconsts(&self) -> ArrayView1<'_, f64> {
        self.gconsts.view()
    }

    /// Packed `Uᵢ` rows, `[I, S(S+1)/2]`.
    pub(crate) fn u_packed(&self) -> ArrayView2<'_, f64> {
        self.u.view()
    }

    /// Weight projection matrix `[I, S]`, if in use.
    pub(crate) fn weight_projection(&self) -> Option<&Array2<f64>> {
        match &self.weights {
            WeightModel::Projected(w) => Some(w),
            WeightModel::Fixed(_) => None,
        }
    }

    // ---- Persistence ----

    /// Write weights, `M`, `Σ⁻¹` and the prior offset, in that order.
    pub fn write<W: Write>(&self, writer: &mut W) -> IvectorResult<()> {
        let record = ExtractorRecordRef {
            weights: &self.weights,
            m: &self.m,
            sigma_inv: &self.sigma_inv,
            prior_offset: self.prior_offset,
        };
        rmp_serde::encode::write(writer, &record)?;
        Ok(())
    }

    /// Read a model written by [`IvectorExtractor::write`]; caches are
    /// rebuilt and inference options reset to their defaults.
    pub fn read<R: Read>(reader: &mut R) -> IvectorResult<Self> {
        let record: ExtractorRecord = rmp_serde::decode::from_read(reader)?;
        Self::from_parts(
            record.weights,
            record.m,
            record.sigma_inv,
            record.prior_offset,
            InferenceOptions::default(),
        )
    }
}
