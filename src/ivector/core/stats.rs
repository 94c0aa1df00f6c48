//! Per-utterance sufficient statistics.
//!
//! [`UtteranceStats`] holds the zeroth-, first- and (optionally)
//! second-order statistics of one utterance, keyed by Gaussian index:
//!
//! - `gamma[i] = Σ_t post(t, i)`
//! - `x[i, :] = Σ_t post(t, i) · feat(t)`
//! - `s[i, :, :] = Σ_t post(t, i) · feat(t) feat(t)ᵀ` (only when requested)
//!
//! A value is filled by [`UtteranceStats::accumulate`], optionally rescaled
//! with [`UtteranceStats::scale`] to apply an acoustic weight, and then
//! consumed by inference and by the global accumulator. Nothing downstream
//! mutates it.
use crate::ivector::{
    core::validation::{validate_dim, validate_posteriors},
    errors::IvectorResult,
};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Sparse frame posteriors: for each frame, `(gaussian_index, responsibility)`
/// pairs. Responsibilities usually sum to one per frame but need not.
pub type Posterior = Vec<Vec<(usize, f64)>>;

/// Sufficient statistics of one utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtteranceStats {
    /// Occupation per Gaussian, shape `[I]`.
    pub gamma: Array1<f64>,
    /// First-order statistics, shape `[I, D]`.
    pub x: Array2<f64>,
    /// Symmetric second-order statistics, shape `[I, D, D]`.
    pub s: Option<Array3<f64>>,
}

impl UtteranceStats {
    /// Zeroed statistics for `num_gauss` Gaussians of dimension `feat_dim`.
    pub fn new(num_gauss: usize, feat_dim: usize, need_2nd_order_stats: bool) -> Self {
        UtteranceStats {
            gamma: Array1::zeros(num_gauss),
            x: Array2::zeros((num_gauss, feat_dim)),
            s: need_2nd_order_stats.then(|| Array3::zeros((num_gauss, feat_dim, feat_dim))),
        }
    }

    pub fn num_gauss(&self) -> usize {
        self.gamma.len()
    }

    pub fn feat_dim(&self) -> usize {
        self.x.ncols()
    }

    pub fn has_second_order(&self) -> bool {
        self.s.is_some()
    }

    /// Total occupation `Σᵢ γᵢ`.
    pub fn total_count(&self) -> f64 {
        self.gamma.sum()
    }

    /// Multiply every tensor by `c`.
    pub fn scale(&mut self, c: f64) {
        self.gamma *= c;
        self.x *= c;
        if let Some(s) = self.s.as_mut() {
            *s *= c;
        }
    }

    /// accumulate — add one utterance's frames into these statistics.
    ///
    /// Parameters
    /// ----------
    /// - `feats`: `[T, D]` frame features.
    /// - `post`: `T` sparse posteriors over Gaussians.
    ///
    /// Errors
    /// ------
    /// - `DimensionMismatch` if `feats` has the wrong width.
    /// - `PosteriorLengthMismatch` / `GaussianIndexOutOfRange` for bad
    ///   posteriors. Nothing is accumulated on error.
    ///
    /// Notes
    /// -----
    /// - Frames contribute independently; order does not matter.
    pub fn accumulate(&mut self, feats: ArrayView2<f64>, post: &Posterior) -> IvectorResult<()> {
        validate_dim("feature dim", self.feat_dim(), feats.ncols())?;
        validate_posteriors(post, feats.nrows(), self.num_gauss())?;
        for (frame, entries) in feats.axis_iter(Axis(0)).zip(post.iter()) {
            for &(i, weight) in entries {
                self.gamma[i] += weight;
                self.x.row_mut(i).scaled_add(weight, &frame);
                if let Some(s) = self.s.as_mut() {
                    let outer = frame.view().insert_axis(Axis(1)).dot(&frame.view().insert_axis(Axis(0)));
                    s.index_axis_mut(Axis(0), i).scaled_add(weight, &outer);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ivector::errors::IvectorError;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Zeroth/first/second-order accumulation from sparse posteriors.
    // - Scaling of all tensors.
    // - Rejection of mismatched feature widths without partial updates.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Verify accumulation of all three orders.
    //
    // Given
    // -----
    // - Two 2-d frames, posteriors [(0, 1.0)] and [(0, 0.5), (1, 0.5)].
    //
    // Expect
    // ------
    // - gamma = [1.5, 0.5], x and s equal the hand-computed sums.
    fn accumulate_builds_all_orders() {
        // Arrange
        let feats = array![[1.0, 2.0], [3.0, -1.0]];
        let post: Posterior = vec![vec![(0, 1.0)], vec![(0, 0.5), (1, 0.5)]];
        let mut stats = UtteranceStats::new(2, 2, true);

        // Act
        stats.accumulate(feats.view(), &post).unwrap();

        // Assert
        assert_eq!(stats.gamma, array![1.5, 0.5]);
        assert_eq!(stats.x, array![[2.5, 1.5], [1.5, -0.5]]);
        let s = stats.s.as_ref().unwrap();
        assert_eq!(s.index_axis(Axis(0), 0), array![[5.5, 0.5], [0.5, 4.5]]);
        assert_eq!(s.index_axis(Axis(0), 1), array![[4.5, -1.5], [-1.5, 0.5]]);
        assert_eq!(stats.total_count(), 2.0);
    }

    #[test]
    // Purpose
    // -------
    // Check that `scale` multiplies every tensor.
    //
    // Given
    // -----
    // - Accumulated stats scaled by 0.5.
    //
    // Expect
    // ------
    // - Each tensor is exactly half its previous value.
    fn scale_multiplies_every_tensor() {
        // Arrange
        let feats = array![[2.0, 4.0]];
        let post: Posterior = vec![vec![(1, 1.0)]];
        let mut stats = UtteranceStats::new(2, 2, true);
        stats.accumulate(feats.view(), &post).unwrap();
        let before = stats.clone();

        // Act
        stats.scale(0.5);

        // Assert
        assert_eq!(stats.gamma, &before.gamma * 0.5);
        assert_eq!(stats.x, &before.x * 0.5);
        assert_eq!(stats.s.unwrap(), before.s.unwrap() * 0.5);
    }

    #[test]
    // Purpose
    // -------
    // Ensure a mismatched feature width is rejected before any update.
    //
    // Given
    // -----
    // - Stats for D = 2, features with D = 3.
    //
    // Expect
    // ------
    // - DimensionMismatch; statistics remain zero.
    fn accumulate_rejects_wrong_feature_dim() {
        let feats = array![[1.0, 2.0, 3.0]];
        let post: Posterior = vec![vec![(0, 1.0)]];
        let mut stats = UtteranceStats::new(1, 2, false);

        let err = stats.accumulate(feats.view(), &post);

        assert_eq!(
            err,
            Err(IvectorError::DimensionMismatch { what: "feature dim", expected: 2, found: 3 })
        );
        assert_eq!(stats.total_count(), 0.0);
    }
}
