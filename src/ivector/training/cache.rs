//! Bounded cache of rank-one R contributions.
//!
//! Each committed utterance contributes `γᵢ · packed(var + μμᵀ)` to every
//! row `Rᵢ`. Folding that in immediately costs `O(I·S²)` per utterance;
//! instead the pair `(γ, packed(var + μμᵀ))` is appended here and a full
//! cache is folded into `R` with one product `R += Γᵀ·C`.
//!
//! The cache is either [`CacheState::Flushed`] (empty) or
//! [`CacheState::Accumulating`]. The accumulator drains it before every
//! read of `R`.
use ndarray::{Array2, ArrayView1, s};

/// Whether cached contributions are pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Flushed,
    Accumulating { pending: usize },
}

/// Pending contributions taken out of a [`ScatterCache`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScatterBatch {
    /// `[n, I]` occupations.
    gammas: Array2<f64>,
    /// `[n, S(S+1)/2]` packed second moments.
    scatters: Array2<f64>,
}

impl ScatterBatch {
    /// `r += gammasᵀ · scatters`.
    pub fn fold_into(&self, r: &mut Array2<f64>) {
        ndarray::linalg::general_mat_mul(1.0, &self.gammas.t(), &self.scatters, 1.0, r);
    }

    pub fn len(&self) -> usize {
        self.gammas.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-capacity cache of `(γ, packed scatter)` rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ScatterCache {
    gammas: Array2<f64>,
    scatters: Array2<f64>,
    len: usize,
}

impl ScatterCache {
    pub fn new(capacity: usize, num_gauss: usize, packed_dim: usize) -> Self {
        ScatterCache {
            gammas: Array2::zeros((capacity, num_gauss)),
            scatters: Array2::zeros((capacity, packed_dim)),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.gammas.nrows()
    }

    pub fn state(&self) -> CacheState {
        match self.len {
            0 => CacheState::Flushed,
            pending => CacheState::Accumulating { pending },
        }
    }

    /// Append one utterance; returns `true` when the cache is now full.
    pub fn push(&mut self, gamma: ArrayView1<f64>, scatter: ArrayView1<f64>) -> bool {
        self.gammas.row_mut(self.len).assign(&gamma);
        self.scatters.row_mut(self.len).assign(&scatter);
        self.len += 1;
        self.len == self.capacity()
    }

    /// Take every pending row out, leaving the cache flushed.
    pub fn drain(&mut self) -> Option<ScatterBatch> {
        if self.len == 0 {
            return None;
        }
        let batch = ScatterBatch {
            gammas: self.gammas.slice(s![..self.len, ..]).to_owned(),
            scatters: self.scatters.slice(s![..self.len, ..]).to_owned(),
        };
        self.len = 0;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - State transitions (flushed → accumulating → full → flushed).
    // - The batched fold agreeing with row-by-row rank-one updates.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Verify push/drain state transitions.
    //
    // Given
    // -----
    // - Capacity 2.
    //
    // Expect
    // ------
    // - Flushed, Accumulating{1}, full on the second push, Flushed after drain.
    fn cache_cycles_through_states() {
        let mut cache = ScatterCache::new(2, 2, 1);
        assert_eq!(cache.state(), CacheState::Flushed);
        assert!(cache.drain().is_none());

        assert!(!cache.push(array![1.0, 0.0].view(), array![2.0].view()));
        assert_eq!(cache.state(), CacheState::Accumulating { pending: 1 });
        assert!(cache.push(array![0.5, 1.0].view(), array![4.0].view()));

        let batch = cache.drain().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(cache.state(), CacheState::Flushed);
    }

    #[test]
    // Purpose
    // -------
    // Check the batched fold against explicit rank-one updates.
    //
    // Given
    // -----
    // - Two entries with γ = [1, 0], [0.5, 1] and scatters [2, 1, 3], [4, 0, 1].
    //
    // Expect
    // ------
    // - R₀ = 1·[2,1,3] + 0.5·[4,0,1]; R₁ = [4,0,1].
    fn fold_matches_rank_one_updates() {
        // Arrange
        let mut cache = ScatterCache::new(4, 2, 3);
        cache.push(array![1.0, 0.0].view(), array![2.0, 1.0, 3.0].view());
        cache.push(array![0.5, 1.0].view(), array![4.0, 0.0, 1.0].view());
        let mut r = Array2::<f64>::zeros((2, 3));

        // Act
        cache.drain().unwrap().fold_into(&mut r);

        // Assert
        assert_eq!(r, array![[4.0, 1.0, 3.5], [4.0, 0.0, 1.0]]);
    }
}
