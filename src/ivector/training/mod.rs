//! training — cross-utterance statistics and model re-estimation.
//!
//! Purpose
//! -------
//! Turn many utterances' statistics into an updated [`IvectorExtractor`]:
//! accumulate per-utterance contributions concurrently into an
//! [`IvectorStats`], merge and persist partial accumulators, then run one
//! EM update.
//!
//! Key behaviors
//! -------------
//! - [`cache`]: the two-state scatter cache that batches rank-one `R`
//!   contributions.
//! - [`accumulator`]: [`IvectorStats`] with five independently locked
//!   statistic groups, commit, flush, merge and persistence.
//! - [`update`]: projections, weight projections, variances and prior,
//!   reported through [`UpdateSummary`].
//!
//! Invariants & assumptions
//! ------------------------
//! - The model is read-only during accumulation and mutated only by
//!   `update`, which holds `&mut IvectorExtractor`.
//! - `R` is never read with rows pending in the cache.
//!
//! Downstream usage
//! ----------------
//! - Typical training iteration:
//!   1. `IvectorStats::new(&model, stats_opts)`.
//!   2. From many threads, `acc_stats_for_utterance(&model, feats, &post)`.
//!   3. Optionally `add` per-shard accumulators or `read_into(.., true)`.
//!   4. `update(&est_opts, &mut model)`.
//!
//! [`IvectorExtractor`]: crate::ivector::models::IvectorExtractor

pub mod accumulator;
pub mod cache;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;

pub use self::accumulator::{IvectorStats, StatsSnapshot};
pub use self::cache::{CacheState, ScatterCache};
pub use self::update::{PriorDiagnostics, UpdateSummary};
