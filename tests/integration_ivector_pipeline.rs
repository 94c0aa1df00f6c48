//! Integration tests for ivector training and extraction.
//!
//! Purpose
//! -------
//! - Validate the end-to-end pipeline: UBM → extractor → concurrent
//!   accumulation → re-estimation → persistence → extraction.
//! - Exercise the public surface only, as a downstream trainer would.
//!
//! Coverage
//! --------
//! - `ivector::training::IvectorStats`:
//!   - Concurrent commits from several threads vs a serial pass.
//!   - Sub-updates at fixed posteriors and the full `update`.
//!   - Write/read round-trips and additive reads.
//! - `ivector::models::IvectorExtractor`:
//!   - Persistence and `extract_ivector` on the trained model.
//!
//! Exclusions
//! ----------
//! - Closed-form checks of individual routines (ridge scenario, flooring
//!   invariant, cache states) — covered by unit tests.
//! - Large-scale performance — see `benches/accumulate_bench.rs`.
use approx::assert_relative_eq;
use ndarray::{Array1, Array2, Array3, Axis, array};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;
use rust_ivector::prelude::*;

/// Purpose
/// -------
/// Build a four-component, three-dimensional UBM with distinct,
/// correlated covariances.
fn make_gmm() -> FullGmm {
    let means = array![[-2.0, 0.0, 1.0], [2.0, 0.5, -1.0], [0.0, -2.0, 0.0], [0.5, 2.0, 0.5]];
    let mut covars = Array3::<f64>::zeros((4, 3, 3));
    for i in 0..4 {
        let r = 0.1 * i as f64;
        covars
            .index_axis_mut(Axis(0), i)
            .assign(&array![[1.0 + r, 0.2, 0.0], [0.2, 0.8, -r], [0.0, -r, 1.2]]);
    }
    FullGmm::new(array![0.25, 0.25, 0.25, 0.25], means, covars)
        .expect("FullGmm::new should accept SPD covariances and normalized weights")
}

/// Purpose
/// -------
/// Construct an `S = 3` extractor from `gmm` with a small prior offset.
fn make_model(gmm: &FullGmm, use_weights: bool) -> IvectorExtractor {
    let mut opts = ExtractorOptions::new(3, use_weights).expect("valid ivector dimension");
    opts.prior_offset = 10.0;
    opts.seed = 1;
    IvectorExtractor::new(&opts, gmm).expect("extractor initialization from a valid UBM")
}

/// Purpose
/// -------
/// Synthesize 40 frames for `speaker`: frames cycle through the UBM
/// components, all shifted by a speaker-specific offset, plus noise.
///
/// Returns
/// -------
/// - `[40, 3]` feature matrix, deterministic in `speaker`.
fn speaker_features(gmm: &FullGmm, speaker: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(1_000 + speaker);
    let phase = speaker as f64;
    let offset = array![0.4 * phase.cos(), 0.4 * phase.sin(), if speaker % 2 == 0 { 0.2 } else { -0.2 }];
    let means = gmm.means();
    Array2::from_shape_fn((40, 3), |(t, d)| {
        let noise: f64 = rng.sample(StandardNormal);
        means[[t % 4, d]] + offset[d] + 0.6 * noise
    })
}

/// Purpose
/// -------
/// Utterance statistics for `speaker` under exact UBM posteriors.
fn speaker_stats(model: &IvectorExtractor, gmm: &FullGmm, speaker: u64, second_order: bool) -> UtteranceStats {
    let feats = speaker_features(gmm, speaker);
    let (post, _) = gmm.utterance_posteriors(feats.view()).expect("matching feature dimension");
    let mut stats = UtteranceStats::new(model.num_gauss(), model.feat_dim(), second_order);
    model.get_stats(feats.view(), &post, &mut stats).expect("stats match the model");
    stats
}

fn assert_snapshots_close(a: &StatsSnapshot, b: &StatsSnapshot) {
    assert_relative_eq!(a.gamma, b.gamma, epsilon = 1e-10, max_relative = 1e-10);
    assert_relative_eq!(a.y, b.y, epsilon = 1e-10, max_relative = 1e-10);
    assert_relative_eq!(a.r, b.r, epsilon = 1e-10, max_relative = 1e-10);
    let (sa, sb) = (a.s_var.as_ref().expect("variance stats"), b.s_var.as_ref().expect("variance stats"));
    assert_relative_eq!(sa, sb, epsilon = 1e-10, max_relative = 1e-10);
    if let (Some(qa), Some(qb)) = (&a.q, &b.q) {
        assert_relative_eq!(qa, qb, epsilon = 1e-10, max_relative = 1e-10);
    }
    if let (Some(ga), Some(gb)) = (&a.g, &b.g) {
        assert_relative_eq!(ga, gb, epsilon = 1e-10, max_relative = 1e-10);
    }
    assert_eq!(a.ivector_count, b.ivector_count);
    assert_relative_eq!(a.ivector_sum, b.ivector_sum, epsilon = 1e-10, max_relative = 1e-10);
    assert_relative_eq!(a.ivector_scatter, b.ivector_scatter, epsilon = 1e-10, max_relative = 1e-10);
    assert_relative_eq!(a.tot_auxf, b.tot_auxf, epsilon = 1e-8, max_relative = 1e-8);
}

#[test]
// Purpose
// -------
// Ensure concurrent accumulation from several threads into one shared
// accumulator matches a serial pass.
//
// Given
// -----
// - Eight speakers, a weight-projection model with seeded sampling,
//   variance statistics on, cache_size = 3 so that several cache folds
//   happen.
// - Four threads each committing two utterances through the exact-GMM path.
//
// Expect
// ------
// - All statistic groups, including the sampled weight statistics, agree
//   with the serial accumulator up to reassociation error.
// - The returned log-likelihoods are finite.
fn concurrent_accumulation_matches_serial() {
    let gmm = make_gmm();
    let model = make_model(&gmm, true);
    let opts = StatsOptions { cache_size: 3, seed: Some(9), ..StatsOptions::default() };
    let feats: Vec<Array2<f64>> = (0..8).map(|k| speaker_features(&gmm, k)).collect();

    let serial = IvectorStats::new(&model, opts).expect("valid stats options");
    for f in &feats {
        let loglike = serial
            .acc_stats_for_utterance_with_gmm(&model, &gmm, f.view())
            .expect("serial commit");
        assert!(loglike.is_finite());
    }

    let shared = IvectorStats::new(&model, opts).expect("valid stats options");
    std::thread::scope(|scope| {
        let (shared, model, gmm) = (&shared, &model, &gmm);
        for chunk in feats.chunks(2) {
            scope.spawn(move || {
                for f in chunk {
                    shared
                        .acc_stats_for_utterance_with_gmm(model, gmm, f.view())
                        .expect("concurrent commit");
                }
            });
        }
    });

    let expected = serial.snapshot();
    assert!(expected.q.is_some());
    assert_snapshots_close(&expected, &shared.snapshot());
    assert_eq!(shared.num_ivectors(), 8.0);
}

#[test]
// Purpose
// -------
// Verify that the re-estimation steps improve the auxiliary function at the
// posteriors used for accumulation, by exactly the reported amounts.
//
// Given
// -----
// - Six speakers with second-order statistics and a fixed-weight model.
// - Posteriors computed once, from the pre-update model.
// - gaussian_min_count = 0 and a non-binding variance floor.
//
// Expect
// ------
// - Projections then variances each raise Σ auxf by improvement·Σγ.
// - The prior update reports a non-negative improvement and leaves a
//   positive prior offset.
fn reestimation_improves_auxf_at_fixed_posteriors() {
    let gmm = make_gmm();
    let mut model = make_model(&gmm, false);
    let utts: Vec<UtteranceStats> = (0..6).map(|k| speaker_stats(&model, &gmm, k, true)).collect();
    let acc = IvectorStats::new(&model, StatsOptions::default()).expect("valid stats options");
    let posts: Vec<IvectorPosterior> = utts
        .iter()
        .map(|stats| {
            acc.commit_stats_for_utterance(&model, stats).expect("commit");
            model.get_ivector_distribution(stats, true).expect("posterior")
        })
        .collect();
    let total_auxf = |model: &IvectorExtractor| -> f64 {
        utts.iter()
            .zip(&posts)
            .map(|(stats, post)| {
                let var = post.var.as_ref().map(|v| v.view());
                model.get_auxf(stats, post.mean.view(), var).expect("auxf")
            })
            .sum()
    };
    let opts = EstimationOptions {
        gaussian_min_count: 0.0,
        variance_floor_factor: 1e-3,
        ..EstimationOptions::default()
    };
    let count = acc.total_count();

    let auxf0 = total_auxf(&model);
    let projections = acc.update_projections(&opts, &mut model).expect("projection update");
    let auxf1 = total_auxf(&model);
    let variances = acc.update_variances(&opts, &mut model).expect("variance update");
    let auxf2 = total_auxf(&model);
    let prior = acc.update_prior(&mut model).expect("prior update");

    assert!(projections > 0.0);
    assert!((auxf1 - auxf0 - projections * count).abs() < 1e-6 * (1.0 + auxf0.abs()));
    assert!(variances >= 0.0);
    assert!((auxf2 - auxf1 - variances * count).abs() < 1e-6 * (1.0 + auxf1.abs()));
    assert!(prior >= 0.0);
    assert!(model.prior_offset() > 0.0);
}

#[test]
// Purpose
// -------
// Run the complete training loop with weight projections and orthogonal
// projections on a thread pool, then extract ivectors.
//
// Given
// -----
// - Weight-projection model, seeded sampling, two EM iterations with
//   `do_orthogonalization = true` and `num_threads = 2`.
//
// Expect
// ------
// - Every `UpdateSummary` is finite and its total equals the sum of parts.
// - Extracted ivectors have dimension S and a finite objective change.
fn full_training_loop_with_weights_and_orthogonalization() {
    let gmm = make_gmm();
    let mut model = make_model(&gmm, true);
    let stats_opts = StatsOptions { seed: Some(21), ..StatsOptions::default() };
    let est_opts = EstimationOptions {
        gaussian_min_count: 0.0,
        do_orthogonalization: true,
        num_threads: 2,
        ..EstimationOptions::default()
    };

    for _ in 0..2 {
        let acc = IvectorStats::new(&model, stats_opts).expect("valid stats options");
        for k in 0..6 {
            let feats = speaker_features(&gmm, k);
            let (post, _) = gmm.utterance_posteriors(feats.view()).expect("posteriors");
            acc.acc_stats_for_utterance(&model, feats.view(), &post).expect("commit");
        }
        let summary = acc.update(&est_opts, &mut model).expect("update");
        let parts = summary.projections + summary.weights + summary.variances + summary.prior;
        assert!(summary.total.is_finite());
        assert!((summary.total - parts).abs() < 1e-12);
    }

    let extraction = ExtractionOptions { compute_objf_change: true, ..ExtractionOptions::default() };
    for k in 0..3 {
        let stats = speaker_stats(&model, &gmm, k, false);
        let extracted = model.extract_ivector(&stats, &extraction).expect("extraction");
        assert_eq!(extracted.ivector.len(), 3);
        assert!(extracted.ivector.iter().all(|v| v.is_finite()));
        assert!(extracted.objf_change_per_frame.expect("requested").is_finite());
        assert!((extracted.num_frames - 40.0).abs() < 1e-9);
    }
}

#[test]
// Purpose
// -------
// Verify persistence of a trained model and of its statistics.
//
// Given
// -----
// - One training iteration on four speakers; the accumulator for the next
//   iteration holds rows still pending in its cache when written.
//
// Expect
// ------
// - The restored model yields bit-identical ivectors.
// - The restored accumulator has a bit-identical snapshot; reading it
//   additively into a copy doubles the counts.
fn trained_model_and_stats_round_trip() {
    let gmm = make_gmm();
    let mut model = make_model(&gmm, false);
    let opts = EstimationOptions { gaussian_min_count: 0.0, ..EstimationOptions::default() };
    let acc = IvectorStats::new(&model, StatsOptions::default()).expect("valid stats options");
    for k in 0..4 {
        acc.commit_stats_for_utterance(&model, &speaker_stats(&model, &gmm, k, true))
            .expect("commit");
    }
    acc.update(&opts, &mut model).expect("update");
    let next = IvectorStats::new(&model, StatsOptions::default()).expect("valid stats options");
    for k in 4..6 {
        next.commit_stats_for_utterance(&model, &speaker_stats(&model, &gmm, k, true))
            .expect("commit");
    }

    model
        .set_inference_options(InferenceOptions { num_iters: 3, ..InferenceOptions::default() })
        .expect("valid inference options");
    let mut model_bytes = Vec::new();
    model.write(&mut model_bytes).expect("model write");
    let mut restored = IvectorExtractor::read(&mut model_bytes.as_slice()).expect("model read");
    assert_eq!(*restored.inference_options(), InferenceOptions::default());
    restored.set_inference_options(*model.inference_options()).expect("valid inference options");
    let mut stats_bytes = Vec::new();
    next.write(&mut stats_bytes).expect("stats write");
    let restored_stats = IvectorStats::read(&mut stats_bytes.as_slice()).expect("stats read");

    let stats = speaker_stats(&model, &gmm, 7, false);
    let a: Array1<f64> =
        model.extract_ivector(&stats, &ExtractionOptions::default()).expect("extract").ivector;
    let b: Array1<f64> =
        restored.extract_ivector(&stats, &ExtractionOptions::default()).expect("extract").ivector;
    assert_eq!(a, b);
    assert_eq!(restored.prior_offset(), model.prior_offset());

    let original = next.snapshot();
    assert_eq!(restored_stats.snapshot(), original);
    restored_stats.read_into(&mut stats_bytes.as_slice(), true).expect("additive read");
    assert_eq!(restored_stats.num_ivectors(), 2.0 * original.ivector_count);
}
