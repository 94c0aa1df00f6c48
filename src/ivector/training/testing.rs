//! Shared fixtures for the training unit tests.
use crate::ivector::{
    core::{options::ExtractorOptions, stats::UtteranceStats, ubm::FullGmm},
    models::extractor::IvectorExtractor,
};
use ndarray::{Array2, Array3, Axis, array};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;

/// Two well-separated 2-D components with correlated covariances.
pub(crate) fn fixture_gmm() -> FullGmm {
    let mut covars = Array3::<f64>::zeros((2, 2, 2));
    covars.index_axis_mut(Axis(0), 0).assign(&array![[1.0, 0.3], [0.3, 0.8]]);
    covars.index_axis_mut(Axis(0), 1).assign(&array![[0.6, -0.1], [-0.1, 1.2]]);
    FullGmm::new(array![0.4, 0.6], array![[-2.0, 0.5], [2.0, -0.5]], covars).unwrap()
}

/// `S = 2` extractor initialized from `gmm`.
pub(crate) fn fixture_model(gmm: &FullGmm, use_weights: bool) -> IvectorExtractor {
    let mut opts = ExtractorOptions::new(2, use_weights).unwrap();
    opts.prior_offset = 10.0;
    opts.seed = 5;
    IvectorExtractor::new(&opts, gmm).unwrap()
}

/// Features of "speaker" `k`: 30 frames, one in three drawn near
/// component 0 and the rest near component 1, shifted by a
/// speaker-dependent offset.
pub(crate) fn features(gmm: &FullGmm, k: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(100 + k);
    let shift = 0.25 * k as f64;
    let means = gmm.means();
    Array2::from_shape_fn((30, 2), |(t, d)| {
        let noise: f64 = rng.sample(StandardNormal);
        let sign = if d == 0 { 1.0 } else { -1.0 };
        means[[usize::from(t % 3 != 0), d]] + sign * shift + 0.7 * noise
    })
}

/// Statistics of speaker `k` under exact `gmm` posteriors.
pub(crate) fn utterance(
    model: &IvectorExtractor, gmm: &FullGmm, k: u64, need_2nd_order_stats: bool,
) -> UtteranceStats {
    let feats = features(gmm, k);
    let (post, _) = gmm.utterance_posteriors(feats.view()).unwrap();
    let mut stats = UtteranceStats::new(model.num_gauss(), model.feat_dim(), need_2nd_order_stats);
    model.get_stats(feats.view(), &post, &mut stats).unwrap();
    stats
}
