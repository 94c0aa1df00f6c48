//! Small numeric helpers shared by the GMM and the extractor.
use ndarray::{Array1, ArrayView1};
use statrs::consts::LN_SQRT_2PI;

/// `ln(2π)`.
pub const LN_2PI: f64 = 2.0 * LN_SQRT_2PI;

/// Numerically stable `ln Σ exp(vᵢ)`; `-∞` for an empty or all `-∞` input.
pub fn log_sum_exp(v: ArrayView1<f64>) -> f64 {
    let max = v.fold(f64::NEG_INFINITY, |m, &x| m.max(x));
    if !max.is_finite() {
        return max;
    }
    max + v.fold(0.0, |acc, &x| acc + (x - max).exp()).ln()
}

/// `exp(v − lse(v))`.
pub fn softmax(v: ArrayView1<f64>) -> Array1<f64> {
    let lse = log_sum_exp(v);
    v.mapv(|x| (x - lse).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    // Purpose
    // -------
    // Verify log-sum-exp stability and softmax normalization.
    //
    // Given
    // -----
    // - v = [1000, 1000], which overflows a naive exp.
    //
    // Expect
    // ------
    // - lse = 1000 + ln 2; softmax = [0.5, 0.5].
    fn log_sum_exp_is_stable_for_large_inputs() {
        let v = array![1000.0, 1000.0];

        assert_abs_diff_eq!(log_sum_exp(v.view()), 1000.0 + 2.0_f64.ln(), epsilon = 1e-9);
        let p = softmax(v.view());
        assert_abs_diff_eq!(p[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(p.sum(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(LN_2PI, (2.0 * std::f64::consts::PI).ln(), epsilon = 1e-12);
    }
}
