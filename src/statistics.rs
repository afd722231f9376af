//! Unbiased moment estimators on raw power sums.
//!
//! Everything here is a pure function of sums and counts: the same sums give
//! bit-identical results however they were accumulated.

use tracing::warn;

use crate::accumulator::PairSums;
use crate::error::{Error, Result};

/// Floor a statistic that must be non-negative, logging when cancellation
/// pushed it below zero.
pub fn clamp_non_negative(value: f64, what: &'static str) -> f64 {
    if value < 0.0 {
        warn!(value, statistic = what, "negative estimate clamped to zero");
        0.0
    } else {
        value
    }
}

/// Unbiased sample variance `(Σq² − (Σq)²/n)/(n − 1)`.
///
/// Returns zero when `n <= 1`.
pub fn variance(sum_q: f64, sum_qq: f64, n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let nf = n as f64;
    clamp_non_negative((sum_qq - sum_q * sum_q / nf) / (nf - 1.0), "variance")
}

/// Unbiased sample covariance `(Σq₁q₂ − Σq₁Σq₂/n)/(n − 1)`; zero when `n <= 1`.
pub fn covariance(sum_q1: f64, sum_q2: f64, sum_q1q2: f64, n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let nf = n as f64;
    (sum_q1q2 - sum_q1 * sum_q2 / nf) / (nf - 1.0)
}

/// Squared correlation from pair sums.
///
/// Numerator and denominator share the factor `n(n − 1)`, so it is never
/// applied. Zero variance in either model gives zero; the result is clamped
/// to `[0, 1]`.
pub fn correlation_squared(p: &PairSums) -> f64 {
    if p.count <= 1 {
        return 0.0;
    }
    let nf = p.count as f64;
    let cov = nf * p.sum_ij - p.sum_i * p.sum_j;
    let var_i = nf * p.sum_ii - p.sum_i * p.sum_i;
    let var_j = nf * p.sum_jj - p.sum_j * p.sum_j;
    if !(var_i > 0.0) || !(var_j > 0.0) {
        return 0.0;
    }
    (cov * cov / (var_i * var_j)).clamp(0.0, 1.0)
}

/// Covariance from oriented pair sums.
pub fn pair_covariance(p: &PairSums) -> f64 {
    covariance(p.sum_i, p.sum_j, p.sum_ij, p.count)
}

/// Sample mean plus unbiased estimates of the second to fourth central moments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CentralMoments {
    pub mean: f64,
    /// Unbiased `μ₂` (the sample variance).
    pub mu2: f64,
    /// Unbiased `μ₃`.
    pub mu3: f64,
    /// Unbiased `μ₄`.
    pub mu4: f64,
}

/// Unbiased central moments (h-statistics) from power sums `[Σq, Σq², Σq³, Σq⁴]`.
///
/// Needs at least four samples.
pub fn central_moments(sums: &[f64; 4], n: usize) -> Result<CentralMoments> {
    if n < 4 {
        return Err(Error::InsufficientSamples {
            context: "fourth central moment",
            needed: 4,
            available: n,
        });
    }
    let nf = n as f64;
    let mean = sums[0] / nf;
    let (r2, r3, r4) = (sums[1] / nf, sums[2] / nf, sums[3] / nf);
    let m2 = r2 - mean * mean;
    let m3 = r3 - 3.0 * mean * r2 + 2.0 * mean.powi(3);
    let m4 = r4 - 4.0 * mean * r3 + 6.0 * mean * mean * r2 - 3.0 * mean.powi(4);

    let mu2 = clamp_non_negative(nf * m2 / (nf - 1.0), "second central moment");
    let mu3 = nf * nf * m3 / ((nf - 1.0) * (nf - 2.0));
    let mu4 = nf * ((nf * nf - 2.0 * nf + 3.0) * m4 - 3.0 * (2.0 * nf - 3.0) * m2 * m2)
        / ((nf - 1.0) * (nf - 2.0) * (nf - 3.0));
    Ok(CentralMoments {
        mean,
        mu2,
        mu3,
        mu4: clamp_non_negative(mu4, "fourth central moment"),
    })
}

/// Variance of the sample variance at `n_target` samples.
///
/// `μ₂` and `μ₄` are estimated without bias from the pilot power sums, then
/// `(N−1)/(N²−2N+3) · (μ₄ − (N−3)/(N−1)·μ₂²)` is evaluated at `N = n_target`.
/// `n_target` is continuous so the optimizer can differentiate through it.
pub fn variance_of_variance(sums: &[f64; 4], n_pilot: usize, n_target: f64) -> Result<f64> {
    let m = central_moments(sums, n_pilot)?;
    Ok(variance_of_variance_from_moments(m.mu2, m.mu4, n_target))
}

/// [`variance_of_variance`] on already estimated `μ₂`, `μ₄`.
pub fn variance_of_variance_from_moments(mu2: f64, mu4: f64, n: f64) -> f64 {
    if !(n > 1.0) {
        return f64::INFINITY;
    }
    let value = (n - 1.0) / (n * n - 2.0 * n + 3.0) * (mu4 - (n - 3.0) / (n - 1.0) * mu2 * mu2);
    clamp_non_negative(value, "variance of variance")
}

/// Variance of `Q_l − Q_{l−1}` from the two variances and their covariance.
pub fn level_discrepancy_variance(var_l: f64, cov: f64, var_lm1: f64) -> f64 {
    clamp_non_negative(var_l - 2.0 * cov + var_lm1, "level discrepancy variance")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn sums_of(xs: &[f64]) -> [f64; 4] {
        let mut s = [0.0; 4];
        for &x in xs {
            s[0] += x;
            s[1] += x * x;
            s[2] += x.powi(3);
            s[3] += x.powi(4);
        }
        s
    }

    fn pair_of(a: &[f64], b: &[f64]) -> PairSums {
        let mut p = PairSums::default();
        for (&x, &y) in a.iter().zip(b) {
            p.count += 1;
            p.sum_i += x;
            p.sum_j += y;
            p.sum_ii += x * x;
            p.sum_jj += y * y;
            p.sum_ij += x * y;
        }
        p
    }

    #[test]
    fn variance_matches_two_pass() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let s = sums_of(&xs);
        assert_relative_eq!(variance(s[0], s[1], xs.len()), 32.0 / 7.0, epsilon = 1e-12);
        assert_eq!(variance(3.0, 9.0, 1), 0.0);
        assert_eq!(variance(0.0, 0.0, 0), 0.0);
    }

    #[test]
    fn perfectly_correlated_pair() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b: Vec<f64> = a.iter().map(|x| -2.0 * x + 1.0).collect();
        let p = pair_of(&a, &b);
        assert_relative_eq!(correlation_squared(&p), 1.0, epsilon = 1e-12);
        assert_relative_eq!(pair_covariance(&p), -2.0 * 5.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_model_has_zero_correlation() {
        let p = pair_of(&[1.0, 2.0, 3.0], &[5.0, 5.0, 5.0]);
        assert_eq!(correlation_squared(&p), 0.0);
    }

    #[test]
    fn h_statistics_of_small_sample() {
        // Two-pass reference: mean 2.5, m2 = 1.25, m4 = 2.5625
        let xs = [1.0, 2.0, 3.0, 4.0];
        let m = central_moments(&sums_of(&xs), 4).unwrap();
        assert_relative_eq!(m.mean, 2.5);
        assert_relative_eq!(m.mu2, 5.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(m.mu3, 0.0, epsilon = 1e-12);
        let expect_mu4 = 4.0 * (11.0 * 2.5625 - 15.0 * 1.25 * 1.25) / 6.0;
        assert_relative_eq!(m.mu4, expect_mu4, epsilon = 1e-12);
    }

    #[test]
    fn central_moments_need_four_samples() {
        assert!(matches!(
            central_moments(&[1.0, 1.0, 1.0, 1.0], 3),
            Err(Error::InsufficientSamples { needed: 4, .. })
        ));
    }

    #[test]
    fn variance_of_variance_large_n_limit() {
        // For large N the estimator behaves like (μ₄ − μ₂²)/N.
        let (mu2, mu4) = (2.0, 15.0);
        let n = 1e6;
        let v = variance_of_variance_from_moments(mu2, mu4, n);
        assert_relative_eq!(v * n, mu4 - mu2 * mu2, max_relative = 1e-5);
    }

    #[test]
    fn variance_of_variance_decreases_with_n() {
        let xs = [0.3, -1.2, 2.2, 0.7, -0.4, 1.9, -2.5, 0.1];
        let s = sums_of(&xs);
        let a = variance_of_variance(&s, xs.len(), 10.0).unwrap();
        let b = variance_of_variance(&s, xs.len(), 100.0).unwrap();
        assert!(a > b && b > 0.0);
    }

    #[test]
    fn discrepancy_variance_is_floored() {
        assert_eq!(level_discrepancy_variance(1.0, 1.0 + 1e-12, 1.0), 0.0);
        assert_relative_eq!(level_discrepancy_variance(4.0, 1.5, 1.0), 2.0);
    }

    proptest! {
        #[test]
        fn variance_is_non_negative(xs in prop::collection::vec(-1e3f64..1e3, 2..64)) {
            let s = sums_of(&xs);
            prop_assert!(variance(s[0], s[1], xs.len()) >= 0.0);
        }

        #[test]
        fn correlation_squared_in_unit_interval(
            pairs in prop::collection::vec((-1e3f64..1e3, -1e3f64..1e3), 2..64)
        ) {
            let (a, b): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
            let r2 = correlation_squared(&pair_of(&a, &b));
            prop_assert!((0.0..=1.0).contains(&r2));
        }

        #[test]
        fn estimators_are_pure(xs in prop::collection::vec(-10f64..10.0, 4..32)) {
            let s = sums_of(&xs);
            let a = central_moments(&s, xs.len()).unwrap();
            let b = central_moments(&s, xs.len()).unwrap();
            prop_assert_eq!(a.mu4.to_bits(), b.mu4.to_bits());
            prop_assert_eq!(a.mu2.to_bits(), b.mu2.to_bits());
        }
    }
}
