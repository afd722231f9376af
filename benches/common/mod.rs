#![allow(dead_code)]

use nalgebra::DMatrix;

// ─── Synthetic ensembles ───────────────────────────────────────────────────
// Approximation i is the truth plus independent noise of variance
// 0.05·2^(n-1-i), and costs 10^(i-n+1) truth evaluations.

pub fn ensemble_covariance(num_models: usize) -> DMatrix<f64> {
    let truth = num_models - 1;
    DMatrix::from_fn(num_models, num_models, |i, j| {
        if i == j && i != truth {
            1.0 + 0.05 * 2.0_f64.powi((truth - i) as i32)
        } else {
            1.0
        }
    })
}

pub fn ensemble_costs(num_models: usize) -> Vec<f64> {
    let truth = num_models as i32 - 1;
    (0..num_models as i32)
        .map(|i| 10.0_f64.powi(i - truth))
        .collect()
}

pub fn ensemble_ratios(num_approx: usize) -> Vec<f64> {
    (0..num_approx)
        .map(|i| 2.0 * (num_approx - i) as f64 + 1.0)
        .collect()
}
