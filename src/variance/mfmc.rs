//! Multifidelity Monte Carlo: a nested chain ordered by correlation with the truth.

use tracing::debug;

use crate::covariance::CovarianceSet;
use crate::error::{Error, Result};
use crate::variance::{DesignSpace, VarianceModel};

/// `R = 1 − Σ_k (1/r_{k−1} − 1/r_k) ρ²_k` along the chain, with `r_{−1} = 1`.
///
/// `rho2_chain` and `ratios_chain` are both in chain order (highest
/// correlation first). The result is clamped to `[0, 1]`.
pub fn mfmc_variance_ratio(rho2_chain: &[f64], ratios_chain: &[f64]) -> f64 {
    let mut prev = 1.0;
    let mut reduction = 0.0;
    for (&rho2, &r) in rho2_chain.iter().zip(ratios_chain) {
        if r > 0.0 {
            reduction += (1.0 / prev - 1.0 / r) * rho2;
            prev = r;
        }
    }
    (1.0 - reduction).clamp(0.0, 1.0)
}

/// Approximations ordered by decreasing squared correlation with the truth.
///
/// Ties keep the higher-fidelity (larger index) model first.
pub fn correlation_order(rho2: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rho2.len()).collect();
    order.sort_by(|&a, &b| {
        rho2[b]
            .partial_cmp(&rho2[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.cmp(&a))
    });
    order
}

/// Closed-form optimal MFMC ratios
/// `r_k = sqrt(c_H (ρ²_k − ρ²_{k+1}) / (c_k (1 − ρ²_1)))` for the chain `order`.
///
/// Returns ratios indexed by approximation, or `None` when the closed form
/// does not apply: correlations not strictly decreasing along the chain, the
/// cost condition `c_{k−1}/c_k > (ρ²_{k−1} − ρ²_k)/(ρ²_k − ρ²_{k+1})` failing,
/// or a perfectly correlated leading model.
pub fn mfmc_analytic_ratios(rho2: &[f64], costs: &[f64], order: &[usize]) -> Option<Vec<f64>> {
    let n = rho2.len();
    if order.len() != n || costs.len() != n + 1 || n == 0 {
        return None;
    }
    let c_h = costs[n];
    // chain values with the truth prepended and a zero appended
    let mut rho = Vec::with_capacity(n + 2);
    let mut cost = Vec::with_capacity(n + 1);
    rho.push(1.0);
    cost.push(c_h);
    for &i in order {
        rho.push(rho2[i]);
        cost.push(costs[i]);
    }
    rho.push(0.0);
    if rho[1] >= 1.0 {
        return None;
    }
    for k in 1..=n {
        if !(rho[k] > rho[k + 1]) {
            return None;
        }
        let lhs = cost[k - 1] / cost[k];
        let rhs = (rho[k - 1] - rho[k]) / (rho[k] - rho[k + 1]);
        if !(lhs > rhs) {
            debug!(model = order[k - 1], lhs, rhs, "MFMC cost condition fails");
            return None;
        }
    }
    let mut ratios = vec![0.0; n];
    for k in 1..=n {
        let r = (c_h * (rho[k] - rho[k + 1]) / (cost[k] * (1.0 - rho[1]))).sqrt();
        ratios[order[k - 1]] = r.max(1.0);
    }
    Some(ratios)
}

/// MFMC estimator with recursive optimal weights on a correlation-ordered chain.
///
/// Design vector: `[r_0, .., r_{n-1}, N_H]` indexed by approximation; the
/// chain order is fixed when the model is built.
#[derive(Debug, Clone)]
pub struct MfmcModel {
    cov: CovarianceSet,
    order: Vec<usize>,
    weights: Vec<f64>,
}

impl MfmcModel {
    pub fn new(cov: CovarianceSet, order: Vec<usize>, costs: &[f64]) -> Result<Self> {
        let n = cov.num_approx();
        if order.len() != n {
            return Err(Error::mismatch("MFMC chain", n, order.len()));
        }
        if costs.len() != n + 1 {
            return Err(Error::mismatch("model costs", n + 1, costs.len()));
        }
        let weights = costs[..n].iter().map(|c| c / costs[n]).collect();
        Ok(MfmcModel {
            cov,
            order,
            weights,
        })
    }

    /// Chain order, highest correlation first.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl VarianceModel for MfmcModel {
    fn space(&self) -> DesignSpace {
        DesignSpace::Ratios
    }

    fn num_variables(&self) -> usize {
        self.order.len() + 1
    }

    fn num_qoi(&self) -> usize {
        self.cov.num_qoi()
    }

    fn variances(&self, design: &[f64]) -> Result<Vec<f64>> {
        let n = self.order.len();
        if design.len() != n + 1 {
            return Err(Error::mismatch("MFMC design", n + 1, design.len()));
        }
        let ratios_chain: Vec<f64> = self.order.iter().map(|&i| design[i]).collect();
        Ok((0..self.cov.num_qoi())
            .map(|q| {
                let rho2 = self.cov.rho2_lh(q);
                let rho2_chain: Vec<f64> = self.order.iter().map(|&i| rho2[i]).collect();
                mfmc_variance_ratio(&rho2_chain, &ratios_chain) * self.cov.var_h(q) / design[n]
            })
            .collect())
    }

    fn cost(&self, design: &[f64]) -> f64 {
        let n = self.weights.len();
        design[n]
            * (1.0
                + design[..n]
                    .iter()
                    .zip(&self.weights)
                    .map(|(r, w)| r * w)
                    .sum::<f64>())
    }

    fn reference_variances(&self, n: f64) -> Vec<f64> {
        (0..self.cov.num_qoi())
            .map(|q| self.cov.var_h(q) / n)
            .collect()
    }
}
