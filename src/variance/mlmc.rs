//! Multilevel Monte Carlo over the telescoping sum `Q_L = Σ_l E[Q_l − Q_{l−1}]`.
//!
//! Level `l` pairs model `l` with model `l − 1` on shared inputs (level 0 is
//! model 0 alone), so a level sample costs `c_l + c_{l−1}`.

use crate::config::Statistic;
use crate::covariance::LevelStatistics;
use crate::error::{Error, Result};
use crate::statistics::variance_of_variance_from_moments;
use crate::variance::{DesignSpace, VarianceModel};

/// Cost of one sample of each level: `c_0`, then `c_l + c_{l−1}`.
pub fn level_costs(costs: &[f64]) -> Vec<f64> {
    costs
        .iter()
        .enumerate()
        .map(|(l, &c)| if l == 0 { c } else { c + costs[l - 1] })
        .collect()
}

fn sqrt_products(variances: &[f64], level_costs: &[f64]) -> f64 {
    variances
        .iter()
        .zip(level_costs)
        .map(|(v, c)| (v * c).sqrt())
        .sum()
}

/// Counts minimizing `Σ V_l/N_l` subject to `Σ N_l C_l = budget`:
/// `N_l = budget · sqrt(V_l/C_l) / Σ_k sqrt(V_k C_k)`.
///
/// `level_costs` and `budget` must share a unit.
pub fn mlmc_budget_allocation(variances: &[f64], level_costs: &[f64], budget: f64) -> Vec<f64> {
    let total = sqrt_products(variances, level_costs);
    if !(total > 0.0) {
        return vec![0.0; variances.len()];
    }
    variances
        .iter()
        .zip(level_costs)
        .map(|(v, c)| budget * (v / c).sqrt() / total)
        .collect()
}

/// Counts minimizing cost subject to `Σ V_l/N_l = target`:
/// `N_l = sqrt(V_l/C_l) · Σ_k sqrt(V_k C_k) / target`.
pub fn mlmc_accuracy_allocation(variances: &[f64], level_costs: &[f64], target: f64) -> Vec<f64> {
    let total = sqrt_products(variances, level_costs);
    variances
        .iter()
        .zip(level_costs)
        .map(|(v, c)| (v / c).sqrt() * total / target)
        .collect()
}

/// MLMC estimator of the mean (or of the variance) of the truth model.
///
/// Design vector: one sample count per level.
#[derive(Debug, Clone)]
pub struct MlmcModel {
    levels: LevelStatistics,
    /// Level costs relative to the truth cost.
    weights: Vec<f64>,
    statistic: Statistic,
    /// Variance of the truth response per QoI.
    var_h: Vec<f64>,
}

impl MlmcModel {
    pub fn new(
        levels: LevelStatistics,
        costs: &[f64],
        statistic: Statistic,
        var_h: Vec<f64>,
    ) -> Result<Self> {
        if costs.len() != levels.num_levels() {
            return Err(Error::mismatch("level costs", levels.num_levels(), costs.len()));
        }
        if var_h.len() != levels.num_qoi() {
            return Err(Error::mismatch("truth variances", levels.num_qoi(), var_h.len()));
        }
        if statistic == Statistic::Variance {
            for q in 0..levels.num_qoi() {
                let missing = (0..levels.num_levels()).any(|l| levels.moments(l, q).is_none())
                    || levels.truth_moments(q).is_none();
                if missing {
                    return Err(Error::InsufficientSamples {
                        context: "fourth moments for the variance statistic",
                        needed: 4,
                        available: levels.count(0, q),
                    });
                }
            }
        }
        let c_h = costs[costs.len() - 1];
        let weights = level_costs(costs).iter().map(|c| c / c_h).collect();
        Ok(MlmcModel {
            levels,
            weights,
            statistic,
            var_h,
        })
    }

    pub fn levels(&self) -> &LevelStatistics {
        &self.levels
    }

    /// Level costs in units of the truth cost.
    pub fn level_weights(&self) -> &[f64] {
        &self.weights
    }

    /// `V_l` averaged over QoIs, per level.
    pub fn mean_level_variances(&self) -> Vec<f64> {
        let nq = self.levels.num_qoi() as f64;
        (0..self.levels.num_levels())
            .map(|l| {
                (0..self.levels.num_qoi())
                    .map(|q| self.levels.variance(l, q))
                    .sum::<f64>()
                    / nq
            })
            .collect()
    }

    pub fn statistic(&self) -> Statistic {
        self.statistic
    }
}

impl VarianceModel for MlmcModel {
    fn space(&self) -> DesignSpace {
        DesignSpace::Counts
    }

    fn num_variables(&self) -> usize {
        self.levels.num_levels()
    }

    fn num_qoi(&self) -> usize {
        self.levels.num_qoi()
    }

    fn variances(&self, design: &[f64]) -> Result<Vec<f64>> {
        let levels = self.levels.num_levels();
        if design.len() != levels {
            return Err(Error::mismatch("MLMC design", levels, design.len()));
        }
        (0..self.levels.num_qoi())
            .map(|q| {
                let mut total = 0.0;
                for (l, &n) in design.iter().enumerate() {
                    total += match self.statistic {
                        Statistic::Mean => {
                            let v = self.levels.variance(l, q);
                            if v == 0.0 {
                                0.0
                            } else {
                                v / n
                            }
                        }
                        Statistic::Variance => {
                            let m = self.levels.moments(l, q).ok_or(
                                Error::InsufficientSamples {
                                    context: "level fourth moment",
                                    needed: 4,
                                    available: self.levels.count(l, q),
                                },
                            )?;
                            variance_of_variance_from_moments(m.mu2, m.mu4, n)
                        }
                    };
                }
                Ok(total)
            })
            .collect()
    }

    fn cost(&self, design: &[f64]) -> f64 {
        design.iter().zip(&self.weights).map(|(n, w)| n * w).sum()
    }

    fn reference_variances(&self, n: f64) -> Vec<f64> {
        (0..self.levels.num_qoi())
            .map(|q| match (self.statistic, self.levels.truth_moments(q)) {
                (Statistic::Variance, Some(m)) => variance_of_variance_from_moments(m.mu2, m.mu4, n),
                _ => self.var_h[q] / n,
            })
            .collect()
    }
}
