//! Multilevel best linear unbiased estimator over model groups.
//!
//! Group `k` is sampled `m_k` times on independent inputs. The BLUE of all
//! model means has covariance `Ψ⁻¹` with `Ψ = Σ_k m_k P_kᵀ C_k⁻¹ P_k`, where
//! `P_k` restricts to the models of group `k` and `C_k` is their covariance.

use nalgebra::{DMatrix, DVector};

use crate::covariance::CovarianceSet;
use crate::error::{Error, Result};
use crate::topology::ModelGroup;
use crate::variance::{factor_spd, informative, DesignSpace, VarianceModel};

/// ML-BLUE over a fixed group pool. Design vector: one count per group.
#[derive(Debug, Clone)]
pub struct BlueModel {
    cov: CovarianceSet,
    groups: Vec<ModelGroup>,
    /// `[qoi][group]` inverse group covariance.
    inverses: Vec<Vec<DMatrix<f64>>>,
    /// Cost of one group sample relative to the truth cost.
    weights: Vec<f64>,
}

impl BlueModel {
    /// Invert every group covariance once; the model is then evaluated
    /// without further factorizations of the group blocks.
    pub fn new(cov: CovarianceSet, groups: Vec<ModelGroup>, costs: &[f64]) -> Result<Self> {
        let models = cov.num_approx() + 1;
        if costs.len() != models {
            return Err(Error::mismatch("model costs", models, costs.len()));
        }
        if groups.is_empty() {
            return Err(Error::Infeasible("empty group pool".into()));
        }
        if let Some(bad) = groups
            .iter()
            .flat_map(|g| g.models().iter())
            .find(|&&m| m >= models)
        {
            return Err(Error::mismatch("group model index", models, *bad));
        }
        let mut inverses = Vec::with_capacity(cov.num_qoi());
        for q in 0..cov.num_qoi() {
            let mut per_group = Vec::with_capacity(groups.len());
            for g in &groups {
                let block = cov.submatrix(q, g.models());
                let chol = factor_spd(block, "group covariance")?;
                per_group.push(chol.inverse());
            }
            inverses.push(per_group);
        }
        let c_h = costs[models - 1];
        let weights = groups.iter().map(|g| g.cost(costs) / c_h).collect();
        Ok(BlueModel {
            cov,
            groups,
            inverses,
            weights,
        })
    }

    pub fn groups(&self) -> &[ModelGroup] {
        &self.groups
    }

    /// Group sample costs in units of the truth cost.
    pub fn group_weights(&self) -> &[f64] {
        &self.weights
    }

    /// Indices of the groups that contain the truth model.
    pub fn truth_groups(&self) -> Vec<usize> {
        let truth = self.cov.truth();
        (0..self.groups.len())
            .filter(|&k| self.groups[k].contains(truth))
            .collect()
    }

    /// `[Ψ⁻¹]_HH` for `qoi`; infinite when no sampled group reaches the truth.
    pub fn variance(&self, qoi: usize, counts: &[f64]) -> Result<f64> {
        let dim = self.cov.num_approx() + 1;
        let mut psi = DMatrix::<f64>::zeros(dim, dim);
        for ((g, inv), &m) in self.groups.iter().zip(&self.inverses[qoi]).zip(counts) {
            if !(m > 0.0) {
                continue;
            }
            let idx = g.models();
            for (a, &i) in idx.iter().enumerate() {
                for (b, &j) in idx.iter().enumerate() {
                    psi[(i, j)] += m * inv[(a, b)];
                }
            }
        }
        let diag: Vec<f64> = (0..dim).map(|i| psi[(i, i)]).collect();
        let keep = informative(&diag);
        let truth = dim - 1;
        let Some(h) = keep.iter().position(|&i| i == truth) else {
            return Ok(f64::INFINITY);
        };
        let reduced = DMatrix::from_fn(keep.len(), keep.len(), |a, b| psi[(keep[a], keep[b])]);
        let chol = factor_spd(reduced, "ML-BLUE information matrix")?;
        let mut e = DVector::zeros(keep.len());
        e[h] = 1.0;
        Ok(chol.solve(&e)[h].max(0.0))
    }
}

impl VarianceModel for BlueModel {
    fn space(&self) -> DesignSpace {
        DesignSpace::Counts
    }

    fn num_variables(&self) -> usize {
        self.groups.len()
    }

    fn num_qoi(&self) -> usize {
        self.cov.num_qoi()
    }

    fn variances(&self, design: &[f64]) -> Result<Vec<f64>> {
        if design.len() != self.groups.len() {
            return Err(Error::mismatch("ML-BLUE design", self.groups.len(), design.len()));
        }
        (0..self.cov.num_qoi())
            .map(|q| self.variance(q, design))
            .collect()
    }

    fn cost(&self, design: &[f64]) -> f64 {
        design.iter().zip(&self.weights).map(|(m, w)| m * w).sum()
    }

    fn reference_variances(&self, n: f64) -> Vec<f64> {
        (0..self.cov.num_qoi())
            .map(|q| self.cov.var_h(q) / n)
            .collect()
    }

    /// Samples of the truth model: the counts of every truth-bearing group.
    fn reference(&self, design: &[f64]) -> f64 {
        self.truth_groups().iter().map(|&k| design[k]).sum()
    }
}
