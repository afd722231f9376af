//! Approximate control variates over a control-variate graph.
//!
//! The estimator is `Q̂_H(z_H) + Σ_i α_i (Q̂_i(z_i*) − Q̂_i(z_i))` where `z_i*`
//! is the sample set of the target of `i` and `z_i` is the set implied by the
//! [`SampleStructure`]. With optimal weights the variance is
//! `var_H/N · (1 − (f∘c)ᵀ (F∘C)⁻¹ (f∘c) / var_H)`, where
//! `g(A, B) = |A ∩ B| / (|A| |B|)` in units of `N_H`,
//! `F_ij = g(i*, j*) − g(i*, j) − g(i, j*) + g(i, j)` and
//! `f_i = g(i*, H) − g(i, H)`.

use nalgebra::{DMatrix, DVector};

use crate::covariance::CovarianceSet;
use crate::error::{Error, Result};
use crate::topology::ModelDag;
use crate::variance::{informative, spd_quadratic_form, DesignSpace, SampleStructure, VarianceModel};

/// Smallest size of an independent block, in units of `N_H`.
const MIN_BLOCK: f64 = 1e-8;

/// Sizes and overlaps of the sample sets `z_0 .. z_{n-1}` and `z_H` (index `n`).
struct SampleSets {
    sizes: Vec<f64>,
    layout: Layout,
}

enum Layout {
    /// Every set is a prefix of the same stream.
    Prefix,
    /// Every set is a union of disjoint blocks; `members[s]` is a bitmask over
    /// blocks and `blocks[b]` the block size.
    Blocks { members: Vec<u64>, blocks: Vec<f64> },
}

impl SampleSets {
    fn build(dag: &ModelDag, structure: SampleStructure, ratios: &[f64]) -> SampleSets {
        let n = dag.num_approx();
        match structure {
            SampleStructure::Nested => {
                let mut sizes = ratios.to_vec();
                sizes.push(1.0);
                SampleSets {
                    sizes,
                    layout: Layout::Prefix,
                }
            }
            SampleStructure::Independent | SampleStructure::Recursive => {
                let mut members = vec![0u64; n + 1];
                let mut blocks = vec![0.0; n + 1];
                let mut sizes = vec![0.0; n + 1];
                members[n] = 1 << n;
                blocks[n] = 1.0;
                sizes[n] = 1.0;
                for i in dag.topological_order() {
                    let t = dag.target(i);
                    let extra = ratios[i] - sizes[t];
                    if structure == SampleStructure::Independent {
                        blocks[i] = extra.max(0.0);
                        members[i] = members[t] | (1 << i);
                        sizes[i] = sizes[t] + blocks[i];
                    } else {
                        blocks[i] = extra.max(MIN_BLOCK);
                        members[i] = 1 << i;
                        sizes[i] = blocks[i];
                    }
                }
                SampleSets {
                    sizes,
                    layout: Layout::Blocks { members, blocks },
                }
            }
        }
    }

    fn intersection(&self, a: usize, b: usize) -> f64 {
        match &self.layout {
            Layout::Prefix => self.sizes[a].min(self.sizes[b]),
            Layout::Blocks { members, blocks } => {
                let common = members[a] & members[b];
                blocks
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| common & (1 << k) != 0)
                    .map(|(_, &s)| s)
                    .sum()
            }
        }
    }

    fn g(&self, a: usize, b: usize) -> f64 {
        let denom = self.sizes[a] * self.sizes[b];
        if denom > 0.0 {
            self.intersection(a, b) / denom
        } else {
            0.0
        }
    }
}

/// Ratio matrix `F` and vector `f` for `ratios` (relative to `N_H`).
pub fn ratio_matrices(
    dag: &ModelDag,
    structure: SampleStructure,
    ratios: &[f64],
) -> (DMatrix<f64>, DVector<f64>) {
    let n = dag.num_approx();
    let sets = SampleSets::build(dag, structure, ratios);
    let truth = n;
    let f_mat = DMatrix::from_fn(n, n, |i, j| {
        let (ti, tj) = (dag.target(i), dag.target(j));
        sets.g(ti, tj) - sets.g(ti, j) - sets.g(i, tj) + sets.g(i, j)
    });
    let f_vec = DVector::from_fn(n, |i, _| sets.g(dag.target(i), truth) - sets.g(i, truth));
    (f_mat, f_vec)
}

/// Variance ratio `R ∈ [0, 1]` of the optimally weighted ACV estimator for one
/// QoI of `cov`, relative to plain Monte Carlo with the same truth samples.
pub fn acv_variance_ratio(
    cov: &CovarianceSet,
    qoi: usize,
    dag: &ModelDag,
    structure: SampleStructure,
    ratios: &[f64],
) -> Result<f64> {
    let n = dag.num_approx();
    if cov.num_approx() != n {
        return Err(Error::mismatch("ACV approximations", cov.num_approx(), n));
    }
    if ratios.len() != n {
        return Err(Error::mismatch("ACV ratios", n, ratios.len()));
    }
    let var_h = cov.var_h(qoi);
    if !(var_h > 0.0) {
        return Ok(1.0);
    }
    let (f_mat, f_vec) = ratio_matrices(dag, structure, ratios);
    let c_ll = cov.cov_ll(qoi);
    let c_lh = cov.cov_lh(qoi);
    let a = f_mat.component_mul(&c_ll);
    let b = f_vec.component_mul(&c_lh);

    let diag: Vec<f64> = (0..n).map(|i| a[(i, i)]).collect();
    let keep = informative(&diag);
    if keep.is_empty() {
        return Ok(1.0);
    }
    let a_red = DMatrix::from_fn(keep.len(), keep.len(), |i, j| a[(keep[i], keep[j])]);
    let b_red = DVector::from_fn(keep.len(), |i, _| b[keep[i]]);
    if b_red.iter().all(|&v| v == 0.0) {
        return Ok(1.0);
    }
    let reduction = spd_quadratic_form(a_red, &b_red, "ACV control-variate system")?;
    Ok((1.0 - reduction / var_h).clamp(0.0, 1.0))
}

/// Optimal ratio of a single control variate: `sqrt(c_H/c_L · ρ²/(1 − ρ²))`,
/// at least one, with `cost_ratio = c_L/c_H`. Perfect correlation gives an
/// unbounded ratio.
pub fn cv_analytic_ratio(rho2: f64, cost_ratio: f64) -> f64 {
    if rho2 >= 1.0 {
        return f64::INFINITY;
    }
    if !(rho2 > 0.0) || !(cost_ratio > 0.0) {
        return 1.0;
    }
    (rho2 / ((1.0 - rho2) * cost_ratio)).sqrt().max(1.0)
}

/// ACV estimator on a fixed graph and sample structure.
///
/// Design vector: `[r_0, .., r_{n-1}, N_H]`.
#[derive(Debug, Clone)]
pub struct AcvModel {
    cov: CovarianceSet,
    dag: ModelDag,
    structure: SampleStructure,
    /// `c_i / c_H` for each approximation.
    weights: Vec<f64>,
}

impl AcvModel {
    /// `costs` has one entry per model of `cov`, truth last.
    pub fn new(
        cov: CovarianceSet,
        dag: ModelDag,
        structure: SampleStructure,
        costs: &[f64],
    ) -> Result<Self> {
        let n = cov.num_approx();
        if dag.num_approx() != n {
            return Err(Error::mismatch("control-variate graph", n, dag.num_approx()));
        }
        if costs.len() != n + 1 {
            return Err(Error::mismatch("model costs", n + 1, costs.len()));
        }
        let weights = costs[..n].iter().map(|c| c / costs[n]).collect();
        Ok(AcvModel {
            cov,
            dag,
            structure,
            weights,
        })
    }

    pub fn dag(&self) -> &ModelDag {
        &self.dag
    }

    pub fn structure(&self) -> SampleStructure {
        self.structure
    }

    /// Variance ratio `R` per QoI at `ratios`.
    pub fn variance_ratios(&self, ratios: &[f64]) -> Result<Vec<f64>> {
        (0..self.cov.num_qoi())
            .map(|q| acv_variance_ratio(&self.cov, q, &self.dag, self.structure, ratios))
            .collect()
    }
}

impl VarianceModel for AcvModel {
    fn space(&self) -> DesignSpace {
        DesignSpace::Ratios
    }

    fn num_variables(&self) -> usize {
        self.dag.num_approx() + 1
    }

    fn num_qoi(&self) -> usize {
        self.cov.num_qoi()
    }

    fn variances(&self, design: &[f64]) -> Result<Vec<f64>> {
        let n = self.dag.num_approx();
        if design.len() != n + 1 {
            return Err(Error::mismatch("ACV design", n + 1, design.len()));
        }
        let n_h = design[n];
        let ratios = self.variance_ratios(&design[..n])?;
        Ok(ratios
            .iter()
            .enumerate()
            .map(|(q, r)| r * self.cov.var_h(q) / n_h)
            .collect())
    }

    fn cost(&self, design: &[f64]) -> f64 {
        let n = self.weights.len();
        let per_truth: f64 = 1.0
            + design[..n]
                .iter()
                .zip(&self.weights)
                .map(|(r, w)| r * w)
                .sum::<f64>();
        design[n] * per_truth
    }

    fn reference_variances(&self, n: f64) -> Vec<f64> {
        (0..self.cov.num_qoi())
            .map(|q| self.cov.var_h(q) / n)
            .collect()
    }
}
