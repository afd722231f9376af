//! Estimator-variance models.
//!
//! A [`VarianceModel`] maps a trial design (sample ratios plus a reference
//! count, or raw counts per level or group) to per-QoI estimator variances and
//! an equivalent truth-model cost. Every model owns a read-only copy of the
//! statistics it was built from, so the optimizer can evaluate it freely.

pub mod acv;
pub mod blue;
pub mod mfmc;
pub mod mlmc;

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use tracing::warn;

use crate::error::{Error, Result};

pub use acv::{cv_analytic_ratio, AcvModel};
pub use blue::BlueModel;
pub use mfmc::{mfmc_analytic_ratios, mfmc_variance_ratio, MfmcModel};
pub use mlmc::{level_costs, mlmc_accuracy_allocation, mlmc_budget_allocation, MlmcModel};

/// Diagonal shifts tried before a system is declared singular.
pub const MAX_NUDGES: usize = 6;

/// How the sample sets of a control variate relate to those of its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleStructure {
    /// Nested prefixes of one shared input stream (MF).
    Nested,
    /// The target's inputs plus an independent extension (IS).
    Independent,
    /// A disjoint set of inputs per control variate (RD).
    Recursive,
}

/// Shape of a design vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesignSpace {
    /// `[r_0, .., r_{n-1}, N_H]`: ratios to the truth sample count, then that count.
    Ratios,
    /// One raw sample count per level or group.
    Counts,
}

impl DesignSpace {
    /// Multiply every sample count implied by `design` by `factor`.
    pub fn scaled(self, design: &[f64], factor: f64) -> Vec<f64> {
        let mut out = design.to_vec();
        match self {
            DesignSpace::Ratios => {
                if let Some(last) = out.last_mut() {
                    *last *= factor;
                }
            }
            DesignSpace::Counts => out.iter_mut().for_each(|v| *v *= factor),
        }
        out
    }
}

/// Estimator variance and cost of one estimator over one sampling topology.
pub trait VarianceModel {
    fn space(&self) -> DesignSpace;

    /// Length of a design vector.
    fn num_variables(&self) -> usize;

    fn num_qoi(&self) -> usize;

    /// Estimator variance per QoI at `design`.
    fn variances(&self, design: &[f64]) -> Result<Vec<f64>>;

    /// Cost of `design` in equivalent truth-model evaluations.
    fn cost(&self, design: &[f64]) -> f64;

    /// Plain Monte Carlo variance per QoI with `n` truth samples.
    fn reference_variances(&self, n: f64) -> Vec<f64>;

    /// Raw sample counts (per model, level or group) implied by `design`.
    fn counts(&self, design: &[f64]) -> Vec<f64> {
        match self.space() {
            DesignSpace::Ratios => {
                let n = design.last().copied().unwrap_or(0.0);
                let mut out: Vec<f64> = design[..design.len().saturating_sub(1)]
                    .iter()
                    .map(|r| r * n)
                    .collect();
                out.push(n);
                out
            }
            DesignSpace::Counts => design.to_vec(),
        }
    }

    /// Reference sample count of `design` (the count ratios are taken against).
    fn reference(&self, design: &[f64]) -> f64 {
        design.last().copied().unwrap_or(0.0)
    }
}

/// Cholesky factor of a symmetric positive (semi)definite matrix, shifting the
/// diagonal by a growing jitter until the factorization succeeds.
pub(crate) fn factor_spd(a: DMatrix<f64>, context: &'static str) -> Result<Cholesky<f64, Dyn>> {
    if a.iter().any(|v| !v.is_finite()) {
        return Err(Error::SingularSystem {
            context,
            attempts: 0,
        });
    }
    if let Some(chol) = Cholesky::new(a.clone()) {
        return Ok(chol);
    }
    let n = a.nrows().max(1);
    let mean_diag = a.trace() / n as f64;
    let scale = if mean_diag > 0.0 { mean_diag } else { 1.0 };
    let mut jitter = 1e-10 * scale;
    for attempt in 1..=MAX_NUDGES {
        let mut shifted = a.clone();
        for i in 0..shifted.nrows() {
            shifted[(i, i)] += jitter;
        }
        if let Some(chol) = Cholesky::new(shifted) {
            warn!(context, attempt, jitter, "system matrix nudged");
            return Ok(chol);
        }
        jitter *= 100.0;
    }
    Err(Error::SingularSystem {
        context,
        attempts: MAX_NUDGES,
    })
}

/// `bᵀ A⁻¹ b` for symmetric positive semidefinite `A`.
pub(crate) fn spd_quadratic_form(
    a: DMatrix<f64>,
    b: &DVector<f64>,
    context: &'static str,
) -> Result<f64> {
    let chol = factor_spd(a, context)?;
    Ok(b.dot(&chol.solve(b)))
}

/// Indices `i` with `diag[i] > tol · max(diag)`; the rest carry no information.
pub(crate) fn informative(diag: &[f64]) -> Vec<usize> {
    let scale = diag.iter().fold(0.0_f64, |m, &v| m.max(v));
    if !(scale > 0.0) {
        return Vec::new();
    }
    let tol = 1e-12 * scale;
    (0..diag.len()).filter(|&i| diag[i] > tol).collect()
}
