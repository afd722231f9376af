//! Allocation results.

use crate::allocation::strategy::{EstimatorKind, Topology};

/// One solved allocation. Built once, read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolutionData {
    kind: EstimatorKind,
    topology: Topology,
    /// Raw sample counts per model, level or group (fractional).
    counts: Vec<f64>,
    reference: f64,
    variances: Vec<f64>,
    variance_ratios: Vec<f64>,
    metric: f64,
    equivalent_cost: f64,
}

impl SolutionData {
    /// `reference_variances[q]` is the plain Monte Carlo variance with
    /// `reference` truth samples; it turns `variances` into ratios.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: EstimatorKind,
        topology: Topology,
        counts: Vec<f64>,
        reference: f64,
        variances: Vec<f64>,
        reference_variances: &[f64],
        metric: f64,
        equivalent_cost: f64,
    ) -> Self {
        let variance_ratios = variances
            .iter()
            .zip(reference_variances)
            .map(|(v, r)| if *r > 0.0 { v / r } else { 1.0 })
            .collect();
        SolutionData {
            kind,
            topology,
            counts,
            reference,
            variances,
            variance_ratios,
            metric,
            equivalent_cost,
        }
    }

    pub fn kind(&self) -> EstimatorKind {
        self.kind
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Sample counts per model (ratio designs, truth last), per level (MLMC)
    /// or per group (ML-BLUE).
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// `counts / reference`.
    pub fn solution_ratios(&self) -> Vec<f64> {
        if self.reference > 0.0 {
            self.counts.iter().map(|c| c / self.reference).collect()
        } else {
            vec![0.0; self.counts.len()]
        }
    }

    /// Truth samples for ratio designs, the finest level for MLMC, the
    /// truth-bearing group total for ML-BLUE.
    pub fn solution_reference(&self) -> f64 {
        self.reference
    }

    /// Estimator variance per QoI.
    pub fn estimator_variances(&self) -> &[f64] {
        &self.variances
    }

    /// Estimator variance relative to plain Monte Carlo with the reference
    /// number of truth samples, per QoI.
    pub fn variance_ratios(&self) -> &[f64] {
        &self.variance_ratios
    }

    /// Reduced scalar merit of the estimator variances.
    pub fn metric(&self) -> f64 {
        self.metric
    }

    /// Cost in equivalent truth-model evaluations.
    pub fn equivalent_cost(&self) -> f64 {
        self.equivalent_cost
    }
}
