//! Study configuration.
//!
//! A [`Config`] is plain data: construct it with struct-update syntax over
//! [`Config::default`] and call [`Config::validate`] (the driver does this
//! too) before running.

use crate::allocation::EstimatorKind;
use crate::error::{Error, Result};
use crate::topology::{DagLimits, GroupPool, GroupThrottle, MAX_DAG_APPROX};

/// Pilot sample sizes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PilotSamples {
    /// The same count for every pilot group.
    Uniform(usize),
    /// One count per pilot group (per level for multilevel estimators).
    PerGroup(Vec<usize>),
}

impl PilotSamples {
    /// Pilot size for group `g`.
    pub fn for_group(&self, g: usize) -> usize {
        match self {
            PilotSamples::Uniform(n) => *n,
            PilotSamples::PerGroup(v) => v.get(g).copied().unwrap_or(0),
        }
    }

    fn min(&self) -> usize {
        match self {
            PilotSamples::Uniform(n) => *n,
            PilotSamples::PerGroup(v) => v.iter().copied().min().unwrap_or(0),
        }
    }
}

/// Which side of the cost/accuracy trade-off is optimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Formulation {
    /// Minimize the variance metric subject to `cost <= budget`.
    MinimizeVariance,
    /// Minimize cost subject to `metric <= target accuracy`.
    MinimizeCost,
}

/// How `convergence_tol` is turned into an accuracy target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ToleranceKind {
    /// Fraction of the plain Monte Carlo variance at the pilot sample size.
    Relative,
    /// Absolute estimator variance.
    Absolute,
}

/// Statistic whose estimator variance is minimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Statistic {
    #[default]
    Mean,
    /// The variance of the truth response; multilevel estimators only.
    Variance,
}

/// Reduction of per-QoI estimator variances to one scalar.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MetricReduction {
    #[default]
    Average,
    /// Worst case over QoIs.
    Max,
    /// `(Σ v^p)^(1/p)`.
    PNorm(f64),
}

impl MetricReduction {
    /// Reduce `values` to the scalar merit. Empty input reduces to zero.
    pub fn reduce(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match *self {
            MetricReduction::Average => values.iter().sum::<f64>() / values.len() as f64,
            MetricReduction::Max => values.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v)),
            MetricReduction::PNorm(p) => {
                // Factor out the largest magnitude so large p does not overflow.
                let scale = values.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
                if scale == 0.0 || !scale.is_finite() {
                    return scale;
                }
                let s: f64 = values.iter().map(|&v| (v.abs() / scale).powf(p)).sum();
                scale * s.powf(1.0 / p)
            }
        }
    }
}

/// Relaxation applied to sample increments.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Relaxation {
    /// Always take the full increment.
    #[default]
    None,
    /// Factor for iteration `k` is `factors[min(k, len - 1)]`.
    Fixed(Vec<f64>),
    /// `f_0 = initial`, then `f ← f + (1 − f)·damping`.
    Recursive { initial: f64, damping: f64 },
}

/// Subproblem solver used by the augmented-Lagrangian allocation solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OptimizerBackend {
    #[default]
    Lbfgs,
    TrustRegion,
    Newton,
    NelderMead,
}

impl From<OptimizerBackend> for fidelis_optim::Backend {
    fn from(b: OptimizerBackend) -> Self {
        match b {
            OptimizerBackend::Lbfgs => fidelis_optim::Backend::Lbfgs,
            OptimizerBackend::TrustRegion => fidelis_optim::Backend::TrustRegion,
            OptimizerBackend::Newton => fidelis_optim::Backend::Newton,
            OptimizerBackend::NelderMead => fidelis_optim::Backend::NelderMead,
        }
    }
}

/// Everything the allocation loop needs besides the models themselves.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    pub estimator: EstimatorKind,
    pub statistic: Statistic,
    pub pilot: PilotSamples,
    pub formulation: Formulation,
    /// Accuracy target for [`Formulation::MinimizeCost`], interpreted per `tolerance`.
    pub convergence_tol: f64,
    pub tolerance: ToleranceKind,
    /// Budget in equivalent truth evaluations. Required for
    /// [`Formulation::MinimizeVariance`]; caps spending otherwise.
    pub budget: Option<f64>,
    pub relaxation: Relaxation,
    pub metric: MetricReduction,
    pub backend: OptimizerBackend,
    /// Online iterations after the pilot (zero means pilot only).
    pub max_iterations: usize,
    pub dag: DagLimits,
    /// Search over subsets of the approximations as well as over DAGs.
    pub model_selection: bool,
    pub group_pool: GroupPool,
    pub group_throttle: Option<GroupThrottle>,
    /// Largest constraint value accepted from the optimizer.
    pub constraint_tol: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            estimator: EstimatorKind::AcvMf,
            statistic: Statistic::Mean,
            pilot: PilotSamples::Uniform(100),
            formulation: Formulation::MinimizeVariance,
            convergence_tol: 1e-2,
            tolerance: ToleranceKind::Relative,
            budget: None,
            relaxation: Relaxation::None,
            metric: MetricReduction::Average,
            backend: OptimizerBackend::Lbfgs,
            max_iterations: 10,
            dag: DagLimits::default(),
            model_selection: false,
            group_pool: GroupPool::Pyramid,
            group_throttle: None,
            constraint_tol: 1e-6,
        }
    }
}

impl Config {
    /// Check settings that are inconsistent regardless of the model ensemble.
    pub fn validate(&self) -> Result<()> {
        let min_pilot = match self.statistic {
            Statistic::Mean => 2,
            Statistic::Variance => 4,
        };
        if self.pilot.min() < min_pilot {
            return Err(Error::config(format!(
                "pilot sample size must be at least {min_pilot}"
            )));
        }
        if !(self.convergence_tol > 0.0) || !self.convergence_tol.is_finite() {
            return Err(Error::config("convergence tolerance must be positive and finite"));
        }
        if !(self.constraint_tol > 0.0) {
            return Err(Error::config("constraint tolerance must be positive"));
        }
        match self.budget {
            Some(b) if !(b > 0.0) || !b.is_finite() => {
                return Err(Error::config("budget must be positive and finite"));
            }
            None if self.formulation == Formulation::MinimizeVariance => {
                return Err(Error::config(
                    "variance minimization needs a budget in equivalent truth evaluations",
                ));
            }
            _ => {}
        }
        match &self.relaxation {
            Relaxation::None => {}
            Relaxation::Fixed(factors) => {
                if factors.is_empty() {
                    return Err(Error::config("fixed relaxation sequence is empty"));
                }
                if factors.iter().any(|&f| !(f > 0.0 && f <= 1.0)) {
                    return Err(Error::config("relaxation factors must lie in (0, 1]"));
                }
            }
            Relaxation::Recursive { initial, damping } => {
                if !(*initial > 0.0 && *initial <= 1.0) {
                    return Err(Error::config("initial relaxation must lie in (0, 1]"));
                }
                if !(*damping >= 0.0 && *damping <= 1.0) {
                    return Err(Error::config("relaxation damping must lie in [0, 1]"));
                }
            }
        }
        if let MetricReduction::PNorm(p) = self.metric {
            if !(p >= 1.0) || !p.is_finite() {
                return Err(Error::config("p-norm metric needs a finite p >= 1"));
            }
        }
        if self.dag.max_depth == 0 || self.dag.max_width == 0 {
            return Err(Error::config("DAG depth and width limits must be at least 1"));
        }
        if let Some(t) = &self.group_throttle {
            if t.limit == 0 {
                return Err(Error::config("group throttle limit must be at least 1"));
            }
        }
        if self.statistic == Statistic::Variance && self.estimator != EstimatorKind::Mlmc {
            return Err(Error::config(
                "variance as the target statistic is only supported by MLMC",
            ));
        }
        if let GroupPool::Custom(groups) = &self.group_pool {
            if groups.is_empty() || groups.iter().any(|g| g.is_empty()) {
                return Err(Error::config("custom group pool contains an empty group"));
            }
        }
        Ok(())
    }

    /// Check the configuration against an ensemble of `costs.len()` models,
    /// the last one being the truth model.
    pub fn validate_for(&self, costs: &[f64]) -> Result<()> {
        self.validate()?;
        if costs.len() < 2 {
            return Err(Error::config(
                "an ensemble needs at least one approximation and the truth model",
            ));
        }
        if costs.iter().any(|&c| !(c > 0.0) || !c.is_finite()) {
            return Err(Error::config("model costs must be positive and finite"));
        }
        let num_approx = costs.len() - 1;
        if self.estimator == EstimatorKind::Cvmc && num_approx != 1 {
            return Err(Error::config(format!(
                "CVMC takes exactly one approximation, found {num_approx}"
            )));
        }
        if let PilotSamples::PerGroup(v) = &self.pilot {
            let expected = self.estimator.num_pilot_groups(num_approx);
            if v.len() != expected {
                return Err(Error::mismatch("pilot sample sizes", expected, v.len()));
            }
        }
        if let GroupPool::Custom(groups) = &self.group_pool {
            if groups.iter().flatten().any(|&m| m > num_approx) {
                return Err(Error::config("custom group refers to an unknown model"));
            }
        }
        match self.estimator {
            EstimatorKind::GenAcv(_) if num_approx > MAX_DAG_APPROX => {
                return Err(Error::config(format!(
                    "GenACV searches at most {MAX_DAG_APPROX} approximations, found {num_approx}"
                )));
            }
            EstimatorKind::MlBlue => {
                self.group_pool.groups(num_approx)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn nlp_config(&self) -> fidelis_optim::NlpConfig<f64> {
        let mut nlp = fidelis_optim::NlpConfig::default().with_backend(self.backend.into());
        nlp.constraint_tol = self.constraint_tol * 0.1;
        nlp
    }
}
