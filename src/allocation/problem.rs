//! The allocation problem as a smooth NLP in log-sample space.
//!
//! Variables are `x = ln(design)`, which keeps every count positive and turns
//! ordering and existing-sample constraints into linear ones.

use fidelis_optim::{Bounds, NlpProblem};

use crate::allocation::Goal;
use crate::config::MetricReduction;
use crate::error::{Error, Result};
use crate::variance::VarianceModel;

/// Smallest metric value fed to a logarithm.
const METRIC_FLOOR: f64 = 1e-300;

/// Weight on the summed constraint violation when ranking starting points.
const PENALTY_WEIGHT: f64 = 1e3;

/// A constraint `value(x) <= 0` on log variables, beyond the goal constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// `Σ coef·x_i + offset <= 0`.
    LogLinear {
        terms: Vec<(usize, f64)>,
        offset: f64,
    },
    /// `Σ_{i ∈ vars} exp(x_i) >= min`, evaluated as `ln(min) − ln(Σ)`.
    Coverage { vars: Vec<usize>, min: f64 },
}

impl Constraint {
    /// `x_low − x_high <= 0`, i.e. `design[high] >= design[low]`.
    pub fn ordering(high: usize, low: usize) -> Self {
        Constraint::LogLinear {
            terms: vec![(low, 1.0), (high, -1.0)],
            offset: 0.0,
        }
    }

    pub fn value(&self, x: &[f64]) -> f64 {
        match self {
            Constraint::LogLinear { terms, offset } => {
                terms.iter().map(|&(i, c)| c * x[i]).sum::<f64>() + offset
            }
            Constraint::Coverage { vars, min } => {
                let total: f64 = vars.iter().map(|&i| x[i].exp()).sum();
                if total > 0.0 {
                    min.ln() - total.ln()
                } else {
                    f64::INFINITY
                }
            }
        }
    }
}

/// Bounds and extra constraints of one topology, in log space.
#[derive(Debug, Clone)]
pub struct ConstraintSet {
    pub bounds: Bounds<f64>,
    pub constraints: Vec<Constraint>,
}

/// Estimator variances, merit and cost of one design.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub variances: Vec<f64>,
    pub metric: f64,
    pub cost: f64,
}

/// NLP view of a variance model under a goal.
///
/// Errors raised by the model inside optimizer callbacks are kept and the
/// callback reports an infinite value; [`take_failure`](Self::take_failure)
/// hands the first error back once the optimizer returns.
pub struct AllocationProblem<'m> {
    model: &'m dyn VarianceModel,
    goal: Goal,
    metric: MetricReduction,
    constraints: Vec<Constraint>,
    failure: Option<Error>,
}

impl<'m> AllocationProblem<'m> {
    pub fn new(
        model: &'m dyn VarianceModel,
        goal: Goal,
        metric: MetricReduction,
        constraints: Vec<Constraint>,
    ) -> Self {
        AllocationProblem {
            model,
            goal,
            metric,
            constraints,
            failure: None,
        }
    }

    /// Evaluate a design on the natural scale.
    pub fn evaluate(&self, design: &[f64]) -> Result<Evaluation> {
        let variances = self.model.variances(design)?;
        let metric = self.metric.reduce(&variances);
        Ok(Evaluation {
            variances,
            metric,
            cost: self.model.cost(design),
        })
    }

    fn evaluate_log(&mut self, x: &[f64]) -> Option<Evaluation> {
        let design: Vec<f64> = x.iter().map(|v| v.exp()).collect();
        match self.evaluate(&design) {
            Ok(e) => Some(e),
            Err(e) => {
                if self.failure.is_none() {
                    self.failure = Some(e);
                }
                None
            }
        }
    }

    fn objective_of(&self, e: &Evaluation) -> f64 {
        match self.goal {
            Goal::Budget(_) => e.metric.max(METRIC_FLOOR).ln(),
            Goal::Accuracy(_) => e.cost.ln(),
        }
    }

    fn goal_constraint(&self, e: &Evaluation) -> f64 {
        match self.goal {
            Goal::Budget(budget) => e.cost / budget - 1.0,
            Goal::Accuracy(target) => e.metric.max(METRIC_FLOOR).ln() - target.ln(),
        }
    }

    /// Objective plus a weighted sum of constraint violations.
    pub fn penalized_merit(&mut self, x: &[f64]) -> f64 {
        let Some(e) = self.evaluate_log(x) else {
            return f64::INFINITY;
        };
        let violation: f64 = std::iter::once(self.goal_constraint(&e))
            .chain(self.constraints.iter().map(|c| c.value(x)))
            .map(|v| v.max(0.0))
            .sum();
        self.objective_of(&e) + PENALTY_WEIGHT * violation
    }

    /// Whether `x` satisfies `bounds` and every constraint within `tol`.
    pub fn is_feasible(&mut self, x: &[f64], bounds: &Bounds<f64>, tol: f64) -> bool {
        if bounds.violation(x) > tol {
            return false;
        }
        let c = self.constraints(x);
        c.iter().all(|&v| v <= tol)
    }

    /// Objective at `x`, or `None` when the model failed.
    pub fn objective_value(&mut self, x: &[f64]) -> Option<f64> {
        self.evaluate_log(x).map(|e| self.objective_of(&e))
    }

    /// The first model error raised during optimization, if any.
    pub fn take_failure(&mut self) -> Option<Error> {
        self.failure.take()
    }
}

impl NlpProblem<f64> for AllocationProblem<'_> {
    fn dim(&self) -> usize {
        self.model.num_variables()
    }

    fn num_constraints(&self) -> usize {
        1 + self.constraints.len()
    }

    fn objective(&mut self, x: &[f64]) -> f64 {
        self.objective_value(x).unwrap_or(f64::INFINITY)
    }

    fn constraints(&mut self, x: &[f64]) -> Vec<f64> {
        let goal = match self.evaluate_log(x) {
            Some(e) => self.goal_constraint(&e),
            None => f64::INFINITY,
        };
        std::iter::once(goal)
            .chain(self.constraints.iter().map(|c| c.value(x)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::LevelStatistics;
    use crate::config::Statistic;
    use crate::variance::MlmcModel;
    use approx::assert_relative_eq;

    fn two_level() -> MlmcModel {
        let levels = LevelStatistics::from_variances(vec![vec![4.0], vec![1.0]]).unwrap();
        MlmcModel::new(levels, &[1.0, 3.0], Statistic::Mean, vec![2.0]).unwrap()
    }

    #[test]
    fn linear_and_coverage_constraints() {
        let order = Constraint::ordering(1, 0);
        assert_eq!(order.value(&[2.0, 3.0]), -1.0);
        let cover = Constraint::Coverage {
            vars: vec![0, 1],
            min: 4.0,
        };
        let x = [1.0_f64.ln(), 1.0_f64.ln()];
        assert_relative_eq!(cover.value(&x), 2.0_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn budget_problem_values() {
        let model = two_level();
        let mut p = AllocationProblem::new(&model, Goal::Budget(10.0), MetricReduction::Average, vec![]);
        let x = [20.0_f64.ln(), 2.0_f64.ln()];
        // variance 4/20 + 1/2, cost (20·1 + 2·4)/3
        assert_relative_eq!(p.objective(&x), 0.7_f64.ln(), epsilon = 1e-12);
        let c = p.constraints(&x);
        assert_relative_eq!(c[0], 28.0 / 3.0 / 10.0 - 1.0, epsilon = 1e-12);
        let bounds = Bounds::new(vec![0.0, 0.0], vec![f64::INFINITY, f64::INFINITY]);
        assert!(p.is_feasible(&x, &bounds, 1e-9));
    }

    #[test]
    fn accuracy_problem_penalizes_misses() {
        let model = two_level();
        let mut p =
            AllocationProblem::new(&model, Goal::Accuracy(0.1), MetricReduction::Average, vec![]);
        let tight = [100.0_f64.ln(), 20.0_f64.ln()];
        let loose = [10.0_f64.ln(), 2.0_f64.ln()];
        assert!(p.penalized_merit(&tight) < p.penalized_merit(&loose));
    }

    #[test]
    fn model_errors_are_kept() {
        let model = two_level();
        let mut p = AllocationProblem::new(&model, Goal::Budget(1.0), MetricReduction::Average, vec![]);
        assert!(p.objective(&[0.0]).is_infinite());
        assert!(matches!(p.take_failure(), Some(Error::DimensionMismatch { .. })));
        assert!(p.take_failure().is_none());
    }
}
