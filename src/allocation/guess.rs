//! Starting designs for the allocation solve.

use crate::allocation::Goal;
use crate::config::MetricReduction;
use crate::error::Result;
use crate::topology::ModelDag;
use crate::variance::{cv_analytic_ratio, VarianceModel};

/// Largest evaluation ratio a heuristic will propose.
pub const MAX_RATIO: f64 = 1e8;

/// Smallest per-group count used for group designs.
pub const MIN_GROUP_SAMPLES: f64 = 1e-2;

/// A candidate design. `exact` marks closed-form optima that need no
/// numerical refinement when they satisfy the constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct Guess {
    pub design: Vec<f64>,
    pub exact: bool,
    pub label: &'static str,
}

impl Guess {
    pub fn heuristic(design: Vec<f64>, label: &'static str) -> Self {
        Guess {
            design,
            exact: false,
            label,
        }
    }
}

/// Raise ratios so every model is sampled at least as often as its target
/// (and at least once per truth sample).
pub fn enforce_ordering(ratios: &mut [f64], dag: &ModelDag) {
    let truth = dag.truth();
    for i in dag.topological_order() {
        let t = dag.target(i);
        let floor = if t == truth { 1.0 } else { ratios[t] };
        if !(ratios[i] >= floor) {
            ratios[i] = floor;
        }
        ratios[i] = ratios[i].min(MAX_RATIO);
    }
}

/// Each approximation treated as the only control variate of the truth.
///
/// `weights[i]` is `c_i / c_H`.
pub fn pairwise_cv_ratios(rho2: &[f64], weights: &[f64]) -> Vec<f64> {
    rho2.iter()
        .zip(weights)
        .map(|(&r, &w)| cv_analytic_ratio(r, w).min(MAX_RATIO))
        .collect()
}

/// Append a unit truth count to `ratios`.
pub fn ratio_design(mut ratios: Vec<f64>) -> Vec<f64> {
    ratios.push(1.0);
    ratios
}

/// Rescale `design` so it spends the budget or meets the accuracy target.
///
/// Estimator variances scale as `1/N` in the sample counts, so one
/// multiplicative factor suffices. Degenerate factors leave the design as is.
pub fn fit_to_goal(
    model: &dyn VarianceModel,
    design: &[f64],
    goal: Goal,
    metric: MetricReduction,
) -> Result<Vec<f64>> {
    let factor = match goal {
        Goal::Budget(budget) => budget / model.cost(design),
        Goal::Accuracy(target) => metric.reduce(&model.variances(design)?) / target,
    };
    if !(factor.is_finite() && factor > 0.0) {
        return Ok(design.to_vec());
    }
    Ok(model.space().scaled(design, factor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Statistic;
    use crate::covariance::LevelStatistics;
    use crate::variance::MlmcModel;
    use approx::assert_relative_eq;

    #[test]
    fn ordering_follows_targets() {
        // 0 → 1 → truth
        let dag = ModelDag::hierarchy(2);
        let mut r = vec![3.0, 5.0];
        enforce_ordering(&mut r, &dag);
        assert_eq!(r, vec![5.0, 5.0]);

        let mut r = vec![0.5, f64::NAN];
        enforce_ordering(&mut r, &ModelDag::all_to_truth(2));
        assert_eq!(r, vec![1.0, 1.0]);
    }

    #[test]
    fn pairwise_ratios_are_capped() {
        let r = pairwise_cv_ratios(&[1.0, 0.0, 0.9], &[0.1, 0.1, 0.1]);
        assert_eq!(r[0], MAX_RATIO);
        assert_eq!(r[1], 1.0);
        assert_relative_eq!(r[2], 90.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn fitting_hits_budget_and_target() {
        let levels = LevelStatistics::from_variances(vec![vec![4.0], vec![1.0]]).unwrap();
        let model = MlmcModel::new(levels, &[1.0, 3.0], Statistic::Mean, vec![2.0]).unwrap();
        let base = [2.0, 1.0];

        let spent = fit_to_goal(&model, &base, Goal::Budget(30.0), MetricReduction::Average).unwrap();
        assert_relative_eq!(model.cost(&spent), 30.0, epsilon = 1e-12);

        let tight =
            fit_to_goal(&model, &base, Goal::Accuracy(0.01), MetricReduction::Average).unwrap();
        assert_relative_eq!(model.variances(&tight).unwrap()[0], 0.01, epsilon = 1e-12);
    }
}
