//! Allocation solver: choose sample counts for every model, level or group.
//!
//! An [`AllocationStrategy`] enumerates the candidate topologies of one
//! estimator family and builds their variance models; the [`Allocator`]
//! solves each topology as a log-space NLP through `fidelis-optim` and keeps
//! the best result.

pub mod guess;
pub mod problem;
pub mod solution;
pub mod strategy;

use fidelis_optim::{NlpBackend, NlpConfig};
use tracing::{debug, info, warn};

use crate::config::{Config, Formulation, MetricReduction, Statistic, ToleranceKind};
use crate::covariance::{CovarianceSet, LevelStatistics};
use crate::error::{Error, Result};
use crate::statistics::variance_of_variance_from_moments;
use crate::topology::ModelGroup;
use crate::variance::VarianceModel;

pub use guess::Guess;
pub use problem::{AllocationProblem, Constraint, ConstraintSet, Evaluation};
pub use solution::SolutionData;
pub use strategy::{
    AcvStrategy, AllocationStrategy, EstimatorKind, GenAcvStrategy, MfmcStrategy, MlBlueStrategy,
    MlmcStrategy, Topology,
};

/// What the solve is constrained by.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Goal {
    /// Minimize the metric with total cost at most this many truth evaluations.
    Budget(f64),
    /// Minimize cost with the metric at most this value.
    Accuracy(f64),
}

/// Read-only statistics the solve works from.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub cov: &'a CovarianceSet,
    /// Level statistics, present when a multilevel estimator is configured.
    pub levels: Option<&'a LevelStatistics>,
    /// Cost per model, truth last.
    pub costs: &'a [f64],
}

/// Samples already paid for, as lower bounds on the new design.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExistingSamples {
    models: Vec<f64>,
    groups: Vec<(ModelGroup, f64)>,
}

impl ExistingSamples {
    pub fn new(models: Vec<f64>, groups: Vec<(ModelGroup, f64)>) -> Self {
        ExistingSamples { models, groups }
    }

    /// Nothing sampled yet for an ensemble of `num_models`.
    pub fn none(num_models: usize) -> Self {
        ExistingSamples {
            models: vec![0.0; num_models],
            groups: Vec::new(),
        }
    }

    pub fn num_models(&self) -> usize {
        self.models.len()
    }

    /// Evaluations of `model`, zero when unknown.
    pub fn model(&self, model: usize) -> f64 {
        self.models.get(model).copied().unwrap_or(0.0)
    }

    /// Completed samples of `group`, zero when never sampled.
    pub fn group(&self, group: &ModelGroup) -> f64 {
        self.groups
            .iter()
            .find(|(g, _)| g == group)
            .map_or(0.0, |(_, n)| *n)
    }
}

/// One allocation query.
#[derive(Debug, Clone, Copy)]
pub struct AllocationRequest<'a> {
    pub goal: Goal,
    pub metric: MetricReduction,
    pub existing: &'a ExistingSamples,
    /// The previous iteration's solution, tried as a candidate again.
    pub previous: Option<&'a SolutionData>,
}

/// Goal of a run: the configured budget, or an accuracy target derived from
/// the pilot statistics.
///
/// A relative tolerance is a fraction of the plain Monte Carlo metric at
/// `n_pilot` truth samples; a target that comes out non-positive or
/// non-finite cannot be met.
pub fn run_goal(config: &Config, snapshot: &Snapshot<'_>, n_pilot: f64) -> Result<Goal> {
    match config.formulation {
        Formulation::MinimizeVariance => config
            .budget
            .map(Goal::Budget)
            .ok_or_else(|| Error::config("variance minimization needs a budget")),
        Formulation::MinimizeCost => {
            let target = match config.tolerance {
                ToleranceKind::Absolute => config.convergence_tol,
                ToleranceKind::Relative => {
                    let reference: Vec<f64> = (0..snapshot.cov.num_qoi())
                        .map(|q| {
                            let truth = snapshot
                                .levels
                                .filter(|_| config.statistic == Statistic::Variance)
                                .and_then(|l| l.truth_moments(q));
                            match truth {
                                Some(m) => variance_of_variance_from_moments(m.mu2, m.mu4, n_pilot),
                                None => snapshot.cov.var_h(q) / n_pilot,
                            }
                        })
                        .collect();
                    config.convergence_tol * config.metric.reduce(&reference)
                }
            };
            if !(target > 0.0) || !target.is_finite() {
                return Err(Error::Infeasible(format!(
                    "accuracy target {target:e} cannot be reached"
                )));
            }
            debug!(target, "accuracy target");
            Ok(Goal::Accuracy(target))
        }
    }
}

fn to_log(design: &[f64]) -> Vec<f64> {
    design.iter().map(|v| v.max(f64::MIN_POSITIVE).ln()).collect()
}

fn to_natural(x: &[f64]) -> Vec<f64> {
    x.iter().map(|v| v.exp()).collect()
}

/// Solves allocation problems with one optimizer configuration.
#[derive(Debug, Clone)]
pub struct Allocator {
    nlp: NlpConfig<f64>,
    constraint_tol: f64,
}

impl Allocator {
    pub fn new(config: &Config) -> Self {
        Allocator {
            nlp: config.nlp_config(),
            constraint_tol: config.constraint_tol,
        }
    }

    /// Best allocation over every topology `strategy` proposes.
    ///
    /// Under a budget the lowest metric wins, under an accuracy target the
    /// lowest cost. Topologies that turn out infeasible or singular are
    /// skipped as long as another one succeeds.
    pub fn allocate(
        &self,
        strategy: &dyn AllocationStrategy,
        snapshot: &Snapshot<'_>,
        request: &AllocationRequest<'_>,
    ) -> Result<SolutionData> {
        let topologies = strategy.enumerate_groups(snapshot)?;
        let mut best: Option<SolutionData> = None;
        let mut skipped: Option<Error> = None;
        for topology in &topologies {
            match self.solve_topology(strategy, snapshot, request, topology) {
                Ok(sol) => {
                    let better = best.as_ref().map_or(true, |b| match request.goal {
                        Goal::Budget(_) => sol.metric() < b.metric(),
                        Goal::Accuracy(_) => sol.equivalent_cost() < b.equivalent_cost(),
                    });
                    if better {
                        best = Some(sol);
                    }
                }
                Err(e @ (Error::Infeasible(_) | Error::SingularSystem { .. }))
                    if topologies.len() > 1 =>
                {
                    debug!(?topology, error = %e, "topology skipped");
                    skipped = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        let best = best.ok_or_else(|| {
            skipped.unwrap_or_else(|| Error::Infeasible("no candidate topology".into()))
        })?;
        info!(
            kind = ?best.kind(),
            metric = best.metric(),
            cost = best.equivalent_cost(),
            candidates = topologies.len(),
            "allocation solved"
        );
        Ok(best)
    }

    fn solve_topology(
        &self,
        strategy: &dyn AllocationStrategy,
        snapshot: &Snapshot<'_>,
        request: &AllocationRequest<'_>,
        topology: &Topology,
    ) -> Result<SolutionData> {
        let model = strategy.build_variance_model(snapshot, topology)?;
        let model = model.as_ref();
        let set = strategy.formulate_constraints(topology, model, request.existing);
        let mut problem =
            AllocationProblem::new(model, request.goal, request.metric, set.constraints.clone());
        let floor = set.bounds.projected(&to_log(
            &strategy.existing_design(topology, request.existing),
        ));
        let package = |design: &[f64]| {
            package_solution(
                strategy.kind(),
                topology,
                model,
                design,
                request.metric,
                snapshot.costs.len(),
            )
        };

        if let Goal::Budget(budget) = request.goal {
            let spent = model.cost(&to_natural(&floor));
            if spent >= budget {
                warn!(spent, budget, "budget already spent; keeping current samples");
                return package(&to_natural(&floor));
            }
        }

        let guesses =
            strategy.initial_guesses(snapshot, topology, model, request.goal, request.metric)?;
        let mut feasible: Vec<Vec<f64>> = Vec::new();
        let mut starts: Vec<(f64, Vec<f64>)> = Vec::new();
        for g in &guesses {
            let raw = to_log(&g.design);
            let x = set.bounds.projected(&raw);
            let ok = problem.is_feasible(&x, &set.bounds, self.constraint_tol);
            if g.exact && ok && set.bounds.violation(&raw) == 0.0 {
                debug!(label = g.label, "closed-form allocation accepted");
                return package(&g.design);
            }
            let merit = problem.penalized_merit(&x);
            debug!(label = g.label, merit, feasible = ok, "initial guess");
            if ok {
                feasible.push(x.clone());
            }
            starts.push((merit, x));
        }
        if let Some(prev) = request
            .previous
            .filter(|p| p.kind() == strategy.kind() && p.topology() == topology)
        {
            // costs and statistics have moved since it was solved, so its
            // shape is also refitted to the goal
            let design = topology.design_from_counts(prev.counts());
            let refit = guess::fit_to_goal(model, &design, request.goal, request.metric)?;
            for candidate in [design, refit] {
                let x = set.bounds.projected(&to_log(&candidate));
                if problem.is_feasible(&x, &set.bounds, self.constraint_tol) {
                    feasible.push(x.clone());
                }
                let merit = problem.penalized_merit(&x);
                starts.push((merit, x));
            }
        }
        if let Some(e) = problem.take_failure() {
            return Err(e);
        }

        let mut usable_runs = 0;
        let mut last_termination = None;
        for x0 in distinct_starts(starts, &floor) {
            let result = self.nlp.solve(&mut problem, &x0, &set.bounds);
            if let Some(e) = problem.take_failure() {
                return Err(e);
            }
            debug!(
                outer = result.outer_iterations,
                evals = result.func_evals,
                violation = result.max_violation,
                termination = %result.termination,
                "optimizer finished"
            );
            last_termination = Some(result.termination);
            if !result.is_usable() {
                continue;
            }
            usable_runs += 1;
            if result.max_violation <= self.constraint_tol
                && set.bounds.violation(&result.x) <= self.constraint_tol
                && result.objective.is_finite()
            {
                feasible.push(result.x);
            } else {
                debug!(violation = result.max_violation, "optimizer run ended infeasible");
            }
        }

        let mut best: Option<(f64, Vec<f64>)> = None;
        for x in feasible {
            let Some(value) = problem.objective_value(&x) else {
                continue;
            };
            if best.as_ref().map_or(true, |(b, _)| value < *b) {
                best = Some((value, x));
            }
        }
        if let Some(e) = problem.take_failure() {
            return Err(e);
        }
        match (best, request.goal) {
            (Some((_, x)), _) => package(&to_natural(&x)),
            (None, _) if usable_runs == 0 => Err(Error::OptimizerFailure(format!(
                "no feasible start and every run stopped with {}",
                last_termination.map_or_else(|| "no result".to_string(), |t| t.to_string())
            ))),
            (None, Goal::Budget(budget)) => {
                warn!(budget, "budget is below the smallest admissible design");
                package(&to_natural(&floor))
            }
            (None, Goal::Accuracy(target)) => Err(Error::Infeasible(format!(
                "no design reaches the accuracy target {target:e}"
            ))),
        }
    }
}

/// Optimizer runs per topology.
const MAX_STARTS: usize = 3;

/// Starts closer than this in every log coordinate count as one.
const SAME_START: f64 = 1e-6;

/// The `MAX_STARTS` lowest-merit starts that differ from each other, or the
/// floor when there are none.
fn distinct_starts(mut starts: Vec<(f64, Vec<f64>)>, floor: &[f64]) -> Vec<Vec<f64>> {
    starts.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut chosen: Vec<Vec<f64>> = Vec::with_capacity(MAX_STARTS);
    for (_, x) in starts {
        if chosen.len() == MAX_STARTS {
            break;
        }
        let repeated = chosen.iter().any(|c| {
            c.iter()
                .zip(&x)
                .all(|(a, b)| (a - b).abs() <= SAME_START)
        });
        if !repeated {
            chosen.push(x);
        }
    }
    if chosen.is_empty() {
        chosen.push(floor.to_vec());
    }
    chosen
}

fn package_solution(
    kind: EstimatorKind,
    topology: &Topology,
    model: &dyn VarianceModel,
    design: &[f64],
    metric: MetricReduction,
    num_models: usize,
) -> Result<SolutionData> {
    let variances = model.variances(design)?;
    let merit = metric.reduce(&variances);
    let reference = model.reference(design);
    let reference_variances = model.reference_variances(reference);
    let counts = topology.expand_counts(model.counts(design), num_models);
    Ok(SolutionData::new(
        kind,
        topology.clone(),
        counts,
        reference,
        variances,
        &reference_variances,
        merit,
        model.cost(design),
    ))
}
