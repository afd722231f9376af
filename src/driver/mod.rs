//! Execution driver: pilot sampling, then solve, sample and re-estimate
//! until the allocation stops asking for samples, the budget runs out or the
//! iteration limit is hit.
//!
//! ```text
//! Pilot → Solving → Converged | BudgetExhausted | MaxIterations
//! ```
//!
//! Ratio designs (ACV, MFMC, CVMC) iterate on the truth sample count with the
//! models that share the truth's inputs, then add the remaining approximation
//! samples once at the end, following the control-variate graph from the
//! truth down. Level and group designs sample each level or group on its own
//! input stream every iteration.

pub mod counts;
pub mod evaluator;
pub mod relaxation;

use tracing::{debug, info, warn};

use crate::accumulator::Accumulators;
use crate::allocation::{
    run_goal, AllocationRequest, AllocationStrategy, Allocator, EstimatorKind, Goal, Snapshot,
    SolutionData, Topology,
};
use crate::config::Config;
use crate::covariance::{CovarianceSet, LevelStatistics};
use crate::error::{Error, Result};
use crate::topology::{level_groups, ModelDag, ModelGroup};
use crate::variance::SampleStructure;

pub use counts::{SampleCounts, StreamCursors};
pub use evaluator::{
    BatchRequest, BatchResponse, Evaluator, EvaluatorError, FnEvaluator, InputStream,
};
pub use relaxation::{increment, RelaxationSchedule};

/// Rounds of re-requesting failed evaluations in the final sampling pass.
const MAX_BACKFILL_ROUNDS: usize = 3;

/// Where the run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RunState {
    Pilot,
    Solving,
    /// The allocation asked for no further samples.
    Converged,
    /// Spending reached the budget; the last batch may have been truncated.
    BudgetExhausted,
    MaxIterations,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Converged | RunState::BudgetExhausted | RunState::MaxIterations
        )
    }
}

/// Outcome of [`Driver::run`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: RunState,
    /// The last allocation solved.
    pub solution: SolutionData,
    pub counts: SampleCounts,
    /// Everything spent, pilot included, in truth evaluations.
    pub equivalent_cost: f64,
    /// Online iterations after the pilot.
    pub iterations: usize,
    /// Covariance estimated from every sample taken.
    pub covariance: CovarianceSet,
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedBatch {
    group: ModelGroup,
    stream: InputStream,
    num_samples: usize,
}

/// Owns the evaluator, the accumulated statistics and the sample counts of
/// one study.
pub struct Driver<E> {
    config: Config,
    costs: Vec<f64>,
    evaluator: E,
    strategy: Box<dyn AllocationStrategy>,
    allocator: Allocator,
    acc: Accumulators,
    counts: SampleCounts,
    cursors: StreamCursors,
    state: RunState,
}

impl<E: Evaluator> Driver<E> {
    /// `costs[m]` is the cost of one evaluation of model `m`, truth last.
    pub fn new(config: Config, costs: Vec<f64>, evaluator: E) -> Result<Self> {
        config.validate_for(&costs)?;
        let num_qoi = evaluator.num_qoi();
        if num_qoi == 0 {
            return Err(Error::config("evaluator returns no quantities of interest"));
        }
        let num_models = costs.len();
        Ok(Driver {
            strategy: config.estimator.strategy(&config),
            allocator: Allocator::new(&config),
            acc: Accumulators::new(num_models, num_qoi),
            counts: SampleCounts::new(num_models, num_qoi),
            cursors: StreamCursors::default(),
            state: RunState::Pilot,
            config,
            costs,
            evaluator,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn counts(&self) -> &SampleCounts {
        &self.counts
    }

    pub fn accumulators(&self) -> &Accumulators {
        &self.acc
    }

    pub fn into_evaluator(self) -> E {
        self.evaluator
    }

    fn num_models(&self) -> usize {
        self.costs.len()
    }

    fn truth(&self) -> usize {
        self.costs.len() - 1
    }

    fn transition(&mut self, next: RunState) {
        if next != self.state {
            info!(from = ?self.state, to = ?next, "run state changed");
            self.state = next;
        }
    }

    /// Run the study to a terminal state.
    pub fn run(&mut self) -> Result<RunSummary> {
        self.transition(RunState::Pilot);
        let truncated = self.run_pilot()?;
        let (mut cov, mut levels) = self.statistics()?;

        let n_pilot = self.counts.min_actual(self.truth()) as f64;
        let goal = run_goal(
            &self.config,
            &Snapshot {
                cov: &cov,
                levels: levels.as_ref(),
                costs: &self.costs,
            },
            n_pilot,
        )?;
        let mut solution = self.solve(&cov, levels.as_ref(), goal, None)?;
        self.transition(if truncated {
            RunState::BudgetExhausted
        } else {
            RunState::Solving
        });

        let mut schedule = RelaxationSchedule::new(self.config.relaxation.clone());
        let mut iterations = 0;
        while self.state == RunState::Solving {
            if iterations >= self.config.max_iterations {
                self.transition(RunState::MaxIterations);
                break;
            }
            if self.budget_spent() {
                self.transition(RunState::BudgetExhausted);
                break;
            }
            let last = iterations + 1 == self.config.max_iterations;
            let factor = schedule.factor(iterations, last);
            let plan = self.online_plan(&solution, factor)?;
            debug!(
                iteration = iterations,
                factor,
                targets = ?solution.counts(),
                increments = ?plan.iter().map(|b| b.num_samples).collect::<Vec<_>>(),
                "online iteration"
            );
            if plan.iter().all(|b| b.num_samples == 0) {
                self.transition(RunState::Converged);
                break;
            }
            let truncated = self.execute(&plan)?;
            iterations += 1;
            (cov, levels) = self.statistics()?;
            solution = self.solve(&cov, levels.as_ref(), goal, Some(&solution))?;
            if truncated {
                self.transition(RunState::BudgetExhausted);
            }
        }

        if self.state != RunState::BudgetExhausted && self.finalize(&solution)? {
            self.transition(RunState::BudgetExhausted);
        }
        if self.config.estimator.uses_ratios() {
            (cov, _) = self.statistics()?;
        }

        let equivalent_cost = self.counts.equivalent_cost(&self.costs);
        info!(
            state = ?self.state,
            iterations,
            equivalent_cost,
            metric = solution.metric(),
            "run finished"
        );
        Ok(RunSummary {
            state: self.state,
            solution,
            counts: self.counts.clone(),
            equivalent_cost,
            iterations,
            covariance: cov,
        })
    }

    /// Pilot batches. Returns whether the budget cut them short.
    fn run_pilot(&mut self) -> Result<bool> {
        let plan: Vec<PlannedBatch> = if self.config.estimator == EstimatorKind::Mlmc {
            level_groups(self.num_models())
                .into_iter()
                .enumerate()
                .map(|(l, group)| PlannedBatch {
                    group,
                    stream: InputStream::Independent(l),
                    num_samples: self.config.pilot.for_group(l),
                })
                .collect()
        } else {
            vec![PlannedBatch {
                group: ModelGroup::new((0..self.num_models()).collect())?,
                stream: InputStream::Shared,
                num_samples: self.config.pilot.for_group(0),
            }]
        };
        info!(batches = plan.len(), "pilot sampling");
        self.execute(&plan)
    }

    fn statistics(&self) -> Result<(CovarianceSet, Option<LevelStatistics>)> {
        let cov = CovarianceSet::from_accumulators(&self.acc)?;
        let levels = if self.config.estimator == EstimatorKind::Mlmc {
            Some(LevelStatistics::from_accumulators(&self.acc)?)
        } else {
            None
        };
        Ok((cov, levels))
    }

    fn solve(
        &self,
        cov: &CovarianceSet,
        levels: Option<&LevelStatistics>,
        goal: Goal,
        previous: Option<&SolutionData>,
    ) -> Result<SolutionData> {
        let snapshot = Snapshot {
            cov,
            levels,
            costs: &self.costs,
        };
        let existing = self.counts.existing();
        let request = AllocationRequest {
            goal,
            metric: self.config.metric,
            existing: &existing,
            previous,
        };
        self.allocator
            .allocate(self.strategy.as_ref(), &snapshot, &request)
    }

    fn budget_spent(&self) -> bool {
        self.config
            .budget
            .is_some_and(|b| self.counts.equivalent_cost(&self.costs) >= b * (1.0 - 1e-12))
    }

    /// Group batches that move the current counts toward `solution`.
    ///
    /// A ratio design grows the truth's samples together with every model
    /// whose sample set contains them: all active models, except under
    /// recursive sampling where only those targeting the truth do.
    fn online_plan(&self, solution: &SolutionData, factor: f64) -> Result<Vec<PlannedBatch>> {
        let targets = solution.counts();
        match solution.topology() {
            Topology::Dag {
                active,
                dag,
                structure,
            } => {
                let mut models: Vec<usize> = active
                    .iter()
                    .enumerate()
                    .filter(|&(i, _)| {
                        *structure != SampleStructure::Recursive || dag.target(i) == dag.truth()
                    })
                    .map(|(_, &m)| m)
                    .collect();
                models.push(self.truth());
                let group = ModelGroup::new(models)?;
                let actual = group
                    .models()
                    .iter()
                    .map(|&m| self.counts.min_actual(m))
                    .min()
                    .unwrap_or(0);
                Ok(vec![PlannedBatch {
                    num_samples: increment(targets[self.truth()], actual as f64, factor),
                    group,
                    stream: InputStream::Shared,
                }])
            }
            Topology::Levels | Topology::Groups(_) => Ok(solution
                .topology()
                .sample_groups(self.num_models())
                .into_iter()
                .enumerate()
                .map(|(k, group)| PlannedBatch {
                    num_samples: increment(targets[k], self.counts.group(&group) as f64, factor),
                    group,
                    stream: InputStream::Independent(k),
                })
                .collect()),
        }
    }

    /// Stream prefixes that make up the sample set of graph node `node`, as
    /// `(stream, length)`. Node `dag.truth()` is the truth model, whose set
    /// is the shared prefix.
    ///
    /// Under independent sampling a set is its target's set plus the node's
    /// own extension; under recursive sampling it is the extension alone.
    /// Nested sets are prefixes of the shared stream and need no segments.
    fn node_segments(
        &self,
        active: &[usize],
        dag: &ModelDag,
        structure: SampleStructure,
        node: usize,
    ) -> Vec<(InputStream, u64)> {
        let extension = |k: usize| {
            let stream = InputStream::Independent(active[k]);
            (stream, self.cursors.next(stream, &[active[k]]))
        };
        let shared = (
            InputStream::Shared,
            self.cursors.next(InputStream::Shared, &[self.truth()]),
        );
        match structure {
            SampleStructure::Nested => Vec::new(),
            SampleStructure::Recursive if node == dag.truth() => vec![shared],
            SampleStructure::Recursive => vec![extension(node)],
            SampleStructure::Independent => {
                let mut segments = vec![shared];
                let mut k = node;
                while k != dag.truth() {
                    segments.push(extension(k));
                    k = dag.target(k);
                }
                segments
            }
        }
    }

    /// Bring each active approximation of a ratio design up to its own
    /// target. Models are visited from the truth down the graph, so each one
    /// first covers its target's sample set and then extends its own stream.
    /// Returns whether the budget cut the samples short.
    fn finalize(&mut self, solution: &SolutionData) -> Result<bool> {
        let Topology::Dag {
            active,
            dag,
            structure,
        } = solution.topology()
        else {
            return Ok(false);
        };
        let targets = solution.counts();
        let order = dag.topological_order();
        for round in 0..MAX_BACKFILL_ROUNDS {
            let mut batches = 0;
            for &i in &order {
                let m = active[i];
                let single = ModelGroup::new(vec![m])?;
                let mut plan = Vec::new();
                for (stream, length) in self.node_segments(active, dag, *structure, dag.target(i)) {
                    let used = self.cursors.next(stream, &[m]);
                    if length > used {
                        plan.push(PlannedBatch {
                            group: single.clone(),
                            stream,
                            num_samples: (length - used) as usize,
                        });
                    }
                }
                batches += plan.len();
                if self.execute(&plan)? {
                    return Ok(true);
                }

                let own = match structure {
                    SampleStructure::Nested => InputStream::Shared,
                    SampleStructure::Independent | SampleStructure::Recursive => {
                        InputStream::Independent(m)
                    }
                };
                let num_samples = increment(targets[m], self.counts.min_actual(m) as f64, 1.0);
                if num_samples > 0 {
                    batches += 1;
                    let extend = PlannedBatch {
                        group: single,
                        stream: own,
                        num_samples,
                    };
                    if self.execute(std::slice::from_ref(&extend))? {
                        return Ok(true);
                    }
                }
            }
            if batches == 0 {
                break;
            }
            debug!(round, batches, "approximation increments");
        }
        Ok(false)
    }

    /// Evaluate the planned batches, truncating at the budget. Returns
    /// whether any batch was cut.
    fn execute(&mut self, plan: &[PlannedBatch]) -> Result<bool> {
        let mut truncated = false;
        for batch in plan {
            if batch.num_samples == 0 {
                continue;
            }
            let n = self.affordable(&batch.group, batch.num_samples);
            if n < batch.num_samples {
                warn!(
                    group = ?batch.group.models(),
                    requested = batch.num_samples,
                    affordable = n,
                    "batch truncated at the budget"
                );
                truncated = true;
            }
            if n > 0 {
                self.sample(&batch.group, batch.stream, n)?;
            }
        }
        Ok(truncated)
    }

    /// Samples of `group` that fit in the remaining budget, at most `wanted`.
    fn affordable(&self, group: &ModelGroup, wanted: usize) -> usize {
        let Some(budget) = self.config.budget else {
            return wanted;
        };
        let unit = group.cost(&self.costs) / self.costs[self.truth()];
        let room = budget - self.counts.equivalent_cost(&self.costs);
        if !(room > 0.0) {
            return 0;
        }
        let fits = (room / unit + 1e-9).floor();
        if fits >= wanted as f64 {
            wanted
        } else {
            fits as usize
        }
    }

    fn sample(&mut self, group: &ModelGroup, stream: InputStream, n: usize) -> Result<()> {
        let first = self.cursors.next(stream, group.models());
        let request = BatchRequest {
            models: group.models().to_vec(),
            num_samples: n,
            stream,
            first_sample: first,
        };
        let response = self.evaluator.evaluate_batch(&request)?;
        if response.samples.len() != n {
            return Err(Error::mismatch("batch samples", n, response.samples.len()));
        }
        self.acc.accumulate(group.models(), &response.samples)?;
        self.counts.record(group, &response.samples);
        self.cursors.advance(stream, group.models(), first, n);
        Ok(())
    }
}
