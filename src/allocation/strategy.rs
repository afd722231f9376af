//! Estimator variants behind one strategy interface.
//!
//! Each [`EstimatorKind`] maps to a concrete strategy that enumerates its
//! admissible topologies, builds the variance model of one topology and
//! formulates that topology's constraints. The solve loop in
//! [`Allocator`](crate::allocation::Allocator) is shared by all of them.

use fidelis_optim::Bounds;
use tracing::debug;

use crate::allocation::guess::{
    enforce_ordering, fit_to_goal, pairwise_cv_ratios, ratio_design, Guess, MAX_RATIO,
    MIN_GROUP_SAMPLES,
};
use crate::allocation::problem::{Constraint, ConstraintSet};
use crate::allocation::{ExistingSamples, Goal, Snapshot};
use crate::config::{Config, MetricReduction, Statistic};
use crate::error::{Error, Result};
use crate::topology::{
    enumerate_dags, level_groups, model_subsets, throttle_groups, throttle_subsets, DagLimits,
    GroupPool, GroupThrottle, ModelDag, ModelGroup, MAX_DAG_APPROX,
};
use crate::variance::mfmc::correlation_order;
use crate::variance::{
    level_costs, mfmc_analytic_ratios, mlmc_accuracy_allocation, mlmc_budget_allocation,
    AcvModel, BlueModel, MfmcModel, MlmcModel, SampleStructure, VarianceModel,
};

/// Upper limit on the control-variate graphs tried per model subset.
pub const MAX_DAG_CANDIDATES: usize = 256;

/// Estimator family, selected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EstimatorKind {
    /// Multilevel Monte Carlo on the model hierarchy.
    Mlmc,
    /// Multifidelity Monte Carlo on the correlation-ordered chain.
    Mfmc,
    /// Control variate with one approximation.
    Cvmc,
    /// ACV with independent sample extensions, all approximations on the truth.
    AcvIs,
    /// ACV with nested samples, all approximations on the truth.
    AcvMf,
    /// ACV with disjoint samples, all approximations on the truth.
    AcvRd,
    /// ACV searched over control-variate graphs (and model subsets).
    GenAcv(SampleStructure),
    /// Multilevel BLUE over a group pool.
    MlBlue,
}

impl EstimatorKind {
    /// Number of pilot groups: one per level for MLMC, one shared group otherwise.
    pub fn num_pilot_groups(&self, num_approx: usize) -> usize {
        match self {
            EstimatorKind::Mlmc => num_approx + 1,
            _ => 1,
        }
    }

    /// Whether the design is ratios to a truth sample count.
    pub fn uses_ratios(&self) -> bool {
        !matches!(self, EstimatorKind::Mlmc | EstimatorKind::MlBlue)
    }

    /// The concrete strategy for this estimator.
    pub fn strategy(&self, config: &Config) -> Box<dyn AllocationStrategy> {
        match *self {
            EstimatorKind::Mlmc => Box::new(MlmcStrategy {
                statistic: config.statistic,
            }),
            EstimatorKind::Mfmc => Box::new(MfmcStrategy),
            EstimatorKind::Cvmc => Box::new(AcvStrategy {
                kind: EstimatorKind::Cvmc,
                structure: SampleStructure::Nested,
            }),
            EstimatorKind::AcvIs => Box::new(AcvStrategy {
                kind: EstimatorKind::AcvIs,
                structure: SampleStructure::Independent,
            }),
            EstimatorKind::AcvMf => Box::new(AcvStrategy {
                kind: EstimatorKind::AcvMf,
                structure: SampleStructure::Nested,
            }),
            EstimatorKind::AcvRd => Box::new(AcvStrategy {
                kind: EstimatorKind::AcvRd,
                structure: SampleStructure::Recursive,
            }),
            EstimatorKind::GenAcv(structure) => Box::new(GenAcvStrategy {
                structure,
                limits: config.dag,
                model_selection: config.model_selection,
                throttle: config.group_throttle,
            }),
            EstimatorKind::MlBlue => Box::new(MlBlueStrategy {
                pool: config.group_pool.clone(),
                throttle: config.group_throttle,
            }),
        }
    }
}

/// The sampling topology a solution was computed for.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Topology {
    /// A control-variate graph over the approximations in `active` (global
    /// indices, increasing) and the truth. Graph index `i` is model `active[i]`.
    Dag {
        active: Vec<usize>,
        dag: ModelDag,
        structure: SampleStructure,
    },
    /// Telescoping levels `{l − 1, l}`.
    Levels,
    /// Independently sampled model groups.
    Groups(Vec<ModelGroup>),
}

impl Topology {
    /// Spread per-variable counts over the whole ensemble: inactive models
    /// get zero. Level and group counts are returned unchanged.
    pub fn expand_counts(&self, local: Vec<f64>, num_models: usize) -> Vec<f64> {
        match self {
            Topology::Dag { active, .. } => {
                let mut out = vec![0.0; num_models];
                for (i, &m) in active.iter().enumerate() {
                    out[m] = local[i];
                }
                out[num_models - 1] = local[active.len()];
                out
            }
            Topology::Levels | Topology::Groups(_) => local,
        }
    }

    /// Design vector reproducing `counts` (as returned by
    /// [`expand_counts`](Self::expand_counts)).
    pub fn design_from_counts(&self, counts: &[f64]) -> Vec<f64> {
        match self {
            Topology::Dag { active, .. } => {
                let n_h = counts.last().copied().unwrap_or(0.0);
                let mut design: Vec<f64> = active
                    .iter()
                    .map(|&m| if n_h > 0.0 { counts[m] / n_h } else { 0.0 })
                    .collect();
                design.push(n_h);
                design
            }
            Topology::Levels | Topology::Groups(_) => counts.to_vec(),
        }
    }

    /// Models sampled together online, as groups (ratio designs use the
    /// active approximations and the truth as one group).
    pub fn sample_groups(&self, num_models: usize) -> Vec<ModelGroup> {
        match self {
            Topology::Dag { active, .. } => {
                let mut models = active.clone();
                models.push(num_models - 1);
                ModelGroup::new(models).map(|g| vec![g]).unwrap_or_default()
            }
            Topology::Levels => level_groups(num_models),
            Topology::Groups(groups) => groups.clone(),
        }
    }
}

/// The operations that distinguish one estimator family from another.
pub trait AllocationStrategy {
    fn kind(&self) -> EstimatorKind;

    /// Candidate topologies for the current statistics.
    fn enumerate_groups(&self, snapshot: &Snapshot<'_>) -> Result<Vec<Topology>>;

    /// Variance model of `topology`.
    fn build_variance_model(
        &self,
        snapshot: &Snapshot<'_>,
        topology: &Topology,
    ) -> Result<Box<dyn VarianceModel>>;

    /// Bounds and constraints of `topology` besides the goal constraint.
    fn formulate_constraints(
        &self,
        topology: &Topology,
        model: &dyn VarianceModel,
        existing: &ExistingSamples,
    ) -> ConstraintSet;

    /// Starting designs, already fitted to `goal`.
    fn initial_guesses(
        &self,
        snapshot: &Snapshot<'_>,
        topology: &Topology,
        model: &dyn VarianceModel,
        goal: Goal,
        metric: MetricReduction,
    ) -> Result<Vec<Guess>>;

    /// Design that reproduces the samples already taken.
    fn existing_design(&self, topology: &Topology, existing: &ExistingSamples) -> Vec<f64> {
        match topology {
            Topology::Dag { active, .. } => {
                let truth = existing.num_models().saturating_sub(1);
                let n_h = existing.model(truth).max(1.0);
                let mut design: Vec<f64> = active
                    .iter()
                    .map(|&m| (existing.model(m) / n_h).max(1.0))
                    .collect();
                design.push(n_h);
                design
            }
            Topology::Levels => level_groups(existing.num_models())
                .iter()
                .map(|g| existing.group(g).max(1.0))
                .collect(),
            Topology::Groups(groups) => groups
                .iter()
                .map(|g| existing.group(g).max(MIN_GROUP_SAMPLES))
                .collect(),
        }
    }
}

// ── Ratio designs ──

fn active_costs(costs: &[f64], active: &[usize]) -> Vec<f64> {
    let mut out: Vec<f64> = active.iter().map(|&m| costs[m]).collect();
    out.push(costs[costs.len() - 1]);
    out
}

fn ratio_constraints(
    active: &[usize],
    dag: &ModelDag,
    existing: &ExistingSamples,
) -> ConstraintSet {
    let n = active.len();
    let truth = existing.num_models().saturating_sub(1);
    let n_h_min = existing.model(truth).max(1.0);
    let mut lower = vec![0.0; n + 1];
    lower[n] = n_h_min.ln();
    let bounds = Bounds::new(lower, vec![f64::INFINITY; n + 1]);

    let mut constraints = Vec::new();
    for i in 0..n {
        let t = dag.target(i);
        if t < n {
            constraints.push(Constraint::ordering(i, t));
        }
        let have = existing.model(active[i]);
        if have > n_h_min {
            // r_i N_H >= samples already taken of model i
            constraints.push(Constraint::LogLinear {
                terms: vec![(i, -1.0), (n, -1.0)],
                offset: have.ln(),
            });
        }
    }
    ConstraintSet {
        bounds,
        constraints,
    }
}

/// Ensembles up to this many approximations get an MFMC start for every
/// model subset; larger ones only for the subsets leaving one model out.
const MAX_SUBSET_GUESS_APPROX: usize = 4;

/// Subsets of `0..n` whose MFMC closed form seeds a start.
fn guess_subsets(n: usize) -> Vec<Vec<usize>> {
    if n <= MAX_SUBSET_GUESS_APPROX {
        model_subsets(n)
            .into_iter()
            .filter(|s| s.len() < n)
            .collect()
    } else {
        (0..n)
            .map(|left_out| (0..n).filter(|&i| i != left_out).collect())
            .collect()
    }
}

/// MFMC closed form on the chain through `subset`; the other models keep
/// ratio one.
fn subset_mfmc_ratios(rho2: &[f64], costs: &[f64], subset: &[usize]) -> Option<Vec<f64>> {
    let sub_rho2: Vec<f64> = subset.iter().map(|&i| rho2[i]).collect();
    let mut sub_costs: Vec<f64> = subset.iter().map(|&i| costs[i]).collect();
    sub_costs.push(costs[costs.len() - 1]);
    let sub = mfmc_analytic_ratios(&sub_rho2, &sub_costs, &correlation_order(&sub_rho2))?;
    let mut ratios = vec![1.0; rho2.len()];
    for (&i, r) in subset.iter().zip(sub) {
        ratios[i] = r;
    }
    Some(ratios)
}

/// Starting ratios for a graph, each pushed onto its ordering and fitted to
/// the goal.
///
/// Besides the MFMC closed form and pairwise control variates this covers
/// the corners of the ratio box: closed forms on smaller chains, each model
/// pinned to ratio one, and every model at ratio one. Optima often sit on
/// such a corner when an approximation adds little beyond the others.
fn ratio_guesses(
    snapshot: &Snapshot<'_>,
    active: &[usize],
    dag: &ModelDag,
    model: &dyn VarianceModel,
    goal: Goal,
    metric: MetricReduction,
) -> Result<Vec<Guess>> {
    let cov = snapshot.cov.restrict(active)?;
    let rho2 = cov.mean_rho2_lh();
    let costs = active_costs(snapshot.costs, active);
    let n = active.len();
    let c_h = costs[n];
    let weights: Vec<f64> = costs[..n].iter().map(|c| c / c_h).collect();

    let mut candidates: Vec<(Vec<f64>, &'static str)> = Vec::new();
    let analytic = mfmc_analytic_ratios(&rho2, &costs, &correlation_order(&rho2));
    if let Some(ratios) = &analytic {
        candidates.push((ratios.clone(), "mfmc-analytic"));
    }
    let pairwise = pairwise_cv_ratios(&rho2, &weights);
    candidates.push((pairwise.clone(), "pairwise-cv"));
    for subset in guess_subsets(n) {
        if let Some(ratios) = subset_mfmc_ratios(&rho2, &costs, &subset) {
            candidates.push((ratios, "mfmc-subset"));
        }
    }
    if n > 1 {
        let base = analytic.unwrap_or(pairwise);
        for i in 0..n {
            let mut ratios = base.clone();
            ratios[i] = 1.0;
            candidates.push((ratios, "pinned-corner"));
        }
    }
    candidates.push((vec![1.0; n], "all-at-bound"));

    let mut guesses = Vec::with_capacity(candidates.len());
    for (mut ratios, label) in candidates {
        enforce_ordering(&mut ratios, dag);
        let design = fit_to_goal(model, &ratio_design(ratios), goal, metric)?;
        guesses.push(Guess::heuristic(design, label));
    }
    Ok(guesses)
}

/// ACV with every approximation on the truth; also serves CVMC.
#[derive(Debug, Clone)]
pub struct AcvStrategy {
    kind: EstimatorKind,
    structure: SampleStructure,
}

impl AcvStrategy {
    pub fn new(kind: EstimatorKind, structure: SampleStructure) -> Self {
        AcvStrategy { kind, structure }
    }
}

impl AllocationStrategy for AcvStrategy {
    fn kind(&self) -> EstimatorKind {
        self.kind
    }

    fn enumerate_groups(&self, snapshot: &Snapshot<'_>) -> Result<Vec<Topology>> {
        let n = snapshot.cov.num_approx();
        if self.kind == EstimatorKind::Cvmc && n != 1 {
            return Err(Error::config(format!(
                "CVMC takes exactly one approximation, found {n}"
            )));
        }
        Ok(vec![Topology::Dag {
            active: (0..n).collect(),
            dag: ModelDag::all_to_truth(n),
            structure: self.structure,
        }])
    }

    fn build_variance_model(
        &self,
        snapshot: &Snapshot<'_>,
        topology: &Topology,
    ) -> Result<Box<dyn VarianceModel>> {
        build_acv_model(snapshot, topology)
    }

    fn formulate_constraints(
        &self,
        topology: &Topology,
        _model: &dyn VarianceModel,
        existing: &ExistingSamples,
    ) -> ConstraintSet {
        dag_constraints(topology, existing)
    }

    fn initial_guesses(
        &self,
        snapshot: &Snapshot<'_>,
        topology: &Topology,
        model: &dyn VarianceModel,
        goal: Goal,
        metric: MetricReduction,
    ) -> Result<Vec<Guess>> {
        let Topology::Dag { active, dag, .. } = topology else {
            return Err(Error::config("ACV needs a control-variate graph"));
        };
        let mut guesses = ratio_guesses(snapshot, active, dag, model, goal, metric)?;
        if self.kind == EstimatorKind::Cvmc && model.num_qoi() == 1 {
            // The single control variate has a closed form.
            if let Some(g) = guesses.iter_mut().find(|g| g.label == "pairwise-cv") {
                g.exact = true;
                g.label = "cv-analytic";
            }
        }
        Ok(guesses)
    }
}

fn build_acv_model(snapshot: &Snapshot<'_>, topology: &Topology) -> Result<Box<dyn VarianceModel>> {
    let Topology::Dag {
        active,
        dag,
        structure,
    } = topology
    else {
        return Err(Error::config("ACV needs a control-variate graph"));
    };
    let cov = if active.len() == snapshot.cov.num_approx() {
        snapshot.cov.clone()
    } else {
        snapshot.cov.restrict(active)?
    };
    let costs = active_costs(snapshot.costs, active);
    Ok(Box::new(AcvModel::new(cov, dag.clone(), *structure, &costs)?))
}

fn dag_constraints(topology: &Topology, existing: &ExistingSamples) -> ConstraintSet {
    match topology {
        Topology::Dag { active, dag, .. } => ratio_constraints(active, dag, existing),
        _ => ConstraintSet {
            bounds: Bounds::unbounded(0),
            constraints: Vec::new(),
        },
    }
}

/// MFMC on the chain ordered by decreasing correlation with the truth.
#[derive(Debug, Clone, Copy, Default)]
pub struct MfmcStrategy;

impl AllocationStrategy for MfmcStrategy {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Mfmc
    }

    fn enumerate_groups(&self, snapshot: &Snapshot<'_>) -> Result<Vec<Topology>> {
        let n = snapshot.cov.num_approx();
        let order = correlation_order(&snapshot.cov.mean_rho2_lh());
        Ok(vec![Topology::Dag {
            active: (0..n).collect(),
            dag: ModelDag::chain(&order)?,
            structure: SampleStructure::Nested,
        }])
    }

    fn build_variance_model(
        &self,
        snapshot: &Snapshot<'_>,
        _topology: &Topology,
    ) -> Result<Box<dyn VarianceModel>> {
        let order = correlation_order(&snapshot.cov.mean_rho2_lh());
        Ok(Box::new(MfmcModel::new(
            snapshot.cov.clone(),
            order,
            snapshot.costs,
        )?))
    }

    fn formulate_constraints(
        &self,
        topology: &Topology,
        _model: &dyn VarianceModel,
        existing: &ExistingSamples,
    ) -> ConstraintSet {
        dag_constraints(topology, existing)
    }

    fn initial_guesses(
        &self,
        snapshot: &Snapshot<'_>,
        topology: &Topology,
        model: &dyn VarianceModel,
        goal: Goal,
        metric: MetricReduction,
    ) -> Result<Vec<Guess>> {
        let Topology::Dag { active, dag, .. } = topology else {
            return Err(Error::config("MFMC needs a control-variate graph"));
        };
        let mut guesses = ratio_guesses(snapshot, active, dag, model, goal, metric)?;
        if model.num_qoi() == 1 {
            for g in guesses.iter_mut().filter(|g| g.label == "mfmc-analytic") {
                g.exact = true;
            }
        }
        Ok(guesses)
    }
}

/// Generalized ACV: every admissible graph, optionally over every subset of
/// the approximations.
#[derive(Debug, Clone)]
pub struct GenAcvStrategy {
    structure: SampleStructure,
    limits: DagLimits,
    model_selection: bool,
    throttle: Option<GroupThrottle>,
}

impl GenAcvStrategy {
    pub fn new(
        structure: SampleStructure,
        limits: DagLimits,
        model_selection: bool,
        throttle: Option<GroupThrottle>,
    ) -> Self {
        GenAcvStrategy {
            structure,
            limits,
            model_selection,
            throttle,
        }
    }
}

impl AllocationStrategy for GenAcvStrategy {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::GenAcv(self.structure)
    }

    fn enumerate_groups(&self, snapshot: &Snapshot<'_>) -> Result<Vec<Topology>> {
        let n = snapshot.cov.num_approx();
        if n > MAX_DAG_APPROX {
            return Err(Error::config(format!(
                "GenACV searches at most {MAX_DAG_APPROX} approximations, found {n}"
            )));
        }
        let mut subsets = if self.model_selection {
            model_subsets(n)
        } else {
            vec![(0..n).collect()]
        };
        if let Some(t) = &self.throttle {
            subsets = throttle_subsets(subsets, snapshot.cov, t);
        }
        let mut out = Vec::new();
        for active in subsets {
            let mut dags = enumerate_dags(active.len(), &self.limits)?;
            // prefer shallow graphs when capping
            dags.sort_by_key(|d| d.depth());
            dags.truncate(MAX_DAG_CANDIDATES);
            for dag in dags {
                out.push(Topology::Dag {
                    active: active.clone(),
                    dag,
                    structure: self.structure,
                });
            }
        }
        debug!(candidates = out.len(), "GenACV topologies enumerated");
        Ok(out)
    }

    fn build_variance_model(
        &self,
        snapshot: &Snapshot<'_>,
        topology: &Topology,
    ) -> Result<Box<dyn VarianceModel>> {
        build_acv_model(snapshot, topology)
    }

    fn formulate_constraints(
        &self,
        topology: &Topology,
        _model: &dyn VarianceModel,
        existing: &ExistingSamples,
    ) -> ConstraintSet {
        dag_constraints(topology, existing)
    }

    fn initial_guesses(
        &self,
        snapshot: &Snapshot<'_>,
        topology: &Topology,
        model: &dyn VarianceModel,
        goal: Goal,
        metric: MetricReduction,
    ) -> Result<Vec<Guess>> {
        let Topology::Dag { active, dag, .. } = topology else {
            return Err(Error::config("GenACV needs a control-variate graph"));
        };
        ratio_guesses(snapshot, active, dag, model, goal, metric)
    }
}

// ── Count designs ──

/// MLMC over the model hierarchy.
#[derive(Debug, Clone, Copy)]
pub struct MlmcStrategy {
    statistic: Statistic,
}

impl MlmcStrategy {
    pub fn new(statistic: Statistic) -> Self {
        MlmcStrategy { statistic }
    }
}

impl AllocationStrategy for MlmcStrategy {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Mlmc
    }

    fn enumerate_groups(&self, _snapshot: &Snapshot<'_>) -> Result<Vec<Topology>> {
        Ok(vec![Topology::Levels])
    }

    fn build_variance_model(
        &self,
        snapshot: &Snapshot<'_>,
        _topology: &Topology,
    ) -> Result<Box<dyn VarianceModel>> {
        let levels = snapshot
            .levels
            .ok_or_else(|| Error::config("MLMC needs level statistics"))?;
        let var_h = (0..snapshot.cov.num_qoi())
            .map(|q| snapshot.cov.var_h(q))
            .collect();
        Ok(Box::new(MlmcModel::new(
            levels.clone(),
            snapshot.costs,
            self.statistic,
            var_h,
        )?))
    }

    fn formulate_constraints(
        &self,
        _topology: &Topology,
        model: &dyn VarianceModel,
        existing: &ExistingSamples,
    ) -> ConstraintSet {
        let lower = level_groups(model.num_variables())
            .iter()
            .map(|g| existing.group(g).max(1.0).ln())
            .collect();
        ConstraintSet {
            bounds: Bounds::new(lower, vec![f64::INFINITY; model.num_variables()]),
            constraints: Vec::new(),
        }
    }

    fn initial_guesses(
        &self,
        snapshot: &Snapshot<'_>,
        _topology: &Topology,
        model: &dyn VarianceModel,
        goal: Goal,
        metric: MetricReduction,
    ) -> Result<Vec<Guess>> {
        let levels = snapshot
            .levels
            .ok_or_else(|| Error::config("MLMC needs level statistics"))?;
        let nq = levels.num_qoi() as f64;
        let mean_v: Vec<f64> = (0..levels.num_levels())
            .map(|l| (0..levels.num_qoi()).map(|q| levels.variance(l, q)).sum::<f64>() / nq)
            .collect();
        let c_h = snapshot.costs[snapshot.costs.len() - 1];
        let weights: Vec<f64> = level_costs(snapshot.costs).iter().map(|c| c / c_h).collect();
        let counts = match goal {
            Goal::Budget(b) => mlmc_budget_allocation(&mean_v, &weights, b),
            Goal::Accuracy(t) => mlmc_accuracy_allocation(&mean_v, &weights, t),
        };
        let counts: Vec<f64> = counts.into_iter().map(|n| n.max(1.0)).collect();
        let exact = self.statistic == Statistic::Mean
            && (levels.num_qoi() == 1 || metric == MetricReduction::Average);
        let mut guesses = vec![Guess {
            design: counts,
            exact,
            label: "mlmc-analytic",
        }];
        if self.statistic == Statistic::Variance {
            // Refit the mean-optimal shape to the variance-of-variance goal.
            let refit = fit_to_goal(model, &guesses[0].design, goal, metric)?;
            guesses.push(Guess::heuristic(refit, "mlmc-refit"));
        }
        Ok(guesses)
    }
}

/// Multilevel BLUE over a (throttled) group pool.
#[derive(Debug, Clone)]
pub struct MlBlueStrategy {
    pool: GroupPool,
    throttle: Option<GroupThrottle>,
}

impl MlBlueStrategy {
    pub fn new(pool: GroupPool, throttle: Option<GroupThrottle>) -> Self {
        MlBlueStrategy { pool, throttle }
    }
}

impl AllocationStrategy for MlBlueStrategy {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::MlBlue
    }

    fn enumerate_groups(&self, snapshot: &Snapshot<'_>) -> Result<Vec<Topology>> {
        let mut groups = self.pool.groups(snapshot.cov.num_approx())?;
        if let Some(t) = &self.throttle {
            groups = throttle_groups(groups, snapshot.cov, t);
        }
        Ok(vec![Topology::Groups(groups)])
    }

    fn build_variance_model(
        &self,
        snapshot: &Snapshot<'_>,
        topology: &Topology,
    ) -> Result<Box<dyn VarianceModel>> {
        let Topology::Groups(groups) = topology else {
            return Err(Error::config("ML-BLUE needs a group pool"));
        };
        Ok(Box::new(BlueModel::new(
            snapshot.cov.clone(),
            groups.clone(),
            snapshot.costs,
        )?))
    }

    fn formulate_constraints(
        &self,
        topology: &Topology,
        _model: &dyn VarianceModel,
        existing: &ExistingSamples,
    ) -> ConstraintSet {
        let groups: &[ModelGroup] = match topology {
            Topology::Groups(g) => g,
            _ => &[],
        };
        let truth = existing.num_models().saturating_sub(1);
        let lower: Vec<f64> = groups
            .iter()
            .map(|g| existing.group(g).max(MIN_GROUP_SAMPLES).ln())
            .collect();
        let truth_groups: Vec<usize> = (0..groups.len())
            .filter(|&k| groups[k].contains(truth))
            .collect();
        ConstraintSet {
            bounds: Bounds::new(lower, vec![f64::INFINITY; groups.len()]),
            constraints: vec![Constraint::Coverage {
                vars: truth_groups,
                min: 1.0,
            }],
        }
    }

    fn initial_guesses(
        &self,
        _snapshot: &Snapshot<'_>,
        topology: &Topology,
        model: &dyn VarianceModel,
        goal: Goal,
        metric: MetricReduction,
    ) -> Result<Vec<Guess>> {
        let Topology::Groups(groups) = topology else {
            return Err(Error::config("ML-BLUE needs a group pool"));
        };
        let uniform = vec![1.0; groups.len()];
        // one unit of a group costs its weight, so 1/weight spreads cost evenly
        let unit = model.cost(&uniform);
        let inverse_cost: Vec<f64> = (0..groups.len())
            .map(|k| {
                let mut e = vec![0.0; groups.len()];
                e[k] = 1.0;
                let w = model.cost(&e);
                if w > 0.0 {
                    (unit / w).min(MAX_RATIO)
                } else {
                    1.0
                }
            })
            .collect();
        Ok(vec![
            Guess::heuristic(fit_to_goal(model, &uniform, goal, metric)?, "uniform"),
            Guess::heuristic(fit_to_goal(model, &inverse_cost, goal, metric)?, "inverse-cost"),
        ])
    }
}
