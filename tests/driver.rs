mod common;

use common::{Ensemble, COSTS};
use fidelis::{
    BatchRequest, BatchResponse, Config, DagLimits, Driver, EstimatorKind, Evaluator,
    EvaluatorError, Formulation, GroupPool, InputStream, MetricReduction, PilotSamples,
    Relaxation, RunState, SampleStructure, Statistic, Topology,
};

fn budgeted(kind: EstimatorKind, budget: f64) -> Config {
    Config {
        estimator: kind,
        pilot: PilotSamples::Uniform(50),
        budget: Some(budget),
        max_iterations: 6,
        ..Config::default()
    }
}

#[test]
fn every_estimator_respects_the_budget() {
    for kind in [
        EstimatorKind::Mlmc,
        EstimatorKind::Mfmc,
        EstimatorKind::AcvIs,
        EstimatorKind::AcvMf,
        EstimatorKind::AcvRd,
        EstimatorKind::GenAcv(SampleStructure::Independent),
        EstimatorKind::MlBlue,
    ] {
        let mut driver =
            Driver::new(budgeted(kind, 300.0), COSTS.to_vec(), Ensemble::new(7)).unwrap();
        let summary = driver.run().unwrap();
        assert!(summary.state.is_terminal(), "{kind:?}");
        assert!(
            summary.equivalent_cost <= 300.0 + 1e-9,
            "{kind:?}: {}",
            summary.equivalent_cost
        );
        assert!(summary.solution.metric() > 0.0, "{kind:?}");
        for m in 0..COSTS.len() {
            assert!(summary.counts.allocated(m) >= summary.counts.actual(m, 0));
        }
    }
}

#[test]
fn multifidelity_beats_plain_monte_carlo() {
    let mut driver =
        Driver::new(budgeted(EstimatorKind::AcvMf, 300.0), COSTS.to_vec(), Ensemble::new(11)).unwrap();
    let summary = driver.run().unwrap();
    // plain Monte Carlo with the whole budget on the truth model
    let var_h = summary.covariance.var_h(0);
    assert!(summary.solution.metric() < var_h / 300.0);
    // model 1 carries everything model 0 knows, so only model 1 is oversampled
    assert!(summary.counts.allocated(1) > summary.counts.allocated(2));
}

#[test]
fn mlmc_levels_get_fewer_samples_as_they_get_finer() {
    let mut driver =
        Driver::new(budgeted(EstimatorKind::Mlmc, 300.0), COSTS.to_vec(), Ensemble::new(3)).unwrap();
    let summary = driver.run().unwrap();
    assert_eq!(summary.solution.topology(), &Topology::Levels);
    let n = summary.solution.counts();
    assert!(n[0] > n[1] && n[1] > n[2], "{n:?}");
}

#[test]
fn mlmc_targets_the_variance_statistic() {
    let config = Config {
        statistic: Statistic::Variance,
        ..budgeted(EstimatorKind::Mlmc, 300.0)
    };
    let mut driver = Driver::new(config, COSTS.to_vec(), Ensemble::new(5)).unwrap();
    let summary = driver.run().unwrap();
    assert!(summary.solution.estimator_variances()[0].is_finite());
    assert!(summary.equivalent_cost <= 300.0 + 1e-9);
}

#[test]
fn failed_evaluations_are_backfilled() {
    let mut ensemble = Ensemble::new(13).with_failures(0, 10);
    let config = Config {
        formulation: Formulation::MinimizeCost,
        convergence_tol: 0.05,
        budget: None,
        ..budgeted(EstimatorKind::AcvIs, 0.0)
    };
    let summary = Driver::new(config, COSTS.to_vec(), &mut ensemble)
        .unwrap()
        .run()
        .unwrap();
    assert!(summary.counts.allocated(0) > summary.counts.actual(0, 0));
    assert_eq!(summary.counts.allocated(2), summary.counts.actual(2, 0));
    // the final pass re-requests failed evaluations
    let target = summary.solution.counts()[0];
    assert!(summary.counts.actual(0, 0) as f64 >= 0.95 * target);
    assert!(ensemble.evaluations > 0);
}

#[test]
fn relaxation_spreads_samples_over_iterations() {
    let eager = Config {
        formulation: Formulation::MinimizeCost,
        convergence_tol: 0.02,
        budget: None,
        ..budgeted(EstimatorKind::MlBlue, 0.0)
    };
    let relaxed = Config {
        relaxation: Relaxation::Fixed(vec![0.25, 0.5]),
        ..eager.clone()
    };
    let fast = Driver::new(eager, COSTS.to_vec(), Ensemble::new(17))
        .unwrap()
        .run()
        .unwrap();
    let slow = Driver::new(relaxed, COSTS.to_vec(), Ensemble::new(17))
        .unwrap()
        .run()
        .unwrap();
    assert!(fast.state.is_terminal() && fast.iterations >= 1);
    // a quarter step leaves most of the deficit for the next iteration
    assert!(slow.iterations >= 2, "{}", slow.iterations);
}

#[test]
fn several_qoi_reduce_through_the_metric() {
    let config = Config {
        metric: MetricReduction::Max,
        group_pool: GroupPool::Pairwise,
        ..budgeted(EstimatorKind::MlBlue, 300.0)
    };
    let mut driver = Driver::new(config, COSTS.to_vec(), Ensemble::new(19).with_qoi(3)).unwrap();
    let summary = driver.run().unwrap();
    let variances = summary.solution.estimator_variances();
    assert_eq!(variances.len(), 3);
    let worst = variances.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    assert_eq!(summary.solution.metric(), worst);
}

#[test]
fn tiny_budget_stops_during_the_pilot() {
    let config = budgeted(EstimatorKind::AcvMf, 10.0);
    let mut driver = Driver::new(config, COSTS.to_vec(), Ensemble::new(23)).unwrap();
    let summary = driver.run().unwrap();
    assert_eq!(summary.state, RunState::BudgetExhausted);
    assert_eq!(summary.iterations, 0);
    // 50 pilot samples would cost 55.5
    assert!(summary.counts.allocated(2) < 50);
    assert!(summary.equivalent_cost <= 10.0 + 1e-9);
}

/// Keeps every batch request it serves.
struct Recording {
    inner: Ensemble,
    requests: Vec<BatchRequest>,
}

impl Recording {
    /// End of the prefix of `stream` that `model` was evaluated on.
    fn covered(&self, model: usize, stream: InputStream) -> u64 {
        self.requests
            .iter()
            .filter(|r| r.stream == stream && r.models.contains(&model))
            .map(|r| r.first_sample + r.num_samples as u64)
            .max()
            .unwrap_or(0)
    }
}

impl Evaluator for Recording {
    fn num_qoi(&self) -> usize {
        self.inner.num_qoi()
    }

    fn evaluate_batch(&mut self, request: &BatchRequest) -> Result<BatchResponse, EvaluatorError> {
        self.requests.push(request.clone());
        self.inner.evaluate_batch(request)
    }
}

#[test]
fn graph_targets_decide_the_sample_streams() {
    let truth = COSTS.len() - 1;
    for structure in [SampleStructure::Independent, SampleStructure::Recursive] {
        let config = Config {
            estimator: EstimatorKind::GenAcv(structure),
            dag: DagLimits {
                hierarchical_only: true,
                ..DagLimits::default()
            },
            formulation: Formulation::MinimizeCost,
            convergence_tol: 0.05,
            budget: None,
            ..budgeted(EstimatorKind::AcvIs, 0.0)
        };
        let mut recording = Recording {
            inner: Ensemble::new(29),
            requests: Vec::new(),
        };
        let summary = Driver::new(config, COSTS.to_vec(), &mut recording)
            .unwrap()
            .run()
            .unwrap();
        let Topology::Dag { active, dag, .. } = summary.solution.topology() else {
            panic!("{structure:?}: expected a control-variate graph");
        };
        // hierarchical graphs over two approximations always chain them
        let child = (0..dag.num_approx())
            .find(|&i| dag.target(i) != dag.truth())
            .unwrap();
        let (c, t) = (active[child], active[dag.target(child)]);

        // the child is evaluated on every sample of its target's extension
        let extension = InputStream::Independent(t);
        assert!(recording.covered(t, extension) > 0, "{structure:?}");
        assert_eq!(
            recording.covered(c, extension),
            recording.covered(t, extension),
            "{structure:?}"
        );
        if structure == SampleStructure::Independent {
            assert!(
                recording.covered(c, InputStream::Shared)
                    >= recording.covered(truth, InputStream::Shared)
            );
        }
    }
}
