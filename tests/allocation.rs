mod common;

use approx::assert_relative_eq;
use fidelis::variance::acv::acv_variance_ratio;
use fidelis::{
    AllocationRequest, Allocator, Config, CovarianceSet, EstimatorKind, ExistingSamples,
    Formulation, Goal, LevelStatistics, MetricReduction, ModelDag, OptimizerBackend,
    SampleStructure, Snapshot,
};
use nalgebra::DMatrix;

fn budgeted(kind: EstimatorKind) -> Config {
    Config {
        estimator: kind,
        budget: Some(500.0),
        ..Config::default()
    }
}

fn solve(
    config: &Config,
    cov: &CovarianceSet,
    levels: Option<&LevelStatistics>,
    costs: &[f64],
    goal: Goal,
) -> fidelis::SolutionData {
    let snapshot = Snapshot {
        cov,
        levels,
        costs,
    };
    let existing = ExistingSamples::none(costs.len());
    let request = AllocationRequest {
        goal,
        metric: MetricReduction::Average,
        existing: &existing,
        previous: None,
    };
    Allocator::new(config)
        .allocate(config.estimator.strategy(config).as_ref(), &snapshot, &request)
        .unwrap()
}

#[test]
fn cheaper_approximations_never_hurt() {
    let cov = CovarianceSet::from_matrices(vec![common::exact_covariance()]).unwrap();
    for kind in [EstimatorKind::Mfmc, EstimatorKind::AcvMf] {
        let config = budgeted(kind);
        let full = solve(&config, &cov, None, &common::COSTS, Goal::Budget(500.0));
        let cheaper = solve(
            &config,
            &cov,
            None,
            &[0.005, 0.1, 1.0],
            Goal::Budget(500.0),
        );
        assert!(
            cheaper.metric() <= full.metric() * (1.0 + 1e-4),
            "{kind:?}: {} > {}",
            cheaper.metric(),
            full.metric()
        );
    }
}

#[test]
fn mlmc_allocation_decreases_with_level() {
    // level costs [1, 4, 16] from model costs [1, 3, 13]
    let costs = [1.0, 3.0, 13.0];
    let levels = LevelStatistics::from_variances(vec![vec![9.0], vec![1.0], vec![0.25]]).unwrap();
    let cov = CovarianceSet::from_matrices(vec![DMatrix::identity(3, 3)]).unwrap();
    let config = Config {
        estimator: EstimatorKind::Mlmc,
        formulation: Formulation::MinimizeCost,
        ..Config::default()
    };
    let sol = solve(&config, &cov, Some(&levels), &costs, Goal::Accuracy(0.01));
    let n = sol.counts();
    assert!(n[0] > n[1] && n[1] > n[2], "{n:?}");
    assert_relative_eq!(sol.estimator_variances()[0], 0.01, max_relative = 1e-9);
}

#[test]
fn perfect_correlation_drives_the_ratio_to_zero() {
    let cov = CovarianceSet::from_matrices(vec![DMatrix::from_element(2, 2, 1.0)]).unwrap();
    let dag = ModelDag::all_to_truth(1);
    for structure in [
        SampleStructure::Nested,
        SampleStructure::Independent,
        SampleStructure::Recursive,
    ] {
        let r = acv_variance_ratio(&cov, 0, &dag, structure, &[1e6]).unwrap();
        assert!(r < 1e-5, "{structure:?}: {r}");
    }
}

#[test]
fn uncorrelated_approximations_do_not_help() {
    let cov = CovarianceSet::from_matrices(vec![DMatrix::from_row_slice(
        3,
        3,
        &[1.0, 0.3, 0.0, 0.3, 1.0, 0.0, 0.0, 0.0, 2.0],
    )])
    .unwrap();
    let dag = ModelDag::all_to_truth(2);
    for structure in [
        SampleStructure::Nested,
        SampleStructure::Independent,
        SampleStructure::Recursive,
    ] {
        let r = acv_variance_ratio(&cov, 0, &dag, structure, &[10.0, 4.0]).unwrap();
        assert_eq!(r, 1.0);
    }

    let two = CovarianceSet::from_matrices(vec![DMatrix::from_row_slice(
        2,
        2,
        &[1.0, 0.0, 0.0, 2.0],
    )])
    .unwrap();
    let config = budgeted(EstimatorKind::Cvmc);
    let sol = solve(&config, &two, None, &[0.1, 1.0], Goal::Budget(500.0));
    assert_relative_eq!(sol.variance_ratios()[0], 1.0, epsilon = 1e-12);
}

#[test]
fn ratios_and_reference_rebuild_counts() {
    let cov = CovarianceSet::from_matrices(vec![common::exact_covariance()]).unwrap();
    for kind in [
        EstimatorKind::AcvIs,
        EstimatorKind::AcvRd,
        EstimatorKind::GenAcv(SampleStructure::Nested),
        EstimatorKind::MlBlue,
    ] {
        let config = budgeted(kind);
        let sol = solve(&config, &cov, None, &common::COSTS, Goal::Budget(500.0));
        let rebuilt: Vec<f64> = sol
            .solution_ratios()
            .iter()
            .map(|r| r * sol.solution_reference())
            .collect();
        for (a, b) in rebuilt.iter().zip(sol.counts()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
        assert!(sol.equivalent_cost() <= 500.0 * (1.0 + 1e-5), "{kind:?}");
        assert!(sol.variance_ratios()[0] <= 1.0 + 1e-12, "{kind:?}");
    }
}

#[test]
fn allocation_is_deterministic() {
    let cov = CovarianceSet::from_matrices(vec![common::exact_covariance()]).unwrap();
    let config = budgeted(EstimatorKind::AcvMf);
    let a = solve(&config, &cov, None, &common::COSTS, Goal::Budget(500.0));
    let b = solve(&config, &cov, None, &common::COSTS, Goal::Budget(500.0));
    assert_eq!(a, b);
}

#[test]
fn generalized_acv_is_no_worse_than_its_fixed_graph() {
    let cov = CovarianceSet::from_matrices(vec![common::exact_covariance()]).unwrap();
    let fixed = solve(
        &budgeted(EstimatorKind::AcvMf),
        &cov,
        None,
        &common::COSTS,
        Goal::Budget(500.0),
    );
    let searched = solve(
        &budgeted(EstimatorKind::GenAcv(SampleStructure::Nested)),
        &cov,
        None,
        &common::COSTS,
        Goal::Budget(500.0),
    );
    // the all-to-truth graph is among the candidates
    assert!(searched.metric() <= fixed.metric() * (1.0 + 1e-4));
}

#[test]
fn every_backend_reaches_the_same_allocation() {
    let cov = CovarianceSet::from_matrices(vec![common::exact_covariance()]).unwrap();
    // the nested optimum sits on the r_0 = 1 face, the independent one inside
    for kind in [EstimatorKind::AcvMf, EstimatorKind::AcvIs] {
        let metrics: Vec<f64> = [
            OptimizerBackend::Lbfgs,
            OptimizerBackend::TrustRegion,
            OptimizerBackend::Newton,
            OptimizerBackend::NelderMead,
        ]
        .into_iter()
        .map(|backend| {
            let config = Config {
                backend,
                ..budgeted(kind)
            };
            let sol = solve(&config, &cov, None, &common::COSTS, Goal::Budget(500.0));
            assert!(
                sol.equivalent_cost() <= 500.0 * (1.0 + 1e-5),
                "{kind:?} {backend:?}: cost {}",
                sol.equivalent_cost()
            );
            sol.metric()
        })
        .collect();
        let best = metrics.iter().cloned().fold(f64::INFINITY, f64::min);
        for m in &metrics {
            assert!(*m <= best * (1.0 + 1e-3), "{kind:?}: {metrics:?}");
        }
    }
}
