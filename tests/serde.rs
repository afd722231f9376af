mod common;

use fidelis::{
    Accumulators, AllocationRequest, Allocator, Config, CovarianceSet, EstimatorKind,
    ExistingSamples, Goal, GroupPool, MetricReduction, Relaxation, SampleStructure, Snapshot,
    SolutionData,
};

#[test]
fn roundtrip_config_json() {
    let config = Config {
        estimator: EstimatorKind::GenAcv(SampleStructure::Recursive),
        budget: Some(250.0),
        relaxation: Relaxation::Recursive {
            initial: 0.3,
            damping: 0.5,
        },
        metric: MetricReduction::PNorm(3.0),
        group_pool: GroupPool::Custom(vec![vec![0, 1], vec![2]]),
        model_selection: true,
        ..Config::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    let back: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(config, back);
    assert!(back.validate_for(&common::COSTS).is_ok());
}

#[test]
fn roundtrip_solution_json() {
    let cov = CovarianceSet::from_matrices(vec![common::exact_covariance()]).unwrap();
    for kind in [EstimatorKind::AcvMf, EstimatorKind::MlBlue] {
        let config = Config {
            estimator: kind,
            budget: Some(100.0),
            ..Config::default()
        };
        let existing = ExistingSamples::none(3);
        let solution = Allocator::new(&config)
            .allocate(
                config.estimator.strategy(&config).as_ref(),
                &Snapshot {
                    cov: &cov,
                    levels: None,
                    costs: &common::COSTS,
                },
                &AllocationRequest {
                    goal: Goal::Budget(100.0),
                    metric: MetricReduction::Average,
                    existing: &existing,
                    previous: None,
                },
            )
            .unwrap();

        let json = serde_json::to_string(&solution).unwrap();
        let back: SolutionData = serde_json::from_str(&json).unwrap();
        assert_eq!(solution.topology(), back.topology());
        assert_eq!(solution.counts(), back.counts());
        assert_eq!(solution.metric(), back.metric());
    }
}

#[test]
fn deserialized_accumulators_keep_accumulating() {
    let batch = |offset: f64| -> Vec<Vec<Vec<f64>>> {
        (0..10)
            .map(|s| {
                let x = s as f64 * 0.3 + offset;
                vec![vec![x], vec![x + 0.1 * x * x], vec![x.sin()]]
            })
            .collect()
    };
    let mut acc = Accumulators::new(3, 1);
    acc.accumulate(&[0, 1, 2], &batch(0.0)).unwrap();

    let json = serde_json::to_string(&acc).unwrap();
    let mut resumed: Accumulators = serde_json::from_str(&json).unwrap();
    assert_eq!(acc, resumed);

    acc.accumulate(&[0, 1, 2], &batch(1.0)).unwrap();
    resumed.accumulate(&[0, 1, 2], &batch(1.0)).unwrap();
    assert_eq!(
        CovarianceSet::from_accumulators(&acc).unwrap(),
        CovarianceSet::from_accumulators(&resumed).unwrap()
    );
}
