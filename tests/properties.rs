mod common;

use approx::relative_eq;
use fidelis::{
    Accumulators, AllocationRequest, Allocator, Config, CovarianceSet, EstimatorKind,
    ExistingSamples, Goal, MetricReduction, Snapshot,
};
use nalgebra::DMatrix;
use proptest::prelude::*;

fn covariance_from(loadings: &[f64]) -> CovarianceSet {
    let a = DMatrix::from_row_slice(3, 3, loadings);
    let cov = &a * a.transpose() + DMatrix::identity(3, 3) * 0.05;
    CovarianceSet::from_matrices(vec![cov]).unwrap()
}

fn allocate(kind: EstimatorKind, cov: &CovarianceSet, budget: f64) -> fidelis::SolutionData {
    let config = Config {
        estimator: kind,
        budget: Some(budget),
        ..Config::default()
    };
    let existing = ExistingSamples::none(3);
    Allocator::new(&config)
        .allocate(
            config.estimator.strategy(&config).as_ref(),
            &Snapshot {
                cov,
                levels: None,
                costs: &common::COSTS,
            },
            &AllocationRequest {
                goal: Goal::Budget(budget),
                metric: MetricReduction::Average,
                existing: &existing,
                previous: None,
            },
        )
        .unwrap()
}

fn batch(values: &[(f64, f64)]) -> Vec<Vec<Vec<f64>>> {
    values
        .iter()
        .map(|&(x, y)| vec![vec![x], vec![x + 0.3 * y], vec![x + 0.3 * y + 0.1 * x * y]])
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn allocations_stay_within_budget(
        loadings in prop::collection::vec(-1.0f64..1.0, 9),
        budget in 10.0f64..1e4,
    ) {
        let cov = covariance_from(&loadings);
        for kind in [EstimatorKind::AcvIs, EstimatorKind::AcvMf, EstimatorKind::Mfmc] {
            let sol = allocate(kind, &cov, budget);
            prop_assert!(sol.equivalent_cost() <= budget * (1.0 + 1e-5), "{:?}", kind);
            let r = sol.variance_ratios()[0];
            prop_assert!((0.0..=1.0 + 1e-9).contains(&r), "{:?}: {}", kind, r);
        }
    }

    #[test]
    fn merged_accumulators_match_one_pass(
        values in prop::collection::vec((-10.0f64..10.0, -10.0f64..10.0), 4..40),
        split in 2usize..40,
    ) {
        let split = split.min(values.len() - 2);
        let mut whole = Accumulators::new(3, 1);
        whole.accumulate(&[0, 1, 2], &batch(&values)).unwrap();

        let mut head = Accumulators::new(3, 1);
        let mut tail = Accumulators::new(3, 1);
        head.accumulate(&[0, 1, 2], &batch(&values[..split])).unwrap();
        tail.accumulate(&[0, 1, 2], &batch(&values[split..])).unwrap();
        head.merge(&tail).unwrap();

        let a = CovarianceSet::from_accumulators(&whole).unwrap();
        let b = CovarianceSet::from_accumulators(&head).unwrap();
        for (x, y) in a.full(0).iter().zip(b.full(0).iter()) {
            prop_assert!(relative_eq!(*x, *y, epsilon = 1e-9, max_relative = 1e-8));
        }
    }

    #[test]
    fn accumulation_is_deterministic(
        values in prop::collection::vec((-10.0f64..10.0, -10.0f64..10.0), 2..40),
    ) {
        let run = || {
            let mut acc = Accumulators::new(3, 1);
            for chunk in values.chunks(3) {
                acc.accumulate(&[0, 1, 2], &batch(chunk)).unwrap();
            }
            CovarianceSet::from_accumulators(&acc).unwrap()
        };
        prop_assert_eq!(run(), run());
    }
}
