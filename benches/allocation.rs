use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fidelis::variance::acv::AcvModel;
use fidelis::{
    AllocationRequest, Allocator, Config, CovarianceSet, EstimatorKind, ExistingSamples, Goal,
    MetricReduction, ModelDag, SampleStructure, Snapshot, VarianceModel,
};

#[path = "common/mod.rs"]
mod common;
use common::*;

fn bench_acv_variance(c: &mut Criterion) {
    let mut group = c.benchmark_group("acv_variance");
    for num_models in [3, 5, 8] {
        let cov = CovarianceSet::from_matrices(vec![ensemble_covariance(num_models)]).unwrap();
        let costs = ensemble_costs(num_models);
        let mut design = ensemble_ratios(num_models - 1);
        design.push(10.0);

        for (name, structure) in [
            ("mf", SampleStructure::Nested),
            ("is", SampleStructure::Independent),
            ("rd", SampleStructure::Recursive),
        ] {
            let model = AcvModel::new(
                cov.clone(),
                ModelDag::all_to_truth(num_models - 1),
                structure,
                &costs,
            )
            .unwrap();
            group.bench_with_input(BenchmarkId::new(name, num_models), &design, |b, d| {
                b.iter(|| black_box(model.variances(black_box(d)).unwrap()))
            });
        }
    }
    group.finish();
}

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");
    group.sample_size(20);
    for num_models in [3, 5] {
        let cov = CovarianceSet::from_matrices(vec![ensemble_covariance(num_models)]).unwrap();
        let costs = ensemble_costs(num_models);
        let existing = ExistingSamples::none(num_models);

        for (name, kind) in [
            ("mfmc", EstimatorKind::Mfmc),
            ("acvmf", EstimatorKind::AcvMf),
            ("genacv", EstimatorKind::GenAcv(SampleStructure::Nested)),
            ("mlblue", EstimatorKind::MlBlue),
        ] {
            let config = Config {
                estimator: kind,
                budget: Some(1000.0),
                ..Config::default()
            };
            let strategy = kind.strategy(&config);
            let allocator = Allocator::new(&config);
            let snapshot = Snapshot {
                cov: &cov,
                levels: None,
                costs: &costs,
            };
            let request = AllocationRequest {
                goal: Goal::Budget(1000.0),
                metric: MetricReduction::Average,
                existing: &existing,
                previous: None,
            };
            group.bench_function(BenchmarkId::new(name, num_models), |b| {
                b.iter(|| {
                    black_box(
                        allocator
                            .allocate(strategy.as_ref(), &snapshot, &request)
                            .unwrap(),
                    )
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_acv_variance, bench_allocate);
criterion_main!(benches);
