//! Sample allocation for multilevel and multifidelity Monte Carlo estimators.
//!
//! Given an ensemble of models of increasing fidelity and cost (the last one
//! being the truth model), `fidelis` decides how many samples to draw from
//! each model, level or model group so that an MLMC, MFMC, CVMC, ACV,
//! generalized ACV or ML-BLUE estimator of the truth mean has the least
//! variance for a budget, or the least cost for a target variance.
//!
//! The pieces, leaves first: [`accumulator`] power sums, [`statistics`] and
//! [`covariance`] estimates, [`topology`] enumeration, [`variance`] models,
//! the [`allocation`] solver and the [`driver`] that runs a study against an
//! [`Evaluator`].
//!
//! The `serde` feature derives serialization for configurations, solutions
//! and accumulated statistics; its round-trip tests only build with
//! `--features serde`.

pub mod accumulator;
pub mod allocation;
pub mod config;
pub mod covariance;
pub mod driver;
pub mod error;
pub mod statistics;
pub mod topology;
pub mod variance;

pub use accumulator::Accumulators;
pub use allocation::{
    AllocationRequest, AllocationStrategy, Allocator, EstimatorKind, ExistingSamples, Goal,
    Snapshot, SolutionData, Topology,
};
pub use config::{
    Config, Formulation, MetricReduction, OptimizerBackend, PilotSamples, Relaxation, Statistic,
    ToleranceKind,
};
pub use covariance::{CovarianceSet, LevelStatistics};
pub use driver::{
    BatchRequest, BatchResponse, Driver, Evaluator, EvaluatorError, FnEvaluator, InputStream,
    RunState, RunSummary, SampleCounts,
};
pub use error::{Error, Result};
pub use topology::{DagLimits, GroupPool, GroupThrottle, ModelDag, ModelGroup, ThrottleRule};
pub use variance::{SampleStructure, VarianceModel};
