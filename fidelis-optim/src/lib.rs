//! Box- and inequality-constrained minimization for small dense problems.
//!
//! The unconstrained solvers ([`lbfgs`], [`newton`], [`trust_region`],
//! [`nelder_mead`]) all accept simple bounds. General constraints
//! `c(x) <= 0` go through [`augmented_lagrangian`], which calls one of them
//! on each subproblem.

pub mod bounds;
pub mod convergence;
pub mod finite_diff;
mod iterate;
pub mod line_search;
pub mod linalg;
pub mod nlp;
pub mod objective;
pub mod result;
pub mod solvers;

pub use bounds::Bounds;
pub use convergence::ConvergenceParams;
pub use line_search::Backtracking;
pub use linalg::Cholesky;
pub use nlp::{augmented_lagrangian, Backend, NlpBackend, NlpConfig, NlpProblem};
pub use objective::{FnObjective, Objective};
pub use result::{NlpResult, OptimResult, TerminationReason};
pub use solvers::lbfgs::{lbfgs, LbfgsConfig};
pub use solvers::nelder_mead::{nelder_mead, NelderMeadConfig};
pub use solvers::newton::{newton, NewtonConfig};
pub use solvers::trust_region::{trust_region, TrustRegionConfig};
