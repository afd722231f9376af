//! Inequality-constrained minimization through a PHR augmented Lagrangian.
//!
//! Problems have the form
//!
//! ```text
//! minimize f(x)  subject to  c_j(x) <= 0,  lower <= x <= upper
//! ```
//!
//! Box constraints go straight to the bound-aware inner solvers; the general
//! constraints are folded into
//! `L(x) = f(x) + 1/(2ρ) Σ_j (max(0, λ_j + ρ c_j(x))² − λ_j²)`.

use num_traits::Float;

use crate::bounds::Bounds;
use crate::convergence::lit;
use crate::objective::{FnObjective, Objective};
use crate::result::{NlpResult, OptimResult, TerminationReason};
use crate::solvers::lbfgs::{lbfgs, LbfgsConfig};
use crate::solvers::nelder_mead::{nelder_mead, NelderMeadConfig};
use crate::solvers::newton::{newton, NewtonConfig};
use crate::solvers::trust_region::{trust_region, TrustRegionConfig};

/// A smooth nonlinear program with inequality constraints `c_j(x) <= 0`.
pub trait NlpProblem<F: Float> {
    /// Number of design variables.
    fn dim(&self) -> usize;

    /// Number of inequality constraints.
    fn num_constraints(&self) -> usize;

    /// Objective value at `x`. Non-finite values are treated as "worse than anything".
    fn objective(&mut self, x: &[F]) -> F;

    /// Constraint values at `x`, length [`num_constraints`](Self::num_constraints).
    fn constraints(&mut self, x: &[F]) -> Vec<F>;
}

/// Unconstrained (box-only) solver used for the augmented-Lagrangian subproblems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Lbfgs,
    TrustRegion,
    Newton,
    NelderMead,
}

/// Configuration for [`augmented_lagrangian`].
#[derive(Debug, Clone)]
pub struct NlpConfig<F> {
    /// Subproblem solver.
    pub backend: Backend,
    /// Maximum number of multiplier updates (default: 30).
    pub max_outer: usize,
    /// Initial penalty parameter ρ (default: 10).
    pub initial_penalty: F,
    /// Penalty growth factor when the violation stalls (default: 10).
    pub penalty_growth: F,
    /// Upper limit on ρ (default: 1e8).
    pub max_penalty: F,
    /// Largest constraint value still counted as feasible (default: 1e-6).
    pub constraint_tol: F,
    /// Relative objective change between outer iterations that ends the run
    /// once feasible (default: 1e-8).
    pub objective_tol: F,
    pub lbfgs: LbfgsConfig<F>,
    pub trust_region: TrustRegionConfig<F>,
    pub newton: NewtonConfig<F>,
    pub nelder_mead: NelderMeadConfig<F>,
}

impl Default for NlpConfig<f64> {
    fn default() -> Self {
        NlpConfig {
            backend: Backend::default(),
            max_outer: 30,
            initial_penalty: 10.0,
            penalty_growth: 10.0,
            max_penalty: 1e8,
            constraint_tol: 1e-6,
            objective_tol: 1e-8,
            lbfgs: LbfgsConfig::default(),
            trust_region: TrustRegionConfig::default(),
            newton: NewtonConfig::default(),
            nelder_mead: NelderMeadConfig::default(),
        }
    }
}

impl<F: Float> NlpConfig<F> {
    /// Same settings with a different subproblem solver.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }
}

impl Backend {
    /// Minimize `obj` over `bounds` from `x0` with this backend.
    pub fn minimize<F: Float, O: Objective<F>>(
        self,
        obj: &mut O,
        x0: &[F],
        bounds: &Bounds<F>,
        config: &NlpConfig<F>,
    ) -> OptimResult<F> {
        match self {
            Backend::Lbfgs => lbfgs(obj, x0, bounds, &config.lbfgs),
            Backend::TrustRegion => trust_region(obj, x0, bounds, &config.trust_region),
            Backend::Newton => newton(obj, x0, bounds, &config.newton),
            Backend::NelderMead => nelder_mead(obj, x0, bounds, &config.nelder_mead),
        }
    }
}

/// Anything that can solve an [`NlpProblem`].
pub trait NlpBackend<F: Float> {
    fn solve<P: NlpProblem<F>>(&self, problem: &mut P, x0: &[F], bounds: &Bounds<F>)
        -> NlpResult<F>;
}

impl<F: Float> NlpBackend<F> for NlpConfig<F> {
    fn solve<P: NlpProblem<F>>(
        &self,
        problem: &mut P,
        x0: &[F],
        bounds: &Bounds<F>,
    ) -> NlpResult<F> {
        augmented_lagrangian(problem, x0, bounds, self)
    }
}

fn max_violation<F: Float>(c: &[F]) -> F {
    c.iter().fold(F::zero(), |m, &v| {
        if v.is_nan() {
            F::infinity()
        } else {
            m.max(v)
        }
    })
}

/// Solve `problem` with the Powell–Hestenes–Rockafellar augmented Lagrangian.
///
/// Each outer iteration minimizes `L(·; λ, ρ)` over the box with the configured
/// backend, then updates `λ_j ← max(0, λ_j + ρ c_j)`. The penalty grows by
/// `penalty_growth` whenever the violation fails to drop below a quarter of
/// the previous one.
///
/// If the final iterate is infeasible but an earlier outer iterate was
/// feasible, the best feasible iterate is returned instead.
pub fn augmented_lagrangian<F: Float, P: NlpProblem<F>>(
    problem: &mut P,
    x0: &[F],
    bounds: &Bounds<F>,
    config: &NlpConfig<F>,
) -> NlpResult<F> {
    let n = problem.dim();
    let m = problem.num_constraints();

    if x0.len() != n || bounds.dim() != n || config.max_outer == 0 {
        return NlpResult {
            x: x0.to_vec(),
            objective: F::nan(),
            constraints: vec![F::nan(); m],
            max_violation: F::infinity(),
            multipliers: vec![F::zero(); m],
            outer_iterations: 0,
            func_evals: 0,
            termination: TerminationReason::InvalidConfig,
        };
    }

    let mut x = bounds.projected(x0);
    let mut lambda = vec![F::zero(); m];
    let mut rho = config.initial_penalty.max(F::epsilon());
    let half = lit::<F>(0.5);
    let quarter = lit::<F>(0.25);

    let mut f_x = problem.objective(&x);
    let mut c_x = problem.constraints(&x);
    let mut func_evals = 1usize;
    let mut violation = max_violation(&c_x);
    let mut best: Option<(Vec<F>, F, Vec<F>)> = None;
    if violation <= config.constraint_tol && f_x.is_finite() {
        best = Some((x.clone(), f_x, c_x.clone()));
    }

    let mut termination = TerminationReason::MaxIterations;
    let mut outer = 0;

    while outer < config.max_outer {
        outer += 1;
        let lam = lambda.clone();
        let penalty = rho;
        let mut merit = FnObjective::new(n, |z: &[F]| {
            let f = problem.objective(z);
            if !f.is_finite() {
                return F::infinity();
            }
            let c = problem.constraints(z);
            let mut shift = F::zero();
            for (cj, lj) in c.iter().zip(&lam) {
                let t = (*lj + penalty * *cj).max(F::zero());
                shift = shift + t * t - *lj * *lj;
            }
            f + half * shift / penalty
        });

        let inner = config.backend.minimize(&mut merit, &x, bounds, config);
        func_evals += merit.func_evals();
        termination = inner.termination;
        let usable = inner.is_usable();
        if !usable && inner.x.iter().any(|v| !v.is_finite()) {
            break;
        }

        let f_prev = f_x;
        x = inner.x;
        f_x = problem.objective(&x);
        c_x = problem.constraints(&x);
        func_evals += 1;
        let new_violation = max_violation(&c_x);

        for (lj, cj) in lambda.iter_mut().zip(&c_x) {
            *lj = (*lj + rho * *cj).max(F::zero());
        }

        let feasible = new_violation <= config.constraint_tol && f_x.is_finite();
        if feasible {
            let improves = best.as_ref().map_or(true, |(_, fb, _)| f_x <= *fb);
            if improves {
                best = Some((x.clone(), f_x, c_x.clone()));
            }
        }

        let rel_change = (f_prev - f_x).abs() / f_x.abs().max(F::one());
        if feasible && rel_change <= config.objective_tol && outer > 1 {
            violation = new_violation;
            break;
        }

        if new_violation > quarter * violation && new_violation > config.constraint_tol {
            rho = (rho * config.penalty_growth).min(config.max_penalty);
        }
        violation = new_violation;

        if !usable {
            break;
        }
    }

    if violation > config.constraint_tol || !f_x.is_finite() {
        if let Some((xb, fb, cb)) = best {
            x = xb;
            f_x = fb;
            violation = max_violation(&cb);
            c_x = cb;
        }
    }

    NlpResult {
        x,
        objective: f_x,
        constraints: c_x,
        max_violation: violation,
        multipliers: lambda,
        outer_iterations: outer,
        func_evals,
        termination,
    }
}
