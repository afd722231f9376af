use std::fmt;

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct OptimResult<F> {
    /// Solution point.
    pub x: Vec<F>,
    /// Objective value at the solution.
    pub value: F,
    /// Gradient at the solution.
    pub gradient: Vec<F>,
    /// Norm of the projected gradient at the solution.
    pub gradient_norm: F,
    /// Number of outer iterations performed.
    pub iterations: usize,
    /// Total number of objective function evaluations.
    pub func_evals: usize,
    /// Reason for termination.
    pub termination: TerminationReason,
}

impl<F> OptimResult<F> {
    /// Whether the run stopped on a convergence test rather than a failure.
    ///
    /// Hitting the iteration limit still leaves a usable point and counts as success.
    pub fn is_usable(&self) -> bool {
        !matches!(
            self.termination,
            TerminationReason::NumericalError | TerminationReason::InvalidConfig
        )
    }
}

/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Gradient norm fell below tolerance.
    GradientNorm,
    /// Step size fell below tolerance.
    StepSize,
    /// Change in objective value fell below tolerance.
    FunctionChange,
    /// Simplex collapsed below the size tolerance (derivative-free solvers).
    SimplexSize,
    /// Reached the maximum number of iterations.
    MaxIterations,
    /// Line search could not find a sufficient decrease.
    LineSearchFailed,
    /// A numerical error occurred (e.g. singular Hessian, NaN).
    NumericalError,
    /// The solver configuration cannot run (zero iterations, bad radius, ...).
    InvalidConfig,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::GradientNorm => write!(f, "gradient norm below tolerance"),
            TerminationReason::StepSize => write!(f, "step size below tolerance"),
            TerminationReason::FunctionChange => write!(f, "function change below tolerance"),
            TerminationReason::SimplexSize => write!(f, "simplex size below tolerance"),
            TerminationReason::MaxIterations => write!(f, "maximum iterations reached"),
            TerminationReason::LineSearchFailed => write!(f, "line search failed"),
            TerminationReason::NumericalError => write!(f, "numerical error"),
            TerminationReason::InvalidConfig => write!(f, "invalid solver configuration"),
        }
    }
}

/// Result of a constrained (nonlinear-program) solve.
#[derive(Debug, Clone)]
pub struct NlpResult<F> {
    /// Solution point (inside the bounds).
    pub x: Vec<F>,
    /// Objective value at `x`.
    pub objective: F,
    /// Constraint values `c_j(x)`; feasible when all are `<= 0`.
    pub constraints: Vec<F>,
    /// Largest positive constraint value (zero when feasible).
    pub max_violation: F,
    /// Lagrange multiplier estimates, one per constraint.
    pub multipliers: Vec<F>,
    /// Number of augmented-Lagrangian outer iterations.
    pub outer_iterations: usize,
    /// Total inner-solver objective evaluations.
    pub func_evals: usize,
    /// Termination of the final inner solve.
    pub termination: TerminationReason,
}

impl<F> NlpResult<F> {
    /// Whether the final inner solve left a point worth inspecting.
    pub fn is_usable(&self) -> bool {
        !matches!(
            self.termination,
            TerminationReason::NumericalError | TerminationReason::InvalidConfig
        )
    }
}
