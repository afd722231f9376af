//! Bookkeeping shared by the gradient-based solvers.

use num_traits::Float;

use crate::bounds::Bounds;
use crate::convergence::{lit, ConvergenceParams};
use crate::objective::Objective;
use crate::result::{OptimResult, TerminationReason};

/// Widest band next to a bound in which a variable can be held.
const HOLD_WIDTH: f64 = 1e-3;

/// A point together with everything the solvers read back from it.
#[derive(Debug, Clone)]
pub(crate) struct Iterate<F> {
    pub x: Vec<F>,
    pub value: F,
    pub gradient: Vec<F>,
    /// Norm of `P(x - g) - x`.
    pub pg_norm: F,
}

impl<F: Float> Iterate<F> {
    pub fn evaluate<O: Objective<F>>(obj: &mut O, x: Vec<F>, bounds: &Bounds<F>) -> Self {
        let (value, gradient) = obj.eval_grad(&x);
        Self::new(x, value, gradient, bounds)
    }

    pub fn new(x: Vec<F>, value: F, gradient: Vec<F>, bounds: &Bounds<F>) -> Self {
        let pg_norm = bounds.projected_gradient_norm(&x, &gradient);
        Iterate {
            x,
            value,
            gradient,
            pg_norm,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.gradient.iter().all(|g| g.is_finite())
    }

    /// Variables the gradient pins against a nearby bound.
    ///
    /// The band shrinks with the projected gradient, so the held set settles
    /// to the true active set as the iterates converge.
    pub fn held(&self, bounds: &Bounds<F>) -> Vec<bool> {
        let width = self.pg_norm.min(lit(HOLD_WIDTH));
        bounds.binding(&self.x, &self.gradient, width)
    }
}

/// Iteration and evaluation counts of a running solver.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Counters {
    pub iterations: usize,
    pub func_evals: usize,
}

impl Counters {
    pub fn started() -> Self {
        Counters {
            iterations: 0,
            func_evals: 1,
        }
    }

    pub fn finish<F: Float>(self, at: Iterate<F>, termination: TerminationReason) -> OptimResult<F> {
        OptimResult {
            x: at.x,
            value: at.value,
            gradient: at.gradient,
            gradient_norm: at.pg_norm,
            iterations: self.iterations,
            func_evals: self.func_evals,
            termination,
        }
    }
}

/// Whether a solver can run at all on `n` variables.
pub(crate) fn admissible<F: Float>(conv: &ConvergenceParams<F>, bounds: &Bounds<F>, n: usize) -> bool {
    conv.max_iter > 0 && n > 0 && bounds.dim() == n
}

pub(crate) fn rejected<F: Float>(x0: &[F]) -> OptimResult<F> {
    OptimResult {
        x: x0.to_vec(),
        value: F::nan(),
        gradient: Vec::new(),
        gradient_norm: F::infinity(),
        iterations: 0,
        func_evals: 0,
        termination: TerminationReason::InvalidConfig,
    }
}

/// Checks made once at the starting point.
pub(crate) fn check_start<F: Float>(
    conv: &ConvergenceParams<F>,
    start: &Iterate<F>,
) -> Option<TerminationReason> {
    if !start.is_finite() {
        Some(TerminationReason::NumericalError)
    } else if start.pg_norm < conv.grad_tol {
        Some(TerminationReason::GradientNorm)
    } else {
        None
    }
}

/// Checks made after every accepted step of length `step`.
pub(crate) fn check_step<F: Float>(
    conv: &ConvergenceParams<F>,
    accepted: &Iterate<F>,
    step: F,
    previous_value: F,
) -> Option<TerminationReason> {
    if accepted.pg_norm < conv.grad_tol {
        Some(TerminationReason::GradientNorm)
    } else if step < conv.step_tol {
        Some(TerminationReason::StepSize)
    } else if conv.func_tol > F::zero() && (previous_value - accepted.value).abs() < conv.func_tol {
        Some(TerminationReason::FunctionChange)
    } else {
        None
    }
}

/// `a - b` componentwise.
pub(crate) fn difference<F: Float>(a: &[F], b: &[F]) -> Vec<F> {
    a.iter().zip(b).map(|(&x, &y)| x - y).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_set_needs_an_outward_gradient() {
        let bounds = Bounds::new(vec![0.0, 0.0], vec![1.0, 1.0]);
        // x0 on its lower bound pushed down; x1 on its lower bound pulled up.
        let at = Iterate::new(vec![0.0, 0.0], 0.0, vec![2.0, -2.0], &bounds);
        assert_eq!(at.held(&bounds), vec![true, false]);
    }

    #[test]
    fn step_checks_in_priority_order() {
        let conv = ConvergenceParams {
            func_tol: 1e-3,
            ..ConvergenceParams::default()
        };
        let bounds = Bounds::unbounded(1);
        let flat = Iterate::new(vec![0.0], 1.0, vec![0.0], &bounds);
        assert_eq!(check_step(&conv, &flat, 1.0, 2.0), Some(TerminationReason::GradientNorm));
        let sloped = Iterate::new(vec![0.0], 1.0, vec![1.0], &bounds);
        assert_eq!(check_step(&conv, &sloped, 0.0, 2.0), Some(TerminationReason::StepSize));
        assert_eq!(
            check_step(&conv, &sloped, 1.0, 1.0 + 1e-4),
            Some(TerminationReason::FunctionChange)
        );
        assert_eq!(check_step(&conv, &sloped, 1.0, 2.0), None);
    }
}
