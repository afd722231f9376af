use num_traits::Float;

use crate::bounds::Bounds;
use crate::convergence::{distance, dot, ConvergenceParams};
use crate::iterate::{admissible, check_start, check_step, rejected, Counters, Iterate};
use crate::line_search::{projected_backtrack, Backtracking};
use crate::linalg::Cholesky;
use crate::objective::Objective;
use crate::result::{OptimResult, TerminationReason};

/// Shifts tried before the reduced Hessian is given up on.
const MAX_SHIFTS: usize = 12;

/// Settings for [`newton`].
#[derive(Debug, Clone)]
pub struct NewtonConfig<F> {
    pub convergence: ConvergenceParams<F>,
    pub line_search: Backtracking<F>,
    /// First diagonal shift, relative to the largest Hessian diagonal entry,
    /// tried when the free block is not positive definite (default: 1e-8).
    pub regularization: F,
}

impl Default for NewtonConfig<f64> {
    fn default() -> Self {
        NewtonConfig {
            convergence: ConvergenceParams::default(),
            line_search: Backtracking::default(),
            regularization: 1e-8,
        }
    }
}

/// Projected Newton method with a shifted Cholesky solve.
///
/// Held variables take a gradient step onto their bound. The free block of
/// the Hessian (from `obj.eval_hessian`) is shifted until it factors, and the
/// resulting step is searched along the projected path.
///
/// Stops with [`TerminationReason::NumericalError`] when the Hessian has
/// non-finite entries.
pub fn newton<F: Float, O: Objective<F>>(
    obj: &mut O,
    x0: &[F],
    bounds: &Bounds<F>,
    config: &NewtonConfig<F>,
) -> OptimResult<F> {
    let conv = &config.convergence;
    if !admissible(conv, bounds, x0.len()) {
        return rejected(x0);
    }

    let x = bounds.projected(x0);
    let (value, gradient, mut hessian) = obj.eval_hessian(&x);
    let mut current = Iterate::new(x, value, gradient, bounds);
    let mut count = Counters::started();
    if let Some(reason) = check_start(conv, &current) {
        return count.finish(current, reason);
    }

    while count.iterations < conv.max_iter {
        let held = current.held(bounds);
        let Some(direction) = newton_direction(&hessian, &current.gradient, &held, config.regularization)
        else {
            return count.finish(current, TerminationReason::NumericalError);
        };

        let search = projected_backtrack(obj, &current, &direction, bounds, &config.line_search);
        count.func_evals += search.evals;
        let Some(next) = search.accepted else {
            return count.finish(current, TerminationReason::LineSearchFailed);
        };
        count.iterations += 1;

        let step = distance(&next.x, &current.x);
        let previous = current.value;
        let (value, gradient, h) = obj.eval_hessian(&next.x);
        count.func_evals += 1;
        hessian = h;
        current = Iterate::new(next.x, value, gradient, bounds);
        if let Some(reason) = check_step(conv, &current, step, previous) {
            return count.finish(current, reason);
        }
    }

    count.finish(current, TerminationReason::MaxIterations)
}

/// Newton step on the free variables, gradient step on the held ones.
fn newton_direction<F: Float>(
    hessian: &[Vec<F>],
    gradient: &[F],
    held: &[bool],
    regularization: F,
) -> Option<Vec<F>> {
    let free: Vec<usize> = (0..gradient.len()).filter(|&i| !held[i]).collect();
    let mut direction: Vec<F> = gradient.iter().map(|&g| F::zero() - g).collect();
    if free.is_empty() {
        return Some(direction);
    }

    let block: Vec<Vec<F>> = free
        .iter()
        .map(|&i| free.iter().map(|&j| hessian[i][j]).collect())
        .collect();
    let rhs: Vec<F> = free.iter().map(|&i| direction[i]).collect();
    let (factor, _) = Cholesky::regularized(&block, regularization.max(F::epsilon()), MAX_SHIFTS)?;
    let step = factor.solve(&rhs);
    if step.iter().any(|s| !s.is_finite()) {
        return None;
    }

    let mut newton = direction.clone();
    for (&i, &si) in free.iter().zip(&step) {
        newton[i] = si;
    }
    // a heavily shifted block can round the step into an ascent direction
    if dot(&newton, gradient) < F::zero() {
        direction = newton;
    }
    Some(direction)
}
