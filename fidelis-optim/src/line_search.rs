//! Backtracking along the projected path `t ↦ P(x + t d)`.

use num_traits::Float;

use crate::bounds::Bounds;
use crate::convergence::{dot, lit};
use crate::iterate::Iterate;
use crate::objective::Objective;

/// Settings for the projected backtracking search.
#[derive(Debug, Clone)]
pub struct Backtracking<F> {
    /// Fraction of the first-order decrease a trial must realize (default: 1e-4).
    pub sufficient_decrease: F,
    /// Factor applied to `t` after each rejected trial (default: 0.5).
    pub contraction: F,
    /// First trial `t` (default: 1).
    pub initial_step: F,
    /// The search fails once `t` drops below this (default: 1e-16).
    pub min_step: F,
}

impl Default for Backtracking<f64> {
    fn default() -> Self {
        Backtracking {
            sufficient_decrease: 1e-4,
            contraction: 0.5,
            initial_step: 1.0,
            min_step: 1e-16,
        }
    }
}

/// Outcome of one search: the accepted point, if any, and what it cost.
pub(crate) struct Search<F> {
    pub accepted: Option<Iterate<F>>,
    pub evals: usize,
}

/// Shrink `t` until `P(x + t d)` decreases the objective enough.
///
/// Sufficient decrease is measured on the realized step `s = P(x + t d) - x`:
/// `f(x + s) <= f(x) + c gᵀs`. Trials that projection flattens into a
/// non-descending step are skipped without an evaluation, and so are
/// non-finite values, so a search can back out of a region where the
/// objective is undefined.
pub(crate) fn projected_backtrack<F: Float, O: Objective<F>>(
    obj: &mut O,
    from: &Iterate<F>,
    direction: &[F],
    bounds: &Bounds<F>,
    params: &Backtracking<F>,
) -> Search<F> {
    let mut evals = 0;
    if !(dot(&from.gradient, direction) < F::zero()) {
        return Search {
            accepted: None,
            evals,
        };
    }

    let contraction = if params.contraction > F::zero() && params.contraction < F::one() {
        params.contraction
    } else {
        lit(0.5)
    };
    let mut t = params.initial_step;
    let mut trial = from.x.clone();

    while t >= params.min_step && t > F::zero() {
        for ((xt, &x), &d) in trial.iter_mut().zip(&from.x).zip(direction) {
            *xt = x + t * d;
        }
        bounds.project(&mut trial);
        let linear = from
            .gradient
            .iter()
            .zip(trial.iter().zip(&from.x))
            .fold(F::zero(), |acc, (&g, (&xt, &x))| acc + g * (xt - x));

        if linear < F::zero() {
            let (value, gradient) = obj.eval_grad(&trial);
            evals += 1;
            if value.is_finite() && value <= from.value + params.sufficient_decrease * linear {
                return Search {
                    accepted: Some(Iterate::new(trial, value, gradient, bounds)),
                    evals,
                };
            }
        }
        t = t * contraction;
    }

    Search {
        accepted: None,
        evals,
    }
}
