use std::collections::VecDeque;

use num_traits::Float;

use crate::bounds::Bounds;
use crate::convergence::{dot, norm, ConvergenceParams};
use crate::iterate::{admissible, check_start, check_step, difference, rejected, Counters, Iterate};
use crate::line_search::{projected_backtrack, Backtracking};
use crate::objective::Objective;
use crate::result::{OptimResult, TerminationReason};

/// Settings for [`lbfgs`].
#[derive(Debug, Clone)]
pub struct LbfgsConfig<F> {
    /// Curvature pairs kept for the inverse-Hessian model (default: 10).
    pub memory: usize,
    pub convergence: ConvergenceParams<F>,
    pub line_search: Backtracking<F>,
}

impl Default for LbfgsConfig<f64> {
    fn default() -> Self {
        LbfgsConfig {
            memory: 10,
            convergence: ConvergenceParams::default(),
            line_search: Backtracking::default(),
        }
    }
}

struct Pair<F> {
    s: Vec<F>,
    y: Vec<F>,
    rho: F,
}

/// Recent steps and gradient changes, applied as `H ≈ ∇²f⁻¹` through the
/// two-loop recursion.
struct CurvatureMemory<F> {
    pairs: VecDeque<Pair<F>>,
    capacity: usize,
}

impl<F: Float> CurvatureMemory<F> {
    fn new(capacity: usize) -> Self {
        CurvatureMemory {
            pairs: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn clear(&mut self) {
        self.pairs.clear();
    }

    /// Store `(s, y)` if it carries positive curvature.
    fn remember(&mut self, s: Vec<F>, y: Vec<F>) {
        let sy = dot(&s, &y);
        if !(sy > F::epsilon() * norm(&s) * norm(&y)) {
            return;
        }
        if self.pairs.len() == self.capacity {
            self.pairs.pop_front();
        }
        self.pairs.push_back(Pair {
            s,
            y,
            rho: F::one() / sy,
        });
    }

    /// Search direction with held variables moved straight down their
    /// gradient and the quasi-Newton model applied to the rest.
    fn direction(&self, g: &[F], held: &[bool]) -> Vec<F> {
        let free_dot = |a: &[F], b: &[F]| {
            (0..a.len())
                .filter(|&i| !held[i])
                .fold(F::zero(), |acc, i| acc + a[i] * b[i])
        };

        let mut q: Vec<F> = g
            .iter()
            .zip(held)
            .map(|(&gi, &h)| if h { F::zero() } else { gi })
            .collect();
        let mut alphas = Vec::with_capacity(self.pairs.len());
        for pair in self.pairs.iter().rev() {
            let a = pair.rho * free_dot(&pair.s, &q);
            for i in (0..q.len()).filter(|&i| !held[i]) {
                q[i] = q[i] - a * pair.y[i];
            }
            alphas.push(a);
        }

        if let Some(newest) = self.pairs.back() {
            let yy = free_dot(&newest.y, &newest.y);
            let sy = free_dot(&newest.s, &newest.y);
            if yy > F::zero() && sy > F::zero() {
                let gamma = sy / yy;
                for v in q.iter_mut() {
                    *v = *v * gamma;
                }
            }
        }

        for (pair, &a) in self.pairs.iter().zip(alphas.iter().rev()) {
            let b = pair.rho * free_dot(&pair.y, &q);
            for i in (0..q.len()).filter(|&i| !held[i]) {
                q[i] = q[i] + (a - b) * pair.s[i];
            }
        }

        q.iter()
            .zip(g)
            .zip(held)
            .map(|((&qi, &gi), &h)| F::zero() - if h { gi } else { qi })
            .collect()
    }
}

/// Limited-memory BFGS over a box.
///
/// Variables the gradient pins against a bound are held and pushed onto it;
/// the quasi-Newton model only acts on the free ones and is discarded
/// whenever the held set changes. Steps come from a projected backtracking
/// search, and convergence is judged on the projected gradient.
pub fn lbfgs<F: Float, O: Objective<F>>(
    obj: &mut O,
    x0: &[F],
    bounds: &Bounds<F>,
    config: &LbfgsConfig<F>,
) -> OptimResult<F> {
    let conv = &config.convergence;
    if config.memory == 0 || !admissible(conv, bounds, x0.len()) {
        return rejected(x0);
    }

    let mut current = Iterate::evaluate(obj, bounds.projected(x0), bounds);
    let mut count = Counters::started();
    if let Some(reason) = check_start(conv, &current) {
        return count.finish(current, reason);
    }

    let mut memory = CurvatureMemory::new(config.memory);
    let mut held = current.held(bounds);

    while count.iterations < conv.max_iter {
        let now_held = current.held(bounds);
        if now_held != held {
            memory.clear();
            held = now_held;
        }

        let mut direction = memory.direction(&current.gradient, &held);
        if !(dot(&direction, &current.gradient) < F::zero()) {
            memory.clear();
            direction = current.gradient.iter().map(|&g| F::zero() - g).collect();
        }

        let search = projected_backtrack(obj, &current, &direction, bounds, &config.line_search);
        count.func_evals += search.evals;
        let Some(next) = search.accepted else {
            return count.finish(current, TerminationReason::LineSearchFailed);
        };
        count.iterations += 1;

        let s = difference(&next.x, &current.x);
        let step = norm(&s);
        memory.remember(s, difference(&next.gradient, &current.gradient));

        let previous = current.value;
        current = next;
        if let Some(reason) = check_step(conv, &current, step, previous) {
            return count.finish(current, reason);
        }
    }

    count.finish(current, TerminationReason::MaxIterations)
}
