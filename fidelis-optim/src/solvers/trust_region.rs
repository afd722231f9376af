use num_traits::Float;

use crate::bounds::Bounds;
use crate::convergence::{dot, lit, norm, ConvergenceParams};
use crate::iterate::{admissible, check_start, check_step, difference, rejected, Counters, Iterate};
use crate::linalg::{mat_vec, Cholesky};
use crate::objective::Objective;
use crate::result::{OptimResult, TerminationReason};

/// Settings for [`trust_region`].
#[derive(Debug, Clone)]
pub struct TrustRegionConfig<F> {
    /// Starting radius (default: 1).
    pub initial_radius: F,
    /// The radius never grows past this (default: 100).
    pub max_radius: F,
    /// Smallest ratio of actual to predicted decrease that accepts a step
    /// (default: 0.1).
    pub accept_ratio: F,
    pub convergence: ConvergenceParams<F>,
}

impl Default for TrustRegionConfig<f64> {
    fn default() -> Self {
        TrustRegionConfig {
            initial_radius: 1.0,
            max_radius: 100.0,
            accept_ratio: 0.1,
            convergence: ConvergenceParams::default(),
        }
    }
}

/// Dogleg trust-region method over a box.
///
/// Each iteration builds the quadratic model from `obj.eval_hessian`, snaps
/// held variables onto their bound, and takes a dogleg step on the free ones:
/// the Newton point when it fits in the radius, otherwise the path from the
/// Cauchy point towards it cut at the boundary. A step that reaches the
/// boundary with a good model doubles the radius; a poor one shrinks it to a
/// quarter of the step taken.
pub fn trust_region<F: Float, O: Objective<F>>(
    obj: &mut O,
    x0: &[F],
    bounds: &Bounds<F>,
    config: &TrustRegionConfig<F>,
) -> OptimResult<F> {
    let conv = &config.convergence;
    if !admissible(conv, bounds, x0.len())
        || !(config.initial_radius > F::zero())
        || !(config.max_radius >= config.initial_radius)
    {
        return rejected(x0);
    }

    let x = bounds.projected(x0);
    let (value, gradient, mut hessian) = obj.eval_hessian(&x);
    let mut current = Iterate::new(x, value, gradient, bounds);
    let mut count = Counters::started();
    if let Some(reason) = check_start(conv, &current) {
        return count.finish(current, reason);
    }

    let quarter = lit::<F>(0.25);
    let mut radius = config.initial_radius;

    while count.iterations < conv.max_iter {
        count.iterations += 1;
        let held = current.held(bounds);

        let free: Vec<usize> = (0..held.len()).filter(|&i| !held[i]).collect();
        let free_step = dogleg(&hessian, &current.gradient, &free, radius);
        let mut trial = current.x.clone();
        for (i, xi) in trial.iter_mut().enumerate() {
            if held[i] {
                *xi = bounds.pinned_value(i, current.gradient[i]);
            }
        }
        for (&i, &si) in free.iter().zip(&free_step) {
            trial[i] = trial[i] + si;
        }
        bounds.project(&mut trial);

        let step = difference(&trial, &current.x);
        let step_norm = norm(&step);
        if step_norm == F::zero() {
            return count.finish(current, TerminationReason::StepSize);
        }
        let free_norm = free
            .iter()
            .fold(F::zero(), |acc, &i| acc + step[i] * step[i])
            .sqrt();

        let curvature = dot(&step, &mat_vec(&hessian, &step));
        let predicted = F::zero() - dot(&current.gradient, &step) - lit::<F>(0.5) * curvature;
        let (value, gradient) = obj.eval_grad(&trial);
        count.func_evals += 1;
        let actual = if value.is_finite() {
            current.value - value
        } else {
            F::neg_infinity()
        };
        let ratio = if predicted > F::zero() {
            actual / predicted
        } else if actual >= F::zero() {
            F::one()
        } else {
            F::zero()
        };

        if ratio < quarter {
            let taken = if free_norm > F::zero() { free_norm } else { radius };
            radius = quarter * taken.min(radius);
        } else if ratio > lit(0.75) && free_norm >= lit::<F>(0.9) * radius {
            radius = (radius + radius).min(config.max_radius);
        }

        if ratio > config.accept_ratio {
            let previous = current.value;
            let (_, _, h) = obj.eval_hessian(&trial);
            count.func_evals += 1;
            hessian = h;
            current = Iterate::new(trial, value, gradient, bounds);
            if let Some(reason) = check_step(conv, &current, step_norm, previous) {
                return count.finish(current, reason);
            }
        } else if radius < conv.step_tol {
            return count.finish(current, TerminationReason::StepSize);
        }
    }

    count.finish(current, TerminationReason::MaxIterations)
}

/// Dogleg minimizer of `gᵀs + ½ sᵀHs` over `‖s‖ <= radius`, restricted to
/// the `free` coordinates. Returns the step in those coordinates.
fn dogleg<F: Float>(hessian: &[Vec<F>], gradient: &[F], free: &[usize], radius: F) -> Vec<F> {
    let g: Vec<F> = free.iter().map(|&i| gradient[i]).collect();
    let g_norm = norm(&g);
    if g_norm == F::zero() {
        return g;
    }
    let block: Vec<Vec<F>> = free
        .iter()
        .map(|&i| free.iter().map(|&j| hessian[i][j]).collect())
        .collect();
    let scaled = |v: &[F], a: F| -> Vec<F> { v.iter().map(|&vi| vi * a).collect() };

    let to_edge = scaled(&g, F::zero() - radius / g_norm);
    let g_curvature = dot(&g, &mat_vec(&block, &g));
    if !(g_curvature > F::zero()) {
        return to_edge;
    }
    let cauchy = scaled(&g, F::zero() - g_norm * g_norm / g_curvature);
    let cauchy_norm = norm(&cauchy);
    if cauchy_norm >= radius {
        return to_edge;
    }

    let Some((factor, _)) = Cholesky::regularized(&block, lit(1e-8), 12) else {
        return cauchy;
    };
    let newton = factor.solve(&scaled(&g, F::zero() - F::one()));
    if newton.iter().any(|v| !v.is_finite()) {
        return cauchy;
    }
    if norm(&newton) <= radius {
        return newton;
    }

    // ‖c + τ(n - c)‖ = radius, with ‖c‖ < radius so the root is positive
    let leg = difference(&newton, &cauchy);
    let a = dot(&leg, &leg);
    let b = dot(&cauchy, &leg);
    let c = cauchy_norm * cauchy_norm - radius * radius;
    let tau = if a > F::zero() {
        ((F::zero() - b + (b * b - a * c).sqrt()) / a).max(F::zero()).min(F::one())
    } else {
        F::zero()
    };
    cauchy
        .iter()
        .zip(&leg)
        .map(|(&ci, &li)| ci + tau * li)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Valley;

    impl Objective<f64> for Valley {
        fn dim(&self) -> usize {
            2
        }

        fn eval_grad(&mut self, x: &[f64]) -> (f64, Vec<f64>) {
            let a = 1.0 - x[0];
            let b = x[1] - x[0] * x[0];
            (a * a + 100.0 * b * b, vec![-2.0 * a - 400.0 * x[0] * b, 200.0 * b])
        }

        fn eval_hessian(&mut self, x: &[f64]) -> (f64, Vec<f64>, Vec<Vec<f64>>) {
            let (f, g) = self.eval_grad(x);
            let h00 = 2.0 - 400.0 * (x[1] - 3.0 * x[0] * x[0]);
            let h01 = -400.0 * x[0];
            (f, g, vec![vec![h00, h01], vec![h01, 200.0]])
        }
    }

    #[test]
    fn reaches_the_valley_minimum() {
        let result = trust_region(
            &mut Valley,
            &[-1.2, 1.0],
            &Bounds::unbounded(2),
            &TrustRegionConfig::default(),
        );
        assert_eq!(result.termination, TerminationReason::GradientNorm, "{result:?}");
        assert!((result.x[0] - 1.0).abs() < 1e-6 && (result.x[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn radius_grows_from_a_tight_start() {
        let config = TrustRegionConfig {
            initial_radius: 1e-3,
            ..TrustRegionConfig::default()
        };
        let result = trust_region(&mut Valley, &[0.0, 0.0], &Bounds::unbounded(2), &config);
        assert_eq!(result.termination, TerminationReason::GradientNorm, "{result:?}");
        assert!((result.x[0] - 1.0).abs() < 1e-6, "x = {:?}", result.x);
    }

    #[test]
    fn lower_bound_above_the_minimum_is_respected() {
        let bounds = Bounds::new(vec![1.5, 1.5], vec![f64::INFINITY; 2]);
        let result = trust_region(&mut Valley, &[3.0, 3.0], &bounds, &TrustRegionConfig::default());
        assert!(result.is_usable(), "{}", result.termination);
        // along x0 = 1.5 the valley floor sits at x1 = 2.25
        assert_eq!(result.x[0], 1.5);
        assert!((result.x[1] - 2.25).abs() < 1e-6, "x = {:?}", result.x);
    }

    #[test]
    fn dogleg_cuts_the_newton_step_at_the_edge() {
        let h = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let g = [3.0, 4.0];
        let inside = dogleg(&h, &g, &[0, 1], 10.0);
        assert!((inside[0] + 3.0).abs() < 1e-12 && (inside[1] + 4.0).abs() < 1e-12);
        let cut = dogleg(&h, &g, &[0, 1], 1.0);
        assert!((norm(&cut) - 1.0).abs() < 1e-12);
    }
}
