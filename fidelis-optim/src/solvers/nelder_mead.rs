use num_traits::Float;

use crate::bounds::Bounds;
use crate::convergence::{distance, lit};
use crate::iterate::rejected;
use crate::objective::Objective;
use crate::result::{OptimResult, TerminationReason};

/// Configuration for the Nelder–Mead simplex solver.
#[derive(Debug, Clone)]
pub struct NelderMeadConfig<F> {
    /// Maximum number of simplex iterations (default: 2000).
    pub max_iter: usize,
    /// Relative size of the initial simplex edges (default: 0.05).
    pub initial_scale: F,
    /// Vertex values closer together than this count as level; a level
    /// simplex is shrunk towards its best vertex (default: 1e-12).
    pub value_tol: F,
    /// Stop when every vertex lies within this distance of the best (default: 1e-10).
    pub size_tol: F,
}

impl Default for NelderMeadConfig<f64> {
    fn default() -> Self {
        NelderMeadConfig {
            max_iter: 2000,
            initial_scale: 0.05,
            value_tol: 1e-12,
            size_tol: 1e-10,
        }
    }
}

/// Derivative-free minimization with the Nelder–Mead simplex method.
///
/// Only `obj.eval` is called. Every vertex is projected into `bounds`, so the
/// method handles box constraints without penalties. The reported gradient is
/// empty and `gradient_norm` is the final simplex diameter.
pub fn nelder_mead<F: Float, O: Objective<F>>(
    obj: &mut O,
    x0: &[F],
    bounds: &Bounds<F>,
    config: &NelderMeadConfig<F>,
) -> OptimResult<F> {
    let n = x0.len();

    if config.max_iter == 0 || n == 0 || bounds.dim() != n || !(config.initial_scale > F::zero())
    {
        return rejected(x0);
    }

    let alpha = F::one();
    let gamma = lit::<F>(2.0);
    let rho = lit::<F>(0.5);
    let sigma = lit::<F>(0.5);

    let mut func_evals = 0usize;
    // undefined values rank behind every defined one
    let eval = |obj: &mut O, x: &[F], count: &mut usize| -> F {
        *count += 1;
        let v = obj.eval(x);
        if v.is_nan() {
            F::infinity()
        } else {
            v
        }
    };

    let mut simplex = initial_simplex(&bounds.projected(x0), bounds, config.initial_scale);
    let mut values: Vec<F> = simplex
        .iter()
        .map(|v| eval(obj, v, &mut func_evals))
        .collect();

    let mut centroid = vec![F::zero(); n];
    let mut trial = vec![F::zero(); n];

    for iter in 0..config.max_iter {
        order_simplex(&mut simplex, &mut values);

        let diameter = diameter_of(&simplex);
        if diameter <= config.size_tol {
            return finish(simplex, values, diameter, iter, func_evals, TerminationReason::SimplexSize);
        }
        // A level simplex can straddle the minimum, so it is shrunk rather
        // than accepted.
        if (values[n] - values[0]).abs() <= config.value_tol {
            shrink_towards_best(obj, &mut simplex, &mut values, sigma, &mut func_evals, &eval);
            continue;
        }

        for c in centroid.iter_mut() {
            *c = F::zero();
        }
        for v in &simplex[..n] {
            for j in 0..n {
                centroid[j] = centroid[j] + v[j];
            }
        }
        let n_f = lit::<F>(n as f64);
        for c in centroid.iter_mut() {
            *c = *c / n_f;
        }

        // reflection
        for j in 0..n {
            trial[j] = centroid[j] + alpha * (centroid[j] - simplex[n][j]);
        }
        bounds.project(&mut trial);
        let f_r = eval(obj, &trial, &mut func_evals);

        if f_r < values[0] {
            let reflected = trial.clone();
            for j in 0..n {
                trial[j] = centroid[j] + gamma * (reflected[j] - centroid[j]);
            }
            bounds.project(&mut trial);
            let f_e = eval(obj, &trial, &mut func_evals);
            if f_e < f_r {
                simplex[n].copy_from_slice(&trial);
                values[n] = f_e;
            } else {
                simplex[n] = reflected;
                values[n] = f_r;
            }
            continue;
        }

        if f_r < values[n - 1] {
            simplex[n].copy_from_slice(&trial);
            values[n] = f_r;
            continue;
        }

        // contraction, outside when the reflection improved on the worst
        let outside = f_r < values[n];
        for j in 0..n {
            let towards = if outside { trial[j] } else { simplex[n][j] };
            trial[j] = centroid[j] + rho * (towards - centroid[j]);
        }
        bounds.project(&mut trial);
        let f_c = eval(obj, &trial, &mut func_evals);
        let accept = if outside { f_c <= f_r } else { f_c < values[n] };
        if accept {
            simplex[n].copy_from_slice(&trial);
            values[n] = f_c;
            continue;
        }

        shrink_towards_best(obj, &mut simplex, &mut values, sigma, &mut func_evals, &eval);
    }

    order_simplex(&mut simplex, &mut values);
    let diameter = diameter_of(&simplex);
    finish(
        simplex,
        values,
        diameter,
        config.max_iter,
        func_evals,
        TerminationReason::MaxIterations,
    )
}

/// Axis-aligned simplex around `x0`, stepping inward wherever a bound blocks.
fn initial_simplex<F: Float>(x0: &[F], bounds: &Bounds<F>, scale: F) -> Vec<Vec<F>> {
    let n = x0.len();
    let mut vertices = Vec::with_capacity(n + 1);
    vertices.push(x0.to_vec());
    for i in 0..n {
        let step = if x0[i] == F::zero() {
            lit::<F>(0.00025).max(scale * lit(0.005))
        } else {
            scale * x0[i].abs()
        };
        let mut v = x0.to_vec();
        if x0[i] + step <= bounds.upper[i] {
            v[i] = x0[i] + step;
        } else {
            v[i] = (x0[i] - step).max(bounds.lower[i]);
        }
        vertices.push(v);
    }
    vertices
}

fn shrink_towards_best<F: Float, O>(
    obj: &mut O,
    simplex: &mut [Vec<F>],
    values: &mut [F],
    sigma: F,
    func_evals: &mut usize,
    eval: &impl Fn(&mut O, &[F], &mut usize) -> F,
) {
    let (best, rest) = simplex.split_at_mut(1);
    for (vertex, value) in rest.iter_mut().zip(values[1..].iter_mut()) {
        for (vj, &bj) in vertex.iter_mut().zip(&best[0]) {
            *vj = bj + sigma * (*vj - bj);
        }
        *value = eval(obj, vertex, func_evals);
    }
}

fn diameter_of<F: Float>(simplex: &[Vec<F>]) -> F {
    simplex[1..]
        .iter()
        .fold(F::zero(), |m, v| m.max(distance(v, &simplex[0])))
}

fn order_simplex<F: Float>(simplex: &mut [Vec<F>], values: &mut [F]) {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let sorted_vertices: Vec<Vec<F>> = idx.iter().map(|&i| simplex[i].clone()).collect();
    let sorted_values: Vec<F> = idx.iter().map(|&i| values[i]).collect();
    simplex.clone_from_slice(&sorted_vertices);
    values.copy_from_slice(&sorted_values);
}

fn finish<F: Float>(
    mut simplex: Vec<Vec<F>>,
    values: Vec<F>,
    diameter: F,
    iterations: usize,
    func_evals: usize,
    termination: TerminationReason,
) -> OptimResult<F> {
    let termination = if values[0].is_finite() {
        termination
    } else {
        TerminationReason::NumericalError
    };
    OptimResult {
        x: simplex.swap_remove(0),
        value: values[0],
        gradient: Vec::new(),
        gradient_norm: diameter,
        iterations,
        func_evals,
        termination,
    }
}
