//! Central finite differences.
//!
//! Used wherever an objective only supplies values (or only gradients) but a
//! solver asks for more. Step sizes are relative: `h_i = step * max(1, |x_i|)`.

use num_traits::Float;

use crate::convergence::lit;

/// Default relative step for first derivatives (about `eps^(1/3)` for f64).
pub fn default_step<F: Float>() -> F {
    F::epsilon().cbrt()
}

#[inline]
fn step_for<F: Float>(xi: F, step: F) -> F {
    step * xi.abs().max(F::one())
}

/// Central-difference gradient of `f` at `x`.
pub fn central_gradient<F: Float>(mut f: impl FnMut(&[F]) -> F, x: &[F], step: F) -> Vec<F> {
    let n = x.len();
    let two = lit::<F>(2.0);
    let mut probe = x.to_vec();
    let mut grad = vec![F::zero(); n];
    for i in 0..n {
        let h = step_for(x[i], step);
        probe[i] = x[i] + h;
        let f_plus = f(&probe);
        probe[i] = x[i] - h;
        let f_minus = f(&probe);
        probe[i] = x[i];
        grad[i] = (f_plus - f_minus) / (two * h);
    }
    grad
}

/// Symmetrized Hessian from central differences of the gradient.
pub fn gradient_hessian<F: Float>(
    mut grad: impl FnMut(&[F]) -> Vec<F>,
    x: &[F],
    step: F,
) -> Vec<Vec<F>> {
    let n = x.len();
    let two = lit::<F>(2.0);
    let mut probe = x.to_vec();
    let mut h = vec![vec![F::zero(); n]; n];
    for i in 0..n {
        let hi = step_for(x[i], step);
        probe[i] = x[i] + hi;
        let g_plus = grad(&probe);
        probe[i] = x[i] - hi;
        let g_minus = grad(&probe);
        probe[i] = x[i];
        for j in 0..n {
            h[j][i] = (g_plus[j] - g_minus[j]) / (two * hi);
        }
    }
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = (h[i][j] + h[j][i]) / two;
            h[i][j] = avg;
            h[j][i] = avg;
        }
    }
    h
}
