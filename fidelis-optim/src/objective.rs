use num_traits::Float;

use crate::finite_diff::{central_gradient, default_step, gradient_hessian};

/// Trait for optimization objectives.
///
/// Implementors provide function evaluation and gradient computation.
/// Methods take `&mut self` to allow caching, eval counting, and internal buffers.
pub trait Objective<F: Float> {
    /// Number of input variables.
    fn dim(&self) -> usize;

    /// Evaluate the objective and its gradient at `x`.
    ///
    /// Returns `(f(x), ∇f(x))`.
    fn eval_grad(&mut self, x: &[F]) -> (F, Vec<F>);

    /// Evaluate the objective only.
    ///
    /// Derivative-free solvers call this; override it when the value is much
    /// cheaper than the gradient.
    fn eval(&mut self, x: &[F]) -> F {
        self.eval_grad(x).0
    }

    /// Evaluate the objective, gradient, and full Hessian at `x`.
    ///
    /// Returns `(f(x), ∇f(x), H(x))` where `H[i][j] = ∂²f/∂x_i∂x_j`.
    ///
    /// The default differences the gradient.
    fn eval_hessian(&mut self, x: &[F]) -> (F, Vec<F>, Vec<Vec<F>>) {
        let (value, grad) = self.eval_grad(x);
        let hess = gradient_hessian(|z| self.eval_grad(z).1, x, default_step());
        (value, grad, hess)
    }
}

/// Adapter wrapping a value-only closure as an [`Objective`].
///
/// Gradients come from central differences.
pub struct FnObjective<F, Func> {
    func: Func,
    dim: usize,
    step: F,
    func_evals: usize,
}

impl<F: Float, Func: FnMut(&[F]) -> F> FnObjective<F, Func> {
    /// Create a new `FnObjective` over `dim` variables.
    pub fn new(dim: usize, func: Func) -> Self {
        FnObjective {
            func,
            dim,
            step: default_step(),
            func_evals: 0,
        }
    }

    /// Override the relative finite-difference step.
    pub fn with_step(mut self, step: F) -> Self {
        self.step = step;
        self
    }

    /// Number of function evaluations performed so far.
    pub fn func_evals(&self) -> usize {
        self.func_evals
    }
}

impl<F: Float, Func: FnMut(&[F]) -> F> Objective<F> for FnObjective<F, Func> {
    fn dim(&self) -> usize {
        self.dim
    }

    fn eval(&mut self, x: &[F]) -> F {
        self.func_evals += 1;
        (self.func)(x)
    }

    fn eval_grad(&mut self, x: &[F]) -> (F, Vec<F>) {
        let value = self.eval(x);
        let func = &mut self.func;
        let grad = central_gradient(|z| func(z), x, self.step);
        self.func_evals += 2 * x.len();
        (value, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_objective_counts_evaluations() {
        let mut obj = FnObjective::new(2, |x: &[f64]| x[0] * x[0] + 3.0 * x[1]);
        let (f, g) = obj.eval_grad(&[2.0, 1.0]);
        assert!((f - 7.0).abs() < 1e-15);
        assert!((g[0] - 4.0).abs() < 1e-7);
        assert!((g[1] - 3.0).abs() < 1e-7);
        assert_eq!(obj.func_evals(), 5);
    }

    #[test]
    fn default_hessian_from_gradient() {
        let mut obj = FnObjective::new(1, |x: &[f64]| x[0].powi(4));
        let (_, _, h) = obj.eval_hessian(&[1.0]);
        assert!((h[0][0] - 12.0).abs() < 1e-3, "h = {}", h[0][0]);
    }
}
