use num_traits::Float;

/// Parameters controlling convergence checks.
#[derive(Debug, Clone)]
pub struct ConvergenceParams<F> {
    /// Maximum number of iterations (default: 200).
    pub max_iter: usize,
    /// Projected-gradient norm tolerance: stop when `||P(x - g) - x|| < grad_tol`
    /// (default: 1e-8).
    pub grad_tol: F,
    /// Step size tolerance: stop when `||x_{k+1} - x_k|| < step_tol` (default: 1e-12).
    pub step_tol: F,
    /// Function change tolerance: stop when `|f_{k+1} - f_k| < func_tol` (default: 0, disabled).
    pub func_tol: F,
}

impl Default for ConvergenceParams<f64> {
    fn default() -> Self {
        ConvergenceParams {
            max_iter: 200,
            grad_tol: 1e-8,
            step_tol: 1e-12,
            func_tol: 0.0,
        }
    }
}

/// Convert an `f64` literal into `F`.
///
/// Every `Float` used in this crate represents the literals involved, so the
/// NaN fallback only surfaces for exotic user types.
#[inline]
pub fn lit<F: Float>(v: f64) -> F {
    F::from(v).unwrap_or_else(F::nan)
}

/// Compute the L2 norm of a vector.
pub fn norm<F: Float>(v: &[F]) -> F {
    let mut s = F::zero();
    for &x in v {
        s = s + x * x;
    }
    s.sqrt()
}

/// Compute the dot product of two vectors.
pub fn dot<F: Float>(a: &[F], b: &[F]) -> F {
    debug_assert_eq!(a.len(), b.len());
    let mut s = F::zero();
    for i in 0..a.len() {
        s = s + a[i] * b[i];
    }
    s
}

/// L2 distance between two points.
pub fn distance<F: Float>(a: &[F], b: &[F]) -> F {
    debug_assert_eq!(a.len(), b.len());
    let mut s = F::zero();
    for (&ai, &bi) in a.iter().zip(b) {
        let d = ai - bi;
        s = s + d * d;
    }
    s.sqrt()
}

/// Largest absolute entry, zero for an empty slice.
pub fn max_abs<F: Float>(v: &[F]) -> F {
    v.iter().fold(F::zero(), |acc, &x| acc.max(x.abs()))
}
