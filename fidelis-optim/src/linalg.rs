//! Cholesky factorization for the small symmetric systems built on the free
//! variables of the Newton-type solvers.

use num_traits::Float;

use crate::convergence::lit;

/// Lower-triangular factor `L` of `A = L Lᵀ`, rows packed one after another.
#[derive(Debug, Clone)]
pub struct Cholesky<F> {
    n: usize,
    packed: Vec<F>,
}

#[inline]
fn slot(i: usize, j: usize) -> usize {
    i * (i + 1) / 2 + j
}

impl<F: Float> Cholesky<F> {
    /// Factor a symmetric matrix, reading only its lower triangle.
    ///
    /// `None` unless every pivot is positive and finite.
    pub fn factor(a: &[Vec<F>]) -> Option<Self> {
        Self::factor_shifted(a, F::zero())
    }

    /// Factor `A + shift·I`.
    #[allow(clippy::needless_range_loop)]
    pub fn factor_shifted(a: &[Vec<F>], shift: F) -> Option<Self> {
        let n = a.len();
        let mut packed = vec![F::zero(); n * (n + 1) / 2];
        for i in 0..n {
            for j in 0..=i {
                let mut acc = a[i][j];
                if i == j {
                    acc = acc + shift;
                }
                for k in 0..j {
                    acc = acc - packed[slot(i, k)] * packed[slot(j, k)];
                }
                if i == j {
                    if !(acc > F::zero() && acc.is_finite()) {
                        return None;
                    }
                    packed[slot(i, i)] = acc.sqrt();
                } else {
                    packed[slot(i, j)] = acc / packed[slot(j, j)];
                }
            }
        }
        Some(Cholesky { n, packed })
    }

    /// Factor `A + τI` for the first `τ` in `0, base·s, 100·base·s, …` that
    /// succeeds, where `s` is the largest diagonal magnitude. Returns the
    /// factor with the `τ` used, or `None` after `attempts` shifts or on
    /// non-finite input.
    pub fn regularized(a: &[Vec<F>], base: F, attempts: usize) -> Option<(Self, F)> {
        if a.iter().flatten().any(|v| !v.is_finite()) {
            return None;
        }
        let scale = (0..a.len())
            .map(|i| a[i][i].abs())
            .fold(F::min_positive_value(), F::max);
        let mut shift = F::zero();
        for attempt in 0..=attempts {
            if let Some(factor) = Self::factor_shifted(a, shift) {
                return Some((factor, shift));
            }
            shift = if attempt == 0 {
                base * scale
            } else {
                shift * lit(100.0)
            };
        }
        None
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    /// Solve `A x = b` with one forward and one backward sweep.
    #[allow(clippy::needless_range_loop)]
    pub fn solve(&self, b: &[F]) -> Vec<F> {
        let n = self.n;
        let mut x = b.to_vec();
        for i in 0..n {
            let mut acc = x[i];
            for k in 0..i {
                acc = acc - self.packed[slot(i, k)] * x[k];
            }
            x[i] = acc / self.packed[slot(i, i)];
        }
        for i in (0..n).rev() {
            let mut acc = x[i];
            for k in (i + 1)..n {
                acc = acc - self.packed[slot(k, i)] * x[k];
            }
            x[i] = acc / self.packed[slot(i, i)];
        }
        x
    }
}

/// `A v` for a dense square matrix.
pub(crate) fn mat_vec<F: Float>(a: &[Vec<F>], v: &[F]) -> Vec<F> {
    a.iter()
        .map(|row| row.iter().zip(v).fold(F::zero(), |acc, (&aij, &vj)| acc + aij * vj))
        .collect()
}
