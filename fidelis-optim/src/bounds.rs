use num_traits::Float;

/// Box constraints `lower <= x <= upper`.
///
/// Infinite entries disable the corresponding side. Every solver in this
/// crate keeps its iterates inside the box by projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds<F> {
    pub lower: Vec<F>,
    pub upper: Vec<F>,
}

impl<F: Float> Bounds<F> {
    /// Create bounds, swapping any pair given in the wrong order.
    pub fn new(lower: Vec<F>, upper: Vec<F>) -> Self {
        assert_eq!(lower.len(), upper.len(), "bound vectors differ in length");
        let (lower, upper) = lower
            .into_iter()
            .zip(upper)
            .map(|(l, u)| if l <= u { (l, u) } else { (u, l) })
            .unzip();
        Bounds { lower, upper }
    }

    /// No bounds on any of the `n` variables.
    pub fn unbounded(n: usize) -> Self {
        Bounds {
            lower: vec![F::neg_infinity(); n],
            upper: vec![F::infinity(); n],
        }
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    /// Whether any side of any variable is finite.
    pub fn is_active(&self) -> bool {
        self.lower.iter().any(|l| l.is_finite()) || self.upper.iter().any(|u| u.is_finite())
    }

    /// Clamp `x` into the box in place.
    pub fn project(&self, x: &mut [F]) {
        debug_assert_eq!(x.len(), self.dim());
        for ((xi, &l), &u) in x.iter_mut().zip(&self.lower).zip(&self.upper) {
            *xi = xi.max(l).min(u);
        }
    }

    /// Return a projected copy of `x`.
    pub fn projected(&self, x: &[F]) -> Vec<F> {
        let mut out = x.to_vec();
        self.project(&mut out);
        out
    }

    /// Largest distance by which `x` leaves the box (zero when feasible).
    pub fn violation(&self, x: &[F]) -> F {
        let mut worst = F::zero();
        for ((&xi, &l), &u) in x.iter().zip(&self.lower).zip(&self.upper) {
            if xi < l {
                worst = worst.max(l - xi);
            }
            if xi > u {
                worst = worst.max(xi - u);
            }
        }
        worst
    }

    /// Norm of the projected gradient `P(x - g) - x`.
    ///
    /// Reduces to `||g||` when no bound is active at `x`.
    pub fn projected_gradient_norm(&self, x: &[F], g: &[F]) -> F {
        let mut s = F::zero();
        for i in 0..x.len() {
            let moved = (x[i] - g[i]).max(self.lower[i]).min(self.upper[i]);
            let d = moved - x[i];
            s = s + d * d;
        }
        s.sqrt()
    }

    /// Mark the variables lying within `width` of a bound that the gradient
    /// `g` pushes against.
    pub fn binding(&self, x: &[F], g: &[F], width: F) -> Vec<bool> {
        (0..x.len())
            .map(|i| {
                let on_lower = g[i] > F::zero() && x[i] - self.lower[i] <= width;
                let on_upper = g[i] < F::zero() && self.upper[i] - x[i] <= width;
                on_lower || on_upper
            })
            .collect()
    }

    /// The bound variable `i` is pinned against by a gradient entry `gi`.
    pub fn pinned_value(&self, i: usize, gi: F) -> F {
        if gi > F::zero() {
            self.lower[i]
        } else {
            self.upper[i]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_clamps_both_sides() {
        let b = Bounds::new(vec![0.0, -1.0], vec![1.0, 1.0]);
        let mut x = vec![2.0, -3.0];
        b.project(&mut x);
        assert_eq!(x, vec![1.0, -1.0]);
        assert_eq!(b.violation(&[2.0, 0.0]), 1.0);
        assert_eq!(b.violation(&[0.5, 0.0]), 0.0);
    }

    #[test]
    fn swapped_pairs_are_reordered() {
        let b = Bounds::new(vec![3.0], vec![1.0]);
        assert_eq!(b.lower, vec![1.0]);
        assert_eq!(b.upper, vec![3.0]);
    }

    #[test]
    fn projected_gradient_vanishes_at_active_bound() {
        let b = Bounds::new(vec![1.0], vec![f64::INFINITY]);
        // Gradient pushes below the lower bound: stationary for the box problem.
        assert_eq!(b.projected_gradient_norm(&[1.0], &[2.0]), 0.0);
        assert!((b.projected_gradient_norm(&[2.0], &[0.5]) - 0.5).abs() < 1e-15);
    }

    #[test]
    fn unbounded_never_binds() {
        let b = Bounds::<f64>::unbounded(3);
        assert!(!b.is_active());
        assert_eq!(
            b.binding(&[0.0, 0.0, 0.0], &[-1.0, 1.0, 0.0], 1e3),
            vec![false, false, false]
        );
    }

    #[test]
    fn binding_band_is_measured_from_the_bound() {
        let b = Bounds::new(vec![0.0], vec![1.0]);
        assert_eq!(b.binding(&[0.99], &[-1.0], 0.05), vec![true]);
        assert_eq!(b.binding(&[0.9], &[-1.0], 0.05), vec![false]);
        assert_eq!(b.pinned_value(0, -1.0), 1.0);
        assert_eq!(b.pinned_value(0, 1.0), 0.0);
    }
}
