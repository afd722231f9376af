use approx::assert_relative_eq;
use fidelis_optim::{augmented_lagrangian, Backend, Bounds, NlpBackend, NlpConfig, NlpProblem};

/// Two-level sample split in log space: minimize `v0/n0 + v1/n1` subject to
/// `c0 n0 + c1 n1 <= budget`, with `x = ln n`. The optimum has
/// `n_i ∝ sqrt(v_i / c_i)`.
struct LogSplit {
    v: [f64; 2],
    c: [f64; 2],
    budget: f64,
}

impl NlpProblem<f64> for LogSplit {
    fn dim(&self) -> usize {
        2
    }

    fn num_constraints(&self) -> usize {
        1
    }

    fn objective(&mut self, x: &[f64]) -> f64 {
        (self.v[0] / x[0].exp() + self.v[1] / x[1].exp()).ln()
    }

    fn constraints(&mut self, x: &[f64]) -> Vec<f64> {
        let cost = self.c[0] * x[0].exp() + self.c[1] * x[1].exp();
        vec![cost / self.budget - 1.0]
    }
}

fn expected_split(p: &LogSplit) -> [f64; 2] {
    let s: f64 = (0..2).map(|k| (p.v[k] * p.c[k]).sqrt()).sum();
    [
        p.budget * (p.v[0] / p.c[0]).sqrt() / s,
        p.budget * (p.v[1] / p.c[1]).sqrt() / s,
    ]
}

#[test]
fn log_space_allocation_matches_closed_form() {
    let mut problem = LogSplit {
        v: [9.0, 1.0],
        c: [1.0, 4.0],
        budget: 1000.0,
    };
    let expect = expected_split(&problem);
    let result = augmented_lagrangian(
        &mut problem,
        &[1.0, 1.0],
        &Bounds::new(vec![0.0, 0.0], vec![20.0, 20.0]),
        &NlpConfig::default(),
    );

    assert!(result.max_violation <= 1e-6, "{result:?}");
    assert_relative_eq!(result.x[0].exp(), expect[0], max_relative = 1e-3);
    assert_relative_eq!(result.x[1].exp(), expect[1], max_relative = 1e-3);
}

#[test]
fn backends_agree_on_log_space_allocation() {
    let bounds = Bounds::new(vec![0.0, 0.0], vec![20.0, 20.0]);
    let mut objectives = Vec::new();
    for backend in [
        Backend::Lbfgs,
        Backend::TrustRegion,
        Backend::Newton,
        Backend::NelderMead,
    ] {
        let mut problem = LogSplit {
            v: [4.0, 0.5],
            c: [1.0, 10.0],
            budget: 500.0,
        };
        let config = NlpConfig::default().with_backend(backend);
        let result = config.solve(&mut problem, &[2.0, 2.0], &bounds);
        assert!(result.max_violation <= 1e-5, "{backend:?}: {result:?}");
        objectives.push(result.objective);
    }
    for f in &objectives[1..] {
        assert_relative_eq!(*f, objectives[0], epsilon = 1e-4);
    }
}

#[test]
fn lower_bound_from_existing_samples_binds() {
    // Already 400 samples on level 1: the optimum must respect n1 >= 400.
    let mut problem = LogSplit {
        v: [9.0, 1.0],
        c: [1.0, 4.0],
        budget: 2000.0,
    };
    let lower = vec![0.0, 400f64.ln()];
    let result = augmented_lagrangian(
        &mut problem,
        &[1.0, 400f64.ln()],
        &Bounds::new(lower, vec![20.0, 20.0]),
        &NlpConfig::default(),
    );

    assert!(result.max_violation <= 1e-6);
    assert!(result.x[1].exp() >= 400.0 * (1.0 - 1e-12));
    // Remaining budget goes to level 0.
    assert_relative_eq!(result.x[0].exp(), 2000.0 - 4.0 * 400.0, max_relative = 1e-3);
}

#[test]
fn infeasible_start_is_pulled_back() {
    let mut problem = LogSplit {
        v: [1.0, 1.0],
        c: [1.0, 1.0],
        budget: 100.0,
    };
    // Starts at n = (e^8, e^8), far above the budget.
    let result = augmented_lagrangian(
        &mut problem,
        &[8.0, 8.0],
        &Bounds::unbounded(2),
        &NlpConfig::default(),
    );
    assert!(result.max_violation <= 1e-6, "{result:?}");
    assert_relative_eq!(result.x[0].exp(), 50.0, max_relative = 1e-3);
    assert!(result.outer_iterations >= 1);
}
