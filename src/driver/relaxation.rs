//! Under-relaxation of sample increments.

use crate::config::Relaxation;

/// Produces the relaxation factor of each online iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaxationSchedule {
    rule: Relaxation,
    current: f64,
}

impl RelaxationSchedule {
    pub fn new(rule: Relaxation) -> Self {
        let current = match &rule {
            Relaxation::Recursive { initial, .. } => *initial,
            _ => 1.0,
        };
        RelaxationSchedule { rule, current }
    }

    /// Factor for `iteration`. The last iteration always takes the full
    /// increment so its targets are reached.
    pub fn factor(&mut self, iteration: usize, last: bool) -> f64 {
        let f = match &self.rule {
            Relaxation::None => 1.0,
            Relaxation::Fixed(factors) => {
                let k = iteration.min(factors.len().saturating_sub(1));
                factors.get(k).copied().unwrap_or(1.0)
            }
            Relaxation::Recursive { damping, .. } => {
                let f = self.current;
                self.current += (1.0 - self.current) * damping;
                f
            }
        };
        if last {
            1.0
        } else {
            f
        }
    }
}

/// `max(0, round(factor · (target − actual)))`.
pub fn increment(target: f64, actual: f64, factor: f64) -> usize {
    let step = (factor * (target - actual)).round();
    if step.is_finite() && step > 0.0 {
        step as usize
    } else {
        0
    }
}
