//! Sample bookkeeping: evaluations requested, evaluations that succeeded,
//! and where each input stream continues.

use std::collections::BTreeMap;

use crate::allocation::ExistingSamples;
use crate::driver::evaluator::InputStream;
use crate::topology::ModelGroup;

/// Per-model counts. `allocated` counts every evaluation requested (and
/// paid for), `actual` only the successful ones, per QoI.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleCounts {
    actual: Vec<Vec<usize>>,
    allocated: Vec<usize>,
    /// Samples on which every model of the group succeeded.
    groups: BTreeMap<ModelGroup, usize>,
}

impl SampleCounts {
    pub fn new(num_models: usize, num_qoi: usize) -> Self {
        SampleCounts {
            actual: vec![vec![0; num_qoi]; num_models],
            allocated: vec![0; num_models],
            groups: BTreeMap::new(),
        }
    }

    pub fn num_models(&self) -> usize {
        self.allocated.len()
    }

    pub fn actual(&self, model: usize, qoi: usize) -> usize {
        self.actual[model][qoi]
    }

    /// Successful evaluations of `model` for its worst QoI.
    pub fn min_actual(&self, model: usize) -> usize {
        self.actual[model].iter().copied().min().unwrap_or(0)
    }

    pub fn allocated(&self, model: usize) -> usize {
        self.allocated[model]
    }

    /// Complete samples of `group`.
    pub fn group(&self, group: &ModelGroup) -> usize {
        self.groups.get(group).copied().unwrap_or(0)
    }

    /// Record a batch of `group`; `samples[s][k][q]` as returned by the evaluator.
    pub fn record(&mut self, group: &ModelGroup, samples: &[Vec<Vec<f64>>]) {
        let models = group.models();
        let mut complete = 0;
        for sample in samples {
            let mut all_ok = true;
            for (k, &m) in models.iter().enumerate() {
                for (q, v) in sample[k].iter().enumerate() {
                    if v.is_finite() {
                        self.actual[m][q] += 1;
                    } else {
                        all_ok = false;
                    }
                }
            }
            if all_ok {
                complete += 1;
            }
        }
        for &m in models {
            self.allocated[m] += samples.len();
        }
        *self.groups.entry(group.clone()).or_insert(0) += complete;
    }

    /// Cost of everything requested so far, in truth evaluations.
    pub fn equivalent_cost(&self, costs: &[f64]) -> f64 {
        let c_h = costs[costs.len() - 1];
        self.allocated
            .iter()
            .zip(costs)
            .map(|(&n, &c)| n as f64 * c / c_h)
            .sum()
    }

    /// Successful samples as lower bounds for the next allocation.
    pub fn existing(&self) -> ExistingSamples {
        ExistingSamples::new(
            (0..self.num_models())
                .map(|m| self.min_actual(m) as f64)
                .collect(),
            self.groups
                .iter()
                .map(|(g, &n)| (g.clone(), n as f64))
                .collect(),
        )
    }
}

/// Next unused sample index per model and stream.
///
/// Models keep separate positions on the shared stream so nested designs
/// extend each model's prefix without repeating an input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamCursors {
    positions: BTreeMap<(InputStream, usize), u64>,
}

impl StreamCursors {
    /// First index no model of `models` has used on `stream`.
    pub fn next(&self, stream: InputStream, models: &[usize]) -> u64 {
        models
            .iter()
            .map(|&m| self.positions.get(&(stream, m)).copied().unwrap_or(0))
            .max()
            .unwrap_or(0)
    }

    /// Mark `first..first + count` of `stream` as used by `models`.
    pub fn advance(&mut self, stream: InputStream, models: &[usize], first: u64, count: usize) {
        for &m in models {
            let end = first + count as u64;
            let pos = self.positions.entry((stream, m)).or_insert(0);
            *pos = (*pos).max(end);
        }
    }
}
