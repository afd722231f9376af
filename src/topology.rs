//! Sampling topologies: model groups, control-variate DAGs and their enumeration.
//!
//! Model indices are global: approximations `0..n` (low to high fidelity) and
//! the truth model `n`.

use nalgebra::{DMatrix, SymmetricEigen};
use tracing::debug;

use crate::covariance::CovarianceSet;
use crate::error::{Error, Result};

/// An ordered, duplicate-free set of models sampled on shared inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModelGroup {
    models: Vec<usize>,
}

impl ModelGroup {
    /// Sorts and deduplicates `models`; fails when empty.
    pub fn new(mut models: Vec<usize>) -> Result<Self> {
        models.sort_unstable();
        models.dedup();
        if models.is_empty() {
            return Err(Error::config("model group is empty"));
        }
        Ok(ModelGroup { models })
    }

    pub fn models(&self) -> &[usize] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn contains(&self, model: usize) -> bool {
        self.models.binary_search(&model).is_ok()
    }

    /// Cost of one joint sample: the sum of member costs.
    pub fn cost(&self, costs: &[f64]) -> f64 {
        self.models.iter().map(|&m| costs[m]).sum()
    }
}

/// Pyramid groups `{0..=i}` for every model `i` of an `num_models` ensemble.
pub fn pyramid_groups(num_models: usize) -> Vec<ModelGroup> {
    (0..num_models)
        .map(|i| ModelGroup {
            models: (0..=i).collect(),
        })
        .collect()
}

/// Each approximation paired with the truth model `truth`.
pub fn pairwise_groups(truth: usize) -> Vec<ModelGroup> {
    (0..truth)
        .map(|i| ModelGroup {
            models: vec![i, truth],
        })
        .collect()
}

/// Multilevel groups: `{0}`, then `{l − 1, l}` for each finer level.
pub fn level_groups(num_models: usize) -> Vec<ModelGroup> {
    (0..num_models)
        .map(|l| ModelGroup {
            models: if l == 0 { vec![0] } else { vec![l - 1, l] },
        })
        .collect()
}

/// Largest ensemble the all-subsets group pool accepts.
pub const MAX_POOL_MODELS: usize = 16;

/// Most approximations a control-variate graph search runs over.
pub const MAX_DAG_APPROX: usize = 8;

/// Every non-empty subset of `0..num_models`, smallest first.
///
/// Empty when the subsets cannot be indexed by a 64-bit mask.
pub fn all_groups(num_models: usize) -> Vec<ModelGroup> {
    let Some(end) = u32::try_from(num_models)
        .ok()
        .and_then(|n| 1u64.checked_shl(n))
    else {
        return Vec::new();
    };
    let mut groups: Vec<ModelGroup> = (1u64..end)
        .map(|mask| ModelGroup {
            models: (0..num_models).filter(|&i| mask & (1 << i) != 0).collect(),
        })
        .collect();
    groups.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.models.cmp(&b.models)));
    groups
}

/// Every non-empty subset of the approximations `0..num_approx`.
pub fn model_subsets(num_approx: usize) -> Vec<Vec<usize>> {
    all_groups(num_approx)
        .into_iter()
        .map(|g| g.models)
        .collect()
}

/// Named group pools for group-based estimators.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GroupPool {
    #[default]
    Pyramid,
    Pairwise,
    /// Every non-empty subset of the ensemble.
    All,
    Custom(Vec<Vec<usize>>),
}

impl GroupPool {
    /// Materialize the pool for `num_approx` approximations plus truth.
    ///
    /// Pairwise pools also get the truth-only group so the truth model can be
    /// sampled on its own.
    pub fn groups(&self, num_approx: usize) -> Result<Vec<ModelGroup>> {
        let num_models = num_approx + 1;
        let groups = match self {
            GroupPool::Pyramid => pyramid_groups(num_models),
            GroupPool::Pairwise => {
                let mut g = pairwise_groups(num_approx);
                g.push(ModelGroup {
                    models: vec![num_approx],
                });
                g
            }
            GroupPool::All => {
                if num_models > MAX_POOL_MODELS {
                    return Err(Error::config(format!(
                        "the all-subsets pool over {num_models} models is too large"
                    )));
                }
                all_groups(num_models)
            }
            GroupPool::Custom(list) => {
                let mut out = Vec::with_capacity(list.len());
                for g in list {
                    if let Some(&bad) = g.iter().find(|&&m| m >= num_models) {
                        return Err(Error::mismatch("group model index", num_models, bad));
                    }
                    out.push(ModelGroup::new(g.clone())?);
                }
                out.sort();
                out.dedup();
                out
            }
        };
        if !groups.iter().any(|g| g.contains(num_approx)) {
            return Err(Error::Infeasible(
                "group pool has no group containing the truth model".into(),
            ));
        }
        Ok(groups)
    }
}

/// Throttle ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ThrottleRule {
    /// Keep the groups whose covariance block is best conditioned.
    Conditioning,
    /// Keep the smallest groups.
    Cardinality,
}

/// Cap on the size of a candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupThrottle {
    pub limit: usize,
    pub rule: ThrottleRule,
}

/// 2-norm condition number of a symmetric matrix; infinite when singular.
pub fn condition_number(m: &DMatrix<f64>) -> f64 {
    if m.nrows() == 0 {
        return 1.0;
    }
    let eig = SymmetricEigen::new(m.clone());
    let (lo, hi) = eig
        .eigenvalues
        .iter()
        .fold((f64::INFINITY, 0.0_f64), |(lo, hi), &e| {
            (lo.min(e.abs()), hi.max(e.abs()))
        });
    if lo > 0.0 {
        hi / lo
    } else {
        f64::INFINITY
    }
}

/// Worst condition number over QoIs of the covariance block of `models`.
pub fn group_condition(cov: &CovarianceSet, models: &[usize]) -> f64 {
    (0..cov.num_qoi())
        .map(|q| condition_number(&cov.submatrix(q, models)))
        .fold(1.0_f64, f64::max)
}

/// Reduce `groups` to at most `throttle.limit` entries.
///
/// Ranking is stable (ties keep pool order). When the truncated pool would
/// lose every truth-bearing group, the best-ranked truth group takes the
/// place of the worst-ranked retained group.
pub fn throttle_groups(
    groups: Vec<ModelGroup>,
    cov: &CovarianceSet,
    throttle: &GroupThrottle,
) -> Vec<ModelGroup> {
    if groups.len() <= throttle.limit {
        return groups;
    }
    let truth = cov.truth();
    let before = groups.len();
    let mut scored: Vec<(f64, ModelGroup)> = groups
        .into_iter()
        .map(|g| {
            let score = match throttle.rule {
                ThrottleRule::Conditioning => group_condition(cov, g.models()),
                ThrottleRule::Cardinality => g.len() as f64,
            };
            (score, g)
        })
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let truth_pos = scored.iter().position(|(_, g)| g.contains(truth));
    let mut kept: Vec<ModelGroup> = scored
        .iter()
        .take(throttle.limit)
        .map(|(_, g)| g.clone())
        .collect();
    if let Some(pos) = truth_pos.filter(|&p| p >= throttle.limit) {
        // no kept group carries the truth, so the last one makes room
        if let Some(worst) = kept.last_mut() {
            *worst = scored[pos].1.clone();
        }
    }
    debug!(before, after = kept.len(), rule = ?throttle.rule, "group pool throttled");
    kept
}

/// Reduce model subsets (approximation indices) to at most `throttle.limit`,
/// scoring each subset together with the truth model.
pub fn throttle_subsets(
    subsets: Vec<Vec<usize>>,
    cov: &CovarianceSet,
    throttle: &GroupThrottle,
) -> Vec<Vec<usize>> {
    if subsets.len() <= throttle.limit {
        return subsets;
    }
    let truth = cov.truth();
    let mut scored: Vec<(f64, Vec<usize>)> = subsets
        .into_iter()
        .map(|s| {
            let score = match throttle.rule {
                ThrottleRule::Conditioning => {
                    let mut with_truth = s.clone();
                    with_truth.push(truth);
                    group_condition(cov, &with_truth)
                }
                ThrottleRule::Cardinality => s.len() as f64,
            };
            (score, s)
        })
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(throttle.limit);
    scored.into_iter().map(|(_, s)| s).collect()
}

/// A control-variate graph: every approximation points at a target model,
/// and following targets always ends at the truth model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModelDag {
    /// `targets[i]` for approximation `i`; the truth has index `targets.len()`.
    targets: Vec<usize>,
}

impl ModelDag {
    /// Validate `targets` (no self loops, indices in range, acyclic).
    pub fn new(targets: Vec<usize>) -> Result<Self> {
        let n = targets.len();
        for (i, &t) in targets.iter().enumerate() {
            if t > n {
                return Err(Error::mismatch("DAG target", n, t));
            }
            if t == i {
                return Err(Error::config(format!("model {i} targets itself")));
            }
        }
        let dag = ModelDag { targets };
        if (0..n).any(|i| dag.depth_of(i).is_none()) {
            return Err(Error::config("control-variate graph has a cycle"));
        }
        Ok(dag)
    }

    /// Every approximation targets the truth (ACV-IS/MF, CVMC).
    pub fn all_to_truth(num_approx: usize) -> Self {
        ModelDag {
            targets: vec![num_approx; num_approx],
        }
    }

    /// A chain through `order` (first element targets the truth, each later
    /// element targets its predecessor).
    pub fn chain(order: &[usize]) -> Result<Self> {
        let n = order.len();
        let mut targets = vec![usize::MAX; n];
        let mut prev = n;
        for &m in order {
            if m >= n || targets[m] != usize::MAX {
                return Err(Error::config("chain order is not a permutation"));
            }
            targets[m] = prev;
            prev = m;
        }
        ModelDag::new(targets)
    }

    /// Successive approximations `i → i+1`, the highest one to truth (MLMC/MFMC shape).
    pub fn hierarchy(num_approx: usize) -> Self {
        ModelDag {
            targets: (1..=num_approx).collect(),
        }
    }

    pub fn num_approx(&self) -> usize {
        self.targets.len()
    }

    pub fn truth(&self) -> usize {
        self.targets.len()
    }

    pub fn target(&self, i: usize) -> usize {
        self.targets[i]
    }

    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    /// Models whose target is `node`.
    pub fn children(&self, node: usize) -> Vec<usize> {
        (0..self.targets.len())
            .filter(|&i| self.targets[i] == node)
            .collect()
    }

    fn depth_of(&self, i: usize) -> Option<usize> {
        let truth = self.truth();
        let mut node = i;
        let mut depth = 0;
        while node != truth {
            depth += 1;
            if depth > self.targets.len() {
                return None;
            }
            node = self.targets[node];
        }
        Some(depth)
    }

    /// Longest path from an approximation to the truth.
    pub fn depth(&self) -> usize {
        (0..self.targets.len())
            .filter_map(|i| self.depth_of(i))
            .max()
            .unwrap_or(0)
    }

    /// Largest number of children of any node.
    pub fn width(&self) -> usize {
        (0..=self.truth())
            .map(|n| self.children(n).len())
            .max()
            .unwrap_or(0)
    }

    /// Approximations ordered so every model comes after its target.
    pub fn topological_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.targets.len()).collect();
        order.sort_by_key(|&i| self.depth_of(i).unwrap_or(usize::MAX));
        order
    }
}

/// Limits for DAG enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DagLimits {
    /// Longest approximation-to-truth path.
    pub max_depth: usize,
    /// Most children per node (the truth included).
    pub max_width: usize,
    /// Only width-1 chains.
    pub hierarchical_only: bool,
}

impl Default for DagLimits {
    fn default() -> Self {
        DagLimits {
            max_depth: usize::MAX,
            max_width: usize::MAX,
            hierarchical_only: false,
        }
    }
}

/// Every DAG over `num_approx` approximations rooted at the truth that meets
/// `limits`, in lexicographic order of the target vectors.
///
/// The search assigns targets one model at a time and prunes on width as it
/// goes, so it stays cheap for the handful of models multifidelity studies use.
pub fn enumerate_dags(num_approx: usize, limits: &DagLimits) -> Result<Vec<ModelDag>> {
    if num_approx > MAX_DAG_APPROX {
        return Err(Error::config(format!(
            "DAG enumeration over {num_approx} approximations is too large"
        )));
    }
    let width = if limits.hierarchical_only {
        1
    } else {
        limits.max_width
    };
    let mut out = Vec::new();
    let mut targets = vec![0usize; num_approx];
    let mut children = vec![0usize; num_approx + 1];
    assign_targets(0, &mut targets, &mut children, width, limits.max_depth, &mut out);
    debug!(num_approx, count = out.len(), "DAGs enumerated");
    Ok(out)
}

fn assign_targets(
    i: usize,
    targets: &mut Vec<usize>,
    children: &mut Vec<usize>,
    max_width: usize,
    max_depth: usize,
    out: &mut Vec<ModelDag>,
) {
    let n = targets.len();
    if i == n {
        if let Ok(dag) = ModelDag::new(targets.clone()) {
            if dag.depth() <= max_depth {
                out.push(dag);
            }
        }
        return;
    }
    for t in 0..=n {
        if t == i || children[t] >= max_width {
            continue;
        }
        targets[i] = t;
        children[t] += 1;
        assign_targets(i + 1, targets, children, max_width, max_depth, out);
        children[t] -= 1;
    }
}
