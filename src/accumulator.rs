//! Running power sums of model responses.
//!
//! Sums are kept per model and QoI for orders 1..=4, per model pair for the
//! bivariate moments, and per level for the telescoping differences
//! `Y_l = Q_l − Q_{l−1}` (with `Y_0 = Q_0`). Models are indexed low to high
//! fidelity, the truth model last, so level `l` is model `l`.
//!
//! A response that is not finite is a failed evaluation: it is left out of
//! every sum and count it would touch.

use crate::error::{Error, Result};

/// Highest moment order accumulated.
pub const MAX_ORDER: usize = 4;

/// Sums over the samples on which both models of a pair succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PairSums {
    pub count: usize,
    pub sum_i: f64,
    pub sum_j: f64,
    pub sum_ii: f64,
    pub sum_jj: f64,
    pub sum_ij: f64,
}

impl PairSums {
    fn add(&mut self, qi: f64, qj: f64) {
        self.count += 1;
        self.sum_i += qi;
        self.sum_j += qj;
        self.sum_ii += qi * qi;
        self.sum_jj += qj * qj;
        self.sum_ij += qi * qj;
    }

    fn merge(&mut self, other: &PairSums) {
        self.count += other.count;
        self.sum_i += other.sum_i;
        self.sum_j += other.sum_j;
        self.sum_ii += other.sum_ii;
        self.sum_jj += other.sum_jj;
        self.sum_ij += other.sum_ij;
    }

    /// The same sums seen from the other model of the pair.
    pub fn transposed(&self) -> PairSums {
        PairSums {
            count: self.count,
            sum_i: self.sum_j,
            sum_j: self.sum_i,
            sum_ii: self.sum_jj,
            sum_jj: self.sum_ii,
            sum_ij: self.sum_ij,
        }
    }
}

/// Power sums for one scalar stream, orders 1..=4, indexed by `order - 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PowerSums {
    pub sums: [f64; MAX_ORDER],
    pub count: usize,
}

impl PowerSums {
    #[inline]
    fn add(&mut self, q: f64) {
        let mut p = q;
        for s in self.sums.iter_mut() {
            *s += p;
            p *= q;
        }
        self.count += 1;
    }

    fn merge(&mut self, other: &PowerSums) {
        for (a, b) in self.sums.iter_mut().zip(&other.sums) {
            *a += *b;
        }
        self.count += other.count;
    }

    /// Sum of `Q^order`.
    #[inline]
    pub fn order(&self, order: usize) -> f64 {
        self.sums[order - 1]
    }
}

/// Moment accumulators for an ensemble of `num_models` models and `num_qoi` outputs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Accumulators {
    num_models: usize,
    num_qoi: usize,
    /// `[model * num_qoi + qoi]`
    models: Vec<PowerSums>,
    /// `[level * num_qoi + qoi]`
    levels: Vec<PowerSums>,
    /// Upper triangle `i < j`, `[(pair_index(i, j)) * num_qoi + qoi]`.
    pairs: Vec<PairSums>,
}

impl Accumulators {
    pub fn new(num_models: usize, num_qoi: usize) -> Self {
        let num_pairs = num_models * num_models.saturating_sub(1) / 2;
        Accumulators {
            num_models,
            num_qoi,
            models: vec![PowerSums::default(); num_models * num_qoi],
            levels: vec![PowerSums::default(); num_models * num_qoi],
            pairs: vec![PairSums::default(); num_pairs * num_qoi],
        }
    }

    pub fn num_models(&self) -> usize {
        self.num_models
    }

    pub fn num_qoi(&self) -> usize {
        self.num_qoi
    }

    #[inline]
    fn pair_index(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < j && j < self.num_models);
        // rows 0..i of the strict upper triangle, then the offset within row i
        i * (2 * self.num_models - i - 1) / 2 + (j - i - 1)
    }

    /// Fold in a batch evaluated on shared inputs.
    ///
    /// `models` lists the (distinct) model indices evaluated, and
    /// `samples[s][k][q]` is the response of `models[k]` for QoI `q` on input `s`.
    /// Pair and level sums are only updated for models evaluated together.
    pub fn accumulate(&mut self, models: &[usize], samples: &[Vec<Vec<f64>>]) -> Result<()> {
        self.check_batch(models, samples)?;
        let nq = self.num_qoi;

        // level l needs models l and l-1 on the same input
        let mut position = vec![None; self.num_models];
        for (k, &m) in models.iter().enumerate() {
            position[m] = Some(k);
        }

        for sample in samples {
            for (k, &m) in models.iter().enumerate() {
                for q in 0..nq {
                    let v = sample[k][q];
                    if v.is_finite() {
                        self.models[m * nq + q].add(v);
                    }
                }
            }

            for a in 0..models.len() {
                for b in (a + 1)..models.len() {
                    let (ka, kb) = if models[a] < models[b] { (a, b) } else { (b, a) };
                    let p = self.pair_index(models[ka], models[kb]);
                    for q in 0..nq {
                        let (va, vb) = (sample[ka][q], sample[kb][q]);
                        if va.is_finite() && vb.is_finite() {
                            self.pairs[p * nq + q].add(va, vb);
                        }
                    }
                }
            }

            for (k, &m) in models.iter().enumerate() {
                let coarse = if m == 0 {
                    None
                } else {
                    match position[m - 1] {
                        Some(kc) => Some(kc),
                        None => continue,
                    }
                };
                for q in 0..nq {
                    let fine = sample[k][q];
                    let y = match coarse {
                        None => fine,
                        Some(kc) => fine - sample[kc][q],
                    };
                    if y.is_finite() {
                        self.levels[m * nq + q].add(y);
                    }
                }
            }
        }
        Ok(())
    }

    fn check_batch(&self, models: &[usize], samples: &[Vec<Vec<f64>>]) -> Result<()> {
        let mut seen = vec![false; self.num_models];
        for &m in models {
            if m >= self.num_models {
                return Err(Error::mismatch("batch model index", self.num_models, m));
            }
            if seen[m] {
                return Err(Error::config(format!("model {m} listed twice in one batch")));
            }
            seen[m] = true;
        }
        for sample in samples {
            if sample.len() != models.len() {
                return Err(Error::mismatch("batch responses per sample", models.len(), sample.len()));
            }
            if let Some(bad) = sample.iter().find(|r| r.len() != self.num_qoi) {
                return Err(Error::mismatch("responses per model", self.num_qoi, bad.len()));
            }
        }
        Ok(())
    }

    /// Combine with accumulators built from disjoint samples.
    pub fn merge(&mut self, other: &Accumulators) -> Result<()> {
        if other.num_models != self.num_models {
            return Err(Error::mismatch("merged models", self.num_models, other.num_models));
        }
        if other.num_qoi != self.num_qoi {
            return Err(Error::mismatch("merged QoIs", self.num_qoi, other.num_qoi));
        }
        for (a, b) in self.models.iter_mut().zip(&other.models) {
            a.merge(b);
        }
        for (a, b) in self.levels.iter_mut().zip(&other.levels) {
            a.merge(b);
        }
        for (a, b) in self.pairs.iter_mut().zip(&other.pairs) {
            a.merge(b);
        }
        Ok(())
    }

    /// Forget every sample (topology change).
    pub fn reset(&mut self) {
        *self = Accumulators::new(self.num_models, self.num_qoi);
    }

    /// Power sums of model `model`, QoI `qoi`.
    pub fn model(&self, model: usize, qoi: usize) -> &PowerSums {
        &self.models[model * self.num_qoi + qoi]
    }

    /// Successful evaluations of `model` for `qoi`.
    pub fn count(&self, model: usize, qoi: usize) -> usize {
        self.model(model, qoi).count
    }

    /// Power sums of the level difference `Y_level`.
    pub fn level(&self, level: usize, qoi: usize) -> &PowerSums {
        &self.levels[level * self.num_qoi + qoi]
    }

    /// Pair sums oriented as `(i, j)`. For `i == j` the model's own sums are
    /// returned in pair form.
    pub fn pair(&self, i: usize, j: usize, qoi: usize) -> PairSums {
        if i == j {
            let s = self.model(i, qoi);
            return PairSums {
                count: s.count,
                sum_i: s.sums[0],
                sum_j: s.sums[0],
                sum_ii: s.sums[1],
                sum_jj: s.sums[1],
                sum_ij: s.sums[1],
            };
        }
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        let p = self.pairs[self.pair_index(lo, hi) * self.num_qoi + qoi];
        if i < j {
            p
        } else {
            p.transposed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(rows: &[&[f64]]) -> Vec<Vec<Vec<f64>>> {
        rows.iter()
            .map(|r| r.iter().map(|&v| vec![v]).collect())
            .collect()
    }

    #[test]
    fn power_sums_up_to_fourth_order() {
        let mut acc = Accumulators::new(1, 1);
        acc.accumulate(&[0], &batch(&[&[2.0], &[-1.0]])).unwrap();
        let s = acc.model(0, 0);
        assert_eq!(s.count, 2);
        assert_eq!(s.sums, [1.0, 5.0, 7.0, 17.0]);
        assert_eq!(s.order(4), 17.0);
    }

    #[test]
    fn pair_and_level_sums() {
        let mut acc = Accumulators::new(3, 1);
        acc.accumulate(&[0, 1, 2], &batch(&[&[1.0, 2.0, 4.0], &[3.0, 5.0, 6.0]]))
            .unwrap();
        let p = acc.pair(0, 2, 0);
        assert_eq!(p.count, 2);
        assert_eq!(p.sum_ij, 1.0 * 4.0 + 3.0 * 6.0);
        assert_eq!(acc.pair(2, 0, 0).sum_i, 10.0);
        // Y_1 = Q_1 - Q_0 = [1, 2], Y_2 = Q_2 - Q_1 = [2, 1]
        assert_eq!(acc.level(1, 0).sums[0], 3.0);
        assert_eq!(acc.level(2, 0).sums[1], 5.0);
        assert_eq!(acc.level(0, 0).sums[0], 4.0);
    }

    #[test]
    fn failures_are_excluded_per_model_and_pair() {
        let mut acc = Accumulators::new(2, 1);
        acc.accumulate(
            &[0, 1],
            &batch(&[&[1.0, 2.0], &[f64::NAN, 3.0], &[2.0, f64::INFINITY]]),
        )
        .unwrap();
        assert_eq!(acc.count(0, 0), 2);
        assert_eq!(acc.count(1, 0), 2);
        assert_eq!(acc.pair(0, 1, 0).count, 1);
        assert_eq!(acc.level(1, 0).count, 1);
    }

    #[test]
    fn level_needs_both_neighbours() {
        let mut acc = Accumulators::new(3, 1);
        acc.accumulate(&[0, 2], &batch(&[&[1.0, 5.0]])).unwrap();
        assert_eq!(acc.level(0, 0).count, 1);
        assert_eq!(acc.level(2, 0).count, 0);
        // Order of models in the batch does not matter.
        acc.accumulate(&[2, 1], &batch(&[&[5.0, 4.0]])).unwrap();
        assert_eq!(acc.level(2, 0).sums[0], 1.0);
        assert_eq!(acc.pair(1, 2, 0).sum_i, 4.0);
    }

    #[test]
    fn merge_equals_single_pass() {
        let rows: [&[f64]; 4] = [&[1.0, 2.0], &[3.0, 1.0], &[0.5, 0.25], &[2.0, 8.0]];
        let mut whole = Accumulators::new(2, 1);
        whole.accumulate(&[0, 1], &batch(&rows)).unwrap();

        let mut a = Accumulators::new(2, 1);
        let mut b = Accumulators::new(2, 1);
        a.accumulate(&[0, 1], &batch(&rows[..1])).unwrap();
        b.accumulate(&[0, 1], &batch(&rows[1..])).unwrap();
        a.merge(&b).unwrap();
        assert_eq!(a, whole);

        a.reset();
        assert_eq!(a, Accumulators::new(2, 1));
    }

    #[test]
    fn malformed_batches_are_rejected() {
        let mut acc = Accumulators::new(2, 2);
        assert!(acc.accumulate(&[0, 0], &[]).is_err());
        assert!(acc.accumulate(&[3], &[]).is_err());
        assert!(acc
            .accumulate(&[0], &[vec![vec![1.0]]])
            .is_err());
        assert!(acc.merge(&Accumulators::new(3, 2)).is_err());
    }
}
