//! Covariance snapshots handed to the variance models.
//!
//! A [`CovarianceSet`] is rebuilt from the accumulators after every batch and
//! never mutated afterwards; objective closures borrow it read-only.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::accumulator::Accumulators;
use crate::error::{Error, Result};
use crate::statistics::{
    central_moments, correlation_squared, pair_covariance, variance, CentralMoments,
};

/// Per-QoI covariance among `n` approximations and the truth model (index `n`).
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceSet {
    num_approx: usize,
    /// One `(n+1) x (n+1)` matrix per QoI.
    full: Vec<DMatrix<f64>>,
    /// Squared correlation of each approximation with the truth, per QoI.
    rho2_lh: Vec<Vec<f64>>,
}

impl CovarianceSet {
    /// Build from full covariance matrices, truth model last.
    ///
    /// Matrices must be square, equally sized (at least 2x2) and symmetric.
    pub fn from_matrices(matrices: Vec<DMatrix<f64>>) -> Result<Self> {
        let first = matrices
            .first()
            .ok_or_else(|| Error::config("covariance set needs at least one QoI"))?;
        let dim = first.nrows();
        if dim < 2 {
            return Err(Error::mismatch("covariance dimension", 2, dim));
        }
        for m in &matrices {
            if m.nrows() != dim || m.ncols() != dim {
                return Err(Error::mismatch("covariance dimension", dim, m.ncols()));
            }
            let scale = m.amax().max(f64::MIN_POSITIVE);
            for i in 0..dim {
                for j in 0..i {
                    if (m[(i, j)] - m[(j, i)]).abs() > 1e-10 * scale {
                        return Err(Error::config("covariance matrix is not symmetric"));
                    }
                }
            }
            if m.iter().any(|v| !v.is_finite()) {
                return Err(Error::config("covariance matrix has non-finite entries"));
            }
        }
        let n = dim - 1;
        let rho2_lh = matrices
            .iter()
            .map(|m| {
                let var_h = m[(n, n)];
                (0..n)
                    .map(|i| {
                        let denom = m[(i, i)] * var_h;
                        if denom > 0.0 {
                            (m[(i, n)] * m[(i, n)] / denom).clamp(0.0, 1.0)
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect();
        Ok(CovarianceSet {
            num_approx: n,
            full: matrices,
            rho2_lh,
        })
    }

    /// Estimate every QoI's covariance from accumulated sums.
    ///
    /// Diagonal entries use all successful samples of a model; off-diagonal
    /// entries use the samples shared by the pair.
    pub fn from_accumulators(acc: &Accumulators) -> Result<Self> {
        let dim = acc.num_models();
        if dim < 2 {
            return Err(Error::mismatch("ensemble size", 2, dim));
        }
        let mut matrices = Vec::with_capacity(acc.num_qoi());
        let mut rho2_lh = Vec::with_capacity(acc.num_qoi());
        for q in 0..acc.num_qoi() {
            for m in 0..dim {
                let n = acc.count(m, q);
                if n < 2 {
                    return Err(Error::InsufficientSamples {
                        context: "model variance",
                        needed: 2,
                        available: n,
                    });
                }
            }
            let mut c = DMatrix::zeros(dim, dim);
            for i in 0..dim {
                let s = acc.model(i, q);
                c[(i, i)] = variance(s.sums[0], s.sums[1], s.count);
                for j in 0..i {
                    let v = pair_covariance(&acc.pair(i, j, q));
                    c[(i, j)] = v;
                    c[(j, i)] = v;
                }
            }
            let truth = dim - 1;
            rho2_lh.push(
                (0..truth)
                    .map(|i| correlation_squared(&acc.pair(i, truth, q)))
                    .collect(),
            );
            matrices.push(c);
        }
        debug!(models = dim, qoi = acc.num_qoi(), "covariance estimated");
        Ok(CovarianceSet {
            num_approx: dim - 1,
            full: matrices,
            rho2_lh,
        })
    }

    /// Number of approximations (the truth model has this index).
    pub fn num_approx(&self) -> usize {
        self.num_approx
    }

    /// Index of the truth model.
    pub fn truth(&self) -> usize {
        self.num_approx
    }

    pub fn num_qoi(&self) -> usize {
        self.full.len()
    }

    /// Full covariance among all models for `qoi`.
    pub fn full(&self, qoi: usize) -> &DMatrix<f64> {
        &self.full[qoi]
    }

    /// Covariance among the approximations.
    pub fn cov_ll(&self, qoi: usize) -> DMatrix<f64> {
        let n = self.num_approx;
        self.full[qoi].view((0, 0), (n, n)).into_owned()
    }

    /// Covariance of each approximation with the truth.
    pub fn cov_lh(&self, qoi: usize) -> DVector<f64> {
        let n = self.num_approx;
        self.full[qoi].view((0, n), (n, 1)).column(0).into_owned()
    }

    /// Variance of the truth model.
    pub fn var_h(&self, qoi: usize) -> f64 {
        self.full[qoi][(self.num_approx, self.num_approx)]
    }

    /// Squared correlations with the truth, per approximation.
    pub fn rho2_lh(&self, qoi: usize) -> &[f64] {
        &self.rho2_lh[qoi]
    }

    /// Squared correlations averaged over QoIs; used to order models.
    pub fn mean_rho2_lh(&self) -> Vec<f64> {
        let nq = self.num_qoi() as f64;
        (0..self.num_approx)
            .map(|i| self.rho2_lh.iter().map(|r| r[i]).sum::<f64>() / nq)
            .collect()
    }

    /// The snapshot restricted to the approximations in `active` (global
    /// indices, increasing) and the truth model, re-indexed `0..active.len()`.
    pub fn restrict(&self, active: &[usize]) -> Result<CovarianceSet> {
        if active.is_empty() {
            return Err(Error::config("restricted ensemble has no approximations"));
        }
        if active.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::config("active approximations must be strictly increasing"));
        }
        if let Some(&bad) = active.iter().find(|&&i| i >= self.num_approx) {
            return Err(Error::mismatch("active approximation", self.num_approx, bad));
        }
        let mut keep = active.to_vec();
        keep.push(self.num_approx);
        let full = self
            .full
            .iter()
            .map(|m| DMatrix::from_fn(keep.len(), keep.len(), |i, j| m[(keep[i], keep[j])]))
            .collect();
        let rho2_lh = self
            .rho2_lh
            .iter()
            .map(|r| active.iter().map(|&i| r[i]).collect())
            .collect();
        Ok(CovarianceSet {
            num_approx: active.len(),
            full,
            rho2_lh,
        })
    }

    /// Covariance among the models in `models` (global indices) for `qoi`.
    pub fn submatrix(&self, qoi: usize, models: &[usize]) -> DMatrix<f64> {
        let m = &self.full[qoi];
        DMatrix::from_fn(models.len(), models.len(), |i, j| m[(models[i], models[j])])
    }

    /// A copy with `rel · max|diag|` added to every diagonal entry.
    pub fn nudge_diagonal(&self, rel: f64) -> CovarianceSet {
        let full = self
            .full
            .iter()
            .map(|m| {
                let shift = rel * m.diagonal().amax().max(f64::MIN_POSITIVE);
                let mut out = m.clone();
                for i in 0..out.nrows() {
                    out[(i, i)] += shift;
                }
                out
            })
            .collect();
        warn!(rel, "covariance diagonal nudged");
        CovarianceSet {
            num_approx: self.num_approx,
            full,
            rho2_lh: self.rho2_lh.clone(),
        }
    }
}

/// Statistics of the telescoping differences `Y_l = Q_l − Q_{l−1}`.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelStatistics {
    /// `[level][qoi]` discrepancy variance `V_l`.
    variances: Vec<Vec<f64>>,
    /// `[level][qoi]` central moments of `Y_l`, when enough samples exist.
    moments: Vec<Vec<Option<CentralMoments>>>,
    /// `[level][qoi]` sample count behind the estimates.
    counts: Vec<Vec<usize>>,
    /// Per-QoI central moments of the truth response itself.
    truth_moments: Vec<Option<CentralMoments>>,
}

impl LevelStatistics {
    /// Estimate from the level sums of `acc`.
    pub fn from_accumulators(acc: &Accumulators) -> Result<Self> {
        let levels = acc.num_models();
        let mut variances = Vec::with_capacity(levels);
        let mut moments = Vec::with_capacity(levels);
        let mut counts = Vec::with_capacity(levels);
        for l in 0..levels {
            let mut v = Vec::with_capacity(acc.num_qoi());
            let mut m = Vec::with_capacity(acc.num_qoi());
            let mut c = Vec::with_capacity(acc.num_qoi());
            for q in 0..acc.num_qoi() {
                let s = acc.level(l, q);
                if s.count < 2 {
                    return Err(Error::InsufficientSamples {
                        context: "level discrepancy variance",
                        needed: 2,
                        available: s.count,
                    });
                }
                v.push(variance(s.sums[0], s.sums[1], s.count));
                m.push(central_moments(&s.sums, s.count).ok());
                c.push(s.count);
            }
            variances.push(v);
            moments.push(m);
            counts.push(c);
        }
        let truth_moments = (0..acc.num_qoi())
            .map(|q| {
                let s = acc.model(levels - 1, q);
                central_moments(&s.sums, s.count).ok()
            })
            .collect();
        Ok(LevelStatistics {
            variances,
            moments,
            counts,
            truth_moments,
        })
    }

    /// Build from known discrepancy variances `[level][qoi]`.
    pub fn from_variances(variances: Vec<Vec<f64>>) -> Result<Self> {
        let nq = variances.first().map_or(0, |v| v.len());
        if nq == 0 {
            return Err(Error::config("level statistics need at least one level and QoI"));
        }
        if let Some(bad) = variances.iter().find(|v| v.len() != nq) {
            return Err(Error::mismatch("level QoIs", nq, bad.len()));
        }
        if variances.iter().flatten().any(|&v| !(v >= 0.0) || !v.is_finite()) {
            return Err(Error::config("level variances must be finite and non-negative"));
        }
        let levels = variances.len();
        Ok(LevelStatistics {
            moments: vec![vec![None; nq]; levels],
            counts: vec![vec![0; nq]; levels],
            truth_moments: vec![None; nq],
            variances,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.variances.len()
    }

    pub fn num_qoi(&self) -> usize {
        self.variances.first().map_or(0, |v| v.len())
    }

    /// `V_l` for `qoi`.
    pub fn variance(&self, level: usize, qoi: usize) -> f64 {
        self.variances[level][qoi]
    }

    /// Central moments of `Y_l`, if at least four samples were seen.
    pub fn moments(&self, level: usize, qoi: usize) -> Option<&CentralMoments> {
        self.moments[level][qoi].as_ref()
    }

    pub fn count(&self, level: usize, qoi: usize) -> usize {
        self.counts[level][qoi]
    }

    /// Central moments of the truth response, if at least four samples were seen.
    pub fn truth_moments(&self, qoi: usize) -> Option<&CentralMoments> {
        self.truth_moments[qoi].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_model() -> CovarianceSet {
        CovarianceSet::from_matrices(vec![DMatrix::from_row_slice(
            2,
            2,
            &[4.0, 2.0, 2.0, 1.0],
        )])
        .unwrap()
    }

    #[test]
    fn blocks_of_the_full_matrix() {
        let c = two_model();
        assert_eq!(c.num_approx(), 1);
        assert_eq!(c.truth(), 1);
        assert_eq!(c.cov_ll(0)[(0, 0)], 4.0);
        assert_eq!(c.cov_lh(0)[0], 2.0);
        assert_eq!(c.var_h(0), 1.0);
        assert_relative_eq!(c.rho2_lh(0)[0], 1.0);
    }

    #[test]
    fn rejects_asymmetric_input() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.4, 1.0]);
        assert!(CovarianceSet::from_matrices(vec![m]).is_err());
        assert!(CovarianceSet::from_matrices(vec![]).is_err());
    }

    #[test]
    fn restriction_keeps_truth_last() {
        #[rustfmt::skip]
        let m = DMatrix::from_row_slice(4, 4, &[
            1.0, 0.1, 0.2, 0.3,
            0.1, 2.0, 0.4, 0.5,
            0.2, 0.4, 3.0, 0.6,
            0.3, 0.5, 0.6, 4.0,
        ]);
        let c = CovarianceSet::from_matrices(vec![m]).unwrap();
        let r = c.restrict(&[0, 2]).unwrap();
        assert_eq!(r.num_approx(), 2);
        assert_eq!(r.full(0)[(1, 1)], 3.0);
        assert_eq!(r.cov_lh(0)[1], 0.6);
        assert_eq!(r.var_h(0), 4.0);
        assert!(c.restrict(&[2, 0]).is_err());
        assert!(c.restrict(&[3]).is_err());
    }

    #[test]
    fn estimated_from_accumulators() {
        let mut acc = Accumulators::new(2, 1);
        let rows: Vec<Vec<Vec<f64>>> = [1.0, 2.0, 3.0, 4.0, 5.0]
            .iter()
            .map(|&x| vec![vec![2.0 * x], vec![x + 0.5]])
            .collect();
        acc.accumulate(&[0, 1], &rows).unwrap();
        let c = CovarianceSet::from_accumulators(&acc).unwrap();
        assert_relative_eq!(c.var_h(0), 2.5, epsilon = 1e-12);
        assert_relative_eq!(c.cov_ll(0)[(0, 0)], 10.0, epsilon = 1e-12);
        assert_relative_eq!(c.cov_lh(0)[0], 5.0, epsilon = 1e-12);
        assert_relative_eq!(c.rho2_lh(0)[0], 1.0, epsilon = 1e-12);

        let again = CovarianceSet::from_accumulators(&acc).unwrap();
        assert_eq!(c, again);
    }

    #[test]
    fn too_few_samples() {
        let mut acc = Accumulators::new(2, 1);
        acc.accumulate(&[0, 1], &[vec![vec![1.0], vec![2.0]]]).unwrap();
        assert!(matches!(
            CovarianceSet::from_accumulators(&acc),
            Err(Error::InsufficientSamples { .. })
        ));
    }

    #[test]
    fn level_statistics_from_sums() {
        let mut acc = Accumulators::new(2, 1);
        let rows: Vec<Vec<Vec<f64>>> = [1.0, 2.0, 3.0, 4.0]
            .iter()
            .map(|&x| vec![vec![x], vec![x + x * x * 0.1]])
            .collect();
        acc.accumulate(&[0, 1], &rows).unwrap();
        let levels = LevelStatistics::from_accumulators(&acc).unwrap();
        assert_eq!(levels.num_levels(), 2);
        // Y_1 = 0.1 x^2 = [0.1, 0.4, 0.9, 1.6]
        let y = [0.1, 0.4, 0.9, 1.6];
        let mean = y.iter().sum::<f64>() / 4.0;
        let var = y.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / 3.0;
        assert_relative_eq!(levels.variance(1, 0), var, epsilon = 1e-12);
        assert!(levels.moments(1, 0).is_some());
        assert_eq!(levels.count(1, 0), 4);
        assert!(levels.truth_moments(0).is_some());
    }
}
