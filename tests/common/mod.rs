#![allow(dead_code)]

use fidelis::{BatchRequest, BatchResponse, Evaluator, EvaluatorError, InputStream};
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;

// ─── Synthetic ensemble ────────────────────────────────────────────────────
// Every model is a linear combination of three standard normal inputs drawn
// from (stream, sample index), so models sharing inputs are correlated.
//
//   model 0 = z0
//   model 1 = z0 + 0.5·z1
//   truth   = z0 + 0.5·z1 + 0.2·z2
//
// Level discrepancy variances are [1, 0.25, 0.04].

pub const COSTS: [f64; 3] = [0.01, 0.1, 1.0];

pub struct Ensemble {
    seed: u64,
    num_qoi: usize,
    /// Model whose evaluations fail on every `period`-th sample.
    failing: Option<(usize, u64)>,
    pub evaluations: usize,
}

impl Ensemble {
    pub fn new(seed: u64) -> Self {
        Ensemble {
            seed,
            num_qoi: 1,
            failing: None,
            evaluations: 0,
        }
    }

    pub fn with_qoi(mut self, num_qoi: usize) -> Self {
        self.num_qoi = num_qoi;
        self
    }

    pub fn with_failures(mut self, model: usize, period: u64) -> Self {
        self.failing = Some((model, period));
        self
    }

    fn inputs(&self, stream: InputStream, index: u64) -> [f64; 3] {
        let tag = match stream {
            InputStream::Shared => 0,
            InputStream::Independent(k) => k as u64 + 1,
        };
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(
            self.seed
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add(tag << 40)
                .wrapping_add(index),
        );
        [
            rng.sample(StandardNormal),
            rng.sample(StandardNormal),
            rng.sample(StandardNormal),
        ]
    }

    fn response(&self, model: usize, z: &[f64; 3]) -> Vec<f64> {
        let base = match model {
            0 => z[0],
            1 => z[0] + 0.5 * z[1],
            _ => z[0] + 0.5 * z[1] + 0.2 * z[2],
        };
        // extra QoIs rescale and shift the first
        (0..self.num_qoi)
            .map(|q| (1.0 + q as f64) * base + q as f64)
            .collect()
    }
}

impl Evaluator for Ensemble {
    fn num_qoi(&self) -> usize {
        self.num_qoi
    }

    fn evaluate_batch(&mut self, request: &BatchRequest) -> Result<BatchResponse, EvaluatorError> {
        let mut samples = Vec::with_capacity(request.num_samples);
        for s in 0..request.num_samples as u64 {
            let index = request.first_sample + s;
            let z = self.inputs(request.stream, index);
            let row = request
                .models
                .iter()
                .map(|&m| match self.failing {
                    Some((bad, period)) if bad == m && index % period == period - 1 => {
                        vec![f64::NAN; self.num_qoi]
                    }
                    _ => self.response(m, &z),
                })
                .collect();
            samples.push(row);
        }
        self.evaluations += request.num_samples * request.models.len();
        Ok(BatchResponse { samples })
    }
}

/// Exact covariance of the ensemble for one QoI.
pub fn exact_covariance() -> nalgebra::DMatrix<f64> {
    nalgebra::DMatrix::from_row_slice(
        3,
        3,
        &[1.0, 1.0, 1.0, 1.0, 1.25, 1.25, 1.0, 1.25, 1.29],
    )
}
