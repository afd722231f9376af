//! The seam between the allocation loop and the simulation models.

use crate::error::Error;

/// Which input sequence a batch draws from.
///
/// Samples with the same stream and index see the same inputs, whichever
/// model evaluates them. Distinct streams are statistically independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InputStream {
    /// The stream shared by every model (pilot and nested designs).
    Shared,
    /// A private stream (level, group or sample extension).
    Independent(usize),
}

/// Evaluate `models` on samples `first_sample..first_sample + num_samples`
/// of `stream`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub models: Vec<usize>,
    pub num_samples: usize,
    pub stream: InputStream,
    pub first_sample: u64,
}

/// `samples[s][k][q]`: response of `models[k]` for QoI `q` on sample `s`.
/// A failed evaluation is any non-finite value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResponse {
    pub samples: Vec<Vec<Vec<f64>>>,
}

impl BatchResponse {
    /// Build from optional responses, `None` marking a failure.
    pub fn from_options(samples: Vec<Vec<Vec<Option<f64>>>>) -> Self {
        BatchResponse {
            samples: samples
                .into_iter()
                .map(|s| {
                    s.into_iter()
                        .map(|m| m.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
                        .collect()
                })
                .collect(),
        }
    }
}

/// A batch that could not be evaluated at all.
#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    #[error("model {0} is unavailable")]
    Unavailable(usize),
    #[error("{0}")]
    Failed(String),
}

impl From<EvaluatorError> for Error {
    fn from(e: EvaluatorError) -> Self {
        Error::Evaluator(e.to_string())
    }
}

/// Runs model batches. Calls block until the whole batch is done.
pub trait Evaluator {
    /// Number of quantities of interest every model returns.
    fn num_qoi(&self) -> usize;

    fn evaluate_batch(&mut self, request: &BatchRequest) -> Result<BatchResponse, EvaluatorError>;
}

impl<E: Evaluator + ?Sized> Evaluator for &mut E {
    fn num_qoi(&self) -> usize {
        (**self).num_qoi()
    }

    fn evaluate_batch(&mut self, request: &BatchRequest) -> Result<BatchResponse, EvaluatorError> {
        (**self).evaluate_batch(request)
    }
}

/// An [`Evaluator`] from a closure `f(model, stream, sample) -> responses`.
pub struct FnEvaluator<F> {
    num_qoi: usize,
    func: F,
    evaluations: usize,
}

impl<F> FnEvaluator<F>
where
    F: FnMut(usize, InputStream, u64) -> Vec<f64>,
{
    pub fn new(num_qoi: usize, func: F) -> Self {
        FnEvaluator {
            num_qoi,
            func,
            evaluations: 0,
        }
    }

    /// Single-model evaluations performed so far.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }
}

impl<F> Evaluator for FnEvaluator<F>
where
    F: FnMut(usize, InputStream, u64) -> Vec<f64>,
{
    fn num_qoi(&self) -> usize {
        self.num_qoi
    }

    fn evaluate_batch(&mut self, request: &BatchRequest) -> Result<BatchResponse, EvaluatorError> {
        let mut samples = Vec::with_capacity(request.num_samples);
        for s in 0..request.num_samples as u64 {
            let index = request.first_sample + s;
            let row = request
                .models
                .iter()
                .map(|&m| (self.func)(m, request.stream, index))
                .collect();
            samples.push(row);
        }
        self.evaluations += request.num_samples * request.models.len();
        Ok(BatchResponse { samples })
    }
}
