//! Validation evaluator and the convergence / deterioration check.

use super::cache::MetricCache;
use super::metrics::{Metric, PerformanceLog, Split};
use super::trainer::StopReason;
use crate::config::TrainingConfig;
use crate::data::DataProvider;
use crate::error::DcnError;
use crate::model::{Batch, CompressionModel, QualityMetrics};
use ndarray::Axis;
use tracing::debug;

/// Number of validation rounds averaged on each side of the convergence check.
pub const CONVERGENCE_TAIL: usize = 5;

/// A current window below this fraction of the previous one counts as deterioration.
pub const DETERIORATION_RATIO: f64 = 0.9;

/// Whether validation runs at the end of `epoch`.
pub fn is_validation_epoch(epoch: usize, schedule: usize) -> bool {
    schedule > 0 && epoch % schedule == 0
}

/// The last validation batch of a round and its reconstruction.
#[derive(Debug, Clone)]
pub struct ValidationRound {
    pub batch: Batch,
    pub reconstruction: Batch,
}

/// Runs the model in inference mode over the validation batches.
#[derive(Debug, Clone)]
pub struct ValidationEvaluator {
    batch_size: usize,
    v_batches: usize,
    is_training: bool,
}

impl ValidationEvaluator {
    pub fn new(config: &TrainingConfig, v_batches: usize) -> Self {
        Self {
            batch_size: config.batch_size,
            v_batches,
            is_training: config.validation_is_training,
        }
    }

    pub fn v_batches(&self) -> usize {
        self.v_batches
    }

    /// Evaluate every validation batch and append the round averages to `performance`.
    pub fn evaluate<M, D, Q>(
        &self,
        model: &mut M,
        data: &mut D,
        metrics: &Q,
        cache: &mut MetricCache,
        performance: &mut PerformanceLog,
    ) -> Result<ValidationRound, DcnError>
    where
        M: CompressionModel + ?Sized,
        D: DataProvider + ?Sized,
        Q: QualityMetrics + ?Sized,
    {
        if self.v_batches == 0 {
            return Err(DcnError::invalid_input(
                "validation requires at least one full batch",
            ));
        }

        let codebook = model.codebook();
        let mut last = None;

        for batch_id in 0..self.v_batches {
            let batch = data.next_validation_batch(batch_id, self.batch_size)?;
            if batch.len_of(Axis(0)) == 0 {
                return Err(DcnError::data(format!("validation batch {batch_id} is empty")));
            }
            let latent = model.compress(&batch, self.is_training)?;
            let reconstruction = model.decompress(&latent)?;
            if reconstruction.dim() != batch.dim() {
                return Err(DcnError::shape(format!(
                    "reconstruction {:?} does not match input {:?}",
                    reconstruction.dim(),
                    batch.dim()
                )));
            }

            let loss = l2_distance(&batch, &reconstruction);
            let ssim = mean_ssim(metrics, &batch, &reconstruction);
            let entropy = metrics.entropy(&latent, &codebook);
            debug!(batch = batch_id, loss, ssim, entropy, "Validation batch");

            cache.record(Metric::Loss, Split::Validation, loss);
            cache.record(Metric::Ssim, Split::Validation, ssim);
            cache.record(Metric::Entropy, Split::Validation, entropy);
            last = Some(ValidationRound {
                batch,
                reconstruction,
            });
        }

        for metric in Metric::ALL {
            let average = cache.average(metric, Split::Validation).ok_or_else(|| {
                DcnError::invalid_input(format!("no validation values recorded for {metric}"))
            })?;
            performance.append(metric, Split::Validation, average);
        }

        last.ok_or_else(|| DcnError::invalid_input("no validation batch evaluated"))
    }
}

/// L2 norm of the difference between two batches.
pub fn l2_distance(a: &Batch, b: &Batch) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// SSIM of each image pair, averaged over the batch.
pub fn mean_ssim<Q: QualityMetrics + ?Sized>(metrics: &Q, a: &Batch, b: &Batch) -> f64 {
    let n = a.len_of(Axis(0));
    let total: f64 = a
        .outer_iter()
        .zip(b.outer_iter())
        .map(|(x, y)| metrics.ssim(x, y))
        .sum();
    total / n as f64
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Decide whether the validation SSIM curve has converged or deteriorated.
///
/// Needs more than [`CONVERGENCE_TAIL`] values. `current` is the mean of
/// the last five, `previous` the mean of the (up to) five before them.
/// Convergence is checked first.
pub fn assess_convergence(ssim: &[f64], threshold: f64) -> Option<StopReason> {
    if ssim.len() <= CONVERGENCE_TAIL {
        return None;
    }
    let split = ssim.len() - CONVERGENCE_TAIL;
    let current = mean(&ssim[split..]);
    let previous = mean(&ssim[split.saturating_sub(CONVERGENCE_TAIL)..split]);
    let perf_change = ((current - previous) / previous).abs();

    if perf_change < threshold {
        Some(StopReason::Converged { perf_change })
    } else if current < DETERIORATION_RATIO * previous {
        Some(StopReason::Deteriorated { previous, current })
    } else {
        None
    }
}
