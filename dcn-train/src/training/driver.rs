//! Training step driver: one epoch of augmented optimization steps.

use super::augment::{AugmentationSampler, sample_keep_prob};
use super::cache::MetricCache;
use super::metrics::{Metric, Split};
use crate::config::TrainingConfig;
use crate::data::DataProvider;
use crate::error::DcnError;
use crate::model::{Batch, CompressionModel, DiagnosticReport};
use rand::Rng;
use tracing::{debug, error};

/// How an epoch of training steps ended.
#[derive(Debug, Clone)]
pub enum EpochOutcome {
    /// Every batch was stepped. Carries the last augmented batch.
    Finished { last_batch: Option<Batch> },
    /// A step returned a NaN loss; nothing from that step was recorded.
    Diverged {
        batch_id: usize,
        diagnostics: DiagnosticReport,
    },
}

/// Iterates the training batches of one epoch.
#[derive(Debug, Clone)]
pub struct TrainingStepDriver {
    sampler: AugmentationSampler,
    batch_size: usize,
    n_batches: usize,
    sample_dropout: bool,
}

impl TrainingStepDriver {
    pub fn new(config: &TrainingConfig, n_batches: usize) -> Self {
        Self {
            sampler: AugmentationSampler::new(
                config.augmentation_probs.clone(),
                config.patch_size,
            ),
            batch_size: config.batch_size,
            n_batches,
            sample_dropout: config.sample_dropout,
        }
    }

    pub fn n_batches(&self) -> usize {
        self.n_batches
    }

    /// Run one epoch, recording every step's metrics under [`Split::Training`].
    ///
    /// The loss is checked after every step; a NaN stops the epoch at once.
    pub fn run_epoch<M, D, R>(
        &self,
        epoch: usize,
        model: &mut M,
        data: &mut D,
        learning_rate: f64,
        cache: &mut MetricCache,
        rng: &mut R,
    ) -> Result<EpochOutcome, DcnError>
    where
        M: CompressionModel + ?Sized,
        D: DataProvider + ?Sized,
        R: Rng + ?Sized,
    {
        let mut last_batch = None;

        for batch_id in 0..self.n_batches {
            let plan = self.sampler.sample(rng);
            let batch = data.next_training_batch(batch_id, self.batch_size, plan.patch_size)?;
            let batch = self.sampler.apply(&plan, batch, rng)?;
            let keep_prob = sample_keep_prob(self.sample_dropout, rng);

            let values = model.training_step(&batch, learning_rate, keep_prob)?;
            let loss = values.get(Metric::Loss.key()).copied().ok_or_else(|| {
                DcnError::model("training step did not report a 'loss' value")
            })?;

            if loss.is_nan() {
                error!(epoch, batch = batch_id, "NaN loss detected - dumping current variables");
                let diagnostics = model.dump_diagnostics();
                for line in diagnostics.to_string().lines() {
                    error!("{line}");
                }
                return Ok(EpochOutcome::Diverged {
                    batch_id,
                    diagnostics,
                });
            }

            for (key, value) in &values {
                match Metric::from_key(key) {
                    Some(metric) => cache.record(metric, Split::Training, *value),
                    None => debug!(key = %key, "Ignoring untracked step metric"),
                }
            }
            last_batch = Some(batch);
        }

        Ok(EpochOutcome::Finished { last_batch })
    }
}
