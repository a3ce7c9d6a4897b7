//! Epoch orchestrator: the outer training loop.
//!
//! ```text
//! Idle ──(output dir exists, no overwrite)──────────────► Completed (skipped)
//!   │
//!   └──► Running ──(NaN loss)────────────────────────────► Stopped(Diverged)
//!           │  ├───(validation SSIM flat)────────────────► Stopped(Converged)
//!           │  └───(validation SSIM down >10%)───────────► Stopped(Deteriorated)
//!           └──(all epochs done)─────────────────────────► Completed
//! ```

use super::cache::MetricCache;
use super::driver::{EpochOutcome, TrainingStepDriver};
use super::evaluator::{ValidationEvaluator, assess_convergence, is_validation_epoch};
use super::metrics::{Metric, PerformanceLog, Split};
use super::report::{ProgressFields, ProgressLine, ProgressReporter};
use crate::config::TrainingConfig;
use crate::data::{DataProvider, batch_count};
use crate::error::DcnError;
use crate::model::{CompressionModel, DiagnosticReport, QualityMetrics};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Why a run ended before exhausting its epochs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Validation SSIM changed by less than the convergence threshold.
    Converged { perf_change: f64 },
    /// Validation SSIM dropped by more than 10%.
    Deteriorated { previous: f64, current: f64 },
    /// A training step returned a NaN loss.
    Diverged { epoch: usize, batch_id: usize },
}

impl StopReason {
    pub fn label(&self) -> &'static str {
        match self {
            StopReason::Converged { .. } => "converged",
            StopReason::Deteriorated { .. } => "deteriorated",
            StopReason::Diverged { .. } => "diverged",
        }
    }

    /// Deterioration and divergence are abnormal stops; convergence is expected.
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, StopReason::Converged { .. })
    }
}

/// Lifecycle of a run. A [`TrainingRun`] always ends in `Stopped` or `Completed`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum TrainingState {
    /// Not started; the state of a run before [`train`] is called.
    #[default]
    Idle,
    Running,
    Stopped(StopReason),
    Completed,
}

/// The collaborators a run operates on.
pub struct TrainingOps<'a, M: ?Sized, Q: ?Sized> {
    pub dcn: &'a mut M,
    pub metrics: &'a Q,
}

impl<'a, M: ?Sized, Q: ?Sized> TrainingOps<'a, M, Q> {
    pub fn new(dcn: &'a mut M, metrics: &'a Q) -> Self {
        Self { dcn, metrics }
    }
}

/// Result of a call to [`train`].
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub state: TrainingState,
    /// The output directory already existed and overwrite was off.
    pub skipped: bool,
    pub performance: PerformanceLog,
    pub epochs_completed: usize,
    /// Learning rate in effect when the run ended.
    pub learning_rate: f64,
    pub output_dir: PathBuf,
    /// Model state dumped after a NaN loss.
    pub diagnostics: Option<DiagnosticReport>,
}

impl TrainingRun {
    fn skipped(output_dir: PathBuf, learning_rate: f64) -> Self {
        Self {
            state: TrainingState::Completed,
            skipped: true,
            performance: PerformanceLog::new(),
            epochs_completed: 0,
            learning_rate,
            output_dir,
            diagnostics: None,
        }
    }

    /// The run diverged and produced no usable result.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.state,
            TrainingState::Stopped(StopReason::Diverged { .. })
        )
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.state {
            TrainingState::Stopped(reason) => Some(reason),
            _ => None,
        }
    }
}

/// `<directory>/<model_code>/<scoped_name>`.
pub fn output_dir<M: CompressionModel + ?Sized>(directory: &Path, model: &M) -> PathBuf {
    directory.join(model.model_code()).join(model.scoped_name())
}

/// Learning rate after the reduction scheduled for the start of `epoch`, if any.
pub fn scheduled_learning_rate(current: f64, epoch: usize, config: &TrainingConfig) -> f64 {
    if epoch > 0 && epoch % config.learning_rate_reduction_schedule == 0 {
        current * config.learning_rate_reduction_factor
    } else {
        current
    }
}

fn log_stop(reason: &StopReason) {
    match *reason {
        StopReason::Converged { perf_change } => info!(
            "Early stopping - the model converged, validation SSIM change {perf_change:.4}"
        ),
        StopReason::Deteriorated { previous, current } => error!(
            "Error - SSIM deterioration by more than 10% {previous:.4} -> {current:.4}"
        ),
        StopReason::Diverged { epoch, batch_id } => {
            error!(epoch, batch = batch_id, "Training diverged - NaN loss")
        }
    }
}

/// Train a compression model.
///
/// Returns a skipped run without touching the filesystem when the model's
/// output directory already exists and `overwrite` is false. Early stops
/// are reported through the returned [`TrainingRun`]; only collaborator and
/// I/O failures are errors.
pub fn train<M, D, Q>(
    ops: TrainingOps<'_, M, Q>,
    config: &mut TrainingConfig,
    data: &mut D,
    directory: &Path,
    overwrite: bool,
) -> Result<TrainingRun, DcnError>
where
    M: CompressionModel + ?Sized,
    D: DataProvider + ?Sized,
    Q: QualityMetrics + ?Sized,
{
    let TrainingOps { dcn, metrics } = ops;

    let out_dir = output_dir(directory, &*dcn);
    if out_dir.is_dir() && !overwrite {
        info!(path = %out_dir.display(), "Output directory exists, skipping training");
        return Ok(TrainingRun::skipped(out_dir, config.learning_rate));
    }

    config.validate()?;
    let n_batches = batch_count(data.training_count(), config.batch_size);
    let v_batches = batch_count(data.validation_count(), config.batch_size);
    if n_batches == 0 {
        return Err(DcnError::invalid_input(format!(
            "{} training samples do not fill a batch of {}",
            data.training_count(),
            config.batch_size
        )));
    }
    if v_batches == 0 {
        return Err(DcnError::invalid_input(format!(
            "{} validation samples do not fill a batch of {}",
            data.validation_count(),
            config.batch_size
        )));
    }

    dcn.init()?;

    info!("Output directory: {}", out_dir.display());
    std::fs::create_dir_all(&out_dir)?;
    let sink = dcn.summary_sink(&out_dir)?;
    let mut reporter = ProgressReporter::new(out_dir.clone(), config.batch_size, sink);

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let driver = TrainingStepDriver::new(config, n_batches);
    let evaluator = ValidationEvaluator::new(config, v_batches);
    let mut cache = MetricCache::new(n_batches, v_batches);
    let mut performance = PerformanceLog::new();
    let mut learning_rate = config.learning_rate;
    let mut epochs_completed = 0;

    let label = dcn.model_code().rsplit('/').next().unwrap_or_default().to_string();
    let progress = ProgressLine::new(config.n_epochs, &label, config.show_progress);

    let mut state = TrainingState::Running;
    info!(
        n_epochs = config.n_epochs,
        n_batches, v_batches, "Starting training"
    );

    for epoch in 0..config.n_epochs {
        config.current_epoch = epoch;

        let next_rate = scheduled_learning_rate(learning_rate, epoch, config);
        if next_rate != learning_rate {
            learning_rate = next_rate;
            info!(epoch, learning_rate, "Reduced learning rate");
        }

        let outcome = driver.run_epoch(
            epoch,
            &mut *dcn,
            &mut *data,
            learning_rate,
            &mut cache,
            &mut rng,
        )?;
        let last_batch = match outcome {
            EpochOutcome::Finished { last_batch } => last_batch,
            EpochOutcome::Diverged {
                batch_id,
                diagnostics,
            } => {
                let reason = StopReason::Diverged { epoch, batch_id };
                log_stop(&reason);
                progress.finish();
                return Ok(TrainingRun {
                    state: TrainingState::Stopped(reason),
                    skipped: false,
                    performance,
                    epochs_completed,
                    learning_rate,
                    output_dir: out_dir,
                    diagnostics: Some(diagnostics),
                });
            }
        };

        for metric in Metric::ALL {
            let average = cache.average(metric, Split::Training).unwrap_or_else(|| {
                warn!(epoch, metric = %metric, "Model reported no training values");
                f64::NAN
            });
            performance.append(metric, Split::Training, average);
        }
        epochs_completed += 1;

        let scaling = if dcn.scale_latent() {
            dcn.latent_scaling()
        } else {
            None
        };
        let mut display_batch = last_batch;

        if is_validation_epoch(epoch, config.validation_schedule) {
            let round =
                evaluator.evaluate(&mut *dcn, &mut *data, metrics, &mut cache, &mut performance)?;
            reporter.report(epoch, &mut *dcn, &*data, config, &performance, &round)?;

            let ssim = performance.series(Metric::Ssim, Split::Validation);
            if let Some(reason) = assess_convergence(ssim, config.convergence_threshold) {
                log_stop(&reason);
                state = TrainingState::Stopped(reason);
                break;
            }
            display_batch = Some(round.batch);
        }

        let batchnorm = match (&display_batch, dcn.use_batchnorm()) {
            (Some(batch), true) => dcn.batchnorm_stats(batch)?,
            _ => None,
        };
        progress.update(&ProgressFields::collect(
            &performance,
            learning_rate,
            scaling,
            batchnorm,
        ));
    }
    progress.finish();

    if state == TrainingState::Running {
        state = TrainingState::Completed;
        info!(epochs = epochs_completed, "Training completed");
    }

    Ok(TrainingRun {
        state,
        skipped: false,
        performance,
        epochs_completed,
        learning_rate,
        output_dir: out_dir,
        diagnostics: None,
    })
}
