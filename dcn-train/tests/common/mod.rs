//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use dcn_train::model::{BatchNormStats, DiagnosticReport};
use dcn_train::{
    Batch, CompressionModel, DataProvider, DcnError, LatentCode, QualityMetrics, StepMetrics,
    TrainingConfig,
};
use ndarray::{Array4, ArrayView3, Ix4};
use std::cell::Cell;
use std::collections::VecDeque;
use std::path::Path;

/// A model whose step losses follow a script and whose decoder is the identity.
pub struct FakeModel {
    pub losses: VecDeque<f64>,
    pub report_quality: bool,
    pub report_loss: bool,
    pub scale_latent: bool,
    pub use_batchnorm: bool,
    pub train_codebook: bool,
    pub break_decoder: bool,
    pub init_calls: usize,
    /// `(learning_rate, dropout_keep_prob)` of every step.
    pub steps: Vec<(f64, f64)>,
    pub step_shapes: Vec<(usize, usize, usize, usize)>,
    pub saved_epochs: Vec<usize>,
}

impl FakeModel {
    pub fn new() -> Self {
        Self {
            losses: VecDeque::new(),
            report_quality: true,
            report_loss: true,
            scale_latent: false,
            use_batchnorm: false,
            train_codebook: false,
            break_decoder: false,
            init_calls: 0,
            steps: Vec::new(),
            step_shapes: Vec::new(),
            saved_epochs: Vec::new(),
        }
    }

    pub fn with_losses(losses: &[f64]) -> Self {
        Self {
            losses: losses.iter().copied().collect(),
            ..Self::new()
        }
    }
}

impl CompressionModel for FakeModel {
    fn init(&mut self) -> Result<(), DcnError> {
        self.init_calls += 1;
        Ok(())
    }

    fn training_step(
        &mut self,
        batch: &Batch,
        learning_rate: f64,
        dropout_keep_prob: f64,
    ) -> Result<StepMetrics, DcnError> {
        self.steps.push((learning_rate, dropout_keep_prob));
        self.step_shapes.push(batch.dim());

        let mut values = StepMetrics::new();
        let loss = self.losses.pop_front().unwrap_or(1.0);
        if self.report_loss {
            values.insert("loss".into(), loss);
        }
        if self.report_quality {
            values.insert("ssim".into(), 0.5);
            values.insert("entropy".into(), 2.0);
        }
        values.insert("rate".into(), 0.25);
        Ok(values)
    }

    fn compress(&mut self, batch: &Batch, _is_training: bool) -> Result<LatentCode, DcnError> {
        Ok(batch.clone().into_dyn())
    }

    fn decompress(&mut self, latent: &LatentCode) -> Result<Batch, DcnError> {
        let batch = latent
            .clone()
            .into_dimensionality::<Ix4>()
            .map_err(|e| DcnError::shape(e.to_string()))?;
        if self.break_decoder {
            let (n, h, w, c) = batch.dim();
            return Ok(Array4::zeros((n, h + 1, w, c)));
        }
        Ok(batch)
    }

    fn codebook(&self) -> Vec<f64> {
        vec![-2.0, -1.0, 0.0, 1.0, 2.0]
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"n_features": 8, "latent_bpf": 3})
    }

    fn save_model(&mut self, dir: &Path, epoch: usize) -> Result<(), DcnError> {
        std::fs::write(dir.join(format!("checkpoint-{epoch:05}.bin")), b"weights")?;
        self.saved_epochs.push(epoch);
        Ok(())
    }

    fn model_code(&self) -> &str {
        "dcn/fake"
    }

    fn scoped_name(&self) -> &str {
        "fake-8"
    }

    fn type_name(&self) -> &str {
        "FakeDcn"
    }

    fn scale_latent(&self) -> bool {
        self.scale_latent
    }

    fn use_batchnorm(&self) -> bool {
        self.use_batchnorm
    }

    fn train_codebook(&self) -> bool {
        self.train_codebook
    }

    fn latent_scaling(&self) -> Option<f64> {
        self.scale_latent.then_some(1.5)
    }

    fn batchnorm_stats(&mut self, _batch: &Batch) -> Result<Option<BatchNormStats>, DcnError> {
        Ok(self.use_batchnorm.then_some(BatchNormStats {
            population_mean: 0.0,
            population_var: 1.0,
            batch_mean: 0.1,
            batch_var: 0.9,
        }))
    }

    fn dump_diagnostics(&mut self) -> DiagnosticReport {
        DiagnosticReport {
            codebook: self.codebook(),
            latent_scaling: self.latent_scaling(),
            nan_parameters: vec![("encoder/conv_0/kernel".into(), 0.5)],
        }
    }
}

/// Synthetic images; training batches come at whatever patch size is asked for.
pub struct FakeData {
    pub training: usize,
    pub validation: usize,
    pub validation_patch: usize,
    pub requested_patches: Vec<usize>,
}

impl FakeData {
    pub fn new(training: usize, validation: usize) -> Self {
        Self {
            training,
            validation,
            validation_patch: 4,
            requested_patches: Vec::new(),
        }
    }
}

impl DataProvider for FakeData {
    fn training_count(&self) -> usize {
        self.training
    }

    fn validation_count(&self) -> usize {
        self.validation
    }

    fn next_training_batch(
        &mut self,
        batch_id: usize,
        batch_size: usize,
        patch_size: usize,
    ) -> Result<Batch, DcnError> {
        self.requested_patches.push(patch_size);
        Ok(Array4::from_shape_fn(
            (batch_size, patch_size, patch_size, 3),
            |(i, y, x, c)| ((batch_id * 7 + i * 3 + y + 2 * x + c) % 10) as f32 / 10.0,
        ))
    }

    fn next_validation_batch(
        &mut self,
        _batch_id: usize,
        batch_size: usize,
    ) -> Result<Batch, DcnError> {
        let p = self.validation_patch;
        Ok(Array4::from_shape_fn((batch_size, p, p, 3), |(i, y, x, c)| {
            let spread = 0.5 * (i + 1) as f32 / (batch_size + 1) as f32;
            if (x + y + c) % 2 == 0 {
                0.5 + spread
            } else {
                0.5 - spread
            }
        }))
    }

    fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "training": self.training,
            "validation": self.validation,
            "source": "synthetic",
        })
    }
}

/// Reports a scripted SSIM per validation round and a constant entropy.
pub struct ScriptedQuality {
    rounds: Vec<f64>,
    calls_per_round: usize,
    calls: Cell<usize>,
}

impl ScriptedQuality {
    pub fn constant(ssim: f64) -> Self {
        Self::new(vec![ssim], usize::MAX)
    }

    /// `calls_per_round` is the number of images validated per round.
    pub fn new(rounds: Vec<f64>, calls_per_round: usize) -> Self {
        Self {
            rounds,
            calls_per_round,
            calls: Cell::new(0),
        }
    }
}

impl QualityMetrics for ScriptedQuality {
    fn ssim(&self, _original: ArrayView3<'_, f32>, _reconstruction: ArrayView3<'_, f32>) -> f64 {
        let call = self.calls.get();
        self.calls.set(call + 1);
        let round = call / self.calls_per_round;
        self.rounds
            .get(round)
            .or(self.rounds.last())
            .copied()
            .unwrap_or(1.0)
    }

    fn entropy(&self, _latent: &LatentCode, _codebook: &[f64]) -> f64 {
        2.5
    }
}

/// A small, deterministic configuration with the progress line hidden.
pub fn quiet_config(n_epochs: usize) -> TrainingConfig {
    TrainingConfig {
        batch_size: 4,
        n_epochs,
        patch_size: 4,
        learning_rate: 1e-3,
        validation_schedule: 1,
        seed: Some(42),
        show_progress: false,
        ..TrainingConfig::default()
    }
}
