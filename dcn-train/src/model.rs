//! Contracts for the compression model and its quality helpers.
//!
//! The trainer never looks inside a model. Each architecture implements
//! [`CompressionModel`] and the loop drives it only through these methods.

use crate::error::DcnError;
use crate::training::summary::{JsonLinesSink, SummarySink};
use ndarray::{Array4, ArrayD, ArrayView3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// A batch of images, `(batch, height, width, channels)`, values in `[0, 1]`.
pub type Batch = Array4<f32>;

/// Quantized latent representation of a batch.
pub type LatentCode = ArrayD<f32>;

/// Named scalars returned by one optimization step (`loss`, `ssim`, `entropy`, ...).
pub type StepMetrics = BTreeMap<String, f64>;

/// Mean and variance of the first batch-norm layer, for the progress line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchNormStats {
    pub population_mean: f64,
    pub population_var: f64,
    pub batch_mean: f64,
    pub batch_var: f64,
}

/// State dumped by a model when its loss turns NaN.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub codebook: Vec<f64>,
    pub latent_scaling: Option<f64>,
    /// `(parameter name, fraction of NaN entries)` for every parameter holding NaNs.
    pub nan_parameters: Vec<(String, f64)>,
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.latent_scaling {
            Some(s) => writeln!(f, "Scaling: {s}")?,
            None => writeln!(f, "Scaling: n/a")?,
        }
        write!(f, "Codebook: {:?}", self.codebook)?;
        for (name, fraction) in &self.nan_parameters {
            write!(f, "\n!! NaNs found in {name} --> {fraction}")?;
        }
        Ok(())
    }
}

/// A deep compression network: encoder, quantizer and decoder.
pub trait CompressionModel {
    /// Initialize the model's parameters before the first step.
    fn init(&mut self) -> Result<(), DcnError>;

    /// Run one optimization step and return the metrics it produced.
    ///
    /// The result must contain a `loss` entry.
    fn training_step(
        &mut self,
        batch: &Batch,
        learning_rate: f64,
        dropout_keep_prob: f64,
    ) -> Result<StepMetrics, DcnError>;

    /// Encode a batch into its quantized latent code.
    fn compress(&mut self, batch: &Batch, is_training: bool) -> Result<LatentCode, DcnError>;

    /// Decode a latent code back to images.
    fn decompress(&mut self, latent: &LatentCode) -> Result<Batch, DcnError>;

    /// Current quantization centroids, ascending.
    fn codebook(&self) -> Vec<f64>;

    /// Constructor parameters, written to `progress.json` as `dcn.args`.
    fn parameters(&self) -> serde_json::Value;

    fn save_model(&mut self, dir: &Path, epoch: usize) -> Result<(), DcnError>;

    /// Path-safe identifier of the architecture family.
    fn model_code(&self) -> &str;

    /// Path-safe identifier of this instance.
    fn scoped_name(&self) -> &str;

    /// Architecture name, written to `progress.json` as `dcn.model`.
    fn type_name(&self) -> &str;

    fn scale_latent(&self) -> bool {
        false
    }

    fn use_batchnorm(&self) -> bool {
        false
    }

    fn train_codebook(&self) -> bool {
        false
    }

    /// The learned latent scaling factor, if the model scales its latent.
    fn latent_scaling(&self) -> Option<f64> {
        None
    }

    /// Population and batch statistics of the first batch-norm layer.
    fn batchnorm_stats(&mut self, _batch: &Batch) -> Result<Option<BatchNormStats>, DcnError> {
        Ok(None)
    }

    /// Inspect parameters after a NaN loss.
    fn dump_diagnostics(&mut self) -> DiagnosticReport {
        DiagnosticReport {
            codebook: self.codebook(),
            latent_scaling: self.latent_scaling(),
            nan_parameters: Vec::new(),
        }
    }

    /// Sink for per-validation summaries. Creates whatever it needs under `dir`.
    fn summary_sink(&mut self, dir: &Path) -> Result<Box<dyn SummarySink>, DcnError> {
        Ok(Box::new(JsonLinesSink::create(dir)?))
    }
}

/// Image quality and rate helpers used by validation.
pub trait QualityMetrics {
    /// Structural similarity of one `(height, width, channels)` image pair,
    /// multichannel, data range 1.0.
    fn ssim(&self, original: ArrayView3<'_, f32>, reconstruction: ArrayView3<'_, f32>) -> f64;

    /// Empirical entropy of a latent code given the codebook.
    fn entropy(&self, latent: &LatentCode, codebook: &[f64]) -> f64;
}
