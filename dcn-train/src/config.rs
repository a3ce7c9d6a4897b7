//! Training configuration.
//!
//! Uses `figment` for layered configuration: defaults -> TOML file ->
//! environment (`DCN_` prefix, `__` for nesting) -> explicit overrides.
//! The resolved [`TrainingConfig`] is written verbatim into every
//! `progress.json` snapshot as `training_spec`.

use crate::error::DcnError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-batch augmentation probabilities, each in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationProbs {
    /// Probability of fetching a larger patch and resizing it down.
    #[serde(default)]
    pub resize: f64,
    /// Probability of reversing the batch along the width axis.
    #[serde(default = "default_flip")]
    pub flip_h: f64,
    /// Probability of reversing the batch along the height axis.
    #[serde(default = "default_flip")]
    pub flip_v: f64,
    /// Probability of a random gamma correction.
    #[serde(default)]
    pub gamma: f64,
}

impl Default for AugmentationProbs {
    fn default() -> Self {
        Self {
            resize: 0.0,
            flip_h: default_flip(),
            flip_v: default_flip(),
            gamma: 0.0,
        }
    }
}

fn default_flip() -> f64 {
    0.5
}

/// Configuration of a single training run.
///
/// Immutable for the duration of a run except for `current_epoch`, which
/// the trainer updates at the start of every epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_n_epochs")]
    pub n_epochs: usize,
    /// Base patch size fed to the model.
    #[serde(default = "default_patch_size")]
    pub patch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_reduction_factor")]
    pub learning_rate_reduction_factor: f64,
    /// Epoch interval between learning rate reductions.
    #[serde(default = "default_reduction_schedule")]
    pub learning_rate_reduction_schedule: usize,
    #[serde(default)]
    pub augmentation_probs: AugmentationProbs,
    /// Sample the dropout keep probability from `[0.5, 1.0)` per batch.
    #[serde(default)]
    pub sample_dropout: bool,
    /// Epoch interval between validation rounds.
    #[serde(default = "default_validation_schedule")]
    pub validation_schedule: usize,
    /// Run the encoder in training mode during validation.
    #[serde(default)]
    pub validation_is_training: bool,
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,
    #[serde(default)]
    pub current_epoch: usize,
    /// Seed for the augmentation and dropout draws. Entropy-seeded if unset.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Draw the live progress line on stderr.
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            n_epochs: default_n_epochs(),
            patch_size: default_patch_size(),
            learning_rate: default_learning_rate(),
            learning_rate_reduction_factor: default_reduction_factor(),
            learning_rate_reduction_schedule: default_reduction_schedule(),
            augmentation_probs: AugmentationProbs::default(),
            sample_dropout: false,
            validation_schedule: default_validation_schedule(),
            validation_is_training: false,
            convergence_threshold: default_convergence_threshold(),
            current_epoch: 0,
            seed: None,
            show_progress: true,
        }
    }
}

fn default_batch_size() -> usize {
    20
}

fn default_n_epochs() -> usize {
    1000
}

fn default_patch_size() -> usize {
    128
}

fn default_learning_rate() -> f64 {
    1e-4
}

fn default_reduction_factor() -> f64 {
    0.5
}

fn default_reduction_schedule() -> usize {
    100
}

fn default_validation_schedule() -> usize {
    100
}

fn default_convergence_threshold() -> f64 {
    0.01
}

fn default_true() -> bool {
    true
}

impl TrainingConfig {
    /// Check the invariants the training loop relies on.
    pub fn validate(&self) -> Result<(), DcnError> {
        if self.batch_size == 0 {
            return Err(DcnError::config("batch_size must be positive"));
        }
        if self.patch_size == 0 {
            return Err(DcnError::config("patch_size must be positive"));
        }
        if self.learning_rate_reduction_schedule == 0 {
            return Err(DcnError::config(
                "learning_rate_reduction_schedule must be positive",
            ));
        }
        if self.validation_schedule == 0 {
            return Err(DcnError::config("validation_schedule must be positive"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(DcnError::config(format!(
                "learning_rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        let factor = self.learning_rate_reduction_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(DcnError::config(format!(
                "learning_rate_reduction_factor must be in (0, 1], got {factor}"
            )));
        }
        if self.convergence_threshold.is_nan() || self.convergence_threshold < 0.0 {
            return Err(DcnError::config(format!(
                "convergence_threshold must be non-negative, got {}",
                self.convergence_threshold
            )));
        }

        let probs = &self.augmentation_probs;
        for (name, p) in [
            ("resize", probs.resize),
            ("flip_h", probs.flip_h),
            ("flip_v", probs.flip_v),
            ("gamma", probs.gamma),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(DcnError::config(format!(
                    "augmentation probability '{name}' must be in [0, 1], got {p}"
                )));
            }
        }
        Ok(())
    }
}

/// Partial augmentation settings; unset fields keep the lower layers' values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AugmentationOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flip_h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flip_v: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
}

impl AugmentationOverrides {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Highest-priority layer of [`load_config`].
///
/// Only the fields that are set are merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_epochs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate_reduction_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate_reduction_schedule: Option<usize>,
    #[serde(default, skip_serializing_if = "AugmentationOverrides::is_empty")]
    pub augmentation_probs: AugmentationOverrides,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_dropout: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_schedule: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_is_training: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergence_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_epoch: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_progress: Option<bool>,
}

/// Load a training configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. The fields set in `overrides`
/// 2. Environment variables (`DCN_BATCH_SIZE`, `DCN_AUGMENTATION_PROBS__FLIP_H`, ...)
/// 3. The TOML file at `path`, if given and present
/// 4. Built-in defaults
pub fn load_config(
    path: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<TrainingConfig, DcnError> {
    let mut figment = Figment::from(Serialized::defaults(TrainingConfig::default()));

    if let Some(path) = path
        && path.exists()
    {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("DCN_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: TrainingConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
