//! # dcn-train: training loop for deep compression networks
//!
//! Drives a learned image codec (encoder, quantizer, decoder) through
//! epochs of augmented training batches, validates it on a fixed split,
//! tracks loss / SSIM / latent entropy, checkpoints at validation cadence
//! and stops early on convergence, deterioration or a NaN loss.
//!
//! The model, the data source, the quality metrics and the summary sink are
//! collaborators behind the traits in [`model`], [`data`] and
//! [`training::summary`].

pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod persistence;
pub mod training;

// Re-exports
pub use config::{AugmentationProbs, ConfigOverrides, TrainingConfig, load_config};
pub use data::DataProvider;
pub use error::DcnError;
pub use model::{Batch, CompressionModel, LatentCode, QualityMetrics, StepMetrics};
pub use training::{PerformanceLog, StopReason, TrainingOps, TrainingRun, TrainingState, train};
