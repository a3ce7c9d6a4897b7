//! Error types for the dcn-train crate.

use thiserror::Error;

/// Top-level error type for training operations.
///
/// Early stops (convergence, deterioration, NaN divergence) are not errors;
/// they are reported through [`crate::training::TrainingRun`]. Only failures
/// of the collaborators or of the filesystem end up here.
#[derive(Debug, Error)]
pub enum DcnError {
    #[error("Data provider error: {0}")]
    Data(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration source error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl DcnError {
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
