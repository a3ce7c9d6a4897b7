//! Performance log: epoch-level averages per metric and split.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Scalar metrics tracked by the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Loss,
    Ssim,
    Entropy,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Loss, Metric::Ssim, Metric::Entropy];

    /// Key used by models in their step metrics and in `progress.json`.
    pub fn key(self) -> &'static str {
        match self {
            Metric::Loss => "loss",
            Metric::Ssim => "ssim",
            Metric::Entropy => "entropy",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "loss" => Some(Metric::Loss),
            "ssim" => Some(Metric::Ssim),
            "entropy" => Some(Metric::Entropy),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Split {
    Training,
    Validation,
}

impl Split {
    pub fn key(self) -> &'static str {
        match self {
            Split::Training => "training",
            Split::Validation => "validation",
        }
    }
}

/// Epoch averages of one metric on both splits.
///
/// A metric the model never reported averages to NaN, which JSON stores as
/// `null`; reading it back restores the NaN.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitSeries {
    #[serde(deserialize_with = "nullable_series")]
    pub training: Vec<f64>,
    #[serde(deserialize_with = "nullable_series")]
    pub validation: Vec<f64>,
}

fn nullable_series<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
    let values: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

impl SplitSeries {
    pub fn get(&self, split: Split) -> &[f64] {
        match split {
            Split::Training => &self.training,
            Split::Validation => &self.validation,
        }
    }

    fn get_mut(&mut self, split: Split) -> &mut Vec<f64> {
        match split {
            Split::Training => &mut self.training,
            Split::Validation => &mut self.validation,
        }
    }
}

/// Append-only history of epoch-level averages.
///
/// The training series grows by one entry per completed epoch, the
/// validation series by one entry per validation round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceLog {
    pub loss: SplitSeries,
    pub ssim: SplitSeries,
    pub entropy: SplitSeries,
}

impl PerformanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series(&self, metric: Metric, split: Split) -> &[f64] {
        self.metric(metric).get(split)
    }

    pub fn append(&mut self, metric: Metric, split: Split, value: f64) {
        let series = match metric {
            Metric::Loss => &mut self.loss,
            Metric::Ssim => &mut self.ssim,
            Metric::Entropy => &mut self.entropy,
        };
        series.get_mut(split).push(value);
    }

    pub fn last(&self, metric: Metric, split: Split) -> Option<f64> {
        self.series(metric, split).last().copied()
    }

    /// Mean of the last `n` entries (fewer if the series is shorter).
    pub fn tail_mean(&self, metric: Metric, split: Split, n: usize) -> Option<f64> {
        let series = self.series(metric, split);
        let tail = &series[series.len().saturating_sub(n)..];
        if tail.is_empty() {
            return None;
        }
        Some(tail.iter().sum::<f64>() / tail.len() as f64)
    }

    fn metric(&self, metric: Metric) -> &SplitSeries {
        match metric {
            Metric::Loss => &self.loss,
            Metric::Ssim => &self.ssim,
            Metric::Entropy => &self.entropy,
        }
    }
}
