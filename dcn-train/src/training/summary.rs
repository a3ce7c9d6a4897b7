//! Summary records and the sinks that persist them.

use crate::error::DcnError;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Number of buckets used by [`Histogram::from_values`].
pub const HISTOGRAM_BUCKETS: usize = 30;

/// Equal-width histogram of a sample of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
    pub buckets: Vec<u64>,
}

impl Histogram {
    /// Build a histogram of the finite values in `values`.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                count: 0,
                buckets: vec![0; HISTOGRAM_BUCKETS],
            };
        }

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let width = (max - min) / HISTOGRAM_BUCKETS as f64;

        let mut buckets = vec![0u64; HISTOGRAM_BUCKETS];
        for v in &values {
            let idx = if width > 0.0 {
                (((v - min) / width) as usize).min(HISTOGRAM_BUCKETS - 1)
            } else {
                0
            };
            buckets[idx] += 1;
        }

        Self {
            min,
            max,
            mean,
            count: values.len(),
            buckets,
        }
    }
}

/// Everything logged for one validation round.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub scalars: Vec<(String, f64)>,
    pub histograms: Vec<(String, Histogram)>,
    pub images: Vec<(String, RgbImage)>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scalar(&mut self, tag: impl Into<String>, value: f64) {
        self.scalars.push((tag.into(), value));
    }

    pub fn add_histogram(&mut self, tag: impl Into<String>, histogram: Histogram) {
        self.histograms.push((tag.into(), histogram));
    }

    pub fn add_image(&mut self, tag: impl Into<String>, image: RgbImage) {
        self.images.push((tag.into(), image));
    }

    pub fn scalar(&self, tag: &str) -> Option<f64> {
        self.scalars
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, v)| *v)
    }
}

/// Destination for per-validation summaries.
pub trait SummarySink {
    fn add_summary(&mut self, summary: &Summary, step: usize) -> Result<(), DcnError>;

    fn flush(&mut self) -> Result<(), DcnError>;
}

/// Discards every summary.
#[derive(Debug, Default)]
pub struct NullSink;

impl SummarySink for NullSink {
    fn add_summary(&mut self, _summary: &Summary, _step: usize) -> Result<(), DcnError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DcnError> {
        Ok(())
    }
}

/// One line of `summaries.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub step: usize,
    pub wall_time: DateTime<Utc>,
    pub scalars: Vec<(String, f64)>,
    pub histograms: Vec<(String, Histogram)>,
    /// Paths of the PNG files written for this step, relative to the sink directory.
    pub images: Vec<(String, PathBuf)>,
}

/// Appends one JSON record per summary to `summaries.jsonl`; images go to `summaries/`.
pub struct JsonLinesSink {
    dir: PathBuf,
    file: File,
}

impl JsonLinesSink {
    pub const FILE_NAME: &'static str = "summaries.jsonl";
    pub const IMAGE_DIR: &'static str = "summaries";

    pub fn create(dir: &Path) -> Result<Self, DcnError> {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(Self::FILE_NAME))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            file,
        })
    }

    /// Read back every record written so far.
    pub fn read_records(dir: &Path) -> Result<Vec<SummaryRecord>, DcnError> {
        let content = std::fs::read_to_string(dir.join(Self::FILE_NAME))?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(DcnError::from))
            .collect()
    }
}

impl SummarySink for JsonLinesSink {
    fn add_summary(&mut self, summary: &Summary, step: usize) -> Result<(), DcnError> {
        let mut images = Vec::with_capacity(summary.images.len());
        for (tag, image) in &summary.images {
            let name = format!("{}-{step:05}.png", tag.replace('/', "_"));
            let relative = Path::new(Self::IMAGE_DIR).join(name);
            let path = self.dir.join(&relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            image.save(&path)?;
            images.push((tag.clone(), relative));
        }

        let record = SummaryRecord {
            step,
            wall_time: Utc::now(),
            scalars: summary
                .scalars
                .iter()
                .filter(|(_, v)| v.is_finite())
                .cloned()
                .collect(),
            histograms: summary.histograms.clone(),
            images,
        };
        let line = serde_json::to_string(&record)?;
        writeln!(self.file, "{line}")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DcnError> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}
