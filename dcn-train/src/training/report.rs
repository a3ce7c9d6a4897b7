//! Progress reporting and checkpointing at validation cadence.
//!
//! Each validation round writes a thumbnail grid, pushes a summary to the
//! sink, overwrites `progress.json` and asks the model to save itself. The
//! live progress line is updated once per epoch.

use super::evaluator::ValidationRound;
use super::metrics::{Metric, PerformanceLog, Split};
use super::summary::{Histogram, Summary, SummarySink};
use crate::config::TrainingConfig;
use crate::data::DataProvider;
use crate::error::DcnError;
use crate::model::{Batch, BatchNormStats, CompressionModel};
use crate::persistence;
use image::{Rgb, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Number of image pairs in the summary thumbnail grid.
pub const FEW_PAIRS: usize = 5;

/// Training epochs averaged for the `L` field of the progress line.
pub const LOSS_WINDOW: usize = 3;

pub fn thumbnail_file_name(epoch: usize) -> String {
    format!("thumbnails-{epoch:05}.png")
}

/// Variance of one `(height, width, channels)` image.
pub fn image_variance(image: ArrayView3<'_, f32>) -> f64 {
    let n = image.len();
    if n == 0 {
        return 0.0;
    }
    let mean = image.iter().map(|v| f64::from(*v)).sum::<f64>() / n as f64;
    image
        .iter()
        .map(|v| {
            let d = f64::from(*v) - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64
}

/// Image indices ordered by descending variance.
pub fn variance_order(batch: &Batch) -> Vec<usize> {
    let variances: Vec<f64> = batch.outer_iter().map(image_variance).collect();
    let mut order: Vec<usize> = (0..variances.len()).collect();
    order.sort_by(|&a, &b| variances[b].total_cmp(&variances[a]));
    order
}

fn to_u8(v: f32) -> u8 {
    (255.0 * v.clamp(0.0, 1.0)).round() as u8
}

/// Tile images row-major into an 8-bit RGB grid.
///
/// Single-channel images are rendered as grey; otherwise the first three
/// channels are used.
pub fn thumbnails(images: &[ArrayView3<'_, f32>], n_cols: usize) -> Result<RgbImage, DcnError> {
    let Some(first) = images.first() else {
        return Ok(RgbImage::new(0, 0));
    };
    let (height, width, channels) = first.dim();
    if channels != 1 && channels < 3 {
        return Err(DcnError::shape(format!(
            "cannot render {channels}-channel images as RGB"
        )));
    }
    if images.iter().any(|img| img.dim() != first.dim()) {
        return Err(DcnError::shape("thumbnail images differ in size"));
    }

    let n_cols = n_cols.max(1).min(images.len());
    let n_rows = images.len().div_ceil(n_cols);
    let mut grid = RgbImage::new((n_cols * width) as u32, (n_rows * height) as u32);

    for (k, img) in images.iter().enumerate() {
        let (row, col) = (k / n_cols, k % n_cols);
        for y in 0..height {
            for x in 0..width {
                let pixel = if channels == 1 {
                    let g = to_u8(img[[y, x, 0]]);
                    Rgb([g, g, g])
                } else {
                    Rgb([
                        to_u8(img[[y, x, 0]]),
                        to_u8(img[[y, x, 1]]),
                        to_u8(img[[y, x, 2]]),
                    ])
                };
                grid.put_pixel((col * width + x) as u32, (row * height + y) as u32, pixel);
            }
        }
    }
    Ok(grid)
}

/// Grid of the selected originals followed by their reconstructions.
pub fn pair_grid(
    originals: &Batch,
    reconstructions: &Batch,
    indices: &[usize],
    n_cols: usize,
) -> Result<RgbImage, DcnError> {
    let mut images = Vec::with_capacity(2 * indices.len());
    images.extend(indices.iter().map(|&i| originals.index_axis(Axis(0), i)));
    images.extend(
        indices
            .iter()
            .map(|&i| reconstructions.index_axis(Axis(0), i)),
    );
    thumbnails(&images, n_cols)
}

/// Model metadata stored in `progress.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub model: String,
    pub args: serde_json::Value,
    pub codebook: Vec<f64>,
}

/// Contents of `progress.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub training_spec: TrainingConfig,
    pub data: serde_json::Value,
    pub dcn: ModelSnapshot,
    pub performance: PerformanceLog,
}

impl ProgressSnapshot {
    pub const FILE_NAME: &'static str = "progress.json";

    pub fn capture<M, D>(
        model: &M,
        data: &D,
        config: &TrainingConfig,
        performance: &PerformanceLog,
    ) -> Self
    where
        M: CompressionModel + ?Sized,
        D: DataProvider + ?Sized,
    {
        Self {
            training_spec: config.clone(),
            data: data.summary(),
            dcn: ModelSnapshot {
                model: model.type_name().to_string(),
                args: model.parameters(),
                codebook: model.codebook(),
            },
            performance: performance.clone(),
        }
    }

    /// Overwrite `<dir>/progress.json`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, DcnError> {
        let path = dir.join(Self::FILE_NAME);
        persistence::atomic_write_json(&path, self)?;
        Ok(path)
    }

    pub fn load(dir: &Path) -> Result<Option<Self>, DcnError> {
        persistence::load_json(&dir.join(Self::FILE_NAME))
    }
}

/// Variance of consecutive codebook differences.
fn diff_variance(codebook: &[f64]) -> f64 {
    let diffs: Vec<f64> = codebook.windows(2).map(|w| w[1] - w[0]).collect();
    if diffs.is_empty() {
        return 0.0;
    }
    let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
    diffs.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / diffs.len() as f64
}

/// Assemble the summary record for one validation round.
pub fn build_summary<M: CompressionModel + ?Sized>(
    model: &M,
    performance: &PerformanceLog,
    thumbs_few: RgbImage,
    latent_values: impl IntoIterator<Item = f64>,
) -> Summary {
    let mut summary = Summary::new();
    let tags = [
        ("loss/validation", Metric::Loss, Split::Validation),
        ("loss/training", Metric::Loss, Split::Training),
        ("ssim/validation", Metric::Ssim, Split::Validation),
        ("ssim/training", Metric::Ssim, Split::Training),
        ("entropy/training", Metric::Entropy, Split::Training),
    ];
    for (tag, metric, split) in tags {
        if let Some(value) = performance.last(metric, split) {
            summary.add_scalar(tag, value);
        }
    }
    if let Some(scaling) = model.latent_scaling() {
        summary.add_scalar("scaling", scaling);
    }
    summary.add_image("images/reconstructed", thumbs_few);
    summary.add_histogram("histograms/latent", Histogram::from_values(latent_values));

    if model.train_codebook() {
        let codebook = model.codebook();
        if !codebook.is_empty() {
            let min = codebook.iter().copied().fold(f64::INFINITY, f64::min);
            let max = codebook.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = codebook.iter().sum::<f64>() / codebook.len() as f64;
            summary.add_scalar("codebook/min", min);
            summary.add_scalar("codebook/max", max);
            summary.add_scalar("codebook/mean", mean);
            summary.add_scalar("codebook/diff_variance", diff_variance(&codebook));
        }
    }
    summary
}

/// Writes thumbnails, summaries, `progress.json` and model checkpoints.
pub struct ProgressReporter {
    out_dir: PathBuf,
    batch_size: usize,
    sink: Box<dyn SummarySink>,
}

impl ProgressReporter {
    pub fn new(out_dir: PathBuf, batch_size: usize, sink: Box<dyn SummarySink>) -> Self {
        Self {
            out_dir,
            batch_size,
            sink,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Persist everything for the validation round that just finished.
    pub fn report<M, D>(
        &mut self,
        epoch: usize,
        model: &mut M,
        data: &D,
        config: &TrainingConfig,
        performance: &PerformanceLog,
        round: &ValidationRound,
    ) -> Result<(), DcnError>
    where
        M: CompressionModel + ?Sized,
        D: DataProvider + ?Sized,
    {
        let order = variance_order(&round.batch);
        let all: Vec<usize> = order.iter().step_by(2).copied().collect();
        let few: Vec<usize> = order.iter().take(FEW_PAIRS).copied().collect();

        let thumbs = pair_grid(
            &round.batch,
            &round.reconstruction,
            &all,
            (self.batch_size / 2).max(1),
        )?;
        let thumbs_few = pair_grid(&round.batch, &round.reconstruction, &few, FEW_PAIRS)?;
        let thumbs_path = self.out_dir.join(thumbnail_file_name(epoch));
        thumbs.save(&thumbs_path)?;

        let latent = model.compress(&round.batch, false)?;
        let summary = build_summary(
            &*model,
            performance,
            thumbs_few,
            latent.iter().map(|v| f64::from(*v)),
        );
        self.sink.add_summary(&summary, epoch)?;
        self.sink.flush()?;

        let snapshot = ProgressSnapshot::capture(&*model, data, config, performance);
        snapshot.save(&self.out_dir)?;

        model.save_model(&self.out_dir, epoch)?;
        debug!(epoch, path = %thumbs_path.display(), "Saved validation snapshot");
        Ok(())
    }
}

/// Values shown on the live progress line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressFields {
    pub loss: Option<f64>,
    pub val_loss: Option<f64>,
    pub learning_rate: f64,
    pub ssim: Option<f64>,
    pub entropy: Option<f64>,
    pub scaling: Option<f64>,
    pub batchnorm: Option<BatchNormStats>,
}

impl ProgressFields {
    pub fn collect(
        performance: &PerformanceLog,
        learning_rate: f64,
        scaling: Option<f64>,
        batchnorm: Option<BatchNormStats>,
    ) -> Self {
        Self {
            loss: performance.tail_mean(Metric::Loss, Split::Training, LOSS_WINDOW),
            val_loss: performance.last(Metric::Loss, Split::Validation),
            learning_rate,
            ssim: performance.last(Metric::Ssim, Split::Validation),
            entropy: performance.tail_mean(Metric::Entropy, Split::Training, 1),
            scaling,
            batchnorm,
        }
    }
}

/// Scientific notation with one decimal and a signed two-digit exponent (`1.0e-04`).
pub fn format_sci(value: f64) -> String {
    let formatted = format!("{value:.1e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exp) => {
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{mantissa}e{sign}{:02}", exp.abs())
            }
            Err(_) => formatted,
        },
        None => formatted,
    }
}

fn write_opt(f: &mut fmt::Formatter<'_>, value: Option<f64>, precision: usize) -> fmt::Result {
    match value {
        Some(v) => write!(f, "{v:.precision$}"),
        None => f.write_str("-"),
    }
}

impl fmt::Display for ProgressFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("L=")?;
        write_opt(f, self.loss, 3)?;
        f.write_str(", Lv=")?;
        write_opt(f, self.val_loss, 3)?;
        write!(f, ", lr={}, ssim=", format_sci(self.learning_rate))?;
        write_opt(f, self.ssim, 2)?;
        f.write_str(", H=")?;
        write_opt(f, self.entropy, 1)?;
        if let Some(s) = self.scaling {
            write!(f, ", S={s:.1}")?;
        }
        if let Some(bn) = &self.batchnorm {
            write!(
                f,
                ", MVp={:.2}/{:.2}, MVb={:.2}/{:.2}",
                bn.population_mean, bn.population_var, bn.batch_mean, bn.batch_var
            )?;
        }
        Ok(())
    }
}

/// Single-line epoch progress display.
pub struct ProgressLine {
    bar: ProgressBar,
}

impl ProgressLine {
    pub fn new(n_epochs: usize, label: &str, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(n_epochs as u64)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{elapsed_precise}<{eta}] {bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_prefix(label.to_string());
        Self { bar }
    }

    pub fn update(&self, fields: &ProgressFields) {
        self.bar.set_message(fields.to_string());
        self.bar.inc(1);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        self.bar.abandon();
    }
}
