//! Stochastic data augmentation for training batches.
//!
//! Every batch gets four independent draws: a patch size (possibly larger
//! than the base size, resized back down), a horizontal flip, a vertical
//! flip and a gamma correction. Resizing always happens before the
//! photometric and geometric transforms.

use crate::config::AugmentationProbs;
use crate::error::DcnError;
use crate::model::Batch;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{Array4, Axis, s};
use rand::Rng;

/// Gamma exponents are drawn log-uniformly from `[1/GAMMA_SPREAD, GAMMA_SPREAD]`.
pub const GAMMA_SPREAD: f64 = 1.5;

/// Lower bound of the sampled dropout keep probability.
pub const MIN_KEEP_PROB: f64 = 0.5;

/// The augmentation decisions for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AugmentationPlan {
    /// Patch size to request from the data provider.
    pub patch_size: usize,
    pub flip_h: bool,
    pub flip_v: bool,
    pub gamma: bool,
}

/// Draws and applies per-batch augmentation.
#[derive(Debug, Clone)]
pub struct AugmentationSampler {
    probs: AugmentationProbs,
    patch_size: usize,
}

impl AugmentationSampler {
    pub fn new(probs: AugmentationProbs, patch_size: usize) -> Self {
        Self { probs, patch_size }
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Base size with probability `1 - resize`, otherwise uniform in `[P+1, 2P-1]`.
    pub fn sample_patch_size<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let p = self.patch_size;
        let enlarge = rng.gen_bool(self.probs.resize);
        // For P < 2 there is no integer strictly between P and 2P.
        if enlarge && p >= 2 {
            rng.gen_range(p + 1..2 * p)
        } else {
            p
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> AugmentationPlan {
        AugmentationPlan {
            patch_size: self.sample_patch_size(rng),
            flip_h: rng.gen_bool(self.probs.flip_h),
            flip_v: rng.gen_bool(self.probs.flip_v),
            gamma: rng.gen_bool(self.probs.gamma),
        }
    }

    /// Apply a plan to a fetched batch.
    ///
    /// Batches whose spatial size differs from the base patch size are
    /// resized to `P × P` first.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        plan: &AugmentationPlan,
        batch: Batch,
        rng: &mut R,
    ) -> Result<Batch, DcnError> {
        let (_, height, width, _) = batch.dim();
        let mut batch = if height != self.patch_size || width != self.patch_size {
            resize_batch(&batch, self.patch_size)?
        } else {
            batch
        };

        if plan.flip_h {
            batch.invert_axis(Axis(2));
        }
        if plan.flip_v {
            batch.invert_axis(Axis(1));
        }
        if plan.gamma {
            batch_gamma(&mut batch, rng);
        }
        Ok(batch)
    }
}

/// Resize every image of a batch to `size × size` with an anti-aliasing filter.
pub fn resize_batch(batch: &Batch, size: usize) -> Result<Batch, DcnError> {
    let (n, height, width, channels) = batch.dim();
    if height == 0 || width == 0 || size == 0 {
        return Err(DcnError::shape(format!(
            "cannot resize {height}x{width} images to {size}x{size}"
        )));
    }

    let mut out = Array4::<f32>::zeros((n, size, size, channels));
    for i in 0..n {
        for c in 0..channels {
            let plane = batch.slice(s![i, .., .., c]);
            let img: ImageBuffer<Luma<f32>, Vec<f32>> =
                ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
                    Luma([plane[[y as usize, x as usize]]])
                });
            let resized = imageops::resize(&img, size as u32, size as u32, FilterType::Triangle);
            for (x, y, pixel) in resized.enumerate_pixels() {
                out[[i, y as usize, x as usize, c]] = pixel.0[0];
            }
        }
    }
    Ok(out)
}

/// Random per-image gamma correction, `v -> v^γ` with `γ = GAMMA_SPREAD^u`, `u ~ U(-1, 1)`.
pub fn batch_gamma<R: Rng + ?Sized>(batch: &mut Batch, rng: &mut R) {
    for mut image in batch.outer_iter_mut() {
        let gamma = GAMMA_SPREAD.powf(rng.gen_range(-1.0..1.0)) as f32;
        image.mapv_inplace(|v| v.clamp(0.0, 1.0).powf(gamma));
    }
}

/// Dropout keep probability for one step: 1.0, or uniform in `[0.5, 1.0)` when sampling.
pub fn sample_keep_prob<R: Rng + ?Sized>(sample_dropout: bool, rng: &mut R) -> f64 {
    if sample_dropout {
        rng.gen_range(MIN_KEEP_PROB..1.0)
    } else {
        1.0
    }
}
