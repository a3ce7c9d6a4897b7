//! Data provider contract.

use crate::error::DcnError;
use crate::model::Batch;

/// Source of training and validation batches.
pub trait DataProvider {
    /// Number of training images.
    fn training_count(&self) -> usize;

    /// Number of validation images.
    fn validation_count(&self) -> usize;

    /// Fetch training batch `batch_id` with patches of `patch_size × patch_size`.
    fn next_training_batch(
        &mut self,
        batch_id: usize,
        batch_size: usize,
        patch_size: usize,
    ) -> Result<Batch, DcnError>;

    /// Fetch a fixed, non-augmented validation batch.
    fn next_validation_batch(&mut self, batch_id: usize, batch_size: usize)
    -> Result<Batch, DcnError>;

    /// Description of the data source, written to `progress.json` as `data`.
    fn summary(&self) -> serde_json::Value;
}

/// Number of full batches available; the trailing remainder is dropped.
pub fn batch_count(samples: usize, batch_size: usize) -> usize {
    if batch_size == 0 { 0 } else { samples / batch_size }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_count_drops_remainder() {
        assert_eq!(batch_count(100, 20), 5);
        assert_eq!(batch_count(105, 20), 5);
        assert_eq!(batch_count(19, 20), 0);
        assert_eq!(batch_count(10, 0), 0);
    }
}
