//! Bounded per-batch metric buffers.

use super::metrics::{Metric, Split};
use std::collections::{BTreeMap, VecDeque};

/// Ring buffers of raw per-batch scalars, one per metric and split.
///
/// Each split's capacity is its batch count per epoch, so a full epoch
/// overwrites everything the previous epoch recorded.
#[derive(Debug, Clone)]
pub struct MetricCache {
    training_capacity: usize,
    validation_capacity: usize,
    buffers: BTreeMap<(Metric, Split), VecDeque<f64>>,
}

impl MetricCache {
    pub fn new(training_batches: usize, validation_batches: usize) -> Self {
        let mut buffers = BTreeMap::new();
        for metric in Metric::ALL {
            buffers.insert(
                (metric, Split::Training),
                VecDeque::with_capacity(training_batches),
            );
            buffers.insert(
                (metric, Split::Validation),
                VecDeque::with_capacity(validation_batches),
            );
        }
        Self {
            training_capacity: training_batches,
            validation_capacity: validation_batches,
            buffers,
        }
    }

    pub fn capacity(&self, split: Split) -> usize {
        match split {
            Split::Training => self.training_capacity,
            Split::Validation => self.validation_capacity,
        }
    }

    /// Push a value, evicting the oldest one when the buffer is full.
    pub fn record(&mut self, metric: Metric, split: Split, value: f64) {
        let capacity = self.capacity(split);
        if capacity == 0 {
            return;
        }
        let buffer = self.buffer_mut(metric, split);
        if buffer.len() == capacity {
            buffer.pop_front();
        }
        buffer.push_back(value);
    }

    /// Arithmetic mean of the held values, `None` when nothing is held.
    pub fn average(&self, metric: Metric, split: Split) -> Option<f64> {
        let buffer = self.buffers.get(&(metric, split))?;
        if buffer.is_empty() {
            return None;
        }
        Some(buffer.iter().sum::<f64>() / buffer.len() as f64)
    }

    pub fn len(&self, metric: Metric, split: Split) -> usize {
        self.buffers.get(&(metric, split)).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, metric: Metric, split: Split) -> bool {
        self.len(metric, split) == 0
    }

    pub fn clear(&mut self, split: Split) {
        for ((_, s), buffer) in self.buffers.iter_mut() {
            if *s == split {
                buffer.clear();
            }
        }
    }

    fn buffer_mut(&mut self, metric: Metric, split: Split) -> &mut VecDeque<f64> {
        self.buffers.entry((metric, split)).or_default()
    }
}
