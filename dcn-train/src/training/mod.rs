//! Training loop: metric cache, augmentation, step driver, validation, reporting, orchestration.

pub mod augment;
pub mod cache;
pub mod driver;
pub mod evaluator;
pub mod metrics;
pub mod report;
pub mod summary;
pub mod trainer;

pub use augment::{AugmentationPlan, AugmentationSampler};
pub use cache::MetricCache;
pub use driver::{EpochOutcome, TrainingStepDriver};
pub use evaluator::{ValidationEvaluator, ValidationRound, assess_convergence};
pub use metrics::{Metric, PerformanceLog, Split};
pub use report::{ProgressReporter, ProgressSnapshot};
pub use summary::{JsonLinesSink, NullSink, Summary, SummarySink};
pub use trainer::{StopReason, TrainingOps, TrainingRun, TrainingState, train};
