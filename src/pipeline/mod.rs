//! Batch orchestration for per-file georeferencing.

mod metrics;
mod processor;
mod scheduler;

pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use processor::{FileProcessor, ProcessedFile};
pub use scheduler::{
    BatchReport, CancellationFlag, FileReport, ItemOutcome, Scheduler, SchedulerConfig,
};
