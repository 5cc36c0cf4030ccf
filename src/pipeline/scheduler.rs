//! Work distribution for batch georeferencing.
//!
//! The scheduler runs one blocking task per input file with bounded
//! concurrency and turns every outcome into a [`FileReport`]. A failing file
//! never aborts the batch.

use crate::config::ProcessingConfig;
use crate::error::ErrorKind;
use crate::pipeline::{FileProcessor, Metrics, MetricsReporter};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of files processed concurrently
    pub concurrency: usize,

    /// Enable progress reporting
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    pub metrics_output_path: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            enable_metrics: true,
            metrics_interval_secs: 10,
            metrics_output_path: None,
        }
    }
}

/// Shared flag that stops dispatch of new files once set.
///
/// Files already running finish normally; files not yet started are reported
/// as [`ItemOutcome::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome for a single input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Succeeded {
        output: PathBuf,
        width: usize,
        height: usize,
        bands: usize,
        bytes_written: u64,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
    Cancelled,
}

/// Record of one input's processing.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    /// Position of the input in the batch
    pub index: usize,
    pub input: PathBuf,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
    pub duration_ms: u64,
}

impl FileReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Failed { .. })
    }
}

/// Ordered per-input results of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub items: Vec<FileReport>,
}

impl BatchReport {
    /// Build a report from item records, ordering them by input position.
    pub fn new(mut items: Vec<FileReport>) -> Self {
        items.sort_by_key(|item| item.index);
        let succeeded = items.iter().filter(|i| i.is_success()).count();
        let failed = items.iter().filter(|i| i.is_failure()).count();
        Self {
            total: items.len(),
            succeeded,
            failed,
            cancelled: items.len() - succeeded - failed,
            items,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.items.iter().filter(|i| i.is_failure())
    }

    /// Save the report to a JSON file.
    pub fn save_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Report saved to {}", path.display());
        Ok(())
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Succeeded: {}, Failed: {}, Cancelled: {}, Total: {}",
            self.succeeded, self.failed, self.cancelled, self.total
        )
    }
}

/// Scheduler for distributing files across blocking tasks.
pub struct Scheduler {
    /// File processor
    processor: Arc<FileProcessor>,

    /// Metrics
    metrics: Arc<Metrics>,

    /// Configuration
    config: SchedulerConfig,

    /// Stops dispatch when set
    cancel: CancellationFlag,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(
        processor: Arc<FileProcessor>,
        metrics: Arc<Metrics>,
        config: SchedulerConfig,
        cancel: CancellationFlag,
    ) -> Self {
        Self {
            processor,
            metrics,
            config,
            cancel,
        }
    }

    /// Process every input and return the ordered report.
    pub async fn run(&self, inputs: Vec<PathBuf>) -> BatchReport {
        let total_files = inputs.len();

        tracing::info!(
            "Scheduling {} files for processing ({} concurrent)",
            total_files,
            self.config.concurrency
        );

        // Start metrics reporter if enabled
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = if self.config.enable_metrics {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.metrics_interval_secs,
                total_files as u64,
            );
            Some(tokio::spawn(reporter.run(shutdown_rx)))
        } else {
            drop(shutdown_rx);
            None
        };

        // Later inputs mapping onto an output already claimed are not processed
        let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
        let work: Vec<(usize, PathBuf, Option<PathBuf>)> = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                let output = self.processor.output_path_for(&input);
                let claimed_by = match claimed.get(&output) {
                    Some(first) => Some(first.clone()),
                    None => {
                        claimed.insert(output, input.clone());
                        None
                    }
                };
                (index, input, claimed_by)
            })
            .collect();

        // The cancellation check runs when an item is pulled into the
        // in-flight buffer, i.e. at dispatch time
        let items: Vec<FileReport> = stream::iter(work)
            .map(|(index, input, claimed_by)| {
                let processor = self.processor.clone();
                let metrics = self.metrics.clone();
                let cancel = self.cancel.clone();
                async move {
                    match claimed_by {
                        Some(first) => duplicate_output(&processor, &metrics, index, input, &first),
                        None => process_item(processor, metrics, cancel, index, input).await,
                    }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        // Shutdown metrics reporter
        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }

        let report = BatchReport::new(items);

        if self.config.enable_metrics {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.metrics_interval_secs,
                total_files as u64,
            );
            reporter.print_summary();

            if let Some(ref path) = self.config.metrics_output_path {
                let snapshot = self.metrics.snapshot();
                if let Err(e) = snapshot.save_to_file(path) {
                    tracing::warn!("Failed to save metrics to {}: {}", path, e);
                }
            }
        }

        report
    }
}

fn duplicate_output(
    processor: &FileProcessor,
    metrics: &Metrics,
    index: usize,
    input: PathBuf,
    first: &std::path::Path,
) -> FileReport {
    let output = processor.output_path_for(&input);
    metrics.add_file_failed();
    tracing::error!(
        "{} skipped: {} is already written from {}",
        input.display(),
        output.display(),
        first.display()
    );
    FileReport {
        index,
        outcome: ItemOutcome::Failed {
            kind: ErrorKind::Write,
            message: format!(
                "output {} is already written from {}",
                output.display(),
                first.display()
            ),
        },
        input,
        duration_ms: 0,
    }
}

async fn process_item(
    processor: Arc<FileProcessor>,
    metrics: Arc<Metrics>,
    cancel: CancellationFlag,
    index: usize,
    input: PathBuf,
) -> FileReport {
    if cancel.is_cancelled() {
        metrics.add_file_cancelled();
        tracing::debug!("Skipping {} (cancelled)", input.display());
        return FileReport {
            index,
            input,
            outcome: ItemOutcome::Cancelled,
            duration_ms: 0,
        };
    }

    let start = Instant::now();
    let task_input = input.clone();
    let result = tokio::task::spawn_blocking(move || processor.process(&task_input)).await;

    let outcome = match result {
        Ok(Ok(file)) => {
            metrics.add_file_processed();
            tracing::info!("Georeferenced {} -> {}", input.display(), file.output.display());
            ItemOutcome::Succeeded {
                output: file.output,
                width: file.width,
                height: file.height,
                bands: file.bands,
                bytes_written: file.bytes_written,
            }
        }
        Ok(Err(e)) => {
            metrics.add_file_failed();
            tracing::error!("{} failed: {}: {}", input.display(), e.kind(), e);
            ItemOutcome::Failed {
                kind: e.kind(),
                message: e.to_string(),
            }
        }
        Err(e) => {
            metrics.add_file_failed();
            tracing::error!("{} worker panicked: {}", input.display(), e);
            ItemOutcome::Failed {
                kind: ErrorKind::Internal,
                message: format!("worker task failed: {}", e),
            }
        }
    };

    FileReport {
        index,
        input,
        outcome,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

impl From<&ProcessingConfig> for SchedulerConfig {
    fn from(processing: &ProcessingConfig) -> Self {
        Self {
            concurrency: processing.concurrency,
            enable_metrics: processing.enable_metrics,
            metrics_interval_secs: processing.metrics_interval_secs,
            metrics_output_path: processing.metrics_output_path.clone(),
        }
    }
}
