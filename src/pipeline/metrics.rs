//! Throughput monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

const MB: f64 = 1024.0 * 1024.0;

/// Metrics for a batch run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Total bytes of source rasters read
    pub bytes_read: AtomicU64,

    /// Total bytes of GeoTIFF written
    pub bytes_written: AtomicU64,

    /// Number of files georeferenced successfully
    pub files_processed: AtomicU64,

    /// Number of files that failed
    pub files_failed: AtomicU64,

    /// Number of files never dispatched because the run was cancelled
    pub files_cancelled: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    // Per-stage timing (in microseconds for precision)
    /// Time spent decoding sources (microseconds)
    pub load_us: AtomicU64,

    /// Time spent resampling (microseconds)
    pub resample_us: AtomicU64,

    /// Time spent encoding and writing GeoTIFFs (microseconds)
    pub write_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record bytes read.
    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record bytes written.
    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a successfully georeferenced file.
    pub fn add_file_processed(&self) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed file.
    pub fn add_file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a file skipped after cancellation.
    pub fn add_file_cancelled(&self) {
        self.files_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent decoding a source raster.
    pub fn add_load_time(&self, duration: Duration) {
        self.load_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent resampling.
    pub fn add_resample_time(&self, duration: Duration) {
        self.resample_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent encoding and writing a GeoTIFF.
    pub fn add_write_time(&self, duration: Duration) {
        self.write_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get files finished (either way) per second.
    pub fn files_per_second(&self) -> f64 {
        let files = self.files_processed.load(Ordering::Relaxed)
            + self.files_failed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            files as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get write throughput in MB/s.
    pub fn write_throughput_mbps(&self) -> f64 {
        let bytes = self.bytes_written.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            bytes as f64 / MB / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            files_processed: self.files_processed.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            files_cancelled: self.files_cancelled.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            files_per_second: self.files_per_second(),
            write_throughput_mbps: self.write_throughput_mbps(),
            load_secs: self.load_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            resample_secs: self.resample_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            write_secs: self.write_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub files_processed: u64,
    pub files_failed: u64,
    pub files_cancelled: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub files_per_second: f64,
    pub write_throughput_mbps: f64,
    /// Total time spent decoding (seconds, summed across threads)
    pub load_secs: f64,
    /// Total time spent resampling (seconds, summed across threads)
    pub resample_secs: f64,
    /// Total time spent writing (seconds, summed across threads)
    pub write_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }

    fn stage_percentages(&self) -> (f64, f64, f64) {
        let total = self.load_secs + self.resample_secs + self.write_secs;
        if total > 0.0 {
            (
                self.load_secs / total * 100.0,
                self.resample_secs / total * 100.0,
                self.write_secs / total * 100.0,
            )
        } else {
            (0.0, 0.0, 0.0)
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (load_pct, resample_pct, write_pct) = self.stage_percentages();

        write!(
            f,
            "Files: {} processed, {} failed, {} cancelled | \
             Read: {:.1} MB | Write: {:.1} MB @ {:.1} MB/s | \
             Rate: {:.2} files/s | Elapsed: {:.1}s | \
             Time: load {:.0}% | resample {:.0}% | write {:.0}%",
            self.files_processed,
            self.files_failed,
            self.files_cancelled,
            self.bytes_read as f64 / MB,
            self.bytes_written as f64 / MB,
            self.write_throughput_mbps,
            self.files_per_second,
            self.elapsed.as_secs_f64(),
            load_pct,
            resample_pct,
            write_pct,
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_files: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_files: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_files,
        }
    }

    /// Start the periodic reporter.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let progress = if self.total_files > 0 {
                        (snapshot.files_processed + snapshot.files_failed) as f64
                            / self.total_files as f64
                            * 100.0
                    } else {
                        0.0
                    };

                    tracing::info!("[{:.1}%] {}", progress, snapshot);
                }
                _ = shutdown.recv() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("Final: {}", snapshot);
                    break;
                }
            }
        }
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        let snapshot = self.metrics.snapshot();

        println!("\n=== Batch Summary ===");
        println!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        println!("Files processed: {}", snapshot.files_processed);
        println!("Files failed: {}", snapshot.files_failed);
        println!("Files cancelled: {}", snapshot.files_cancelled);
        println!("Data read: {:.2} MB", snapshot.bytes_read as f64 / MB);
        println!("Data written: {:.2} MB", snapshot.bytes_written as f64 / MB);
        println!("Write throughput: {:.2} MB/s", snapshot.write_throughput_mbps);
        println!("Processing rate: {:.2} files/s", snapshot.files_per_second);

        let total_stage = snapshot.load_secs + snapshot.resample_secs + snapshot.write_secs;
        if total_stage > 0.0 {
            let (load_pct, resample_pct, write_pct) = snapshot.stage_percentages();
            println!("\n--- Stage Time Breakdown ---");
            println!("Load:      {:>7.1}s ({:>5.1}%)", snapshot.load_secs, load_pct);
            println!("Resample:  {:>7.1}s ({:>5.1}%)", snapshot.resample_secs, resample_pct);
            println!("Write:     {:>7.1}s ({:>5.1}%)", snapshot.write_secs, write_pct);
        }
        println!("=====================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.add_bytes_read(1000);
        metrics.add_bytes_read(500);

        assert_eq!(metrics.bytes_read.load(Ordering::Relaxed), 1500);
    }

    #[test]
    fn test_all_counters() {
        let metrics = Metrics::new();

        metrics.add_bytes_read(1024);
        metrics.add_bytes_written(2048);
        metrics.add_file_processed();
        metrics.add_file_processed();
        metrics.add_file_failed();
        metrics.add_file_cancelled();

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.bytes_read, 1024);
        assert_eq!(snapshot.bytes_written, 2048);
        assert_eq!(snapshot.files_processed, 2);
        assert_eq!(snapshot.files_failed, 1);
        assert_eq!(snapshot.files_cancelled, 1);
    }

    #[test]
    fn test_timing_metrics() {
        let metrics = Metrics::new();

        metrics.add_load_time(Duration::from_millis(100));
        metrics.add_resample_time(Duration::from_millis(50));
        metrics.add_write_time(Duration::from_millis(75));

        let snapshot = metrics.snapshot();

        assert!((snapshot.load_secs - 0.1).abs() < 0.001);
        assert!((snapshot.resample_secs - 0.05).abs() < 0.001);
        assert!((snapshot.write_secs - 0.075).abs() < 0.001);
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = MetricsSnapshot {
            bytes_read: 10 * 1024 * 1024,
            bytes_written: 5 * 1024 * 1024,
            files_processed: 12,
            files_failed: 3,
            files_cancelled: 1,
            elapsed: Duration::from_secs(10),
            files_per_second: 1.5,
            write_throughput_mbps: 0.5,
            load_secs: 2.0,
            resample_secs: 6.0,
            write_secs: 2.0,
        };

        let display = format!("{}", snapshot);

        assert!(display.contains("12 processed"));
        assert!(display.contains("3 failed"));
        assert!(display.contains("1 cancelled"));
        assert!(display.contains("resample 60%"));
    }

    #[test]
    fn test_zero_elapsed_no_panic() {
        let metrics = Metrics {
            start_time: None,
            ..Default::default()
        };

        metrics.add_bytes_written(1000);

        assert_eq!(metrics.write_throughput_mbps(), 0.0);
        assert_eq!(metrics.files_per_second(), 0.0);
    }

    #[test]
    fn test_snapshot_saves_json() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("metrics.json");
        let metrics = Metrics::new();
        metrics.add_file_processed();

        metrics.snapshot().save_to_file(path.to_str().unwrap()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["files_processed"], 1);
    }

    #[test]
    fn test_metrics_reporter_new() {
        let metrics = Metrics::new();
        let reporter = MetricsReporter::new(metrics, 10, 25);

        assert_eq!(reporter.interval_secs, 10);
        assert_eq!(reporter.total_files, 25);
    }
}
