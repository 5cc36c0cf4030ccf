//! Paleogeo
//!
//! Batch georeferencing for scanned paleogeographic maps: every input raster
//! is pinned to a geographic bounding box (or explicit control points),
//! resampled onto its output grid and written as a tiled, compressed GeoTIFF.
//!
//! # Architecture
//!
//! - **Geometry**: geographic and pixel points, control points, bounding boxes
//! - **Transform**: affine fitting from control points and bilinear resampling
//! - **I/O**: source image decoding and GeoTIFF reading/writing
//! - **Pipeline**: bounded-concurrency batch driver with metrics
//!
//! # Usage
//!
//! ```no_run
//! use paleogeo::{run_batch, CancellationFlag, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let report = run_batch(config, CancellationFlag::new()).await?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crs;
pub mod error;
pub mod geometry;
pub mod io;
pub mod pipeline;
pub mod transform;

pub use config::Config;
pub use crs::Crs;
pub use error::{ErrorKind, GeorefError};
pub use geometry::{BoundingBox, ControlPoint, GeoPoint, PixelPoint};
pub use io::{read_geotiff, write_geotiff, CompressionProfile, GeoreferencedRaster, RasterImage};
pub use pipeline::{
    BatchReport, CancellationFlag, FileProcessor, ItemOutcome, Metrics, Scheduler,
    SchedulerConfig,
};
pub use transform::{resample, AffineTransform, TargetGrid};

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Georeference every configured input and return the ordered report.
///
/// Per-file failures are recorded in the report. Invalid configuration, an
/// unwritable output directory or an empty input set fail the whole run.
pub async fn run_batch(config: Config, cancel: CancellationFlag) -> Result<BatchReport> {
    config.validate()?;

    let inputs = config.input_files()?;
    if inputs.is_empty() {
        anyhow::bail!("No input rasters found");
    }

    tracing::info!("Starting georeferencing of {} inputs", inputs.len());
    prepare_output_dir(&config.output.directory)?;
    tracing::info!("Writing GeoTIFFs to {}", config.output.directory.display());

    let config = Arc::new(config);
    let metrics = Metrics::new();
    let processor = Arc::new(FileProcessor::new(config.clone(), metrics.clone()));
    let scheduler = Scheduler::new(
        processor,
        metrics,
        SchedulerConfig::from(&config.processing),
        cancel,
    );

    let report = scheduler.run(inputs).await;

    if let Some(path) = &config.processing.report_path {
        report.save_to_file(path)?;
    }

    tracing::info!("Batch complete: {}", report);

    Ok(report)
}

/// Create the output directory and check that files can be created in it.
fn prepare_output_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    tempfile::tempfile_in(dir)
        .with_context(|| format!("Output directory {} is not writable", dir.display()))?;
    Ok(())
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

/// Initialize the Rayon thread pool.
pub fn init_rayon(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    Ok(())
}
