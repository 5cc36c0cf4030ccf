//! Configuration for the georeferencing batch.

use crate::crs::Crs;
use crate::error::{GeorefError, Result as GeorefResult};
use crate::geometry::{corner_control_points, BoundingBox, ControlPoint};
use crate::io::{discover_inputs, CompressionProfile};
use crate::transform::AffineTransform;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for a georeferencing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Input configuration
    #[serde(default)]
    pub input: InputConfig,

    /// Output configuration
    pub output: OutputConfig,

    /// Where the source rasters sit on the globe
    #[serde(default)]
    pub georef: GeorefConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Input raster selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Explicit input files, processed in this order
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Directory scanned for inputs (appended after `paths`, sorted)
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// File extensions picked up from `directory` (case-insensitive)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            directory: None,
            extensions: default_extensions(),
        }
    }
}

/// Output GeoTIFF configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving `<input stem>.tif` files
    pub directory: PathBuf,

    /// CRS assigned to the output (default: EPSG:4326)
    #[serde(default)]
    pub crs: Crs,

    /// Output grid size [width, height]; defaults to the source dimensions
    #[serde(default)]
    pub size: Option<[usize; 2]>,

    /// Nodata value written for pixels outside the source raster
    #[serde(default)]
    pub nodata: Option<f64>,

    /// Tiling and compression
    #[serde(default)]
    pub compression: CompressionProfile,
}

impl OutputConfig {
    /// Output path for an input file: `<directory>/<stem>.tif`.
    pub fn output_path_for(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "output".into());
        let mut name = stem;
        name.push(".tif");
        self.directory.join(name)
    }
}

/// Georeferencing parameters shared by every input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeorefConfig {
    /// Geographic extent the full raster is stretched over
    #[serde(default)]
    pub bounding_box: BoundingBox,

    /// Explicit control points (3 or 4); overrides `bounding_box`
    #[serde(default)]
    pub control_points: Option<Vec<ControlPoint>>,
}

impl GeorefConfig {
    /// Control points used for a `width` x `height` raster.
    pub fn control_points_for(&self, width: usize, height: usize) -> GeorefResult<Vec<ControlPoint>> {
        match &self.control_points {
            Some(points) => Ok(points.clone()),
            None => Ok(corner_control_points(width, height, &self.bounding_box)?.to_vec()),
        }
    }

    /// Pixel -> geographic transform for a `width` x `height` raster.
    ///
    /// Explicit control points must lie on the raster, corners included.
    pub fn transform_for(&self, width: usize, height: usize) -> GeorefResult<AffineTransform> {
        match &self.control_points {
            Some(points) => {
                let (w, h) = (width as f64, height as f64);
                let outside = points.iter().find(|p| {
                    !(0.0..=w).contains(&p.pixel.col) || !(0.0..=h).contains(&p.pixel.row)
                });
                if let Some(p) = outside {
                    return Err(GeorefError::degenerate(format!(
                        "control point at pixel ({}, {}) lies outside the {}x{} raster",
                        p.pixel.col, p.pixel.row, width, height
                    )));
                }
                AffineTransform::from_control_points(points)
            }
            None => AffineTransform::from_bounds(width, height, &self.bounding_box),
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Number of files processed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Rayon thread pool size for resampling and tile compression
    #[serde(default)]
    pub rayon_threads: Option<usize>,

    /// Enable metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,

    /// Optional path to save the per-file report as JSON
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            worker_threads: None,
            rayon_threads: None,
            enable_metrics: true,
            metrics_interval_secs: default_metrics_interval(),
            metrics_output_path: None,
            report_path: None,
        }
    }
}

impl Config {
    /// A configuration writing to `directory` with every other field defaulted.
    pub fn with_output_dir(directory: impl Into<PathBuf>) -> Self {
        Self {
            input: InputConfig::default(),
            output: OutputConfig {
                directory: directory.into(),
                crs: Crs::default(),
                size: None,
                nodata: None,
                compression: CompressionProfile::default(),
            },
            georef: GeorefConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }

    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // Try YAML first (it's a superset of JSON)
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.processing.concurrency == 0 {
            bail!("Concurrency must be > 0");
        }
        if self.processing.enable_metrics && self.processing.metrics_interval_secs == 0 {
            bail!("Metrics interval must be > 0 when metrics are enabled");
        }
        if self.input.directory.is_some() && self.input.extensions.is_empty() {
            bail!("Input extensions must not be empty when scanning a directory");
        }

        self.output
            .compression
            .validate()
            .context("Invalid output compression")?;

        if let Some([w, h]) = self.output.size {
            if w == 0 || h == 0 {
                bail!("Output size must be positive, got {}x{}", w, h);
            }
        }

        if let Some(nodata) = self.output.nodata {
            if !nodata.is_finite() || nodata < 0.0 || nodata.fract() != 0.0 || nodata > u16::MAX as f64 {
                bail!("Nodata must be a non-negative integer sample value, got {}", nodata);
            }
        }

        let bbox = &self.georef.bounding_box;
        bbox.validate().context("Invalid bounding box")?;
        if self.output.crs.is_geographic() && !bbox.is_valid_lon_lat() {
            bail!(
                "Bounding box {:?} exceeds longitude [-180, 180] / latitude [-90, 90] for {}",
                bbox,
                self.output.crs
            );
        }

        if let Some(points) = &self.georef.control_points {
            if points.len() < 3 || points.len() > 4 {
                bail!("Expected 3 or 4 control points, got {}", points.len());
            }
            if self.output.crs.is_geographic() {
                if let Some(p) = points.iter().find(|p| !p.geo.is_valid_lon_lat()) {
                    bail!("Control point {:?} lies outside the longitude/latitude domain", p.geo);
                }
            }
            // Reject collinear sets up front rather than once per file
            AffineTransform::from_control_points(points).context("Invalid control points")?;
        }

        Ok(())
    }

    /// Resolve the ordered list of input files: explicit paths first, then
    /// the sorted contents of the input directory.
    pub fn input_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = self.input.paths.clone();
        if let Some(dir) = &self.input.directory {
            files.extend(discover_inputs(dir, &self.input.extensions)?);
        }
        Ok(files)
    }
}

/// Commented sample configuration written by `generate-config`.
pub const SAMPLE_CONFIG: &str = r#"# Paleogeo Georeferencing Configuration

# === INPUT: Which rasters to georeference ===
input:
  # Explicit files (processed first, in this order)
  paths: []

  # Directory scanned for rasters (sorted by name)
  directory: "maps"

  # Extensions picked up from the directory (case-insensitive)
  extensions: ["jpg", "jpeg", "png", "tif", "tiff"]

# === OUTPUT: Where and how to write GeoTIFFs ===
output:
  # Each input is written as <directory>/<input stem>.tif
  directory: "georeferenced"

  # CRS assigned to the computed transform
  crs: "EPSG:4326"

  # Output grid [width, height] (omit = same as the source)
  # size: [4096, 2048]

  # Value for pixels outside the source raster (omit = 0, not flagged)
  # nodata: 0

  compression:
    # none | lzw | deflate
    codec: lzw
    # none | horizontal (TIFF predictor 2)
    predictor: horizontal
    # Tile [width, height], each a multiple of 16
    tile_size: [256, 256]

# === GEOREF: Where the rasters sit on the globe ===
georef:
  # Extent the whole raster is stretched over (corners become control points)
  bounding_box:
    xmin: -180.0
    xmax: 180.0
    ymin: -90.0
    ymax: 90.0

  # Explicit control points (3 or 4) override the bounding box
  # control_points:
  #   - { pixel: { col: 0.0, row: 0.0 }, geo: { x: -180.0, y: 90.0 } }
  #   - { pixel: { col: 4096.0, row: 0.0 }, geo: { x: 180.0, y: 90.0 } }
  #   - { pixel: { col: 0.0, row: 2048.0 }, geo: { x: -180.0, y: -90.0 } }

# === PROCESSING: Performance tuning ===
processing:
  # Number of files processed concurrently
  concurrency: 4

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 8

  # Rayon thread pool size for resampling (null = num CPUs)
  # rayon_threads: 8

  # Print throughput metrics during processing
  enable_metrics: true

  # Metrics reporting interval in seconds
  metrics_interval_secs: 10

  # metrics_output_path: "metrics.json"
  # report_path: "report.json"
"#;

// Default value functions for serde
fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "tif", "tiff"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_concurrency() -> usize { 4 }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }
