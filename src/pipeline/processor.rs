//! Per-file georeferencing pipeline.
//!
//! Each input goes through four stages:
//! 1. Decode the source raster
//! 2. Build the pixel -> geographic transform from the configured bounding
//!    box or control points
//! 3. Resample onto the output grid
//! 4. Write a tiled GeoTIFF next to the other outputs
//!
//! Processing is synchronous and CPU-bound; the scheduler runs it on the
//! blocking pool.

use crate::config::Config;
use crate::error::{GeorefError, Result};
use crate::io::{
    nodata_as, write_geotiff, GeoreferencedRaster, ImageDecoder, RasterData, RasterDecoder,
    RasterImage, Sample,
};
use crate::pipeline::Metrics;
use crate::transform::{resample, AffineTransform, TargetGrid};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Processor for individual input files.
pub struct FileProcessor {
    /// Source raster decoder
    decoder: Arc<dyn RasterDecoder>,

    /// Metrics collector
    metrics: Arc<Metrics>,

    /// Configuration
    config: Arc<Config>,
}

/// What was written for one input.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFile {
    pub output: PathBuf,
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub bytes_written: u64,
}

impl FileProcessor {
    /// Create a processor decoding inputs with the `image` crate.
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        Self::with_decoder(Arc::new(ImageDecoder), config, metrics)
    }

    pub fn with_decoder(
        decoder: Arc<dyn RasterDecoder>,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            decoder,
            metrics,
            config,
        }
    }

    /// Destination GeoTIFF for `input`.
    pub fn output_path_for(&self, input: &Path) -> PathBuf {
        self.config.output.output_path_for(input)
    }

    /// Georeference a single input file.
    pub fn process(&self, input: &Path) -> Result<ProcessedFile> {
        let output = self.output_path_for(input);
        if let Some(dir) = output.parent() {
            std::fs::create_dir_all(dir).map_err(|e| GeorefError::write(&output, e))?;
        }
        if is_same_file(input, &output) {
            return Err(GeorefError::write(&output, "output would overwrite its input"));
        }

        // Decode
        let load_start = Instant::now();
        let source = self.decoder.decode(input)?;
        self.metrics.add_load_time(load_start.elapsed());
        self.metrics.add_bytes_read(source.byte_size());

        let (src_w, src_h) = (source.width(), source.height());

        // Transform
        let georef = &self.config.georef;
        let transform = georef.transform_for(src_w, src_h)?;
        tracing::debug!(
            "{}: control points {:?} -> transform {:?}",
            input.display(),
            georef.control_points_for(src_w, src_h)?,
            transform.to_gdal()
        );

        let target = match self.config.output.size {
            Some([w, h]) => TargetGrid::resized(src_w, src_h, &transform, w, h)?,
            None => TargetGrid::new(src_w, src_h, transform),
        };

        // Resample
        let resample_start = Instant::now();
        let nodata = self.config.output.nodata;
        let resampled: RasterData = match &source {
            RasterData::U8(img) => resample_band_data(img, &transform, &target, nodata)?.into(),
            RasterData::U16(img) => resample_band_data(img, &transform, &target, nodata)?.into(),
        };
        drop(source);
        self.metrics.add_resample_time(resample_start.elapsed());

        let bands = resampled.bands();
        let raster = GeoreferencedRaster::new(resampled, target.transform, self.config.output.crs);

        // Write
        let write_start = Instant::now();
        let bytes_written = write_geotiff(&raster, &self.config.output.compression, &output)?;
        self.metrics.add_write_time(write_start.elapsed());
        self.metrics.add_bytes_written(bytes_written);

        tracing::debug!(
            "{} -> {} ({}x{}, {} bands, {} bytes)",
            input.display(),
            output.display(),
            target.width,
            target.height,
            bands,
            bytes_written
        );

        Ok(ProcessedFile {
            output,
            width: target.width,
            height: target.height,
            bands,
            bytes_written,
        })
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn resample_band_data<T: Sample>(
    img: &RasterImage<T>,
    transform: &AffineTransform,
    target: &TargetGrid,
    nodata: Option<f64>,
) -> Result<RasterImage<T>> {
    match nodata {
        Some(value) => {
            let mut masked = img.clone();
            masked.nodata = Some(nodata_as::<T>(value)?);
            resample(&masked, transform, target)
        }
        None => resample(img, transform, target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;
    use crate::io::read_geotiff;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        img.save(path).unwrap();
    }

    fn processor(config: Config) -> FileProcessor {
        FileProcessor::new(Arc::new(config), Metrics::new())
    }

    #[test]
    fn test_process_world_map() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("world.png");
        write_png(&input, 100, 80);

        let config = Config::with_output_dir(temp_dir.path().join("out"));
        let result = processor(config).process(&input).unwrap();

        assert_eq!(result.output, temp_dir.path().join("out").join("world.tif"));
        assert_eq!((result.width, result.height, result.bands), (100, 80, 3));
        assert!(result.bytes_written > 0);

        let written = read_geotiff(&result.output).unwrap();
        let expected = AffineTransform::from_bounds(100, 80, &BoundingBox::default()).unwrap();
        assert!(written.transform.almost_equals(&expected, 1e-9));
        let (x, y) = written.transform.forward(50.0, 40.0);
        assert!(x.abs() < 1e-9 && y.abs() < 1e-9);

        // Same grid, so the samples come through unchanged
        let RasterData::U8(img) = written.data else {
            panic!("expected 8-bit output");
        };
        assert_eq!(img.get(0, 10, 42), 42);
        assert_eq!(img.get(1, 10, 42), 10);
        assert_eq!(img.get(2, 79, 99), ((99 + 79) % 256) as u8);
    }

    #[test]
    fn test_process_with_output_size() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("scan.png");
        write_png(&input, 64, 32);

        let mut config = Config::with_output_dir(temp_dir.path());
        config.output.size = Some([32, 16]);
        config.georef.bounding_box = BoundingBox::new(-20.0, 20.0, 30.0, 50.0);
        let result = processor(config).process(&input).unwrap();

        assert_eq!((result.width, result.height), (32, 16));
        let written = read_geotiff(&result.output).unwrap();
        assert_eq!((written.data.width(), written.data.height()), (32, 16));
        assert!((written.transform.b - 40.0 / 32.0).abs() < 1e-12);
        assert!((written.transform.f + 20.0 / 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_corrupt_input_fails_with_load_error() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("corrupt.jpg");
        std::fs::write(&input, b"\xff\xd8 truncated").unwrap();

        let config = Config::with_output_dir(temp_dir.path().join("out"));
        let err = processor(config).process(&input).unwrap_err();

        assert!(matches!(err, GeorefError::Load { .. }));
        assert!(!temp_dir.path().join("out").join("corrupt.tif").exists());
    }

    #[test]
    fn test_unrepresentable_nodata_fails() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("map.png");
        write_png(&input, 8, 8);

        let mut config = Config::with_output_dir(temp_dir.path());
        config.output.nodata = Some(1000.0);
        assert!(processor(config).process(&input).is_err());
    }

    #[test]
    fn test_input_in_output_dir_is_not_overwritten() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("plate.tif");
        ImageBuffer::from_fn(8, 8, |x, y| Rgb([x as u8, y as u8, 0])).save(&input).unwrap();
        let before = std::fs::read(&input).unwrap();

        let config = Config::with_output_dir(temp_dir.path());
        let err = processor(config).process(&input).unwrap_err();

        assert!(matches!(err, GeorefError::Write { .. }));
        assert_eq!(std::fs::read(&input).unwrap(), before);
    }

    #[test]
    fn test_metrics_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("map.png");
        write_png(&input, 16, 16);

        let metrics = Metrics::new();
        let config = Arc::new(Config::with_output_dir(temp_dir.path()));
        FileProcessor::new(config, metrics.clone()).process(&input).unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_read, 16 * 16 * 3);
        assert!(snapshot.bytes_written > 0);
    }
}
