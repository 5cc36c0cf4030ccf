//! Source raster decoding and input discovery.

use crate::error::{GeorefError, Result};
use crate::io::{RasterData, RasterImage, Sample};
use anyhow::Context;
use image::{DynamicImage, ImageReader};
use ndarray::Array3;
use std::path::{Path, PathBuf};

/// Turns a file on disk into raster samples.
pub trait RasterDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<RasterData>;
}

/// Decoder backed by the `image` crate (JPEG, PNG, TIFF).
///
/// 8-bit images decode to `u8` rasters and 16-bit images to `u16`;
/// floating point images are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl RasterDecoder for ImageDecoder {
    fn decode(&self, path: &Path) -> Result<RasterData> {
        let image = ImageReader::open(path)
            .map_err(|e| GeorefError::load(path, e))?
            .with_guessed_format()
            .map_err(|e| GeorefError::load(path, e))?
            .decode()
            .map_err(|e| GeorefError::load(path, e))?;

        let data = raster_from_dynamic(image, path)?;
        tracing::debug!(
            "Decoded {}: {}x{} pixels, {} bands, {}-bit",
            path.display(),
            data.width(),
            data.height(),
            data.bands(),
            data.bits_per_sample()
        );
        Ok(data)
    }
}

/// Convert a decoded image into a band-major raster.
pub fn raster_from_dynamic(image: DynamicImage, path: &Path) -> Result<RasterData> {
    if image.width() == 0 || image.height() == 0 {
        return Err(GeorefError::load(path, "image has zero width or height"));
    }
    let (w, h) = (image.width() as usize, image.height() as usize);

    let data = match image {
        DynamicImage::ImageLuma8(buf) => deinterleave(buf.as_raw(), w, h, 1, path).into(),
        DynamicImage::ImageLumaA8(buf) => deinterleave(buf.as_raw(), w, h, 2, path).into(),
        DynamicImage::ImageRgb8(buf) => deinterleave(buf.as_raw(), w, h, 3, path).into(),
        DynamicImage::ImageRgba8(buf) => deinterleave(buf.as_raw(), w, h, 4, path).into(),
        DynamicImage::ImageLuma16(buf) => deinterleave(buf.as_raw(), w, h, 1, path).into(),
        DynamicImage::ImageLumaA16(buf) => deinterleave(buf.as_raw(), w, h, 2, path).into(),
        DynamicImage::ImageRgb16(buf) => deinterleave(buf.as_raw(), w, h, 3, path).into(),
        DynamicImage::ImageRgba16(buf) => deinterleave(buf.as_raw(), w, h, 4, path).into(),
        other => {
            return Err(GeorefError::load(
                path,
                format!("unsupported sample type {:?}", other.color()),
            ))
        }
    };
    Ok(data)
}

/// Pixel-interleaved samples -> `(bands, height, width)`.
fn deinterleave<T: Sample>(
    raw: &[T],
    width: usize,
    height: usize,
    bands: usize,
    path: &Path,
) -> RasterImage<T> {
    let data = Array3::from_shape_fn((bands, height, width), |(band, row, col)| {
        raw[(row * width + col) * bands + band]
    });
    RasterImage::new(data).with_source(path)
}

/// List the files directly inside `dir` whose extension matches one of
/// `extensions` (case-insensitive), sorted by path.
pub fn discover_inputs(dir: &Path, extensions: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read input directory {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to list input directory {}", dir.display()))?
            .path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false);
        if matches {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb};
    use tempfile::TempDir;

    #[test]
    fn test_decode_rgb_png() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("map.png");
        let img = ImageBuffer::from_fn(5, 3, |x, y| Rgb([x as u8, y as u8, 200u8]));
        img.save(&path).unwrap();

        let data = ImageDecoder.decode(&path).unwrap();
        let RasterData::U8(raster) = data else {
            panic!("expected 8-bit raster");
        };
        assert_eq!((raster.bands, raster.height, raster.width), (3, 3, 5));
        assert_eq!(raster.get(0, 2, 4), 4);
        assert_eq!(raster.get(1, 2, 4), 2);
        assert_eq!(raster.get(2, 0, 0), 200);
        assert_eq!(raster.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_decode_gray16_png() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dem.png");
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(4, 4, |x, y| Luma([(x * 1000 + y) as u16]));
        img.save(&path).unwrap();

        let data = ImageDecoder.decode(&path).unwrap();
        let RasterData::U16(raster) = data else {
            panic!("expected 16-bit raster");
        };
        assert_eq!(raster.bands, 1);
        assert_eq!(raster.get(0, 1, 3), 3001);
    }

    #[test]
    fn test_corrupt_file_is_load_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let err = ImageDecoder.decode(&path).unwrap_err();
        assert!(matches!(err, GeorefError::Load { .. }));
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = ImageDecoder.decode(Path::new("/nonexistent/map.jpg")).unwrap_err();
        assert!(matches!(err, GeorefError::Load { .. }));
    }

    #[test]
    fn test_float_image_rejected() {
        let img = DynamicImage::new_rgb32f(2, 2);
        let err = raster_from_dynamic(img, Path::new("float.tif")).unwrap_err();
        assert!(matches!(err, GeorefError::Load { .. }));
    }

    #[test]
    fn test_discover_inputs_filters_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["b.JPG", "a.jpg", "c.png", "notes.txt"] {
            std::fs::write(temp_dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(temp_dir.path().join("sub.jpg")).unwrap();

        let found = discover_inputs(temp_dir.path(), &["jpg".to_string()]).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.JPG"]);
    }
}
