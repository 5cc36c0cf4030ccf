//! Inverse-mapping bilinear resampler.
//!
//! Every output pixel centre is pushed through the output transform into
//! geographic space, then through the inverse source transform back into
//! fractional source pixel coordinates, where the four nearest source pixel
//! centres are blended.
//!
//! Output rows are independent and computed on the rayon pool; the result
//! does not depend on the number of threads.

use crate::error::{GeorefError, Result};
use crate::io::{RasterImage, Sample};
use crate::transform::AffineTransform;
use ndarray::Array3;
use rayon::prelude::*;

/// The pixel grid a raster is resampled onto.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetGrid {
    pub width: usize,
    pub height: usize,
    /// Output pixel -> geographic transform.
    pub transform: AffineTransform,
}

impl TargetGrid {
    pub fn new(width: usize, height: usize, transform: AffineTransform) -> Self {
        Self {
            width,
            height,
            transform,
        }
    }

    /// A `width` x `height` grid covering the same footprint as a
    /// `src_width` x `src_height` raster placed by `src_transform`.
    pub fn resized(
        src_width: usize,
        src_height: usize,
        src_transform: &AffineTransform,
        width: usize,
        height: usize,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GeorefError::Resample(format!(
                "target grid must be non-empty, got {}x{}",
                width, height
            )));
        }
        let sx = src_width as f64 / width as f64;
        let sy = src_height as f64 / height as f64;
        Ok(Self::new(width, height, src_transform.scaled(sx, sy)))
    }
}

/// Resample `src`, placed by `src_transform`, onto `target`.
///
/// Output pixels whose centre falls outside the source raster get the
/// source nodata value, or 0 when none is set. Neighbours equal to nodata
/// are left out of the blend.
pub fn resample<T: Sample>(
    src: &RasterImage<T>,
    src_transform: &AffineTransform,
    target: &TargetGrid,
) -> Result<RasterImage<T>> {
    if target.width == 0 || target.height == 0 {
        return Err(GeorefError::Resample(format!(
            "target grid must be non-empty, got {}x{}",
            target.width, target.height
        )));
    }
    src.check_dimensions().map_err(GeorefError::Resample)?;

    // Output pixel -> source pixel in a single affine step
    let pixel_map = src_transform.inverse()?.compose(&target.transform);

    let (out_w, out_h, bands) = (target.width, target.height, src.bands);
    let fill = src.nodata.unwrap_or_default();

    let rows: Vec<Vec<T>> = (0..out_h)
        .into_par_iter()
        .map(|row| {
            // Laid out [band][col]
            let mut out = vec![fill; bands * out_w];
            let y = row as f64 + 0.5;
            for col in 0..out_w {
                let (sx, sy) = pixel_map.forward(col as f64 + 0.5, y);
                if !in_bounds(sx, sy, src.width, src.height) {
                    continue;
                }
                let taps = bilinear_taps(sx, sy, src.width, src.height);
                for band in 0..bands {
                    out[band * out_w + col] = blend(src, band, &taps).unwrap_or(fill);
                }
            }
            out
        })
        .collect();

    let data = Array3::from_shape_fn((bands, out_h, out_w), |(band, row, col)| {
        rows[row][band * out_w + col]
    });

    let mut out = RasterImage::new(data).with_nodata(src.nodata);
    out.source = src.source.clone();
    Ok(out)
}

#[inline]
fn in_bounds(sx: f64, sy: f64, width: usize, height: usize) -> bool {
    sx.is_finite()
        && sy.is_finite()
        && sx >= 0.0
        && sy >= 0.0
        && sx < width as f64
        && sy < height as f64
}

/// Four (row, col, weight) taps around a fractional source coordinate.
///
/// Pixel centres sit at half-integer coordinates. Indices are clamped to the
/// raster so edge pixels reuse their nearest neighbour.
fn bilinear_taps(sx: f64, sy: f64, width: usize, height: usize) -> [(usize, usize, f64); 4] {
    let x = sx - 0.5;
    let y = sy - 0.5;
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let clamp = |v: f64, len: usize| -> usize { v.max(0.0).min((len - 1) as f64) as usize };
    let c0 = clamp(x0, width);
    let c1 = clamp(x0 + 1.0, width);
    let r0 = clamp(y0, height);
    let r1 = clamp(y0 + 1.0, height);

    [
        (r0, c0, (1.0 - fx) * (1.0 - fy)),
        (r0, c1, fx * (1.0 - fy)),
        (r1, c0, (1.0 - fx) * fy),
        (r1, c1, fx * fy),
    ]
}

/// Weighted average of the valid taps, `None` if every tap is nodata.
#[inline]
fn blend<T: Sample>(src: &RasterImage<T>, band: usize, taps: &[(usize, usize, f64); 4]) -> Option<T> {
    let mut sum = 0.0;
    let mut weight = 0.0;
    for &(row, col, w) in taps {
        let value = src.get(band, row, col);
        if src.nodata == Some(value) {
            continue;
        }
        sum += value.to_f64() * w;
        weight += w;
    }
    if weight > 0.0 {
        Some(T::from_f64(sum / weight))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    fn patterned(bands: usize, height: usize, width: usize) -> RasterImage<u8> {
        RasterImage::new(Array3::from_shape_fn((bands, height, width), |(b, r, c)| {
            ((b * 97 + r * 31 + c * 7) % 256) as u8
        }))
    }

    #[test]
    fn test_identity_is_noop() {
        let src = patterned(3, 17, 23);
        let target = TargetGrid::new(23, 17, AffineTransform::identity());

        let out = resample(&src, &AffineTransform::identity(), &target).unwrap();
        assert_eq!(out.data, src.data);
    }

    #[test]
    fn test_identity_is_noop_with_nodata() {
        let src = patterned(1, 9, 11).with_nodata(Some(0));
        let target = TargetGrid::new(11, 9, AffineTransform::identity());

        let out = resample(&src, &AffineTransform::identity(), &target).unwrap();
        assert_eq!(out.data, src.data);
        assert_eq!(out.nodata, Some(0));
    }

    #[test]
    fn test_georeferenced_identity_grid() {
        let bbox = BoundingBox::new(-180.0, 180.0, -90.0, 90.0);
        let transform = AffineTransform::from_bounds(40, 20, &bbox).unwrap();
        let src = patterned(2, 20, 40);
        let target = TargetGrid::new(40, 20, transform);

        let out = resample(&src, &transform, &target).unwrap();
        assert_eq!(out.data, src.data);
    }

    #[test]
    fn test_constant_image_stays_constant() {
        let src = RasterImage::filled(2, 30, 40, 1234u16);
        let transform = AffineTransform::from_bounds(40, 30, &BoundingBox::default()).unwrap();

        for &(w, h) in &[(1, 1), (7, 3), (40, 30), (97, 61)] {
            let target = TargetGrid::resized(40, 30, &transform, w, h).unwrap();
            let out = resample(&src, &transform, &target).unwrap();
            assert_eq!(out.data.dim(), (2, h, w));
            assert!(out.data.iter().all(|&v| v == 1234), "{}x{}", w, h);
        }
    }

    #[test]
    fn test_out_of_bounds_gets_nodata() {
        let src = RasterImage::filled(1, 10, 10, 50u8).with_nodata(Some(255));
        // Shift the output grid 15 pixels to the right of the source
        let shifted = AffineTransform::new(15.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let target = TargetGrid::new(10, 10, shifted);

        let out = resample(&src, &AffineTransform::identity(), &target).unwrap();
        assert!(out.data.iter().all(|&v| v == 255));
    }

    #[test]
    fn test_out_of_bounds_defaults_to_zero() {
        let src = RasterImage::filled(1, 4, 4, 50u8);
        // Half of the output overlaps the source
        let shifted = AffineTransform::new(2.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let target = TargetGrid::new(4, 4, shifted);

        let out = resample(&src, &AffineTransform::identity(), &target).unwrap();
        for row in 0..4 {
            assert_eq!(out.get(0, row, 0), 50);
            assert_eq!(out.get(0, row, 1), 50);
            assert_eq!(out.get(0, row, 2), 0);
            assert_eq!(out.get(0, row, 3), 0);
        }
    }

    #[test]
    fn test_zero_target_rejected() {
        let src = RasterImage::filled(1, 4, 4, 1u8);
        let identity = AffineTransform::identity();

        let err = resample(&src, &identity, &TargetGrid::new(0, 4, identity)).unwrap_err();
        assert!(matches!(err, GeorefError::Resample(_)));
        assert!(resample(&src, &identity, &TargetGrid::new(4, 0, identity)).is_err());
        assert!(TargetGrid::resized(4, 4, &identity, 0, 4).is_err());
    }

    #[test]
    fn test_nodata_neighbours_renormalised() {
        let mut src = RasterImage::new(Array3::from_shape_vec((1, 2, 2), vec![10u8, 20, 30, 0]).unwrap());
        src.nodata = Some(0);
        // One output pixel whose centre lands on the shared corner of all four
        let target = TargetGrid::new(1, 1, AffineTransform::new(0.5, 1.0, 0.0, 0.5, 0.0, 1.0));

        let out = resample(&src, &AffineTransform::identity(), &target).unwrap();
        assert_eq!(out.get(0, 0, 0), 20);
    }

    #[test]
    fn test_all_nodata_neighbours_stay_nodata() {
        let src = RasterImage::filled(1, 2, 2, 7u8).with_nodata(Some(7));
        let target = TargetGrid::new(1, 1, AffineTransform::new(0.5, 1.0, 0.0, 0.5, 0.0, 1.0));

        let out = resample(&src, &AffineTransform::identity(), &target).unwrap();
        assert_eq!(out.get(0, 0, 0), 7);
    }

    #[test]
    fn test_downsample_averages_blocks() {
        let src = RasterImage::new(
            Array3::from_shape_vec(
                (1, 4, 4),
                vec![
                    0u8, 10, 100, 110, //
                    20, 30, 120, 130, //
                    40, 50, 200, 210, //
                    60, 70, 220, 230,
                ],
            )
            .unwrap(),
        );
        let identity = AffineTransform::identity();
        let target = TargetGrid::resized(4, 4, &identity, 2, 2).unwrap();

        let out = resample(&src, &identity, &target).unwrap();
        assert_eq!(out.get(0, 0, 0), 15);
        assert_eq!(out.get(0, 0, 1), 115);
        assert_eq!(out.get(0, 1, 0), 55);
        assert_eq!(out.get(0, 1, 1), 215);
    }

    #[test]
    fn test_result_independent_of_thread_count() {
        let src = patterned(3, 64, 48);
        let transform = AffineTransform::new(5.0, 0.1, 0.02, 50.0, -0.01, -0.1);
        let target = TargetGrid::resized(48, 64, &transform, 37, 71).unwrap();

        let parallel = resample(&src, &transform, &target).unwrap();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let serial = pool.install(|| resample(&src, &transform, &target)).unwrap();

        assert_eq!(parallel.data, serial.data);
    }
}
