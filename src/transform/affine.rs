//! Affine pixel → geographic transforms and the control point solver.

use crate::error::{GeorefError, Result};
use crate::geometry::{BoundingBox, ControlPoint};

/// Relative tolerance for detecting singular systems.
const SINGULAR_EPS: f64 = 1e-12;

/// Affine transform from pixel space to geographic space.
///
/// The transform is defined by 6 coefficients:
/// ```text
/// x = a + b * col + c * row
/// y = d + e * col + f * row
/// ```
///
/// The coefficient order matches the GDAL geotransform array, so for a
/// north-up raster:
/// - `a` is the x coordinate of the upper-left corner
/// - `b` is the pixel width
/// - `d` is the y coordinate of the upper-left corner
/// - `f` is the pixel height (negative, rows grow downwards)
/// - `c` and `e` are 0 (no rotation/shear)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub const fn identity() -> Self {
        Self {
            a: 0.0,
            b: 1.0,
            c: 0.0,
            d: 0.0,
            e: 0.0,
            f: 1.0,
        }
    }

    /// Create from a GDAL-style geotransform array.
    pub fn from_gdal(gt: &[f64; 6]) -> Self {
        Self::new(gt[0], gt[1], gt[2], gt[3], gt[4], gt[5])
    }

    /// Convert to a GDAL-style geotransform array.
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    /// Build the transform that stretches a `width` x `height` raster over
    /// `bounds`: pixel (0, 0) lands on (xmin, ymax) and pixel
    /// (width, height) on (xmax, ymin).
    pub fn from_bounds(width: usize, height: usize, bounds: &BoundingBox) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GeorefError::degenerate(format!(
                "raster dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        bounds.validate()?;

        Ok(Self {
            a: bounds.xmin,
            b: bounds.width() / width as f64,
            c: 0.0,
            d: bounds.ymax,
            e: 0.0,
            // Rows grow downwards while latitude grows upwards
            f: -bounds.height() / height as f64,
        })
    }

    /// Fit a transform to 3 or 4 control points by least squares.
    ///
    /// The x and y equations share the design matrix `[1, col, row]`, so the
    /// problem splits into two 3-parameter fits. Pixel coordinates are
    /// centred on their mean before solving, which keeps the normal
    /// equations well conditioned for large rasters.
    pub fn from_control_points(points: &[ControlPoint]) -> Result<Self> {
        if points.len() < 3 || points.len() > 4 {
            return Err(GeorefError::degenerate(format!(
                "expected 3 or 4 control points, got {}",
                points.len()
            )));
        }
        if points.iter().any(|p| {
            !(p.pixel.col.is_finite()
                && p.pixel.row.is_finite()
                && p.geo.x.is_finite()
                && p.geo.y.is_finite())
        }) {
            return Err(GeorefError::degenerate(
                "control points contain non-finite coordinates",
            ));
        }

        let n = points.len() as f64;
        let mean_col = points.iter().map(|p| p.pixel.col).sum::<f64>() / n;
        let mean_row = points.iter().map(|p| p.pixel.row).sum::<f64>() / n;
        let mean_x = points.iter().map(|p| p.geo.x).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.geo.y).sum::<f64>() / n;

        let (mut s_cc, mut s_cr, mut s_rr) = (0.0, 0.0, 0.0);
        let (mut s_cx, mut s_rx, mut s_cy, mut s_ry) = (0.0, 0.0, 0.0, 0.0);
        for p in points {
            let dc = p.pixel.col - mean_col;
            let dr = p.pixel.row - mean_row;
            let dx = p.geo.x - mean_x;
            let dy = p.geo.y - mean_y;
            s_cc += dc * dc;
            s_cr += dc * dr;
            s_rr += dr * dr;
            s_cx += dc * dx;
            s_rx += dr * dx;
            s_cy += dc * dy;
            s_ry += dr * dy;
        }

        let det = s_cc * s_rr - s_cr * s_cr;
        if det <= SINGULAR_EPS * s_cc * s_rr {
            return Err(GeorefError::degenerate(
                "control points are collinear in pixel space",
            ));
        }

        let b = (s_cx * s_rr - s_rx * s_cr) / det;
        let c = (s_rx * s_cc - s_cx * s_cr) / det;
        let e = (s_cy * s_rr - s_ry * s_cr) / det;
        let f = (s_ry * s_cc - s_cy * s_cr) / det;

        let transform = Self {
            a: mean_x - b * mean_col - c * mean_row,
            b,
            c,
            d: mean_y - e * mean_col - f * mean_row,
            e,
            f,
        };

        if transform.is_singular() {
            return Err(GeorefError::degenerate(
                "control points are collinear in geographic space",
            ));
        }

        Ok(transform)
    }

    /// Apply the forward transform: (col, row) -> (x, y).
    #[inline]
    pub fn forward(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.a + self.b * col + self.c * row;
        let y = self.d + self.e * col + self.f * row;
        (x, y)
    }

    pub fn determinant(&self) -> f64 {
        self.b * self.f - self.c * self.e
    }

    fn is_singular(&self) -> bool {
        let scale = (self.b.abs() + self.c.abs()) * (self.e.abs() + self.f.abs());
        !self.determinant().is_finite() || self.determinant().abs() <= SINGULAR_EPS * scale
    }

    /// Compute the inverse transform: geographic -> pixel.
    pub fn inverse(&self) -> Result<AffineTransform> {
        if self.is_singular() {
            return Err(GeorefError::degenerate(
                "singular affine transform (determinant is zero)",
            ));
        }
        let inv_det = 1.0 / self.determinant();
        let b = self.f * inv_det;
        let c = -self.c * inv_det;
        let e = -self.e * inv_det;
        let f = self.b * inv_det;
        Ok(AffineTransform {
            a: -(b * self.a + c * self.d),
            b,
            c,
            d: -(e * self.a + f * self.d),
            e,
            f,
        })
    }

    /// Chain two transforms: the result applies `inner` first, then `self`.
    pub fn compose(&self, inner: &AffineTransform) -> AffineTransform {
        AffineTransform {
            a: self.a + self.b * inner.a + self.c * inner.d,
            b: self.b * inner.b + self.c * inner.e,
            c: self.b * inner.c + self.c * inner.f,
            d: self.d + self.e * inner.a + self.f * inner.d,
            e: self.e * inner.b + self.f * inner.e,
            f: self.e * inner.c + self.f * inner.f,
        }
    }

    /// Transform for the same footprint sampled with pixels `sx` by `sy`
    /// times the original pixel size.
    pub fn scaled(&self, sx: f64, sy: f64) -> AffineTransform {
        self.compose(&AffineTransform::new(0.0, sx, 0.0, 0.0, 0.0, sy))
    }

    /// No rotation or shear terms.
    pub fn is_axis_aligned(&self) -> bool {
        self.c == 0.0 && self.e == 0.0
    }

    pub fn almost_equals(&self, other: &AffineTransform, tolerance: f64) -> bool {
        self.to_gdal()
            .iter()
            .zip(other.to_gdal().iter())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{corner_control_points, GeoPoint, PixelPoint};

    const TOL: f64 = 1e-9;

    fn assert_close(actual: (f64, f64), expected: (f64, f64)) {
        assert!(
            (actual.0 - expected.0).abs() < TOL && (actual.1 - expected.1).abs() < TOL,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_world_bounds_scenario() {
        let bounds = BoundingBox::new(-180.0, 180.0, -90.0, 90.0);
        let t = AffineTransform::from_bounds(1000, 800, &bounds).unwrap();

        assert!((t.a - -180.0).abs() < TOL);
        assert!((t.b - 0.36).abs() < TOL);
        assert_eq!(t.c, 0.0);
        assert!((t.d - 90.0).abs() < TOL);
        assert_eq!(t.e, 0.0);
        assert!((t.f - -0.225).abs() < TOL);

        assert_close(t.forward(500.0, 400.0), (0.0, 0.0));
    }

    #[test]
    fn test_corners_reproduced() {
        let cases = [
            (1000, 800, BoundingBox::new(-180.0, 180.0, -90.0, 90.0)),
            (1, 1, BoundingBox::new(0.0, 1.0, 0.0, 1.0)),
            (4096, 3, BoundingBox::new(-0.001, 0.002, 51.4, 51.5)),
            (7, 13, BoundingBox::new(120.5, 179.9, -89.0, -10.25)),
        ];

        for (w, h, bounds) in cases {
            let t = AffineTransform::from_bounds(w, h, &bounds).unwrap();
            let (w, h) = (w as f64, h as f64);
            assert_close(t.forward(0.0, 0.0), (bounds.xmin, bounds.ymax));
            assert_close(t.forward(w, 0.0), (bounds.xmax, bounds.ymax));
            assert_close(t.forward(w, h), (bounds.xmax, bounds.ymin));
            assert_close(t.forward(0.0, h), (bounds.xmin, bounds.ymin));
        }
    }

    #[test]
    fn test_degenerate_bounds_rejected() {
        let bounds = BoundingBox::default();
        assert!(AffineTransform::from_bounds(0, 10, &bounds).is_err());
        assert!(AffineTransform::from_bounds(10, 0, &bounds).is_err());

        let flat = BoundingBox::new(0.0, 0.0, -1.0, 1.0);
        assert!(AffineTransform::from_bounds(10, 10, &flat).is_err());

        let inverted = BoundingBox::new(0.0, 1.0, 1.0, -1.0);
        assert!(AffineTransform::from_bounds(10, 10, &inverted).is_err());
    }

    #[test]
    fn test_inverse_round_trip() {
        let bounds = BoundingBox::new(-180.0, 180.0, -90.0, 90.0);
        let t = AffineTransform::from_bounds(1000, 800, &bounds).unwrap();
        let inv = t.inverse().unwrap();

        for &(col, row) in &[(0.0, 0.0), (12.5, 799.0), (999.9, 0.1), (500.0, 400.0)] {
            let geo = t.forward(col, row);
            let (c2, r2) = inv.forward(geo.0, geo.1);
            assert_close(t.forward(c2, r2), geo);
        }
    }

    #[test]
    fn test_inverse_of_sheared_transform() {
        let t = AffineTransform::new(10.0, 0.5, 0.1, -4.0, -0.2, -0.75);
        let inv = t.inverse().unwrap();
        let identity = t.compose(&inv);
        assert!(identity.almost_equals(&AffineTransform::identity(), 1e-12));
    }

    #[test]
    fn test_singular_inverse_fails() {
        let t = AffineTransform::new(0.0, 1.0, 2.0, 0.0, 2.0, 4.0);
        assert!(t.inverse().is_err());
    }

    #[test]
    fn test_corner_gcps_match_closed_form() {
        let bounds = BoundingBox::new(-30.0, 60.0, -15.0, 45.0);
        let gcps = corner_control_points(640, 480, &bounds).unwrap();

        let fitted = AffineTransform::from_control_points(&gcps).unwrap();
        let closed = AffineTransform::from_bounds(640, 480, &bounds).unwrap();

        assert!(fitted.almost_equals(&closed, TOL), "{:?} vs {:?}", fitted, closed);
    }

    #[test]
    fn test_three_point_fit() {
        let gcps = [
            ControlPoint::new(PixelPoint::new(10.0, 20.0), GeoPoint::new(5.0, 40.0)),
            ControlPoint::new(PixelPoint::new(310.0, 25.0), GeoPoint::new(20.0, 39.5)),
            ControlPoint::new(PixelPoint::new(40.0, 220.0), GeoPoint::new(6.0, 30.0)),
        ];
        let t = AffineTransform::from_control_points(&gcps).unwrap();

        for gcp in &gcps {
            assert_close(t.forward(gcp.pixel.col, gcp.pixel.row), (gcp.geo.x, gcp.geo.y));
        }
    }

    #[test]
    fn test_rotated_four_point_fit() {
        // 30 degree rotation plus scaling and translation
        let truth = AffineTransform::new(100.0, 0.866, -0.5, 50.0, 0.5, 0.866);
        let pixels = [(0.0, 0.0), (200.0, 10.0), (190.0, 150.0), (5.0, 160.0)];
        let gcps: Vec<ControlPoint> = pixels
            .iter()
            .map(|&(c, r)| {
                let (x, y) = truth.forward(c, r);
                ControlPoint::new(PixelPoint::new(c, r), GeoPoint::new(x, y))
            })
            .collect();

        let fitted = AffineTransform::from_control_points(&gcps).unwrap();
        assert!(fitted.almost_equals(&truth, 1e-9), "{:?}", fitted);
        assert!(!fitted.is_axis_aligned());
    }

    #[test]
    fn test_collinear_points_rejected() {
        let gcps = [
            ControlPoint::new(PixelPoint::new(0.0, 0.0), GeoPoint::new(0.0, 0.0)),
            ControlPoint::new(PixelPoint::new(10.0, 10.0), GeoPoint::new(1.0, 1.0)),
            ControlPoint::new(PixelPoint::new(20.0, 20.0), GeoPoint::new(2.0, 2.0)),
        ];
        let err = AffineTransform::from_control_points(&gcps).unwrap_err();
        assert!(matches!(err, GeorefError::DegenerateGeometry(_)));
    }

    #[test]
    fn test_collapsed_geographic_points_rejected() {
        let gcps = [
            ControlPoint::new(PixelPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)),
            ControlPoint::new(PixelPoint::new(10.0, 0.0), GeoPoint::new(1.0, 1.0)),
            ControlPoint::new(PixelPoint::new(0.0, 10.0), GeoPoint::new(1.0, 1.0)),
        ];
        assert!(AffineTransform::from_control_points(&gcps).is_err());
    }

    #[test]
    fn test_point_count_limits() {
        let p = ControlPoint::new(PixelPoint::new(0.0, 0.0), GeoPoint::new(0.0, 0.0));
        assert!(AffineTransform::from_control_points(&[p, p]).is_err());
        assert!(AffineTransform::from_control_points(&[p; 5]).is_err());
    }

    #[test]
    fn test_scaled_keeps_footprint() {
        let bounds = BoundingBox::new(-180.0, 180.0, -90.0, 90.0);
        let t = AffineTransform::from_bounds(1000, 800, &bounds).unwrap();
        // Resample the same footprint onto a 500x200 grid
        let half = t.scaled(1000.0 / 500.0, 800.0 / 200.0);

        assert_close(half.forward(0.0, 0.0), (-180.0, 90.0));
        assert_close(half.forward(500.0, 200.0), (180.0, -90.0));
    }

    #[test]
    fn test_gdal_array_order() {
        let gt = [-180.0, 0.36, 0.0, 90.0, 0.0, -0.225];
        let t = AffineTransform::from_gdal(&gt);
        assert_eq!(t.to_gdal(), gt);
        assert!(t.is_axis_aligned());
    }
}
