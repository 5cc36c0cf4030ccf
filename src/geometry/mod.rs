//! Pixel and geographic coordinate types and control point sets.
//!
//! ## Coordinate order convention
//!
//! - Pixel coordinates are `(column, row)` measured from the upper-left corner
//!   of the upper-left pixel; rows grow downwards.
//! - Geographic coordinates are `(x, y)` = `(longitude, latitude)` for a
//!   geographic CRS; latitude grows upwards.
//! - Corner control points are always ordered upper-left, upper-right,
//!   lower-right, lower-left.

use crate::error::{GeorefError, Result};
use serde::{Deserialize, Serialize};

/// A geographic coordinate (longitude, latitude in degrees for EPSG:4326).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub x: f64,
    pub y: f64,
}

impl GeoPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Whether the point lies within the longitude/latitude domain.
    pub fn is_valid_lon_lat(&self) -> bool {
        (-180.0..=180.0).contains(&self.x) && (-90.0..=90.0).contains(&self.y)
    }
}

/// A (possibly fractional) pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub col: f64,
    pub row: f64,
}

impl PixelPoint {
    pub fn new(col: f64, row: f64) -> Self {
        Self { col, row }
    }
}

/// A ground control point: a pixel location tied to a geographic location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub pixel: PixelPoint,
    pub geo: GeoPoint,
}

impl ControlPoint {
    pub fn new(pixel: PixelPoint, geo: GeoPoint) -> Self {
        Self { pixel, geo }
    }
}

/// Geographic bounding box of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Default for BoundingBox {
    /// The whole globe in WGS84 degrees.
    fn default() -> Self {
        Self {
            xmin: -180.0,
            xmax: 180.0,
            ymin: -90.0,
            ymax: 90.0,
        }
    }
}

impl BoundingBox {
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Self {
        Self {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Check that the box has finite coordinates and a positive area.
    pub fn validate(&self) -> Result<()> {
        let coords = [self.xmin, self.xmax, self.ymin, self.ymax];
        if coords.iter().any(|v| !v.is_finite()) {
            return Err(GeorefError::degenerate(format!(
                "bounding box has non-finite coordinates: {:?}",
                coords
            )));
        }
        if self.xmin >= self.xmax {
            return Err(GeorefError::degenerate(format!(
                "bounding box xmin ({}) must be less than xmax ({})",
                self.xmin, self.xmax
            )));
        }
        if self.ymin >= self.ymax {
            return Err(GeorefError::degenerate(format!(
                "bounding box ymin ({}) must be less than ymax ({})",
                self.ymin, self.ymax
            )));
        }
        Ok(())
    }

    /// Check the box against the longitude/latitude domain.
    pub fn is_valid_lon_lat(&self) -> bool {
        GeoPoint::new(self.xmin, self.ymin).is_valid_lon_lat()
            && GeoPoint::new(self.xmax, self.ymax).is_valid_lon_lat()
    }
}

/// Derive the four corner control points of a `width` x `height` raster
/// stretched over `bounds`, ordered upper-left, upper-right, lower-right,
/// lower-left.
pub fn corner_control_points(
    width: usize,
    height: usize,
    bounds: &BoundingBox,
) -> Result<[ControlPoint; 4]> {
    if width == 0 || height == 0 {
        return Err(GeorefError::degenerate(format!(
            "raster dimensions must be positive, got {}x{}",
            width, height
        )));
    }
    bounds.validate()?;

    let w = width as f64;
    let h = height as f64;

    Ok([
        ControlPoint::new(PixelPoint::new(0.0, 0.0), GeoPoint::new(bounds.xmin, bounds.ymax)),
        ControlPoint::new(PixelPoint::new(w, 0.0), GeoPoint::new(bounds.xmax, bounds.ymax)),
        ControlPoint::new(PixelPoint::new(w, h), GeoPoint::new(bounds.xmax, bounds.ymin)),
        ControlPoint::new(PixelPoint::new(0.0, h), GeoPoint::new(bounds.xmin, bounds.ymin)),
    ])
}
