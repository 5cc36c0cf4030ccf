//! In-memory raster types.
//!
//! Samples are stored band-major, row-major in an `Array3<T>` of shape
//! `(bands, height, width)`.

use crate::crs::Crs;
use crate::error::{GeorefError, Result};
use crate::transform::AffineTransform;
use ndarray::Array3;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// An unsigned integer pixel sample.
pub trait Sample: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    /// Bits per sample as written to `BitsPerSample`.
    const BITS: u16;

    fn to_f64(self) -> f64;

    /// Round half away from zero and clamp to the representable range.
    fn from_f64(value: f64) -> Self;

    fn wrapping_sub(self, other: Self) -> Self;

    /// Append the little-endian encoding of the sample.
    fn extend_le(self, buf: &mut Vec<u8>);

    fn bytes_per_sample() -> usize {
        Self::BITS as usize / 8
    }
}

macro_rules! impl_sample {
    ($t:ty, $bits:expr) => {
        impl Sample for $t {
            const BITS: u16 = $bits;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                if value.is_nan() {
                    return 0;
                }
                // f64::round rounds half away from zero
                value.round().clamp(<$t>::MIN as f64, <$t>::MAX as f64) as $t
            }

            #[inline]
            fn wrapping_sub(self, other: Self) -> Self {
                <$t>::wrapping_sub(self, other)
            }

            #[inline]
            fn extend_le(self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_sample!(u8, 8);
impl_sample!(u16, 16);

/// A decoded raster with no geographic information.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage<T: Sample> {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    /// Shape `(bands, height, width)`.
    pub data: Array3<T>,
    pub nodata: Option<T>,
    pub source: Option<PathBuf>,
}

impl<T: Sample> RasterImage<T> {
    /// Wrap an array of shape `(bands, height, width)`.
    pub fn new(data: Array3<T>) -> Self {
        let (bands, height, width) = data.dim();
        Self {
            width,
            height,
            bands,
            data,
            nodata: None,
            source: None,
        }
    }

    /// A raster filled with `value`.
    pub fn filled(bands: usize, height: usize, width: usize, value: T) -> Self {
        Self::new(Array3::from_elem((bands, height, width), value))
    }

    pub fn with_nodata(mut self, nodata: Option<T>) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn with_source(mut self, source: impl AsRef<Path>) -> Self {
        self.source = Some(source.as_ref().to_path_buf());
        self
    }

    #[inline]
    pub fn get(&self, band: usize, row: usize, col: usize) -> T {
        self.data[[band, row, col]]
    }

    /// Whether the declared dimensions agree with the sample array.
    pub fn check_dimensions(&self) -> std::result::Result<(), String> {
        let expected = (self.bands, self.height, self.width);
        if self.data.dim() != expected {
            return Err(format!(
                "declared {} bands of {}x{} but sample array has shape {:?}",
                self.bands,
                self.width,
                self.height,
                self.data.dim()
            ));
        }
        if self.width == 0 || self.height == 0 || self.bands == 0 {
            return Err(format!(
                "raster is empty ({} bands of {}x{})",
                self.bands, self.width, self.height
            ));
        }
        Ok(())
    }

    pub fn byte_size(&self) -> u64 {
        (self.data.len() * T::bytes_per_sample()) as u64
    }
}

/// A raster of any supported sample type.
#[derive(Debug, Clone, PartialEq)]
pub enum RasterData {
    U8(RasterImage<u8>),
    U16(RasterImage<u16>),
}

macro_rules! dispatch {
    ($self:expr, $img:ident => $body:expr) => {
        match $self {
            RasterData::U8($img) => $body,
            RasterData::U16($img) => $body,
        }
    };
}

impl RasterData {
    pub fn width(&self) -> usize {
        dispatch!(self, img => img.width)
    }

    pub fn height(&self) -> usize {
        dispatch!(self, img => img.height)
    }

    pub fn bands(&self) -> usize {
        dispatch!(self, img => img.bands)
    }

    pub fn bits_per_sample(&self) -> u16 {
        match self {
            RasterData::U8(_) => <u8 as Sample>::BITS,
            RasterData::U16(_) => <u16 as Sample>::BITS,
        }
    }

    pub fn source(&self) -> Option<&Path> {
        dispatch!(self, img => img.source.as_deref())
    }

    /// Nodata value widened to f64, if set.
    pub fn nodata(&self) -> Option<f64> {
        dispatch!(self, img => img.nodata.map(Sample::to_f64))
    }

    pub fn byte_size(&self) -> u64 {
        dispatch!(self, img => img.byte_size())
    }
}

impl From<RasterImage<u8>> for RasterData {
    fn from(image: RasterImage<u8>) -> Self {
        RasterData::U8(image)
    }
}

impl From<RasterImage<u16>> for RasterData {
    fn from(image: RasterImage<u16>) -> Self {
        RasterData::U16(image)
    }
}

/// Raster samples plus the transform and CRS that place them on the globe.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoreferencedRaster {
    pub data: RasterData,
    pub transform: AffineTransform,
    pub crs: Crs,
}

impl GeoreferencedRaster {
    pub fn new(data: RasterData, transform: AffineTransform, crs: Crs) -> Self {
        Self {
            data,
            transform,
            crs,
        }
    }

    /// Geographic extent as (xmin, xmax, ymin, ymax), taken over all corners.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let w = self.data.width() as f64;
        let h = self.data.height() as f64;
        let corners = [
            self.transform.forward(0.0, 0.0),
            self.transform.forward(w, 0.0),
            self.transform.forward(w, h),
            self.transform.forward(0.0, h),
        ];
        corners.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
            |(xmin, xmax, ymin, ymax), &(x, y)| (xmin.min(x), xmax.max(x), ymin.min(y), ymax.max(y)),
        )
    }
}

/// Convert a nodata value from configuration into a sample of type `T`.
///
/// Fails when the value is not exactly representable.
pub fn nodata_as<T: Sample>(value: f64) -> Result<T> {
    let sample = T::from_f64(value);
    if sample.to_f64() != value {
        return Err(GeorefError::Resample(format!(
            "nodata value {} is not representable as a {}-bit sample",
            value,
            T::BITS
        )));
    }
    Ok(sample)
}
