//! Raster I/O: source decoding, in-memory rasters and GeoTIFF output.

mod decoder;
mod geotiff;
mod raster;

pub use decoder::{discover_inputs, raster_from_dynamic, ImageDecoder, RasterDecoder};
pub use geotiff::{read_geotiff, write_geotiff, Codec, CompressionProfile, Predictor};
pub use raster::{nodata_as, GeoreferencedRaster, RasterData, RasterImage, Sample};
