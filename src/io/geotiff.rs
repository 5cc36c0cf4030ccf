//! Tiled, compressed GeoTIFF output and the matching reader.
//!
//! The `tiff` crate's image encoder only writes strips, so tiles are laid
//! out, predicted and compressed here and handed to the low-level
//! `DirectoryEncoder` as raw data. Tiles are chunky (pixel-interleaved) and
//! edge tiles are zero padded to the full tile size.
//!
//! Output goes to a temporary file next to the destination and is renamed
//! into place once complete, so a failed write never leaves a truncated
//! file behind.

use crate::crs::Crs;
use crate::error::{GeorefError, Result};
use crate::io::{nodata_as, GeoreferencedRaster, RasterData, RasterImage, Sample};
use crate::transform::AffineTransform;
use anyhow::bail;
use ndarray::Array3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;

// GDAL private tag holding the nodata value as ASCII
const TAG_GDAL_NODATA: u16 = 42113;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GT_CITATION_GEO_KEY: u16 = 1026;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

// TIFF tag values
const COMPRESSION_NONE: u16 = 1;
const COMPRESSION_LZW: u16 = 5;
const COMPRESSION_DEFLATE: u16 = 8;
const PREDICTOR_NONE: u16 = 1;
const PREDICTOR_HORIZONTAL: u16 = 2;
const PHOTOMETRIC_MIN_IS_BLACK: u16 = 1;
const PHOTOMETRIC_RGB: u16 = 2;
const EXTRA_SAMPLE_UNSPECIFIED: u16 = 0;
const EXTRA_SAMPLE_UNASSOCIATED_ALPHA: u16 = 2;

/// Lossless compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    None,
    #[default]
    Lzw,
    Deflate,
}

impl Codec {
    fn tag_value(self) -> u16 {
        match self {
            Codec::None => COMPRESSION_NONE,
            Codec::Lzw => COMPRESSION_LZW,
            Codec::Deflate => COMPRESSION_DEFLATE,
        }
    }
}

/// TIFF predictor applied before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Predictor {
    None,
    /// Horizontal differencing (TIFF predictor 2).
    #[default]
    Horizontal,
}

impl Predictor {
    fn tag_value(self) -> u16 {
        match self {
            Predictor::None => PREDICTOR_NONE,
            Predictor::Horizontal => PREDICTOR_HORIZONTAL,
        }
    }
}

/// How pixel data is laid out and compressed on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionProfile {
    #[serde(default)]
    pub codec: Codec,

    #[serde(default)]
    pub predictor: Predictor,

    /// Tile width and height in pixels.
    #[serde(default = "default_tile_size")]
    pub tile_size: [u32; 2],
}

fn default_tile_size() -> [u32; 2] {
    [256, 256]
}

impl Default for CompressionProfile {
    fn default() -> Self {
        Self {
            codec: Codec::default(),
            predictor: Predictor::default(),
            tile_size: default_tile_size(),
        }
    }
}

impl CompressionProfile {
    /// Tile sides must be positive multiples of 16.
    pub fn validate(&self) -> anyhow::Result<()> {
        for side in self.tile_size {
            if side == 0 || side % 16 != 0 {
                bail!(
                    "tile size {:?} invalid: each side must be a positive multiple of 16",
                    self.tile_size
                );
            }
        }
        Ok(())
    }

    fn tile_width(&self) -> usize {
        self.tile_size[0] as usize
    }

    fn tile_height(&self) -> usize {
        self.tile_size[1] as usize
    }
}

#[derive(Debug, thiserror::Error)]
enum EncodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF encoding error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Write `raster` to `path` as a tiled GeoTIFF.
///
/// Returns the number of bytes written.
pub fn write_geotiff(
    raster: &GeoreferencedRaster,
    profile: &CompressionProfile,
    path: &Path,
) -> Result<u64> {
    profile
        .validate()
        .map_err(|e| GeorefError::write(path, e))?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| GeorefError::write(path, e))?;

    let encoded = (|| -> std::result::Result<(), EncodeError> {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        match &raster.data {
            RasterData::U8(img) => encode(img, &raster.transform, raster.crs, profile, &mut writer)?,
            RasterData::U16(img) => encode(img, &raster.transform, raster.crs, profile, &mut writer)?,
        }
        writer.flush()?;
        Ok(())
    })();
    // The temporary file is removed when `tmp` drops
    encoded.map_err(|e| GeorefError::write(path, e))?;

    let bytes = tmp
        .as_file()
        .metadata()
        .map_err(|e| GeorefError::write(path, e))?
        .len();
    tmp.persist(path)
        .map_err(|e| GeorefError::write(path, e.error))?;

    Ok(bytes)
}

fn encode<T: Sample, W: Write + Seek>(
    img: &RasterImage<T>,
    transform: &AffineTransform,
    crs: Crs,
    profile: &CompressionProfile,
    writer: W,
) -> std::result::Result<(), EncodeError> {
    img.check_dimensions().map_err(EncodeError::InvalidData)?;

    let (width, height, bands) = (img.width, img.height, img.bands);
    let (tile_w, tile_h) = (profile.tile_width(), profile.tile_height());
    let tiles_across = width.div_ceil(tile_w);
    let tiles_down = height.div_ceil(tile_h);

    let mut encoder = TiffEncoder::new(writer)?;
    let mut dir = encoder.image_directory()?;

    dir.write_tag(Tag::ImageWidth, to_u32(width)?)?;
    dir.write_tag(Tag::ImageLength, to_u32(height)?)?;
    dir.write_tag(Tag::BitsPerSample, vec![T::BITS; bands].as_slice())?;
    dir.write_tag(Tag::SampleFormat, vec![1u16; bands].as_slice())?;
    dir.write_tag(Tag::SamplesPerPixel, to_u16(bands)?)?;
    dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
    dir.write_tag(Tag::Compression, profile.codec.tag_value())?;
    dir.write_tag(Tag::Predictor, profile.predictor.tag_value())?;

    let (photometric, extra_samples) = match bands {
        3 => (PHOTOMETRIC_RGB, vec![]),
        4 => (PHOTOMETRIC_RGB, vec![EXTRA_SAMPLE_UNASSOCIATED_ALPHA]),
        n => (PHOTOMETRIC_MIN_IS_BLACK, vec![EXTRA_SAMPLE_UNSPECIFIED; n - 1]),
    };
    dir.write_tag(Tag::PhotometricInterpretation, photometric)?;
    if !extra_samples.is_empty() {
        dir.write_tag(Tag::ExtraSamples, extra_samples.as_slice())?;
    }

    dir.write_tag(Tag::TileWidth, profile.tile_size[0])?;
    dir.write_tag(Tag::TileLength, profile.tile_size[1])?;

    write_geo_tags(&mut dir, transform, crs)?;
    if let Some(nodata) = img.nodata {
        let text = format!("{}", nodata.to_f64());
        dir.write_tag(Tag::from_u16_exhaustive(TAG_GDAL_NODATA), text.as_str())?;
    }

    // Tiles are independent, so lay out and compress them in parallel
    let tiles: Vec<std::io::Result<Vec<u8>>> = (0..tiles_across * tiles_down)
        .into_par_iter()
        .map(|index| {
            let mut samples = extract_tile(img, index % tiles_across, index / tiles_across, tile_w, tile_h);
            if profile.predictor == Predictor::Horizontal {
                apply_horizontal_predictor(&mut samples, tile_w, bands);
            }
            let mut raw = Vec::with_capacity(samples.len() * T::bytes_per_sample());
            for s in samples {
                s.extend_le(&mut raw);
            }
            compress(raw, profile.codec)
        })
        .collect();

    let mut offsets = Vec::with_capacity(tiles.len());
    let mut byte_counts = Vec::with_capacity(tiles.len());
    for tile in tiles {
        let tile = tile?;
        let offset = dir.write_data(tile.as_slice())?;
        offsets.push(
            u32::try_from(offset)
                .map_err(|_| EncodeError::InvalidData("file exceeds 4 GiB".to_string()))?,
        );
        byte_counts.push(to_u32(tile.len())?);
    }

    dir.write_tag(Tag::TileOffsets, offsets.as_slice())?;
    dir.write_tag(Tag::TileByteCounts, byte_counts.as_slice())?;
    dir.finish()?;

    Ok(())
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<W, K>,
    transform: &AffineTransform,
    crs: Crs,
) -> std::result::Result<(), EncodeError> {
    if transform.is_axis_aligned() {
        // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
        let pixel_scale = [transform.b, -transform.f, 0.0];
        dir.write_tag(Tag::ModelPixelScaleTag, pixel_scale.as_slice())?;

        // ModelTiepoint: pixel (0, 0) -> upper-left corner
        let tiepoint = [0.0, 0.0, 0.0, transform.a, transform.d, 0.0];
        dir.write_tag(Tag::ModelTiepointTag, tiepoint.as_slice())?;
    } else {
        let t = transform;
        #[rustfmt::skip]
        let matrix = [
            t.b, t.c, 0.0, t.a,
            t.e, t.f, 0.0, t.d,
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(Tag::ModelTransformationTag, matrix.as_slice())?;
    }

    let citation = format!("{}|", crs.citation());
    let geokeys = build_geokey_directory(crs, citation.len());
    dir.write_tag(Tag::GeoKeyDirectoryTag, geokeys.as_slice())?;
    dir.write_tag(Tag::GeoAsciiParamsTag, citation.as_str())?;

    Ok(())
}

/// GeoKeyDirectory layout:
/// `[KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys,
///   KeyID, TIFFTagLocation, Count, Value_Offset, ...]`, keys sorted by ID.
fn build_geokey_directory(crs: Crs, citation_len: usize) -> Vec<u16> {
    let (model_type, cs_key) = if crs.is_geographic() {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_GEO_KEY)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_GEO_KEY)
    };
    let ascii_tag = Tag::GeoAsciiParamsTag.to_u16();

    vec![
        1, 1, 0, 4,
        GT_MODEL_TYPE_GEO_KEY, 0, 1, model_type,
        GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA,
        GT_CITATION_GEO_KEY, ascii_tag, citation_len as u16, 0,
        cs_key, 0, 1, crs.epsg_code(),
    ]
}

/// Copy one tile out of the band-major array into chunky order, zero padded.
fn extract_tile<T: Sample>(
    img: &RasterImage<T>,
    tile_col: usize,
    tile_row: usize,
    tile_w: usize,
    tile_h: usize,
) -> Vec<T> {
    let bands = img.bands;
    let mut samples = vec![T::default(); tile_w * tile_h * bands];
    let row0 = tile_row * tile_h;
    let col0 = tile_col * tile_w;
    let rows = tile_h.min(img.height - row0);
    let cols = tile_w.min(img.width - col0);

    for r in 0..rows {
        for c in 0..cols {
            let base = (r * tile_w + c) * bands;
            for b in 0..bands {
                samples[base + b] = img.get(b, row0 + r, col0 + c);
            }
        }
    }
    samples
}

/// Replace each sample by its difference to the same band in the previous
/// pixel of the row.
fn apply_horizontal_predictor<T: Sample>(samples: &mut [T], tile_w: usize, bands: usize) {
    let row_len = tile_w * bands;
    for row in samples.chunks_mut(row_len) {
        for i in (bands..row.len()).rev() {
            row[i] = row[i].wrapping_sub(row[i - bands]);
        }
    }
}

fn compress(raw: Vec<u8>, codec: Codec) -> std::io::Result<Vec<u8>> {
    match codec {
        Codec::None => Ok(raw),
        Codec::Lzw => weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
            .encode(&raw)
            .map_err(|e| std::io::Error::other(format!("LZW compression failed: {:?}", e))),
        Codec::Deflate => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&raw)?;
            Ok(encoder.finish()?)
        }
    }
}

fn to_u32(value: usize) -> std::result::Result<u32, EncodeError> {
    u32::try_from(value).map_err(|_| EncodeError::InvalidData(format!("{} exceeds u32", value)))
}

fn to_u16(value: usize) -> std::result::Result<u16, EncodeError> {
    u16::try_from(value).map_err(|_| EncodeError::InvalidData(format!("{} exceeds u16", value)))
}

/// Read a GeoTIFF back into memory: samples, transform, CRS and nodata.
///
/// Accepts tiled or stripped 8/16-bit unsigned images carrying either a
/// ModelTransformation or a tiepoint + pixel scale pair.
pub fn read_geotiff(path: &Path) -> Result<GeoreferencedRaster> {
    let file = File::open(path).map_err(|e| GeorefError::load(path, e))?;
    let mut decoder = Decoder::new(file)
        .map_err(|e| GeorefError::load(path, e))?
        .with_limits(Limits::unlimited());

    let transform = read_transform(&mut decoder).ok_or_else(|| {
        GeorefError::load(path, "missing ModelTransformation or tiepoint/pixel scale tags")
    })?;
    let crs = read_crs(&mut decoder).ok_or_else(|| GeorefError::load(path, "no EPSG code in GeoKeys"))?;
    let nodata = decoder
        .get_tag_ascii_string(Tag::from_u16_exhaustive(TAG_GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim().trim_end_matches('\0').parse::<f64>().ok());

    let (width, height) = decoder.dimensions().map_err(|e| GeorefError::load(path, e))?;
    let (width, height) = (width as usize, height as usize);
    let bands = decoder
        .find_tag(Tag::SamplesPerPixel)
        .map_err(|e| GeorefError::load(path, e))?
        .map(|v| v.into_u32())
        .transpose()
        .map_err(|e| GeorefError::load(path, e))?
        .unwrap_or(1) as usize;
    let bits = decoder
        .get_tag_u16_vec(Tag::BitsPerSample)
        .map_err(|e| GeorefError::load(path, e))?
        .first()
        .copied()
        .unwrap_or(8);

    let data: RasterData = match bits {
        8 => {
            let samples = read_chunks(&mut decoder, path, width, height, bands, |r| match r {
                DecodingResult::U8(v) => Some(v),
                _ => None,
            })?;
            let nodata = nodata.and_then(|v| nodata_as::<u8>(v).ok());
            RasterImage::new(samples).with_nodata(nodata).with_source(path).into()
        }
        16 => {
            let samples = read_chunks(&mut decoder, path, width, height, bands, |r| match r {
                DecodingResult::U16(v) => Some(v),
                _ => None,
            })?;
            let nodata = nodata.and_then(|v| nodata_as::<u16>(v).ok());
            RasterImage::new(samples).with_nodata(nodata).with_source(path).into()
        }
        other => {
            return Err(GeorefError::load(
                path,
                format!("unsupported bits per sample: {}", other),
            ))
        }
    };

    Ok(GeoreferencedRaster::new(data, transform, crs))
}

/// Decode every tile or strip into a `(bands, height, width)` array.
fn read_chunks<T: Sample, R: std::io::Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
    width: usize,
    height: usize,
    bands: usize,
    extract: impl Fn(DecodingResult) -> Option<Vec<T>>,
) -> Result<Array3<T>> {
    let mut out = Array3::from_elem((bands, height, width), T::default());
    let (chunk_w, chunk_h) = decoder.chunk_dimensions();
    let (chunk_w, chunk_h) = (chunk_w.max(1) as usize, chunk_h.max(1) as usize);
    let chunks_across = width.div_ceil(chunk_w);
    let chunks_down = height.div_ceil(chunk_h);

    for index in 0..chunks_across * chunks_down {
        let (data_w, data_h) = decoder.chunk_data_dimensions(index as u32);
        let (data_w, data_h) = (data_w as usize, data_h as usize);
        let decoded = decoder
            .read_chunk(index as u32)
            .map_err(|e| GeorefError::load(path, e))?;
        let values = extract(decoded)
            .ok_or_else(|| GeorefError::load(path, "unexpected sample type in chunk"))?;

        // Some decoders return the padded chunk rather than the trimmed data
        let stride = if values.len() == chunk_w * chunk_h * bands {
            chunk_w
        } else {
            data_w
        };
        if values.len() < stride * (data_h.max(1) - 1) * bands + data_w * bands {
            return Err(GeorefError::load(
                path,
                format!("chunk {} is shorter than expected", index),
            ));
        }

        let row0 = (index / chunks_across) * chunk_h;
        let col0 = (index % chunks_across) * chunk_w;
        for r in 0..data_h {
            for c in 0..data_w {
                let base = (r * stride + c) * bands;
                for b in 0..bands {
                    out[[b, row0 + r, col0 + c]] = values[base + b];
                }
            }
        }
    }

    Ok(out)
}

fn read_transform<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<AffineTransform> {
    if let Ok(m) = decoder.get_tag_f64_vec(Tag::ModelTransformationTag) {
        if m.len() >= 8 {
            return Some(AffineTransform::new(m[3], m[0], m[1], m[7], m[4], m[5]));
        }
    }

    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    let (sx, sy) = (scale[0], scale[1]);
    // Tiepoint ties raster (i, j) to model (x, y)
    let a = tiepoint[3] - tiepoint[0] * sx;
    let d = tiepoint[4] + tiepoint[1] * sy;
    Some(AffineTransform::new(a, sx, 0.0, d, 0.0, -sy))
}

fn read_crs<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<Crs> {
    let keys = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).ok()?;
    keys.get(4..)?
        .chunks_exact(4)
        .find(|entry| {
            (entry[0] == GEOGRAPHIC_TYPE_GEO_KEY || entry[0] == PROJECTED_CS_TYPE_GEO_KEY)
                && entry[1] == 0
        })
        .and_then(|entry| Crs::from_epsg(entry[3]).ok())
}
