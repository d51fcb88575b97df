//! GeoTIFF raster source on top of the `tiff` decoder.
//!
//! Reads stripped or tiled, chunky (pixel-interleaved) images. Only the
//! internal chunks that intersect a request are decoded, one at a time.

use super::raster::{GeoTransform, MaskedBlock, RasterSource, SourceOpener, TileSampler};
use crate::crs::{codes, Transformer};
use crate::error::{Error, Result};
use crate::index::{TileCoordinate, Window};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::debug;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_METADATA: u16 = 42112;
const TAG_GDAL_NODATA: u16 = 42113;

const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
const USER_DEFINED: u16 = 32767;

/// Opens a fresh [`GeoTiffSource`] per call.
#[derive(Debug, Clone)]
pub struct GeoTiffOpener {
    path: PathBuf,
}

impl GeoTiffOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SourceOpener for GeoTiffOpener {
    fn open(&self) -> Result<Box<dyn RasterSource>> {
        Ok(Box::new(GeoTiffSource::open(&self.path)?))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Decoded chunk samples as f64, pixel-interleaved, `stride` pixels per row.
struct DecodedChunk {
    values: Vec<f64>,
    stride: usize,
}

/// A single open GeoTIFF.
///
/// The decoder is stateful, so the handle is `!Sync`; open one per thread.
pub struct GeoTiffSource {
    path: PathBuf,
    decoder: RefCell<Decoder<BufReader<File>>>,
    width: usize,
    height: usize,
    bands: usize,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
    transform: GeoTransform,
    crs: String,
    nodata: Option<f64>,
    single_precision: bool,
    band_names: Vec<String>,
    to_wgs84: Transformer,
    sampler: TileSampler,
}

impl GeoTiffSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::SourceRead(format!("Failed to open {}: {e}", path.display())))?;
        let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());

        let (width, height) = decoder.dimensions()?;
        let (width, height) = (width as usize, height as usize);

        let bands = decoder.get_tag_u32(Tag::SamplesPerPixel).unwrap_or(1) as usize;
        if decoder.get_tag_u32(Tag::PlanarConfiguration).unwrap_or(1) == 2 {
            return Err(Error::SourceRead(format!(
                "{}: planar (band-separate) layout is not supported",
                path.display()
            )));
        }

        let bits = decoder
            .get_tag_u32_vec(Tag::BitsPerSample)
            .ok()
            .and_then(|v| v.first().copied())
            .unwrap_or(8);
        let sample_format = decoder
            .get_tag_u32_vec(Tag::SampleFormat)
            .ok()
            .and_then(|v| v.first().copied())
            .unwrap_or(1);

        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let chunk_width = chunk_width.max(1) as usize;
        let chunk_height = chunk_height.max(1) as usize;

        let transform = read_transform(&mut decoder).ok_or_else(|| {
            Error::SourceRead(format!("{}: no georeferencing tags", path.display()))
        })?;
        let crs = read_crs(&mut decoder)
            .map_err(|e| Error::SourceRead(format!("{}: {e}", path.display())))?;

        let nodata = decoder
            .get_tag_ascii_string(Tag::from_u16_exhaustive(TAG_GDAL_NODATA))
            .ok()
            .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());

        let descriptions = decoder
            .get_tag_ascii_string(Tag::from_u16_exhaustive(TAG_GDAL_METADATA))
            .ok()
            .map(|xml| parse_band_descriptions(&xml))
            .unwrap_or_default();
        let band_names = (0..bands)
            .map(|b| {
                descriptions
                    .get(&b)
                    .cloned()
                    .unwrap_or_else(|| (b + 1).to_string())
            })
            .collect();

        debug!(
            "Opened {}: {}x{}x{} {} chunks {}x{} nodata={:?}",
            path.display(),
            width,
            height,
            bands,
            crs,
            chunk_width,
            chunk_height,
            nodata
        );

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            bands,
            chunk_width,
            chunk_height,
            chunks_across: width.div_ceil(chunk_width),
            to_wgs84: Transformer::new(&crs, codes::WGS84)?,
            sampler: TileSampler::new(&crs, transform, width, height)?,
            transform,
            crs,
            nodata,
            single_precision: bits == 32 && sample_format == 3,
            band_names,
            decoder: RefCell::new(decoder),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn is_masked(&self, value: f64) -> bool {
        if value.is_nan() {
            return true;
        }
        match self.nodata {
            Some(nodata) if self.single_precision => value as f32 == nodata as f32,
            Some(nodata) => value == nodata,
            None => false,
        }
    }

    fn decode_chunk(&self, index: usize) -> Result<DecodedChunk> {
        let mut decoder = self.decoder.borrow_mut();
        let (data_w, data_h) = decoder.chunk_data_dimensions(index as u32);
        let values = convert_decoding_result(decoder.read_chunk(index as u32)?);

        let (data_w, data_h) = (data_w as usize, data_h as usize);
        let stride = if values.len() == data_w * data_h * self.bands {
            data_w
        } else if values.len() == self.chunk_width * self.chunk_height * self.bands {
            self.chunk_width
        } else {
            return Err(Error::SourceRead(format!(
                "{}: chunk {index} decoded to {} samples, expected {}",
                self.path.display(),
                values.len(),
                data_w * data_h * self.bands
            )));
        };

        Ok(DecodedChunk { values, stride })
    }

    /// Copy sample `(row, col)` of `chunk` into position `(r, c)` of `block`.
    fn copy_pixel(
        &self,
        chunk: &DecodedChunk,
        row: usize,
        col: usize,
        block: &mut MaskedBlock,
        r: usize,
        c: usize,
    ) {
        let base = (row * chunk.stride + col) * self.bands;
        for b in 0..self.bands {
            let v = chunk.values[base + b];
            block.data[[b, r, c]] = v;
            block.mask[[b, r, c]] = self.is_masked(v);
        }
    }
}

impl RasterSource for GeoTiffSource {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn band_count(&self) -> usize {
        self.bands
    }

    fn band_names(&self) -> Vec<String> {
        self.band_names.clone()
    }

    fn crs(&self) -> &str {
        &self.crs
    }

    fn transform(&self) -> GeoTransform {
        self.transform
    }

    fn read_masked(&self, window: &Window) -> Result<MaskedBlock> {
        let row_end = window.row_off + window.height;
        let col_end = window.col_off + window.width;
        if row_end > self.height || col_end > self.width {
            return Err(Error::SourceRead(format!(
                "window {window:?} exceeds raster {}x{}",
                self.width, self.height
            )));
        }

        let mut block = MaskedBlock::fully_masked(self.bands, window.height, window.width);
        if window.area() == 0 {
            return Ok(block);
        }

        for chunk_row in window.row_off / self.chunk_height..=(row_end - 1) / self.chunk_height {
            for chunk_col in window.col_off / self.chunk_width..=(col_end - 1) / self.chunk_width {
                let chunk = self.decode_chunk(chunk_row * self.chunks_across + chunk_col)?;

                let chunk_y = chunk_row * self.chunk_height;
                let chunk_x = chunk_col * self.chunk_width;
                let rows = window.row_off.max(chunk_y)..row_end.min(chunk_y + self.chunk_height);
                let cols = window.col_off.max(chunk_x)..col_end.min(chunk_x + self.chunk_width);

                for row in rows {
                    for col in cols.clone() {
                        self.copy_pixel(
                            &chunk,
                            row - chunk_y,
                            col - chunk_x,
                            &mut block,
                            row - window.row_off,
                            col - window.col_off,
                        );
                    }
                }
            }
        }

        Ok(block)
    }

    fn read_tile_window(&self, tile: &TileCoordinate, tile_size: usize) -> Result<MaskedBlock> {
        let positions = self.sampler.positions(tile, tile_size)?;

        // Group tile pixels by source chunk so each chunk is decoded once.
        let mut by_chunk: BTreeMap<usize, Vec<(usize, usize, usize)>> = BTreeMap::new();
        for (i, pos) in positions.into_iter().enumerate() {
            if let Some((row, col)) = pos {
                let index = (row / self.chunk_height) * self.chunks_across + col / self.chunk_width;
                by_chunk.entry(index).or_default().push((i, row, col));
            }
        }

        let mut block = MaskedBlock::fully_masked(self.bands, tile_size, tile_size);
        for (index, pixels) in by_chunk {
            let chunk = self.decode_chunk(index)?;
            for (i, row, col) in pixels {
                self.copy_pixel(
                    &chunk,
                    row % self.chunk_height,
                    col % self.chunk_width,
                    &mut block,
                    i / tile_size,
                    i % tile_size,
                );
            }
        }

        Ok(block)
    }

    fn reproject_to_wgs84(&self, coords: &mut [(f64, f64)]) -> Result<()> {
        self.to_wgs84.convert_in_place(coords)
    }
}

fn read_transform(decoder: &mut Decoder<BufReader<File>>) -> Option<GeoTransform> {
    if let Ok(matrix) = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TRANSFORMATION)) {
        if let Some(transform) = GeoTransform::from_model_transformation(&matrix) {
            return Some(transform);
        }
    }

    let scale = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_PIXEL_SCALE))
        .ok()?;
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TIEPOINT))
        .ok()?;
    GeoTransform::from_tiepoint_scale(&tiepoint, &scale)
}

fn read_crs(decoder: &mut Decoder<BufReader<File>>) -> std::result::Result<String, String> {
    let keys = decoder
        .get_tag_u16_vec(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY))
        .map_err(|_| "missing GeoKeyDirectory".to_string())?;
    epsg_from_geokeys(&keys)
}

/// Resolve `EPSG:<code>` from a GeoKeyDirectory, preferring the projected key.
fn epsg_from_geokeys(keys: &[u16]) -> std::result::Result<String, String> {
    if keys.len() < 4 {
        return Err("truncated GeoKeyDirectory".to_string());
    }

    let mut projected = None;
    let mut geographic = None;
    for entry in keys[4..].chunks_exact(4).take(keys[3] as usize) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match key {
            PROJECTED_CS_TYPE_GEO_KEY => projected = Some(value),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(value),
            _ => {}
        }
    }

    match projected.or(geographic) {
        Some(USER_DEFINED) => Err("user-defined CRS is not supported".to_string()),
        Some(code) => Ok(format!("EPSG:{code}")),
        None => Err("no EPSG code in GeoKeyDirectory".to_string()),
    }
}

/// Band descriptions from a GDAL_METADATA document, keyed by 0-based sample.
///
/// Matches `<Item name="DESCRIPTION" sample="N" role="description">text</Item>`.
fn parse_band_descriptions(xml: &str) -> BTreeMap<usize, String> {
    let mut out = BTreeMap::new();

    for item in xml.split("<Item").skip(1) {
        let Some(close) = item.find('>') else {
            continue;
        };
        let (attrs, rest) = item.split_at(close);
        if !attrs.contains("role=\"description\"") {
            continue;
        }

        let sample = attrs
            .split("sample=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .and_then(|s| s.parse::<usize>().ok());
        let text = rest[1..].split("</Item>").next().map(str::trim);

        if let (Some(sample), Some(text)) = (sample, text) {
            if !text.is_empty() {
                out.insert(sample, text.to_string());
            }
        }
    }

    out
}

fn convert_decoding_result(result: DecodingResult) -> Vec<f64> {
    match result {
        DecodingResult::U8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::F16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::F32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::F64(data) => data,
    }
}
