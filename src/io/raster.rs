//! Raster source abstraction.
//!
//! A [`RasterSource`] is a single open handle on a georeferenced, multi-band
//! raster. Handles are not required to be thread-safe: concurrent consumers
//! each obtain their own handle through a [`SourceOpener`].

use crate::crs::{self, codes, Bounds, Transformer};
use crate::error::{Error, Result};
use crate::index::{TileCoordinate, Window};
use ndarray::{s, Array3};
use std::sync::Arc;

/// Affine geotransform for converting between pixel and world coordinates.
///
/// The transform is defined by 6 coefficients from the GDAL-style affine:
/// ```text
/// x_world = a * col + b * row + c
/// y_world = d * col + e * row + f
/// ```
///
/// For most GeoTIFFs:
/// - `a` is the pixel width (x resolution)
/// - `e` is the pixel height (y resolution, negative for top-down images)
/// - `c` is the x coordinate of the upper-left corner
/// - `f` is the y coordinate of the upper-left corner
/// - `b` and `d` are typically 0 (no rotation/shear)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// Pixel width (x scale)
    pub a: f64,
    /// Row rotation (typically 0)
    pub b: f64,
    /// X origin (upper-left x coordinate)
    pub c: f64,
    /// Column rotation (typically 0)
    pub d: f64,
    /// Pixel height (y scale, negative for top-down)
    pub e: f64,
    /// Y origin (upper-left y coordinate)
    pub f: f64,
}

impl GeoTransform {
    /// North-up transform from an origin and pixel size.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            a: pixel_width,
            b: 0.0,
            c: origin_x,
            d: 0.0,
            e: -pixel_height.abs(),
            f: origin_y,
        }
    }

    /// Create a GeoTransform from the 16-element ModelTransformationTag matrix.
    ///
    /// The matrix is a 4x4 affine transform in row-major order:
    /// ```text
    /// | a  b  0  c |
    /// | d  e  0  f |
    /// | 0  0  0  0 |
    /// | 0  0  0  1 |
    /// ```
    pub fn from_model_transformation(matrix: &[f64]) -> Option<Self> {
        if matrix.len() < 8 {
            return None;
        }
        Some(Self {
            a: matrix[0],
            b: matrix[1],
            c: matrix[3],
            d: matrix[4],
            e: matrix[5],
            f: matrix[7],
        })
    }

    /// Create a GeoTransform from ModelPixelScaleTag and ModelTiepointTag.
    ///
    /// The tiepoint maps raster `(i, j)` to model `(x, y)`; the Y scale is
    /// stored positive and applied downwards.
    pub fn from_tiepoint_scale(tiepoint: &[f64], scale: &[f64]) -> Option<Self> {
        if tiepoint.len() < 6 || scale.len() < 2 {
            return None;
        }
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        let (sx, sy) = (scale[0], scale[1]);

        Some(Self {
            a: sx,
            b: 0.0,
            c: x - i * sx,
            d: 0.0,
            e: -sy,
            f: y + j * sy,
        })
    }

    /// Convert world coordinates to pixel coordinates.
    ///
    /// Returns (column, row) as floating point for sub-pixel precision.
    #[inline]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.a * self.e - self.b * self.d;
        let dx = x - self.c;
        let dy = y - self.f;
        let col = (self.e * dx - self.b * dy) / det;
        let row = (self.a * dy - self.d * dx) / det;
        (col, row)
    }

    /// Convert pixel coordinates to world coordinates.
    ///
    /// Takes (column, row) and returns (x, y) in the CRS.
    #[inline]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.a * col + self.b * row + self.c;
        let y = self.d * col + self.e * row + self.f;
        (x, y)
    }

    /// Native-CRS bounds of a `width x height` raster.
    pub fn bounds(&self, width: usize, height: usize) -> Bounds {
        let (w, h) = (width as f64, height as f64);
        let corners = [
            self.pixel_to_world(0.0, 0.0),
            self.pixel_to_world(w, 0.0),
            self.pixel_to_world(0.0, h),
            self.pixel_to_world(w, h),
        ];

        let mut bounds = [f64::MAX, f64::MAX, f64::MIN, f64::MIN];
        for (x, y) in corners {
            bounds[0] = bounds[0].min(x);
            bounds[1] = bounds[1].min(y);
            bounds[2] = bounds[2].max(x);
            bounds[3] = bounds[3].max(y);
        }
        bounds
    }
}

/// Pixel values plus a validity mask, both shaped `(bands, rows, cols)`.
///
/// `mask[[b, r, c]] == true` means the value of band `b` at `(r, c)` is invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedBlock {
    pub data: Array3<f64>,
    pub mask: Array3<bool>,
}

impl MaskedBlock {
    pub fn new(data: Array3<f64>, mask: Array3<bool>) -> Result<Self> {
        if data.dim() != mask.dim() {
            return Err(Error::InvalidArgument(format!(
                "data shape {:?} does not match mask shape {:?}",
                data.dim(),
                mask.dim()
            )));
        }
        Ok(Self { data, mask })
    }

    /// A block where every value is masked.
    pub fn fully_masked(bands: usize, rows: usize, cols: usize) -> Self {
        Self {
            data: Array3::zeros((bands, rows, cols)),
            mask: Array3::from_elem((bands, rows, cols), true),
        }
    }

    pub fn bands(&self) -> usize {
        self.data.dim().0
    }

    pub fn rows(&self) -> usize {
        self.data.dim().1
    }

    pub fn cols(&self) -> usize {
        self.data.dim().2
    }
}

/// One open handle on a georeferenced raster.
pub trait RasterSource {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    fn band_count(&self) -> usize;

    /// One name per band: the band description when present, else `"1".."N"`.
    fn band_names(&self) -> Vec<String>;

    /// CRS identifier understood by PROJ, e.g. `EPSG:32610`.
    fn crs(&self) -> &str;

    fn transform(&self) -> GeoTransform;

    /// Read every band over `window` with its validity mask.
    fn read_masked(&self, window: &Window) -> Result<MaskedBlock>;

    /// Resample the raster onto a `tile_size x tile_size` web-mercator tile.
    ///
    /// Pixels outside the raster are masked in every band.
    fn read_tile_window(&self, tile: &TileCoordinate, tile_size: usize) -> Result<MaskedBlock>;

    /// Batch-reproject source CRS coordinates to WGS84 lon/lat in place.
    fn reproject_to_wgs84(&self, coords: &mut [(f64, f64)]) -> Result<()>;

    /// Source CRS coordinate of the centre of pixel `(row, col)` of `window`.
    fn pixel_to_geo(&self, window: &Window, row: usize, col: usize) -> (f64, f64) {
        self.transform().pixel_to_world(
            (window.col_off + col) as f64 + 0.5,
            (window.row_off + row) as f64 + 0.5,
        )
    }

    /// Extent in WGS84 `[west, south, east, north]`.
    fn geographic_bounds(&self) -> Result<Bounds> {
        let native = self.transform().bounds(self.width(), self.height());
        let to_wgs84 = Transformer::new(self.crs(), codes::WGS84)?;
        crs::transform_bounds_with_densification(&native, &to_wgs84, 21)
    }

    /// Native resolution in web-mercator metres: the coarser of the X and Y
    /// pixel sizes of the extent projected to EPSG:3857.
    fn mercator_resolution(&self) -> Result<f64> {
        let native = self.transform().bounds(self.width(), self.height());
        let to_mercator = Transformer::new(self.crs(), codes::WEB_MERCATOR)?;
        let merc = crs::transform_bounds_with_densification(&native, &to_mercator, 21)?;

        let x_res = (merc[2] - merc[0]) / self.width().max(1) as f64;
        let y_res = (merc[3] - merc[1]) / self.height().max(1) as f64;
        Ok(x_res.max(y_res))
    }
}

/// Factory for independent [`RasterSource`] handles, shared by worker threads.
pub trait SourceOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn RasterSource>>;

    /// Human-readable identifier for logs.
    fn describe(&self) -> String;
}

/// Maps the centres of a web-mercator tile's pixels onto source pixels.
pub struct TileSampler {
    from_mercator: Transformer,
    transform: GeoTransform,
    width: usize,
    height: usize,
}

impl TileSampler {
    pub fn new(crs: &str, transform: GeoTransform, width: usize, height: usize) -> Result<Self> {
        Ok(Self {
            from_mercator: Transformer::new(codes::WEB_MERCATOR, crs)?,
            transform,
            width,
            height,
        })
    }

    /// Source `(row, col)` for every tile pixel in row-major order, `None`
    /// where the pixel centre falls outside the raster.
    pub fn positions(
        &self,
        tile: &TileCoordinate,
        tile_size: usize,
    ) -> Result<Vec<Option<(usize, usize)>>> {
        if tile_size == 0 {
            return Err(Error::InvalidArgument("tile size must be > 0".to_string()));
        }

        let [min_x, min_y, max_x, max_y] = tile.mercator_bounds();
        let step_x = (max_x - min_x) / tile_size as f64;
        let step_y = (max_y - min_y) / tile_size as f64;

        let mut coords = Vec::with_capacity(tile_size * tile_size);
        for r in 0..tile_size {
            let y = max_y - (r as f64 + 0.5) * step_y;
            for c in 0..tile_size {
                coords.push((min_x + (c as f64 + 0.5) * step_x, y));
            }
        }

        self.from_mercator.convert_in_place(&mut coords)?;

        Ok(coords
            .into_iter()
            .map(|(x, y)| {
                let (col, row) = self.transform.world_to_pixel(x, y);
                let inside = col.is_finite()
                    && row.is_finite()
                    && col >= 0.0
                    && row >= 0.0
                    && col < self.width as f64
                    && row < self.height as f64;
                inside.then(|| (row as usize, col as usize))
            })
            .collect())
    }
}

/// In-memory raster shared between handles.
#[derive(Debug)]
pub struct ArrayRaster {
    data: Array3<f64>,
    mask: Array3<bool>,
    transform: GeoTransform,
    crs: String,
    band_names: Vec<String>,
}

impl ArrayRaster {
    pub fn new(block: MaskedBlock, transform: GeoTransform, crs: impl Into<String>) -> Self {
        let band_names = (1..=block.bands()).map(|b| b.to_string()).collect();
        Self {
            data: block.data,
            mask: block.mask,
            transform,
            crs: crs.into(),
            band_names,
        }
    }

    pub fn with_band_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.len() != self.data.dim().0 {
            return Err(Error::InvalidArgument(format!(
                "{} band names for {} bands",
                names.len(),
                self.data.dim().0
            )));
        }
        self.band_names = names;
        Ok(self)
    }

    /// Wrap the raster in an opener that hands out independent handles.
    pub fn into_opener(self) -> ArrayRasterOpener {
        ArrayRasterOpener {
            raster: Arc::new(self),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArrayRasterOpener {
    raster: Arc<ArrayRaster>,
}

impl ArrayRasterOpener {
    pub fn open_array(&self) -> Result<ArrayRasterSource> {
        ArrayRasterSource::new(Arc::clone(&self.raster))
    }
}

impl SourceOpener for ArrayRasterOpener {
    fn open(&self) -> Result<Box<dyn RasterSource>> {
        Ok(Box::new(self.open_array()?))
    }

    fn describe(&self) -> String {
        let (bands, rows, cols) = self.raster.data.dim();
        format!("in-memory {cols}x{rows}x{bands} raster ({})", self.raster.crs)
    }
}

/// Handle on an [`ArrayRaster`] with its own PROJ transformers.
pub struct ArrayRasterSource {
    raster: Arc<ArrayRaster>,
    to_wgs84: Transformer,
    sampler: TileSampler,
}

impl ArrayRasterSource {
    fn new(raster: Arc<ArrayRaster>) -> Result<Self> {
        let (_, height, width) = raster.data.dim();
        Ok(Self {
            to_wgs84: Transformer::new(&raster.crs, codes::WGS84)?,
            sampler: TileSampler::new(&raster.crs, raster.transform, width, height)?,
            raster,
        })
    }
}

impl RasterSource for ArrayRasterSource {
    fn width(&self) -> usize {
        self.raster.data.dim().2
    }

    fn height(&self) -> usize {
        self.raster.data.dim().1
    }

    fn band_count(&self) -> usize {
        self.raster.data.dim().0
    }

    fn band_names(&self) -> Vec<String> {
        self.raster.band_names.clone()
    }

    fn crs(&self) -> &str {
        &self.raster.crs
    }

    fn transform(&self) -> GeoTransform {
        self.raster.transform
    }

    fn read_masked(&self, window: &Window) -> Result<MaskedBlock> {
        let row_end = window.row_off + window.height;
        let col_end = window.col_off + window.width;
        if row_end > self.height() || col_end > self.width() {
            return Err(Error::SourceRead(format!(
                "window {window:?} exceeds raster {}x{}",
                self.width(),
                self.height()
            )));
        }

        let rows = window.row_off..row_end;
        let cols = window.col_off..col_end;
        Ok(MaskedBlock {
            data: self.raster.data.slice(s![.., rows.clone(), cols.clone()]).to_owned(),
            mask: self.raster.mask.slice(s![.., rows, cols]).to_owned(),
        })
    }

    fn read_tile_window(&self, tile: &TileCoordinate, tile_size: usize) -> Result<MaskedBlock> {
        let positions = self.sampler.positions(tile, tile_size)?;
        let mut block = MaskedBlock::fully_masked(self.band_count(), tile_size, tile_size);

        for (i, pos) in positions.into_iter().enumerate() {
            let Some((src_row, src_col)) = pos else {
                continue;
            };
            let (r, c) = (i / tile_size, i % tile_size);
            for b in 0..self.band_count() {
                block.data[[b, r, c]] = self.raster.data[[b, src_row, src_col]];
                block.mask[[b, r, c]] = self.raster.mask[[b, src_row, src_col]];
            }
        }

        Ok(block)
    }

    fn reproject_to_wgs84(&self, coords: &mut [(f64, f64)]) -> Result<()> {
        self.to_wgs84.convert_in_place(coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn raster(bands: usize, rows: usize, cols: usize) -> ArrayRaster {
        let data = Array3::from_shape_fn((bands, rows, cols), |(b, r, c)| {
            (b * 10_000 + r * 100 + c) as f64
        });
        let mask = Array3::from_elem((bands, rows, cols), false);
        ArrayRaster::new(
            MaskedBlock::new(data, mask).unwrap(),
            GeoTransform::north_up(-10.0, 10.0, 1.0, 1.0),
            codes::WGS84,
        )
    }

    #[test]
    fn test_geotransform_roundtrip_with_rotation() {
        let gt = GeoTransform {
            a: 2.0,
            b: 0.5,
            c: 100.0,
            d: 0.25,
            e: -3.0,
            f: 50.0,
        };
        let (x, y) = gt.pixel_to_world(7.5, 3.25);
        let (col, row) = gt.world_to_pixel(x, y);
        assert!((col - 7.5).abs() < 1e-9);
        assert!((row - 3.25).abs() < 1e-9);
    }

    #[test]
    fn test_from_tiepoint_scale() {
        let gt = GeoTransform::from_tiepoint_scale(
            &[0.0, 0.0, 0.0, 440_720.0, 3_751_320.0, 0.0],
            &[60.0, 60.0, 0.0],
        )
        .unwrap();
        assert_eq!(gt, GeoTransform::north_up(440_720.0, 3_751_320.0, 60.0, 60.0));
        assert!(GeoTransform::from_tiepoint_scale(&[0.0; 3], &[1.0, 1.0]).is_none());
    }

    #[test]
    fn test_bounds() {
        let gt = GeoTransform::north_up(-10.0, 10.0, 0.5, 0.25);
        assert_eq!(gt.bounds(40, 80), [-10.0, -10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_masked_block_shape_mismatch() {
        let data = Array3::zeros((1, 2, 2));
        let mask = Array3::from_elem((1, 2, 3), false);
        assert!(matches!(MaskedBlock::new(data, mask), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_pixel_to_geo_uses_centres() {
        let source = raster(1, 20, 20).into_opener().open_array().unwrap();
        let window = Window::new(2, 3, 4, 4);
        assert_eq!(source.pixel_to_geo(&window, 0, 0), (-7.5, 6.5));
        assert_eq!(source.pixel_to_geo(&window, 1, 2), (-5.5, 5.5));
    }

    #[test]
    fn test_read_masked_window() {
        let source = raster(2, 5, 6).into_opener().open_array().unwrap();
        let block = source.read_masked(&Window::new(4, 3, 2, 2)).unwrap();

        assert_eq!((block.bands(), block.rows(), block.cols()), (2, 2, 2));
        assert_eq!(block.data[[0, 0, 0]], 304.0);
        assert_eq!(block.data[[1, 1, 1]], 10_405.0);
        assert!(source.read_masked(&Window::new(5, 0, 2, 1)).is_err());
    }

    #[test]
    fn test_geographic_bounds_identity() {
        let source = raster(1, 20, 20).into_opener().open_array().unwrap();
        assert_eq!(source.geographic_bounds().unwrap(), [-10.0, -10.0, 10.0, 10.0]);
        assert_eq!(source.band_names(), vec!["1".to_string()]);
    }

    #[test]
    fn test_band_name_count_checked() {
        assert!(raster(2, 2, 2).with_band_names(vec!["red".to_string()]).is_err());
    }

    #[test]
    fn test_tile_window_masks_outside_pixels() {
        let source = raster(1, 20, 20).into_opener().open_array().unwrap();

        // z0 covers the world; the raster occupies a small patch around (0, 0).
        let block = source.read_tile_window(&TileCoordinate::new(0, 0, 0), 256).unwrap();
        assert_eq!((block.rows(), block.cols()), (256, 256));

        let valid = block.mask.iter().filter(|m| !**m).count();
        assert!(valid > 0 && valid < 256 * 256, "valid = {valid}");
        assert!(block.mask[[0, 0, 0]]);
        assert!(!block.mask[[0, 128, 128]]);
    }

    #[test]
    fn test_tile_window_outside_raster_is_fully_masked() {
        let source = raster(1, 20, 20).into_opener().open_array().unwrap();
        let block = source.read_tile_window(&TileCoordinate::new(4, 0, 0), 16).unwrap();
        assert!(block.mask.iter().all(|m| *m));
    }
}
