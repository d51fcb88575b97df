//! Web-mercator tile pyramid enumeration.
//!
//! Tiles follow the XYZ convention of the WebMercatorQuad tiling matrix set:
//! `x` grows eastwards from -180°, `y` grows southwards from +85.0511°.
//! Enumeration matches mercantile: the upper-left tile comes from the
//! north-west corner, the lower-right tile from the south-east corner nudged
//! inwards by [`LL_EPSILON`] so that bounds on a tile edge do not pull in the
//! neighbour.

use crate::crs::{self, Bounds};
use crate::error::{Error, Result};
use std::f64::consts::PI;
use std::fmt;
use std::ops::RangeInclusive;

/// Highest zoom level accepted for enumeration.
pub const MAX_ZOOM: u8 = 30;

/// Latitude limit of the web-mercator projection.
pub const MAX_LATITUDE: f64 = crs::MAX_LATITUDE;

/// Inwards nudge applied to the south-east corner.
const LL_EPSILON: f64 = 1e-11;

/// Guard against floating point error right on tile edges.
const TILE_EPSILON: f64 = 1e-14;

/// Pixel size of the tiling matrix set used for zoom selection.
pub const TMS_TILE_SIZE: usize = 256;

/// A single tile address in the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoordinate {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoordinate {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Output key relative to the pyramid root: `z/x/y.pbf`.
    pub fn key(&self) -> String {
        format!("{}/{}/{}.pbf", self.z, self.x, self.y)
    }

    /// Tile bounds in EPSG:3857 metres `[min_x, min_y, max_x, max_y]`.
    pub fn mercator_bounds(&self) -> Bounds {
        let n = (1u64 << self.z) as f64;
        let tile_span = 2.0 * crs::HALF_EARTH / n;

        let min_x = -crs::HALF_EARTH + self.x as f64 * tile_span;
        let max_y = crs::HALF_EARTH - self.y as f64 * tile_span;

        [min_x, max_y - tile_span, min_x + tile_span, max_y]
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Tile containing a WGS84 point at a zoom level.
fn tile_for_lnglat(lon: f64, lat: f64, zoom: u8) -> (u32, u32) {
    let x = lon / 360.0 + 0.5;
    let sinlat = lat.to_radians().sin();
    let y = 0.5 - 0.25 * ((1.0 + sinlat) / (1.0 - sinlat)).ln() / PI;

    let n = 1u64 << zoom;
    let to_index = |v: f64| -> u32 {
        if v <= 0.0 {
            0
        } else if v >= 1.0 {
            (n - 1) as u32
        } else {
            (((v + TILE_EPSILON) * n as f64).floor() as u64).min(n - 1) as u32
        }
    };

    (to_index(x), to_index(y))
}

/// Tiles at one zoom level: one or two column ranges (two when crossing the
/// antimeridian) times one row range.
#[derive(Debug, Clone)]
struct ZoomSpan {
    z: u8,
    x_ranges: Vec<RangeInclusive<u32>>,
    y_range: RangeInclusive<u32>,
}

impl ZoomSpan {
    fn count(&self) -> u64 {
        let rows = (*self.y_range.end() - *self.y_range.start()) as u64 + 1;
        self.x_ranges
            .iter()
            .map(|r| (*r.end() - *r.start()) as u64 + 1)
            .sum::<u64>()
            * rows
    }

    fn tiles(self) -> impl Iterator<Item = TileCoordinate> {
        let z = self.z;
        let y_range = self.y_range;
        self.x_ranges.into_iter().flat_map(move |xs| {
            let y_range = y_range.clone();
            xs.flat_map(move |x| y_range.clone().map(move |y| TileCoordinate::new(z, x, y)))
        })
    }
}

/// Every tile intersecting a WGS84 bounding box across `[minzoom, maxzoom]`.
#[derive(Debug, Clone)]
pub struct TilePyramid {
    bounds: Bounds,
    minzoom: u8,
    maxzoom: u8,
    spans: Vec<ZoomSpan>,
}

impl TilePyramid {
    /// Build the pyramid for `bounds` (`[west, south, east, north]` in degrees).
    ///
    /// A west edge greater than the east edge is treated as crossing the antimeridian.
    pub fn new(bounds: Bounds, minzoom: u8, maxzoom: u8) -> Result<Self> {
        if minzoom > maxzoom {
            return Err(Error::InvalidArgument(format!(
                "minzoom ({minzoom}) must not exceed maxzoom ({maxzoom})"
            )));
        }
        if maxzoom > MAX_ZOOM {
            return Err(Error::InvalidArgument(format!(
                "maxzoom ({maxzoom}) must not exceed {MAX_ZOOM}"
            )));
        }
        if bounds.iter().any(|v| !v.is_finite()) || bounds[1] > bounds[3] {
            return Err(Error::InvalidArgument(format!("invalid bounds {bounds:?}")));
        }

        let [west, south, east, north] = bounds;
        let boxes = if west > east {
            vec![[-180.0, south, east, north], [west, south, 180.0, north]]
        } else {
            vec![bounds]
        };

        let spans = (minzoom..=maxzoom)
            .map(|z| {
                let mut x_ranges: Vec<RangeInclusive<u32>> = Vec::with_capacity(2);
                let mut y_range = u32::MAX..=0;

                for [w, s, e, n] in &boxes {
                    let w = w.max(-180.0);
                    let s = s.max(-MAX_LATITUDE);
                    let e = e.min(180.0);
                    let n = n.min(MAX_LATITUDE);

                    let (ul_x, ul_y) = tile_for_lnglat(w, n, z);
                    let (lr_x, lr_y) = tile_for_lnglat(e - LL_EPSILON, s + LL_EPSILON, z);

                    // Degenerate (point or line) boxes still cover one tile.
                    let (x0, x1) = (ul_x.min(lr_x), ul_x.max(lr_x));
                    let (y0, y1) = (ul_y.min(lr_y), ul_y.max(lr_y));

                    x_ranges.push(x0..=x1);
                    y_range = (*y_range.start()).min(y0)..=(*y_range.end()).max(y1);
                }

                ZoomSpan {
                    z,
                    x_ranges: merge_ranges(x_ranges),
                    y_range,
                }
            })
            .collect();

        Ok(Self {
            bounds,
            minzoom,
            maxzoom,
            spans,
        })
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn minzoom(&self) -> u8 {
        self.minzoom
    }

    pub fn maxzoom(&self) -> u8 {
        self.maxzoom
    }

    /// Total number of tiles across all zoom levels, computed without enumeration.
    pub fn count(&self) -> u64 {
        self.spans.iter().map(ZoomSpan::count).sum()
    }

    /// Number of tiles at a single zoom level (0 if outside the range).
    pub fn count_at(&self, z: u8) -> u64 {
        self.spans
            .iter()
            .find(|s| s.z == z)
            .map_or(0, ZoomSpan::count)
    }

    /// Lazily enumerate tiles, zoom by zoom, column-major within a zoom.
    pub fn tiles(&self) -> impl Iterator<Item = TileCoordinate> + Send + 'static {
        self.spans.clone().into_iter().flat_map(ZoomSpan::tiles)
    }
}

/// Merge overlapping or touching column ranges so no tile is emitted twice.
fn merge_ranges(mut ranges: Vec<RangeInclusive<u32>>) -> Vec<RangeInclusive<u32>> {
    ranges.sort_by_key(|r| *r.start());

    let mut merged: Vec<RangeInclusive<u32>> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match merged.last_mut() {
            Some(last) if *r.start() <= last.end().saturating_add(1) => {
                *last = *last.start()..=(*last.end()).max(*r.end());
            }
            _ => merged.push(r),
        }
    }
    merged
}

/// Web-mercator metres per pixel at the equator for a zoom level.
pub fn meters_per_pixel(zoom: u8, tile_size: usize) -> f64 {
    2.0 * crs::HALF_EARTH / (tile_size as f64 * (1u64 << zoom) as f64)
}

/// Highest zoom whose pixel size is still at least `pixel_size` metres.
pub fn zoom_for_pixel_size(pixel_size: f64, tile_size: usize) -> u8 {
    const MAX_SEARCH_ZOOM: u8 = 24;

    for z in 0..MAX_SEARCH_ZOOM {
        if pixel_size > meters_per_pixel(z, tile_size) {
            return z.saturating_sub(1);
        }
    }
    MAX_SEARCH_ZOOM - 1
}

/// Derive `(minzoom, maxzoom)` from a raster's native web-mercator resolution.
///
/// The max zoom matches the native pixel size; the min zoom is the level at
/// which the whole raster fits in a single tile.
pub fn zoom_range_for(mercator_resolution: f64, width: usize, height: usize) -> (u8, u8) {
    let max_dim = width.max(height).max(1) as f64;
    let overview_resolution = mercator_resolution * max_dim / TMS_TILE_SIZE as f64;

    let maxzoom = zoom_for_pixel_size(mercator_resolution, TMS_TILE_SIZE);
    let minzoom = zoom_for_pixel_size(overview_resolution, TMS_TILE_SIZE).min(maxzoom);
    (minzoom, maxzoom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_world_tile_counts() {
        let pyramid = TilePyramid::new([-180.0, -90.0, 180.0, 90.0], 0, 3).unwrap();
        assert_eq!(pyramid.count_at(0), 1);
        assert_eq!(pyramid.count_at(1), 4);
        assert_eq!(pyramid.count_at(2), 16);
        assert_eq!(pyramid.count_at(3), 64);
        assert_eq!(pyramid.count(), 85);
        assert_eq!(pyramid.tiles().count() as u64, pyramid.count());
    }

    #[test]
    fn test_count_matches_enumeration_and_unique() {
        let cases = [
            ([-10.5, 40.2, 3.7, 51.1], 0, 9),
            ([0.0, 0.0, 0.0001, 0.0001], 5, 16),
            ([-122.6, 37.2, -121.8, 37.9], 3, 12),
        ];

        for (bounds, minzoom, maxzoom) in cases {
            let pyramid = TilePyramid::new(bounds, minzoom, maxzoom).unwrap();
            let tiles: Vec<_> = pyramid.tiles().collect();
            assert_eq!(tiles.len() as u64, pyramid.count());

            let unique: HashSet<_> = tiles.iter().collect();
            assert_eq!(unique.len(), tiles.len(), "duplicate tile for {bounds:?}");

            for z in minzoom..=maxzoom {
                assert!(tiles.iter().any(|t| t.z == z), "zoom {z} missing");
            }
        }
    }

    #[test]
    fn test_edge_aligned_bounds_do_not_spill() {
        // Exactly the north-east quadrant tile at z1.
        let pyramid = TilePyramid::new([0.0, 0.0, 180.0, MAX_LATITUDE], 1, 1).unwrap();
        let tiles: Vec<_> = pyramid.tiles().collect();
        assert_eq!(tiles, vec![TileCoordinate::new(1, 1, 0)]);
    }

    #[test]
    fn test_antimeridian_split_without_duplicates() {
        let pyramid = TilePyramid::new([170.0, -10.0, -170.0, 10.0], 0, 2).unwrap();
        let tiles: Vec<_> = pyramid.tiles().collect();
        let unique: HashSet<_> = tiles.iter().collect();

        assert_eq!(unique.len(), tiles.len());
        assert_eq!(pyramid.count_at(0), 1);
        // z2: columns 0 and 3, rows 1 and 2
        assert_eq!(pyramid.count_at(2), 4);
        assert!(tiles.contains(&TileCoordinate::new(2, 0, 1)));
        assert!(tiles.contains(&TileCoordinate::new(2, 3, 2)));
    }

    #[test]
    fn test_invalid_zoom_range() {
        assert!(matches!(
            TilePyramid::new([0.0, 0.0, 1.0, 1.0], 5, 4),
            Err(Error::InvalidArgument(_))
        ));
        assert!(TilePyramid::new([0.0, 0.0, 1.0, 1.0], 0, 31).is_err());
    }

    #[test]
    fn test_mercator_bounds() {
        let b = TileCoordinate::new(0, 0, 0).mercator_bounds();
        assert!((b[0] + crs::HALF_EARTH).abs() < 1e-6);
        assert!((b[3] - crs::HALF_EARTH).abs() < 1e-6);

        let b = TileCoordinate::new(1, 1, 1).mercator_bounds();
        assert!(b[0].abs() < 1e-6);
        assert!(b[3].abs() < 1e-6);
        assert!((b[2] - crs::HALF_EARTH).abs() < 1e-6);
    }

    #[test]
    fn test_key_format() {
        assert_eq!(TileCoordinate::new(7, 65, 42).key(), "7/65/42.pbf");
    }

    #[test]
    fn test_zoom_for_pixel_size() {
        // Slightly coarser than z10 pixels -> z9
        let z10 = meters_per_pixel(10, 256);
        assert_eq!(zoom_for_pixel_size(z10 * 1.01, 256), 9);
        // Exactly z10 pixels -> z10
        assert_eq!(zoom_for_pixel_size(z10, 256), 10);
        // Coarser than z0 clamps to 0
        assert_eq!(zoom_for_pixel_size(1e9, 256), 0);
    }

    #[test]
    fn test_zoom_range_for() {
        let res = meters_per_pixel(12, 256);
        let (minzoom, maxzoom) = zoom_range_for(res, 4096, 2048);
        assert_eq!(maxzoom, 12);
        // 4096 px = 16 tiles wide at z12 -> one tile at z8
        assert_eq!(minzoom, 8);
    }
}
