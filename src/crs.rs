//! Coordinate Reference System utilities.
//!
//! ## CRS used in this crate:
//!
//! - **Source CRS**: whatever the raster declares (e.g. EPSG:32610 UTM 10N).
//!   Pixel centres are expressed in it before reprojection.
//!
//! - **WGS84 (EPSG:4326)**: lon/lat in degrees. Point records and pyramid
//!   bounds are reported in it.
//!
//! - **Web Mercator (EPSG:3857)**: metres. Tile grids are laid out in it.
//!
//! ## Coordinate order convention:
//!
//! - Bounds arrays: `[min_x, min_y, max_x, max_y]` = `[west, south, east, north]`
//! - Coordinate pairs are always `(x, y)` / `(lon, lat)`.

/// Common CRS codes.
pub mod codes {
    /// WGS84 geographic coordinate system (lon/lat in degrees).
    pub const WGS84: &str = "EPSG:4326";

    /// Web Mercator, the projection of the XYZ tile grid.
    pub const WEB_MERCATOR: &str = "EPSG:3857";
}

use crate::error::{Error, Result};
use proj::Proj;
use std::f64::consts::PI;

/// Bounds in a specific CRS: [min_x, min_y, max_x, max_y]
pub type Bounds = [f64; 4];

/// Half the earth's circumference in Web Mercator metres.
pub const HALF_EARTH: f64 = 20_037_508.342_789_244;

/// Latitude at which Web Mercator Y reaches `HALF_EARTH`.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Whether two CRS identifiers name the same system.
pub fn same_crs(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Web Mercator X/Y (metres) to lon/lat (degrees).
#[inline]
pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = x * 180.0 / HALF_EARTH;
    let lat = (2.0 * (y * PI / HALF_EARTH).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

/// Lon/lat (degrees) to Web Mercator X/Y (metres).
#[inline]
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon * HALF_EARTH / 180.0;
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let y = (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() * HALF_EARTH / PI;
    (x, y)
}

enum Kind {
    Identity,
    MercatorToLonLat,
    LonLatToMercator,
    Proj(Proj),
}

/// A CRS-to-CRS transformation.
///
/// Identity and the spherical mercator <-> WGS84 pair are evaluated inline;
/// everything else goes through PROJ. `Proj` handles are not shareable across
/// threads, so each raster handle owns its own transformers.
pub struct Transformer {
    kind: Kind,
    from: String,
    to: String,
}

impl Transformer {
    pub fn new(from_crs: &str, to_crs: &str) -> Result<Self> {
        let kind = if same_crs(from_crs, to_crs) {
            Kind::Identity
        } else if same_crs(from_crs, codes::WEB_MERCATOR) && same_crs(to_crs, codes::WGS84) {
            Kind::MercatorToLonLat
        } else if same_crs(from_crs, codes::WGS84) && same_crs(to_crs, codes::WEB_MERCATOR) {
            Kind::LonLatToMercator
        } else {
            let proj = Proj::new_known_crs(from_crs, to_crs, None).map_err(|e| {
                Error::SourceRead(format!(
                    "Failed to create projection from {from_crs} to {to_crs}: {e}"
                ))
            })?;
            Kind::Proj(proj)
        };

        Ok(Self {
            kind,
            from: from_crs.to_string(),
            to: to_crs.to_string(),
        })
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.kind, Kind::Identity)
    }

    /// Transform a batch of coordinates in place with a single PROJ call.
    pub fn convert_in_place(&self, coords: &mut [(f64, f64)]) -> Result<()> {
        match &self.kind {
            Kind::Identity => Ok(()),
            Kind::MercatorToLonLat => {
                for c in coords.iter_mut() {
                    *c = mercator_to_lonlat(c.0, c.1);
                }
                Ok(())
            }
            Kind::LonLatToMercator => {
                for c in coords.iter_mut() {
                    *c = lonlat_to_mercator(c.0, c.1);
                }
                Ok(())
            }
            Kind::Proj(_) if coords.is_empty() => Ok(()),
            Kind::Proj(proj) => {
                let n = coords.len();
                proj.convert_array(coords).map_err(|e| {
                    Error::SourceRead(format!(
                        "Failed to transform {} points from {} to {}: {e}",
                        n,
                        self.from,
                        self.to
                    ))
                })?;
                Ok(())
            }
        }
    }

    /// Transform a single point.
    pub fn convert(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let mut point = [(x, y)];
        self.convert_in_place(&mut point)?;
        Ok(point[0])
    }
}

/// Transform bounds with edge sampling for better accuracy.
///
/// Samples `n_samples + 1` points along every edge so that non-linear
/// projections do not clip the result. Points that fail to project are skipped.
pub fn transform_bounds_with_densification(
    bounds: &Bounds,
    transformer: &Transformer,
    n_samples: usize,
) -> Result<Bounds> {
    if transformer.is_identity() {
        return Ok(*bounds);
    }

    let n_samples = n_samples.max(1);
    let mut points = Vec::with_capacity(4 * (n_samples + 1));
    for i in 0..=n_samples {
        let t = i as f64 / n_samples as f64;
        let x = bounds[0] + t * (bounds[2] - bounds[0]);
        let y = bounds[1] + t * (bounds[3] - bounds[1]);

        points.push((x, bounds[1]));
        points.push((x, bounds[3]));
        points.push((bounds[0], y));
        points.push((bounds[2], y));
    }

    transformer.convert_in_place(&mut points)?;

    let mut min_x = f64::MAX;
    let mut min_y = f64::MAX;
    let mut max_x = f64::MIN;
    let mut max_y = f64::MIN;

    for (tx, ty) in points.into_iter().filter(|(x, y)| x.is_finite() && y.is_finite()) {
        min_x = min_x.min(tx);
        min_y = min_y.min(ty);
        max_x = max_x.max(tx);
        max_y = max_y.max(ty);
    }

    if min_x > max_x || min_y > max_y {
        return Err(Error::SourceRead(format!(
            "No valid points when transforming bounds {bounds:?}"
        )));
    }

    Ok([min_x, min_y, max_x, max_y])
}

/// Compute the intersection of two bounding boxes.
///
/// Returns None if the boxes don't intersect.
pub fn intersect_bounds(a: &Bounds, b: &Bounds) -> Option<Bounds> {
    let min_x = a[0].max(b[0]);
    let min_y = a[1].max(b[1]);
    let max_x = a[2].min(b[2]);
    let max_y = a[3].min(b[3]);

    if min_x < max_x && min_y < max_y {
        Some([min_x, min_y, max_x, max_y])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mercator_roundtrip() {
        for (lon, lat) in [(0.0, 0.0), (-122.4, 37.8), (151.2, -33.9), (179.9, 85.0)] {
            let (x, y) = lonlat_to_mercator(lon, lat);
            let (lon2, lat2) = mercator_to_lonlat(x, y);
            assert!((lon - lon2).abs() < 1e-9, "lon {lon} -> {lon2}");
            assert!((lat - lat2).abs() < 1e-9, "lat {lat} -> {lat2}");
        }
    }

    #[test]
    fn test_mercator_extent() {
        let (lon, lat) = mercator_to_lonlat(HALF_EARTH, HALF_EARTH);
        assert!((lon - 180.0).abs() < 1e-9);
        assert!((lat - 85.051_128_779_806_59).abs() < 1e-9);
    }

    #[test]
    fn test_identity_transformer() {
        let t = Transformer::new("EPSG:4326", "epsg:4326").unwrap();
        assert!(t.is_identity());

        let mut coords = [(1.0, 2.0), (3.0, 4.0)];
        t.convert_in_place(&mut coords).unwrap();
        assert_eq!(coords, [(1.0, 2.0), (3.0, 4.0)]);
    }

    #[test]
    fn test_inline_mercator_transformers() {
        let to_merc = Transformer::new(codes::WGS84, codes::WEB_MERCATOR).unwrap();
        let to_wgs = Transformer::new(codes::WEB_MERCATOR, codes::WGS84).unwrap();
        assert!(!to_merc.is_identity());

        let (x, y) = to_merc.convert(180.0, 90.0).unwrap();
        assert!((x - HALF_EARTH).abs() < 1e-6);
        assert!((y - HALF_EARTH).abs() < 1e-3, "latitude is clamped, y = {y}");

        let (lon, lat) = to_wgs.convert(0.0, 0.0).unwrap();
        assert_eq!((lon, lat), (0.0, 0.0));
    }

    #[test]
    fn test_identity_bounds() {
        let t = Transformer::new(codes::WGS84, codes::WGS84).unwrap();
        let bounds = [-10.0, -5.0, 10.0, 5.0];
        assert_eq!(transform_bounds_with_densification(&bounds, &t, 10).unwrap(), bounds);
    }

    #[test]
    fn test_utm_to_wgs84() {
        let t = Transformer::new("EPSG:32610", codes::WGS84).unwrap();
        // Central meridian of UTM 10N is -123
        let (lon, lat) = t.convert(500_000.0, 4_000_000.0).unwrap();
        assert!((lon + 123.0).abs() < 1e-6, "lon = {lon}");
        assert!(lat > 36.0 && lat < 36.2, "lat = {lat}");
    }

    #[test]
    fn test_intersect_bounds() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert_eq!(intersect_bounds(&a, &[5.0, 5.0, 15.0, 15.0]), Some([5.0, 5.0, 10.0, 10.0]));
        assert_eq!(intersect_bounds(&a, &[20.0, 20.0, 30.0, 30.0]), None);
    }
}
