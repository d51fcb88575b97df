//! MBTiles-style `metadata.json` describing a tile pyramid.
//!
//! See <https://github.com/mapbox/mbtiles-spec/blob/master/1.3/spec.md#metadata>.

use crate::crs::Bounds;
use crate::error::{Error, Result};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Summary of a pyramid, written once before any tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidMetadata {
    pub name: String,
    pub description: String,
    pub version: u32,
    pub minzoom: u8,
    pub maxzoom: u8,
    /// `"lon,lat,zoom"`
    pub center: String,
    /// `"west,south,east,north"`
    pub bounds: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    /// JSON-encoded vector layer descriptor.
    pub json: String,
}

struct Fields<'a>(&'a [String]);

impl Serialize for Fields<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (i, band) in self.0.iter().enumerate() {
            if !self.0[..i].contains(band) {
                map.serialize_entry(band, "Number")?;
            }
        }
        map.end()
    }
}

#[derive(Serialize)]
struct VectorLayer<'a> {
    id: &'a str,
    minzoom: u8,
    maxzoom: u8,
    fields: Fields<'a>,
}

#[derive(Serialize)]
struct VectorLayers<'a> {
    vector_layers: [VectorLayer<'a>; 1],
}

/// Decimal rendering that keeps a fractional part on whole numbers (`10.0`).
fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

impl PyramidMetadata {
    /// Build the metadata for a pyramid over WGS84 `bounds`.
    ///
    /// Every band is declared as a numeric field of the `name` layer.
    pub fn new(name: &str, bounds: Bounds, minzoom: u8, maxzoom: u8, band_names: &[String]) -> Result<Self> {
        let lon_center = (bounds[0] + bounds[2]) / 2.0;
        let lat_center = (bounds[1] + bounds[3]) / 2.0;

        let layers = VectorLayers {
            vector_layers: [VectorLayer {
                id: name,
                minzoom,
                maxzoom,
                fields: Fields(band_names),
            }],
        };
        let json = serde_json::to_string(&layers)
            .map_err(|e| Error::Encode(format!("Failed to encode vector layers: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            description: name.to_string(),
            version: 1,
            minzoom,
            maxzoom,
            center: format!(
                "{},{},{}",
                format_float(lon_center),
                format_float(lat_center),
                minzoom
            ),
            bounds: bounds.iter().map(|v| format_float(*v)).collect::<Vec<_>>().join(","),
            kind: "overlay".to_string(),
            format: "pbf".to_string(),
            json,
        })
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Encode(format!("Failed to encode metadata: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_fields() {
        let names = vec!["red".to_string(), "nir".to_string()];
        let meta = PyramidMetadata::new("cog", [10.0, 44.0, 18.0, 50.5], 3, 9, &names).unwrap();

        assert_eq!(meta.description, "cog");
        assert_eq!(meta.version, 1);
        assert_eq!(meta.center, "14.0,47.25,3");
        assert_eq!(meta.bounds, "10.0,44.0,18.0,50.5");
        assert_eq!(meta.kind, "overlay");
        assert_eq!(meta.format, "pbf");
        assert_eq!(
            meta.json,
            r#"{"vector_layers":[{"id":"cog","minzoom":3,"maxzoom":9,"fields":{"red":"Number","nir":"Number"}}]}"#
        );
    }

    #[test]
    fn test_serialized_document() {
        let meta = PyramidMetadata::new("layer", [-1.5, -1.0, 1.5, 1.0], 0, 2, &["1".to_string()]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&meta.to_json_bytes().unwrap()).unwrap();

        assert_eq!(value["type"], "overlay");
        assert_eq!(value["minzoom"], 0);
        assert_eq!(value["maxzoom"], 2);
        assert_eq!(value["bounds"], "-1.5,-1.0,1.5,1.0");

        let layers: serde_json::Value = serde_json::from_str(value["json"].as_str().unwrap()).unwrap();
        assert_eq!(layers["vector_layers"][0]["fields"]["1"], "Number");
    }

    #[test]
    fn test_duplicate_band_names_declared_once() {
        let names = vec!["a".to_string(), "a".to_string()];
        let meta = PyramidMetadata::new("x", [0.0, 0.0, 1.0, 1.0], 0, 0, &names).unwrap();
        assert!(meta.json.contains(r#""fields":{"a":"Number"}"#));
    }
}
