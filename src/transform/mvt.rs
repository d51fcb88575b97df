//! Per-pixel Mapbox Vector Tile encoding.
//!
//! Every valid pixel of a tile block becomes one feature carrying the value
//! of each band as a double property.

use crate::error::{Error, Result};
use crate::io::MaskedBlock;
use crate::transform::reduce_mask;
use prost::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Default tile extent (4096 as per MVT spec)
pub const DEFAULT_EXTENT: u32 = 4096;

/// MVT layer version written by the encoder.
pub const MVT_VERSION: u32 = 2;

/// Protobuf schema of `vector_tile.proto` (MVT 2.1).
pub mod vector_tile {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Tile {
        #[prost(message, repeated, tag = "3")]
        pub layers: Vec<Layer>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Value {
        #[prost(string, optional, tag = "1")]
        pub string_value: Option<String>,
        #[prost(float, optional, tag = "2")]
        pub float_value: Option<f32>,
        #[prost(double, optional, tag = "3")]
        pub double_value: Option<f64>,
        #[prost(int64, optional, tag = "4")]
        pub int_value: Option<i64>,
        #[prost(uint64, optional, tag = "5")]
        pub uint_value: Option<u64>,
        #[prost(sint64, optional, tag = "6")]
        pub sint_value: Option<i64>,
        #[prost(bool, optional, tag = "7")]
        pub bool_value: Option<bool>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Feature {
        #[prost(uint64, optional, tag = "1")]
        pub id: Option<u64>,
        #[prost(uint32, repeated, packed = "true", tag = "2")]
        pub tags: Vec<u32>,
        #[prost(enumeration = "GeomType", optional, tag = "3")]
        pub r#type: Option<i32>,
        #[prost(uint32, repeated, packed = "true", tag = "4")]
        pub geometry: Vec<u32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Layer {
        #[prost(uint32, required, tag = "15")]
        pub version: u32,
        #[prost(string, required, tag = "1")]
        pub name: String,
        #[prost(message, repeated, tag = "2")]
        pub features: Vec<Feature>,
        #[prost(string, repeated, tag = "3")]
        pub keys: Vec<String>,
        #[prost(message, repeated, tag = "4")]
        pub values: Vec<Value>,
        #[prost(uint32, optional, tag = "5")]
        pub extent: Option<u32>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum GeomType {
        Unknown = 0,
        Point = 1,
        Linestring = 2,
        Polygon = 3,
    }
}

use vector_tile::{Feature, GeomType, Layer, Tile, Value};

/// Geometry emitted for each pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    /// The pixel footprint as a square.
    #[default]
    Polygon,
    /// The pixel centre.
    Point,
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureType::Polygon => write!(f, "polygon"),
            FeatureType::Point => write!(f, "point"),
        }
    }
}

/// Converts a masked tile block into encoded tile bytes.
pub trait TileEncoder: Send + Sync {
    fn encode(
        &self,
        block: &MaskedBlock,
        band_names: &[String],
        layer_name: &str,
        feature_type: FeatureType,
    ) -> Result<Vec<u8>>;
}

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

#[inline]
fn command(id: u32, count: u32) -> u32 {
    (id & 0x7) | (count << 3)
}

#[inline]
fn zigzag(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

/// Builds a layer with deduplicated key and value tables.
pub struct LayerBuilder {
    name: String,
    extent: u32,
    features: Vec<Feature>,
    keys: Vec<String>,
    key_index: HashMap<String, u32>,
    values: Vec<Value>,
    value_index: HashMap<u64, u32>,
}

impl LayerBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            extent: DEFAULT_EXTENT,
            features: Vec::new(),
            keys: Vec::new(),
            key_index: HashMap::new(),
            values: Vec::new(),
            value_index: HashMap::new(),
        }
    }

    pub fn with_extent(mut self, extent: u32) -> Self {
        self.extent = extent;
        self
    }

    fn key(&mut self, key: &str) -> u32 {
        if let Some(&i) = self.key_index.get(key) {
            return i;
        }
        let i = self.keys.len() as u32;
        self.keys.push(key.to_string());
        self.key_index.insert(key.to_string(), i);
        i
    }

    fn double_value(&mut self, value: f64) -> u32 {
        let bits = value.to_bits();
        if let Some(&i) = self.value_index.get(&bits) {
            return i;
        }
        let i = self.values.len() as u32;
        self.values.push(Value {
            double_value: Some(value),
            ..Default::default()
        });
        self.value_index.insert(bits, i);
        i
    }

    /// Add a feature with double-valued properties.
    pub fn add_feature(&mut self, geom_type: GeomType, geometry: Vec<u32>, properties: &[(&str, f64)]) {
        let mut tags = Vec::with_capacity(properties.len() * 2);
        for &(key, value) in properties {
            tags.push(self.key(key));
            tags.push(self.double_value(value));
        }

        self.features.push(Feature {
            id: Some(self.features.len() as u64),
            tags,
            r#type: Some(geom_type as i32),
            geometry,
        });
    }

    pub fn build(self) -> Layer {
        Layer {
            version: MVT_VERSION,
            name: self.name,
            features: self.features,
            keys: self.keys,
            values: self.values,
            extent: Some(self.extent),
        }
    }
}

/// Square ring from `(x0, y0)` to `(x1, y1)`, clockwise in tile space.
fn square_geometry(x0: i32, y0: i32, x1: i32, y1: i32) -> Vec<u32> {
    vec![
        command(CMD_MOVE_TO, 1),
        zigzag(x0),
        zigzag(y0),
        command(CMD_LINE_TO, 3),
        zigzag(x1 - x0),
        zigzag(0),
        zigzag(0),
        zigzag(y1 - y0),
        zigzag(x0 - x1),
        zigzag(0),
        command(CMD_CLOSE_PATH, 1),
    ]
}

fn point_geometry(x: i32, y: i32) -> Vec<u32> {
    vec![command(CMD_MOVE_TO, 1), zigzag(x), zigzag(y)]
}

/// One feature per valid pixel, as polygons or points.
#[derive(Debug, Clone)]
pub struct PixelEncoder {
    extent: u32,
}

impl Default for PixelEncoder {
    fn default() -> Self {
        Self {
            extent: DEFAULT_EXTENT,
        }
    }
}

impl PixelEncoder {
    pub fn new(extent: u32) -> Self {
        Self { extent }
    }

    /// Build the single-layer tile for `block`.
    pub fn build_tile(
        &self,
        block: &MaskedBlock,
        band_names: &[String],
        layer_name: &str,
        feature_type: FeatureType,
    ) -> Result<Tile> {
        if band_names.len() != block.bands() {
            return Err(Error::Encode(format!(
                "{} band names for a {}-band block",
                band_names.len(),
                block.bands()
            )));
        }
        if self.extent == 0 {
            return Err(Error::Encode("tile extent must be > 0".to_string()));
        }

        let (rows, cols) = (block.rows(), block.cols());
        let mut layer = LayerBuilder::new(layer_name).with_extent(self.extent);
        if rows == 0 || cols == 0 {
            return Ok(Tile {
                layers: vec![layer.build()],
            });
        }

        let sx = self.extent as f64 / cols as f64;
        let sy = self.extent as f64 / rows as f64;
        let excluded = reduce_mask(&block.mask);

        let mut properties: Vec<(&str, f64)> = Vec::with_capacity(band_names.len());
        for ((row, col), &skip) in excluded.indexed_iter() {
            if skip {
                continue;
            }

            let geometry = match feature_type {
                FeatureType::Polygon => square_geometry(
                    (col as f64 * sx).round() as i32,
                    (row as f64 * sy).round() as i32,
                    ((col + 1) as f64 * sx).round() as i32,
                    ((row + 1) as f64 * sy).round() as i32,
                ),
                FeatureType::Point => point_geometry(
                    ((col as f64 + 0.5) * sx).round() as i32,
                    ((row as f64 + 0.5) * sy).round() as i32,
                ),
            };
            let geom_type = match feature_type {
                FeatureType::Polygon => GeomType::Polygon,
                FeatureType::Point => GeomType::Point,
            };

            properties.clear();
            properties.extend(
                band_names
                    .iter()
                    .enumerate()
                    .map(|(b, name)| (name.as_str(), block.data[[b, row, col]])),
            );
            layer.add_feature(geom_type, geometry, &properties);
        }

        Ok(Tile {
            layers: vec![layer.build()],
        })
    }
}

impl TileEncoder for PixelEncoder {
    fn encode(
        &self,
        block: &MaskedBlock,
        band_names: &[String],
        layer_name: &str,
        feature_type: FeatureType,
    ) -> Result<Vec<u8>> {
        Ok(self
            .build_tile(block, band_names, layer_name, feature_type)?
            .encode_to_vec())
    }
}

/// Decode MVT bytes, mainly for inspection.
pub fn decode_tile(data: &[u8]) -> Result<Tile> {
    Tile::decode(data).map_err(|e| Error::Encode(format!("Failed to decode tile: {e}")))
}
