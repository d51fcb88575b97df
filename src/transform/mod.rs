//! Pixel transforms: validity masks and vector tile encoding.

mod mask;
pub mod mvt;

pub use mask::reduce_mask;
pub use mvt::{decode_tile, FeatureType, LayerBuilder, PixelEncoder, TileEncoder};
