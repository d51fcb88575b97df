//! Raster sources, point output and pyramid storage.

mod geotiff;
mod points_writer;
mod raster;
mod store;

pub use geotiff::{GeoTiffOpener, GeoTiffSource};
pub use points_writer::PointWriter;
pub use raster::{
    ArrayRaster, ArrayRasterOpener, ArrayRasterSource, GeoTransform, MaskedBlock, RasterSource,
    SourceOpener, TileSampler,
};
pub use store::{create_output_store, parse_s3_uri, TileStore, METADATA_KEY};
