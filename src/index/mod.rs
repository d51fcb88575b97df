//! Spatial indexing: axis chunk plans, window grids and the tile pyramid.

mod chunk_plan;
mod tile_pyramid;
mod window_grid;

pub use chunk_plan::{plan, Chunk, ChunkPlan};
pub use tile_pyramid::{
    meters_per_pixel, zoom_for_pixel_size, zoom_range_for, TileCoordinate,
    TilePyramid, MAX_LATITUDE, MAX_ZOOM, TMS_TILE_SIZE,
};
pub use window_grid::{Window, WindowGrid};
