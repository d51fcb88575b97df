//! Cover a raster with bounded windows, row-major.

use super::chunk_plan::{plan, Chunk, ChunkPlan};
use crate::error::Result;

/// A rectangular pixel sub-region of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    /// Column offset from the left edge
    pub col_off: usize,
    /// Row offset from the top edge
    pub row_off: usize,
    /// Width in pixels
    pub width: usize,
    /// Height in pixels
    pub height: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    /// Cross product of a column chunk and a row chunk.
    pub fn from_chunks(cols: Chunk, rows: Chunk) -> Self {
        Self::new(cols.offset, rows.offset, cols.size, rows.size)
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// Window set tiling `[0, width) x [0, height)`.
#[derive(Debug, Clone)]
pub struct WindowGrid {
    rows: ChunkPlan,
    cols: ChunkPlan,
}

impl WindowGrid {
    /// Build the grid for a `width x height` raster with square `blocksize` windows.
    pub fn new(width: usize, height: usize, blocksize: usize) -> Result<Self> {
        Ok(Self {
            rows: plan(height, blocksize)?,
            cols: plan(width, blocksize)?,
        })
    }

    /// Number of windows in the grid.
    pub fn len(&self) -> usize {
        self.rows.num_chunks() * self.cols.num_chunks()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazily enumerate windows: every column window of a row before the next row.
    pub fn iter(&self) -> impl Iterator<Item = Window> + Clone + 'static {
        let cols = self.cols.clone();
        self.rows
            .clone()
            .flat_map(move |row| cols.clone().map(move |col| Window::from_chunks(col, row)))
    }
}
