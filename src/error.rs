//! Error taxonomy shared by the point stream and the tile pyramid pipeline.

use crate::index::TileCoordinate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Caller configuration error (non-positive sizes, bad zoom range, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Reading or decoding a window, tile or header from a raster source failed.
    #[error("Source read error: {0}")]
    SourceRead(String),

    /// Converting pixel data to output bytes failed.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Persisting output (metadata, a tile, a point line) failed.
    #[error("Write error: {0}")]
    Write(String),

    /// At least one tile of a pyramid run failed; wraps the first collected failure.
    #[error("Tile {tile} failed: {source}")]
    TileEncode {
        tile: TileCoordinate,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a per-tile failure into the aggregate pyramid error.
    pub fn tile_encode(tile: TileCoordinate, source: Error) -> Self {
        Error::TileEncode {
            tile,
            source: Box::new(source),
        }
    }
}

impl From<tiff::TiffError> for Error {
    fn from(e: tiff::TiffError) -> Self {
        Error::SourceRead(format!("TIFF decode failed: {e}"))
    }
}

impl From<proj::ProjError> for Error {
    fn from(e: proj::ProjError) -> Self {
        Error::SourceRead(format!("Reprojection failed: {e}"))
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        Error::Write(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
