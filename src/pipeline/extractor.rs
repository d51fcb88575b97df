//! Windowed extraction of valid pixels as WGS84 point records.

use crate::error::{Error, Result};
use crate::index::{Window, WindowGrid};
use crate::io::{MaskedBlock, RasterSource};
use crate::transform::reduce_mask;
use ndarray::s;
use std::iter::FusedIterator;
use tracing::debug;

/// One valid pixel: its WGS84 centre and the value of every band.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub lon: f64,
    pub lat: f64,
    pub values: Vec<f64>,
}

/// Lazy stream of [`PointRecord`]s over a raster, one window at a time.
///
/// Records come out in window order, then row-major within a window. At most
/// one window's block and point batch are held. A read or reprojection error
/// is yielded once and ends the stream; build a new stream to start over.
pub struct PointStream<'a, S: RasterSource + ?Sized> {
    source: &'a S,
    windows: Box<dyn Iterator<Item = Window> + 'a>,
    batch: std::vec::IntoIter<PointRecord>,
    windows_read: usize,
    total_windows: usize,
    finished: bool,
}

impl<'a, S: RasterSource + ?Sized> PointStream<'a, S> {
    pub fn new(source: &'a S, blocksize: usize) -> Result<Self> {
        let grid = WindowGrid::new(source.width(), source.height(), blocksize)?;
        debug!(
            "Point stream over {}x{} raster: {} windows of {}px",
            source.width(),
            source.height(),
            grid.len(),
            blocksize
        );

        Ok(Self {
            source,
            total_windows: grid.len(),
            windows: Box::new(grid.iter()),
            batch: Vec::new().into_iter(),
            windows_read: 0,
            finished: false,
        })
    }

    /// Number of windows consumed so far.
    pub fn windows_read(&self) -> usize {
        self.windows_read
    }

    pub fn total_windows(&self) -> usize {
        self.total_windows
    }

    fn extract(&self, window: &Window) -> Result<Vec<PointRecord>> {
        let block = self.source.read_masked(window)?;
        check_shape(&block, window, self.source.band_count())?;

        let excluded = reduce_mask(&block.mask);
        let valid: Vec<(usize, usize)> = excluded
            .indexed_iter()
            .filter(|(_, excluded)| !**excluded)
            .map(|(pos, _)| pos)
            .collect();

        let mut coords: Vec<(f64, f64)> = valid
            .iter()
            .map(|&(row, col)| self.source.pixel_to_geo(window, row, col))
            .collect();
        self.source.reproject_to_wgs84(&mut coords)?;

        debug!(
            "Window ({}, {}) {}x{}: {} valid pixels",
            window.col_off,
            window.row_off,
            window.width,
            window.height,
            valid.len()
        );

        Ok(valid
            .into_iter()
            .zip(coords)
            .map(|((row, col), (lon, lat))| PointRecord {
                lon,
                lat,
                values: block.data.slice(s![.., row, col]).to_vec(),
            })
            .collect())
    }
}

fn check_shape(block: &MaskedBlock, window: &Window, bands: usize) -> Result<()> {
    let expected = (bands, window.height, window.width);
    if block.data.dim() != expected || block.mask.dim() != expected {
        return Err(Error::SourceRead(format!(
            "window {window:?} returned block of shape {:?}, expected {expected:?}",
            block.data.dim()
        )));
    }
    Ok(())
}

impl<S: RasterSource + ?Sized> Iterator for PointStream<'_, S> {
    type Item = Result<PointRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.batch.next() {
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }

            let Some(window) = self.windows.next() else {
                self.finished = true;
                return None;
            };
            self.windows_read += 1;

            match self.extract(&window) {
                Ok(batch) => self.batch = batch.into_iter(),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<S: RasterSource + ?Sized> FusedIterator for PointStream<'_, S> {}
