//! Partition one axis of a raster into fixed-size chunks.

use crate::error::{Error, Result};

/// Half-open pixel range `[offset, offset + size)` along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub offset: usize,
    pub size: usize,
}

impl Chunk {
    /// One past the last pixel covered by this chunk.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Ordered chunks covering `[0, total)`.
///
/// Every chunk except the last has `size == chunk`; the last one is
/// truncated so that the sizes sum to `total`. Cloning the plan restarts it.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    total: usize,
    chunk: usize,
    next: usize,
    count: usize,
}

/// Plan the chunks for an extent of `total` pixels.
///
/// ```
/// use pixel_pyramid::index::plan;
///
/// let sizes: Vec<_> = plan(522, 256).unwrap().map(|c| (c.offset, c.size)).collect();
/// assert_eq!(sizes, vec![(0, 256), (256, 256), (512, 10)]);
/// ```
pub fn plan(total: usize, chunk: usize) -> Result<ChunkPlan> {
    if chunk == 0 {
        return Err(Error::InvalidArgument("chunk size must be > 0".to_string()));
    }

    Ok(ChunkPlan {
        total,
        chunk,
        next: 0,
        count: total.div_ceil(chunk),
    })
}

impl ChunkPlan {
    /// Total number of chunks in the plan, independent of iteration state.
    pub fn num_chunks(&self) -> usize {
        self.count
    }
}

impl Iterator for ChunkPlan {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next >= self.count {
            return None;
        }

        let offset = self.next * self.chunk;
        let size = self.chunk.min(self.total - offset);
        self.next += 1;

        Some(Chunk { offset, size })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkPlan {}
