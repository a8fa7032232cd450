//! Work shapes and the chunking function that produces them.
//!
//! A [`WorkShape`] is an immutable, cheaply clonable sequence of
//! [`Chunk`]s. Shapes produced by [`chunk_shape`] tile `[start, start+count)`
//! in order with no gaps; hand-built shapes may describe anything.

use std::ops::{Deref, Range};
use std::sync::Arc;

use crate::policy::ExecutionParameters;

/// One work descriptor: a position and the number of elements it stands for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub start: usize,
    pub len: usize,
}

impl Chunk {
    #[inline]
    pub const fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }
}

/// How [`chunk_shape`] sizes chunks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChunkSize {
    /// About four chunks per worker context.
    #[default]
    Auto,
    /// Fixed chunk length; the last chunk may be shorter. `0` is treated as `1`.
    Static(usize),
}

/// Chunks per worker context targeted by [`ChunkSize::Auto`].
const AUTO_CHUNKS_PER_WORKER: usize = 4;

impl ChunkSize {
    /// Chunk length for `count` items over `workers` contexts.
    pub fn resolve(self, workers: usize, count: usize) -> usize {
        match self {
            ChunkSize::Static(n) => n.max(1),
            ChunkSize::Auto => {
                let target = workers.max(1).saturating_mul(AUTO_CHUNKS_PER_WORKER);
                count.div_ceil(target).max(1)
            }
        }
    }
}

/// Immutable ordered sequence of chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkShape(Arc<[Chunk]>);

impl WorkShape {
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    /// Unit chunks `[i, i+1)` for every `i` in `range`.
    pub fn indices(range: Range<usize>) -> Self {
        range.map(|i| Chunk::new(i, 1)).collect()
    }

    /// Total elements covered by all chunks.
    pub fn total_len(&self) -> usize {
        self.0.iter().map(|c| c.len).sum()
    }
}

impl Deref for WorkShape {
    type Target = [Chunk];

    fn deref(&self) -> &[Chunk] {
        &self.0
    }
}

impl FromIterator<Chunk> for WorkShape {
    fn from_iter<I: IntoIterator<Item = Chunk>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<Chunk>> for WorkShape {
    fn from(v: Vec<Chunk>) -> Self {
        Self(Arc::from(v))
    }
}

/// Split `[start, start+count)` into chunks per `params.chunk_size`.
///
/// Deterministic in its inputs; `count == 0` gives an empty shape.
pub fn chunk_shape(
    params: &ExecutionParameters,
    workers: usize,
    start: usize,
    count: usize,
) -> WorkShape {
    if count == 0 {
        return WorkShape::empty();
    }
    let len = params.chunk_size.resolve(workers, count);
    (0..count)
        .step_by(len)
        .map(|off| Chunk::new(start + off, len.min(count - off)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(chunk_size: ChunkSize) -> ExecutionParameters {
        ExecutionParameters {
            chunk_size,
            ..ExecutionParameters::default()
        }
    }

    fn assert_tiles(shape: &WorkShape, start: usize, count: usize) {
        let mut next = start;
        for c in shape.iter() {
            assert_eq!(c.start, next, "gap or overlap at {next}");
            assert!(c.len > 0);
            next = c.end();
        }
        assert_eq!(next, start + count);
        assert_eq!(shape.total_len(), count);
    }

    #[test]
    fn static_chunks_keep_a_short_tail() {
        let s = chunk_shape(&params(ChunkSize::Static(4)), 2, 10, 10);
        assert_eq!(
            &*s,
            &[Chunk::new(10, 4), Chunk::new(14, 4), Chunk::new(18, 2)]
        );
        assert_tiles(&s, 10, 10);
    }

    #[test]
    fn auto_targets_four_chunks_per_worker() {
        let s = chunk_shape(&params(ChunkSize::Auto), 4, 0, 160);
        assert_eq!(s.len(), 16);
        assert!(s.iter().all(|c| c.len == 10));

        // Fewer items than targeted chunks: unit chunks.
        let s = chunk_shape(&params(ChunkSize::Auto), 8, 0, 5);
        assert_eq!(s.len(), 5);
        assert_tiles(&s, 0, 5);
    }

    #[test]
    fn zero_static_size_and_zero_count() {
        let s = chunk_shape(&params(ChunkSize::Static(0)), 1, 0, 3);
        assert_eq!(s.len(), 3);
        assert!(chunk_shape(&params(ChunkSize::Auto), 4, 7, 0).is_empty());
    }

    #[test]
    fn indices_shape() {
        let s = WorkShape::indices(3..6);
        assert_eq!(&*s, &[Chunk::new(3, 1), Chunk::new(4, 1), Chunk::new(5, 1)]);
    }
}
