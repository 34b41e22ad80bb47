//! Block-row decomposition of the output matrix.
//!
//! Every rank evaluates [`partition_rows`] independently and gets the same
//! answer, so no communication is needed to agree on who owns which rows.

use std::ops::Range;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Rank count must be at least 1")]
    NoRanks,

    #[error("Rank {rank} outside group of {size}")]
    RankOutOfRange { rank: usize, size: usize },
}

/// Contiguous half-open row range `[start, end)` owned by one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPartition {
    pub start: usize,
    pub end: usize,
}

impl RowPartition {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn rows(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Range of flat row-major indices covered by these rows in a matrix
    /// with `cols` columns.
    pub fn flat_range(&self, cols: usize) -> Range<usize> {
        self.start * cols..self.end * cols
    }
}

/// Rows per rank: `ceil(rows / size)`.
pub fn chunk_size(rows: usize, size: usize) -> usize {
    rows.div_ceil(size)
}

/// Row range of an `rows`-row output owned by `rank` in a group of `size`.
///
/// The last non-empty range is truncated at `rows`. Ranks past the end of the
/// matrix get an empty range pinned at `rows..rows`.
pub fn partition_rows(
    rows: usize,
    size: usize,
    rank: usize,
) -> Result<RowPartition, PartitionError> {
    if size == 0 {
        return Err(PartitionError::NoRanks);
    }
    if rank >= size {
        return Err(PartitionError::RankOutOfRange { rank, size });
    }

    let chunk = chunk_size(rows, size);
    let start = (rank * chunk).min(rows);
    let end = ((rank + 1) * chunk).min(rows);
    Ok(RowPartition { start, end })
}
