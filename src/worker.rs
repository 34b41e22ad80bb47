use log::{debug, info};
use thiserror::Error;

use crate::matrix::{Matrix, MatrixError};
use crate::partition::{partition_rows, PartitionError, RowPartition};
use crate::transport::{MessageTag, Transport, TransportError};

/// Rank that owns the inputs and assembles the output.
pub const ROOT_RANK: usize = 0;

#[derive(Debug, Error)]
pub enum MultiplyError {
    #[error(
        "Shape mismatch: A is {a_rows}x{a_cols}, B is {b_rows}x{b_cols}, C is {c_rows}x{c_cols}"
    )]
    Shape {
        a_rows: usize,
        a_cols: usize,
        b_rows: usize,
        b_cols: usize,
        c_rows: usize,
        c_cols: usize,
    },

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Check `A: m x k`, `B: k x n`, `C: m x n`.
pub fn check_shapes(a: &Matrix, b: &Matrix, c: &Matrix) -> Result<(), MultiplyError> {
    if a.cols() != b.rows() || c.rows() != a.rows() || c.cols() != b.cols() {
        return Err(MultiplyError::Shape {
            a_rows: a.rows(),
            a_cols: a.cols(),
            b_rows: b.rows(),
            b_cols: b.cols(),
            c_rows: c.rows(),
            c_cols: c.cols(),
        });
    }
    Ok(())
}

/// Fill rows `part` of `c` with `A * B`.
///
/// Each output cell is reset to zero and then accumulated over `k` in
/// ascending order, so results are bit-for-bit reproducible against
/// [`Matrix::multiply`].
pub fn compute_rows(a: &Matrix, b: &Matrix, c: &mut Matrix, part: RowPartition) {
    let inner = b.rows();
    let a_cols = a.cols();
    let n = c.cols();
    let a_vals = a.values();
    let b_vals = b.values();
    let out = c.values_mut();

    for i in part.rows() {
        for j in 0..n {
            let idx = i * n + j;
            out[idx] = 0.0;
            for k in 0..inner {
                out[idx] += a_vals[i * a_cols + k] * b_vals[k * n + j];
            }
        }
    }
}

/// One participant in the SPMD multiply.
///
/// Every rank builds a `RankWorker` over its own transport endpoint and calls
/// [`RankWorker::multiply`] with the same shapes. Only rank 0 needs real
/// input values; only rank 0's output is meaningful afterwards.
pub struct RankWorker<T: Transport> {
    rank: usize,
    size: usize,
    transport: T,
}

impl<T: Transport> RankWorker<T> {
    pub fn new(transport: T) -> Self {
        let rank = transport.rank();
        let size = transport.size();
        RankWorker {
            rank,
            size,
            transport,
        }
    }

    /// Get the worker's rank
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Rows of the output this rank computes.
    pub fn partition(&self, output_rows: usize) -> Result<RowPartition, PartitionError> {
        partition_rows(output_rows, self.size, self.rank)
    }

    /// Distributed `C = A * B`.
    ///
    /// On return rank 0's `c` holds the full product. Other ranks' `c` hold
    /// whatever they computed locally and should be ignored.
    pub fn multiply(
        &self,
        a: &mut Matrix,
        b: &mut Matrix,
        c: &mut Matrix,
    ) -> Result<(), MultiplyError> {
        check_shapes(a, b, c)?;
        let part = self.partition(c.rows())?;
        debug!(
            "[Rank {}] owns rows [{}, {}) of {}x{}",
            self.rank,
            part.start,
            part.end,
            c.rows(),
            c.cols()
        );

        self.distribute(a, b)?;

        compute_rows(a, b, c, part);
        debug!("[Rank {}] computed {} rows", self.rank, part.len());

        if self.rank == ROOT_RANK {
            self.gather(c)?;
            info!("[Rank {}] assembled {}x{} product", self.rank, c.rows(), c.cols());
        } else {
            self.send_rows(c, part)?;
        }
        Ok(())
    }

    /// Replicate rank 0's `a` and `b` onto every rank.
    pub fn distribute(&self, a: &mut Matrix, b: &mut Matrix) -> Result<(), TransportError> {
        self.transport.broadcast(ROOT_RANK, a.values_mut())?;
        self.transport.broadcast(ROOT_RANK, b.values_mut())?;
        debug!(
            "[Rank {}] received A ({} values) and B ({} values)",
            self.rank,
            a.len(),
            b.len()
        );
        Ok(())
    }

    fn send_rows(&self, c: &Matrix, part: RowPartition) -> Result<(), MultiplyError> {
        if part.is_empty() {
            debug!("[Rank {}] empty partition, nothing to send", self.rank);
            return Ok(());
        }
        let block = c.row_block(part.start, part.end)?;
        self.transport
            .send(block, ROOT_RANK, MessageTag::row_block(self.rank))?;
        debug!("[Rank {}] sent {} values to rank {}", self.rank, block.len(), ROOT_RANK);
        Ok(())
    }

    /// Post one receive per non-empty remote partition, then wait for all.
    fn gather(&self, c: &mut Matrix) -> Result<(), MultiplyError> {
        let rows = c.rows();
        let cols = c.cols();
        let own = partition_rows(rows, self.size, ROOT_RANK)?;

        // Partitions are contiguous in rank order, so peeling blocks off the
        // front of the remainder lands each one at its own row offset.
        let (_, mut rest) = c.values_mut().split_at_mut(own.end * cols);
        let mut pending = Vec::with_capacity(self.size.saturating_sub(1));

        for source in 1..self.size {
            let part = partition_rows(rows, self.size, source)?;
            if part.is_empty() {
                continue;
            }
            let (block, tail) = std::mem::take(&mut rest).split_at_mut(part.len() * cols);
            rest = tail;
            pending.push(self.transport.immediate_receive(
                block,
                source,
                MessageTag::row_block(source),
            )?);
        }

        debug!("[Rank {}] waiting on {} receives", self.rank, pending.len());
        self.transport.wait_all(pending)?;
        Ok(())
    }
}
