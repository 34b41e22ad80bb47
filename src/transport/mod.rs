//! Message-passing primitives consumed by the rank worker.
//!
//! [`Transport`] is the only channel between ranks. Two backends exist:
//! [`local`] runs every rank as a thread in this process, and `mpi` (behind
//! the `mpi` feature) wraps an rsmpi communicator.

pub mod local;
#[cfg(feature = "mpi")]
pub mod mpi;

use thiserror::Error;

pub use local::{LocalCluster, LocalReceive, LocalTransport, TrafficEvent};
#[cfg(feature = "mpi")]
pub use self::mpi::{MpiReceive, MpiTransport};

/// Errors reported by a transport backend.
///
/// None of these are expected in a correct run; callers treat them as fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Rank {rank} outside group of {size}")]
    InvalidRank { rank: usize, size: usize },

    #[error("Message from rank {sender} (tag {tag}) carried {actual} values, expected {expected}")]
    LengthMismatch {
        sender: usize,
        tag: i32,
        expected: usize,
        actual: usize,
    },

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Rank {0} panicked; the group cannot make progress")]
    PeerPanicked(usize),
}

/// What a point-to-point message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// A sender's computed rows of the output matrix.
    RowBlock,
}

/// Explicit `(source rank, purpose)` message key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageTag {
    pub source: usize,
    pub purpose: Purpose,
}

impl MessageTag {
    pub fn row_block(source: usize) -> Self {
        MessageTag {
            source,
            purpose: Purpose::RowBlock,
        }
    }

    /// Wire tag value. A row block is tagged with its sender's rank id.
    pub fn raw(&self) -> i32 {
        match self.purpose {
            Purpose::RowBlock => self.source as i32,
        }
    }
}

/// Message-passing runtime seen from one rank.
///
/// Posting a receive and waiting for it are separate calls: a rank posts
/// every receive it expects first and then blocks once in
/// [`Transport::wait_all`], so inbound transfers can overlap.
pub trait Transport {
    /// Handle for a posted receive. Borrows the target buffer until waited on.
    type Pending<'buf>;

    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Collective broadcast of `buf` from `root`; every rank must call it.
    fn broadcast(&self, root: usize, buf: &mut [f64]) -> Result<(), TransportError>;

    /// Collective broadcast of integer metadata (shapes, status flags).
    fn broadcast_counts(&self, root: usize, buf: &mut [u64]) -> Result<(), TransportError>;

    /// Blocking send; returns once the transport has accepted `buf`.
    fn send(&self, buf: &[f64], dest: usize, tag: MessageTag) -> Result<(), TransportError>;

    /// Post a receive of exactly `buf.len()` values from `source`. Never blocks.
    fn immediate_receive<'buf>(
        &self,
        buf: &'buf mut [f64],
        source: usize,
        tag: MessageTag,
    ) -> Result<Self::Pending<'buf>, TransportError>;

    /// Block until every handle has completed. An empty set returns at once.
    fn wait_all<'buf>(&self, pending: Vec<Self::Pending<'buf>>) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    type Pending<'buf> = T::Pending<'buf>;

    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn broadcast(&self, root: usize, buf: &mut [f64]) -> Result<(), TransportError> {
        (**self).broadcast(root, buf)
    }

    fn broadcast_counts(&self, root: usize, buf: &mut [u64]) -> Result<(), TransportError> {
        (**self).broadcast_counts(root, buf)
    }

    fn send(&self, buf: &[f64], dest: usize, tag: MessageTag) -> Result<(), TransportError> {
        (**self).send(buf, dest, tag)
    }

    fn immediate_receive<'buf>(
        &self,
        buf: &'buf mut [f64],
        source: usize,
        tag: MessageTag,
    ) -> Result<Self::Pending<'buf>, TransportError> {
        (**self).immediate_receive(buf, source, tag)
    }

    fn wait_all<'buf>(&self, pending: Vec<Self::Pending<'buf>>) -> Result<(), TransportError> {
        (**self).wait_all(pending)
    }
}

pub(crate) fn check_rank(rank: usize, size: usize) -> Result<(), TransportError> {
    if rank >= size {
        return Err(TransportError::InvalidRank { rank, size });
    }
    Ok(())
}
