//! MPI backend over rsmpi.
//!
//! rsmpi aborts the job on communication errors, so every call here either
//! succeeds or never returns; the `Result`s only carry rank validation.

use ::mpi::topology::SimpleCommunicator;
use ::mpi::traits::*;

use super::{check_rank, MessageTag, Transport, TransportError};

/// Transport over an MPI communicator (normally `MPI_COMM_WORLD`).
pub struct MpiTransport<C: Communicator = SimpleCommunicator> {
    world: C,
    rank: usize,
    size: usize,
}

impl<C: Communicator> MpiTransport<C> {
    pub fn new(world: C) -> Self {
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        MpiTransport { world, rank, size }
    }
}

/// Receive registered with [`MpiTransport::immediate_receive`].
///
/// rsmpi ties request lifetimes to a lexical scope, so the underlying
/// `MPI_Irecv` is issued when the handle reaches `wait_all`. There every
/// handle joins one request collection, completed by a single `MPI_Waitall`.
pub struct MpiReceive<'buf> {
    buf: &'buf mut [f64],
    source: i32,
    tag: i32,
}

impl<C: Communicator> Transport for MpiTransport<C> {
    type Pending<'buf> = MpiReceive<'buf>;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast(&self, root: usize, buf: &mut [f64]) -> Result<(), TransportError> {
        check_rank(root, self.size)?;
        self.world.process_at_rank(root as i32).broadcast_into(buf);
        Ok(())
    }

    fn broadcast_counts(&self, root: usize, buf: &mut [u64]) -> Result<(), TransportError> {
        check_rank(root, self.size)?;
        self.world.process_at_rank(root as i32).broadcast_into(buf);
        Ok(())
    }

    fn send(&self, buf: &[f64], dest: usize, tag: MessageTag) -> Result<(), TransportError> {
        check_rank(dest, self.size)?;
        self.world
            .process_at_rank(dest as i32)
            .send_with_tag(buf, tag.raw());
        Ok(())
    }

    fn immediate_receive<'buf>(
        &self,
        buf: &'buf mut [f64],
        source: usize,
        tag: MessageTag,
    ) -> Result<MpiReceive<'buf>, TransportError> {
        check_rank(source, self.size)?;
        Ok(MpiReceive {
            buf,
            source: source as i32,
            tag: tag.raw(),
        })
    }

    fn wait_all<'buf>(&self, pending: Vec<MpiReceive<'buf>>) -> Result<(), TransportError> {
        ::mpi::request::multiple_scope(pending.len(), |scope, requests| {
            for receive in pending {
                let request = self
                    .world
                    .process_at_rank(receive.source)
                    .immediate_receive_into_with_tag(scope, receive.buf, receive.tag);
                requests.add(request);
            }

            let mut statuses = Vec::new();
            requests.wait_all(&mut statuses);
        });
        Ok(())
    }
}
