//! In-process transport: one thread per rank, mailboxes in shared memory.
//!
//! Ranks never touch each other's matrices. Every value crosses through a
//! mailbox as an owned copy, the same way it would cross a network.
//!
//! ```
//! use spmd_matmul::transport::{LocalCluster, Transport};
//!
//! let cluster = LocalCluster::new(3);
//! let ranks = cluster.run(|transport| transport.rank());
//! assert_eq!(ranks, vec![0, 1, 2]);
//! ```

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use log::trace;
use parking_lot::{Condvar, Mutex};

use super::{check_rank, MessageTag, Transport, TransportError};

/// One observable transport action, recorded in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafficEvent {
    Broadcast {
        rank: usize,
        root: usize,
        len: usize,
    },
    Send {
        source: usize,
        dest: usize,
        tag: i32,
        len: usize,
    },
    PostReceive {
        rank: usize,
        source: usize,
        tag: i32,
        len: usize,
    },
    WaitAll {
        rank: usize,
        handles: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Channel {
    Tagged(i32),
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MailKey {
    source: usize,
    dest: usize,
    channel: Channel,
}

#[derive(Debug)]
enum Payload {
    Values(Vec<f64>),
    Counts(Vec<u64>),
}

impl Payload {
    fn len(&self) -> usize {
        match self {
            Payload::Values(v) => v.len(),
            Payload::Counts(v) => v.len(),
        }
    }
}

struct State {
    mailboxes: HashMap<MailKey, VecDeque<Payload>>,
    // generation barrier
    waiting: usize,
    generation: u64,
    // first rank that panicked
    poisoned: Option<usize>,
}

struct Shared {
    size: usize,
    state: Mutex<State>,
    changed: Condvar,
    traffic: Mutex<Vec<TrafficEvent>>,
}

impl Shared {
    fn deliver(&self, key: MailKey, payload: Payload) {
        self.state
            .lock()
            .mailboxes
            .entry(key)
            .or_default()
            .push_back(payload);
        self.changed.notify_all();
    }

    /// Block until a message is queued under `key`, then dequeue it.
    fn take(&self, key: MailKey) -> Result<Payload, TransportError> {
        let mut state = self.state.lock();
        loop {
            if let Some(payload) = state.mailboxes.get_mut(&key).and_then(VecDeque::pop_front) {
                return Ok(payload);
            }
            if let Some(rank) = state.poisoned {
                return Err(TransportError::PeerPanicked(rank));
            }
            self.changed.wait(&mut state);
        }
    }

    /// Block until all `size` ranks have arrived.
    fn barrier(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if let Some(rank) = state.poisoned {
            return Err(TransportError::PeerPanicked(rank));
        }

        let generation = state.generation;
        state.waiting += 1;
        if state.waiting == self.size {
            state.waiting = 0;
            state.generation += 1;
            self.changed.notify_all();
            return Ok(());
        }

        while state.generation == generation {
            if let Some(rank) = state.poisoned {
                return Err(TransportError::PeerPanicked(rank));
            }
            self.changed.wait(&mut state);
        }
        Ok(())
    }

    /// Wake every blocked rank; only the first panicking rank is kept.
    fn poison(&self, rank: usize) {
        let mut state = self.state.lock();
        if state.poisoned.is_none() {
            state.poisoned = Some(rank);
        }
        drop(state);
        self.changed.notify_all();
    }

    fn record(&self, event: TrafficEvent) {
        self.traffic.lock().push(event);
    }
}

/// A group of in-process ranks sharing one set of mailboxes.
pub struct LocalCluster {
    shared: Arc<Shared>,
}

impl LocalCluster {
    /// Create a group of `size` ranks.
    ///
    /// # Panics
    /// Panics if `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "a cluster needs at least one rank");
        LocalCluster {
            shared: Arc::new(Shared {
                size,
                state: Mutex::new(State {
                    mailboxes: HashMap::new(),
                    waiting: 0,
                    generation: 0,
                    poisoned: None,
                }),
                changed: Condvar::new(),
                traffic: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// Endpoint for `rank`. Each rank's endpoint must be driven by its own thread.
    pub fn endpoint(&self, rank: usize) -> Result<LocalTransport, TransportError> {
        check_rank(rank, self.shared.size)?;
        Ok(LocalTransport {
            rank,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Run `f` once per rank, each on its own thread, and return the results
    /// in rank order.
    ///
    /// A panic on any rank wakes the others, whose blocked transport calls
    /// then fail with [`TransportError::PeerPanicked`]. Once every thread has
    /// finished, the first rank's panic is re-raised here.
    pub fn run<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(LocalTransport) -> R + Sync,
        R: Send,
    {
        let f = &f;
        let outcomes: Vec<thread::Result<R>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.shared.size)
                .map(|rank| {
                    let transport = LocalTransport {
                        rank,
                        shared: Arc::clone(&self.shared),
                    };
                    let shared = Arc::clone(&self.shared);
                    scope.spawn(move || {
                        panic::catch_unwind(AssertUnwindSafe(|| f(transport))).map_err(|e| {
                            shared.poison(rank);
                            e
                        })
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(Err))
                .collect()
        });

        let first_panic = self.shared.state.lock().poisoned;
        let mut results = Vec::with_capacity(outcomes.len());
        let mut panics = Vec::new();
        for (rank, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(value) => results.push(value),
                Err(payload) => panics.push((rank, payload)),
            }
        }
        if !panics.is_empty() {
            let index = panics
                .iter()
                .position(|(rank, _)| Some(*rank) == first_panic)
                .unwrap_or(0);
            panic::resume_unwind(panics.swap_remove(index).1);
        }
        results
    }

    /// Snapshot of every transport action so far.
    pub fn traffic(&self) -> Vec<TrafficEvent> {
        self.shared.traffic.lock().clone()
    }
}

/// One rank's view of a [`LocalCluster`].
pub struct LocalTransport {
    rank: usize,
    shared: Arc<Shared>,
}

/// Posted receive on a [`LocalTransport`].
#[derive(Debug)]
pub struct LocalReceive<'buf> {
    buf: &'buf mut [f64],
    source: usize,
    tag: i32,
}

impl LocalTransport {
    fn broadcast_payload(
        &self,
        root: usize,
        len: usize,
        outgoing: impl Fn() -> Payload,
    ) -> Result<Option<Payload>, TransportError> {
        check_rank(root, self.shared.size)?;
        self.shared.record(TrafficEvent::Broadcast {
            rank: self.rank,
            root,
            len,
        });

        let incoming = if self.rank == root {
            for dest in (0..self.shared.size).filter(|&d| d != root) {
                let key = MailKey {
                    source: root,
                    dest,
                    channel: Channel::Broadcast,
                };
                self.shared.deliver(key, outgoing());
            }
            Ok(None)
        } else {
            let key = MailKey {
                source: root,
                dest: self.rank,
                channel: Channel::Broadcast,
            };
            let payload = self.shared.take(key)?;
            if payload.len() == len {
                Ok(Some(payload))
            } else {
                Err(TransportError::LengthMismatch {
                    sender: root,
                    tag: -1,
                    expected: len,
                    actual: payload.len(),
                })
            }
        };

        // Every rank reaches the barrier, even one whose copy failed.
        self.shared.barrier()?;
        trace!("[Rank {}] broadcast from {} done ({} values)", self.rank, root, len);
        incoming
    }
}

impl Transport for LocalTransport {
    type Pending<'buf> = LocalReceive<'buf>;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn broadcast(&self, root: usize, buf: &mut [f64]) -> Result<(), TransportError> {
        let snapshot = &*buf;
        match self.broadcast_payload(root, snapshot.len(), || Payload::Values(snapshot.to_vec()))? {
            None => Ok(()),
            Some(Payload::Values(values)) => {
                buf.copy_from_slice(&values);
                Ok(())
            }
            Some(Payload::Counts(_)) => Err(TransportError::Protocol(format!(
                "rank {} expected values from broadcast root {}, got counts",
                self.rank, root
            ))),
        }
    }

    fn broadcast_counts(&self, root: usize, buf: &mut [u64]) -> Result<(), TransportError> {
        let snapshot = &*buf;
        match self.broadcast_payload(root, snapshot.len(), || Payload::Counts(snapshot.to_vec()))? {
            None => Ok(()),
            Some(Payload::Counts(counts)) => {
                buf.copy_from_slice(&counts);
                Ok(())
            }
            Some(Payload::Values(_)) => Err(TransportError::Protocol(format!(
                "rank {} expected counts from broadcast root {}, got values",
                self.rank, root
            ))),
        }
    }

    fn send(&self, buf: &[f64], dest: usize, tag: MessageTag) -> Result<(), TransportError> {
        check_rank(dest, self.shared.size)?;
        self.shared.record(TrafficEvent::Send {
            source: self.rank,
            dest,
            tag: tag.raw(),
            len: buf.len(),
        });
        let key = MailKey {
            source: self.rank,
            dest,
            channel: Channel::Tagged(tag.raw()),
        };
        self.shared.deliver(key, Payload::Values(buf.to_vec()));
        Ok(())
    }

    fn immediate_receive<'buf>(
        &self,
        buf: &'buf mut [f64],
        source: usize,
        tag: MessageTag,
    ) -> Result<LocalReceive<'buf>, TransportError> {
        check_rank(source, self.shared.size)?;
        self.shared.record(TrafficEvent::PostReceive {
            rank: self.rank,
            source,
            tag: tag.raw(),
            len: buf.len(),
        });
        Ok(LocalReceive {
            buf,
            source,
            tag: tag.raw(),
        })
    }

    fn wait_all<'buf>(&self, pending: Vec<LocalReceive<'buf>>) -> Result<(), TransportError> {
        self.shared.record(TrafficEvent::WaitAll {
            rank: self.rank,
            handles: pending.len(),
        });

        // Sends are buffered, so completing the handles in posting order
        // finishes no later than completing them in arrival order.
        for receive in pending {
            let key = MailKey {
                source: receive.source,
                dest: self.rank,
                channel: Channel::Tagged(receive.tag),
            };
            match self.shared.take(key)? {
                Payload::Values(values) if values.len() == receive.buf.len() => {
                    receive.buf.copy_from_slice(&values);
                }
                payload => {
                    return Err(TransportError::LengthMismatch {
                        sender: receive.source,
                        tag: receive.tag,
                        expected: receive.buf.len(),
                        actual: payload.len(),
                    });
                }
            }
        }
        Ok(())
    }
}
