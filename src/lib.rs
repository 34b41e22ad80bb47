//! Row-partitioned matrix multiplication for SPMD message-passing programs.
//!
//! Every rank runs the same code: rank 0 broadcasts both inputs, each rank
//! computes its own block of output rows, and rank 0 collects the blocks.

pub mod coordinator;
pub mod matrix;
pub mod partition;
pub mod transport;
pub mod worker;

pub use coordinator::{Coordinator, JobError, JobPaths};
pub use matrix::{Matrix, MatrixError};
pub use partition::{partition_rows, RowPartition};
pub use transport::{LocalCluster, MessageTag, Transport, TransportError};
pub use worker::{MultiplyError, RankWorker, ROOT_RANK};
