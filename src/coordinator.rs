use std::path::{Path, PathBuf};

use log::{error, info};
use thiserror::Error;

use crate::matrix::{Matrix, MatrixError};
use crate::transport::{Transport, TransportError};
use crate::worker::{check_shapes, MultiplyError, RankWorker, ROOT_RANK};

/// Input and output files for one multiply job.
#[derive(Debug, Clone)]
pub struct JobPaths {
    pub matrix_a: PathBuf,
    pub matrix_b: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Failed to load {path:?}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: MatrixError,
    },

    #[error("Failed to save {path:?}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: MatrixError,
    },

    #[error("Rank 0 could not load its inputs")]
    RootAborted,

    #[error(transparent)]
    Multiply(#[from] MultiplyError),

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),
}

// Header broadcast before the multiply: [status, a_rows, a_cols, b_rows, b_cols]
const HEADER_LEN: usize = 5;
const STATUS_OK: u64 = 1;
const STATUS_ABORT: u64 = 0;

/// Drives a file-to-file multiply on every rank.
///
/// Rank 0 reads both inputs and announces their shapes, so the other ranks
/// can allocate zero matrices of the right size before the SPMD routine runs.
pub struct Coordinator<T: Transport> {
    transport: T,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(transport: T) -> Self {
        Coordinator { transport }
    }

    /// Get the number of ranks taking part
    pub fn rank_count(&self) -> usize {
        self.transport.size()
    }

    /// Run one job. Rank 0 writes the product to `job.output` and returns it;
    /// every other rank returns `None`.
    pub fn run_job(&self, job: &JobPaths) -> Result<Option<Matrix>, JobError> {
        let rank = self.transport.rank();

        let loaded = if rank == ROOT_RANK {
            info!(
                "[Rank {}] Loading {:?} and {:?} for {} ranks",
                rank,
                job.matrix_a,
                job.matrix_b,
                self.rank_count()
            );
            Some(load_inputs(job))
        } else {
            None
        };

        let mut header = match &loaded {
            Some(Ok((a, b))) => [
                STATUS_OK,
                a.rows() as u64,
                a.cols() as u64,
                b.rows() as u64,
                b.cols() as u64,
            ],
            _ => [STATUS_ABORT; HEADER_LEN],
        };
        self.transport.broadcast_counts(ROOT_RANK, &mut header)?;

        let (mut a, mut b) = match loaded {
            Some(result) => result?,
            None if header[0] == STATUS_OK => (
                Matrix::new(header[1] as usize, header[2] as usize),
                Matrix::new(header[3] as usize, header[4] as usize),
            ),
            None => return Err(JobError::RootAborted),
        };

        let mut c = Matrix::new(a.rows(), b.cols());
        // Same shapes on every rank, so a mismatch stops all ranks here
        // before any matrix data moves.
        check_shapes(&a, &b, &c)?;

        RankWorker::new(&self.transport).multiply(&mut a, &mut b, &mut c)?;

        if rank != ROOT_RANK {
            return Ok(None);
        }

        info!("[Rank {}] Saving result to {:?}", rank, job.output);
        c.save_to_file(&job.output).map_err(|source| JobError::Save {
            path: job.output.clone(),
            source,
        })?;
        Ok(Some(c))
    }
}

fn load_inputs(job: &JobPaths) -> Result<(Matrix, Matrix), JobError> {
    let a = load(&job.matrix_a)?;
    let b = load(&job.matrix_b)?;
    info!(
        "Matrix A: {}x{}, Matrix B: {}x{}",
        a.rows(),
        a.cols(),
        b.rows(),
        b.cols()
    );
    Ok((a, b))
}

fn load(path: &Path) -> Result<Matrix, JobError> {
    Matrix::load_from_file(path).map_err(|source| {
        error!("Failed to load {:?}: {}", path, source);
        JobError::Load {
            path: path.to_path_buf(),
            source,
        }
    })
}
