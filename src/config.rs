//! TOML job files.
//!
//! ```toml
//! [input]
//! matrix_a = "a.txt"
//! matrix_b = "b.txt"
//!
//! [output]
//! path = "c.txt"
//!
//! [run]
//! backend = "local"
//! ranks = 4
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ValueEnum;
use serde::Deserialize;
use spmd_matmul::JobPaths;

/// Where the ranks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Threads in this process.
    #[default]
    Local,
    /// Processes launched by `mpirun`.
    Mpi,
}

#[derive(Debug, Deserialize)]
pub struct JobConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Deserialize)]
pub struct InputConfig {
    pub matrix_a: PathBuf,
    pub matrix_b: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Rank count for the local backend; `mpirun -n` decides for MPI.
    #[serde(default = "default_ranks")]
    pub ranks: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            ranks: default_ranks(),
        }
    }
}

fn default_ranks() -> usize {
    4
}

impl JobConfig {
    pub fn paths(&self) -> JobPaths {
        JobPaths {
            matrix_a: self.input.matrix_a.clone(),
            matrix_b: self.input.matrix_b.clone(),
            output: self.output.path.clone(),
        }
    }
}

/// Load and parse a TOML job file.
pub fn load_config(path: &Path) -> anyhow::Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading job file {}", path.display()))?;
    let config: JobConfig =
        toml::from_str(&content).with_context(|| format!("parsing job file {}", path.display()))?;
    if config.run.ranks == 0 {
        anyhow::bail!("run.ranks must be at least 1");
    }
    Ok(config)
}
