//! Command-line driver.
//!
//! ```sh
//! spmd-matmul multiply a.txt b.txt c.txt --ranks 4
//! spmd-matmul run job.toml
//! mpirun -n 4 spmd-matmul multiply a.txt b.txt c.txt --backend mpi
//! ```

mod config;

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use log::{debug, info};
use spmd_matmul::{Coordinator, JobPaths, LocalCluster};

use crate::config::Backend;

#[derive(Parser)]
#[command(name = "spmd-matmul")]
#[command(about = "Row-partitioned SPMD matrix multiplication")]
#[command(version)]
struct Cli {
    /// Verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Multiply two matrix files (whitespace-separated, one row per line).
    Multiply {
        matrix_a: PathBuf,
        matrix_b: PathBuf,
        output: PathBuf,
        /// Number of ranks for the local backend.
        #[arg(short = 'n', long, default_value_t = 4)]
        ranks: usize,
        #[arg(short, long, value_enum, default_value = "local")]
        backend: Backend,
    },
    /// Run a job described by a TOML file.
    Run {
        config: PathBuf,
    },
    /// Check a TOML job file without running it.
    Validate {
        config: PathBuf,
    },
}

fn setup_logging(level: u8) {
    let level = match level {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env = env_logger::Env::default().default_filter_or(format!("spmd_matmul={}", level));
    let _ = env_logger::Builder::from_env(env).try_init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Multiply {
            matrix_a,
            matrix_b,
            output,
            ranks,
            backend,
        } => {
            let job = JobPaths {
                matrix_a,
                matrix_b,
                output,
            };
            execute(backend, ranks, &job)
        }
        Commands::Run { config } => {
            let job = config::load_config(&config)?;
            debug!("job: {:?}", job);
            execute(job.run.backend, job.run.ranks, &job.paths())
        }
        Commands::Validate { config } => {
            let job = config::load_config(&config)?;
            println!(
                "Configuration is valid: {} ({:?} backend, {} ranks)",
                config.display(),
                job.run.backend,
                job.run.ranks
            );
            Ok(())
        }
    }
}

fn execute(backend: Backend, ranks: usize, job: &JobPaths) -> anyhow::Result<()> {
    match backend {
        Backend::Local => run_local(ranks, job),
        Backend::Mpi => run_mpi(job),
    }
}

fn run_local(ranks: usize, job: &JobPaths) -> anyhow::Result<()> {
    if ranks == 0 {
        anyhow::bail!("need at least 1 rank");
    }
    info!("Running {} local ranks", ranks);

    let cluster = LocalCluster::new(ranks);
    let results = cluster.run(|transport| Coordinator::new(transport).run_job(job));

    let mut product = None;
    for (rank, result) in results.into_iter().enumerate() {
        let matrix = result.with_context(|| format!("rank {} failed", rank))?;
        if let Some(matrix) = matrix {
            product = Some(matrix);
        }
    }

    let product = product.ok_or_else(|| anyhow!("rank 0 returned no product"))?;
    println!(
        "Wrote {}x{} product to {}",
        product.rows(),
        product.cols(),
        job.output.display()
    );
    Ok(())
}

#[cfg(feature = "mpi")]
fn run_mpi(job: &JobPaths) -> anyhow::Result<()> {
    use spmd_matmul::transport::MpiTransport;

    let universe = mpi::initialize().ok_or_else(|| anyhow!("MPI initialization failed"))?;
    let transport = MpiTransport::new(universe.world());
    let coordinator = Coordinator::new(transport);
    info!("Running as one of {} MPI ranks", coordinator.rank_count());

    if let Some(product) = coordinator.run_job(job)? {
        println!(
            "Wrote {}x{} product to {}",
            product.rows(),
            product.cols(),
            job.output.display()
        );
    }
    Ok(())
}

#[cfg(not(feature = "mpi"))]
fn run_mpi(_job: &JobPaths) -> anyhow::Result<()> {
    anyhow::bail!("this build has no MPI backend; rebuild with `--features mpi`")
}
