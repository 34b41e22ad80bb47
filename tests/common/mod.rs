#![allow(dead_code)]

use spmd_matmul::transport::TrafficEvent;
use spmd_matmul::{LocalCluster, Matrix, MultiplyError, RankWorker, Transport};

/// Deterministic test matrix with non-dyadic values, so rounding shows up
/// if the summation order ever changes.
pub fn ramp(rows: usize, cols: usize, seed: u64) -> Matrix {
    let data = (0..rows * cols)
        .map(|idx| {
            let v = (idx as u64 * 7 + seed * 13) % 17;
            v as f64 / 3.0 - 2.5
        })
        .collect();
    Matrix::from_vec(data, rows, cols).unwrap()
}

/// What every rank held after one distributed multiply.
pub struct RankOutcome {
    pub a: Matrix,
    pub b: Matrix,
    pub c: Matrix,
    pub result: Result<(), MultiplyError>,
}

pub struct Run {
    pub ranks: Vec<RankOutcome>,
    pub traffic: Vec<TrafficEvent>,
}

impl Run {
    pub fn root_product(&self) -> &Matrix {
        &self.ranks[0].c
    }

    pub fn sends(&self) -> Vec<&TrafficEvent> {
        self.traffic
            .iter()
            .filter(|e| matches!(e, TrafficEvent::Send { .. }))
            .collect()
    }

    pub fn posted_receives(&self) -> Vec<&TrafficEvent> {
        self.traffic
            .iter()
            .filter(|e| matches!(e, TrafficEvent::PostReceive { .. }))
            .collect()
    }

    pub fn wait_alls(&self) -> Vec<&TrafficEvent> {
        self.traffic
            .iter()
            .filter(|e| matches!(e, TrafficEvent::WaitAll { .. }))
            .collect()
    }
}

/// Run the SPMD multiply on `ranks` in-process ranks. Only rank 0 starts
/// with the real inputs; everyone else starts from zeros.
pub fn run_distributed(a: &Matrix, b: &Matrix, ranks: usize) -> Run {
    run_with_output_shape(a, b, ranks, a.rows(), b.cols())
}

pub fn run_with_output_shape(
    a: &Matrix,
    b: &Matrix,
    ranks: usize,
    c_rows: usize,
    c_cols: usize,
) -> Run {
    let cluster = LocalCluster::new(ranks);
    let outcomes = cluster.run(|transport| {
        let (mut la, mut lb) = if transport.rank() == 0 {
            (a.clone(), b.clone())
        } else {
            (Matrix::new(a.rows(), a.cols()), Matrix::new(b.rows(), b.cols()))
        };
        let mut c = Matrix::new(c_rows, c_cols);
        let result = RankWorker::new(transport).multiply(&mut la, &mut lb, &mut c);
        RankOutcome {
            a: la,
            b: lb,
            c,
            result,
        }
    });

    Run {
        ranks: outcomes,
        traffic: cluster.traffic(),
    }
}
