mod common;

use std::fs;
use std::path::Path;

use common::ramp;
use spmd_matmul::worker::MultiplyError;
use spmd_matmul::{Coordinator, JobError, JobPaths, LocalCluster, Matrix};
use tempfile::TempDir;

fn job_in(dir: &Path) -> JobPaths {
    JobPaths {
        matrix_a: dir.join("a.txt"),
        matrix_b: dir.join("b.txt"),
        output: dir.join("c.txt"),
    }
}

fn run_job(job: &JobPaths, ranks: usize) -> Vec<Result<Option<Matrix>, JobError>> {
    LocalCluster::new(ranks).run(|transport| Coordinator::new(transport).run_job(job))
}

#[test]
fn test_matrix_file_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("test_matrix.txt");

    let original = ramp(3, 3, 1);
    original.save_to_file(&file_path).unwrap();
    let loaded = Matrix::load_from_file(&file_path).unwrap();

    assert_eq!(original, loaded);
}

#[test]
fn test_matrix_file_format_parsing() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("format_test.txt");

    let content = "1.5  2.5   3.5\n4.0 5.0 6.0\n7.0\t8.0\t9.0\n";
    fs::write(&file_path, content).unwrap();

    let matrix = Matrix::load_from_file(&file_path).unwrap();
    assert_eq!(matrix.rows(), 3);
    assert_eq!(matrix.cols(), 3);
    assert_eq!(matrix.get(0, 0).unwrap(), 1.5);
    assert_eq!(matrix.get(2, 2).unwrap(), 9.0);
}

#[test]
fn test_job_writes_product_on_root() {
    let temp_dir = TempDir::new().unwrap();
    let job = job_in(temp_dir.path());

    let a = ramp(7, 4, 2);
    let b = ramp(4, 3, 3);
    a.save_to_file(&job.matrix_a).unwrap();
    b.save_to_file(&job.matrix_b).unwrap();

    let results = run_job(&job, 3);

    let expected = a.multiply(&b).unwrap();
    let mut results = results.into_iter();
    let root = results.next().unwrap().unwrap();
    assert_eq!(root.as_ref(), Some(&expected));
    for other in results {
        assert!(other.unwrap().is_none());
    }

    // The saved text goes through `{}` formatting, which round-trips f64
    let saved = Matrix::load_from_file(&job.output).unwrap();
    assert_eq!(saved, expected);
}

#[test]
fn test_job_on_single_rank() {
    let temp_dir = TempDir::new().unwrap();
    let job = job_in(temp_dir.path());

    fs::write(&job.matrix_a, "1 2\n3 4\n").unwrap();
    fs::write(&job.matrix_b, "5 6\n7 8\n").unwrap();

    let results = run_job(&job, 1);
    assert_eq!(results.len(), 1);

    let saved = Matrix::load_from_file(&job.output).unwrap();
    assert_eq!(saved.values(), &[19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn test_job_missing_input_aborts_every_rank() {
    let temp_dir = TempDir::new().unwrap();
    let job = job_in(temp_dir.path());
    fs::write(&job.matrix_b, "1 2\n").unwrap();

    let results = run_job(&job, 3);

    assert!(matches!(results[0], Err(JobError::Load { .. })));
    for result in &results[1..] {
        assert!(matches!(result, Err(JobError::RootAborted)));
    }
    assert!(!job.output.exists());
}

#[test]
fn test_job_incompatible_shapes_fail_on_every_rank() {
    let temp_dir = TempDir::new().unwrap();
    let job = job_in(temp_dir.path());
    fs::write(&job.matrix_a, "1 2 3\n4 5 6\n").unwrap();
    fs::write(&job.matrix_b, "1 2\n3 4\n").unwrap();

    let results = run_job(&job, 2);

    for result in &results {
        assert!(matches!(
            result,
            Err(JobError::Multiply(MultiplyError::Shape { .. }))
        ));
    }
    assert!(!job.output.exists());
}

#[test]
fn test_large_job() {
    let temp_dir = TempDir::new().unwrap();
    let job = job_in(temp_dir.path());

    let size = 40;
    let a = ramp(size, size, 4);
    let b = ramp(size, size, 5);
    a.save_to_file(&job.matrix_a).unwrap();
    b.save_to_file(&job.matrix_b).unwrap();

    let results = run_job(&job, 6);

    let root = results.into_iter().next().unwrap().unwrap().unwrap();
    assert_eq!(root, a.multiply(&b).unwrap());
}
