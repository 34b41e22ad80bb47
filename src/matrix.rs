use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use thiserror::Error;

/// Errors raised by matrix construction, access and file I/O.
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("Data length {len} does not match dimensions {rows}x{cols}")]
    LengthMismatch { len: usize, rows: usize, cols: usize },

    #[error("Index out of bounds: ({row}, {col}) for matrix {rows}x{cols}")]
    OutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Row range [{start}, {end}) out of bounds for {rows} rows")]
    RowRange { start: usize, end: usize, rows: usize },

    #[error("Matrix dimensions incompatible: {a_rows}x{a_cols} * {b_rows}x{b_cols}")]
    Incompatible {
        a_rows: usize,
        a_cols: usize,
        b_rows: usize,
        b_cols: usize,
    },

    #[error("Failed to parse value on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Inconsistent column count: expected {expected}, found {found} on line {line}")]
    Ragged {
        expected: usize,
        found: usize,
        line: usize,
    },

    #[error("Matrix file is empty")]
    Empty,

    #[error("Matrix I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Dense row-major `f64` matrix.
///
/// The shape is fixed at construction. Only the values can change, either
/// through the checked element accessors or through [`Matrix::values_mut`]
/// for bulk transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f64>,
    rows: usize,
    cols: usize,
}

impl Matrix {
    /// Create a zero-filled matrix with the given dimensions
    pub fn new(rows: usize, cols: usize) -> Self {
        Matrix {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    /// Create a matrix from a row-major vector of data
    pub fn from_vec(data: Vec<f64>, rows: usize, cols: usize) -> Result<Self, MatrixError> {
        if data.len() != rows * cols {
            return Err(MatrixError::LengthMismatch {
                len: data.len(),
                rows,
                cols,
            });
        }
        Ok(Matrix { data, rows, cols })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of stored values (`rows * cols`)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw row-major values
    pub fn values(&self) -> &[f64] {
        &self.data
    }

    /// Raw row-major values, for bulk transfer into the matrix.
    ///
    /// The slice length is fixed, so the shape cannot change through it.
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Load a matrix from a text file
    /// Format: whitespace-separated values, one row per line
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, MatrixError> {
        let reader = BufReader::new(File::open(path)?);
        let mut data = Vec::new();
        let mut rows = 0;
        let mut num_cols = None;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let values = trimmed
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<Result<Vec<f64>, _>>()
                .map_err(|e| MatrixError::Parse {
                    line: line_num + 1,
                    message: e.to_string(),
                })?;

            match num_cols {
                Some(n) if n != values.len() => {
                    return Err(MatrixError::Ragged {
                        expected: n,
                        found: values.len(),
                        line: line_num + 1,
                    });
                }
                None => num_cols = Some(values.len()),
                _ => {}
            }

            data.extend(values);
            rows += 1;
        }

        let cols = num_cols.ok_or(MatrixError::Empty)?;
        Ok(Matrix { data, rows, cols })
    }

    /// Save a matrix to a text file
    /// Format: space-separated values, one row per line
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), MatrixError> {
        let mut writer = BufWriter::new(File::create(path)?);

        for row in self.data.chunks(self.cols.max(1)).take(self.rows) {
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    write!(writer, " ")?;
                }
                write!(writer, "{}", value)?;
            }
            writeln!(writer)?;
        }

        writer.flush()?;
        Ok(())
    }

    fn index(&self, row: usize, col: usize) -> Result<usize, MatrixError> {
        if row >= self.rows || col >= self.cols {
            return Err(MatrixError::OutOfBounds {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(row * self.cols + col)
    }

    /// Get a value at a specific position
    pub fn get(&self, row: usize, col: usize) -> Result<f64, MatrixError> {
        let idx = self.index(row, col)?;
        Ok(self.data[idx])
    }

    /// Set a value at a specific position
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<(), MatrixError> {
        let idx = self.index(row, col)?;
        self.data[idx] = value;
        Ok(())
    }

    /// Add `delta` to the value at a specific position
    pub fn incr(&mut self, row: usize, col: usize, delta: f64) -> Result<(), MatrixError> {
        let idx = self.index(row, col)?;
        self.data[idx] += delta;
        Ok(())
    }

    /// Get a row as a slice
    pub fn get_row(&self, row: usize) -> Result<&[f64], MatrixError> {
        self.row_block(row, row + 1)
    }

    /// Flat values of rows `[start, end)`
    pub fn row_block(&self, start: usize, end: usize) -> Result<&[f64], MatrixError> {
        if start > end || end > self.rows {
            return Err(MatrixError::RowRange {
                start,
                end,
                rows: self.rows,
            });
        }
        Ok(&self.data[start * self.cols..end * self.cols])
    }

    /// Sequential product `self * other`, summing over `k` in ascending order.
    pub fn multiply(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        if self.cols != other.rows {
            return Err(MatrixError::Incompatible {
                a_rows: self.rows,
                a_cols: self.cols,
                b_rows: other.rows,
                b_cols: other.cols,
            });
        }

        let mut result = Matrix::new(self.rows, other.cols);

        for i in 0..self.rows {
            for j in 0..other.cols {
                let mut sum = 0.0;
                for k in 0..self.cols {
                    sum += self.data[i * self.cols + k] * other.data[k * other.cols + j];
                }
                result.data[i * other.cols + j] = sum;
            }
        }

        Ok(result)
    }
}
