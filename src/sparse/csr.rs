//! Compressed Sparse Row (CSR) matrix for per-shard feature aggregates.
//!
//! CSR stores data by rows, which suits the pipeline's access pattern:
//! matrices are assembled row by row, stacked shard after shard, and sliced
//! down to labelled rows before being handed to a booster.
//!
//! # Structure
//!
//! - `values`: Stored values, row by row
//! - `indices`: Column index for each value, strictly increasing within a row
//! - `indptr`: `indptr[i]..indptr[i + 1]` is the range of row `i`
//!
//! Entries that are not stored are exact zeros.

use crate::error::{Result, TabularError};

/// Compressed Sparse Row matrix of `f64` values
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// An all-zero matrix of the given shape
    #[must_use]
    pub fn zeros(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            indptr: vec![0; n_rows + 1],
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build a matrix from raw CSR arrays, validating their structure
    pub fn try_new(
        n_rows: usize,
        n_cols: usize,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self> {
        if indptr.len() != n_rows + 1 || indptr.first() != Some(&0) {
            return Err(TabularError::ShapeMismatch(format!(
                "indptr of length {} does not describe {n_rows} rows",
                indptr.len()
            )));
        }
        if indices.len() != values.len() || indptr[n_rows] != indices.len() {
            return Err(TabularError::ShapeMismatch(format!(
                "{} indices and {} values for {} stored entries",
                indices.len(),
                values.len(),
                indptr[n_rows]
            )));
        }
        for row in 0..n_rows {
            let (start, end) = (indptr[row], indptr[row + 1]);
            if start > end {
                return Err(TabularError::ShapeMismatch(format!(
                    "indptr decreases at row {row}"
                )));
            }
            let cols = &indices[start..end];
            if cols.windows(2).any(|w| w[0] >= w[1]) || cols.last().is_some_and(|&c| c >= n_cols) {
                return Err(TabularError::ShapeMismatch(format!(
                    "row {row} has unsorted or out of range column indices for {n_cols} columns"
                )));
            }
        }
        Ok(Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            values,
        })
    }

    /// Build a matrix from (row, column, value) triplets
    ///
    /// Triplets may come in any order; duplicates are summed. Entries that
    /// sum to zero are not stored.
    pub fn from_triplets(n_rows: usize, n_cols: usize, triplets: &[(usize, usize, f64)]) -> Result<Self> {
        if let Some(&(row, col, _)) = triplets.iter().find(|&&(r, c, _)| r >= n_rows || c >= n_cols) {
            return Err(TabularError::ShapeMismatch(format!(
                "entry ({row}, {col}) is outside a {n_rows}x{n_cols} matrix"
            )));
        }

        let mut sorted = triplets.to_vec();
        sorted.sort_by_key(|&(row, col, _)| (row, col));

        let mut indptr = vec![0usize; n_rows + 1];
        let mut indices = Vec::with_capacity(sorted.len());
        let mut values: Vec<f64> = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;
        for (row, col, value) in sorted {
            if last == Some((row, col)) {
                if let Some(v) = values.last_mut() {
                    *v += value;
                }
                continue;
            }
            indptr[row + 1] += 1;
            indices.push(col);
            values.push(value);
            last = Some((row, col));
        }
        for row in 0..n_rows {
            indptr[row + 1] += indptr[row];
        }

        Ok(Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            values,
        }
        .prune_zeros())
    }

    fn prune_zeros(mut self) -> Self {
        if self.values.iter().all(|&v| v != 0.0) {
            return self;
        }
        let mut kept = 0;
        let mut start = 0;
        for row in 0..self.n_rows {
            let end = self.indptr[row + 1];
            for i in start..end {
                if self.values[i] != 0.0 {
                    self.indices[kept] = self.indices[i];
                    self.values[kept] = self.values[i];
                    kept += 1;
                }
            }
            start = end;
            self.indptr[row + 1] = kept;
        }
        self.indices.truncate(kept);
        self.values.truncate(kept);
        self
    }

    /// Build a matrix from row-major dense values, storing non-zeros only
    pub fn from_dense(n_rows: usize, n_cols: usize, dense: &[f64]) -> Result<Self> {
        if dense.len() != n_rows * n_cols {
            return Err(TabularError::ShapeMismatch(format!(
                "{} dense values for a {n_rows}x{n_cols} matrix",
                dense.len()
            )));
        }
        let mut indptr = Vec::with_capacity(n_rows + 1);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        indptr.push(0);
        for row in dense.chunks(n_cols.max(1)).take(n_rows) {
            for (col, &value) in row.iter().enumerate() {
                if value != 0.0 {
                    indices.push(col);
                    values.push(value);
                }
            }
            indptr.push(indices.len());
        }
        // A zero-column matrix has no chunks to walk.
        indptr.resize(n_rows + 1, indices.len());
        Ok(Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            values,
        })
    }

    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[must_use]
    pub const fn n_cols(&self) -> usize {
        self.n_cols
    }

    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    /// Number of stored entries
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Value at (row, col); zero when not stored or out of range
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        if row >= self.n_rows {
            return 0.0;
        }
        let range = self.indptr[row]..self.indptr[row + 1];
        self.indices[range.clone()]
            .binary_search(&col)
            .map_or(0.0, |pos| self.values[range.start + pos])
    }

    /// Stored (column, value) pairs of one row
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = if row < self.n_rows {
            self.indptr[row]..self.indptr[row + 1]
        } else {
            0..0
        };
        self.indices[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied())
    }

    /// Stored entries as (row, column, value), in row-major order
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.n_rows).flat_map(move |row| self.row(row).map(move |(col, value)| (row, col, value)))
    }

    /// Row-major dense copy of the matrix
    #[must_use]
    pub fn to_dense(&self) -> Vec<f64> {
        let mut dense = vec![0.0; self.n_rows * self.n_cols];
        for (row, col, value) in self.triplets() {
            dense[row * self.n_cols + col] = value;
        }
        dense
    }

    /// Concatenate matrices side by side
    ///
    /// All inputs must have the same number of rows. Columns of later inputs
    /// are offset by the widths of earlier ones.
    pub fn hstack(matrices: &[&Self]) -> Result<Self> {
        let Some(first) = matrices.first() else {
            return Ok(Self::zeros(0, 0));
        };
        let n_rows = first.n_rows;
        if let Some(other) = matrices.iter().find(|m| m.n_rows != n_rows) {
            return Err(TabularError::ShapeMismatch(format!(
                "cannot hstack a matrix with {} rows onto one with {n_rows} rows",
                other.n_rows
            )));
        }

        let n_cols = matrices.iter().map(|m| m.n_cols).sum();
        let nnz = matrices.iter().map(|m| m.nnz()).sum();
        let mut indptr = Vec::with_capacity(n_rows + 1);
        let mut indices = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        indptr.push(0);
        for row in 0..n_rows {
            let mut offset = 0;
            for matrix in matrices {
                for (col, value) in matrix.row(row) {
                    indices.push(col + offset);
                    values.push(value);
                }
                offset += matrix.n_cols;
            }
            indptr.push(indices.len());
        }
        Ok(Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            values,
        })
    }

    /// Concatenate matrices top to bottom
    ///
    /// All inputs must have the same number of columns.
    pub fn vstack(matrices: &[&Self]) -> Result<Self> {
        let Some(first) = matrices.first() else {
            return Ok(Self::zeros(0, 0));
        };
        let n_cols = first.n_cols;
        if let Some(other) = matrices.iter().find(|m| m.n_cols != n_cols) {
            return Err(TabularError::ShapeMismatch(format!(
                "cannot vstack a matrix with {} columns onto one with {n_cols} columns",
                other.n_cols
            )));
        }

        let n_rows = matrices.iter().map(|m| m.n_rows).sum();
        let nnz = matrices.iter().map(|m| m.nnz()).sum();
        let mut indptr = Vec::with_capacity(n_rows + 1);
        let mut indices = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        indptr.push(0);
        for matrix in matrices {
            let base = indices.len();
            indices.extend_from_slice(&matrix.indices);
            values.extend_from_slice(&matrix.values);
            indptr.extend(matrix.indptr[1..].iter().map(|&p| p + base));
        }
        Ok(Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            values,
        })
    }

    /// Keep the columns whose mask entry is true, preserving their order
    pub fn select_columns(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.n_cols {
            return Err(TabularError::ShapeMismatch(format!(
                "column mask of length {} for a matrix with {} columns",
                mask.len(),
                self.n_cols
            )));
        }

        // New index of every kept column
        let mut remap = vec![usize::MAX; self.n_cols];
        let mut n_cols = 0;
        for (col, _) in mask.iter().enumerate().filter(|(_, keep)| **keep) {
            remap[col] = n_cols;
            n_cols += 1;
        }

        let mut indptr = Vec::with_capacity(self.n_rows + 1);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        indptr.push(0);
        for row in 0..self.n_rows {
            for (col, value) in self.row(row) {
                if mask[col] {
                    indices.push(remap[col]);
                    values.push(value);
                }
            }
            indptr.push(indices.len());
        }
        Ok(Self {
            n_rows: self.n_rows,
            n_cols,
            indptr,
            indices,
            values,
        })
    }

    /// Gather rows by index; rows may repeat and appear in any order
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self> {
        if let Some(&row) = rows.iter().find(|&&r| r >= self.n_rows) {
            return Err(TabularError::ShapeMismatch(format!(
                "row {row} is out of range for a matrix with {} rows",
                self.n_rows
            )));
        }

        let nnz = rows
            .iter()
            .map(|&r| self.indptr[r + 1] - self.indptr[r])
            .sum();
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        indptr.push(0);
        for &row in rows {
            let range = self.indptr[row]..self.indptr[row + 1];
            indices.extend_from_slice(&self.indices[range.clone()]);
            values.extend_from_slice(&self.values[range]);
            indptr.push(indices.len());
        }
        Ok(Self {
            n_rows: rows.len(),
            n_cols: self.n_cols,
            indptr,
            indices,
            values,
        })
    }
}
