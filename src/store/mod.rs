//! Shard matrix store
//!
//! Sparse aggregate matrices are persisted as Parquet files. The sparse
//! layout stores COO triplets (`row`, `col`, `value`) in row-major order; the
//! dense layout stores a single row-major `value` column and is chosen when
//! more than half of the cells are non-zero. The exact shape travels in the
//! Arrow schema metadata, so all-zero rows and columns survive a round trip.

pub mod cache;
pub mod layout;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, Float64Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::error::{Result, TabularError};
use crate::models::EventIndex;
use crate::sparse::CsrMatrix;
use crate::utils::io::parquet::{read_parquet_with_schema, write_parquet_atomic};

pub use cache::{ArtifactCache, ArtifactLock, CacheOutcome, CachedArtifact};
pub use layout::TabularLayout;

/// Metadata key holding the number of rows
pub const META_N_ROWS: &str = "meds_tab.n_rows";
/// Metadata key holding the number of columns
pub const META_N_COLS: &str = "meds_tab.n_cols";
/// Metadata key holding the storage layout
pub const META_LAYOUT: &str = "meds_tab.layout";
/// Metadata key holding the file format version
pub const META_FORMAT_VERSION: &str = "meds_tab.format_version";

/// Version written to every matrix file
pub const FORMAT_VERSION: &str = "1";

const ROW: &str = "row";
const COL: &str = "col";
const VALUE: &str = "value";

/// Physical layout of a matrix file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixLayout {
    /// Row-major COO triplets of the stored entries
    Sparse,
    /// Every cell in row-major order
    Dense,
}

impl MatrixLayout {
    /// Layout used for a matrix: dense once more than half the cells are stored
    #[must_use]
    pub fn for_matrix(matrix: &CsrMatrix) -> Self {
        let cells = matrix.n_rows().saturating_mul(matrix.n_cols());
        if cells > 0 && matrix.nnz() * 2 > cells {
            Self::Dense
        } else {
            Self::Sparse
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sparse => "sparse",
            Self::Dense => "dense",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "sparse" => Ok(Self::Sparse),
            "dense" => Ok(Self::Dense),
            other => Err(TabularError::Schema(format!("Unknown matrix layout '{other}'"))),
        }
    }
}

fn matrix_schema(matrix: &CsrMatrix, layout: MatrixLayout) -> SchemaRef {
    let fields = match layout {
        MatrixLayout::Sparse => vec![
            Field::new(ROW, DataType::UInt64, false),
            Field::new(COL, DataType::UInt64, false),
            Field::new(VALUE, DataType::Float64, false),
        ],
        MatrixLayout::Dense => vec![Field::new(VALUE, DataType::Float64, false)],
    };
    let metadata = HashMap::from([
        (META_N_ROWS.to_string(), matrix.n_rows().to_string()),
        (META_N_COLS.to_string(), matrix.n_cols().to_string()),
        (META_LAYOUT.to_string(), layout.as_str().to_string()),
        (META_FORMAT_VERSION.to_string(), FORMAT_VERSION.to_string()),
    ]);
    Arc::new(Schema::new_with_metadata(fields, metadata))
}

/// Encode a matrix as a single record batch
pub fn matrix_to_batch(matrix: &CsrMatrix) -> Result<RecordBatch> {
    let layout = MatrixLayout::for_matrix(matrix);
    let schema = matrix_schema(matrix, layout);
    let batch = match layout {
        MatrixLayout::Sparse => {
            let (rows, (cols, values)): (Vec<u64>, (Vec<u64>, Vec<f64>)) = matrix
                .triplets()
                .map(|(row, col, value)| (row as u64, (col as u64, value)))
                .unzip();
            RecordBatch::try_new(
                schema,
                vec![
                    Arc::new(UInt64Array::from(rows)),
                    Arc::new(UInt64Array::from(cols)),
                    Arc::new(Float64Array::from(values)),
                ],
            )?
        }
        MatrixLayout::Dense => RecordBatch::try_new(
            schema,
            vec![Arc::new(Float64Array::from(matrix.to_dense()))],
        )?,
    };
    Ok(batch)
}

fn metadata_usize(schema: &Schema, key: &str) -> Result<usize> {
    schema
        .metadata()
        .get(key)
        .ok_or_else(|| TabularError::Schema(format!("Matrix file lacks '{key}' metadata")))?
        .parse()
        .map_err(|_| TabularError::Schema(format!("Metadata '{key}' is not a count")))
}

fn typed_column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str, expected: &DataType) -> Result<&'a T> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| TabularError::Schema(format!("Matrix file lacks column '{name}'")))?;
    column.as_any().downcast_ref::<T>().ok_or_else(|| {
        TabularError::Schema(format!(
            "Matrix column '{name}' has type {}, expected {expected}",
            column.data_type()
        ))
    })
}

/// Decode a matrix from its file schema and batches
pub fn matrix_from_batches(schema: &Schema, batches: &[RecordBatch]) -> Result<CsrMatrix> {
    let n_rows = metadata_usize(schema, META_N_ROWS)?;
    let n_cols = metadata_usize(schema, META_N_COLS)?;
    let layout = schema
        .metadata()
        .get(META_LAYOUT)
        .map_or(Ok(MatrixLayout::Sparse), |s| MatrixLayout::parse(s))?;

    match layout {
        MatrixLayout::Sparse => {
            let mut triplets = Vec::with_capacity(batches.iter().map(RecordBatch::num_rows).sum());
            for batch in batches {
                let rows = typed_column::<UInt64Array>(batch, ROW, &DataType::UInt64)?;
                let cols = typed_column::<UInt64Array>(batch, COL, &DataType::UInt64)?;
                let values = typed_column::<Float64Array>(batch, VALUE, &DataType::Float64)?;
                triplets.extend(
                    rows.values()
                        .iter()
                        .zip(cols.values().iter())
                        .zip(values.values().iter())
                        .map(|((&row, &col), &value)| (row as usize, col as usize, value)),
                );
            }
            CsrMatrix::from_triplets(n_rows, n_cols, &triplets)
        }
        MatrixLayout::Dense => {
            let mut dense = Vec::with_capacity(n_rows * n_cols);
            for batch in batches {
                let values = typed_column::<Float64Array>(batch, VALUE, &DataType::Float64)?;
                dense.extend_from_slice(values.values());
            }
            CsrMatrix::from_dense(n_rows, n_cols, &dense)
        }
    }
}

/// Persist a matrix at `path`, atomically
pub fn write_matrix(matrix: &CsrMatrix, path: &Path) -> Result<()> {
    let batch = matrix_to_batch(matrix)?;
    write_parquet_atomic(path, &batch)
}

/// Load a matrix written by [`write_matrix`]
///
/// A missing file is reported as [`TabularError::MissingShardFile`].
pub fn read_matrix(path: &Path) -> Result<CsrMatrix> {
    let (schema, batches) = read_parquet_with_schema(path)?;
    matrix_from_batches(&schema, &batches).map_err(|e| e.at_path(path))
}

/// Stack matrices top to bottom, in the given order
pub fn merge_matrices(matrices: &[CsrMatrix]) -> Result<CsrMatrix> {
    let refs: Vec<&CsrMatrix> = matrices.iter().collect();
    CsrMatrix::vstack(&refs)
}

/// Read and stack matrix files, in the given order
///
/// A file whose column count differs from the first file's fails with a
/// shape mismatch naming that file.
pub fn merge_files(paths: &[PathBuf]) -> Result<CsrMatrix> {
    let mut matrices = Vec::with_capacity(paths.len());
    let mut n_cols = None;
    for path in paths {
        let matrix = read_matrix(path)?;
        match n_cols {
            Some(expected) if expected != matrix.n_cols() => {
                return Err(TabularError::ShapeMismatch(format!(
                    "expected {expected} columns, found {}",
                    matrix.n_cols()
                ))
                .at_path(path));
            }
            _ => n_cols = Some(matrix.n_cols()),
        }
        matrices.push(matrix);
    }
    merge_matrices(&matrices)
}

impl CachedArtifact for CsrMatrix {
    fn read_from(path: &Path) -> Result<Self> {
        read_matrix(path)
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        write_matrix(self, path)
    }
}

impl CachedArtifact for EventIndex {
    fn read_from(path: &Path) -> Result<Self> {
        let (_, batches) = read_parquet_with_schema(path)?;
        EventIndex::from_batches(&batches).map_err(|e| e.at_path(path))
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        write_parquet_atomic(path, self.batch())
    }
}
