//! Parquet file operations
//!
//! This module provides utilities for reading and writing Parquet files:
//! finding shard files, reading them into Arrow record batches with an
//! optional patient filter, and publishing batches atomically.

use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::Result;
use crate::error::util::{open_required, validate_directory};
use crate::filter::{BatchFilter, PatientFilter};
use crate::utils::io::atomic::write_atomic;
use crate::utils::logging::{log_operation_complete, log_operation_start, log_warning};

/// Default batch size for Parquet reading
pub const DEFAULT_BATCH_SIZE: usize = 16384;

/// Helper function to get batch size from environment
#[must_use]
pub fn get_batch_size() -> Option<usize> {
    std::env::var("PARQUET_BATCH_SIZE")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
}

/// Read a parquet file into Arrow record batches
///
/// # Arguments
/// * `path` - Path to the Parquet file
/// * `patient_filter` - Optional set of patients to keep
///
/// # Returns
/// The record batches of the file in file order, empty batches dropped
pub fn read_parquet(path: &Path, patient_filter: Option<&PatientFilter>) -> Result<Vec<RecordBatch>> {
    let start = std::time::Instant::now();
    let file = open_required(path)?;

    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_batch_size(get_batch_size().unwrap_or(DEFAULT_BATCH_SIZE))
        .build()?;

    let mut batches = Vec::new();
    for batch in reader {
        let batch = batch?;
        let batch = match patient_filter {
            Some(filter) => filter.filter(&batch)?,
            None => batch,
        };
        if batch.num_rows() > 0 {
            batches.push(batch);
        }
    }

    log::debug!(
        "Read {} batches from {} in {:?}",
        batches.len(),
        path.display(),
        start.elapsed()
    );
    Ok(batches)
}

/// Read a parquet file, returning its Arrow schema along with its batches
///
/// Unlike [`read_parquet`], the schema (including its metadata) is available
/// even when the file holds no rows.
pub fn read_parquet_with_schema(path: &Path) -> Result<(arrow::datatypes::SchemaRef, Vec<RecordBatch>)> {
    let file = open_required(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

/// Write a record batch to `path` atomically
///
/// The batch schema, including its metadata, is stored in the file.
pub fn write_parquet_atomic(path: &Path, batch: &RecordBatch) -> Result<()> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    write_atomic(path, |file| {
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(batch)?;
        writer.close()?;
        Ok(())
    })
}

/// Find all Parquet files in a directory
///
/// # Returns
/// Paths of the `.parquet` files directly inside `dir`, sorted by shard name
pub fn find_parquet_files(dir: &Path) -> Result<Vec<PathBuf>> {
    log_operation_start("Searching for parquet files in", dir);
    validate_directory(dir)?;

    let mut parquet_files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .map_ok(|entry| entry.path())
        .filter_ok(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "parquet"))
        .collect::<std::result::Result<_, _>>()?;
    crate::store::layout::sort_shard_paths(&mut parquet_files);

    if parquet_files.is_empty() {
        log_warning("No Parquet files found in directory", Some(dir));
    } else {
        log_operation_complete("found", dir, parquet_files.len(), None);
    }

    Ok(parquet_files)
}
