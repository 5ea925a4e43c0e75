//! IO utilities for file operations
//!
//! Atomic publication of files, JSON artifacts and Parquet tables.

pub mod atomic;
pub mod parquet;

pub use atomic::{read_json, write_atomic, write_json_atomic};
pub use self::parquet::{
    DEFAULT_BATCH_SIZE, find_parquet_files, read_parquet, read_parquet_with_schema,
    write_parquet_atomic,
};
