//! Error handling for the tabularization pipeline.

use std::io;
use std::path::PathBuf;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;

pub mod util;

/// Specialized error type for tabularization
#[derive(Debug, thiserror::Error)]
pub enum TabularError {
    /// Error opening, reading or writing a file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error processing Arrow data
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// Error processing Parquet data
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    /// Error (de)serializing JSON artifacts
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input file does not have the expected columns or types
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Window size string could not be parsed
    #[error("Invalid window size '{0}'")]
    InvalidWindow(String),

    /// Aggregation name is unknown or not valid for the requested operation
    #[error("Invalid aggregation '{0}'")]
    InvalidAggregation(String),

    /// Events are not sorted by (patient_id, timestamp)
    #[error("Ordering violation at row {row}: {detail}")]
    OrderingViolation { row: usize, detail: String },

    /// A required cached artifact does not exist
    #[error("Missing shard file: {}", .0.display())]
    MissingShardFile(PathBuf),

    /// Another writer holds the lock of an artifact that must be read
    #[error("Artifact is locked by another writer; remove {} if it is stale", .0.display())]
    ArtifactLocked(PathBuf),

    /// Matrices cannot be combined or indexed as requested
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Code and frequency filters leave no feature columns
    #[error("Empty inclusion set: {0}")]
    EmptyInclusionSet(String),

    /// A metric is undefined for the given predictions and labels
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// The booster failed to fit or predict
    #[error("Booster error: {0}")]
    Booster(String),
}

impl TabularError {
    /// Attach a path to a shape mismatch or ordering violation message
    #[must_use]
    pub fn at_path(self, path: &std::path::Path) -> Self {
        match self {
            Self::ShapeMismatch(msg) => {
                Self::ShapeMismatch(format!("{msg} (in {})", path.display()))
            }
            Self::OrderingViolation { row, detail } => Self::OrderingViolation {
                row,
                detail: format!("{detail} (in {})", path.display()),
            },
            Self::Schema(msg) => Self::Schema(format!("{msg} (in {})", path.display())),
            other => other,
        }
    }
}

/// Result type for tabularization operations
pub type Result<T> = std::result::Result<T, TabularError>;
