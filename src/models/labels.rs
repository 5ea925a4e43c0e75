//! Task label tables: which event instants are training rows, and their labels.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, Float32Array, UInt64Array};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

use crate::error::{Result, TabularError};
use crate::schema::{self, EVENT_ID, LABEL};
use crate::utils::io::parquet::{read_parquet, write_parquet_atomic};

/// Ordered (event_id, label) pairs of one shard
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelTable {
    event_ids: Vec<usize>,
    labels: Vec<f32>,
}

impl LabelTable {
    /// Build a label table from parallel vectors
    pub fn new(event_ids: Vec<usize>, labels: Vec<f32>) -> Result<Self> {
        if event_ids.len() != labels.len() {
            return Err(TabularError::ShapeMismatch(format!(
                "{} event ids but {} labels",
                event_ids.len(),
                labels.len()
            )));
        }
        Ok(Self { event_ids, labels })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.event_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.event_ids.is_empty()
    }

    #[must_use]
    pub fn event_ids(&self) -> &[usize] {
        &self.event_ids
    }

    #[must_use]
    pub fn labels(&self) -> &[f32] {
        &self.labels
    }

    /// Consume the table, returning its labels
    #[must_use]
    pub fn into_labels(self) -> Vec<f32> {
        self.labels
    }

    /// Convert record batches with `event_id` and `label` columns
    ///
    /// Boolean and integer labels are cast to `f32`; null labels are rejected.
    pub fn from_record_batches(batches: &[RecordBatch]) -> Result<Self> {
        let mut event_ids = Vec::new();
        let mut labels = Vec::new();
        for batch in batches {
            let ids = schema::column_as(batch, EVENT_ID, &DataType::UInt64)?;
            let values = schema::column_as(batch, LABEL, &DataType::Float32)?;
            let ids = ids
                .as_any()
                .downcast_ref::<UInt64Array>()
                .ok_or_else(|| TabularError::Schema(format!("Column '{EVENT_ID}' is not UInt64")))?;
            let values = values
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| TabularError::Schema(format!("Column '{LABEL}' is not Float32")))?;
            if ids.null_count() > 0 || values.null_count() > 0 {
                return Err(TabularError::Schema(
                    "Label tables must not contain nulls".to_string(),
                ));
            }
            event_ids.extend(ids.values().iter().map(|&id| id as usize));
            labels.extend(values.values().iter().copied());
        }
        Self::new(event_ids, labels)
    }

    /// Read a label file
    pub fn read(path: &Path) -> Result<Self> {
        let batches = read_parquet(path, None)?;
        Self::from_record_batches(&batches).map_err(|e| e.at_path(path))
    }

    /// Write the table as a label file
    pub fn write(&self, path: &Path) -> Result<()> {
        let batch = RecordBatch::try_new(
            schema::labels_schema(),
            vec![
                Arc::new(UInt64Array::from_iter_values(
                    self.event_ids.iter().map(|&id| id as u64),
                )),
                Arc::new(Float32Array::from(self.labels.clone())),
            ],
        )?;
        write_parquet_atomic(path, &batch)
    }

    /// Check that every event id addresses a row of a matrix with `n_rows` rows
    pub fn validate(&self, n_rows: usize) -> Result<()> {
        match self.event_ids.iter().find(|&&id| id >= n_rows) {
            Some(id) => Err(TabularError::ShapeMismatch(format!(
                "event_id {id} is out of range for {n_rows} event rows"
            ))),
            None => Ok(()),
        }
    }
}
