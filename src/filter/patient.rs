//! Patient membership filtering
//!
//! Restricts event tables to the patients a shard manifest assigns to a shard.

use arrow::array::{Array, BooleanArray, Int64Array};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashSet;

use crate::error::{Result, TabularError};
use crate::filter::core::{BatchFilter, filter_record_batch};
use crate::schema::{self, PATIENT_ID};

/// A filter that includes only rows of the listed patients
#[derive(Debug, Clone)]
pub struct PatientFilter {
    patient_ids: FxHashSet<i64>,
}

impl PatientFilter {
    #[must_use]
    pub const fn new(patient_ids: FxHashSet<i64>) -> Self {
        Self { patient_ids }
    }

    fn create_mask(&self, ids: &Int64Array) -> BooleanArray {
        ids.iter()
            .map(|id| Some(id.is_some_and(|id| self.patient_ids.contains(&id))))
            .collect()
    }
}

impl BatchFilter for PatientFilter {
    fn filter(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let ids = schema::column_as(batch, PATIENT_ID, &DataType::Int64)?;
        let ids = ids
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| TabularError::Schema(format!("Column '{PATIENT_ID}' is not an integer array")))?;

        let mask = self.create_mask(ids);
        filter_record_batch(batch, &mask)
    }
}
