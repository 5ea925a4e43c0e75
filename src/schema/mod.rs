//! Column names and Arrow schemas of the files the pipeline reads and writes.

pub mod aggregation;
pub mod window;

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;

use crate::error::{Result, TabularError};

pub use aggregation::{Aggregation, FeatureKind};
pub use window::WindowSize;

/// Patient identifier column of MEDS event tables
pub const PATIENT_ID: &str = "patient_id";
/// Code column of MEDS event tables
pub const CODE: &str = "code";
/// Timestamp column of MEDS event tables
pub const TIMESTAMP: &str = "timestamp";
/// Numerical value column of MEDS event tables
pub const NUMERICAL_VALUE: &str = "numerical_value";
/// Row index into a shard's event instants
pub const EVENT_ID: &str = "event_id";
/// Label column of task files
pub const LABEL: &str = "label";

/// Normalised schema of MEDS event tables
#[must_use]
pub fn events_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(PATIENT_ID, DataType::Int64, false),
        Field::new(CODE, DataType::Utf8, false),
        Field::new(
            TIMESTAMP,
            DataType::Timestamp(TimeUnit::Microsecond, None),
            true,
        ),
        Field::new(NUMERICAL_VALUE, DataType::Float64, true),
    ]))
}

/// Schema of task label files
#[must_use]
pub fn labels_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(EVENT_ID, DataType::UInt64, false),
        Field::new(LABEL, DataType::Float32, false),
    ]))
}

/// Schema of event index files mapping event ids to instants
#[must_use]
pub fn event_index_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(EVENT_ID, DataType::UInt64, false),
        Field::new(PATIENT_ID, DataType::Int64, false),
        Field::new(
            TIMESTAMP,
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        ),
    ]))
}

/// Fetch a column by name and cast it to the requested type
///
/// MEDS producers disagree on physical types (dictionary codes, `Int32`
/// patient ids, nanosecond timestamps), so every reader goes through a cast.
pub fn column_as(batch: &RecordBatch, name: &str, data_type: &DataType) -> Result<arrow::array::ArrayRef> {
    let index = batch
        .schema()
        .index_of(name)
        .map_err(|_| TabularError::Schema(format!("Column '{name}' not found")))?;
    let column = batch.column(index);
    if column.data_type() == data_type {
        return Ok(column.clone());
    }
    arrow::compute::cast(column, data_type).map_err(|e| {
        TabularError::Schema(format!(
            "Column '{name}' of type {} cannot be read as {data_type}: {e}",
            column.data_type()
        ))
    })
}
