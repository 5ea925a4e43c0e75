//! MEDS event records and the per-instant event stream built from them.

use std::ops::Range;
use std::sync::Arc;

use arrow::array::{
    Array, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray, UInt64Array,
};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use chrono::NaiveDateTime;
use smallvec::SmallVec;

use crate::error::{Result, TabularError};
use crate::schema::{self, CODE, NUMERICAL_VALUE, PATIENT_ID, TIMESTAMP};

/// One row of a MEDS event table
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub patient_id: i64,
    pub code: String,
    /// `None` marks a static fact
    pub timestamp: Option<NaiveDateTime>,
    pub numerical_value: Option<f64>,
}

impl EventRecord {
    #[must_use]
    pub fn new(
        patient_id: i64,
        code: impl Into<String>,
        timestamp: Option<NaiveDateTime>,
        numerical_value: Option<f64>,
    ) -> Self {
        Self {
            patient_id,
            code: code.into(),
            timestamp,
            numerical_value,
        }
    }

    /// Whether the record is a static (untimed) fact
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.timestamp.is_none()
    }

    /// Convert a `RecordBatch` to event records
    ///
    /// Columns are cast to the normalised MEDS types first, so dictionary
    /// encoded codes, narrower integer ids and any timestamp unit are accepted.
    pub fn from_record_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let patient_ids = schema::column_as(batch, PATIENT_ID, &DataType::Int64)?;
        let codes = schema::column_as(batch, CODE, &DataType::Utf8)?;
        let timestamps = schema::column_as(
            batch,
            TIMESTAMP,
            &DataType::Timestamp(TimeUnit::Microsecond, None),
        )?;
        let values = schema::column_as(batch, NUMERICAL_VALUE, &DataType::Float64)?;

        let patient_ids = downcast::<Int64Array>(&patient_ids, PATIENT_ID)?;
        let codes = downcast::<StringArray>(&codes, CODE)?;
        let timestamps = downcast::<TimestampMicrosecondArray>(&timestamps, TIMESTAMP)?;
        let values = downcast::<Float64Array>(&values, NUMERICAL_VALUE)?;

        (0..batch.num_rows())
            .map(|i| {
                if patient_ids.is_null(i) || codes.is_null(i) {
                    return Err(TabularError::Schema(format!(
                        "Row {i} has a null {PATIENT_ID} or {CODE}"
                    )));
                }
                let timestamp = if timestamps.is_null(i) {
                    None
                } else {
                    Some(timestamps.value_as_datetime(i).ok_or_else(|| {
                        TabularError::Schema(format!("Row {i} has an out of range {TIMESTAMP}"))
                    })?)
                };
                let numerical_value = (!values.is_null(i)).then(|| values.value(i));
                Ok(Self {
                    patient_id: patient_ids.value(i),
                    code: codes.value(i).to_string(),
                    timestamp,
                    numerical_value,
                })
            })
            .collect()
    }

    /// Convert a sequence of batches, preserving row order
    pub fn from_record_batches(batches: &[RecordBatch]) -> Result<Vec<Self>> {
        let mut events = Vec::with_capacity(batches.iter().map(RecordBatch::num_rows).sum());
        for batch in batches {
            events.extend(Self::from_record_batch(batch)?);
        }
        Ok(events)
    }
}

fn downcast<'a, T: Array + 'static>(array: &'a arrow::array::ArrayRef, name: &str) -> Result<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| TabularError::Schema(format!("Column '{name}' has an unexpected type")))
}

/// Check that events are sorted by (patient_id, timestamp)
///
/// Static facts (null timestamps) sort before every timestamped event of the
/// same patient.
pub fn check_event_order(events: &[EventRecord]) -> Result<()> {
    for (i, pair) in events.windows(2).enumerate() {
        let (prev, next) = (&pair[0], &pair[1]);
        if (prev.patient_id, prev.timestamp) > (next.patient_id, next.timestamp) {
            return Err(TabularError::OrderingViolation {
                row: i + 1,
                detail: format!(
                    "event ({}, {:?}) follows ({}, {:?})",
                    next.patient_id, next.timestamp, prev.patient_id, prev.timestamp
                ),
            });
        }
    }
    Ok(())
}

/// A (code, value) observation made at an event instant
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub code: Arc<str>,
    pub value: Option<f64>,
}

impl Observation {
    #[must_use]
    pub fn new(code: &str, value: Option<f64>) -> Self {
        Self {
            code: Arc::from(code),
            value,
        }
    }
}

/// All observations of one patient at one timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct EventInstant {
    pub patient_id: i64,
    pub timestamp: NaiveDateTime,
    pub observations: SmallVec<[Observation; 4]>,
}

/// A shard's event instants in (patient_id, timestamp) order
///
/// Row `i` of every dynamic matrix, broadcast static matrix and label table of
/// the shard refers to instant `i` of this stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventStream {
    instants: Vec<EventInstant>,
}

impl EventStream {
    /// Wrap already grouped instants without checking their order
    #[must_use]
    pub const fn from_instants(instants: Vec<EventInstant>) -> Self {
        Self { instants }
    }

    /// Group timestamped events into instants
    ///
    /// Only events whose code passes `keep` contribute; an instant made up
    /// solely of rejected codes does not become a row. Fails with an ordering
    /// violation when `events` is not sorted.
    pub fn from_events<F>(events: &[EventRecord], keep: F) -> Result<Self>
    where
        F: Fn(&str) -> bool,
    {
        check_event_order(events)?;

        let mut instants: Vec<EventInstant> = Vec::new();
        for event in events {
            let Some(timestamp) = event.timestamp else {
                continue;
            };
            if !keep(&event.code) {
                continue;
            }
            let observation = Observation::new(&event.code, event.numerical_value);
            match instants.last_mut() {
                Some(last) if last.patient_id == event.patient_id && last.timestamp == timestamp => {
                    last.observations.push(observation);
                }
                _ => {
                    let mut observations = SmallVec::new();
                    observations.push(observation);
                    instants.push(EventInstant {
                        patient_id: event.patient_id,
                        timestamp,
                        observations,
                    });
                }
            }
        }
        Ok(Self { instants })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instants.is_empty()
    }

    #[must_use]
    pub fn instants(&self) -> &[EventInstant] {
        &self.instants
    }

    /// Check that instants are sorted by (patient_id, timestamp)
    ///
    /// Equal keys are allowed; they are treated as ties.
    pub fn check_sorted(&self) -> Result<()> {
        for (i, pair) in self.instants.windows(2).enumerate() {
            let prev = (pair[0].patient_id, pair[0].timestamp);
            let next = (pair[1].patient_id, pair[1].timestamp);
            if prev > next {
                return Err(TabularError::OrderingViolation {
                    row: i + 1,
                    detail: format!("instant {next:?} follows {prev:?}"),
                });
            }
        }
        Ok(())
    }

    /// Contiguous row ranges of each patient, in stream order
    #[must_use]
    pub fn patient_ranges(&self) -> Vec<(i64, Range<usize>)> {
        let mut ranges: Vec<(i64, Range<usize>)> = Vec::new();
        for (row, instant) in self.instants.iter().enumerate() {
            match ranges.last_mut() {
                Some((patient_id, range)) if *patient_id == instant.patient_id => {
                    range.end = row + 1;
                }
                _ => ranges.push((instant.patient_id, row..row + 1)),
            }
        }
        ranges
    }

    /// Event index table: one (event_id, patient_id, timestamp) row per instant
    pub fn to_index_batch(&self) -> Result<RecordBatch> {
        let event_ids = UInt64Array::from_iter_values(0..self.instants.len() as u64);
        let patient_ids =
            Int64Array::from_iter_values(self.instants.iter().map(|i| i.patient_id));
        let timestamps = TimestampMicrosecondArray::from_iter_values(
            self.instants
                .iter()
                .map(|i| i.timestamp.and_utc().timestamp_micros()),
        );
        Ok(RecordBatch::try_new(
            schema::event_index_schema(),
            vec![
                Arc::new(event_ids),
                Arc::new(patient_ids),
                Arc::new(timestamps),
            ],
        )?)
    }
}

/// Event index of one shard, as written next to its matrices
#[derive(Debug, Clone, PartialEq)]
pub struct EventIndex {
    batch: RecordBatch,
}

impl EventIndex {
    pub fn from_stream(stream: &EventStream) -> Result<Self> {
        Ok(Self {
            batch: stream.to_index_batch()?,
        })
    }

    /// Join batches read back from an index file
    pub fn from_batches(batches: &[RecordBatch]) -> Result<Self> {
        let schema = batches
            .first()
            .map_or_else(schema::event_index_schema, RecordBatch::schema);
        Ok(Self {
            batch: concat_batches(&schema, batches)?,
        })
    }

    #[must_use]
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
