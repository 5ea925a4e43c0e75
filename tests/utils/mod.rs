use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray, UInt64Array};
use arrow::record_batch::RecordBatch;
use chrono::{NaiveDate, NaiveDateTime};
use meds_tab::schema::{EVENT_ID, PATIENT_ID, events_schema};
use meds_tab::utils::io::{read_parquet, write_parquet_atomic};
use meds_tab::{EventRecord, LabelTable, Result, TabularLayout, TabularizeConfig};
use tempfile::TempDir;

/// Timestamp on day `day` of January 2020 at `hour`
#[must_use]
pub fn ts(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .expect("valid test timestamp")
}

/// A timed event
#[must_use]
pub fn timed(patient_id: i64, code: &str, at: NaiveDateTime, value: Option<f64>) -> EventRecord {
    EventRecord::new(patient_id, code, Some(at), value)
}

/// An untimed (static) event
#[must_use]
pub fn untimed(patient_id: i64, code: &str, value: Option<f64>) -> EventRecord {
    EventRecord::new(patient_id, code, None, value)
}

/// Encode events with the MEDS event schema
pub fn events_batch(events: &[EventRecord]) -> Result<RecordBatch> {
    let patient_ids = Int64Array::from_iter_values(events.iter().map(|e| e.patient_id));
    let codes: StringArray = events.iter().map(|e| Some(e.code.as_str())).collect();
    let timestamps: TimestampMicrosecondArray = events
        .iter()
        .map(|e| e.timestamp.map(|t| t.and_utc().timestamp_micros()))
        .collect();
    let values: Float64Array = events.iter().map(|e| e.numerical_value).collect();
    Ok(RecordBatch::try_new(
        events_schema(),
        vec![
            Arc::new(patient_ids),
            Arc::new(codes),
            Arc::new(timestamps),
            Arc::new(values),
        ],
    )?)
}

/// Write an event shard
pub fn write_events(path: &Path, events: &[EventRecord]) -> Result<()> {
    write_parquet_atomic(path, &events_batch(events)?)
}

/// The events of a small cohort, per (split, shard)
///
/// Every patient has a static EYE code, some a static HEIGHT value, and HR
/// readings one hour apart. Odd patients additionally have a DX code.
#[must_use]
pub fn cohort() -> Vec<(&'static str, &'static str, Vec<EventRecord>)> {
    let patient = |id: i64, height: Option<f64>| {
        let mut events = vec![untimed(id, "EYE//BLUE", None)];
        if let Some(height) = height {
            events.push(untimed(id, "HEIGHT", Some(height)));
        }
        for (hour, hr) in [(1, 80.0), (2, 95.0), (3, 70.0)] {
            events.push(timed(id, "HR", ts(1, hour), Some(hr + id as f64)));
            if id % 2 == 1 && hour == 2 {
                events.push(timed(id, "DX//1", ts(1, hour), None));
            }
        }
        events
    };
    vec![
        ("train", "0", [patient(1, Some(170.0)), patient(2, None)].concat()),
        ("train", "1", [patient(3, Some(180.0)), patient(4, Some(160.0))].concat()),
        ("tuning", "0", [patient(5, None), patient(6, Some(150.0))].concat()),
        ("held_out", "0", [patient(7, Some(175.0)), patient(8, None)].concat()),
    ]
}

/// A temporary cohort on disk with its configuration
pub struct Fixture {
    pub dir: TempDir,
    pub config: TabularizeConfig,
}

impl Fixture {
    /// Write [`cohort`] into a fresh temporary directory
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let mut config = TabularizeConfig::new(dir.path().join("meds"), dir.path().join("tabularized"));
        config.window_sizes = vec!["1h".parse()?, "30d".parse()?, meds_tab::WindowSize::Full];
        config.aggs = vec![
            meds_tab::Aggregation::CodeCount,
            meds_tab::Aggregation::ValueSum,
            meds_tab::Aggregation::StaticPresent,
            meds_tab::Aggregation::StaticFirst,
        ];
        config.num_workers = 2;
        config.show_progress = false;

        let fixture = Self { dir, config };
        let layout = fixture.layout();
        for (split, shard, events) in cohort() {
            write_events(&layout.events_file(split, shard), &events)?;
        }
        Ok(fixture)
    }

    #[must_use]
    pub fn layout(&self) -> TabularLayout {
        self.config.layout()
    }

    /// Label every event instant of each shard, positive for odd patients
    pub fn write_labels(&self) -> Result<()> {
        let layout = self.layout();
        for (split, shard, _) in cohort() {
            let batches = read_parquet(&layout.index_file(split, shard), None)?;
            let mut event_ids = Vec::new();
            let mut labels = Vec::new();
            for batch in &batches {
                let ids = column::<UInt64Array>(batch, EVENT_ID);
                let patients = column::<Int64Array>(batch, PATIENT_ID);
                for i in 0..batch.num_rows() {
                    event_ids.push(ids.value(i) as usize);
                    labels.push(if patients.value(i) % 2 == 1 { 1.0 } else { 0.0 });
                }
            }
            LabelTable::new(event_ids, labels)?.write(&layout.task_file(split, shard))?;
        }
        Ok(())
    }
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> &'a T {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .expect("index column")
}
