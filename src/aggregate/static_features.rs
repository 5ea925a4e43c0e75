//! Per-patient static features and their broadcast onto event instants.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::catalog::FeatureCatalog;
use crate::error::{Result, TabularError};
use crate::models::{EventRecord, EventStream, check_event_order};
use crate::schema::Aggregation;
use crate::sparse::CsrMatrix;

/// Static feature matrices of one shard, one row per patient
#[derive(Debug, Clone, PartialEq)]
pub struct StaticMatrices {
    /// Patient of each row, in order of first appearance
    pub patients: Vec<i64>,
    /// 1 where the patient has an untimed occurrence of the code
    pub present: CsrMatrix,
    /// Value of the patient's first untimed occurrence of the code
    pub first: CsrMatrix,
}

impl StaticMatrices {
    /// The per-patient matrix of a static aggregation
    pub fn matrix(&self, agg: Aggregation) -> Result<&CsrMatrix> {
        match agg {
            Aggregation::StaticPresent => Ok(&self.present),
            Aggregation::StaticFirst => Ok(&self.first),
            other => Err(TabularError::InvalidAggregation(format!(
                "{other} is not a static aggregation"
            ))),
        }
    }

    /// Repeat each patient's row onto every event instant of that patient
    ///
    /// The result has the row space of the dynamic matrices built from
    /// `stream`. Patients absent from the static rows get zero rows.
    pub fn broadcast(&self, agg: Aggregation, stream: &EventStream) -> Result<CsrMatrix> {
        let matrix = self.matrix(agg)?;
        let row_of: FxHashMap<i64, usize> = self
            .patients
            .iter()
            .enumerate()
            .map(|(row, &patient_id)| (patient_id, row))
            .collect();

        // Appended all-zero row for patients without a static row.
        let zero_row = matrix.n_rows();
        let padded = CsrMatrix::vstack(&[matrix, &CsrMatrix::zeros(1, matrix.n_cols())])?;
        let rows: Vec<usize> = stream
            .instants()
            .iter()
            .map(|instant| row_of.get(&instant.patient_id).copied().unwrap_or(zero_row))
            .collect();
        padded.select_rows(&rows)
    }
}

/// Build the static matrices of one shard
///
/// Every patient of `events` gets a row; patients without untimed events get
/// all-zero rows. Untimed codes missing from the catalog are ignored.
///
/// # Errors
/// Fails with [`TabularError::OrderingViolation`] when `events` is not sorted.
pub fn build_static(events: &[EventRecord], catalog: &FeatureCatalog) -> Result<StaticMatrices> {
    check_event_order(events)?;

    let present_index = catalog.code_index(Aggregation::StaticPresent);
    let first_index = catalog.code_index(Aggregation::StaticFirst);

    let mut patients: Vec<i64> = Vec::new();
    let mut present: Vec<(usize, usize, f64)> = Vec::new();
    let mut first: Vec<(usize, usize, f64)> = Vec::new();
    // Codes already seen for the current patient; only the first occurrence counts.
    let mut seen: FxHashSet<&str> = FxHashSet::default();

    for event in events {
        if patients.last() != Some(&event.patient_id) {
            patients.push(event.patient_id);
            seen.clear();
        }
        if !event.is_static() || !seen.insert(event.code.as_str()) {
            continue;
        }
        let row = patients.len() - 1;
        if let Some(&col) = present_index.get(event.code.as_str()) {
            present.push((row, col, 1.0));
        }
        if let (Some(&col), Some(value)) = (first_index.get(event.code.as_str()), event.numerical_value) {
            first.push((row, col, value));
        }
    }

    Ok(StaticMatrices {
        present: CsrMatrix::from_triplets(patients.len(), present_index.len(), &present)?,
        first: CsrMatrix::from_triplets(patients.len(), first_index.len(), &first)?,
        patients,
    })
}
