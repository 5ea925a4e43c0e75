//! Trailing-window aggregation of dynamic features
//!
//! Every observation of a shard is exploded into a `(patient, column,
//! timestamp, row)` tuple. Tuples are grouped by `(patient, column)` and each
//! group is swept in time order with an accumulator holding the observations
//! inside the window `(t - w, t]`. The aggregate at `t` is written to the row
//! of the instant at `t`; rows where a feature was not observed stay zero.

use std::collections::VecDeque;

use chrono::NaiveDateTime;
use rayon::prelude::*;

use crate::catalog::FeatureCatalog;
use crate::error::{Result, TabularError};
use crate::models::EventStream;
use crate::schema::{Aggregation, WindowSize};
use crate::sparse::CsrMatrix;

/// One observation of one feature column at one instant row
#[derive(Debug, Clone, Copy)]
struct Point {
    patient_id: i64,
    col: usize,
    timestamp: NaiveDateTime,
    row: usize,
    value: f64,
}

/// Running statistic over the observations inside a window
#[derive(Debug)]
enum Accumulator {
    /// Number of observations
    Count(VecDeque<NaiveDateTime>),
    /// Sum of values, or of squared values
    ///
    /// `total` is only ever added to; after an eviction it is summed afresh
    /// from the values left in the window.
    Sum {
        window: VecDeque<(NaiveDateTime, f64)>,
        total: f64,
        squared: bool,
    },
    /// Minimum or maximum, kept in a monotonic deque
    ///
    /// NaN values are tracked apart and make the extremum NaN while they are
    /// inside the window.
    Extremum {
        deque: VecDeque<(NaiveDateTime, f64)>,
        nans: VecDeque<NaiveDateTime>,
        max: bool,
    },
}

impl Accumulator {
    fn new(agg: Aggregation) -> Result<Self> {
        Ok(match agg {
            Aggregation::CodeCount | Aggregation::ValueCount => Self::Count(VecDeque::new()),
            Aggregation::ValueSum | Aggregation::ValueSumSqd => Self::Sum {
                window: VecDeque::new(),
                total: 0.0,
                squared: agg == Aggregation::ValueSumSqd,
            },
            Aggregation::ValueMin | Aggregation::ValueMax => Self::Extremum {
                deque: VecDeque::new(),
                nans: VecDeque::new(),
                max: agg == Aggregation::ValueMax,
            },
            Aggregation::StaticPresent | Aggregation::StaticFirst => {
                return Err(TabularError::InvalidAggregation(format!(
                    "{agg} is not a windowed aggregation"
                )));
            }
        })
    }

    fn push(&mut self, timestamp: NaiveDateTime, value: f64) {
        match self {
            Self::Count(window) => window.push_back(timestamp),
            Self::Sum {
                window,
                total,
                squared,
            } => {
                let value = if *squared { value * value } else { value };
                *total += value;
                window.push_back((timestamp, value));
            }
            Self::Extremum { nans, .. } if value.is_nan() => nans.push_back(timestamp),
            Self::Extremum { deque, max, .. } => {
                let dominated = |kept: f64| if *max { kept <= value } else { kept >= value };
                while deque.back().is_some_and(|&(_, kept)| dominated(kept)) {
                    deque.pop_back();
                }
                deque.push_back((timestamp, value));
            }
        }
    }

    /// Drop observations at or before `cutoff`
    fn evict(&mut self, cutoff: NaiveDateTime) {
        match self {
            Self::Count(window) => {
                while window.front().is_some_and(|&ts| ts <= cutoff) {
                    window.pop_front();
                }
            }
            Self::Sum { window, total, .. } => {
                let before = window.len();
                while window.front().is_some_and(|&(ts, _)| ts <= cutoff) {
                    window.pop_front();
                }
                if window.len() != before {
                    *total = window.iter().fold(0.0, |acc, &(_, value)| acc + value);
                }
            }
            Self::Extremum { deque, nans, .. } => {
                while deque.front().is_some_and(|&(ts, _)| ts <= cutoff) {
                    deque.pop_front();
                }
                while nans.front().is_some_and(|&ts| ts <= cutoff) {
                    nans.pop_front();
                }
            }
        }
    }

    fn value(&self) -> f64 {
        match self {
            Self::Count(window) => window.len() as u64 as f64,
            Self::Sum { total, .. } => *total,
            Self::Extremum { nans, .. } if !nans.is_empty() => f64::NAN,
            Self::Extremum { deque, .. } => deque.front().map_or(0.0, |&(_, value)| value),
        }
    }
}

/// Explode instants into the points an aggregation consumes
///
/// `code/count` takes every observation of a catalog code; the value
/// aggregations take only observations carrying a value.
fn explode(stream: &EventStream, catalog: &FeatureCatalog, agg: Aggregation) -> Vec<Point> {
    let code_index = catalog.code_index(agg);
    let counts_occurrences = agg == Aggregation::CodeCount;

    let mut points = Vec::new();
    for (row, instant) in stream.instants().iter().enumerate() {
        for observation in &instant.observations {
            let Some(&col) = code_index.get(observation.code.as_ref()) else {
                continue;
            };
            let value = if counts_occurrences {
                1.0
            } else {
                match observation.value {
                    Some(value) => value,
                    None => continue,
                }
            };
            points.push(Point {
                patient_id: instant.patient_id,
                col,
                timestamp: instant.timestamp,
                row,
                value,
            });
        }
    }
    points
}

/// Sweep one `(patient, column)` group in time order
///
/// Points with equal timestamps share a row and are all inside each other's
/// windows, so the whole tie block is pushed before the aggregate is read.
fn sweep_group(group: &[Point], agg: Aggregation, window: &WindowSize) -> Result<Vec<(usize, usize, f64)>> {
    let mut acc = Accumulator::new(agg)?;
    let mut out = Vec::new();
    for block in group.chunk_by(|a, b| a.timestamp == b.timestamp) {
        let head = block[0];
        for point in block {
            acc.push(point.timestamp, point.value);
        }
        if let Some(cutoff) = window.cutoff(head.timestamp) {
            acc.evict(cutoff);
        }
        out.push((head.row, head.col, acc.value()));
    }
    Ok(out)
}

/// Aggregate one shard's dynamic features over a trailing window
///
/// The result has one row per event instant of `stream`, in stream order, and
/// one column per catalog column selected by `agg`, in catalog order.
///
/// # Errors
/// Fails with [`TabularError::OrderingViolation`] when the stream is not
/// sorted by (patient_id, timestamp), and with
/// [`TabularError::InvalidAggregation`] for static aggregations.
pub fn summarize_window(
    stream: &EventStream,
    catalog: &FeatureCatalog,
    agg: Aggregation,
    window: &WindowSize,
) -> Result<CsrMatrix> {
    if !agg.is_dynamic() {
        return Err(TabularError::InvalidAggregation(format!(
            "{agg} is not a windowed aggregation"
        )));
    }
    stream.check_sorted()?;

    let n_cols = catalog.features_for(agg).len();
    let mut points = explode(stream, catalog, agg);
    // Stable: time order within each group is the stream order.
    points.par_sort_by_key(|p| (p.patient_id, p.col));

    let groups: Vec<&[Point]> = points
        .chunk_by(|a, b| a.patient_id == b.patient_id && a.col == b.col)
        .collect();
    let triplets: Vec<(usize, usize, f64)> = groups
        .par_iter()
        .map(|group| sweep_group(group, agg, window))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();

    CsrMatrix::from_triplets(stream.len(), n_cols, &triplets)
}
