use chrono::TimeDelta;
use meds_tab::catalog::compute_shard_frequencies;
use meds_tab::models::{EventInstant, Observation};
use meds_tab::{Aggregation, EventRecord, EventStream, FeatureCatalog, TabularError, WindowSize, summarize_window};
use smallvec::smallvec;

use crate::utils::{timed, ts, untimed};

fn catalog_of(events: &[EventRecord]) -> FeatureCatalog {
    FeatureCatalog::from_frequencies(&compute_shard_frequencies(events)).unwrap()
}

fn window(label: &str) -> WindowSize {
    label.parse().unwrap()
}

/// Two patients with HR readings one hour apart
fn hr_events() -> Vec<EventRecord> {
    vec![
        untimed(1, "EYE", None),
        timed(1, "HR", ts(1, 1), Some(80.0)),
        timed(1, "HR", ts(1, 2), Some(90.0)),
        timed(1, "HR", ts(1, 3), Some(100.0)),
        timed(2, "HR", ts(1, 1), Some(60.0)),
        timed(2, "HR", ts(1, 2), Some(70.0)),
        timed(2, "HR", ts(1, 3), Some(65.0)),
    ]
}

fn column(matrix: &meds_tab::CsrMatrix, col: usize) -> Vec<f64> {
    (0..matrix.n_rows()).map(|row| matrix.get(row, col)).collect()
}

#[test]
fn test_hr_scenario_30d_and_1h() {
    let events = hr_events();
    let catalog = catalog_of(&events);
    let stream = EventStream::from_events(&events, |code| catalog.is_dynamic_code(code)).unwrap();
    assert_eq!(stream.len(), 6);

    let counts = summarize_window(&stream, &catalog, Aggregation::CodeCount, &window("30d")).unwrap();
    assert_eq!(column(&counts, 0), vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    let sums = summarize_window(&stream, &catalog, Aggregation::ValueSum, &window("30d")).unwrap();
    assert_eq!(column(&sums, 0), vec![80.0, 170.0, 270.0, 60.0, 130.0, 195.0]);

    // The window (t - 1h, t] excludes the reading one hour earlier.
    let counts = summarize_window(&stream, &catalog, Aggregation::CodeCount, &window("1h")).unwrap();
    assert_eq!(column(&counts, 0), vec![1.0; 6]);
    let sums = summarize_window(&stream, &catalog, Aggregation::ValueSum, &window("1h")).unwrap();
    assert_eq!(column(&sums, 0), vec![80.0, 90.0, 100.0, 60.0, 70.0, 65.0]);

    let maxs = summarize_window(&stream, &catalog, Aggregation::ValueMax, &window("2h")).unwrap();
    assert_eq!(column(&maxs, 0), vec![80.0, 90.0, 100.0, 60.0, 70.0, 70.0]);
    let mins = summarize_window(&stream, &catalog, Aggregation::ValueMin, &WindowSize::Full).unwrap();
    assert_eq!(column(&mins, 0), vec![80.0, 80.0, 80.0, 60.0, 60.0, 60.0]);
}

#[test]
fn test_shape_matches_instants_and_kind_columns() {
    let events = vec![
        timed(1, "A", ts(1, 0), None),
        timed(1, "B", ts(1, 0), Some(1.0)),
        timed(1, "C", ts(2, 0), Some(2.0)),
        untimed(2, "S", Some(3.0)),
        timed(2, "A", ts(3, 0), None),
    ];
    let catalog = catalog_of(&events);
    let stream = EventStream::from_events(&events, |code| catalog.is_dynamic_code(code)).unwrap();
    for agg in Aggregation::ALL.into_iter().filter(|agg| agg.is_dynamic()) {
        let matrix = summarize_window(&stream, &catalog, agg, &window("7d")).unwrap();
        assert_eq!(matrix.n_rows(), 3, "{agg}");
        assert_eq!(matrix.n_cols(), catalog.features_for(agg).len(), "{agg}");
    }
    assert_eq!(catalog.features_for(Aggregation::CodeCount).len(), 3);
    assert_eq!(catalog.features_for(Aggregation::ValueSumSqd).len(), 2);
}

#[test]
fn test_full_window_is_prefix_sum() {
    let values = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
    let events: Vec<EventRecord> = values
        .iter()
        .enumerate()
        .map(|(day, &v)| timed(7, "LAB", ts(day as u32 + 1, 0), Some(v)))
        .collect();
    let catalog = catalog_of(&events);
    let stream = EventStream::from_events(&events, |_| true).unwrap();

    let sums = summarize_window(&stream, &catalog, Aggregation::ValueSum, &WindowSize::Full).unwrap();
    let mut prefix = 0.0;
    for (row, v) in values.iter().enumerate() {
        prefix += v;
        assert_eq!(sums.get(row, 0), prefix);
    }

    // A window wider than the observed span behaves like the full window.
    let wide = summarize_window(&stream, &catalog, Aggregation::ValueSum, &window("1y")).unwrap();
    assert_eq!(wide, sums);
}

#[test]
fn test_shrinking_window_never_increases_cells() {
    let mut events = Vec::new();
    for patient in 1..=3 {
        for (day, hour) in [(1, 0), (1, 6), (2, 0), (4, 12), (9, 0), (9, 0), (20, 3)] {
            events.push(timed(patient, "LAB", ts(day, hour), Some(f64::from(hour + 1))));
            if day % 2 == 0 {
                events.push(timed(patient, "DX", ts(day, hour), None));
            }
        }
    }
    let catalog = catalog_of(&events);
    let stream = EventStream::from_events(&events, |_| true).unwrap();

    let windows = [window("12h"), window("2d"), window("7d"), WindowSize::Full];
    for agg in [Aggregation::CodeCount, Aggregation::ValueCount, Aggregation::ValueSum, Aggregation::ValueSumSqd] {
        let matrices: Vec<_> = windows
            .iter()
            .map(|w| summarize_window(&stream, &catalog, agg, w).unwrap())
            .collect();
        for pair in matrices.windows(2) {
            let (narrow, wide) = (&pair[0], &pair[1]);
            for row in 0..narrow.n_rows() {
                for col in 0..narrow.n_cols() {
                    assert!(narrow.get(row, col) <= wide.get(row, col), "{agg} at ({row}, {col})");
                }
            }
        }
    }
}

#[test]
fn test_unobserved_rows_stay_zero() {
    let events = vec![
        timed(1, "HR", ts(1, 1), Some(80.0)),
        timed(1, "DX", ts(1, 2), None),
        timed(1, "HR", ts(1, 3), Some(90.0)),
    ];
    let catalog = catalog_of(&events);
    let stream = EventStream::from_events(&events, |_| true).unwrap();
    let counts = summarize_window(&stream, &catalog, Aggregation::CodeCount, &WindowSize::Full).unwrap();
    let hr = catalog.code_index(Aggregation::CodeCount)["HR"];
    let dx = catalog.code_index(Aggregation::CodeCount)["DX"];
    assert_eq!(column(&counts, hr), vec![1.0, 0.0, 2.0]);
    assert_eq!(column(&counts, dx), vec![0.0, 1.0, 0.0]);
}

#[test]
fn test_ties_are_inside_each_others_windows() {
    let events = vec![
        timed(1, "HR", ts(1, 1), Some(2.0)),
        timed(1, "HR", ts(1, 1), Some(5.0)),
        timed(1, "HR", ts(1, 1), None),
    ];
    let catalog = catalog_of(&events);
    let stream = EventStream::from_events(&events, |_| true).unwrap();
    let span = WindowSize::bounded("1s", TimeDelta::seconds(1)).unwrap();
    let counts = summarize_window(&stream, &catalog, Aggregation::CodeCount, &span).unwrap();
    let value_counts = summarize_window(&stream, &catalog, Aggregation::ValueCount, &span).unwrap();
    let sumsqd = summarize_window(&stream, &catalog, Aggregation::ValueSumSqd, &span).unwrap();
    assert_eq!(counts.get(0, 0), 3.0);
    assert_eq!(value_counts.get(0, 0), 2.0);
    assert_eq!(sumsqd.get(0, 0), 29.0);
}

#[test]
fn test_empty_shard() {
    let catalog = FeatureCatalog::new(vec!["HR/code".to_string(), "HR/value".to_string()]).unwrap();
    let stream = EventStream::default();
    let matrix = summarize_window(&stream, &catalog, Aggregation::ValueMax, &window("30d")).unwrap();
    assert_eq!(matrix.shape(), (0, 1));
}

#[test]
fn test_unsorted_stream_is_an_ordering_violation() {
    let catalog = FeatureCatalog::new(vec!["HR/code".to_string()]).unwrap();
    let instant = |patient_id, hour| EventInstant {
        patient_id,
        timestamp: ts(1, hour),
        observations: smallvec![Observation::new("HR", None)],
    };
    let stream = EventStream::from_instants(vec![instant(1, 2), instant(1, 1)]);
    assert!(matches!(
        summarize_window(&stream, &catalog, Aggregation::CodeCount, &WindowSize::Full),
        Err(TabularError::OrderingViolation { row: 1, .. })
    ));

    let stream = EventStream::from_instants(vec![instant(2, 1), instant(1, 1)]);
    assert!(summarize_window(&stream, &catalog, Aggregation::CodeCount, &WindowSize::Full).is_err());
}

fn lab_sums(values: &[f64], label: &str) -> Vec<f64> {
    let events: Vec<EventRecord> = values
        .iter()
        .zip(1..)
        .map(|(&value, day)| timed(1, "LAB", ts(day, 0), Some(value)))
        .collect();
    let catalog = catalog_of(&events);
    let stream = EventStream::from_events(&events, |_| true).unwrap();
    column(&summarize_window(&stream, &catalog, Aggregation::ValueSum, &window(label)).unwrap(), 0)
}

#[test]
fn test_sum_forgets_values_that_left_the_window() {
    let sums = lab_sums(&[1e16, 1.0, 1.0], "2d");
    assert_eq!(sums[0], 1e16);
    assert_eq!(sums[2], 2.0);

    let sums = lab_sums(&[f64::NAN, 1.0, 1.0], "2d");
    assert!(sums[0].is_nan() && sums[1].is_nan());
    assert_eq!(sums[2], 2.0);

    let sums = lab_sums(&[f64::INFINITY, f64::NEG_INFINITY, 3.0, 4.0], "1d");
    assert_eq!(sums, vec![f64::INFINITY, f64::NEG_INFINITY, 3.0, 4.0]);
}

fn same(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// Recompute one window aggregate from scratch at instant `at`
fn recompute(series: &[(chrono::NaiveDateTime, f64)], at: chrono::NaiveDateTime, span: Option<TimeDelta>, agg: Aggregation) -> f64 {
    let inside: Vec<f64> = series
        .iter()
        .filter(|&&(t, _)| t <= at && span.is_none_or(|span| t > at - span))
        .map(|&(_, v)| v)
        .collect();
    match agg {
        Aggregation::ValueSum => inside.iter().fold(0.0, |acc, &v| acc + v),
        Aggregation::ValueSumSqd => inside.iter().fold(0.0, |acc, &v| acc + v * v),
        Aggregation::ValueMin | Aggregation::ValueMax if inside.iter().any(|v| v.is_nan()) => f64::NAN,
        Aggregation::ValueMin => inside.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregation::ValueMax => inside.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        other => panic!("not a value aggregation: {other}"),
    }
}

#[test]
fn test_windows_match_recomputation_over_mixed_values() {
    let values = [
        1e16,
        -3.5,
        1.0,
        f64::NAN,
        2.0,
        f64::INFINITY,
        -1e16,
        0.25,
        f64::NEG_INFINITY,
        7.0,
        -0.5,
        1e-9,
        1e300,
        -1e300,
        4.0,
    ];
    // Hours since the start; repeated hours are ties within a patient
    let hours = [0, 5, 5, 13, 30, 31, 50, 80, 81, 82, 0, 2, 2, 40, 41];
    let events: Vec<EventRecord> = values
        .iter()
        .zip(hours)
        .enumerate()
        .map(|(i, (&value, hour))| {
            let patient = if i < 10 { 1 } else { 2 };
            timed(patient, "LAB", ts(1, 0) + TimeDelta::hours(hour), Some(value))
        })
        .collect();
    let catalog = catalog_of(&events);
    let stream = EventStream::from_events(&events, |_| true).unwrap();

    let windows = [
        (window("1h"), Some(TimeDelta::hours(1))),
        (window("6h"), Some(TimeDelta::hours(6))),
        (window("2d"), Some(TimeDelta::days(2))),
        (WindowSize::Full, None),
    ];
    for (size, span) in &windows {
        for agg in [Aggregation::ValueSum, Aggregation::ValueSumSqd, Aggregation::ValueMin, Aggregation::ValueMax] {
            let actual = column(&summarize_window(&stream, &catalog, agg, size).unwrap(), 0);
            for (row, instant) in stream.instants().iter().enumerate() {
                let series: Vec<_> = events
                    .iter()
                    .filter(|e| e.patient_id == instant.patient_id)
                    .filter_map(|e| Some((e.timestamp?, e.numerical_value?)))
                    .collect();
                let expected = recompute(&series, instant.timestamp, *span, agg);
                assert!(
                    same(actual[row], expected),
                    "{agg} over {size:?} at row {row}: got {}, expected {expected}",
                    actual[row]
                );
            }
        }
    }
}
