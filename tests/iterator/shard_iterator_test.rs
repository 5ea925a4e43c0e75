use meds_tab::catalog::FeatureFrequencies;
use meds_tab::store::layout::TRAIN_SPLIT;
use meds_tab::{
    Aggregation, CsrMatrix, DataIter, FeatureCatalog, InMemoryIter, InclusionSet, IterStatus, Pipeline,
    Result, ShardBatch, ShardIterator, TabularError, WindowSize,
};

use crate::utils::Fixture;

fn tabularized() -> Fixture {
    let fixture = Fixture::new().unwrap();
    Pipeline::new(fixture.config.clone()).unwrap().run_all().unwrap();
    fixture.write_labels().unwrap();
    fixture
}

fn drain(iter: &mut dyn DataIter) -> Vec<ShardBatch> {
    let mut batches = Vec::new();
    loop {
        let status = iter
            .next(&mut |batch: &ShardBatch| -> Result<()> {
                batches.push(batch.clone());
                Ok(())
            })
            .unwrap();
        if status == IterStatus::Exhausted {
            return batches;
        }
    }
}

#[test]
fn test_feature_layout() {
    let fixture = tabularized();
    let iter = ShardIterator::from_config(&fixture.config, TRAIN_SPLIT).unwrap();
    assert_eq!(iter.shards(), ["0", "1"]);
    // 3 windows x (2 code counts + 1 value sum) + 2 present + 1 first
    assert_eq!(iter.n_features(), 12);
    assert_eq!(
        &iter.feature_names()[..3],
        ["DX//1/code/1h/count", "HR/code/1h/count", "HR/value/1h/sum"]
    );
    assert_eq!(
        &iter.feature_names()[9..],
        ["EYE//BLUE/static/present", "HEIGHT/static/present", "HEIGHT/static/first"]
    );
}

#[test]
fn test_single_column_filter_keeps_values() {
    let fixture = tabularized();
    let layout = fixture.layout();
    let catalog = FeatureCatalog::load(&layout.feature_columns_file()).unwrap();
    let freqs = FeatureFrequencies::load(&layout.feature_freqs_file()).unwrap();
    let codes = vec!["HR/code".to_string()];
    let inclusion = InclusionSet::resolve(&catalog, &freqs, Some(&codes), None).unwrap();
    assert_eq!(inclusion.len(), 1);

    let mut iter = ShardIterator::new(
        layout,
        TRAIN_SPLIT,
        &catalog,
        &inclusion,
        &[WindowSize::Full],
        &[Aggregation::CodeCount, Aggregation::StaticPresent],
    )
    .unwrap();
    assert_eq!(iter.feature_names(), ["HR/code/full/count"]);

    let batches = drain(&mut iter);
    assert_eq!(batches.len(), 2);
    for batch in &batches {
        assert_eq!(batch.features.shape(), (6, 1));
        let counts: Vec<f64> = (0..6).map(|row| batch.features.get(row, 0)).collect();
        assert_eq!(counts, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }
    assert_eq!(batches[0].labels, vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
}

#[test]
fn test_frequency_threshold() {
    let mut fixture = tabularized();
    fixture.config.min_code_inclusion_frequency = Some(3);
    let iter = ShardIterator::from_config(&fixture.config, TRAIN_SPLIT).unwrap();
    assert!(!iter.feature_names().iter().any(|name| name.starts_with("DX//1")));
    assert_eq!(iter.n_features(), 9);

    fixture.config.codes = Some(vec!["HR".to_string()]);
    let iter = ShardIterator::from_config(&fixture.config, TRAIN_SPLIT).unwrap();
    assert_eq!(iter.n_features(), 6);
}

#[test]
fn test_empty_inclusion_set() {
    let mut fixture = tabularized();
    fixture.config.codes = Some(vec!["NOT_A_CODE".to_string()]);
    assert!(matches!(
        ShardIterator::from_config(&fixture.config, TRAIN_SPLIT),
        Err(TabularError::EmptyInclusionSet(_))
    ));

    fixture.config.codes = None;
    fixture.config.min_code_inclusion_frequency = Some(1000);
    assert!(matches!(
        ShardIterator::from_config(&fixture.config, TRAIN_SPLIT),
        Err(TabularError::EmptyInclusionSet(_))
    ));
}

#[test]
fn test_next_reset_and_status() {
    let fixture = tabularized();
    let mut iter = ShardIterator::from_config(&fixture.config, TRAIN_SPLIT).unwrap();
    let first = drain(&mut iter);
    assert_eq!(first.iter().map(|b| b.shard.as_str()).collect::<Vec<_>>(), ["0", "1"]);

    let mut called = false;
    let status = iter
        .next(&mut |_: &ShardBatch| -> Result<()> {
            called = true;
            Ok(())
        })
        .unwrap();
    assert_eq!(status.as_code(), 0);
    assert!(!called);

    iter.reset();
    let second = drain(&mut iter);
    assert_eq!(first, second);
}

#[test]
fn test_in_memory_matches_streaming() {
    let fixture = tabularized();
    let mut streaming = ShardIterator::from_config(&fixture.config, TRAIN_SPLIT).unwrap();
    let batches = drain(&mut streaming);
    let refs: Vec<&CsrMatrix> = batches.iter().map(|b| &b.features).collect();
    let stacked = CsrMatrix::vstack(&refs).unwrap();
    let labels: Vec<f32> = batches.iter().flat_map(|b| b.labels.clone()).collect();

    let (features, collected_labels) = streaming.collect_in_memory().unwrap();
    assert_eq!(features, stacked);
    assert_eq!(collected_labels, labels);

    let mut in_memory = InMemoryIter::from_shards(&streaming).unwrap();
    assert_eq!(in_memory.n_features(), streaming.n_features());
    let single = drain(&mut in_memory);
    assert_eq!(single.len(), 1);
    assert_eq!(single[0].features.n_rows(), 12);
}

#[test]
fn test_static_and_dynamic_rows_line_up() {
    let fixture = tabularized();
    let iter = ShardIterator::from_config(&fixture.config, TRAIN_SPLIT).unwrap();
    let batch = iter.load_shard("1").unwrap();
    // Patients 3 (HEIGHT 180) and 4 (HEIGHT 160), three instants each
    let first = iter.n_features() - 1;
    let heights: Vec<f64> = (0..6).map(|row| batch.features.get(row, first)).collect();
    assert_eq!(heights, vec![180.0, 180.0, 180.0, 160.0, 160.0, 160.0]);
    // Dynamic values appear only at instants where the code is observed
    let dx_full = 6;
    assert_eq!(iter.feature_names()[dx_full], "DX//1/code/full/count");
    let dx: Vec<f64> = (0..6).map(|row| batch.features.get(row, dx_full)).collect();
    assert_eq!(dx, vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn test_missing_matrix_file() {
    let fixture = tabularized();
    let missing = fixture
        .layout()
        .window_file(TRAIN_SPLIT, "1", &WindowSize::Full, Aggregation::CodeCount);
    std::fs::remove_file(&missing).unwrap();

    let mut iter = ShardIterator::from_config(&fixture.config, TRAIN_SPLIT).unwrap();
    let mut noop = |_: &ShardBatch| -> Result<()> { Ok(()) };
    assert_eq!(iter.next(&mut noop).unwrap(), IterStatus::Produced);
    assert!(matches!(
        iter.next(&mut noop),
        Err(TabularError::MissingShardFile(path)) if path == missing
    ));
}
