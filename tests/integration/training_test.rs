use meds_tab::store::layout::{HELD_OUT_SPLIT, TUNING_SPLIT};
use meds_tab::training::evaluate;
use meds_tab::{Booster, CsrMatrix, DataIter, IterStatus, Pipeline, Result, ShardBatch, Trainer};

use crate::utils::Fixture;

/// Scores each row by one feature column and records what it was fitted on
struct ColumnBooster {
    column: usize,
    train_batches: usize,
    train_rows: usize,
    tuning_rows: Option<usize>,
}

impl ColumnBooster {
    fn new(column: usize) -> Self {
        Self {
            column,
            train_batches: 0,
            train_rows: 0,
            tuning_rows: None,
        }
    }
}

fn count_rows(iter: &mut dyn DataIter) -> Result<(usize, usize)> {
    let (mut batches, mut rows) = (0, 0);
    iter.reset();
    while iter.next(&mut |batch: &ShardBatch| -> Result<()> {
        rows += batch.features.n_rows();
        Ok(())
    })? == IterStatus::Produced
    {
        batches += 1;
    }
    Ok((batches, rows))
}

impl Booster for ColumnBooster {
    fn fit(&mut self, train: &mut dyn DataIter, tuning: Option<&mut dyn DataIter>) -> Result<()> {
        (self.train_batches, self.train_rows) = count_rows(train)?;
        self.tuning_rows = tuning.map(|t| count_rows(t).map(|(_, rows)| rows)).transpose()?;
        Ok(())
    }

    fn predict(&self, features: &CsrMatrix) -> Result<Vec<f64>> {
        Ok((0..features.n_rows()).map(|row| features.get(row, self.column)).collect())
    }
}

fn tabularized() -> Fixture {
    let fixture = Fixture::new().unwrap();
    Pipeline::new(fixture.config.clone()).unwrap().run_all().unwrap();
    fixture.write_labels().unwrap();
    fixture
}

// Feature 10 is HEIGHT/static/present: patient 7 has a height, patient 8 does not
const HEIGHT_PRESENT: usize = 10;
const EYE_PRESENT: usize = 9;

#[test]
fn test_streaming_training() {
    let fixture = tabularized();
    let trainer = Trainer::new(fixture.config.clone());
    let mut booster = ColumnBooster::new(HEIGHT_PRESENT);
    let report = trainer.train(&mut booster).unwrap();

    assert_eq!(report.n_features, 12);
    assert_eq!((booster.train_batches, booster.train_rows), (2, 12));
    assert_eq!(booster.tuning_rows, Some(6));
    assert!((report.held_out_auc - 1.0).abs() < 1e-12);
}

#[test]
fn test_in_memory_training() {
    let mut fixture = tabularized();
    fixture.config.keep_data_in_memory = true;
    let trainer = Trainer::new(fixture.config.clone());
    let mut booster = ColumnBooster::new(HEIGHT_PRESENT);
    let report = trainer.train(&mut booster).unwrap();

    assert_eq!((booster.train_batches, booster.train_rows), (1, 12));
    assert!((report.held_out_auc - 1.0).abs() < 1e-12);
}

#[test]
fn test_uninformative_feature_scores_half() {
    let fixture = tabularized();
    let trainer = Trainer::new(fixture.config.clone());
    let booster = ColumnBooster::new(EYE_PRESENT);
    let mut held_out = trainer.data_iter(HELD_OUT_SPLIT).unwrap();
    let auc = evaluate(&booster, held_out.as_mut()).unwrap();
    assert!((auc - 0.5).abs() < 1e-12);
}

#[test]
fn test_training_without_tuning_labels() {
    let fixture = tabularized();
    std::fs::remove_dir_all(fixture.layout().task_dir(TUNING_SPLIT)).unwrap();
    let trainer = Trainer::new(fixture.config.clone());
    let mut booster = ColumnBooster::new(HEIGHT_PRESENT);
    trainer.train(&mut booster).unwrap();
    assert_eq!(booster.tuning_rows, None);
}
