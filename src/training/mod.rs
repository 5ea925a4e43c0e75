//! Model training on tabularized shards
//!
//! The booster itself is external; [`Booster`] is the seam through which the
//! trainer hands it batches and asks it for predictions.

pub mod metrics;

use std::time::Instant;

use crate::config::TabularizeConfig;
use crate::error::Result;
use crate::iterator::{DataIter, InMemoryIter, IterStatus, ShardBatch, ShardIterator};
use crate::sparse::CsrMatrix;
use crate::store::layout::{HELD_OUT_SPLIT, TRAIN_SPLIT, TUNING_SPLIT};

pub use metrics::roc_auc;

/// A gradient-boosting model driven through data iterators
pub trait Booster {
    /// Fit on every batch of `train`, using `tuning` for early stopping or
    /// validation when given
    fn fit(&mut self, train: &mut dyn DataIter, tuning: Option<&mut dyn DataIter>) -> Result<()>;

    /// Predict a score per row of `features`
    fn predict(&self, features: &CsrMatrix) -> Result<Vec<f64>>;
}

/// Summary of a training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// Width of the feature matrices the booster saw
    pub n_features: usize,
    /// ROC AUC on the held-out split
    pub held_out_auc: f64,
}

/// Predict every batch of `iter` and score the predictions with ROC AUC
pub fn evaluate<B: Booster + ?Sized>(booster: &B, iter: &mut dyn DataIter) -> Result<f64> {
    let mut predictions = Vec::new();
    let mut labels = Vec::new();
    iter.reset();
    loop {
        let status = iter.next(&mut |batch: &ShardBatch| -> Result<()> {
            predictions.extend(booster.predict(&batch.features)?);
            labels.extend_from_slice(&batch.labels);
            Ok(())
        })?;
        if status == IterStatus::Exhausted {
            break;
        }
    }
    roc_auc(&predictions, &labels)
}

/// Builds data iterators for each split and runs fit and evaluation
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TabularizeConfig,
}

impl Trainer {
    #[must_use]
    pub const fn new(config: TabularizeConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &TabularizeConfig {
        &self.config
    }

    /// Data iterator over a split: streaming, or one in-memory batch when
    /// `keep_data_in_memory` is set
    pub fn data_iter(&self, split: &str) -> Result<Box<dyn DataIter>> {
        let shards = ShardIterator::from_config(&self.config, split)?;
        if self.config.keep_data_in_memory {
            Ok(Box::new(InMemoryIter::from_shards(&shards)?))
        } else {
            Ok(Box::new(shards))
        }
    }

    /// Fit `booster` on the train split and score it on held-out data
    ///
    /// The tuning split is passed to the booster when it has label files.
    pub fn train<B: Booster + ?Sized>(&self, booster: &mut B) -> Result<TrainingReport> {
        let start = Instant::now();
        let mut train = self.data_iter(TRAIN_SPLIT)?;
        let mut tuning = if self.config.layout().task_dir(TUNING_SPLIT).is_dir() {
            Some(self.data_iter(TUNING_SPLIT)?)
        } else {
            log::warn!("No {TUNING_SPLIT} labels found, fitting without a tuning split");
            None
        };

        log::info!("Fitting booster on {} features", train.n_features());
        booster.fit(
            train.as_mut(),
            tuning.as_mut().map(|t| t.as_mut() as &mut dyn DataIter),
        )?;
        log::info!("Fitted booster in {:?}", start.elapsed());

        let mut held_out = self.data_iter(HELD_OUT_SPLIT)?;
        let held_out_auc = evaluate(booster, held_out.as_mut())?;
        log::info!("{HELD_OUT_SPLIT} ROC AUC: {held_out_auc:.4}");

        Ok(TrainingReport {
            n_features: train.n_features(),
            held_out_auc,
        })
    }
}
