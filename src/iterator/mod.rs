//! Feature-filtered streaming iterator over a split's shards
//!
//! A [`ShardIterator`] reconstructs each shard's full feature matrix from the
//! stored per-(window, aggregation) matrices, keeps the columns of the
//! inclusion set, and keeps the rows referenced by the shard's label file.
//! Shards are loaded on demand, one at a time, in shard order.

pub mod inclusion;

use std::path::PathBuf;
use std::time::Instant;

use rayon::prelude::*;

use crate::catalog::{FeatureCatalog, FeatureFrequencies};
use crate::config::TabularizeConfig;
use crate::error::util::ensure_all_exist;
use crate::error::{Result, TabularError};
use crate::models::LabelTable;
use crate::schema::{Aggregation, WindowSize};
use crate::sparse::CsrMatrix;
use crate::store::{TabularLayout, read_matrix};
use crate::utils::io::find_parquet_files;
use crate::utils::logging::log_shard_timing;

pub use inclusion::InclusionSet;

/// Outcome of one [`DataIter::next`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterStatus {
    /// No shard is left; the consumer was not called
    Exhausted = 0,
    /// One shard was handed to the consumer
    Produced = 1,
}

impl IterStatus {
    /// Integer code used by boosting libraries: 1 produced, 0 exhausted
    #[must_use]
    pub const fn as_code(self) -> i32 {
        self as i32
    }
}

/// Features and labels of one shard's labelled rows
#[derive(Debug, Clone, PartialEq)]
pub struct ShardBatch {
    pub shard: String,
    pub features: CsrMatrix,
    pub labels: Vec<f32>,
}

/// Callback receiving each produced batch
pub type BatchConsumer<'a> = dyn FnMut(&ShardBatch) -> Result<()> + 'a;

/// Pull-based, resumable source of training batches
pub trait DataIter {
    /// Produce the next batch into `consumer` and advance
    fn next(&mut self, consumer: &mut BatchConsumer<'_>) -> Result<IterStatus>;

    /// Rewind to the first batch
    fn reset(&mut self);

    /// Number of feature columns of every batch
    fn n_features(&self) -> usize;
}

/// Which stored matrices make up a feature matrix, and how they are filtered
#[derive(Debug, Clone)]
struct MatrixPart {
    window: WindowSize,
    agg: Aggregation,
    mask: Vec<bool>,
}

/// Streams the labelled rows of a split, one shard per call
#[derive(Debug)]
pub struct ShardIterator {
    layout: TabularLayout,
    split: String,
    shards: Vec<String>,
    parts: Vec<MatrixPart>,
    feature_names: Vec<String>,
    cursor: usize,
}

impl ShardIterator {
    /// Build an iterator over `split`
    ///
    /// Shards are the split's label files in shard order. The column order is
    /// every window crossed with every dynamic aggregation, followed by every
    /// static aggregation; each part keeps the inclusion set's columns.
    pub fn new(
        layout: TabularLayout,
        split: &str,
        catalog: &FeatureCatalog,
        inclusion: &InclusionSet,
        windows: &[WindowSize],
        aggs: &[Aggregation],
    ) -> Result<Self> {
        let shards = find_parquet_files(&layout.task_dir(split))?
            .iter()
            .filter_map(|path| crate::store::layout::shard_name(path).map(str::to_string))
            .collect();

        let mut parts = Vec::new();
        let mut feature_names = Vec::new();
        let dynamic = aggs.iter().copied().filter(|agg| agg.is_dynamic());
        for window in windows {
            for agg in dynamic.clone() {
                feature_names.extend(
                    inclusion
                        .columns_for(catalog, agg)
                        .into_iter()
                        .map(|column| format!("{column}/{}/{}", window.label(), agg.statistic())),
                );
                parts.push(MatrixPart {
                    window: window.clone(),
                    agg,
                    mask: inclusion.column_mask(catalog, agg),
                });
            }
        }
        for agg in aggs.iter().copied().filter(|agg| !agg.is_dynamic()) {
            feature_names.extend(inclusion.columns_for(catalog, agg).into_iter().map(str::to_string));
            parts.push(MatrixPart {
                window: WindowSize::Full,
                agg,
                mask: inclusion.column_mask(catalog, agg),
            });
        }

        Ok(Self {
            layout,
            split: split.to_string(),
            shards,
            parts,
            feature_names,
            cursor: 0,
        })
    }

    /// Build an iterator from a run configuration, loading the catalog and
    /// frequencies it wrote and resolving the configured inclusion set
    pub fn from_config(config: &TabularizeConfig, split: &str) -> Result<Self> {
        let layout = config.layout();
        let catalog = FeatureCatalog::load(&layout.feature_columns_file())?;
        let freqs = FeatureFrequencies::load(&layout.feature_freqs_file())?;
        let inclusion = InclusionSet::resolve(
            &catalog,
            &freqs,
            config.codes.as_deref(),
            config.min_code_inclusion_frequency,
        )?;
        Self::new(layout, split, &catalog, &inclusion, &config.window_sizes, &config.aggs)
    }

    #[must_use]
    pub fn split(&self) -> &str {
        &self.split
    }

    #[must_use]
    pub fn shards(&self) -> &[String] {
        &self.shards
    }

    /// Names of the output columns, `<column>/<window>/<statistic>` for
    /// dynamic parts and the catalog column for static parts
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn part_files(&self, shard: &str) -> Vec<PathBuf> {
        self.parts
            .iter()
            .map(|part| self.layout.matrix_file(&self.split, shard, &part.window, part.agg))
            .collect()
    }

    /// Load the labelled rows of one shard
    ///
    /// # Errors
    /// [`TabularError::MissingShardFile`] when any matrix or the label file is
    /// absent, [`TabularError::ShapeMismatch`] when parts disagree on rows or a
    /// label references a row that does not exist.
    pub fn load_shard(&self, shard: &str) -> Result<ShardBatch> {
        let start = Instant::now();
        let files = self.part_files(shard);
        ensure_all_exist(&files)?;
        let labels = LabelTable::read(&self.layout.task_file(&self.split, shard))?;

        let mut matrices = Vec::with_capacity(self.parts.len());
        for (part, path) in self.parts.iter().zip(&files) {
            let matrix = read_matrix(path)?;
            let filtered = matrix.select_columns(&part.mask).map_err(|e| e.at_path(path))?;
            matrices.push(filtered);
        }
        let refs: Vec<&CsrMatrix> = matrices.iter().collect();
        let combined = CsrMatrix::hstack(&refs)?;

        labels.validate(combined.n_rows())?;
        let features = combined.select_rows(labels.event_ids())?;
        log_shard_timing("Loading", &self.split, shard, start.elapsed());

        Ok(ShardBatch {
            shard: shard.to_string(),
            features,
            labels: labels.into_labels(),
        })
    }

    /// Load every shard and stack them, in shard order
    ///
    /// Shards are read in parallel; the result does not depend on the order
    /// in which reads finish.
    pub fn collect_in_memory(&self) -> Result<(CsrMatrix, Vec<f32>)> {
        let batches: Vec<ShardBatch> = self
            .shards
            .par_iter()
            .map(|shard| self.load_shard(shard))
            .collect::<Result<_>>()?;

        let features = if batches.is_empty() {
            CsrMatrix::zeros(0, self.n_features())
        } else {
            let refs: Vec<&CsrMatrix> = batches.iter().map(|b| &b.features).collect();
            CsrMatrix::vstack(&refs)?
        };
        let labels = batches.into_iter().flat_map(|b| b.labels).collect();
        Ok((features, labels))
    }
}

impl DataIter for ShardIterator {
    fn next(&mut self, consumer: &mut BatchConsumer<'_>) -> Result<IterStatus> {
        let Some(shard) = self.shards.get(self.cursor) else {
            return Ok(IterStatus::Exhausted);
        };
        let batch = self.load_shard(shard)?;
        consumer(&batch)?;
        self.cursor += 1;
        Ok(IterStatus::Produced)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn n_features(&self) -> usize {
        self.feature_names.len()
    }
}

/// A single in-memory batch, produced once per pass
#[derive(Debug)]
pub struct InMemoryIter {
    batch: ShardBatch,
    consumed: bool,
}

impl InMemoryIter {
    pub fn new(features: CsrMatrix, labels: Vec<f32>) -> Result<Self> {
        if features.n_rows() != labels.len() {
            return Err(TabularError::ShapeMismatch(format!(
                "{} feature rows but {} labels",
                features.n_rows(),
                labels.len()
            )));
        }
        Ok(Self {
            batch: ShardBatch {
                shard: "all".to_string(),
                features,
                labels,
            },
            consumed: false,
        })
    }

    /// Concatenate every shard of a streaming iterator
    pub fn from_shards(shards: &ShardIterator) -> Result<Self> {
        let (features, labels) = shards.collect_in_memory()?;
        Self::new(features, labels)
    }

    #[must_use]
    pub const fn batch(&self) -> &ShardBatch {
        &self.batch
    }
}

impl DataIter for InMemoryIter {
    fn next(&mut self, consumer: &mut BatchConsumer<'_>) -> Result<IterStatus> {
        if self.consumed {
            return Ok(IterStatus::Exhausted);
        }
        consumer(&self.batch)?;
        self.consumed = true;
        Ok(IterStatus::Produced)
    }

    fn reset(&mut self) {
        self.consumed = false;
    }

    fn n_features(&self) -> usize {
        self.batch.features.n_cols()
    }
}
