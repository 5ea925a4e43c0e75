//! Tabularization stages over every shard of a cohort
//!
//! 1. `describe_codes`: per-shard frequency tables of the train split,
//!    reduced into the feature catalog
//! 2. `tabularize_static`: per-patient static matrices, broadcast onto the
//!    event instants of each shard
//! 3. `summarize_windows`: one matrix per (shard, window, dynamic aggregation)
//! 4. `write_event_indices`: event_id to (patient_id, timestamp) per shard
//! 5. `merge_split`: shard matrices stacked into split-level matrices
//!
//! Shard-level work runs on a rayon pool sized by `num_workers`. Every
//! artifact goes through the read-through cache, so interrupted or concurrent
//! runs resume where they stopped.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::aggregate::{StaticMatrices, build_static, summarize_window};
use crate::catalog::{FeatureCatalog, FeatureFrequencies, build_catalog, compute_shard_frequencies};
use crate::config::TabularizeConfig;
use crate::error::{Result, TabularError};
use crate::filter::PatientFilter;
use crate::models::{EventIndex, EventRecord, EventStream, ShardManifest};
use crate::schema::WindowSize;
use crate::sparse::CsrMatrix;
use crate::store::layout::{SPLITS, TRAIN_SPLIT, shard_name};
use crate::store::{ArtifactCache, ArtifactLock, CacheOutcome, TabularLayout, merge_files};
use crate::utils::io::{find_parquet_files, read_parquet};
use crate::utils::logging::{
    create_shard_progress_bar, finish_progress_bar, log_operation_start, log_shard_timing,
};

/// Counts of the artifacts a stage touched
#[derive(Debug, Default)]
pub struct StageReport {
    computed: AtomicUsize,
    cached: AtomicUsize,
    locked: AtomicUsize,
}

impl StageReport {
    fn record<T>(&self, outcome: &CacheOutcome<T>) {
        let counter = match outcome {
            CacheOutcome::Computed(_) => &self.computed,
            CacheOutcome::Cached(_) => &self.cached,
            CacheOutcome::Locked => &self.locked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Artifacts computed and published by this run
    #[must_use]
    pub fn computed(&self) -> usize {
        self.computed.load(Ordering::Relaxed)
    }

    /// Artifacts that were already complete
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cached.load(Ordering::Relaxed)
    }

    /// Artifacts skipped because another writer held them
    #[must_use]
    pub fn locked(&self) -> usize {
        self.locked.load(Ordering::Relaxed)
    }

    fn log(&self, stage: &str, elapsed: std::time::Duration) {
        log::info!(
            "{stage}: {} computed, {} cached, {} locked in {elapsed:?}",
            self.computed(),
            self.cached(),
            self.locked()
        );
    }
}

/// A shard's events, read at most once and only when an artifact needs them
struct ShardInput<'a> {
    pipeline: &'a Pipeline,
    split: &'a str,
    shard: &'a str,
    events: Option<Vec<EventRecord>>,
}

impl<'a> ShardInput<'a> {
    const fn new(pipeline: &'a Pipeline, split: &'a str, shard: &'a str) -> Self {
        Self {
            pipeline,
            split,
            shard,
            events: None,
        }
    }

    fn events(&mut self) -> Result<&[EventRecord]> {
        if self.events.is_none() {
            self.events = Some(self.pipeline.load_events(self.split, self.shard)?);
        }
        Ok(self.events.as_deref().unwrap_or_default())
    }

    /// Event instants of the shard's codes that have a dynamic catalog column
    fn stream(&mut self, catalog: &FeatureCatalog) -> Result<EventStream> {
        let path = self.pipeline.layout.events_file(self.split, self.shard);
        let events = self.events()?;
        EventStream::from_events(events, |code| catalog.is_dynamic_code(code)).map_err(|e| e.at_path(&path))
    }
}

/// Runs the tabularization stages for one configuration
pub struct Pipeline {
    config: TabularizeConfig,
    layout: TabularLayout,
    cache: ArtifactCache,
    manifest: Option<ShardManifest>,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("layout", &self.layout)
            .field("manifest", &self.manifest.is_some())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validate the configuration, load the manifest if present and start
    /// the worker pool
    pub fn new(config: TabularizeConfig) -> Result<Self> {
        config.validate()?;
        let layout = config.layout();
        let manifest_path = layout.manifest_file();
        let manifest = if manifest_path.is_file() {
            log_operation_start("Loading shard manifest", &manifest_path);
            Some(ShardManifest::load(&manifest_path)?)
        } else {
            None
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_workers)
            .build()
            .map_err(|e| TabularError::Config(format!("Failed to build worker pool: {e}")))?;

        Ok(Self {
            cache: config.cache(),
            config,
            layout,
            manifest,
            pool,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &TabularizeConfig {
        &self.config
    }

    #[must_use]
    pub const fn layout(&self) -> &TabularLayout {
        &self.layout
    }

    /// Shards of a split, in shard order
    ///
    /// The manifest decides when it lists the split; otherwise every event
    /// file of the split directory is a shard. A split without either has no
    /// shards.
    pub fn shards(&self, split: &str) -> Result<Vec<String>> {
        if let Some(manifest) = &self.manifest {
            let shards = manifest.shards(split);
            if !shards.is_empty() {
                return Ok(shards);
            }
        }
        let dir = self.layout.split_dir(split);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        Ok(find_parquet_files(&dir)?
            .iter()
            .filter_map(|path| shard_name(path).map(str::to_string))
            .collect())
    }

    /// Every (split, shard) pair of the cohort
    fn all_shards(&self) -> Result<Vec<(&'static str, String)>> {
        let mut all = Vec::new();
        for split in SPLITS {
            all.extend(self.shards(split)?.into_iter().map(|shard| (split, shard)));
        }
        Ok(all)
    }

    /// Read one shard's events, restricted to its manifest patients
    pub fn load_events(&self, split: &str, shard: &str) -> Result<Vec<EventRecord>> {
        let path = self.layout.events_file(split, shard);
        let filter = self
            .manifest
            .as_ref()
            .and_then(|manifest| manifest.patients(split, shard))
            .map(PatientFilter::new);
        let batches = read_parquet(&path, filter.as_ref())?;
        EventRecord::from_record_batches(&batches).map_err(|e| e.at_path(&path))
    }

    /// Run `work` on every shard in the pool, with a progress bar
    fn for_each_shard<F>(&self, stage: &str, shards: &[(&str, String)], work: F) -> Result<StageReport>
    where
        F: Fn(&str, &str, &StageReport) -> Result<()> + Sync,
    {
        let start = Instant::now();
        let report = StageReport::default();
        let pb = create_shard_progress_bar(shards.len() as u64, stage, self.config.show_progress);

        self.pool.install(|| {
            shards.par_iter().try_for_each(|(split, shard)| {
                let shard_start = Instant::now();
                work(split, shard, &report)?;
                log_shard_timing(stage, split, shard, shard_start.elapsed());
                pb.inc(1);
                Ok::<_, TabularError>(())
            })
        })?;

        finish_progress_bar(&pb, Some(stage));
        report.log(stage, start.elapsed());
        Ok(report)
    }

    /// Build the feature catalog from the train split
    ///
    /// Shards are visited in a seeded random order. Each shard's table is
    /// cached; the reduce step needs every table, so a shard locked by
    /// another process fails the stage with [`TabularError::ArtifactLocked`].
    pub fn describe_codes(&self) -> Result<(Arc<FeatureCatalog>, FeatureFrequencies)> {
        let start = Instant::now();
        let columns_path = self.layout.feature_columns_file();
        let freqs_path = self.layout.feature_freqs_file();
        if self.cache.is_fresh(&columns_path) && self.cache.is_fresh(&freqs_path) {
            log_operation_start("Reusing feature catalog", &columns_path);
            let catalog = FeatureCatalog::load(&columns_path)?;
            let freqs = FeatureFrequencies::load(&freqs_path)?;
            return Ok((Arc::new(catalog), freqs));
        }

        let mut shards = self.shards(TRAIN_SPLIT)?;
        if shards.is_empty() {
            return Err(TabularError::Config(format!(
                "No {TRAIN_SPLIT} shards found under {}",
                self.layout.split_dir(TRAIN_SPLIT).display()
            )));
        }
        shards.shuffle(&mut StdRng::seed_from_u64(self.config.seed));

        let pb = create_shard_progress_bar(shards.len() as u64, "describe_codes", self.config.show_progress);
        let tables: Vec<FeatureFrequencies> = self.pool.install(|| {
            shards
                .par_iter()
                .map(|shard| {
                    let path = self.layout.shard_freqs_file(TRAIN_SPLIT, shard);
                    let outcome = self.cache.get_or_compute(&path, || {
                        let events = self.load_events(TRAIN_SPLIT, shard)?;
                        Ok(compute_shard_frequencies(&events))
                    })?;
                    pb.inc(1);
                    outcome
                        .into_value()
                        .ok_or_else(|| TabularError::ArtifactLocked(ArtifactLock::lock_path(&path)))
                })
                .collect::<Result<_>>()
        })?;
        finish_progress_bar(&pb, Some("describe_codes"));

        let (catalog, freqs) = build_catalog(&tables)?;
        catalog.save(&columns_path)?;
        freqs.save(&freqs_path)?;
        log::info!(
            "Described {} feature columns from {} shards in {:?}",
            catalog.len(),
            tables.len(),
            start.elapsed()
        );
        Ok((catalog, freqs))
    }

    /// Load the catalog written by [`Self::describe_codes`]
    pub fn load_catalog(&self) -> Result<Arc<FeatureCatalog>> {
        FeatureCatalog::load(&self.layout.feature_columns_file()).map(Arc::new)
    }

    /// Write the broadcast static matrices of every shard
    pub fn tabularize_static(&self, catalog: &Arc<FeatureCatalog>) -> Result<StageReport> {
        let aggs: Vec<_> = self.config.static_aggs().collect();
        let shards = self.all_shards()?;
        self.for_each_shard("tabularize_static", &shards, |split, shard, report| {
            let mut input = ShardInput::new(self, split, shard);
            let mut matrices: Option<(StaticMatrices, EventStream)> = None;
            for &agg in &aggs {
                let path = self.layout.static_file(split, shard, agg);
                let outcome = self.cache.ensure(&path, || -> Result<CsrMatrix> {
                    if matrices.is_none() {
                        let events_path = self.layout.events_file(split, shard);
                        let built = build_static(input.events()?, catalog).map_err(|e| e.at_path(&events_path))?;
                        matrices = Some((built, input.stream(catalog)?));
                    }
                    match &matrices {
                        Some((built, stream)) => built.broadcast(agg, stream),
                        None => Err(TabularError::Config("static matrices were not built".to_string())),
                    }
                })?;
                report.record(&outcome);
            }
            Ok(())
        })
    }

    /// Write one matrix per (shard, window, dynamic aggregation)
    pub fn summarize_windows(&self, catalog: &Arc<FeatureCatalog>) -> Result<StageReport> {
        let aggs: Vec<_> = self.config.dynamic_aggs().collect();
        let shards = self.all_shards()?;
        self.for_each_shard("summarize_windows", &shards, |split, shard, report| {
            let mut input = ShardInput::new(self, split, shard);
            let mut stream: Option<EventStream> = None;
            for window in &self.config.window_sizes {
                for &agg in &aggs {
                    let path = self.layout.window_file(split, shard, window, agg);
                    let outcome = self.cache.ensure(&path, || {
                        if stream.is_none() {
                            stream = Some(input.stream(catalog)?);
                        }
                        match &stream {
                            Some(stream) => summarize_window(stream, catalog, agg, window),
                            None => Ok(CsrMatrix::zeros(0, catalog.features_for(agg).len())),
                        }
                    })?;
                    report.record(&outcome);
                }
            }
            Ok(())
        })
    }

    /// Write the event index of every shard
    pub fn write_event_indices(&self, catalog: &Arc<FeatureCatalog>) -> Result<StageReport> {
        let shards = self.all_shards()?;
        self.for_each_shard("write_event_indices", &shards, |split, shard, report| {
            let path = self.layout.index_file(split, shard);
            let outcome = self.cache.ensure(&path, || {
                let stream = ShardInput::new(self, split, shard).stream(catalog)?;
                EventIndex::from_stream(&stream)
            })?;
            report.record(&outcome);
            Ok(())
        })
    }

    /// Stack every shard matrix of a split into split-level matrices
    pub fn merge_split(&self, split: &str) -> Result<StageReport> {
        let start = Instant::now();
        let report = StageReport::default();
        let shards = self.shards(split)?;
        if shards.is_empty() {
            return Ok(report);
        }

        let mut targets = Vec::new();
        for window in &self.config.window_sizes {
            targets.extend(self.config.dynamic_aggs().map(|agg| (window.clone(), agg)));
        }
        targets.extend(self.config.static_aggs().map(|agg| (WindowSize::Full, agg)));

        for (window, agg) in targets {
            let merged_path = self.layout.merged_file(split, &window, agg);
            let outcome = self.cache.ensure(&merged_path, || {
                let paths: Vec<PathBuf> = shards
                    .iter()
                    .map(|shard| self.layout.matrix_file(split, shard, &window, agg))
                    .collect();
                merge_files(&paths)
            })?;
            report.record(&outcome);
        }
        report.log(&format!("merge_split {split} ({} shards)", shards.len()), start.elapsed());
        Ok(report)
    }

    /// Run every stage in order
    pub fn run_all(&self) -> Result<Arc<FeatureCatalog>> {
        let (catalog, _) = self.describe_codes()?;
        self.tabularize_static(&catalog)?;
        self.summarize_windows(&catalog)?;
        self.write_event_indices(&catalog)?;
        for split in SPLITS {
            self.merge_split(split)?;
        }
        Ok(catalog)
    }
}
