//! Configuration for a tabularization run.

use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TabularError};
use crate::schema::{Aggregation, WindowSize};
use crate::store::{ArtifactCache, TabularLayout};
use crate::utils::io::read_json;

/// Configuration for tabularization and training
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TabularizeConfig {
    /// Directory holding `final_cohort/<split>/<shard>.parquet`
    pub meds_cohort_dir: PathBuf,
    /// Output directory for the catalog, matrices and label files
    pub tabularized_data_dir: PathBuf,
    /// Directory for per-shard intermediate artifacts; `<tabularized>/.cache` when unset
    pub cache_dir: Option<PathBuf>,
    /// Trailing windows of the dynamic features
    pub window_sizes: Vec<WindowSize>,
    /// Aggregations to compute and train on
    pub aggs: Vec<Aggregation>,
    /// Allow-list of codes or feature column names
    pub codes: Option<Vec<String>>,
    /// Minimum training-split frequency of a retained column
    pub min_code_inclusion_frequency: Option<u64>,
    /// Recompute artifacts that already exist
    pub do_overwrite: bool,
    /// Concatenate all shards in memory instead of streaming them
    pub keep_data_in_memory: bool,
    /// Size of the rayon thread pool
    pub num_workers: usize,
    /// Seed of the shard visiting order
    pub seed: u64,
    /// Show progress bars for shard loops
    pub show_progress: bool,
}

impl Default for TabularizeConfig {
    fn default() -> Self {
        Self {
            meds_cohort_dir: PathBuf::from("data"),
            tabularized_data_dir: PathBuf::from("tabularized"),
            cache_dir: None,
            window_sizes: vec![
                WindowSize::Bounded {
                    label: "30d".to_string(),
                    span: TimeDelta::days(30),
                },
                WindowSize::Bounded {
                    label: "365d".to_string(),
                    span: TimeDelta::days(365),
                },
                WindowSize::Full,
            ],
            aggs: vec![
                Aggregation::CodeCount,
                Aggregation::ValueSum,
                Aggregation::StaticPresent,
                Aggregation::StaticFirst,
            ],
            codes: None,
            min_code_inclusion_frequency: None,
            do_overwrite: false,
            keep_data_in_memory: false,
            num_workers: num_cpus::get(),
            seed: 1,
            show_progress: true,
        }
    }
}

impl TabularizeConfig {
    /// Create a configuration with default options for the given directories
    #[must_use]
    pub fn new(meds_cohort_dir: impl Into<PathBuf>, tabularized_data_dir: impl Into<PathBuf>) -> Self {
        Self {
            meds_cohort_dir: meds_cohort_dir.into(),
            tabularized_data_dir: tabularized_data_dir.into(),
            ..Self::default()
        }
    }

    /// Load and validate a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the option combinations a run depends on
    pub fn validate(&self) -> Result<()> {
        if self.window_sizes.is_empty() {
            return Err(TabularError::Config("window_sizes must not be empty".to_string()));
        }
        if self.aggs.is_empty() {
            return Err(TabularError::Config("aggs must not be empty".to_string()));
        }
        for (i, window) in self.window_sizes.iter().enumerate() {
            if self.window_sizes[..i].contains(window) {
                return Err(TabularError::Config(format!(
                    "window size '{}' is listed twice",
                    window.label()
                )));
            }
        }
        for (i, agg) in self.aggs.iter().enumerate() {
            if self.aggs[..i].contains(agg) {
                return Err(TabularError::Config(format!("aggregation '{agg}' is listed twice")));
            }
        }
        if self.codes.as_ref().is_some_and(Vec::is_empty) {
            return Err(TabularError::Config(
                "codes must list at least one code when given".to_string(),
            ));
        }
        if self.num_workers == 0 {
            return Err(TabularError::Config("num_workers must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Directory of intermediate artifacts
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.tabularized_data_dir.join(".cache"))
    }

    #[must_use]
    pub fn layout(&self) -> TabularLayout {
        TabularLayout::new(
            &self.meds_cohort_dir,
            &self.tabularized_data_dir,
            self.cache_dir(),
        )
    }

    #[must_use]
    pub const fn cache(&self) -> ArtifactCache {
        ArtifactCache::new(self.do_overwrite)
    }

    /// Configured dynamic aggregations, in configured order
    pub fn dynamic_aggs(&self) -> impl Iterator<Item = Aggregation> + '_ {
        self.aggs.iter().copied().filter(|agg| agg.is_dynamic())
    }

    /// Configured static aggregations, in configured order
    pub fn static_aggs(&self) -> impl Iterator<Item = Aggregation> + '_ {
        self.aggs.iter().copied().filter(|agg| !agg.is_dynamic())
    }
}
