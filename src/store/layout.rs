//! On-disk layout of the input cohort, the tabularized artifacts and the cache.

use std::path::{Path, PathBuf};

use crate::schema::{Aggregation, WindowSize};

/// Split the catalog is built from and models are fitted on
pub const TRAIN_SPLIT: &str = "train";
/// Split used for early stopping and validation
pub const TUNING_SPLIT: &str = "tuning";
/// Split used for final evaluation
pub const HELD_OUT_SPLIT: &str = "held_out";
/// Every split, in processing order
pub const SPLITS: [&str; 3] = [TRAIN_SPLIT, TUNING_SPLIT, HELD_OUT_SPLIT];

/// Sort shard names numerically when all are integers, lexicographically otherwise
pub fn sort_shard_names(names: &mut [String]) {
    if names.iter().all(|name| name.parse::<u64>().is_ok()) {
        names.sort_by_key(|name| name.parse::<u64>().unwrap_or(u64::MAX));
    } else {
        names.sort();
    }
}

/// Sort shard file paths by their stem, using the rules of [`sort_shard_names`]
pub fn sort_shard_paths(paths: &mut [PathBuf]) {
    let numeric = paths
        .iter()
        .all(|path| shard_name(path).is_some_and(|name| name.parse::<u64>().is_ok()));
    if numeric {
        paths.sort_by_key(|path| {
            shard_name(path)
                .and_then(|name| name.parse::<u64>().ok())
                .unwrap_or(u64::MAX)
        });
    } else {
        paths.sort();
    }
}

/// Shard name of a shard file: its file stem
#[must_use]
pub fn shard_name(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|stem| stem.to_str())
}

/// Path builder for every file the pipeline reads or writes
#[derive(Debug, Clone)]
pub struct TabularLayout {
    meds_cohort_dir: PathBuf,
    tabularized_dir: PathBuf,
    cache_dir: PathBuf,
}

impl TabularLayout {
    #[must_use]
    pub fn new(
        meds_cohort_dir: impl Into<PathBuf>,
        tabularized_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            meds_cohort_dir: meds_cohort_dir.into(),
            tabularized_dir: tabularized_dir.into(),
            cache_dir: cache_dir.into(),
        }
    }

    #[must_use]
    pub fn tabularized_dir(&self) -> &Path {
        &self.tabularized_dir
    }

    /// Directory holding the event shards of a split
    #[must_use]
    pub fn split_dir(&self, split: &str) -> PathBuf {
        self.meds_cohort_dir.join("final_cohort").join(split)
    }

    /// Input event shard
    #[must_use]
    pub fn events_file(&self, split: &str, shard: &str) -> PathBuf {
        self.split_dir(split).join(format!("{shard}.parquet"))
    }

    /// Optional split/shard manifest
    #[must_use]
    pub fn manifest_file(&self) -> PathBuf {
        self.meds_cohort_dir.join("splits.json")
    }

    #[must_use]
    pub fn feature_columns_file(&self) -> PathBuf {
        self.tabularized_dir.join("feature_columns.json")
    }

    #[must_use]
    pub fn feature_freqs_file(&self) -> PathBuf {
        self.tabularized_dir.join("feature_freqs.json")
    }

    /// Cached frequency table of one shard
    #[must_use]
    pub fn shard_freqs_file(&self, split: &str, shard: &str) -> PathBuf {
        self.cache_dir
            .join("feature_freqs")
            .join(split)
            .join(format!("{shard}.json"))
    }

    /// Per-shard static matrix, broadcast onto the shard's event instants
    #[must_use]
    pub fn static_file(&self, split: &str, shard: &str, agg: Aggregation) -> PathBuf {
        self.tabularized_dir
            .join("static")
            .join(split)
            .join(shard)
            .join(format!("{}.parquet", agg.statistic()))
    }

    /// Per-shard dynamic matrix of one window
    #[must_use]
    pub fn window_file(&self, split: &str, shard: &str, window: &WindowSize, agg: Aggregation) -> PathBuf {
        self.tabularized_dir
            .join("ts")
            .join(split)
            .join(shard)
            .join(window.label())
            .join(agg.group())
            .join(format!("{}.parquet", agg.statistic()))
    }

    /// Matrix file of one shard for any aggregation
    ///
    /// The window is ignored for static aggregations.
    #[must_use]
    pub fn matrix_file(&self, split: &str, shard: &str, window: &WindowSize, agg: Aggregation) -> PathBuf {
        if agg.is_dynamic() {
            self.window_file(split, shard, window, agg)
        } else {
            self.static_file(split, shard, agg)
        }
    }

    /// Event index of a shard: event_id to (patient_id, timestamp)
    #[must_use]
    pub fn index_file(&self, split: &str, shard: &str) -> PathBuf {
        self.tabularized_dir
            .join("index")
            .join(split)
            .join(format!("{shard}.parquet"))
    }

    /// Directory of the label files of a split
    #[must_use]
    pub fn task_dir(&self, split: &str) -> PathBuf {
        self.tabularized_dir.join("task").join(split)
    }

    #[must_use]
    pub fn task_file(&self, split: &str, shard: &str) -> PathBuf {
        self.task_dir(split).join(format!("{shard}.parquet"))
    }

    /// Split-level matrix, all shards stacked in shard order
    #[must_use]
    pub fn merged_file(&self, split: &str, window: &WindowSize, agg: Aggregation) -> PathBuf {
        let base = self.tabularized_dir.join("merged").join(split);
        if agg.is_dynamic() {
            base.join(window.label())
                .join(agg.group())
                .join(format!("{}.parquet", agg.statistic()))
        } else {
            base.join("static")
                .join(format!("{}.parquet", agg.statistic()))
        }
    }
}
