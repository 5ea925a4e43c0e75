//! Feature catalog
//!
//! The catalog is the sorted set of feature columns observed in the training
//! split. It fixes the column index of every matrix built afterwards and is
//! shared read-only by all downstream stages. Frequencies are collected per
//! shard (map) and summed (reduce); summation is order independent.

use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TabularError};
use crate::models::EventRecord;
use crate::schema::{Aggregation, FeatureKind};
use crate::store::CachedArtifact;
use crate::utils::io::{read_json, write_json_atomic};

/// Occurrence count of every feature column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureFrequencies(BTreeMap<String, u64>);

impl FeatureFrequencies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` occurrences of `column`
    pub fn add(&mut self, column: String, count: u64) {
        *self.0.entry(column).or_insert(0) += count;
    }

    /// Count of one column, zero when never observed
    #[must_use]
    pub fn get(&self, column: &str) -> u64 {
        self.0.get(column).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Columns and counts in column order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(column, &count)| (column.as_str(), count))
    }

    /// Fold another table into this one
    pub fn merge(&mut self, other: &Self) {
        for (column, count) in other.iter() {
            self.add(column.to_string(), count);
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

impl AddAssign<&FeatureFrequencies> for FeatureFrequencies {
    fn add_assign(&mut self, rhs: &FeatureFrequencies) {
        self.merge(rhs);
    }
}

impl CachedArtifact for FeatureFrequencies {
    fn read_from(path: &Path) -> Result<Self> {
        Self::load(path)
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        self.save(path)
    }
}

/// Count the feature columns of one shard's events
///
/// Timestamped events count towards `<code>/code`, and towards
/// `<code>/value` when they carry a value. Untimed events count towards
/// `<code>/static/present`, and towards `<code>/static/first` when they carry
/// a value.
#[must_use]
pub fn compute_shard_frequencies(events: &[EventRecord]) -> FeatureFrequencies {
    let mut counts: FxHashMap<(&str, FeatureKind), u64> = FxHashMap::default();
    for event in events {
        let has_value = event.numerical_value.is_some();
        let (occurrence, valued) = if event.is_static() {
            (FeatureKind::StaticPresent, FeatureKind::StaticFirst)
        } else {
            (FeatureKind::Code, FeatureKind::Value)
        };
        *counts.entry((event.code.as_str(), occurrence)).or_insert(0) += 1;
        if has_value {
            *counts.entry((event.code.as_str(), valued)).or_insert(0) += 1;
        }
    }

    let mut freqs = FeatureFrequencies::new();
    for ((code, kind), count) in counts {
        freqs.add(kind.column_name(code), count);
    }
    freqs
}

/// Sum shard-local tables into the split-wide table
#[must_use]
pub fn reduce_frequencies<'a, I>(tables: I) -> FeatureFrequencies
where
    I: IntoIterator<Item = &'a FeatureFrequencies>,
{
    tables
        .into_iter()
        .fold(FeatureFrequencies::new(), |mut acc, table| {
            acc += table;
            acc
        })
}

/// Immutable, ordered set of feature columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureCatalog {
    columns: Vec<String>,
    index: FxHashMap<String, usize>,
}

impl FeatureCatalog {
    /// Build a catalog from column names; order and duplicates are normalised
    pub fn new(mut columns: Vec<String>) -> Result<Self> {
        columns.sort();
        columns.dedup();
        if let Some(bad) = columns.iter().find(|c| FeatureKind::parse_column(c).is_none()) {
            return Err(TabularError::Schema(format!(
                "'{bad}' is not a feature column name"
            )));
        }
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, column)| (column.clone(), i))
            .collect();
        Ok(Self { columns, index })
    }

    /// The catalog of every column observed in `freqs`
    pub fn from_frequencies(freqs: &FeatureFrequencies) -> Result<Self> {
        Self::new(freqs.iter().map(|(column, _)| column.to_string()).collect())
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Global index of a column
    #[must_use]
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    /// Columns of one kind as (global index, code), in catalog order
    ///
    /// The position in the returned vector is the column's index in the
    /// matrix of any aggregation of that kind.
    #[must_use]
    pub fn features_of_kind(&self, kind: FeatureKind) -> Vec<(usize, &str)> {
        self.columns
            .iter()
            .enumerate()
            .filter_map(|(i, column)| match FeatureKind::parse_column(column) {
                Some((code, k)) if k == kind => Some((i, code)),
                _ => None,
            })
            .collect()
    }

    /// Columns selected by an aggregation, see [`Self::features_of_kind`]
    #[must_use]
    pub fn features_for(&self, agg: Aggregation) -> Vec<(usize, &str)> {
        self.features_of_kind(agg.feature_kind())
    }

    /// Code to matrix column lookup for an aggregation
    #[must_use]
    pub fn code_index(&self, agg: Aggregation) -> FxHashMap<&str, usize> {
        self.features_for(agg)
            .into_iter()
            .enumerate()
            .map(|(local, (_, code))| (code, local))
            .collect()
    }

    /// Whether the code has a time-varying column
    #[must_use]
    pub fn is_dynamic_code(&self, code: &str) -> bool {
        [FeatureKind::Code, FeatureKind::Value]
            .into_iter()
            .any(|kind| self.index.contains_key(&kind.column_name(code)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, &self.columns)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::new(read_json(path)?)
    }
}

impl CachedArtifact for FeatureCatalog {
    fn read_from(path: &Path) -> Result<Self> {
        Self::load(path)
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        self.save(path)
    }
}

/// Reduce shard tables into the split-wide frequencies and their catalog
pub fn build_catalog<'a, I>(tables: I) -> Result<(Arc<FeatureCatalog>, FeatureFrequencies)>
where
    I: IntoIterator<Item = &'a FeatureFrequencies>,
{
    let freqs = reduce_frequencies(tables);
    let catalog = FeatureCatalog::from_frequencies(&freqs)?;
    Ok((Arc::new(catalog), freqs))
}
