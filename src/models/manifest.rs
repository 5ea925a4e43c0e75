//! Split/shard manifest: which patients belong to which shard.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use rustc_hash::FxHashSet;

use crate::error::{Result, TabularError};

/// Mapping from `"<split>/<shard>"` to the patient ids of that shard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardManifest {
    shards: BTreeMap<String, Vec<i64>>,
}

impl ShardManifest {
    /// Build a manifest, checking that no patient is listed twice
    pub fn new(shards: BTreeMap<String, Vec<i64>>) -> Result<Self> {
        let mut seen: HashSet<i64> = HashSet::new();
        for (key, patients) in &shards {
            if key.split_once('/').is_none() {
                return Err(TabularError::Config(format!(
                    "Manifest key '{key}' is not of the form <split>/<shard>"
                )));
            }
            if let Some(duplicate) = patients.iter().find(|&&id| !seen.insert(id)) {
                return Err(TabularError::Config(format!(
                    "Patient {duplicate} is assigned to more than one shard (again in {key})"
                )));
            }
        }
        Ok(Self { shards })
    }

    /// Load a manifest from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let shards: BTreeMap<String, Vec<i64>> = serde_json::from_str(&content)?;
        Self::new(shards)
    }

    /// Shard names of a split, sorted
    #[must_use]
    pub fn shards(&self, split: &str) -> Vec<String> {
        let mut shards: Vec<String> = self
            .shards
            .keys()
            .filter_map(|key| key.split_once('/'))
            .filter(|(s, _)| *s == split)
            .map(|(_, shard)| shard.to_string())
            .collect();
        crate::store::layout::sort_shard_names(&mut shards);
        shards
    }

    /// Patients of one shard, if the shard is listed
    #[must_use]
    pub fn patients(&self, split: &str, shard: &str) -> Option<FxHashSet<i64>> {
        self.shards
            .get(&format!("{split}/{shard}"))
            .map(|ids| ids.iter().copied().collect())
    }
}
