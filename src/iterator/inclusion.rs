//! Code and frequency inclusion sets over catalog columns.

use rustc_hash::FxHashSet;

use crate::catalog::{FeatureCatalog, FeatureFrequencies};
use crate::error::{Result, TabularError};
use crate::schema::{Aggregation, FeatureKind};

/// The catalog columns retained downstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionSet {
    included: Vec<bool>,
}

impl InclusionSet {
    /// Every catalog column
    #[must_use]
    pub fn all(catalog: &FeatureCatalog) -> Self {
        Self {
            included: vec![true; catalog.len()],
        }
    }

    /// Resolve the allow-list and frequency threshold against the catalog
    ///
    /// An allow-list entry keeps a column when it equals the column name or
    /// the column's code. With both constraints the result is their
    /// intersection; with neither it is every column.
    ///
    /// # Errors
    /// [`TabularError::EmptyInclusionSet`] when a given constraint, or the
    /// intersection of both, keeps no column.
    pub fn resolve(
        catalog: &FeatureCatalog,
        freqs: &FeatureFrequencies,
        codes: Option<&[String]>,
        min_frequency: Option<u64>,
    ) -> Result<Self> {
        let mut set = Self::all(catalog);

        if let Some(codes) = codes {
            let allowed: FxHashSet<&str> = codes.iter().map(String::as_str).collect();
            set.retain(catalog, |column| {
                allowed.contains(column)
                    || FeatureKind::parse_column(column).is_some_and(|(code, _)| allowed.contains(code))
            });
            if set.is_empty() {
                return Err(TabularError::EmptyInclusionSet(format!(
                    "none of the {} allowed codes is a catalog column",
                    codes.len()
                )));
            }
        }

        if let Some(threshold) = min_frequency {
            set.retain(catalog, |column| freqs.get(column) >= threshold);
            if set.is_empty() {
                return Err(TabularError::EmptyInclusionSet(format!(
                    "no allowed column occurs at least {threshold} times"
                )));
            }
        }

        Ok(set)
    }

    fn retain<F>(&mut self, catalog: &FeatureCatalog, keep: F)
    where
        F: Fn(&str) -> bool,
    {
        for (included, column) in self.included.iter_mut().zip(catalog.columns()) {
            *included = *included && keep(column);
        }
    }

    /// Whether the catalog column with this global index is retained
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.included.get(index).copied().unwrap_or(false)
    }

    /// Number of retained columns
    #[must_use]
    pub fn len(&self) -> usize {
        self.included.iter().filter(|&&keep| keep).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mask over the columns of an aggregation's matrix
    #[must_use]
    pub fn column_mask(&self, catalog: &FeatureCatalog, agg: Aggregation) -> Vec<bool> {
        catalog
            .features_for(agg)
            .into_iter()
            .map(|(global, _)| self.contains(global))
            .collect()
    }

    /// Retained column names of an aggregation, in matrix order
    #[must_use]
    pub fn columns_for<'a>(&self, catalog: &'a FeatureCatalog, agg: Aggregation) -> Vec<&'a str> {
        catalog
            .features_for(agg)
            .into_iter()
            .filter(|&(global, _)| self.contains(global))
            .map(|(global, _)| catalog.columns()[global].as_str())
            .collect()
    }
}
