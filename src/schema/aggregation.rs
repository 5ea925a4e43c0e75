//! Aggregation kinds and the feature column kinds they select.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TabularError;

/// The kind of a feature column, encoded as the suffix of its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureKind {
    /// `<code>/code`: a timestamped occurrence of the code
    Code,
    /// `<code>/value`: a timestamped numerical value of the code
    Value,
    /// `<code>/static/present`: an untimed occurrence of the code
    StaticPresent,
    /// `<code>/static/first`: an untimed numerical value of the code
    StaticFirst,
}

impl FeatureKind {
    /// Suffix appended to the code to form the feature column name
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Value => "value",
            Self::StaticPresent => "static/present",
            Self::StaticFirst => "static/first",
        }
    }

    /// Build the feature column name for a code
    #[must_use]
    pub fn column_name(self, code: &str) -> String {
        format!("{code}/{}", self.suffix())
    }

    /// Split a feature column name into its code and kind
    ///
    /// Codes may themselves contain `/`, so the kind is recognised by suffix.
    #[must_use]
    pub fn parse_column(name: &str) -> Option<(&str, Self)> {
        [
            Self::StaticPresent,
            Self::StaticFirst,
            Self::Code,
            Self::Value,
        ]
        .into_iter()
        .find_map(|kind| {
            name.strip_suffix(kind.suffix())
                .and_then(|rest| rest.strip_suffix('/'))
                .filter(|code| !code.is_empty())
                .map(|code| (code, kind))
        })
    }

    /// Whether columns of this kind are computed over time windows
    #[must_use]
    pub const fn is_dynamic(self) -> bool {
        matches!(self, Self::Code | Self::Value)
    }
}

/// The statistic computed per feature column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Aggregation {
    /// Number of occurrences of the code
    CodeCount,
    /// Number of numerical values recorded for the code
    ValueCount,
    /// Sum of the numerical values
    ValueSum,
    /// Sum of the squared numerical values
    ValueSumSqd,
    /// Minimum numerical value
    ValueMin,
    /// Maximum numerical value
    ValueMax,
    /// Whether the patient has the static code at all
    StaticPresent,
    /// First static value recorded for the patient
    StaticFirst,
}

impl Aggregation {
    /// Every supported aggregation, in canonical order
    pub const ALL: [Self; 8] = [
        Self::CodeCount,
        Self::ValueCount,
        Self::ValueSum,
        Self::ValueSumSqd,
        Self::ValueMin,
        Self::ValueMax,
        Self::StaticPresent,
        Self::StaticFirst,
    ];

    /// Canonical name, e.g. `code/count` or `static/first`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CodeCount => "code/count",
            Self::ValueCount => "value/count",
            Self::ValueSum => "value/sum",
            Self::ValueSumSqd => "value/sum_sqd",
            Self::ValueMin => "value/min",
            Self::ValueMax => "value/max",
            Self::StaticPresent => "static/present",
            Self::StaticFirst => "static/first",
        }
    }

    /// Kind of feature column this aggregation produces values for
    #[must_use]
    pub const fn feature_kind(self) -> FeatureKind {
        match self {
            Self::CodeCount => FeatureKind::Code,
            Self::ValueCount
            | Self::ValueSum
            | Self::ValueSumSqd
            | Self::ValueMin
            | Self::ValueMax => FeatureKind::Value,
            Self::StaticPresent => FeatureKind::StaticPresent,
            Self::StaticFirst => FeatureKind::StaticFirst,
        }
    }

    /// Whether this aggregation is computed over time windows
    #[must_use]
    pub const fn is_dynamic(self) -> bool {
        self.feature_kind().is_dynamic()
    }

    /// Leading path component (`code`, `value` or `static`)
    #[must_use]
    pub fn group(self) -> &'static str {
        self.split().0
    }

    /// Trailing path component (`count`, `sum`, `present`, ...)
    #[must_use]
    pub fn statistic(self) -> &'static str {
        self.split().1
    }

    fn split(self) -> (&'static str, &'static str) {
        self.as_str().split_once('/').unwrap_or((self.as_str(), ""))
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = TabularError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|agg| agg.as_str() == s.trim())
            .ok_or_else(|| TabularError::InvalidAggregation(s.to_string()))
    }
}

impl TryFrom<String> for Aggregation {
    type Error = TabularError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Aggregation> for String {
    fn from(value: Aggregation) -> Self {
        value.as_str().to_string()
    }
}
