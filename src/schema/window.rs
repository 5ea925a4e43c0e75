//! Trailing window sizes such as `30d`, `1h` or `full`.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::error::TabularError;

/// A trailing time window over which dynamic features are aggregated
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WindowSize {
    /// Everything up to and including the current instant
    Full,
    /// A bounded window; `label` is the string it was parsed from
    Bounded { label: String, span: TimeDelta },
}

impl WindowSize {
    /// Build a bounded window from a duration
    pub fn bounded(label: impl Into<String>, span: TimeDelta) -> Result<Self, TabularError> {
        let label = label.into();
        if span <= TimeDelta::zero() {
            return Err(TabularError::InvalidWindow(label));
        }
        Ok(Self::Bounded { label, span })
    }

    /// Label used in file paths and logs
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Full => "full",
            Self::Bounded { label, .. } => label,
        }
    }

    /// Window duration, `None` for the unbounded window
    #[must_use]
    pub const fn span(&self) -> Option<TimeDelta> {
        match self {
            Self::Full => None,
            Self::Bounded { span, .. } => Some(*span),
        }
    }

    /// Exclusive lower bound of the window ending at `at`
    ///
    /// Observations at or before the returned instant fall out of the window.
    /// `None` means nothing ever falls out.
    #[must_use]
    pub fn cutoff(&self, at: NaiveDateTime) -> Option<NaiveDateTime> {
        self.span().and_then(|span| at.checked_sub_signed(span))
    }
}

fn unit_delta(unit: &str, amount: i64) -> Option<TimeDelta> {
    match unit {
        "s" => TimeDelta::try_seconds(amount),
        "m" => TimeDelta::try_minutes(amount),
        "h" => TimeDelta::try_hours(amount),
        "d" => TimeDelta::try_days(amount),
        "w" => TimeDelta::try_weeks(amount),
        "y" => amount.checked_mul(365).and_then(TimeDelta::try_days),
        _ => None,
    }
}

impl FromStr for WindowSize {
    type Err = TabularError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim();
        if label.eq_ignore_ascii_case("full") {
            return Ok(Self::Full);
        }

        let invalid = || TabularError::InvalidWindow(s.to_string());
        let mut span = TimeDelta::zero();
        let mut rest = label;
        while !rest.is_empty() {
            let digits = rest.chars().take_while(char::is_ascii_digit).count();
            if digits == 0 {
                return Err(invalid());
            }
            let (number, tail) = rest.split_at(digits);
            let unit_len = tail
                .chars()
                .take_while(char::is_ascii_alphabetic)
                .count();
            let (unit, tail) = tail.split_at(unit_len);
            let amount: i64 = number.parse().map_err(|_| invalid())?;
            let delta = unit_delta(unit, amount).ok_or_else(invalid)?;
            span = span.checked_add(&delta).ok_or_else(invalid)?;
            rest = tail;
        }

        Self::bounded(label, span).map_err(|_| invalid())
    }
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<String> for WindowSize {
    type Error = TabularError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WindowSize> for String {
    fn from(value: WindowSize) -> Self {
        value.label().to_string()
    }
}
