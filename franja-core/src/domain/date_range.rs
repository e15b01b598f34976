//! Date selection for an extraction run

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date format accepted from callers and used in file names
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A caller's date choice, as entered
///
/// Dates are kept as text until [`crate::services::query::validate_date_selector`]
/// parses and checks them; nothing else accepts a selector directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DateSelector {
    Single { date: String },
    Range { start: String, end: String },
}

impl DateSelector {
    pub fn single(date: impl Into<String>) -> Self {
        Self::Single { date: date.into() }
    }

    pub fn range(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self::Range {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn on(date: NaiveDate) -> Self {
        Self::single(date.format(DATE_FORMAT).to_string())
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self::range(
            start.format(DATE_FORMAT).to_string(),
            end.format(DATE_FORMAT).to_string(),
        )
    }
}

/// An inclusive date window that passed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidatedRange {
    start: NaiveDate,
    end: NaiveDate,
    single: bool,
}

impl ValidatedRange {
    /// Only the validation chokepoint constructs ranges
    pub(crate) fn new(start: NaiveDate, end: NaiveDate, single: bool) -> Self {
        debug_assert!(start <= end);
        Self { start, end, single }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Whether the caller asked for one calendar day
    pub fn is_single_day(&self) -> bool {
        self.single || self.start == self.end
    }

    /// Number of calendar days covered, both ends included
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Label used in report file names: `2024-01-01` or `2024-01-01_2024-01-31`
    pub fn label(&self) -> String {
        if self.is_single_day() {
            self.start.format(DATE_FORMAT).to_string()
        } else {
            format!(
                "{}_{}",
                self.start.format(DATE_FORMAT),
                self.end.format(DATE_FORMAT)
            )
        }
    }
}

impl fmt::Display for ValidatedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_day() {
            write!(f, "{}", self.start.format(DATE_FORMAT))
        } else {
            write!(
                f,
                "{} to {}",
                self.start.format(DATE_FORMAT),
                self.end.format(DATE_FORMAT)
            )
        }
    }
}
