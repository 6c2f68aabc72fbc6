//! Skim keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between base name and time period in a matrix name
/// (`TIME__AM` → `("TIME", "AM")`).
pub const SKIM_KEY_SEPARATOR: &str = "__";

/// Logical key of one skim matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SkimKey {
    /// Time-invariant matrix, e.g. `DIST`.
    Scalar(String),
    /// Per-period matrix, e.g. `("TIME", "AM")`.
    Period(String, String),
}

impl SkimKey {
    pub fn scalar(base: impl Into<String>) -> Self {
        SkimKey::Scalar(base.into())
    }

    pub fn period(base: impl Into<String>, period: impl Into<String>) -> Self {
        SkimKey::Period(base.into(), period.into())
    }

    /// Split a matrix name on the first separator.
    pub fn parse(matrix_name: &str) -> Self {
        match matrix_name.split_once(SKIM_KEY_SEPARATOR) {
            Some((base, period)) => SkimKey::Period(base.to_string(), period.to_string()),
            None => SkimKey::Scalar(matrix_name.to_string()),
        }
    }

    /// Base name (`key1`).
    pub fn base(&self) -> &str {
        match self {
            SkimKey::Scalar(b) | SkimKey::Period(b, _) => b,
        }
    }

    /// Time period label, if any.
    pub fn time_period(&self) -> Option<&str> {
        match self {
            SkimKey::Scalar(_) => None,
            SkimKey::Period(_, p) => Some(p),
        }
    }

    /// Label under which this key sits in its base block: the period, or the
    /// base name itself for scalar skims.
    pub fn sub_label(&self) -> &str {
        match self {
            SkimKey::Scalar(b) => b,
            SkimKey::Period(_, p) => p,
        }
    }
}

impl fmt::Display for SkimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkimKey::Scalar(b) => write!(f, "{b}"),
            SkimKey::Period(b, p) => write!(f, "{b}{SKIM_KEY_SEPARATOR}{p}"),
        }
    }
}

impl From<&str> for SkimKey {
    fn from(s: &str) -> Self {
        SkimKey::parse(s)
    }
}

impl From<(&str, &str)> for SkimKey {
    fn from((base, period): (&str, &str)) -> Self {
        SkimKey::period(base, period)
    }
}
