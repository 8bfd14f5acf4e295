//! Analysis configuration.

use crate::precision::Precision;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Abstract domain used for range computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeMethod {
    Interval,
    Affine,
    Smt,
}

/// Abstract domain used for error propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMethod {
    Interval,
    Affine,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown method `{0}`")]
pub struct ParseMethodError(String);

impl FromStr for RangeMethod {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interval" => Ok(RangeMethod::Interval),
            "affine" => Ok(RangeMethod::Affine),
            "smt" => Ok(RangeMethod::Smt),
            _ => Err(ParseMethodError(s.to_string())),
        }
    }
}

impl FromStr for ErrorMethod {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interval" => Ok(ErrorMethod::Interval),
            "affine" => Ok(ErrorMethod::Affine),
            _ => Err(ParseMethodError(s.to_string())),
        }
    }
}

impl fmt::Display for RangeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeMethod::Interval => write!(f, "interval"),
            RangeMethod::Affine => write!(f, "affine"),
            RangeMethod::Smt => write!(f, "smt"),
        }
    }
}

impl fmt::Display for ErrorMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMethod::Interval => write!(f, "interval"),
            ErrorMethod::Affine => write!(f, "affine"),
        }
    }
}

/// Per-run analysis options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub range_method: RangeMethod,
    pub error_method: ErrorMethod,
    /// Uniform default precision.
    pub precision: Precision,
    /// Precision for literal constants; defaults to `precision`.
    pub constants_precision: Option<Precision>,
    /// Per-variable precision overrides, by source name (parameters and
    /// let-bound variables).
    pub mixed_precision: Option<HashMap<String, Precision>>,
    /// Track user-declared initial errors on inputs.
    pub track_initial: bool,
    /// Track per-operation roundoff.
    pub track_roundoff: bool,
    /// Maximum input-domain bisection depth on recoverable failures.
    pub subdiv_depth: u32,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        AnalysisOptions {
            range_method: RangeMethod::Interval,
            error_method: ErrorMethod::Affine,
            precision: Precision::Float64,
            constants_precision: None,
            mixed_precision: None,
            track_initial: true,
            track_roundoff: true,
            subdiv_depth: 2,
        }
    }
}

impl AnalysisOptions {
    pub fn constants(&self) -> Precision {
        self.constants_precision.unwrap_or(self.precision)
    }
}
