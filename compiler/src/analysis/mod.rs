//! The dataflow roundoff analysis.
//!
//! [`range`] computes sound real-valued ranges for every sub-expression,
//! [`roundoff`] propagates finite-precision errors over those ranges, and
//! [`driver`] orchestrates both per function. Failures are pure values; the
//! driver decides whether to subdivide the input domain or give up.

pub mod driver;
pub mod range;
pub mod roundoff;

pub use driver::{analyze_function, analyze_program, fitness, DriverError};
pub use range::{eval_range, RangeDomain, RangeEvaluation};
pub use roundoff::{eval_roundoff, ErrorDomain, RoundoffEvaluation, RoundoffSettings};

use crate::ast::{Ident, NodeId, Span};
use crate::interval::{DomainError, Interval};
use crate::precision::Precision;
use crate::rational::{Rational, RoundDir};
use std::collections::HashMap;
use std::fmt;

/// Kinds of analysis failure.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisErrorKind {
    /// A divisor range (or range widened by its error) encloses zero.
    DivisionByZero,
    /// A square-root argument range reaches below zero.
    NegativeSqrt,
    /// The expression references an identifier absent from the inputs.
    UnboundVariable(Ident),
    /// Operator outside the supported set.
    UnsupportedOperator(String),
    /// Mixed-precision assignment across incomparable formats.
    IncompatiblePrecisions(Precision, Precision),
    /// No intermediate range recorded for a node the error pass visits.
    MissingRange(NodeId),
}

impl From<DomainError> for AnalysisErrorKind {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::DivisionByZero => AnalysisErrorKind::DivisionByZero,
            DomainError::NegativeSqrt => AnalysisErrorKind::NegativeSqrt,
        }
    }
}

/// An analysis failure with optional source position and function context.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisError {
    pub kind: AnalysisErrorKind,
    pub span: Option<Span>,
    pub function: Option<String>,
}

impl AnalysisError {
    pub fn new(kind: AnalysisErrorKind) -> Self {
        AnalysisError {
            kind,
            span: None,
            function: None,
        }
    }

    pub fn domain(e: DomainError, span: Option<Span>) -> Self {
        AnalysisError {
            kind: e.into(),
            span,
            function: None,
        }
    }

    pub fn with_span(mut self, span: Option<Span>) -> Self {
        if span.is_some() {
            self.span = span;
        }
        self
    }

    pub fn with_function(mut self, name: &str) -> Self {
        self.function = Some(name.to_string());
        self
    }

    /// Failures the driver may recover from by subdividing the input domain.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            AnalysisErrorKind::DivisionByZero | AnalysisErrorKind::NegativeSqrt
        )
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(function) = &self.function {
            write!(f, "in `{function}`: ")?;
        }
        match &self.kind {
            AnalysisErrorKind::DivisionByZero => {
                write!(f, "division by an enclosure that contains zero")?
            }
            AnalysisErrorKind::NegativeSqrt => {
                write!(f, "square root of an enclosure that reaches below zero")?
            }
            AnalysisErrorKind::UnboundVariable(id) => write!(f, "unbound variable `{id}`")?,
            AnalysisErrorKind::UnsupportedOperator(op) => {
                write!(f, "unsupported operator `{op}`")?
            }
            AnalysisErrorKind::IncompatiblePrecisions(a, b) => {
                write!(f, "incompatible precisions {a} and {b}")?
            }
            AnalysisErrorKind::MissingRange(id) => {
                write!(f, "no intermediate range recorded for node {id}")?
            }
        }
        if let Some(span) = &self.span {
            write!(f, " at {span}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AnalysisError {}

/// Advisory conditions reported alongside a successful result.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// The result range exceeds the largest finite value of the precision.
    Overflow { precision: Precision },
    /// The SMT range method could not refine (feature off or timeout).
    SmtDegraded,
    /// The result was obtained after subdividing the input domain.
    Subdivided { depth: u32 },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Overflow { precision } => {
                write!(f, "result range exceeds the {precision} finite range")
            }
            Warning::SmtDegraded => {
                write!(f, "SMT refinement unavailable; using plain interval bounds")
            }
            Warning::Subdivided { depth } => {
                write!(f, "input domain subdivided (depth {depth})")
            }
        }
    }
}

/// Everything the analysis produces for one function.
#[derive(Debug, Clone)]
pub struct FunctionAnalysis {
    pub name: String,
    /// Worst-case absolute roundoff of the result.
    pub abs_error: Rational,
    /// `abs_error / min |result|` when the range excludes zero.
    pub rel_error: Option<Rational>,
    pub range: Interval,
    /// Per-node error bounds, keyed by expression identity.
    pub interm_errors: HashMap<NodeId, Rational>,
    /// Per-node ranges, keyed by expression identity.
    pub interm_ranges: HashMap<NodeId, Interval>,
    pub warnings: Vec<Warning>,
}

impl fmt::Display for FunctionAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: abs error = {}, range = {}",
            self.name,
            self.abs_error.to_scientific(17, RoundDir::Ceil),
            self.range
        )?;
        if let Some(rel) = &self.rel_error {
            write!(f, ", rel error = {}", rel.to_scientific(4, RoundDir::Ceil))?;
        }
        for w in &self.warnings {
            write!(f, " [warning: {w}]")?;
        }
        Ok(())
    }
}
