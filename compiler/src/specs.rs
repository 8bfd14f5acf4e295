//! Precondition processing.
//!
//! Folds a function's `require` conjunction into the per-parameter input
//! range map, the optional input-error map, and the list of additional
//! polynomial constraints handed to the SMT range domain.

use crate::ast::{Constraint, FunctionDef, Ident, PreClause};
use crate::interval::Interval;
use crate::rational::Rational;
use std::collections::HashMap;
use thiserror::Error;

/// The analyzable content of one function's precondition.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    /// Total over the function's parameters.
    pub input_ranges: HashMap<Ident, Interval>,
    /// Present only for parameters with an explicit `+/-` clause.
    pub input_errors: HashMap<Ident, Rational>,
    /// Additional constraints, passed verbatim to the SMT backend.
    pub constraints: Vec<Constraint>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpecError {
    #[error("function `{function}`: parameter `{param}` has no complete input range")]
    IncompleteSpec { function: String, param: String },

    #[error("function `{function}`: parameter `{param}` has an empty input range")]
    EmptyRange { function: String, param: String },
}

/// Derive the input maps for one function.
pub fn process(function: &FunctionDef) -> Result<FunctionSpec, SpecError> {
    let mut lows: HashMap<Ident, Rational> = HashMap::new();
    let mut highs: HashMap<Ident, Rational> = HashMap::new();
    let mut input_errors: HashMap<Ident, Rational> = HashMap::new();
    let mut constraints = Vec::new();

    let tighten_low = |lows: &mut HashMap<Ident, Rational>, var: &Ident, lo: &Rational| {
        lows.entry(var.clone())
            .and_modify(|cur| {
                if *lo > *cur {
                    *cur = lo.clone();
                }
            })
            .or_insert_with(|| lo.clone());
    };
    let tighten_high = |highs: &mut HashMap<Ident, Rational>, var: &Ident, hi: &Rational| {
        highs
            .entry(var.clone())
            .and_modify(|cur| {
                if *hi < *cur {
                    *cur = hi.clone();
                }
            })
            .or_insert_with(|| hi.clone());
    };

    for clause in &function.requires {
        match clause {
            PreClause::LowerBound { var, lo } => tighten_low(&mut lows, var, lo),
            PreClause::UpperBound { var, hi } => tighten_high(&mut highs, var, hi),
            PreClause::InRange { var, lo, hi } => {
                tighten_low(&mut lows, var, lo);
                tighten_high(&mut highs, var, hi);
            }
            PreClause::InputError { var, err } => {
                let err = err.abs();
                input_errors
                    .entry(var.clone())
                    .and_modify(|cur| {
                        if err > *cur {
                            *cur = err.clone();
                        }
                    })
                    .or_insert(err);
            }
            PreClause::Constraint(c) => constraints.push(c.clone()),
        }
    }

    let mut input_ranges = HashMap::new();
    for param in &function.params {
        let (lo, hi) = match (lows.remove(param), highs.remove(param)) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => {
                return Err(SpecError::IncompleteSpec {
                    function: function.name.clone(),
                    param: param.name().to_string(),
                })
            }
        };
        if lo > hi {
            return Err(SpecError::EmptyRange {
                function: function.name.clone(),
                param: param.name().to_string(),
            });
        }
        input_ranges.insert(param.clone(), Interval { lo, hi });
    }

    Ok(FunctionSpec {
        input_ranges,
        input_errors,
        constraints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::parse_kernels;

    fn spec_of(src: &str) -> Result<FunctionSpec, SpecError> {
        let program = parse_kernels(src).unwrap();
        process(&program.functions[0])
    }

    #[test]
    fn combines_half_bounds_into_a_range() {
        let spec = spec_of("fn f(x) { require 0 <= x && x <= 2 x }").unwrap();
        let range = spec.input_ranges.values().next().unwrap();
        assert_eq!(range.lo, Rational::zero());
        assert_eq!(range.hi, Rational::integer(2));
    }

    #[test]
    fn repeated_bounds_intersect() {
        let spec = spec_of("fn f(x) { require x in [0, 10] && x in [2, 20] x }").unwrap();
        let range = spec.input_ranges.values().next().unwrap();
        assert_eq!(range.lo, Rational::integer(2));
        assert_eq!(range.hi, Rational::integer(10));
    }

    #[test]
    fn missing_bound_is_rejected() {
        assert!(matches!(
            spec_of("fn f(x) { require 0 <= x x }"),
            Err(SpecError::IncompleteSpec { .. })
        ));
    }

    #[test]
    fn empty_range_is_rejected() {
        assert!(matches!(
            spec_of("fn f(x) { require x in [0, 1] && x in [2, 3] x }"),
            Err(SpecError::EmptyRange { .. })
        ));
    }

    #[test]
    fn input_errors_and_constraints_are_collected() {
        let spec = spec_of(
            "fn f(x, y) { require x in [0, 1] && y in [1, 2] && x +/- 1e-9 && x * x <= y x / y }",
        )
        .unwrap();
        assert_eq!(spec.input_errors.len(), 1);
        assert_eq!(
            spec.input_errors.values().next().unwrap(),
            &Rational::from_decimal_str("1e-9").unwrap()
        );
        assert_eq!(spec.constraints.len(), 1);
    }
}
