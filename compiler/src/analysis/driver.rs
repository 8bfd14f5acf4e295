//! Per-function analysis orchestration.
//!
//! For each kernel: derive the input maps from the precondition, pick the
//! range and error domains, run the two evaluators, and publish the result.
//! Recoverable failures (division by zero, negative sqrt) trigger bounded
//! bisection of the widest input dimension before the function is given up.

use super::range::eval_range;
use super::roundoff::{eval_roundoff, RoundoffSettings};
use super::{AnalysisError, FunctionAnalysis, Warning};
use crate::affine::AffineForm;
use crate::ast::{Expr, ExprKind, FunctionDef, Ident, NodeId, Program};
use crate::interval::Interval;
use crate::options::{AnalysisOptions, ErrorMethod, RangeMethod};
use crate::precision::Precision;
use crate::rational::Rational;
use crate::smtrange::{ConstraintEnv, RefineBudget, SmtRange};
use crate::specs::{self, SpecError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Failure of one function's analysis.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

/// Analyze every function of a program; results are independent per function.
pub fn analyze_program(
    program: &Program,
    options: &AnalysisOptions,
) -> Vec<Result<FunctionAnalysis, DriverError>> {
    program
        .functions
        .iter()
        .map(|f| analyze_function(f, options))
        .collect()
}

/// Analyze one function.
pub fn analyze_function(
    function: &FunctionDef,
    options: &AnalysisOptions,
) -> Result<FunctionAnalysis, DriverError> {
    let spec = specs::process(function)?;
    let precisions = precision_overrides(function, options);
    let precision_of =
        |id: &Ident| -> Precision { precisions.get(id).copied().unwrap_or(options.precision) };

    // Input error defaults depend on which error sources are tracked.
    let mut input_errors: HashMap<Ident, Rational> = HashMap::new();
    for (id, range) in &spec.input_ranges {
        let declared = spec.input_errors.get(id);
        let err = match (options.track_initial, options.track_roundoff) {
            (true, true) => declared
                .cloned()
                .unwrap_or_else(|| precision_of(id).abs_roundoff(range)),
            (true, false) => declared.cloned().unwrap_or_else(Rational::zero),
            (false, true) => precision_of(id).abs_roundoff(range),
            (false, false) => Rational::zero(),
        };
        input_errors.insert(id.clone(), err);
    }

    debug!(function = %function.name, inputs = spec.input_ranges.len(), "analyzing");

    let ctx = EvalContext {
        body: &function.body,
        input_errors: &input_errors,
        precisions: &precisions,
        constraints: &spec.constraints,
        options,
    };
    let outcome = evaluate_subdivided(&ctx, spec.input_ranges.clone(), options.subdiv_depth)
        .map_err(|e| DriverError::Analysis(e.with_function(&function.name)))?;

    let mut warnings = Vec::new();
    if outcome.smt_degraded {
        warnings.push(Warning::SmtDegraded);
    }
    if outcome.subdivided {
        warnings.push(Warning::Subdivided {
            depth: options.subdiv_depth,
        });
    }
    if let Some(max) = options.precision.max_finite() {
        if outcome.range.max_abs() > max {
            warnings.push(Warning::Overflow {
                precision: options.precision,
            });
        }
    }

    let min_abs = outcome.range.min_abs();
    let rel_error = if min_abs.is_zero() {
        None
    } else {
        Some(&outcome.abs_error / &min_abs)
    };

    Ok(FunctionAnalysis {
        name: function.name.clone(),
        abs_error: outcome.abs_error,
        rel_error,
        range: outcome.range,
        interm_errors: outcome.interm_errors,
        interm_ranges: outcome.interm_ranges,
        warnings,
    })
}

/// Pure fitness function for search collaborators (rewriting, relative
/// error): interval ranges, affine errors, roundoff tracking on. Thread-safe
/// and allocation-scoped to the call; no caches survive it.
pub fn fitness(
    expr: &Expr,
    input_ranges: &HashMap<Ident, Interval>,
    input_errors: &HashMap<Ident, Rational>,
    precisions: &HashMap<Ident, Precision>,
    uniform: Precision,
) -> Result<(Rational, Interval), AnalysisError> {
    let ranges = eval_range::<Interval>(expr, input_ranges)?;
    let range_map = ranges.interval_map();
    let settings = RoundoffSettings {
        precisions,
        uniform,
        constants_precision: uniform,
        track_roundoff: true,
    };
    let errors: HashMap<Ident, AffineForm> = input_errors
        .iter()
        .map(|(id, r)| (id.clone(), AffineForm::plus_minus(r)))
        .collect();
    let roundoff = eval_roundoff::<AffineForm>(expr, &range_map, &errors, &settings)?;
    Ok((roundoff.result.max_abs(), ranges.result))
}

/// Resolve mixed-precision overrides (by source name) against the function's
/// parameters and let-bound variables.
fn precision_overrides(
    function: &FunctionDef,
    options: &AnalysisOptions,
) -> HashMap<Ident, Precision> {
    let mut out = HashMap::new();
    let Some(mixed) = &options.mixed_precision else {
        return out;
    };
    let mut bind = |id: &Ident| {
        if let Some(p) = mixed.get(id.name()) {
            out.insert(id.clone(), *p);
        }
    };
    for p in &function.params {
        bind(p);
    }
    collect_let_bindings(&function.body, &mut bind);
    out
}

fn collect_let_bindings(expr: &Expr, bind: &mut impl FnMut(&Ident)) {
    match &expr.kind {
        ExprKind::Real(_) | ExprKind::Var(_) => {}
        ExprKind::Neg(e) | ExprKind::Sqrt(e) | ExprKind::Pow(e, _) => {
            collect_let_bindings(e, bind)
        }
        ExprKind::Add(l, r) | ExprKind::Sub(l, r) | ExprKind::Mul(l, r) | ExprKind::Div(l, r) => {
            collect_let_bindings(l, bind);
            collect_let_bindings(r, bind);
        }
        ExprKind::Let {
            binding,
            value,
            body,
        } => {
            bind(binding);
            collect_let_bindings(value, bind);
            collect_let_bindings(body, bind);
        }
    }
}

struct EvalContext<'a> {
    body: &'a Expr,
    input_errors: &'a HashMap<Ident, Rational>,
    precisions: &'a HashMap<Ident, Precision>,
    constraints: &'a [crate::ast::Constraint],
    options: &'a AnalysisOptions,
}

struct Outcome {
    range: Interval,
    abs_error: Rational,
    interm_ranges: HashMap<NodeId, Interval>,
    interm_errors: HashMap<NodeId, Rational>,
    smt_degraded: bool,
    subdivided: bool,
}

/// Evaluate once; on a recoverable failure bisect the widest input dimension
/// and join the sub-results, up to `depth` times.
fn evaluate_subdivided(
    ctx: &EvalContext,
    input_ranges: HashMap<Ident, Interval>,
    depth: u32,
) -> Result<Outcome, AnalysisError> {
    match evaluate_once(ctx, &input_ranges) {
        Ok(outcome) => Ok(outcome),
        Err(e) if e.is_recoverable() && depth > 0 => {
            // Widest dimension first; ties broken by identifier uid so the
            // choice is deterministic across runs.
            let Some((split_var, split_range)) = input_ranges
                .iter()
                .filter(|(_, iv)| !iv.is_point())
                .max_by(|a, b| {
                    a.1.width()
                        .cmp(&b.1.width())
                        .then(a.0.uid().cmp(&b.0.uid()))
                })
                .map(|(id, iv)| (id.clone(), iv.clone()))
            else {
                return Err(e);
            };
            debug!(variable = %split_var, depth, "subdividing input domain");
            let mid = split_range.midpoint();
            let mut lower_inputs = input_ranges.clone();
            lower_inputs.insert(
                split_var.clone(),
                Interval::new(split_range.lo.clone(), mid.clone()),
            );
            let mut upper_inputs = input_ranges;
            upper_inputs.insert(split_var, Interval::new(mid, split_range.hi.clone()));

            let lower = evaluate_subdivided(ctx, lower_inputs, depth - 1)?;
            let upper = evaluate_subdivided(ctx, upper_inputs, depth - 1)?;
            Ok(join_outcomes(lower, upper))
        }
        Err(e) => Err(e),
    }
}

fn join_outcomes(a: Outcome, b: Outcome) -> Outcome {
    let mut interm_ranges = a.interm_ranges;
    for (id, iv) in b.interm_ranges {
        interm_ranges
            .entry(id)
            .and_modify(|cur| *cur = cur.join(&iv))
            .or_insert(iv);
    }
    let mut interm_errors = a.interm_errors;
    for (id, err) in b.interm_errors {
        interm_errors
            .entry(id)
            .and_modify(|cur| {
                if err > *cur {
                    *cur = err.clone();
                }
            })
            .or_insert(err);
    }
    Outcome {
        range: a.range.join(&b.range),
        abs_error: a.abs_error.max(b.abs_error),
        interm_ranges,
        interm_errors,
        smt_degraded: a.smt_degraded || b.smt_degraded,
        subdivided: true,
    }
}

fn evaluate_once(
    ctx: &EvalContext,
    input_ranges: &HashMap<Ident, Interval>,
) -> Result<Outcome, AnalysisError> {
    // Range pass in the selected domain, collapsed to plain intervals.
    let mut smt_degraded = false;
    let (range, interm_ranges) = match ctx.options.range_method {
        RangeMethod::Interval => {
            let eval = eval_range::<Interval>(ctx.body, input_ranges)?;
            (eval.result.clone(), eval.interval_map())
        }
        RangeMethod::Affine => {
            let inputs: HashMap<Ident, AffineForm> = input_ranges
                .iter()
                .map(|(id, iv)| (id.clone(), AffineForm::from_interval(iv)))
                .collect();
            let eval = eval_range::<AffineForm>(ctx.body, &inputs)?;
            (eval.result.to_interval(), eval.interval_map())
        }
        RangeMethod::Smt => {
            let env = Arc::new(ConstraintEnv {
                constraints: ctx.constraints.to_vec(),
                var_ranges: input_ranges.clone(),
            });
            let mut inputs: HashMap<Ident, SmtRange> = HashMap::new();
            for (id, iv) in input_ranges {
                let (refined, degraded) =
                    SmtRange::refined_input(id, iv, &env, RefineBudget::default());
                smt_degraded |= degraded;
                inputs.insert(id.clone(), refined);
            }
            let eval = eval_range::<SmtRange>(ctx.body, &inputs)?;
            (eval.result.to_interval(), eval.interval_map())
        }
    };

    // Error pass over the collapsed ranges.
    let settings = RoundoffSettings {
        precisions: ctx.precisions,
        uniform: ctx.options.precision,
        constants_precision: ctx.options.constants(),
        track_roundoff: ctx.options.track_roundoff,
    };
    let (abs_error, interm_errors) = match ctx.options.error_method {
        ErrorMethod::Interval => {
            let errors: HashMap<Ident, Interval> = ctx
                .input_errors
                .iter()
                .map(|(id, r)| (id.clone(), Interval::plus_minus(r)))
                .collect();
            let eval = eval_roundoff::<Interval>(ctx.body, &interm_ranges, &errors, &settings)?;
            (eval.result.max_abs(), eval.magnitude_map())
        }
        ErrorMethod::Affine => {
            let errors: HashMap<Ident, AffineForm> = ctx
                .input_errors
                .iter()
                .map(|(id, r)| (id.clone(), AffineForm::plus_minus(r)))
                .collect();
            let eval = eval_roundoff::<AffineForm>(ctx.body, &interm_ranges, &errors, &settings)?;
            (eval.result.max_abs(), eval.magnitude_map())
        }
    };

    Ok(Outcome {
        range,
        abs_error,
        interm_ranges,
        interm_errors,
        smt_degraded,
        subdivided: false,
    })
}
