//! Compositional roundoff-error evaluation.
//!
//! Given the per-node real ranges from the range pass, this evaluator
//! propagates operand errors through each operation's first-order semantics
//! and, when roundoff tracking is on, adds the fresh error committed by
//! executing the operation in its finite precision. Errors live in an
//! [`ErrorDomain`]: plain intervals, or affine forms whose shared noise
//! symbols keep propagated errors correlated.
//!
//! Per-operator rules:
//! - `+`/`-` propagate `e_l ± e_r`; unary minus negates.
//! - `*` propagates `range(l)·e_r + range(r)·e_l + e_l·e_r`.
//! - `/` goes through the reciprocal: the divisor range widened by its own
//!   error must exclude zero, the derivative enclosure `-1/y²` scales the
//!   divisor error, then the multiplication rule applies.
//! - `sqrt` scales the operand error by the derivative enclosure
//!   `1/(2·sqrt(y))` over the widened range, which must stay positive.
//! - `x^n` is iterated multiplication, committing roundoff per step.
//! - Literals are exact when representable in the constants precision and
//!   are otherwise rounded once. Variable references contribute the input
//!   error. A `let` adds no roundoff at the binding site; it only inserts a
//!   cast error when the declared precision is below the value's.

use super::{AnalysisError, AnalysisErrorKind};
use crate::affine::AffineForm;
use crate::ast::{Expr, ExprKind, Ident, NodeId, Span};
use crate::interval::Interval;
use crate::precision::Precision;
use crate::rational::Rational;
use std::cmp::Ordering;
use std::collections::HashMap;

/// The operations an error domain must supply.
pub trait ErrorDomain: Clone {
    fn zero() -> Self;
    /// Symmetric error `± r`.
    fn from_bound(r: &Rational) -> Self;
    fn add(&self, rhs: &Self) -> Self;
    fn sub(&self, rhs: &Self) -> Self;
    fn neg(&self) -> Self;
    /// Second-order product of two errors.
    fn mul(&self, rhs: &Self) -> Self;
    /// Sound product with a real interval factor.
    fn scale_interval(&self, k: &Interval) -> Self;
    /// Add an uncorrelated error component of magnitude `|rho|`.
    fn add_bound(&self, rho: &Rational) -> Self;
    fn to_interval(&self) -> Interval;

    fn max_abs(&self) -> Rational {
        self.to_interval().max_abs()
    }
}

impl ErrorDomain for Interval {
    fn zero() -> Self {
        Interval::zero()
    }

    fn from_bound(r: &Rational) -> Self {
        Interval::plus_minus(r)
    }

    fn add(&self, rhs: &Self) -> Self {
        Interval::add(self, rhs)
    }

    fn sub(&self, rhs: &Self) -> Self {
        Interval::sub(self, rhs)
    }

    fn neg(&self) -> Self {
        Interval::neg(self)
    }

    fn mul(&self, rhs: &Self) -> Self {
        Interval::mul(self, rhs)
    }

    fn scale_interval(&self, k: &Interval) -> Self {
        Interval::mul(self, k)
    }

    fn add_bound(&self, rho: &Rational) -> Self {
        Interval::add(self, &Interval::plus_minus(rho))
    }

    fn to_interval(&self) -> Interval {
        self.clone()
    }
}

impl ErrorDomain for AffineForm {
    fn zero() -> Self {
        AffineForm::zero()
    }

    fn from_bound(r: &Rational) -> Self {
        AffineForm::plus_minus(r)
    }

    fn add(&self, rhs: &Self) -> Self {
        AffineForm::add(self, rhs)
    }

    fn sub(&self, rhs: &Self) -> Self {
        AffineForm::sub(self, rhs)
    }

    fn neg(&self) -> Self {
        AffineForm::neg(self)
    }

    fn mul(&self, rhs: &Self) -> Self {
        AffineForm::mul(self, rhs)
    }

    fn scale_interval(&self, k: &Interval) -> Self {
        // X·K ⊆ mid(K)·X ± rad(K)·max|X|, keeping the correlated part linear
        // and pushing only the width of K into a fresh symbol.
        let scaled = self.scale(&k.midpoint());
        let spread = k.radius() * self.max_abs();
        scaled.add_noise(&spread)
    }

    fn add_bound(&self, rho: &Rational) -> Self {
        self.clone().add_noise(rho)
    }

    fn to_interval(&self) -> Interval {
        AffineForm::to_interval(self)
    }
}

/// Precision assignment and tracking flags for one evaluation.
#[derive(Debug, Clone)]
pub struct RoundoffSettings<'a> {
    /// Per-variable overrides; variables not present use `uniform`.
    pub precisions: &'a HashMap<Ident, Precision>,
    pub uniform: Precision,
    pub constants_precision: Precision,
    pub track_roundoff: bool,
}

impl RoundoffSettings<'_> {
    fn precision_of(&self, id: &Ident) -> Precision {
        self.precisions.get(id).copied().unwrap_or(self.uniform)
    }
}

/// Result error plus the per-node error map.
#[derive(Debug, Clone)]
pub struct RoundoffEvaluation<E> {
    pub result: E,
    pub intermediate: HashMap<NodeId, E>,
}

impl<E: ErrorDomain> RoundoffEvaluation<E> {
    /// Collapse the per-node errors to absolute magnitudes.
    pub fn magnitude_map(&self) -> HashMap<NodeId, Rational> {
        self.intermediate
            .iter()
            .map(|(id, e)| (*id, e.max_abs()))
            .collect()
    }
}

/// Evaluate the roundoff error of `expr` over precomputed node ranges.
pub fn eval_roundoff<E: ErrorDomain>(
    expr: &Expr,
    ranges: &HashMap<NodeId, Interval>,
    input_errors: &HashMap<Ident, E>,
    settings: &RoundoffSettings,
) -> Result<RoundoffEvaluation<E>, AnalysisError> {
    let env = input_errors
        .iter()
        .map(|(id, e)| (id.clone(), (e.clone(), settings.precision_of(id))))
        .collect();
    let mut ev = Evaluator {
        ranges,
        settings,
        env,
        out: HashMap::new(),
    };
    let (result, _) = ev.eval(expr)?;
    Ok(RoundoffEvaluation {
        result,
        intermediate: ev.out,
    })
}

struct Evaluator<'a, E: ErrorDomain> {
    ranges: &'a HashMap<NodeId, Interval>,
    settings: &'a RoundoffSettings<'a>,
    env: HashMap<Ident, (E, Precision)>,
    out: HashMap<NodeId, E>,
}

impl<E: ErrorDomain> Evaluator<'_, E> {
    fn range_of(&self, node: &Expr) -> Result<&Interval, AnalysisError> {
        self.ranges.get(&node.id).ok_or_else(|| {
            AnalysisError::new(AnalysisErrorKind::MissingRange(node.id)).with_span(node.span)
        })
    }

    /// Add the roundoff committed by one operation executed in `p`, bounded
    /// over the operation's real range widened by the incoming error.
    fn commit_roundoff(&self, propagated: E, range_out: &Interval, p: Precision) -> E {
        if !self.settings.track_roundoff {
            return propagated;
        }
        let widened = range_out.add(&propagated.to_interval());
        let rho = p.abs_roundoff(&widened);
        propagated.add_bound(&rho)
    }

    fn join_precisions(
        &self,
        a: Precision,
        b: Precision,
        span: Option<Span>,
    ) -> Result<Precision, AnalysisError> {
        a.join(&b).ok_or_else(|| {
            AnalysisError::new(AnalysisErrorKind::IncompatiblePrecisions(a, b)).with_span(span)
        })
    }

    /// `range(l)·e_r + range(r)·e_l + e_l·e_r`
    fn mult_error(&self, range_l: &Interval, range_r: &Interval, e_l: &E, e_r: &E) -> E {
        e_r.scale_interval(range_l)
            .add(&e_l.scale_interval(range_r))
            .add(&e_l.mul(e_r))
    }

    /// Error of `1/y` from the divisor's range and error.
    fn inverse_error(
        &self,
        range_r: &Interval,
        e_r: &E,
        span: Option<Span>,
    ) -> Result<(Interval, E), AnalysisError> {
        let widened = range_r.add(&e_r.to_interval());
        if widened.contains_zero() {
            return Err(AnalysisError::new(AnalysisErrorKind::DivisionByZero).with_span(span));
        }
        // d(1/y)/dy = -1/y² over the widened divisor range.
        let derivative = widened
            .pow_i(2)
            .checked_recip()
            .map_err(|d| AnalysisError::domain(d, span))?
            .neg();
        let inv_range = range_r
            .checked_recip()
            .map_err(|d| AnalysisError::domain(d, span))?;
        Ok((inv_range, e_r.scale_interval(&derivative)))
    }

    fn eval(&mut self, expr: &Expr) -> Result<(E, Precision), AnalysisError> {
        let (error, precision) = match &expr.kind {
            ExprKind::Real(r) => {
                let p = self.settings.constants_precision;
                let e = if self.settings.track_roundoff && !p.is_exactly_representable(r) {
                    E::from_bound(&p.abs_roundoff(&Interval::point(r.clone())))
                } else {
                    E::zero()
                };
                (e, p)
            }
            ExprKind::Var(id) => self.env.get(id).cloned().ok_or_else(|| {
                AnalysisError::new(AnalysisErrorKind::UnboundVariable(id.clone()))
                    .with_span(expr.span)
            })?,
            ExprKind::Neg(e) => {
                // Sign flips are exact in every supported format.
                let (inner, p) = self.eval(e)?;
                (inner.neg(), p)
            }
            ExprKind::Add(l, r) => {
                let (e_l, p_l) = self.eval(l)?;
                let (e_r, p_r) = self.eval(r)?;
                let p = self.join_precisions(p_l, p_r, expr.span)?;
                let propagated = e_l.add(&e_r);
                (
                    self.commit_roundoff(propagated, self.range_of(expr)?, p),
                    p,
                )
            }
            ExprKind::Sub(l, r) => {
                let (e_l, p_l) = self.eval(l)?;
                let (e_r, p_r) = self.eval(r)?;
                let p = self.join_precisions(p_l, p_r, expr.span)?;
                let propagated = e_l.sub(&e_r);
                (
                    self.commit_roundoff(propagated, self.range_of(expr)?, p),
                    p,
                )
            }
            ExprKind::Mul(l, r) => {
                let (e_l, p_l) = self.eval(l)?;
                let (e_r, p_r) = self.eval(r)?;
                let p = self.join_precisions(p_l, p_r, expr.span)?;
                let propagated =
                    self.mult_error(self.range_of(l)?, self.range_of(r)?, &e_l, &e_r);
                (
                    self.commit_roundoff(propagated, self.range_of(expr)?, p),
                    p,
                )
            }
            ExprKind::Div(l, r) => {
                let (e_l, p_l) = self.eval(l)?;
                let (e_r, p_r) = self.eval(r)?;
                let p = self.join_precisions(p_l, p_r, expr.span)?;
                let (inv_range, e_inv) = self.inverse_error(self.range_of(r)?, &e_r, expr.span)?;
                let propagated = self.mult_error(self.range_of(l)?, &inv_range, &e_l, &e_inv);
                (
                    self.commit_roundoff(propagated, self.range_of(expr)?, p),
                    p,
                )
            }
            ExprKind::Sqrt(arg) => {
                let (e_arg, p) = self.eval(arg)?;
                let widened = self.range_of(arg)?.add(&e_arg.to_interval());
                if !widened.lo.is_positive() {
                    return Err(
                        AnalysisError::new(AnalysisErrorKind::NegativeSqrt).with_span(expr.span)
                    );
                }
                // d(sqrt(y))/dy = 1/(2*sqrt(y)) over the widened range.
                let root = widened
                    .sqrt()
                    .map_err(|d| AnalysisError::domain(d, expr.span))?;
                let derivative = root
                    .scale(&Rational::integer(2))
                    .checked_recip()
                    .map_err(|d| AnalysisError::domain(d, expr.span))?;
                let propagated = e_arg.scale_interval(&derivative);
                (
                    self.commit_roundoff(propagated, self.range_of(expr)?, p),
                    p,
                )
            }
            ExprKind::Pow(base, n) => {
                let (e_base, p) = self.eval(base)?;
                if *n == 0 {
                    (E::zero(), p)
                } else {
                    // Iterated multiplication, committing roundoff per step.
                    let base_range = self.range_of(base)?.clone();
                    let mut acc_err = e_base.clone();
                    let mut acc_range = base_range.clone();
                    for _ in 1..*n {
                        let propagated =
                            self.mult_error(&acc_range, &base_range, &acc_err, &e_base);
                        acc_range = acc_range.mul(&base_range);
                        acc_err = self.commit_roundoff(propagated, &acc_range, p);
                    }
                    (acc_err, p)
                }
            }
            ExprKind::Let {
                binding,
                value,
                body,
            } => {
                let (e_value, p_value) = self.eval(value)?;
                let declared = self.settings.precision_of(binding);
                let stored = match declared.order(&p_value) {
                    // Downcast into a narrower binding costs one cast error,
                    // introduced here and never again at use sites.
                    Some(Ordering::Less) => {
                        let widened = self.range_of(value)?.add(&e_value.to_interval());
                        let cast = declared.abs_roundoff(&widened);
                        (e_value.add_bound(&cast), declared)
                    }
                    Some(_) => (e_value, declared),
                    None => {
                        return Err(AnalysisError::new(
                            AnalysisErrorKind::IncompatiblePrecisions(declared, p_value),
                        )
                        .with_span(expr.span))
                    }
                };
                let saved = self.env.insert(binding.clone(), stored);
                let result = self.eval(body);
                match saved {
                    Some(previous) => self.env.insert(binding.clone(), previous),
                    None => self.env.remove(binding),
                };
                result?
            }
        };
        self.out.insert(expr.id, error.clone());
        Ok((error, precision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::range::eval_range;
    use crate::rational::RoundDir;

    fn iv(a: i64, b: i64) -> Interval {
        Interval::new(Rational::integer(a), Rational::integer(b))
    }

    fn f64_settings<'a>(
        precisions: &'a HashMap<Ident, Precision>,
        track: bool,
    ) -> RoundoffSettings<'a> {
        RoundoffSettings {
            precisions,
            uniform: Precision::Float64,
            constants_precision: Precision::Float64,
            track_roundoff: track,
        }
    }

    fn analyze(
        expr: &Expr,
        inputs: &HashMap<Ident, Interval>,
        errors: &HashMap<Ident, Interval>,
        track: bool,
    ) -> (Rational, RoundoffEvaluation<Interval>) {
        let ranges = eval_range::<Interval>(expr, inputs).unwrap();
        let precisions = HashMap::new();
        let settings = f64_settings(&precisions, track);
        let map = ranges.interval_map();
        let ev = eval_roundoff::<Interval>(expr, &map, errors, &settings).unwrap();
        (ev.result.max_abs(), ev)
    }

    #[test]
    fn zero_inputs_and_no_roundoff_give_zero_everywhere() {
        let x = Ident::fresh("x");
        let e = Expr::mul(
            Expr::add(Expr::var(&x), Expr::real(Rational::one())),
            Expr::var(&x),
        );
        let inputs = HashMap::from([(x.clone(), iv(0, 2))]);
        let errors = HashMap::from([(x, Interval::zero())]);
        let (result, ev) = analyze(&e, &inputs, &errors, false);
        assert!(result.is_zero());
        for err in ev.intermediate.values() {
            assert_eq!(err, &Interval::zero());
        }
    }

    #[test]
    fn addition_accumulates_operand_errors() {
        let x = Ident::fresh("x");
        let y = Ident::fresh("y");
        let e = Expr::add(Expr::var(&x), Expr::var(&y));
        let inputs = HashMap::from([(x.clone(), iv(0, 1)), (y.clone(), iv(0, 1))]);
        let ex = Rational::pow2(-10);
        let errors = HashMap::from([
            (x, Interval::plus_minus(&ex)),
            (y, Interval::plus_minus(&ex)),
        ]);
        let (result, _) = analyze(&e, &inputs, &errors, false);
        assert_eq!(result, Rational::pow2(-9));
    }

    #[test]
    fn roundoff_alone_is_one_ulp_of_the_result_range() {
        let x = Ident::fresh("x");
        let e = Expr::add(Expr::var(&x), Expr::var(&x));
        let inputs = HashMap::from([(x.clone(), iv(0, 1))]);
        let errors = HashMap::from([(x, Interval::zero())]);
        let (result, _) = analyze(&e, &inputs, &errors, true);
        // Result range is [0, 2]; one addition at Float64.
        assert_eq!(result, Rational::pow2(-53) * Rational::integer(2));
    }

    #[test]
    fn multiplication_mixes_ranges_and_errors() {
        let x = Ident::fresh("x");
        let y = Ident::fresh("y");
        let e = Expr::mul(Expr::var(&x), Expr::var(&y));
        let inputs = HashMap::from([(x.clone(), iv(2, 2)), (y.clone(), iv(3, 3))]);
        let ex = Rational::pow2(-20);
        let errors = HashMap::from([
            (x, Interval::plus_minus(&ex)),
            (y, Interval::plus_minus(&ex)),
        ]);
        let (result, _) = analyze(&e, &inputs, &errors, false);
        // |2|*e + |3|*e + e*e = 5e + e^2
        let expected = Rational::integer(5) * ex.clone() + ex.clone() * ex;
        assert_eq!(result, expected);
    }

    #[test]
    fn division_fails_when_error_pushes_divisor_over_zero() {
        let x = Ident::fresh("x");
        let y = Ident::fresh("y");
        let e = Expr::div(Expr::var(&x), Expr::var(&y));
        let inputs = HashMap::from([(x.clone(), iv(1, 1)), (y.clone(), iv(1, 2))]);
        // The divisor range [1,2] is fine, but the error enclosure spills
        // past zero.
        let errors = HashMap::from([
            (x.clone(), Interval::zero()),
            (y.clone(), Interval::plus_minus(&Rational::integer(1))),
        ]);
        let ranges = eval_range::<Interval>(&e, &inputs).unwrap();
        let precisions = HashMap::new();
        let settings = f64_settings(&precisions, false);
        let err =
            eval_roundoff::<Interval>(&e, &ranges.interval_map(), &errors, &settings).unwrap_err();
        assert_eq!(err.kind, AnalysisErrorKind::DivisionByZero);
    }

    #[test]
    fn sqrt_scales_error_by_inverse_root() {
        let x = Ident::fresh("x");
        let e = Expr::sqrt(Expr::var(&x));
        let inputs = HashMap::from([(x.clone(), iv(4, 4))]);
        let ex = Rational::pow2(-20);
        let errors = HashMap::from([(x, Interval::plus_minus(&ex))]);
        let (result, _) = analyze(&e, &inputs, &errors, false);
        // Derivative near 1/4; allow the outward sqrt enclosure some slack.
        assert!(result >= ex.clone() * Rational::fraction(24, 100));
        assert!(result <= ex * Rational::fraction(27, 100));
    }

    #[test]
    fn inexact_literal_is_rounded_once() {
        let tenth = Rational::fraction(1, 10);
        let e = Expr::real(tenth.clone());
        let ranges = eval_range::<Interval>(&e, &HashMap::new()).unwrap();
        let precisions = HashMap::new();
        let settings = f64_settings(&precisions, true);
        let ev = eval_roundoff::<Interval>(&e, &ranges.interval_map(), &HashMap::new(), &settings)
            .unwrap();
        let expected = Precision::Float64.abs_roundoff(&Interval::point(tenth));
        assert_eq!(ev.result.max_abs(), expected);

        // An exactly representable literal costs nothing.
        let half = Expr::real(Rational::fraction(1, 2));
        let ranges = eval_range::<Interval>(&half, &HashMap::new()).unwrap();
        let ev =
            eval_roundoff::<Interval>(&half, &ranges.interval_map(), &HashMap::new(), &settings)
                .unwrap();
        assert!(ev.result.max_abs().is_zero());
    }

    #[test]
    fn affine_errors_cancel_where_interval_errors_cannot() {
        let x = Ident::fresh("x");
        // x - x with a nonzero input error: the affine domain knows both
        // operands carry the same error.
        let e = Expr::sub(Expr::var(&x), Expr::var(&x));
        let inputs = HashMap::from([(x.clone(), iv(0, 1))]);
        let ranges = eval_range::<Interval>(&e, &inputs).unwrap().interval_map();
        let precisions = HashMap::new();
        let settings = f64_settings(&precisions, false);

        let bound = Rational::pow2(-30);
        let iv_errors = HashMap::from([(x.clone(), Interval::plus_minus(&bound))]);
        let interval_err = eval_roundoff::<Interval>(&e, &ranges, &iv_errors, &settings)
            .unwrap()
            .result
            .max_abs();

        let af_errors = HashMap::from([(x, AffineForm::plus_minus(&bound))]);
        let affine_err = eval_roundoff::<AffineForm>(&e, &ranges, &af_errors, &settings)
            .unwrap()
            .result
            .max_abs();

        assert!(affine_err.is_zero());
        assert_eq!(interval_err, Rational::pow2(-29));
        assert!(affine_err <= interval_err);
    }

    #[test]
    fn let_cast_error_is_introduced_once_at_the_binding() {
        let x = Ident::fresh("x");
        let t = Ident::fresh("t");
        // let t = x + x in t + t, with t declared Float32 under a Float64
        // default: exactly one cast error at the binding.
        let e = Expr::let_in(
            t.clone(),
            Expr::add(Expr::var(&x), Expr::var(&x)),
            Expr::add(Expr::var(&t), Expr::var(&t)),
        );
        let inputs = HashMap::from([(x.clone(), iv(0, 1))]);
        let ranges = eval_range::<Interval>(&e, &inputs).unwrap().interval_map();
        let errors = HashMap::from([(x, Interval::zero())]);
        let precisions = HashMap::from([(t, Precision::Float32)]);
        let settings = RoundoffSettings {
            precisions: &precisions,
            uniform: Precision::Float64,
            constants_precision: Precision::Float64,
            track_roundoff: false,
        };
        let ev = eval_roundoff::<Interval>(&e, &ranges, &errors, &settings).unwrap();
        // With tracking off, the only error is the downcast of t's value
        // (range [0, 2]) to Float32, doubled by t + t.
        let cast = Precision::Float32.abs_roundoff(&iv(0, 2));
        assert_eq!(ev.result.max_abs(), cast.clone() + cast);
    }

    #[test]
    fn mixed_fixed_and_float_precisions_are_rejected() {
        let x = Ident::fresh("x");
        let y = Ident::fresh("y");
        let e = Expr::add(Expr::var(&x), Expr::var(&y));
        let inputs = HashMap::from([(x.clone(), iv(0, 1)), (y.clone(), iv(0, 1))]);
        let ranges = eval_range::<Interval>(&e, &inputs).unwrap().interval_map();
        let errors = HashMap::from([
            (x.clone(), Interval::zero()),
            (y.clone(), Interval::zero()),
        ]);
        let precisions = HashMap::from([(x, Precision::Fixed(16))]);
        let settings = RoundoffSettings {
            precisions: &precisions,
            uniform: Precision::Float64,
            constants_precision: Precision::Float64,
            track_roundoff: true,
        };
        let err = eval_roundoff::<Interval>(&e, &ranges, &errors, &settings).unwrap_err();
        assert!(matches!(
            err.kind,
            AnalysisErrorKind::IncompatiblePrecisions(_, _)
        ));
    }

    #[test]
    fn error_output_renders_in_scientific_notation() {
        let r = Rational::pow2(-53);
        let s = r.to_scientific(17, RoundDir::Ceil);
        assert!(s.starts_with("1.110223024625156"));
        assert!(s.ends_with("e-16"));
    }
}
