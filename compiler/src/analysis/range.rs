//! Compositional range evaluation.
//!
//! [`eval_range`] walks an expression bottom-up (left operand before right)
//! and records an abstract value for every node, keyed by node identity.
//! The arithmetic is supplied by the [`RangeDomain`] capability trait, so the
//! same skeleton serves interval, affine and SMT-constrained ranges through
//! monomorphized instantiations rather than per-node virtual dispatch.

use super::{AnalysisError, AnalysisErrorKind};
use crate::affine::AffineForm;
use crate::ast::{Expr, ExprKind, Ident, NodeId};
use crate::interval::{DomainError, Interval};
use crate::rational::Rational;
use crate::smtrange::SmtRange;
use std::collections::HashMap;

/// The operations a range domain must supply.
pub trait RangeDomain: Clone {
    fn from_rational(r: &Rational) -> Self;
    fn from_interval(iv: &Interval) -> Self;
    fn to_interval(&self) -> Interval;
    fn add(&self, rhs: &Self) -> Self;
    fn sub(&self, rhs: &Self) -> Self;
    fn neg(&self) -> Self;
    fn mul(&self, rhs: &Self) -> Self;
    fn div(&self, rhs: &Self) -> Result<Self, DomainError>;
    fn sqrt(&self) -> Result<Self, DomainError>;
    fn pow(&self, n: u32) -> Self;
}

impl RangeDomain for Interval {
    fn from_rational(r: &Rational) -> Self {
        Interval::point(r.clone())
    }

    fn from_interval(iv: &Interval) -> Self {
        iv.clone()
    }

    fn to_interval(&self) -> Interval {
        self.clone()
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

    fn div(&self, rhs: &Self) -> Result<Self, DomainError> {
        self.checked_div(rhs)
    }

    fn sqrt(&self) -> Result<Self, DomainError> {
        Interval::sqrt(self)
    }

    fn pow(&self, n: u32) -> Self {
        self.pow_i(n)
    }
}

impl RangeDomain for AffineForm {
    fn from_rational(r: &Rational) -> Self {
        AffineForm::constant(r.clone())
    }

    fn from_interval(iv: &Interval) -> Self {
        AffineForm::from_interval(iv)
    }

    fn to_interval(&self) -> Interval {
        AffineForm::to_interval(self)
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

    fn div(&self, rhs: &Self) -> Result<Self, DomainError> {
        self.checked_div(rhs)
    }

    fn sqrt(&self) -> Result<Self, DomainError> {
        AffineForm::sqrt(self)
    }

    fn pow(&self, n: u32) -> Self {
        self.pow_i(n)
    }
}

impl RangeDomain for SmtRange {
    fn from_rational(r: &Rational) -> Self {
        SmtRange::unconstrained(Interval::point(r.clone()))
    }

    fn from_interval(iv: &Interval) -> Self {
        SmtRange::unconstrained(iv.clone())
    }

    fn to_interval(&self) -> Interval {
        SmtRange::to_interval(self)
    }

    fn add(&self, rhs: &Self) -> Self {
        SmtRange::add(self, rhs)
    }

    fn sub(&self, rhs: &Self) -> Self {
        SmtRange::sub(self, rhs)
    }

    fn neg(&self) -> Self {
        SmtRange::neg(self)
    }

    fn mul(&self, rhs: &Self) -> Self {
        SmtRange::mul(self, rhs)
    }

    fn div(&self, rhs: &Self) -> Result<Self, DomainError> {
        self.checked_div(rhs)
    }

    fn sqrt(&self) -> Result<Self, DomainError> {
        SmtRange::sqrt(self)
    }

    fn pow(&self, n: u32) -> Self {
        self.pow_i(n)
    }
}

/// Result range plus the per-node map.
#[derive(Debug, Clone)]
pub struct RangeEvaluation<T> {
    pub result: T,
    pub intermediate: HashMap<NodeId, T>,
}

impl<T: RangeDomain> RangeEvaluation<T> {
    /// Collapse the per-node map to plain intervals.
    pub fn interval_map(&self) -> HashMap<NodeId, Interval> {
        self.intermediate
            .iter()
            .map(|(id, v)| (*id, v.to_interval()))
            .collect()
    }
}

/// Evaluate ranges for every node of `expr` under the given input map.
pub fn eval_range<T: RangeDomain>(
    expr: &Expr,
    inputs: &HashMap<Ident, T>,
) -> Result<RangeEvaluation<T>, AnalysisError> {
    let mut env = inputs.clone();
    let mut intermediate = HashMap::new();
    let result = eval(expr, &mut env, &mut intermediate)?;
    Ok(RangeEvaluation {
        result,
        intermediate,
    })
}

fn eval<T: RangeDomain>(
    expr: &Expr,
    env: &mut HashMap<Ident, T>,
    out: &mut HashMap<NodeId, T>,
) -> Result<T, AnalysisError> {
    let value = match &expr.kind {
        ExprKind::Real(r) => T::from_rational(r),
        ExprKind::Var(id) => env.get(id).cloned().ok_or_else(|| {
            AnalysisError::new(AnalysisErrorKind::UnboundVariable(id.clone()))
                .with_span(expr.span)
        })?,
        ExprKind::Neg(e) => eval(e, env, out)?.neg(),
        ExprKind::Sqrt(e) => eval(e, env, out)?
            .sqrt()
            .map_err(|d| AnalysisError::domain(d, expr.span))?,
        ExprKind::Add(l, r) => {
            let lv = eval(l, env, out)?;
            let rv = eval(r, env, out)?;
            lv.add(&rv)
        }
        ExprKind::Sub(l, r) => {
            let lv = eval(l, env, out)?;
            let rv = eval(r, env, out)?;
            lv.sub(&rv)
        }
        ExprKind::Mul(l, r) => {
            let lv = eval(l, env, out)?;
            let rv = eval(r, env, out)?;
            lv.mul(&rv)
        }
        ExprKind::Div(l, r) => {
            let lv = eval(l, env, out)?;
            let rv = eval(r, env, out)?;
            lv.div(&rv)
                .map_err(|d| AnalysisError::domain(d, expr.span))?
        }
        ExprKind::Pow(base, n) => eval(base, env, out)?.pow(*n),
        ExprKind::Let {
            binding,
            value,
            body,
        } => {
            // The binding is lexically scoped: visible in the body only, and
            // restored afterwards so a sibling cannot observe it.
            let bound = eval(value, env, out)?;
            let saved = env.insert(binding.clone(), bound);
            let result = eval(body, env, out);
            match saved {
                Some(previous) => env.insert(binding.clone(), previous),
                None => env.remove(binding),
            };
            result?
        }
    };
    out.insert(expr.id, value.clone());
    Ok(value)
}
