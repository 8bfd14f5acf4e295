//! SMT-constrained ranges.
//!
//! An [`SmtRange`] pairs a sound interval with the precondition's additional
//! polynomial constraints. Arithmetic on the pair is plain interval
//! arithmetic; the constraints earn their keep when an *input* range is
//! tightened by solver queries before evaluation starts.
//!
//! The solver lives behind the `smt-verification` cargo feature. Without it,
//! every query answers `Unknown` and tightening degrades to the unrefined
//! interval; with it, Z3 proves bounds unreachable and the range shrinks by
//! dyadic bisection. A solver timeout also degrades with a warning rather
//! than failing the analysis.

use crate::ast::{CmpOp, Constraint, Ident};
use crate::interval::{DomainError, Interval};
use crate::rational::Rational;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of one satisfiability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtResult {
    Sat,
    Unsat,
    Unknown,
}

/// The constraint context shared by every range of one function.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConstraintEnv {
    /// Side constraints from the precondition, passed verbatim.
    pub constraints: Vec<Constraint>,
    /// Box ranges of all inputs, needed to pose closed queries.
    pub var_ranges: HashMap<Ident, Interval>,
}

/// Per-query budget for input tightening.
#[derive(Debug, Clone, Copy)]
pub struct RefineBudget {
    /// Bisection steps per bound.
    pub steps: u32,
    /// Solver timeout per query, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for RefineBudget {
    fn default() -> Self {
        RefineBudget {
            steps: 8,
            timeout_ms: 1000,
        }
    }
}

/// An interval constrained by the precondition.
#[derive(Debug, Clone, PartialEq)]
pub struct SmtRange {
    pub interval: Interval,
    env: Arc<ConstraintEnv>,
}

impl SmtRange {
    /// A range with no attached constraints.
    pub fn unconstrained(interval: Interval) -> Self {
        SmtRange {
            interval,
            env: Arc::new(ConstraintEnv::default()),
        }
    }

    /// An input range refined against `env`. Returns the range plus a flag
    /// that is set when the solver could not help (feature off, timeout).
    pub fn refined_input(
        var: &Ident,
        interval: &Interval,
        env: &Arc<ConstraintEnv>,
        budget: RefineBudget,
    ) -> (Self, bool) {
        if env.constraints.is_empty() {
            return (
                SmtRange {
                    interval: interval.clone(),
                    env: env.clone(),
                },
                false,
            );
        }
        let (lo, degraded_lo) = tighten_bound(var, interval, env, budget, Bound::Lower);
        let (hi, degraded_hi) = tighten_bound(var, interval, env, budget, Bound::Upper);
        let refined = if lo <= hi {
            Interval { lo, hi }
        } else {
            interval.clone()
        };
        (
            SmtRange {
                interval: refined,
                env: env.clone(),
            },
            degraded_lo || degraded_hi,
        )
    }

    pub fn to_interval(&self) -> Interval {
        self.interval.clone()
    }

    fn env_of(&self, rhs: &SmtRange) -> Arc<ConstraintEnv> {
        if self.env.constraints.is_empty() {
            rhs.env.clone()
        } else {
            self.env.clone()
        }
    }

    fn lift(&self, interval: Interval, rhs: &SmtRange) -> SmtRange {
        SmtRange {
            interval,
            env: self.env_of(rhs),
        }
    }

    pub fn add(&self, rhs: &SmtRange) -> SmtRange {
        self.lift(self.interval.add(&rhs.interval), rhs)
    }

    pub fn sub(&self, rhs: &SmtRange) -> SmtRange {
        self.lift(self.interval.sub(&rhs.interval), rhs)
    }

    pub fn neg(&self) -> SmtRange {
        SmtRange {
            interval: self.interval.neg(),
            env: self.env.clone(),
        }
    }

    pub fn mul(&self, rhs: &SmtRange) -> SmtRange {
        self.lift(self.interval.mul(&rhs.interval), rhs)
    }

    pub fn checked_div(&self, rhs: &SmtRange) -> Result<SmtRange, DomainError> {
        Ok(self.lift(self.interval.checked_div(&rhs.interval)?, rhs))
    }

    pub fn sqrt(&self) -> Result<SmtRange, DomainError> {
        Ok(SmtRange {
            interval: self.interval.sqrt()?,
            env: self.env.clone(),
        })
    }

    pub fn pow_i(&self, n: u32) -> SmtRange {
        SmtRange {
            interval: self.interval.pow_i(n),
            env: self.env.clone(),
        }
    }
}

enum Bound {
    Lower,
    Upper,
}

/// Raise the lower bound (or lower the upper bound) by bisection, accepting a
/// new bound only when the solver proves the cut-off region unreachable.
fn tighten_bound(
    var: &Ident,
    interval: &Interval,
    env: &ConstraintEnv,
    budget: RefineBudget,
    which: Bound,
) -> (Rational, bool) {
    let (mut keep, mut probe) = match which {
        Bound::Lower => (interval.lo.clone(), interval.hi.clone()),
        Bound::Upper => (interval.hi.clone(), interval.lo.clone()),
    };
    for _ in 0..budget.steps {
        let mid = (&keep + &probe).half();
        let query = match which {
            Bound::Lower => (var, CmpOp::Lt, mid.clone()),
            Bound::Upper => (var, CmpOp::Gt, mid.clone()),
        };
        match solver::check_var_bound(env, query.0, query.1, &query.2, budget.timeout_ms) {
            SmtResult::Unsat => keep = mid,
            SmtResult::Sat => probe = mid,
            SmtResult::Unknown => return (keep, true),
        }
    }
    (keep, false)
}

// ====================================================================================
// Implementation WITH Z3 support (when the smt-verification feature is enabled)
// ====================================================================================

#[cfg(feature = "smt-verification")]
mod solver {
    use super::*;
    use crate::ast::{Expr, ExprKind};
    use z3::ast::{Ast, Bool, Real};
    use z3::{Config, Context, SatResult, Solver};

    /// Is `var <op> bound` satisfiable under the environment?
    pub fn check_var_bound(
        env: &ConstraintEnv,
        var: &Ident,
        op: CmpOp,
        bound: &Rational,
        timeout_ms: u64,
    ) -> SmtResult {
        let mut cfg = Config::new();
        cfg.set_param_value("timeout", &timeout_ms.to_string());
        let ctx = Context::new(&cfg);
        let solver = Solver::new(&ctx);

        let mut vars: HashMap<u64, Real> = HashMap::new();
        for (id, range) in &env.var_ranges {
            let v = Real::new_const(&ctx, id.name());
            solver.assert(&v.ge(&real_const(&ctx, &range.lo)));
            solver.assert(&v.le(&real_const(&ctx, &range.hi)));
            vars.insert(id.uid(), v);
        }
        for c in &env.constraints {
            match translate_constraint(&ctx, c, &mut vars, &solver) {
                Some(b) => solver.assert(&b),
                None => return SmtResult::Unknown,
            }
        }
        let subject = match vars.get(&var.uid()) {
            Some(v) => v.clone(),
            None => return SmtResult::Unknown,
        };
        let probe = real_const(&ctx, bound);
        let goal = match op {
            CmpOp::Lt => subject.lt(&probe),
            CmpOp::Le => subject.le(&probe),
            CmpOp::Gt => subject.gt(&probe),
            CmpOp::Ge => subject.ge(&probe),
            CmpOp::Eq => subject._eq(&probe),
        };
        solver.assert(&goal);
        match solver.check() {
            SatResult::Sat => SmtResult::Sat,
            SatResult::Unsat => SmtResult::Unsat,
            SatResult::Unknown => {
                tracing::warn!(variable = %var, "SMT query timed out; keeping interval bound");
                SmtResult::Unknown
            }
        }
    }

    fn real_const<'c>(ctx: &'c Context, r: &Rational) -> Real<'c> {
        let (numer, denom) = r.to_fraction_strings();
        Real::from_real_str(ctx, &numer, &denom)
            .unwrap_or_else(|| Real::from_real(ctx, 0, 1))
    }

    fn translate_constraint<'c>(
        ctx: &'c Context,
        c: &Constraint,
        vars: &mut HashMap<u64, Real<'c>>,
        solver: &Solver<'c>,
    ) -> Option<Bool<'c>> {
        let lhs = translate_expr(ctx, &c.lhs, vars, solver)?;
        let rhs = translate_expr(ctx, &c.rhs, vars, solver)?;
        Some(match c.op {
            CmpOp::Le => lhs.le(&rhs),
            CmpOp::Lt => lhs.lt(&rhs),
            CmpOp::Ge => lhs.ge(&rhs),
            CmpOp::Gt => lhs.gt(&rhs),
            CmpOp::Eq => lhs._eq(&rhs),
        })
    }

    fn translate_expr<'c>(
        ctx: &'c Context,
        expr: &Expr,
        vars: &mut HashMap<u64, Real<'c>>,
        solver: &Solver<'c>,
    ) -> Option<Real<'c>> {
        match &expr.kind {
            ExprKind::Real(r) => Some(real_const(ctx, r)),
            ExprKind::Var(id) => vars.get(&id.uid()).cloned(),
            ExprKind::Neg(e) => Some(translate_expr(ctx, e, vars, solver)?.unary_minus()),
            ExprKind::Add(l, r) => {
                let (l, r) = (
                    translate_expr(ctx, l, vars, solver)?,
                    translate_expr(ctx, r, vars, solver)?,
                );
                Some(Real::add(ctx, &[&l, &r]))
            }
            ExprKind::Sub(l, r) => {
                let (l, r) = (
                    translate_expr(ctx, l, vars, solver)?,
                    translate_expr(ctx, r, vars, solver)?,
                );
                Some(Real::sub(ctx, &[&l, &r]))
            }
            ExprKind::Mul(l, r) => {
                let (l, r) = (
                    translate_expr(ctx, l, vars, solver)?,
                    translate_expr(ctx, r, vars, solver)?,
                );
                Some(Real::mul(ctx, &[&l, &r]))
            }
            ExprKind::Div(l, r) => {
                let (l, r) = (
                    translate_expr(ctx, l, vars, solver)?,
                    translate_expr(ctx, r, vars, solver)?,
                );
                Some(l.div(&r))
            }
            ExprKind::Pow(base, n) => {
                let base = translate_expr(ctx, base, vars, solver)?;
                let mut acc = Real::from_real(ctx, 1, 1);
                for _ in 0..*n {
                    acc = Real::mul(ctx, &[&acc, &base]);
                }
                Some(acc)
            }
            ExprKind::Sqrt(e) => {
                // Encode s = sqrt(e) as s >= 0 and s*s = e.
                let arg = translate_expr(ctx, e, vars, solver)?;
                let s = Real::fresh_const(ctx, "sqrt");
                solver.assert(&s.ge(&Real::from_real(ctx, 0, 1)));
                solver.assert(&Real::mul(ctx, &[&s, &s])._eq(&arg));
                Some(s)
            }
            // Lets do not occur in precondition constraints.
            ExprKind::Let { .. } => None,
        }
    }
}

// ====================================================================================
// Fallback without Z3: every query is Unknown, ranges stay as-is
// ====================================================================================

#[cfg(not(feature = "smt-verification"))]
mod solver {
    use super::*;

    pub fn check_var_bound(
        _env: &ConstraintEnv,
        var: &Ident,
        _op: CmpOp,
        _bound: &Rational,
        _timeout_ms: u64,
    ) -> SmtResult {
        tracing::debug!(
            variable = %var,
            "smt-verification feature disabled; range refinement unavailable"
        );
        SmtResult::Unknown
    }
}
