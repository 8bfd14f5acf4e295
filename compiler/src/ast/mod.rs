//! Abstract syntax tree for NumLang kernels.
//!
//! Expression nodes carry a stable [`NodeId`] minted at construction; the
//! evaluators key their intermediate-result maps by this identity, so two
//! structurally equal sub-expressions at different positions stay distinct.

use crate::rational::Rational;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Source location for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub length: usize,
}

impl Span {
    pub fn new(line: usize, column: usize, length: usize) -> Self {
        Self {
            line,
            column,
            length,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

static NEXT_NODE_ID: AtomicU32 = AtomicU32::new(0);
static NEXT_IDENT_UID: AtomicU64 = AtomicU64::new(0);

/// Stable identity of one expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    fn fresh() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An identifier with a globally unique id and a name hint.
///
/// Equality and hashing use only the id, so two bindings that share a name
/// stay distinct. The `delta`/`epsilon` markers tag identifiers minted by
/// downstream phases for error and noise variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ident {
    uid: u64,
    name: String,
    delta: bool,
    epsilon: bool,
}

impl Ident {
    pub fn fresh(name: impl Into<String>) -> Self {
        Ident {
            uid: NEXT_IDENT_UID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            delta: false,
            epsilon: false,
        }
    }

    pub fn fresh_delta(name: impl Into<String>) -> Self {
        Ident {
            delta: true,
            ..Ident::fresh(name)
        }
    }

    pub fn fresh_epsilon(name: impl Into<String>) -> Self {
        Ident {
            epsilon: true,
            ..Ident::fresh(name)
        }
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_delta(&self) -> bool {
        self.delta
    }

    pub fn is_epsilon(&self) -> bool {
        self.epsilon
    }
}

impl PartialEq for Ident {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for Ident {}

impl Hash for Ident {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One expression node with its identity and optional source span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub id: NodeId,
    pub span: Option<Span>,
    pub kind: ExprKind,
}

/// The real-arithmetic expression language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Real(Rational),
    Var(Ident),
    Neg(Box<Expr>),
    Sqrt(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    /// Non-negative integer power.
    Pow(Box<Expr>, u32),
    Let {
        binding: Ident,
        value: Box<Expr>,
        body: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr {
            id: NodeId::fresh(),
            span: None,
            kind,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn real(r: Rational) -> Self {
        Expr::new(ExprKind::Real(r))
    }

    pub fn var(id: &Ident) -> Self {
        Expr::new(ExprKind::Var(id.clone()))
    }

    pub fn neg(e: Expr) -> Self {
        Expr::new(ExprKind::Neg(Box::new(e)))
    }

    pub fn sqrt(e: Expr) -> Self {
        Expr::new(ExprKind::Sqrt(Box::new(e)))
    }

    pub fn add(l: Expr, r: Expr) -> Self {
        Expr::new(ExprKind::Add(Box::new(l), Box::new(r)))
    }

    pub fn sub(l: Expr, r: Expr) -> Self {
        Expr::new(ExprKind::Sub(Box::new(l), Box::new(r)))
    }

    pub fn mul(l: Expr, r: Expr) -> Self {
        Expr::new(ExprKind::Mul(Box::new(l), Box::new(r)))
    }

    pub fn div(l: Expr, r: Expr) -> Self {
        Expr::new(ExprKind::Div(Box::new(l), Box::new(r)))
    }

    pub fn pow(base: Expr, n: u32) -> Self {
        Expr::new(ExprKind::Pow(Box::new(base), n))
    }

    pub fn let_in(binding: Ident, value: Expr, body: Expr) -> Self {
        Expr::new(ExprKind::Let {
            binding,
            value: Box::new(value),
            body: Box::new(body),
        })
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        match &self.kind {
            ExprKind::Real(_) | ExprKind::Var(_) => 1,
            ExprKind::Neg(e) | ExprKind::Sqrt(e) | ExprKind::Pow(e, _) => 1 + e.size(),
            ExprKind::Add(l, r)
            | ExprKind::Sub(l, r)
            | ExprKind::Mul(l, r)
            | ExprKind::Div(l, r) => 1 + l.size() + r.size(),
            ExprKind::Let { value, body, .. } => 1 + value.size() + body.size(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Real(r) => write!(f, "{r}"),
            ExprKind::Var(id) => write!(f, "{id}"),
            ExprKind::Neg(e) => write!(f, "(-{e})"),
            ExprKind::Sqrt(e) => write!(f, "sqrt({e})"),
            ExprKind::Add(l, r) => write!(f, "({l} + {r})"),
            ExprKind::Sub(l, r) => write!(f, "({l} - {r})"),
            ExprKind::Mul(l, r) => write!(f, "({l} * {r})"),
            ExprKind::Div(l, r) => write!(f, "({l} / {r})"),
            ExprKind::Pow(e, n) => write!(f, "({e} ^ {n})"),
            ExprKind::Let {
                binding,
                value,
                body,
            } => write!(f, "(let {binding} = {value} in {body})"),
        }
    }
}

/// Comparison operator in precondition constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Le,
    Lt,
    Ge,
    Gt,
    Eq,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Le => "<=",
            CmpOp::Lt => "<",
            CmpOp::Ge => ">=",
            CmpOp::Gt => ">",
            CmpOp::Eq => "==",
        };
        write!(f, "{s}")
    }
}

/// A polynomial side condition, passed verbatim to the SMT backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub lhs: Expr,
    pub op: CmpOp,
    pub rhs: Expr,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

/// One conjunct of a function precondition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PreClause {
    /// `lo <= x`
    LowerBound { var: Ident, lo: Rational },
    /// `x <= hi`
    UpperBound { var: Ident, hi: Rational },
    /// `x in [lo, hi]`
    InRange {
        var: Ident,
        lo: Rational,
        hi: Rational,
    },
    /// `x +/- err`: initial error on an input.
    InputError { var: Ident, err: Rational },
    /// Additional polynomial constraint for the SMT range.
    Constraint(Constraint),
}

/// A kernel function: parameters, precondition, body, optional tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Ident>,
    pub requires: Vec<PreClause>,
    pub body: Expr,
    /// `ensure res +/- eps`, used only by the regression harness.
    pub ensures: Option<Rational>,
    pub span: Option<Span>,
}

/// A parsed source file: a collection of kernel functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<FunctionDef>,
}
