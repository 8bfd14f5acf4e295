//! Name resolution.
//!
//! The parser mints a placeholder [`Ident`] for every variable occurrence;
//! this pass replaces each one with the canonical identifier of its binding
//! (function parameter or enclosing `let`), respecting lexical scope and
//! shadowing. After resolution, occurrences of the same variable compare
//! equal by identifier uid.

use crate::ast::{Expr, ExprKind, FunctionDef, Ident, PreClause, Program, Span};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    #[error("unknown variable `{name}` in function `{function}`")]
    UnknownVariable {
        function: String,
        name: String,
        span: Option<Span>,
    },

    #[error("duplicate parameter `{name}` in function `{function}`")]
    DuplicateParameter { function: String, name: String },
}

struct Scopes {
    frames: Vec<HashMap<String, Ident>>,
}

impl Scopes {
    fn lookup(&self, name: &str) -> Option<&Ident> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    fn push(&mut self, id: &Ident) {
        let mut frame = HashMap::new();
        frame.insert(id.name().to_string(), id.clone());
        self.frames.push(frame);
    }

    fn pop(&mut self) {
        self.frames.pop();
    }
}

/// Resolve every function of a parsed program in place.
pub fn resolve_program(program: &mut Program) -> Result<(), ResolveError> {
    for function in &mut program.functions {
        resolve_function(function)?;
    }
    Ok(())
}

fn resolve_function(function: &mut FunctionDef) -> Result<(), ResolveError> {
    let mut params = HashMap::new();
    for p in &function.params {
        if params.insert(p.name().to_string(), p.clone()).is_some() {
            return Err(ResolveError::DuplicateParameter {
                function: function.name.clone(),
                name: p.name().to_string(),
            });
        }
    }
    let mut scopes = Scopes {
        frames: vec![params],
    };

    let name = function.name.clone();
    for clause in &mut function.requires {
        match clause {
            PreClause::LowerBound { var, .. }
            | PreClause::UpperBound { var, .. }
            | PreClause::InRange { var, .. }
            | PreClause::InputError { var, .. } => {
                *var = resolve_ident(var, &scopes, &name, None)?;
            }
            PreClause::Constraint(c) => {
                resolve_expr(&mut c.lhs, &mut scopes, &name)?;
                resolve_expr(&mut c.rhs, &mut scopes, &name)?;
            }
        }
    }
    resolve_expr(&mut function.body, &mut scopes, &name)
}

fn resolve_ident(
    id: &Ident,
    scopes: &Scopes,
    function: &str,
    span: Option<Span>,
) -> Result<Ident, ResolveError> {
    scopes
        .lookup(id.name())
        .cloned()
        .ok_or_else(|| ResolveError::UnknownVariable {
            function: function.to_string(),
            name: id.name().to_string(),
            span,
        })
}

fn resolve_expr(
    expr: &mut Expr,
    scopes: &mut Scopes,
    function: &str,
) -> Result<(), ResolveError> {
    match &mut expr.kind {
        ExprKind::Real(_) => Ok(()),
        ExprKind::Var(id) => {
            *id = resolve_ident(id, scopes, function, expr.span)?;
            Ok(())
        }
        ExprKind::Neg(e) | ExprKind::Sqrt(e) | ExprKind::Pow(e, _) => {
            resolve_expr(e, scopes, function)
        }
        ExprKind::Add(l, r) | ExprKind::Sub(l, r) | ExprKind::Mul(l, r) | ExprKind::Div(l, r) => {
            resolve_expr(l, scopes, function)?;
            resolve_expr(r, scopes, function)
        }
        ExprKind::Let {
            binding,
            value,
            body,
        } => {
            // The bound value is resolved in the outer scope; the binding is
            // visible only in the body.
            resolve_expr(value, scopes, function)?;
            scopes.push(binding);
            let result = resolve_expr(body, scopes, function);
            scopes.pop();
            result
        }
    }
}

/// Parse and resolve a source file in one step.
pub fn parse_kernels(source: &str) -> Result<Program, KernelLoadError> {
    let mut program = crate::parser::parse_program(source)?;
    resolve_program(&mut program)?;
    Ok(program)
}

/// Combined front-end failure.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KernelLoadError {
    #[error(transparent)]
    Parse(#[from] crate::parser::ParseError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}
