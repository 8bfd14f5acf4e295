//! Parser for NumLang kernel files.
//!
//! Builds the AST from the token stream with nom combinators over a token
//! slice. Grammar:
//!
//! ```text
//! program  := function+
//! function := "fn" name "(" params ")" "{" precond? binding* expr "}" postcond?
//! precond  := "require" clause ("&&" clause)*
//! clause   := x "in" "[" num "," num "]" | x "+/-" num | expr cmp expr
//! binding  := "let" x "=" expr
//! postcond := "ensure" "res" "+/-" num
//! ```
//!
//! Expressions use the usual precedence (`+ -` < `* /` < unary `-` < `^`),
//! with `sqrt(e)` as a builtin and `^` taking a non-negative integer literal.
//!
//! Variable occurrences are parsed as placeholder [`Ident`]s; the resolver
//! links them to their binding occurrence afterwards.

use crate::ast::{
    CmpOp, Constraint, Expr, ExprKind, FunctionDef, Ident, PreClause, Program, Span,
};
use crate::lexer::{tokenize, LexError, Token};
use crate::rational::Rational;
use nom::error::{Error, ErrorKind};
use nom::{Err, IResult};
use thiserror::Error as ThisError;

/// Parser input is a slice of tokens.
pub type TokenSlice<'a> = &'a [(Token, Span)];

type PResult<'a, T> = IResult<TokenSlice<'a>, T>;

/// Parse failure with source position.
#[derive(Debug, ThisError, Clone, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("syntax error: {message}")]
    Eof { message: String },
}

impl ParseError {
    fn at(input: TokenSlice, message: impl Into<String>) -> Self {
        match input.first() {
            Some((_, span)) => ParseError::Syntax {
                message: message.into(),
                line: span.line,
                column: span.column,
            },
            None => ParseError::Eof {
                message: message.into(),
            },
        }
    }
}

fn fail<T>(input: TokenSlice) -> PResult<T> {
    Err(Err::Error(Error::new(input, ErrorKind::Tag)))
}

/// Match one exact token.
fn token(expected: Token) -> impl Fn(TokenSlice) -> PResult<Span> {
    move |input| match input.split_first() {
        Some(((tok, span), rest)) if *tok == expected => Ok((rest, *span)),
        _ => fail(input),
    }
}

/// Match any identifier token.
fn identifier(input: TokenSlice) -> PResult<(String, Span)> {
    match input.split_first() {
        Some(((Token::Ident(name), span), rest)) => Ok((rest, (name.clone(), *span))),
        _ => fail(input),
    }
}

/// Match a number token and convert it to an exact rational.
fn number(input: TokenSlice) -> PResult<(Rational, Span)> {
    match input.split_first() {
        Some(((Token::Number(text), span), rest)) => match Rational::from_decimal_str(text) {
            Some(r) => Ok((rest, (r, *span))),
            None => fail(input),
        },
        _ => fail(input),
    }
}

/// A number with an optional leading minus (for bounds like `[-100, 100]`).
fn signed_number(input: TokenSlice) -> PResult<Rational> {
    if let Ok((rest, _)) = token(Token::Minus)(input) {
        let (rest, (r, _)) = number(rest)?;
        return Ok((rest, -r));
    }
    let (rest, (r, _)) = number(input)?;
    Ok((rest, r))
}

/// A non-negative integer literal (power exponent).
fn integer(input: TokenSlice) -> PResult<u32> {
    match input.split_first() {
        Some(((Token::Number(text), _), rest)) => match text.parse::<u32>() {
            Ok(n) => Ok((rest, n)),
            Err(_) => fail(input),
        },
        _ => fail(input),
    }
}

// ============================================================================
// Expressions
// ============================================================================

pub fn expression(input: TokenSlice) -> PResult<Expr> {
    additive(input)
}

fn additive(input: TokenSlice) -> PResult<Expr> {
    let (mut input, mut acc) = multiplicative(input)?;
    loop {
        if let Ok((rest, span)) = token(Token::Plus)(input) {
            let (rest, rhs) = multiplicative(rest)?;
            acc = Expr::add(acc, rhs).with_span(span);
            input = rest;
        } else if let Ok((rest, span)) = token(Token::Minus)(input) {
            let (rest, rhs) = multiplicative(rest)?;
            acc = Expr::sub(acc, rhs).with_span(span);
            input = rest;
        } else {
            return Ok((input, acc));
        }
    }
}

fn multiplicative(input: TokenSlice) -> PResult<Expr> {
    let (mut input, mut acc) = unary(input)?;
    loop {
        if let Ok((rest, span)) = token(Token::Star)(input) {
            let (rest, rhs) = unary(rest)?;
            acc = Expr::mul(acc, rhs).with_span(span);
            input = rest;
        } else if let Ok((rest, span)) = token(Token::Slash)(input) {
            let (rest, rhs) = unary(rest)?;
            acc = Expr::div(acc, rhs).with_span(span);
            input = rest;
        } else {
            return Ok((input, acc));
        }
    }
}

fn unary(input: TokenSlice) -> PResult<Expr> {
    if let Ok((rest, span)) = token(Token::Minus)(input) {
        let (rest, inner) = unary(rest)?;
        return Ok((rest, Expr::neg(inner).with_span(span)));
    }
    power(input)
}

fn power(input: TokenSlice) -> PResult<Expr> {
    let (input, base) = atom(input)?;
    if let Ok((rest, span)) = token(Token::Caret)(input) {
        let (rest, n) = integer(rest)?;
        return Ok((rest, Expr::pow(base, n).with_span(span)));
    }
    Ok((input, base))
}

fn atom(input: TokenSlice) -> PResult<Expr> {
    if let Ok((rest, (r, span))) = number(input) {
        return Ok((rest, Expr::real(r).with_span(span)));
    }
    if let Ok((rest, span)) = token(Token::Sqrt)(input) {
        let (rest, _) = token(Token::LParen)(rest)?;
        let (rest, inner) = expression(rest)?;
        let (rest, _) = token(Token::RParen)(rest)?;
        return Ok((rest, Expr::sqrt(inner).with_span(span)));
    }
    if let Ok((rest, _)) = token(Token::LParen)(input) {
        let (rest, inner) = expression(rest)?;
        let (rest, _) = token(Token::RParen)(rest)?;
        return Ok((rest, inner));
    }
    let (rest, (name, span)) = identifier(input)?;
    Ok((rest, Expr::var(&Ident::fresh(name)).with_span(span)))
}

// ============================================================================
// Preconditions and postconditions
// ============================================================================

fn clause(input: TokenSlice) -> PResult<PreClause> {
    if let Ok((rest, c)) = range_clause(input) {
        return Ok((rest, c));
    }
    if let Ok((rest, c)) = error_clause(input) {
        return Ok((rest, c));
    }
    comparison_clause(input)
}

/// `x in [lo, hi]`
fn range_clause(input: TokenSlice) -> PResult<PreClause> {
    let (rest, (name, _)) = identifier(input)?;
    let (rest, _) = token(Token::In)(rest)?;
    let (rest, _) = token(Token::LBracket)(rest)?;
    let (rest, lo) = signed_number(rest)?;
    let (rest, _) = token(Token::Comma)(rest)?;
    let (rest, hi) = signed_number(rest)?;
    let (rest, _) = token(Token::RBracket)(rest)?;
    Ok((
        rest,
        PreClause::InRange {
            var: Ident::fresh(name),
            lo,
            hi,
        },
    ))
}

/// `x +/- err`
fn error_clause(input: TokenSlice) -> PResult<PreClause> {
    let (rest, (name, _)) = identifier(input)?;
    let (rest, _) = token(Token::PlusMinus)(rest)?;
    let (rest, err) = signed_number(rest)?;
    Ok((
        rest,
        PreClause::InputError {
            var: Ident::fresh(name),
            err: err.abs(),
        },
    ))
}

/// `expr cmp expr`, classified into a half-bound where one side is a literal
/// and the other a variable; anything else becomes an SMT side constraint.
fn comparison_clause(input: TokenSlice) -> PResult<PreClause> {
    let (rest, lhs) = expression(input)?;
    let (rest, op) = comparison_op(rest)?;
    let (rest, rhs) = expression(rest)?;
    let clause = match (&lhs.kind, op, &rhs.kind) {
        (ExprKind::Real(lo), CmpOp::Le | CmpOp::Lt, ExprKind::Var(var)) => {
            PreClause::LowerBound {
                var: var.clone(),
                lo: lo.clone(),
            }
        }
        (ExprKind::Var(var), CmpOp::Le | CmpOp::Lt, ExprKind::Real(hi)) => {
            PreClause::UpperBound {
                var: var.clone(),
                hi: hi.clone(),
            }
        }
        (ExprKind::Real(hi), CmpOp::Ge | CmpOp::Gt, ExprKind::Var(var)) => {
            PreClause::UpperBound {
                var: var.clone(),
                hi: hi.clone(),
            }
        }
        (ExprKind::Var(var), CmpOp::Ge | CmpOp::Gt, ExprKind::Real(lo)) => {
            PreClause::LowerBound {
                var: var.clone(),
                lo: lo.clone(),
            }
        }
        _ => PreClause::Constraint(Constraint { lhs, op, rhs }),
    };
    Ok((rest, clause))
}

fn comparison_op(input: TokenSlice) -> PResult<CmpOp> {
    for (tok, op) in [
        (Token::Le, CmpOp::Le),
        (Token::Lt, CmpOp::Lt),
        (Token::Ge, CmpOp::Ge),
        (Token::Gt, CmpOp::Gt),
        (Token::EqEq, CmpOp::Eq),
    ] {
        if let Ok((rest, _)) = token(tok)(input) {
            return Ok((rest, op));
        }
    }
    fail(input)
}

fn precondition(input: TokenSlice) -> PResult<Vec<PreClause>> {
    let (mut input, _) = token(Token::Require)(input)?;
    let mut clauses = Vec::new();
    let (rest, first) = clause(input)?;
    clauses.push(first);
    input = rest;
    while let Ok((rest, _)) = token(Token::AndAnd)(input) {
        let (rest, next) = clause(rest)?;
        clauses.push(next);
        input = rest;
    }
    Ok((input, clauses))
}

/// `ensure res +/- eps`
fn postcondition(input: TokenSlice) -> PResult<Rational> {
    let (rest, _) = token(Token::Ensure)(input)?;
    let (rest, _) = token(Token::Res)(rest)?;
    let (rest, _) = token(Token::PlusMinus)(rest)?;
    let (rest, eps) = signed_number(rest)?;
    Ok((rest, eps.abs()))
}

// ============================================================================
// Functions and programs
// ============================================================================

fn function(input: TokenSlice) -> PResult<FunctionDef> {
    let (rest, fn_span) = token(Token::Fn)(input)?;
    let (rest, (name, _)) = identifier(rest)?;
    let (rest, _) = token(Token::LParen)(rest)?;
    let (mut rest, params) = params(rest)?;

    let (r, _) = token(Token::LBrace)(rest)?;
    rest = r;
    let requires = match precondition(rest) {
        Ok((r, clauses)) => {
            rest = r;
            clauses
        }
        Err(_) => Vec::new(),
    };

    // let-bindings, folded right into nested Let expressions around the body.
    let mut bindings: Vec<(Ident, Expr)> = Vec::new();
    while let Ok((r, _)) = token(Token::Let)(rest) {
        let (r, (name, _)) = identifier(r)?;
        let (r, _) = token(Token::Assign)(r)?;
        let (r, value) = expression(r)?;
        bindings.push((Ident::fresh(name), value));
        rest = r;
    }
    let (r, mut body) = expression(rest)?;
    let (mut rest, _) = token(Token::RBrace)(r)?;
    for (binding, value) in bindings.into_iter().rev() {
        body = Expr::let_in(binding, value, body);
    }

    let ensures = match postcondition(rest) {
        Ok((r, eps)) => {
            rest = r;
            Some(eps)
        }
        Err(_) => None,
    };

    Ok((
        rest,
        FunctionDef {
            name,
            params,
            requires,
            body,
            ensures,
            span: Some(fn_span),
        },
    ))
}

fn params(input: TokenSlice) -> PResult<Vec<Ident>> {
    if let Ok((rest, _)) = token(Token::RParen)(input) {
        return Ok((rest, Vec::new()));
    }
    let (mut input, (first, _)) = identifier(input)?;
    let mut names = vec![Ident::fresh(first)];
    while let Ok((rest, _)) = token(Token::Comma)(input) {
        let (rest, (name, _)) = identifier(rest)?;
        names.push(Ident::fresh(name));
        input = rest;
    }
    let (input, _) = token(Token::RParen)(input)?;
    Ok((input, names))
}

/// Parse a full source file; every token must be consumed.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(source)?;
    let mut input: TokenSlice = &tokens;
    let mut functions = Vec::new();
    while !input.is_empty() {
        match function(input) {
            Ok((rest, f)) => {
                functions.push(f);
                input = rest;
            }
            Err(_) => return Err(ParseError::at(input, "expected a function definition")),
        }
    }
    if functions.is_empty() {
        return Err(ParseError::Eof {
            message: "source contains no function definitions".into(),
        });
    }
    Ok(Program { functions })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(src: &str) -> FunctionDef {
        let program = parse_program(src).unwrap();
        assert_eq!(program.functions.len(), 1);
        program.functions.into_iter().next().unwrap()
    }

    #[test]
    fn parses_a_minimal_kernel() {
        let f = parse_one("fn sq(x) { require x in [0, 1] x * x }");
        assert_eq!(f.name, "sq");
        assert_eq!(f.params.len(), 1);
        assert_eq!(f.requires.len(), 1);
        assert!(matches!(f.requires[0], PreClause::InRange { .. }));
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        let f = parse_one("fn f(x) { require x in [0, 1] 1 + x * 2 }");
        match &f.body.kind {
            ExprKind::Add(_, r) => assert!(matches!(r.kind, ExprKind::Mul(_, _))),
            other => panic!("expected Add at the top, got {other:?}"),
        }
    }

    #[test]
    fn power_and_unary_minus() {
        let f = parse_one("fn f(u) { require u in [0, 1] -(1 - u)^3 / 6 }");
        // Unary minus applies to the parenthesized power, then division.
        assert!(matches!(f.body.kind, ExprKind::Div(_, _)));
    }

    #[test]
    fn let_bindings_nest_right() {
        let f = parse_one("fn f(x) { require x in [0, 1] let a = x + 1 let b = a * a b - a }");
        match &f.body.kind {
            ExprKind::Let { binding, body, .. } => {
                assert_eq!(binding.name(), "a");
                assert!(matches!(body.kind, ExprKind::Let { .. }));
            }
            other => panic!("expected outer Let, got {other:?}"),
        }
    }

    #[test]
    fn half_bound_clauses_and_conjunction() {
        let f = parse_one("fn f(x, y) { require 0 <= x && x <= 1 && y in [-2, -1] x + y }");
        assert_eq!(f.requires.len(), 3);
        assert!(matches!(f.requires[0], PreClause::LowerBound { .. }));
        assert!(matches!(f.requires[1], PreClause::UpperBound { .. }));
    }

    #[test]
    fn input_error_and_polynomial_constraint() {
        let f = parse_one(
            "fn f(x, y) { require x in [0, 1] && y in [0, 1] && x +/- 1e-9 && x * x <= y x / y }",
        );
        assert!(f
            .requires
            .iter()
            .any(|c| matches!(c, PreClause::InputError { .. })));
        assert!(f
            .requires
            .iter()
            .any(|c| matches!(c, PreClause::Constraint(_))));
    }

    #[test]
    fn postcondition_tolerance() {
        let f = parse_one("fn f(x) { require x in [0, 1] x } ensure res +/- 1e-15");
        assert_eq!(f.ensures, Some(Rational::from_decimal_str("1e-15").unwrap()));
    }

    #[test]
    fn reports_position_of_junk() {
        let err = parse_program("fn f(x) { require x in [0, 1] x } }").unwrap_err();
        match err {
            ParseError::Syntax { column, .. } => assert!(column > 30),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn two_functions() {
        let p = parse_program(
            "fn f(x) { require x in [0, 1] x }\nfn g(y) { require y in [1, 2] y * y }",
        )
        .unwrap();
        assert_eq!(p.functions.len(), 2);
    }
}
