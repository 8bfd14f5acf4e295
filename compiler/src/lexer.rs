//! Lexer (tokenizer) for NumLang using logos.
//!
//! Converts source text into a stream of tokens with position information.

use crate::ast::Span;
use logos::Logos;
use std::fmt;
use thiserror::Error;

/// Token types for the kernel language.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")] // Skip whitespace
#[logos(skip r"//[^\n]*")] // Skip single-line comments
#[logos(skip r"/\*([^*]|\*[^/])*\*/")] // Skip multi-line comments
pub enum Token {
    // Keywords
    #[token("fn")]
    Fn,

    #[token("require")]
    Require,

    #[token("ensure")]
    Ensure,

    #[token("let")]
    Let,

    #[token("in")]
    In,

    #[token("res")]
    Res,

    #[token("sqrt")]
    Sqrt,

    // Operators and punctuation
    #[token("+/-")]
    PlusMinus,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("^")]
    Caret,

    #[token("==")]
    EqEq,

    #[token("=")]
    Assign,

    #[token("&&")]
    AndAnd,

    #[token("<=")]
    Le,

    #[token("<")]
    Lt,

    #[token(">=")]
    Ge,

    #[token(">")]
    Gt,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token(",")]
    Comma,

    // Literals and identifiers
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().to_string())]
    Number(String),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Fn => write!(f, "fn"),
            Token::Require => write!(f, "require"),
            Token::Ensure => write!(f, "ensure"),
            Token::Let => write!(f, "let"),
            Token::In => write!(f, "in"),
            Token::Res => write!(f, "res"),
            Token::Sqrt => write!(f, "sqrt"),
            Token::PlusMinus => write!(f, "+/-"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Caret => write!(f, "^"),
            Token::EqEq => write!(f, "=="),
            Token::Assign => write!(f, "="),
            Token::AndAnd => write!(f, "&&"),
            Token::Le => write!(f, "<="),
            Token::Lt => write!(f, "<"),
            Token::Ge => write!(f, ">="),
            Token::Gt => write!(f, ">"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Number(s) => write!(f, "{s}"),
            Token::Ident(s) => write!(f, "{s}"),
        }
    }
}

/// Lexical error with position.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unexpected character at {line}:{column}")]
pub struct LexError {
    pub line: usize,
    pub column: usize,
}

/// Tokenize a source file into `(token, span)` pairs.
pub fn tokenize(source: &str) -> Result<Vec<(Token, Span)>, LexError> {
    // Byte offsets of line starts for offset -> line:column conversion.
    let mut line_starts = vec![0usize];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            line_starts.push(i + 1);
        }
    }
    let locate = |offset: usize| -> (usize, usize) {
        let line = match line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (line + 1, offset - line_starts[line] + 1)
    };

    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(item) = lexer.next() {
        let range = lexer.span();
        let (line, column) = locate(range.start);
        match item {
            Ok(tok) => tokens.push((tok, Span::new(line, column, range.len()))),
            Err(()) => return Err(LexError { line, column }),
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn lexes_a_small_function() {
        let toks = kinds("fn f(x) { require x in [0, 1] x * x }");
        assert_eq!(toks[0], Token::Fn);
        assert_eq!(toks[1], Token::Ident("f".into()));
        assert!(toks.contains(&Token::Require));
        assert!(toks.contains(&Token::LBracket));
    }

    #[test]
    fn plus_minus_wins_over_plus_then_slash() {
        assert_eq!(kinds("x +/- 1e-9")[1], Token::PlusMinus);
        assert_eq!(kinds("a + b / c")[1], Token::Plus);
    }

    #[test]
    fn numbers_with_exponents() {
        assert_eq!(
            kinds("0.954 1e-13 2.5E+2"),
            vec![
                Token::Number("0.954".into()),
                Token::Number("1e-13".into()),
                Token::Number("2.5E+2".into()),
            ]
        );
    }

    #[test]
    fn comments_and_whitespace_are_skipped() {
        let toks = kinds("x // trailing\n/* block */ y");
        assert_eq!(
            toks,
            vec![Token::Ident("x".into()), Token::Ident("y".into())]
        );
    }

    #[test]
    fn spans_carry_line_and_column() {
        let toks = tokenize("fn f\n  g").unwrap();
        assert_eq!(toks[0].1.line, 1);
        assert_eq!(toks[0].1.column, 1);
        assert_eq!(toks[2].1.line, 2);
        assert_eq!(toks[2].1.column, 3);
    }

    #[test]
    fn rejects_unknown_characters() {
        let err = tokenize("x $ y").unwrap_err();
        assert_eq!(err.column, 3);
    }
}
