//! NumLang compiler library.
//!
//! This crate implements the NumLang compiler: a tiny real-arithmetic kernel
//! language plus a static analyzer that bounds the worst-case floating-point
//! roundoff error of each kernel over its declared input domain.
//!
//! The pipeline per function: the front end ([`lexer`], [`parser`],
//! [`resolve`]) produces an expression tree with stable node identities;
//! [`specs`] folds the precondition into input range and error maps; the
//! [`analysis`] evaluators compute a sound range and error bound for every
//! sub-expression, parameterized over the abstract domains in [`interval`],
//! [`affine`] and [`smtrange`]; and the driver publishes the per-function
//! results.

pub mod affine;
pub mod analysis;
pub mod ast;
pub mod interval;
pub mod lexer;
pub mod options;
pub mod parser;
pub mod precision;
pub mod rational;
pub mod resolve;
pub mod smtrange;
pub mod specs;
