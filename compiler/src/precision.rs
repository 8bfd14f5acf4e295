//! Finite-precision descriptors.
//!
//! Each precision exports its unit roundoff, denormal threshold, largest
//! finite value, and the absolute roundoff bound for storing a value from a
//! given real range. The floating formats use the conservative relative
//! model `u · max_abs(range)`; `Fixed(n)` uses the absolute truncation model
//! `2^-(n-1) · max_abs(range)`, which is exactly zero on `[0, 0]`.

use crate::interval::Interval;
use crate::rational::Rational;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A finite-precision arithmetic format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    Float32,
    Float64,
    DoubleDouble,
    /// Fixed-point format with `n` total bits.
    Fixed(u32),
}

impl Precision {
    /// Unit roundoff `u` of the format.
    pub fn unit_roundoff(&self) -> Rational {
        match self {
            Precision::Float32 => Rational::pow2(-24),
            Precision::Float64 => Rational::pow2(-53),
            Precision::DoubleDouble => Rational::pow2(-105),
            Precision::Fixed(n) => Rational::pow2(-(*n as i32 - 1)),
        }
    }

    /// Smallest positive subnormal; `None` for fixed point.
    pub fn denormal_threshold(&self) -> Option<Rational> {
        match self {
            Precision::Float32 => Some(Rational::pow2(-149)),
            // DoubleDouble inherits the Float64 underflow behaviour.
            Precision::Float64 | Precision::DoubleDouble => Some(Rational::pow2(-1074)),
            Precision::Fixed(_) => None,
        }
    }

    /// Largest finite value; `None` for fixed point (format-dependent).
    pub fn max_finite(&self) -> Option<Rational> {
        match self {
            Precision::Float32 => Some(Rational::pow2(128) - Rational::pow2(104)),
            Precision::Float64 | Precision::DoubleDouble => {
                Some(Rational::pow2(1024) - Rational::pow2(971))
            }
            Precision::Fixed(_) => None,
        }
    }

    /// Worst-case absolute roundoff for a value stored from `range`.
    pub fn abs_roundoff(&self, range: &Interval) -> Rational {
        self.unit_roundoff() * range.max_abs()
    }

    /// Whether `r` round-trips through this format without error.
    pub fn is_exactly_representable(&self, r: &Rational) -> bool {
        match self {
            Precision::Float32 => {
                let narrowed = r.to_f64() as f32;
                Rational::from_f64(narrowed as f64).is_some_and(|b| &b == r)
            }
            Precision::Float64 => Rational::from_f64(r.to_f64()).is_some_and(|b| &b == r),
            Precision::DoubleDouble => {
                let hi = r.to_f64();
                let Some(hi_exact) = Rational::from_f64(hi) else {
                    return false;
                };
                let rem = r - &hi_exact;
                Rational::from_f64(rem.to_f64()).is_some_and(|b| b == rem)
            }
            Precision::Fixed(n) => (r * &Rational::pow2(*n as i32 - 1)).is_integer(),
        }
    }

    /// Partial order; floating formats are ordered among themselves, fixed
    /// formats by width, and the two families are incomparable.
    pub fn order(&self, other: &Precision) -> Option<Ordering> {
        fn float_rank(p: &Precision) -> Option<u8> {
            match p {
                Precision::Float32 => Some(0),
                Precision::Float64 => Some(1),
                Precision::DoubleDouble => Some(2),
                Precision::Fixed(_) => None,
            }
        }
        match (float_rank(self), float_rank(other)) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            (None, None) => match (self, other) {
                (Precision::Fixed(a), Precision::Fixed(b)) => Some(a.cmp(b)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Least upper bound of two precisions, `None` when incomparable.
    pub fn join(&self, other: &Precision) -> Option<Precision> {
        match self.order(other)? {
            Ordering::Less => Some(*other),
            _ => Some(*self),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown precision `{0}` (expected f32, f64, dd or fixed<bits>)")]
pub struct ParsePrecisionError(String);

impl FromStr for Precision {
    type Err = ParsePrecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float32" => Ok(Precision::Float32),
            "f64" | "float64" => Ok(Precision::Float64),
            "dd" | "doubledouble" | "double-double" => Ok(Precision::DoubleDouble),
            other => {
                let bits = other
                    .strip_prefix("fixed")
                    .and_then(|b| b.parse::<u32>().ok())
                    .filter(|b| (2..=512).contains(b));
                match bits {
                    Some(b) => Ok(Precision::Fixed(b)),
                    None => Err(ParsePrecisionError(s.to_string())),
                }
            }
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::Float32 => write!(f, "Float32"),
            Precision::Float64 => write!(f, "Float64"),
            Precision::DoubleDouble => write!(f, "DoubleDouble"),
            Precision::Fixed(n) => write!(f, "Fixed({n})"),
        }
    }
}
