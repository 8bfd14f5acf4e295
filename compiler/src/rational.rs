//! Exact rational arithmetic.
//!
//! Every numeric quantity in the analyzer (range bounds, error magnitudes,
//! constants) is an exact `p/q` until the final output conversion. The
//! invariants `q > 0` and `gcd(|p|, q) = 1` are maintained by the underlying
//! [`BigRational`] representation.

use float_next_after::NextAfter;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Pow, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use thiserror::Error;

/// Typed failure for rational division by zero.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("division by zero")]
pub struct DivisionByZero;

/// Rounding direction for decimal/binary output conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundDir {
    /// Toward negative infinity.
    Floor,
    /// Toward positive infinity.
    Ceil,
}

/// An exact arbitrary-precision rational number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rational(BigRational);

impl Rational {
    pub fn zero() -> Self {
        Rational(BigRational::zero())
    }

    pub fn one() -> Self {
        Rational(BigRational::one())
    }

    pub fn integer(n: i64) -> Self {
        Rational(BigRational::from_integer(BigInt::from(n)))
    }

    /// Exact fraction `p/q`. The denominator must be non-zero.
    pub fn fraction(p: i64, q: i64) -> Self {
        debug_assert!(q != 0, "fraction with zero denominator");
        Rational(BigRational::new(BigInt::from(p), BigInt::from(q)))
    }

    /// Exact power of two, `2^e` for any sign of `e`.
    pub fn pow2(e: i32) -> Self {
        let two = BigInt::from(2);
        if e >= 0 {
            Rational(BigRational::from_integer(Pow::pow(&two, e as u32)))
        } else {
            Rational(BigRational::new(BigInt::one(), Pow::pow(&two, (-e) as u32)))
        }
    }

    /// Exact conversion from a finite `f64` (every finite double is rational).
    pub fn from_f64(x: f64) -> Option<Self> {
        BigRational::from_float(x).map(Rational)
    }

    /// Parse a decimal literal such as `331.4`, `0.1` or `1e-13` exactly.
    pub fn from_decimal_str(s: &str) -> Option<Self> {
        let (mantissa, exp10) = match s.find(['e', 'E']) {
            Some(pos) => {
                let exp: i64 = s[pos + 1..].parse().ok()?;
                (&s[..pos], exp)
            }
            None => (s, 0),
        };
        let (int_part, frac_part) = match mantissa.find('.') {
            Some(pos) => (&mantissa[..pos], &mantissa[pos + 1..]),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        let digits: String = [int_part, frac_part].concat();
        let numer: BigInt = digits.parse().ok()?;
        let shift = exp10 - frac_part.len() as i64;
        let ten = BigInt::from(10);
        let value = if shift >= 0 {
            BigRational::from_integer(numer * Pow::pow(&ten, shift as u32))
        } else {
            BigRational::new(numer, Pow::pow(&ten, (-shift) as u32))
        };
        Some(Rational(value))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_one(&self) -> bool {
        self.0.is_one()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_positive()
    }

    pub fn is_integer(&self) -> bool {
        self.0.is_integer()
    }

    /// Decimal strings of the numerator and (positive) denominator.
    pub fn to_fraction_strings(&self) -> (String, String) {
        (self.0.numer().to_string(), self.0.denom().to_string())
    }

    pub fn abs(&self) -> Self {
        Rational(self.0.abs())
    }

    pub fn min(self, other: Self) -> Self {
        if self <= other {
            self
        } else {
            other
        }
    }

    pub fn max(self, other: Self) -> Self {
        if self >= other {
            self
        } else {
            other
        }
    }

    pub fn half(&self) -> Self {
        Rational(&self.0 / BigRational::from_integer(BigInt::from(2)))
    }

    /// Multiplicative inverse; fails on zero.
    pub fn checked_recip(&self) -> Result<Self, DivisionByZero> {
        if self.is_zero() {
            Err(DivisionByZero)
        } else {
            Ok(Rational(self.0.recip()))
        }
    }

    /// Exact division; fails on a zero divisor.
    pub fn checked_div(&self, rhs: &Self) -> Result<Self, DivisionByZero> {
        if rhs.is_zero() {
            Err(DivisionByZero)
        } else {
            Ok(Rational(&self.0 / &rhs.0))
        }
    }

    /// Exact non-negative integer power.
    pub fn pow_i(&self, n: u32) -> Self {
        if n == 0 {
            return Rational::one();
        }
        let mut acc = self.clone();
        for _ in 1..n {
            acc = &acc * self;
        }
        acc
    }

    /// Sound enclosure `(lo, hi)` of the square root, `lo ≤ √self ≤ hi`.
    ///
    /// Newton iteration on rationals: every iterate of `g ← (g + x/g)/2` with
    /// `g ≥ √x` stays an upper bound, and `x/g` is then a lower bound, so the
    /// enclosure holds for any iteration count. Returns `None` for negative
    /// arguments.
    pub fn sqrt_enclosure(&self) -> Option<(Self, Self)> {
        if self.is_negative() {
            return None;
        }
        if self.is_zero() {
            return Some((Rational::zero(), Rational::zero()));
        }
        // Seed from the double sqrt when usable, else the AM-GM bound (1+x)/2.
        let seed = self.to_f64().sqrt();
        let mut g = match Rational::from_f64(seed) {
            Some(r) if r.is_positive() => r,
            _ => (&Rational::one() + self).half(),
        };
        // One correction step guarantees g >= sqrt(x) by AM-GM even when the
        // seed undershot, then iterate to a fixed relative tolerance.
        g = (&g + &self.checked_div(&g).ok()?).half();
        let tol = Rational::pow2(-80);
        let threshold = self * &tol;
        for _ in 0..32 {
            let err = &(&g * &g) - self;
            if err <= threshold {
                break;
            }
            g = (&g + &self.checked_div(&g).ok()?).half();
        }
        let lo = self.checked_div(&g).ok()?;
        Some((lo, g))
    }

    /// Nearest `f64` (overflow saturates to the signed infinity).
    pub fn to_f64(&self) -> f64 {
        match self.0.to_f64() {
            Some(x) => x,
            None if self.is_negative() => f64::NEG_INFINITY,
            None => f64::INFINITY,
        }
    }

    /// Smallest `f64` that is `≥ self`.
    pub fn to_f64_up(&self) -> f64 {
        let x = self.to_f64();
        if !x.is_finite() {
            return x;
        }
        match BigRational::from_float(x) {
            Some(r) if r >= self.0 => x,
            _ => x.next_after(f64::INFINITY),
        }
    }

    /// Largest `f64` that is `≤ self`.
    pub fn to_f64_down(&self) -> f64 {
        let x = self.to_f64();
        if !x.is_finite() {
            return x;
        }
        match BigRational::from_float(x) {
            Some(r) if r <= self.0 => x,
            _ => x.next_after(f64::NEG_INFINITY),
        }
    }

    /// Decimal scientific rendering with `sig` significant digits, rounded in
    /// the requested direction.
    pub fn to_scientific(&self, sig: usize, dir: RoundDir) -> String {
        debug_assert!(sig >= 1);
        if self.is_zero() {
            return "0.0".to_string();
        }
        let mag = self.0.abs();
        let negative = self.is_negative();

        // Locate e with 10^e <= mag < 10^(e+1); the digit-count guess is off
        // by at most one in either direction.
        let ten = BigInt::from(10);
        let mut e = digit_count(mag.numer()) as i64 - digit_count(mag.denom()) as i64;
        while cmp_pow10(&mag, e) == std::cmp::Ordering::Less {
            e -= 1;
        }
        while cmp_pow10(&mag, e + 1) != std::cmp::Ordering::Less {
            e += 1;
        }

        // Scale so the mantissa has exactly `sig` integer digits.
        let k = sig as i64 - 1 - e;
        let scaled = if k >= 0 {
            &mag * BigRational::from_integer(Pow::pow(&ten, k as u32))
        } else {
            &mag / BigRational::from_integer(Pow::pow(&ten, (-k) as u32))
        };
        let round_up = match dir {
            RoundDir::Ceil => !negative,
            RoundDir::Floor => negative,
        };
        let mut m = if round_up {
            scaled.ceil().to_integer()
        } else {
            scaled.floor().to_integer()
        };
        let limit = Pow::pow(&ten, sig as u32);
        if m >= limit {
            m /= &ten;
            e += 1;
        }

        let digits = m.to_string();
        let (head, tail) = digits.split_at(1);
        let tail = tail.trim_end_matches('0');
        let tail = if tail.is_empty() { "0" } else { tail };
        let sign = if negative { "-" } else { "" };
        format!("{sign}{head}.{tail}e{e:+03}")
    }
}

fn digit_count(n: &BigInt) -> usize {
    let s = n.abs().to_string();
    s.len()
}

/// Compare `mag` against `10^e`.
fn cmp_pow10(mag: &BigRational, e: i64) -> std::cmp::Ordering {
    let ten = BigInt::from(10);
    if e >= 0 {
        mag.numer().cmp(&(mag.denom() * Pow::pow(&ten, e as u32)))
    } else {
        (mag.numer() * Pow::pow(&ten, (-e) as u32)).cmp(mag.denom())
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_integer() {
            write!(f, "{}", self.0.numer())
        } else {
            write!(f, "{}/{}", self.0.numer(), self.0.denom())
        }
    }
}

macro_rules! forward_binop {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait for Rational {
            type Output = Rational;
            fn $method(self, rhs: Rational) -> Rational {
                Rational(self.0 $op rhs.0)
            }
        }
        impl $trait for &Rational {
            type Output = Rational;
            fn $method(self, rhs: &Rational) -> Rational {
                Rational(&self.0 $op &rhs.0)
            }
        }
        impl $trait<&Rational> for Rational {
            type Output = Rational;
            fn $method(self, rhs: &Rational) -> Rational {
                Rational(self.0 $op &rhs.0)
            }
        }
    };
}

forward_binop!(Add, add, +);
forward_binop!(Sub, sub, -);
forward_binop!(Mul, mul, *);

// Plain division is reserved for divisors known non-zero by construction
// (midpoints, powers of two); data-dependent divisions go through
// `checked_div`.
impl Div for &Rational {
    type Output = Rational;
    fn div(self, rhs: &Rational) -> Rational {
        debug_assert!(!rhs.is_zero());
        Rational(&self.0 / &rhs.0)
    }
}

impl Neg for Rational {
    type Output = Rational;
    fn neg(self) -> Rational {
        Rational(-self.0)
    }
}

impl Neg for &Rational {
    type Output = Rational;
    fn neg(self) -> Rational {
        Rational(-&self.0)
    }
}
