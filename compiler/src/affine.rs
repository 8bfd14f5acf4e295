//! Affine-arithmetic forms.
//!
//! An affine form `x0 + Σ xi·εi` with noise symbols `εi ∈ [-1, 1]` tracks
//! linear correlations between quantities through shared symbol indices.
//! Linear operations are exact; `mul`, `recip`, `sqrt` and `pow` linearize
//! and introduce exactly one fresh noise symbol whose coefficient bounds the
//! linearization residual. The min-range rule is used for `recip` and `sqrt`
//! because its coefficients stay rational (the Chebyshev tangent point does
//! not).
//!
//! Term lists are kept sorted by strictly increasing symbol index with no
//! zero coefficients. Fresh indices come from a process-wide atomic counter,
//! so a freshly minted index is larger than every index already in use and
//! can be appended without re-sorting.

use crate::interval::{DomainError, Interval};
use crate::rational::Rational;
use std::sync::atomic::{AtomicU64, Ordering};

static NOISE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mint a globally unique noise-symbol index.
pub fn fresh_noise_index() -> u64 {
    NOISE_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// An affine form over exact rationals.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineForm {
    central: Rational,
    terms: Vec<(u64, Rational)>,
}

impl AffineForm {
    pub fn constant(r: Rational) -> Self {
        AffineForm {
            central: r,
            terms: Vec::new(),
        }
    }

    pub fn zero() -> Self {
        AffineForm::constant(Rational::zero())
    }

    /// Lift an interval into a fresh one-symbol form `mid ± rad`.
    pub fn from_interval(iv: &Interval) -> Self {
        let mut form = AffineForm::constant(iv.midpoint());
        form.push_fresh(iv.radius());
        form
    }

    /// Zero-centered form `0 ± |r|` with a fresh noise symbol.
    pub fn plus_minus(r: &Rational) -> Self {
        let mut form = AffineForm::zero();
        form.push_fresh(r.abs());
        form
    }

    pub fn central(&self) -> &Rational {
        &self.central
    }

    pub fn terms(&self) -> &[(u64, Rational)] {
        &self.terms
    }

    /// Total deviation `Σ |xi|`.
    pub fn radius(&self) -> Rational {
        let mut r = Rational::zero();
        for (_, c) in &self.terms {
            r = r + c.abs();
        }
        r
    }

    pub fn to_interval(&self) -> Interval {
        let r = self.radius();
        Interval {
            lo: &self.central - &r,
            hi: &self.central + &r,
        }
    }

    pub fn max_abs(&self) -> Rational {
        self.to_interval().max_abs()
    }

    fn push_fresh(&mut self, magnitude: Rational) {
        if !magnitude.is_zero() {
            self.terms.push((fresh_noise_index(), magnitude.abs()));
        }
    }

    /// Append a fresh noise symbol with coefficient `|r|`.
    pub fn add_noise(mut self, r: &Rational) -> Self {
        self.push_fresh(r.abs());
        self
    }

    pub fn add(&self, rhs: &AffineForm) -> AffineForm {
        AffineForm {
            central: &self.central + &rhs.central,
            terms: merge_terms(&self.terms, &rhs.terms, false),
        }
    }

    pub fn sub(&self, rhs: &AffineForm) -> AffineForm {
        AffineForm {
            central: &self.central - &rhs.central,
            terms: merge_terms(&self.terms, &rhs.terms, true),
        }
    }

    pub fn neg(&self) -> AffineForm {
        AffineForm {
            central: -&self.central,
            terms: self.terms.iter().map(|(i, c)| (*i, -c)).collect(),
        }
    }

    pub fn scale(&self, k: &Rational) -> AffineForm {
        if k.is_zero() {
            return AffineForm::zero();
        }
        AffineForm {
            central: &self.central * k,
            terms: self.terms.iter().map(|(i, c)| (*i, c * k)).collect(),
        }
    }

    pub fn add_scalar(&self, k: &Rational) -> AffineForm {
        AffineForm {
            central: &self.central + k,
            terms: self.terms.clone(),
        }
    }

    /// Product; linear in the existing symbols plus one fresh symbol bounding
    /// the bilinear residual by `rad(x)·rad(y)`.
    pub fn mul(&self, rhs: &AffineForm) -> AffineForm {
        let scaled_rhs = rhs.scale(&self.central);
        let scaled_self = self.scale(&rhs.central);
        let mut out = AffineForm {
            central: &self.central * &rhs.central,
            terms: merge_terms(&scaled_self.terms, &scaled_rhs.terms, false),
        };
        out.push_fresh(self.radius() * rhs.radius());
        out
    }

    /// Min-range reciprocal; fails when the enclosure contains zero.
    pub fn checked_recip(&self) -> Result<AffineForm, DomainError> {
        let iv = self.to_interval();
        if iv.contains_zero() {
            return Err(DomainError::DivisionByZero);
        }
        if iv.hi.is_negative() {
            // 1/x = -(1/(-x)); reduce to the positive case.
            return Ok(self.neg().checked_recip()?.neg());
        }
        let a = &iv.lo;
        let b = &iv.hi;
        // alpha = -1/b^2; g(x) = 1/x - alpha*x is decreasing on [a, b], so its
        // range is [g(b), g(a)] = [2/b, 1/a + a/b^2], all rational.
        let b_sq = b * b;
        let alpha = -&(&Rational::one() / &b_sq);
        let g_hi = &(&Rational::one() / a) + &(a / &b_sq);
        let g_lo = &Rational::integer(2) / b;
        let zeta = (&g_hi + &g_lo).half();
        let delta = (&g_hi - &g_lo).half();
        Ok(self.scale(&alpha).add_scalar(&zeta).add_noise(&delta))
    }

    /// Quotient `self · (1/rhs)`.
    pub fn checked_div(&self, rhs: &AffineForm) -> Result<AffineForm, DomainError> {
        Ok(self.mul(&rhs.checked_recip()?))
    }

    /// Min-range square root with outward rational enclosures of the
    /// irrational endpoints; fails when the enclosure reaches below zero.
    pub fn sqrt(&self) -> Result<AffineForm, DomainError> {
        let iv = self.to_interval();
        if iv.lo.is_negative() {
            return Err(DomainError::NegativeSqrt);
        }
        if iv.hi.is_zero() {
            return Ok(AffineForm::zero());
        }
        let (sa_lo, _) = iv.lo.sqrt_enclosure().ok_or(DomainError::NegativeSqrt)?;
        let (_, sb_hi) = iv.hi.sqrt_enclosure().ok_or(DomainError::NegativeSqrt)?;
        // alpha <= 1/(2*sqrt(b)) makes g(x) = sqrt(x) - alpha*x increasing on
        // [a, b]; bound its range outward through the endpoint enclosures.
        let alpha = &Rational::one() / &(&Rational::integer(2) * &sb_hi);
        let g_lo = &sa_lo - &(&alpha * &iv.lo);
        let g_hi = &sb_hi - &(&alpha * &iv.hi);
        let zeta = (&g_hi + &g_lo).half();
        let delta = (&g_hi - &g_lo).half();
        Ok(self.scale(&alpha).add_scalar(&zeta).add_noise(&delta))
    }

    /// Integer power by iterated multiplication.
    pub fn pow_i(&self, n: u32) -> AffineForm {
        if n == 0 {
            return AffineForm::constant(Rational::one());
        }
        let mut acc = self.clone();
        for _ in 1..n {
            acc = acc.mul(self);
        }
        acc
    }
}

/// Merge two sorted term lists, combining shared indices with `+` or `-` and
/// dropping coefficients that cancel to zero.
fn merge_terms(
    a: &[(u64, Rational)],
    b: &[(u64, Rational)],
    subtract: bool,
) -> Vec<(u64, Rational)> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        let take_a = match (a.get(i), b.get(j)) {
            (Some((ia, _)), Some((ib, _))) if ia == ib => {
                let (ia, ca) = &a[i];
                let (_, cb) = &b[j];
                let c = if subtract { ca - cb } else { ca + cb };
                if !c.is_zero() {
                    out.push((*ia, c));
                }
                i += 1;
                j += 1;
                continue;
            }
            (Some((ia, _)), Some((ib, _))) => ia < ib,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if take_a {
            out.push(a[i].clone());
            i += 1;
        } else {
            let (idx, c) = &b[j];
            let c = if subtract { -c } else { c.clone() };
            out.push((*idx, c));
            j += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(a: i64, b: i64) -> Interval {
        Interval::new(Rational::integer(a), Rational::integer(b))
    }

    #[test]
    fn correlation_cancels_in_subtraction() {
        let x = AffineForm::from_interval(&iv(1, 3));
        let diff = x.sub(&x);
        assert_eq!(diff.to_interval(), Interval::zero());
        // Interval arithmetic cannot see the correlation.
        let plain = iv(1, 3).sub(&iv(1, 3));
        assert_eq!(plain, iv(-2, 2));
    }

    #[test]
    fn addition_tracks_shared_symbols() {
        let x = AffineForm::from_interval(&iv(0, 2));
        let sum = x.add(&x);
        assert_eq!(sum.to_interval(), iv(0, 4));
        assert_eq!(sum.terms().len(), 1);
    }

    #[test]
    fn fresh_indices_strictly_increase() {
        let a = fresh_noise_index();
        let b = fresh_noise_index();
        assert!(b > a);
    }

    #[test]
    fn multiplication_encloses_the_product() {
        let x = AffineForm::from_interval(&iv(1, 3));
        let y = AffineForm::from_interval(&iv(-2, 2));
        // The true product range over [1,3] x [-2,2] is [-6, 6].
        let prod = x.mul(&y).to_interval();
        assert_eq!(prod, iv(-6, 6));
    }

    #[test]
    fn square_via_mul_is_tighter_than_interval() {
        // x*x over [-1, 1]: interval arithmetic gives [-1, 1], affine with a
        // shared symbol gives a centered enclosure of width <= 2 containing
        // the true range [0, 1].
        let x = AffineForm::from_interval(&iv(-1, 1));
        let sq = x.mul(&x).to_interval();
        assert!(sq.contains(&Rational::zero()));
        assert!(sq.contains(&Rational::one()));
    }

    #[test]
    fn recip_encloses_and_rejects_zero() {
        let x = AffineForm::from_interval(&iv(2, 4));
        let r = x.checked_recip().unwrap().to_interval();
        assert!(r.contains(&Rational::fraction(1, 2)));
        assert!(r.contains(&Rational::fraction(1, 4)));
        assert!(AffineForm::from_interval(&iv(-1, 1))
            .checked_recip()
            .is_err());
        // Negative intervals go through the symmetric path.
        let n = AffineForm::from_interval(&iv(-4, -2));
        let rn = n.checked_recip().unwrap().to_interval();
        assert!(rn.contains(&Rational::fraction(-1, 2)));
        assert!(rn.contains(&Rational::fraction(-1, 4)));
    }

    #[test]
    fn recip_of_point_is_exact() {
        let x = AffineForm::constant(Rational::integer(4));
        let r = x.checked_recip().unwrap();
        assert_eq!(r.central(), &Rational::fraction(1, 4));
        assert!(r.terms().is_empty());
    }

    #[test]
    fn sqrt_encloses_the_true_range() {
        let x = AffineForm::from_interval(&iv(4, 9));
        let s = x.sqrt().unwrap().to_interval();
        assert!(s.lo <= Rational::integer(2));
        assert!(s.hi >= Rational::integer(3));
        assert!(AffineForm::from_interval(&iv(-1, 1)).sqrt().is_err());
        assert_eq!(
            AffineForm::zero().sqrt().unwrap().to_interval(),
            Interval::zero()
        );
    }

    #[test]
    fn division_chains_through_recip() {
        let x = AffineForm::constant(Rational::integer(6));
        let y = AffineForm::constant(Rational::integer(3));
        let q = x.checked_div(&y).unwrap();
        assert_eq!(q.central(), &Rational::integer(2));
        assert!(AffineForm::constant(Rational::integer(1))
            .checked_div(&AffineForm::from_interval(&iv(0, 1)))
            .is_err());
    }

    #[test]
    fn pow_matches_iterated_multiplication() {
        let x = AffineForm::from_interval(&iv(1, 2));
        let cubed = x.pow_i(3).to_interval();
        assert!(cubed.contains(&Rational::one()));
        assert!(cubed.contains(&Rational::integer(8)));
        assert_eq!(
            x.pow_i(0).to_interval(),
            Interval::point(Rational::one())
        );
    }

    #[test]
    fn zero_coefficients_are_dropped() {
        let x = AffineForm::from_interval(&iv(1, 3));
        let cancelled = x.sub(&x);
        assert!(cancelled.terms().is_empty());
    }
}
