//! # Exact Amount Arithmetic
//!
//! Every amount and exchange rate in the payment engine goes through these
//! types. Floating point is acceptable for pacing heuristics, never for
//! accounting: a payment of millions of packets would drift.
//!
//! - [`Int`]: a non-negative amount. Arithmetic saturates at `u64::MAX`
//!   and floors at zero; it never wraps.
//! - [`PositiveInt`]: an [`Int`] known to be greater than zero. Division,
//!   reciprocals and max-packet logic only accept this refinement.
//! - [`Ratio`]: an exact rational `a / b` with `b > 0`, ordered by
//!   cross-multiplication in 128-bit space.
//! - [`PositiveRatio`]: a [`Ratio`] with a positive numerator.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Int
// ---------------------------------------------------------------------------

/// A non-negative integer amount.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Int(u64);

impl Int {
    pub const ZERO: Int = Int(0);
    pub const ONE: Int = Int(1);
    pub const MAX_U64: Int = Int(u64::MAX);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Converts an integral, finite, non-negative float. Anything else is
    /// rejected rather than clamped.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value >= u64::MAX as f64 {
            return None;
        }
        Some(Self(value as u64))
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn to_positive(self) -> Option<PositiveInt> {
        PositiveInt::new(self.0)
    }

    pub fn saturating_add(self, other: Int) -> Int {
        Int(self.0.saturating_add(other.0))
    }

    /// Subtracts, flooring at zero.
    pub fn saturating_sub(self, other: Int) -> Int {
        Int(self.0.saturating_sub(other.0))
    }

    pub fn saturating_mul(self, other: Int) -> Int {
        Int(self.0.saturating_mul(other.0))
    }

    /// `floor(self * ratio)`, saturating.
    pub fn multiply_floor(self, ratio: Ratio) -> Int {
        let product = self.0 as u128 * ratio.a.0 as u128;
        saturate(product / ratio.b.0 as u128)
    }

    /// `ceil(self * ratio)`, saturating.
    pub fn multiply_ceil(self, ratio: Ratio) -> Int {
        let product = self.0 as u128 * ratio.a.0 as u128;
        saturate(product.div_ceil(ratio.b.0 as u128))
    }

    pub fn divide_floor(self, divisor: PositiveInt) -> Int {
        Int(self.0 / divisor.0)
    }

    pub fn divide_ceil(self, divisor: PositiveInt) -> Int {
        Int(self.0.div_ceil(divisor.0))
    }
}

impl From<u64> for Int {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<PositiveInt> for Int {
    fn from(value: PositiveInt) -> Self {
        Self(value.0)
    }
}

impl fmt::Display for Int {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn saturate(value: u128) -> Int {
    Int(u64::try_from(value).unwrap_or(u64::MAX))
}

// ---------------------------------------------------------------------------
// PositiveInt
// ---------------------------------------------------------------------------

/// An integer amount strictly greater than zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PositiveInt(u64);

impl PositiveInt {
    pub const ONE: PositiveInt = PositiveInt(1);
    pub const MAX_U64: PositiveInt = PositiveInt(u64::MAX);

    pub const fn new(value: u64) -> Option<Self> {
        if value > 0 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn as_int(self) -> Int {
        Int(self.0)
    }

    pub fn saturating_add(self, other: Int) -> PositiveInt {
        PositiveInt(self.0.saturating_add(other.0))
    }

    /// `1 / self`.
    pub fn reciprocal(self) -> PositiveRatio {
        PositiveRatio {
            a: PositiveInt::ONE,
            b: self,
        }
    }
}

impl fmt::Display for PositiveInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Ratio
// ---------------------------------------------------------------------------

/// Exact non-negative rational number `a / b`.
///
/// Equality and ordering compare values, not representations:
/// `1/2 == 2/4`.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Ratio {
    #[serde(rename = "numerator")]
    a: Int,
    #[serde(rename = "denominator")]
    b: PositiveInt,
}

impl Ratio {
    pub const ZERO: Ratio = Ratio {
        a: Int::ZERO,
        b: PositiveInt::ONE,
    };

    pub const ONE: Ratio = Ratio {
        a: Int::ONE,
        b: PositiveInt::ONE,
    };

    pub const fn new(a: Int, b: PositiveInt) -> Self {
        Self { a, b }
    }

    /// Builds `a / b`, or `None` if `b` is zero.
    pub fn from_parts(a: u64, b: u64) -> Option<Self> {
        Some(Self {
            a: Int(a),
            b: PositiveInt::new(b)?,
        })
    }

    /// Converts a decimal price or rate exactly.
    ///
    /// The shortest decimal representation of `value` becomes
    /// `digits / 10^k`. Fractional digits that do not fit in 64 bits are
    /// truncated (the result rounds toward zero). `NaN`, infinities,
    /// negatives and values at or above `2^64` are rejected.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        if value == 0.0 {
            return Some(Self::ZERO);
        }

        let repr = format!("{}", value);
        let (integer, fraction) = repr.split_once('.').unwrap_or((repr.as_str(), ""));

        let mut numerator: u128 = 0;
        for digit in integer.bytes() {
            numerator = numerator * 10 + u128::from(digit.checked_sub(b'0')?);
            if numerator > u64::MAX as u128 {
                return None;
            }
        }

        let mut denominator: u128 = 1;
        for digit in fraction.bytes() {
            let next_numerator = numerator * 10 + u128::from(digit.checked_sub(b'0')?);
            let next_denominator = denominator * 10;
            if next_numerator > u64::MAX as u128 || next_denominator > u64::MAX as u128 {
                break;
            }
            numerator = next_numerator;
            denominator = next_denominator;
        }

        Self::from_parts(numerator as u64, denominator as u64)
    }

    pub const fn numerator(self) -> Int {
        self.a
    }

    pub const fn denominator(self) -> PositiveInt {
        self.b
    }

    pub const fn is_positive(self) -> bool {
        self.a.is_positive()
    }

    pub const fn is_zero(self) -> bool {
        self.a.is_zero()
    }

    pub fn to_positive(self) -> Option<PositiveRatio> {
        Some(PositiveRatio {
            a: self.a.to_positive()?,
            b: self.b,
        })
    }

    /// `b / a`, if the numerator is positive.
    pub fn reciprocal(self) -> Option<Ratio> {
        self.to_positive().map(|r| r.reciprocal().as_ratio())
    }

    pub fn floor(self) -> u64 {
        self.a.0 / self.b.0
    }

    pub fn ceil(self) -> u64 {
        self.a.0.div_ceil(self.b.0)
    }

    /// Approximate value, for logging and pacing only.
    pub fn to_f64(self) -> f64 {
        self.a.0 as f64 / self.b.0 as f64
    }
}

impl PartialEq for Ratio {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ratio {}

impl PartialOrd for Ratio {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ratio {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.a.0 as u128 * other.b.0 as u128;
        let rhs = other.a.0 as u128 * self.b.0 as u128;
        lhs.cmp(&rhs)
    }
}

impl From<PositiveRatio> for Ratio {
    fn from(value: PositiveRatio) -> Self {
        value.as_ratio()
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

// ---------------------------------------------------------------------------
// PositiveRatio
// ---------------------------------------------------------------------------

/// A rational number strictly greater than zero.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct PositiveRatio {
    #[serde(rename = "numerator")]
    a: PositiveInt,
    #[serde(rename = "denominator")]
    b: PositiveInt,
}

impl PositiveRatio {
    pub const fn new(a: PositiveInt, b: PositiveInt) -> Self {
        Self { a, b }
    }

    pub const fn as_ratio(self) -> Ratio {
        Ratio {
            a: self.a.as_int(),
            b: self.b,
        }
    }

    pub const fn numerator(self) -> PositiveInt {
        self.a
    }

    pub const fn denominator(self) -> PositiveInt {
        self.b
    }

    pub fn reciprocal(self) -> PositiveRatio {
        PositiveRatio {
            a: self.b,
            b: self.a,
        }
    }
}

impl PartialEq for PositiveRatio {
    fn eq(&self, other: &Self) -> bool {
        self.as_ratio() == other.as_ratio()
    }
}

impl Eq for PositiveRatio {}

impl PartialOrd for PositiveRatio {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PositiveRatio {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_ratio().cmp(&other.as_ratio())
    }
}

impl fmt::Display for PositiveRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_ratio().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratio(a: u64, b: u64) -> Ratio {
        Ratio::from_parts(a, b).unwrap()
    }

    #[test]
    fn saturating_sub_never_goes_negative() {
        let cases = [(0, 0), (0, 5), (5, 0), (3, 7), (7, 3), (u64::MAX, 1), (1, u64::MAX)];
        for (x, y) in cases {
            let (x, y) = (Int::new(x), Int::new(y));
            let diff = x.saturating_sub(y);
            assert!(diff.saturating_add(y) <= x.max(y));
            if x >= y {
                assert_eq!(diff.saturating_add(y), x);
            } else {
                assert_eq!(diff, Int::ZERO);
            }
        }
    }

    #[test]
    fn addition_saturates_at_u64_max() {
        assert_eq!(Int::MAX_U64.saturating_add(Int::ONE), Int::MAX_U64);
        assert_eq!(Int::MAX_U64.saturating_mul(Int::new(2)), Int::MAX_U64);
    }

    #[test]
    fn positive_int_rejects_zero() {
        assert!(PositiveInt::new(0).is_none());
        assert_eq!(PositiveInt::new(9).unwrap().value(), 9);
        assert!(Int::ZERO.to_positive().is_none());
    }

    #[test]
    fn int_from_f64_rejects_invalid_input() {
        assert_eq!(Int::from_f64(12.0), Some(Int::new(12)));
        assert!(Int::from_f64(f64::NAN).is_none());
        assert!(Int::from_f64(f64::INFINITY).is_none());
        assert!(Int::from_f64(-1.0).is_none());
        assert!(Int::from_f64(1.5).is_none());
    }

    #[test]
    fn multiply_floor_and_ceil() {
        let rate = ratio(99, 1000);
        assert_eq!(Int::new(320).multiply_floor(rate), Int::new(31));
        assert_eq!(Int::new(320).multiply_ceil(rate), Int::new(32));
        assert_eq!(Int::new(1000).multiply_floor(rate), Int::new(99));
        assert_eq!(Int::new(1000).multiply_ceil(rate), Int::new(99));
    }

    #[test]
    fn multiply_saturates_instead_of_wrapping() {
        let huge = ratio(u64::MAX, 1);
        assert_eq!(Int::MAX_U64.multiply_floor(huge), Int::MAX_U64);
        assert_eq!(Int::MAX_U64.multiply_ceil(huge), Int::MAX_U64);
    }

    #[test]
    fn divide_floor_and_ceil() {
        let three = PositiveInt::new(3).unwrap();
        assert_eq!(Int::new(10).divide_floor(three), Int::new(3));
        assert_eq!(Int::new(10).divide_ceil(three), Int::new(4));
        assert_eq!(Int::new(9).divide_ceil(three), Int::new(3));
    }

    #[test]
    fn floor_and_ceil_bracket_the_value() {
        let cases = [(0, 1), (1, 1), (7, 2), (10, 3), (u64::MAX, 7), (3, u64::MAX)];
        for (a, b) in cases {
            let r = ratio(a, b);
            let floor = r.floor() as u128;
            // floor <= a/b < floor + 1, checked without floats
            assert!(floor * b as u128 <= a as u128);
            assert!((a as u128) < (floor + 1) * b as u128);
            let gap = r.ceil() - r.floor();
            assert!(gap == 0 || gap == 1);
        }
    }

    #[test]
    fn ratios_compare_by_value() {
        assert_eq!(ratio(1, 2), ratio(2, 4));
        assert!(ratio(1, 3) < ratio(1, 2));
        assert!(ratio(u64::MAX, u64::MAX - 1) > Ratio::ONE);
        assert_eq!(ratio(1, 2).max(ratio(3, 4)), ratio(3, 4));
    }

    #[test]
    fn reciprocal_requires_positive_numerator() {
        assert!(Ratio::ZERO.reciprocal().is_none());
        assert_eq!(ratio(2, 5).reciprocal().unwrap(), ratio(5, 2));
        let p = PositiveInt::new(4).unwrap().reciprocal();
        assert_eq!(p.as_ratio(), ratio(1, 4));
    }

    #[test]
    fn from_f64_is_exact_for_decimals() {
        assert_eq!(Ratio::from_f64(0.099).unwrap(), ratio(99, 1000));
        assert_eq!(Ratio::from_f64(2.5).unwrap(), ratio(5, 2));
        assert_eq!(Ratio::from_f64(0.096875).unwrap(), ratio(31, 320));
        assert_eq!(Ratio::from_f64(0.0).unwrap(), Ratio::ZERO);
        assert_eq!(Ratio::from_f64(-0.0).unwrap(), Ratio::ZERO);
        assert_eq!(Ratio::from_f64(42.0).unwrap(), ratio(42, 1));
    }

    #[test]
    fn from_f64_rejects_non_finite_and_negative() {
        assert!(Ratio::from_f64(f64::NAN).is_none());
        assert!(Ratio::from_f64(f64::INFINITY).is_none());
        assert!(Ratio::from_f64(f64::NEG_INFINITY).is_none());
        assert!(Ratio::from_f64(-0.5).is_none());
        assert!(Ratio::from_f64(1e30).is_none());
    }

    #[test]
    fn from_f64_truncates_digits_beyond_64_bits() {
        let tiny = Ratio::from_f64(1e-25).unwrap();
        assert!(tiny.is_zero());
        let r = Ratio::from_f64(0.2041930991198592).unwrap();
        assert_eq!(r, ratio(2041930991198592, 10_000_000_000_000_000));
    }
}
