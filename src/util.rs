//! Numeric and asset-naming utilities: base-26 asset ids, exact price
//! fractions with the historical rounding change, and storage/display
//! quantity conversion.
use anyhow::{anyhow, bail, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use std::cmp::Ordering;

use crate::config::{Config, PriceRounding, BTC, MAX_INT, PRECISION, UNIT, XCP};

const B26: u64 = 26;

/// Numeric id of an asset name.
///
/// "BTC" and "XCP" map to the reserved ids 0 and 1. Every other name is
/// base-26 (A–Z); names starting with 'A' and names shorter than four
/// letters (numeric value below 26³) are reserved and rejected.
pub fn asset_id(name: &str) -> Result<u64> {
    if name == BTC {
        return Ok(0);
    }
    if name == XCP {
        return Ok(1);
    }
    if name.starts_with('A') {
        bail!("asset name starts with 'A'");
    }
    if name.len() < 4 {
        bail!("asset name too short");
    }
    let mut id: u64 = 0;
    for c in name.chars() {
        if !c.is_ascii_uppercase() {
            bail!("invalid character in asset name");
        }
        id = id
            .checked_mul(B26)
            .and_then(|n| n.checked_add(c as u64 - 'A' as u64))
            .ok_or_else(|| anyhow!("asset name too long"))?;
    }
    Ok(id)
}

/// Inverse of [`asset_id`]. Exact round-trip for every valid id.
pub fn asset_name(id: u64) -> Result<String> {
    match id {
        0 => return Ok(BTC.to_string()),
        1 => return Ok(XCP.to_string()),
        n if n < B26.pow(3) => bail!("asset id too low"),
        _ => {}
    }
    let mut n = id;
    let mut out = Vec::new();
    while n > 0 {
        out.push(b'A' + (n % B26) as u8);
        n /= B26;
    }
    out.reverse();
    Ok(String::from_utf8(out).expect("base-26 digits are ASCII"))
}

/// An exact non-negative rational, normalized (gcd-reduced, positive
/// denominator). Comparison is exact; multiplication results are floored
/// and clamped to the store's representable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    num: i128,
    den: i128,
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}

/// Exact comparison of a/b vs c/d (b, d > 0) by Euclid's algorithm.
/// Avoids the i128 overflow cross-multiplication would risk when one
/// side came from a high-precision decimal.
fn cmp_ratio(an: i128, ad: i128, bn: i128, bd: i128) -> Ordering {
    let (q1, r1) = (an.div_euclid(ad), an.rem_euclid(ad));
    let (q2, r2) = (bn.div_euclid(bd), bn.rem_euclid(bd));
    if q1 != q2 {
        return q1.cmp(&q2);
    }
    match (r1 == 0, r2 == 0) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        // Compare fractional parts r1/ad vs r2/bd by comparing their
        // reciprocals with the arguments swapped.
        (false, false) => cmp_ratio(bd, r2, ad, r1),
    }
}

impl Fraction {
    /// Build `num/den`. Errors on a zero or negative denominator or a
    /// negative numerator.
    pub fn new(num: i128, den: i128) -> Result<Self> {
        if den <= 0 {
            bail!("fraction denominator must be positive");
        }
        if num < 0 {
            bail!("fraction numerator must be non-negative");
        }
        let g = gcd(num, den).max(1);
        Ok(Self {
            num: num / g,
            den: den / g,
        })
    }

    /// The fraction equal to a finite decimal.
    pub fn from_decimal(d: Decimal) -> Result<Self> {
        Self::new(d.mantissa(), 10i128.pow(d.scale()))
    }

    /// True if the value is zero.
    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    /// 1/self. Errors on zero.
    pub fn reciprocal(&self) -> Result<Self> {
        if self.num == 0 {
            bail!("reciprocal of zero");
        }
        Ok(Self {
            num: self.den,
            den: self.num,
        })
    }

    /// `floor(quantity * self)`, clamped into `[0, MAX_INT]`.
    ///
    /// Saturating i128 arithmetic is sufficient: saturation can only
    /// occur when the true result already exceeds `MAX_INT`.
    pub fn mul_floor(&self, quantity: i64) -> i64 {
        if quantity <= 0 || self.num == 0 {
            return 0;
        }
        let p = (quantity as i128).saturating_mul(self.num) / self.den;
        p.clamp(0, MAX_INT as i128) as i64
    }

    /// `floor(quantity / self)`, clamped into `[0, MAX_INT]`. Errors on
    /// division by zero.
    pub fn div_floor(&self, quantity: i64) -> Result<i64> {
        Ok(self.reciprocal()?.mul_floor(quantity))
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_ratio(self.num, self.den, other.num, other.den)
    }
}

/// The protocol price of `numerator` units per `denominator` units at a
/// given height.
///
/// Before the price-rounding upgrade this is a fixed-precision decimal
/// division rounded half-even; at and after the upgrade (and always on
/// test networks) it is the exact fraction. The discontinuity is frozen
/// protocol history and must not be "fixed".
pub fn price(numerator: i64, denominator: i64, block_index: u32, config: &Config) -> Result<Fraction> {
    if denominator <= 0 {
        bail!("price denominator must be positive");
    }
    if numerator < 0 {
        bail!("price numerator must be non-negative");
    }
    match config.price_rounding.at(block_index, config.testnet) {
        PriceRounding::ExactRational => Fraction::new(numerator as i128, denominator as i128),
        PriceRounding::DecimalHalfEven => {
            let q = Decimal::from(numerator) / Decimal::from(denominator);
            let q = q.round_dp_with_strategy(16, RoundingStrategy::MidpointNearestEven);
            Fraction::from_decimal(q)
        }
    }
}

/// Render a storage quantity for display: divisible assets are scaled
/// down by [`UNIT`] with eight decimal places, indivisible assets print
/// as raw integers.
pub fn value_out(quantity: i64, divisible: bool) -> String {
    if !divisible {
        return quantity.to_string();
    }
    let whole = quantity / UNIT;
    let frac = (quantity % UNIT).abs();
    format!("{whole}.{frac:08}")
}

/// Parse a display value into a storage quantity.
///
/// Divisible assets accept up to eight decimal places; more is an
/// excess-precision error. Indivisible assets reject any fractional
/// part.
pub fn value_in(value: &str, divisible: bool) -> Result<i64> {
    let (sign, value) = match value.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, value),
    };
    let (whole_s, frac_s) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    let whole: i64 = if whole_s.is_empty() {
        0
    } else {
        whole_s.parse()?
    };
    if !divisible {
        if frac_s.chars().any(|c| c != '0') {
            bail!("fractional quantity of an indivisible asset");
        }
        return Ok(sign * whole);
    }
    if frac_s.len() > PRECISION as usize {
        bail!("excess precision: more than {PRECISION} decimal places");
    }
    let mut frac: i64 = if frac_s.is_empty() { 0 } else { frac_s.parse()? };
    frac *= 10i64.pow(PRECISION - frac_s.len() as u32);
    whole
        .checked_mul(UNIT)
        .and_then(|n| n.checked_add(frac))
        .and_then(|n| n.checked_mul(sign))
        .ok_or_else(|| anyhow!("quantity out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_names_round_trip() {
        for name in ["BAAA", "FOOBAR", "ZZZZZZZZ", "BTC", "XCP"] {
            let id = asset_id(name).unwrap();
            assert_eq!(asset_name(id).unwrap(), name);
        }
    }

    #[test]
    fn reserved_names_rejected() {
        assert!(asset_id("AAAA").is_err()); // leading 'A'
        assert!(asset_id("BBB").is_err()); // too short
        assert!(asset_id("foo0").is_err()); // bad characters
        assert!(asset_name(2).is_err()); // below 26^3, not reserved
    }

    #[test]
    fn fraction_ordering_is_exact() {
        let a = Fraction::new(1, 3).unwrap();
        let b = Fraction::new(333_333_333_333_333, 1_000_000_000_000_000).unwrap();
        assert!(b < a);
        assert_eq!(a.cmp(&a), Ordering::Equal);
        let c = Fraction::new(2, 6).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn mul_floor_clamps() {
        let half = Fraction::new(1, 2).unwrap();
        assert_eq!(half.mul_floor(101), 50);
        let huge = Fraction::new(i64::MAX as i128, 1).unwrap();
        assert_eq!(huge.mul_floor(i64::MAX), MAX_INT);
    }

    #[test]
    fn value_conversion() {
        assert_eq!(value_in("1.5", true).unwrap(), 150_000_000);
        assert_eq!(value_in("42", false).unwrap(), 42);
        assert!(value_in("1.5", false).is_err());
        assert!(value_in("0.123456789", true).is_err());
        assert_eq!(value_out(150_000_000, true), "1.50000000");
        assert_eq!(value_out(7, false), "7");
    }
}
