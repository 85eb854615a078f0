//! ============================================================================
//! Access Types - Threshold policy and unit conversion
//! ============================================================================
//! A token meets the gate when its raw balance is at least the threshold
//! amount expressed in that token's own decimals. All comparisons are done
//! on integers so 18-decimal and 6-decimal tokens gate identically.
//! ============================================================================

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::GateError;

/// Default access threshold, in whole tokens
pub const DEFAULT_ACCESS_THRESHOLD: &str = "0.1";

/// Largest decimals value whose scale factor (10^d) fits in a U256
pub const MAX_TOKEN_DECIMALS: u8 = 77;

/// Maximum fractional digits accepted in a threshold
const MAX_THRESHOLD_SCALE: u8 = 36;

/// Access threshold as an exact decimal: `mantissa / 10^scale` tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Threshold {
    mantissa: U256,
    scale: u8,
}

impl Threshold {
    pub fn parse(raw: &str) -> Result<Self, GateError> {
        let trimmed = raw.trim();
        let invalid = || GateError::Config(format!("invalid access threshold '{}'", raw));

        let (int_part, frac_part) = match trimmed.split_once('.') {
            Some((i, f)) => (i, f),
            None => (trimmed, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        let frac_part = frac_part.trim_end_matches('0');
        if frac_part.len() > MAX_THRESHOLD_SCALE as usize {
            return Err(invalid());
        }

        let digits = format!("{}{}", int_part, frac_part);
        let digits = if digits.is_empty() { "0" } else { digits.as_str() };
        let mantissa = U256::from_str_radix(digits, 10).map_err(|_| invalid())?;

        Ok(Self {
            mantissa,
            scale: frac_part.len() as u8,
        })
    }

    /// A zero threshold admits every wallet
    pub fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }

    /// Threshold expressed in a token's smallest unit, rounded up.
    /// Saturates at `U256::MAX` for absurd decimals.
    pub fn raw_amount(&self, decimals: u8) -> U256 {
        if decimals >= self.scale {
            let factor = pow10(decimals - self.scale).unwrap_or(U256::MAX);
            self.mantissa.saturating_mul(factor)
        } else {
            let divisor = pow10(self.scale - decimals).unwrap_or(U256::MAX);
            let quotient = self.mantissa / divisor;
            if (self.mantissa % divisor).is_zero() {
                quotient
            } else {
                quotient + U256::from(1u64)
            }
        }
    }
}

impl Default for Threshold {
    fn default() -> Self {
        // 0.1 token
        Self {
            mantissa: U256::from(1u64),
            scale: 1,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(self.mantissa, self.scale))
    }
}

impl FromStr for Threshold {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Threshold {
    type Error = GateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Threshold> for String {
    fn from(value: Threshold) -> Self {
        value.to_string()
    }
}

/// 10^exp, or None when it does not fit in a U256
pub fn pow10(exp: u8) -> Option<U256> {
    let ten = U256::from(10u64);
    let mut acc = U256::from(1u64);
    for _ in 0..exp {
        acc = acc.checked_mul(ten)?;
    }
    Some(acc)
}

/// Whether `raw` (in smallest units) reaches `threshold` tokens at `decimals`
pub fn meets_threshold(raw: U256, decimals: u8, threshold: &Threshold) -> bool {
    raw >= threshold.raw_amount(decimals)
}

/// Render a raw amount as a decimal string, trimming trailing zeros
pub fn format_units(raw: U256, decimals: u8) -> String {
    let digits = raw.to_string();
    if decimals == 0 {
        return digits;
    }

    let decimals = decimals as usize;
    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals - digits.len() + 1), digits)
    } else {
        digits
    };

    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let frac_part = frac_part.trim_end_matches('0');

    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac_part)
    }
}

/// Parse a decimal token amount into smallest units (exact, no rounding)
pub fn parse_units(amount: &str, decimals: u8) -> Result<U256, GateError> {
    let parsed = Threshold::parse(amount)?;
    if parsed.scale > decimals {
        return Err(GateError::Config(format!(
            "'{}' has more than {} decimal places",
            amount, decimals
        )));
    }
    let factor = pow10(decimals - parsed.scale)
        .ok_or_else(|| GateError::Config(format!("decimals {} out of range", decimals)))?;
    parsed
        .mantissa
        .checked_mul(factor)
        .ok_or_else(|| GateError::Config(format!("'{}' overflows a uint256", amount)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(amount: &str, decimals: u8) -> U256 {
        parse_units(amount, decimals).unwrap()
    }

    #[test]
    fn test_threshold_raw_amount_per_decimals() {
        let threshold = Threshold::default();
        assert_eq!(threshold.raw_amount(18), U256::from(100_000_000_000_000_000u64));
        assert_eq!(threshold.raw_amount(6), U256::from(100_000u64));
        assert_eq!(threshold.raw_amount(1), U256::from(1u64));
        // 0.1 of an indivisible token rounds up to one unit
        assert_eq!(threshold.raw_amount(0), U256::from(1u64));
    }

    #[test]
    fn test_meets_threshold_boundaries() {
        let threshold = Threshold::default();
        assert!(meets_threshold(units("0.1", 18), 18, &threshold));
        assert!(!meets_threshold(units("0.099999999999999999", 18), 18, &threshold));
        assert!(meets_threshold(units("0.2", 18), 18, &threshold));
        assert!(!meets_threshold(units("0.05", 18), 18, &threshold));
        assert!(meets_threshold(U256::from(100_000u64), 6, &threshold));
        assert!(!meets_threshold(U256::from(99_999u64), 6, &threshold));
        assert!(!meets_threshold(U256::ZERO, 0, &threshold));
        assert!(meets_threshold(U256::from(1u64), 0, &threshold));
    }

    #[test]
    fn test_meets_threshold_huge_balance() {
        assert!(meets_threshold(U256::MAX, MAX_TOKEN_DECIMALS, &Threshold::default()));
    }

    #[test]
    fn test_threshold_parse() {
        assert_eq!(Threshold::parse("0.1").unwrap(), Threshold::default());
        assert_eq!(Threshold::parse(".1").unwrap(), Threshold::default());
        assert_eq!(Threshold::parse("0.10").unwrap(), Threshold::default());
        assert_eq!(Threshold::parse("25").unwrap().raw_amount(2), U256::from(2500u64));
        assert!(Threshold::parse("").is_err());
        assert!(Threshold::parse(".").is_err());
        assert!(Threshold::parse("-1").is_err());
        assert!(Threshold::parse("1e5").is_err());
        assert_eq!(Threshold::parse("1.50").unwrap().to_string(), "1.5");
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(U256::ZERO, 18), "0");
        assert_eq!(format_units(units("0.3", 18), 18), "0.3");
        assert_eq!(format_units(units("1250.5", 18), 18), "1250.5");
        assert_eq!(format_units(U256::from(1u64), 18), "0.000000000000000001");
        assert_eq!(format_units(U256::from(42u64), 0), "42");
        assert_eq!(format_units(U256::from(1_000_000u64), 6), "1");
    }

    #[test]
    fn test_parse_units_rejects_excess_precision() {
        assert!(parse_units("0.0000001", 6).is_err());
        assert_eq!(units("1", 6), U256::from(1_000_000u64));
    }
}
