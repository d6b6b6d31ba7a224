//! Decimal string <-> integer base-unit conversion.
//!
//! Exact arithmetic on `U256`; no floating point anywhere on the amount path.

use alloy::primitives::U256;

use crate::error::AmountError;

/// Parse a non-negative decimal string into base units (`amount * 10^decimals`).
///
/// More fractional digits than `decimals` is an error rather than a silent
/// truncation.
pub fn parse_units(amount: &str, decimals: u8) -> Result<U256, AmountError> {
    let raw = amount.trim();
    if raw.is_empty() {
        return Err(AmountError::Malformed("empty amount".to_owned()));
    }
    if raw.starts_with('-') {
        return Err(AmountError::NonPositive);
    }
    let raw = raw.strip_prefix('+').unwrap_or(raw);

    let (int_part, frac_part) = match raw.split_once('.') {
        Some((i, f)) => (i, f),
        None => (raw, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(AmountError::Malformed(amount.to_owned()));
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(AmountError::Malformed(amount.to_owned()));
    }

    let frac_trimmed = frac_part.trim_end_matches('0');
    if frac_trimmed.len() > decimals as usize {
        return Err(AmountError::TooManyDecimals { decimals });
    }

    let mut digits = String::with_capacity(int_part.len() + decimals as usize);
    digits.push_str(int_part);
    digits.push_str(frac_trimmed);
    for _ in frac_trimmed.len()..decimals as usize {
        digits.push('0');
    }
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10).map_err(|e| AmountError::Malformed(format!("{amount}: {e}")))
}

/// Render base units as a decimal string with trailing zeros trimmed,
/// e.g. `1500000` at 6 decimals is `"1.5"`.
pub fn format_units(value: U256, decimals: u8) -> String {
    let digits = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }

    let (int_part, frac_part) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_owned(), digits[split..].to_owned())
    } else {
        ("0".to_owned(), format!("{digits:0>decimals$}"))
    };

    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        format!("{int_part}.0")
    } else {
        format!("{int_part}.{frac_part}")
    }
}

/// Number of fractional digits in a decimal string, ignoring trailing zeros.
pub(crate) fn scale_of(amount: &str) -> usize {
    amount
        .trim()
        .split_once('.')
        .map(|(_, f)| f.trim_end_matches('0').len())
        .unwrap_or(0)
}
