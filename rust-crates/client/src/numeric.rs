//! Exact integer helpers for amounts and lottery combinatorics.
//!
//! Token amounts and binomial coefficients quickly outgrow the 53 bits an
//! `f64` can represent exactly, so everything here works on [`BigUint`] and
//! only converts to floating point at the very end, if at all.

use alloy::primitives::U256;
use num_bigint::BigUint;
use num_traits::{
    One,
    ToPrimitive,
    Zero,
};

/// Implied decimal places of token amounts.
pub const TOKEN_DECIMALS: usize = 18;

/// Decimal places of the governance token supply in base units: one billion
/// 18-decimal tokens.
const TOTAL_SUPPLY_DECIMALS: usize = 27;

/// Exact binomial coefficient `n choose k`.
pub fn choose(n: u64, k: u64) -> BigUint {
    if k > n {
        return BigUint::zero();
    }
    let k = k.min(n - k);
    // n * C(n-1, k-1) / k unrolled from the bottom up; every partial product
    // is itself a binomial coefficient so each division is exact.
    let mut result = BigUint::one();
    for i in 1..=k {
        result *= n - k + i;
        result /= i;
    }
    result
}

/// `a / b` as an `f64`, computed from the exact integer quotient and remainder
/// so that the integer part survives even when `a` and `b` exceed `f64`
/// precision.
///
/// Returns `None` when `b` is zero.
pub fn divide_big_ints(a: &BigUint, b: &BigUint) -> Option<f64> {
    if b.is_zero() {
        return None;
    }
    let quotient = a / b;
    let remainder = a % b;
    let integer = quotient.to_f64()?;
    Some(integer + fraction(&remainder, b))
}

/// `remainder / divisor` for `remainder < divisor`.
fn fraction(remainder: &BigUint, divisor: &BigUint) -> f64 {
    // keep both operands inside the f64 exponent range
    let excess = divisor.bits().saturating_sub(f64::MANTISSA_DIGITS as u64 + 11);
    let remainder = remainder >> excess;
    let divisor = divisor >> excess;
    match (remainder.to_f64(), divisor.to_f64()) {
        (Some(r), Some(d)) if d > 0.0 => r / d,
        _ => 0.0,
    }
}

fn decimals_divisor(decimals: usize) -> BigUint {
    BigUint::from(10u8).pow(decimals as u32)
}

/// Formats an 18-decimal fixed-point amount with every decimal place, e.g.
/// `1500000000000000000` as `"1.500000000000000000"`.
pub fn format_amount(value: &BigUint) -> String {
    format_fixed_point(value, TOKEN_DECIMALS)
}

pub fn format_fixed_point(value: &BigUint, decimals: usize) -> String {
    if decimals == 0 {
        return value.to_string();
    }
    let divisor = decimals_divisor(decimals);
    let integer = value / &divisor;
    let fractional = (value % &divisor).to_string();
    format!("{integer}.{fractional:0>decimals$}")
}

/// Formats an 18-decimal amount keeping only `places` decimals, truncating
/// (not rounding) the rest.
pub fn format_amount_truncated(value: &BigUint, places: usize) -> String {
    let places = places.min(TOKEN_DECIMALS);
    let truncated = value / decimals_divisor(TOKEN_DECIMALS - places);
    format_fixed_point(&truncated, places)
}

/// Parses a decimal such as `"12.5"` into an 18-decimal amount. More than 18
/// fractional digits is rejected rather than rounded.
pub fn parse_amount(text: &str) -> Option<BigUint> {
    parse_fixed_point(text, TOKEN_DECIMALS)
}

pub fn parse_fixed_point(text: &str, decimals: usize) -> Option<BigUint> {
    let text = text.trim();
    let (integer, fractional) = text.split_once('.').unwrap_or((text, ""));
    if integer.len() + fractional.len() == 0
        || fractional.len() > decimals
        || !integer.chars().chain(fractional.chars()).all(|c| c.is_ascii_digit())
    {
        return None;
    }
    format!("{integer}{fractional:0<decimals$}").parse().ok()
}

pub fn governance_total_supply() -> BigUint {
    decimals_divisor(TOTAL_SUPPLY_DECIMALS)
}

/// Sale tokens `currency` buys at `price` currency units per whole token.
/// `None` for a zero price.
pub fn tokens_for_currency(currency: &BigUint, price: &BigUint) -> Option<BigUint> {
    if price.is_zero() {
        return None;
    }
    Some(currency * decimals_divisor(TOKEN_DECIMALS) / price)
}

pub fn currency_for_tokens(tokens: &BigUint, price: &BigUint) -> BigUint {
    tokens * price / decimals_divisor(TOKEN_DECIMALS)
}

/// Fraction of the governance token supply that `tokens` represent.
pub fn supply_share(tokens: &BigUint) -> f64 {
    divide_big_ints(tokens, &governance_total_supply()).unwrap_or_default()
}

/// Tokens making up `share` of the supply. The share keeps 18 decimals.
/// `None` outside `[0, 1]`.
pub fn tokens_for_share(share: f64) -> Option<BigUint> {
    if !(0.0..=1.0).contains(&share) {
        return None;
    }
    let scaled = (share * 1e18).round() as u128;
    Some(BigUint::from(scaled) * decimals_divisor(TOTAL_SUPPLY_DECIMALS - TOKEN_DECIMALS))
}

pub fn u256_to_big(value: U256) -> BigUint {
    BigUint::from_bytes_be(&value.to_be_bytes::<32>())
}

/// Converts back to the on-chain representation. `None` if the value does not
/// fit in 256 bits.
pub fn big_to_u256(value: &BigUint) -> Option<U256> {
    let bytes = value.to_bytes_be();
    if bytes.len() > 32 {
        return None;
    }
    Some(U256::from_be_slice(&bytes))
}

/// Serializes a big integer as its decimal string.
pub fn serialize_decimal<S: serde::Serializer>(
    value: &BigUint,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub fn serialize_optional_decimal<S: serde::Serializer>(
    value: &Option<BigUint>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(value) => serializer.collect_str(value),
        None => serializer.serialize_none(),
    }
}

/// Serializes per-tier amounts as decimal strings.
pub fn serialize_decimal_tiers<S: serde::Serializer>(
    values: &[BigUint; 5],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(values.iter().map(BigUint::to_string))
}

/// Rounds to two decimal places, the precision odds are displayed with.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
