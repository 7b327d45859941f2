//! Base-unit conversions for staking amounts.
//!
//! Both Gwei and nano-AVAX are 10^-9 of the display unit. Chain-wide totals are
//! far beyond the range f64 represents exactly, so they go through integer
//! fixed-point formatting. Per-validator ETH balances are small enough for f64.

use serde_json::Value;

pub const BASE_UNITS_PER_COIN: u128 = 1_000_000_000;
const BASE_UNIT_DECIMALS: usize = 9;

/// Read a non-negative integer amount of base units from a JSON number or numeric string
pub fn parse_base_units(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u as u128)
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as u128)
            }
        }
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            cleaned.parse::<u128>().ok()
        }
        _ => None,
    }
}

/// Format base units with `decimals` fraction digits, truncating toward zero
pub fn format_base_units(amount: u128, decimals: usize) -> String {
    let decimals = decimals.min(BASE_UNIT_DECIMALS);
    let whole = amount / BASE_UNITS_PER_COIN;
    if decimals == 0 {
        return whole.to_string();
    }
    let remainder = amount % BASE_UNITS_PER_COIN;
    let fraction = remainder / 10u128.pow((BASE_UNIT_DECIMALS - decimals) as u32);
    format!("{}.{:0width$}", whole, fraction, width = decimals)
}

/// nano-AVAX to a 2-decimal AVAX string, e.g. `1234567890` -> `"1.23"`
pub fn format_avax(nanos: u128) -> String {
    format_base_units(nanos, 2)
}

/// Same as [`format_avax`] with thousands separators and the ticker
pub fn format_avax_display(nanos: u128) -> String {
    format!("{} AVAX", group_thousands(&format_avax(nanos)))
}

pub fn gwei_to_eth(gwei: f64) -> f64 {
    gwei / 1e9
}

/// Gwei to a 5-decimal ETH string
pub fn format_eth(gwei: f64) -> Option<String> {
    if !gwei.is_finite() {
        return None;
    }
    Some(format!("{:.5}", gwei_to_eth(gwei)))
}

/// Whole-chain stake in Gwei, e.g. `"34,123,456.78 ETH"`
pub fn format_eth_total(gwei: u128) -> String {
    format!("{} ETH", group_thousands(&format_base_units(gwei, 2)))
}

pub fn format_percent(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    Some(format!("{:.2}%", value))
}

/// Insert `,` every three digits of the integer part of a plain decimal string
pub fn group_thousands(number: &str) -> String {
    let (sign, unsigned) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    match frac_part {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}
