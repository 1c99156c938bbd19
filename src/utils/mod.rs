//! Number formatting for CLI output
//!
//! Swedish conventions: space as thousands separator, comma as decimal
//! separator, `kr` suffix for amounts.

use rust_decimal::Decimal;

/// Currency suffix options for formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencySuffix {
    /// Append " kr"
    Sek,
    /// Bare number (table cells)
    None,
}

/// Group the integer digits of an already rounded, unsigned number
fn group_thousands(integer_part: &str) -> String {
    let digits: Vec<char> = integer_part.chars().collect();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(*c);
    }
    grouped
}

/// Format `value` with `decimals` fraction digits, right-aligned to `width`.
///
/// ```
/// use lotledger::utils::{format_number, CurrencySuffix};
/// use rust_decimal_macros::dec;
///
/// assert_eq!(format_number(dec!(1234.56), 2, 0, CurrencySuffix::Sek), "1 234,56 kr");
/// assert_eq!(format_number(dec!(-5), 1, 6, CurrencySuffix::None), "  -5,0");
/// ```
pub fn format_number(value: Decimal, decimals: u32, width: usize, suffix: CurrencySuffix) -> String {
    let rounded = value.round_dp(decimals);
    let is_negative = rounded < Decimal::ZERO;
    let formatted = format!("{:.*}", decimals as usize, rounded.abs());

    let (integer_part, fraction) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let mut result = String::new();
    if is_negative {
        result.push('-');
    }
    result.push_str(&group_thousands(integer_part));
    if let Some(f) = fraction {
        result.push(',');
        result.push_str(f);
    }
    if suffix == CurrencySuffix::Sek {
        result.push_str(" kr");
    }

    if width > 0 {
        format!("{:>width$}", result, width = width)
    } else {
        result
    }
}

/// Format an amount as "1 234,56 kr"
pub fn format_sek(value: Decimal) -> String {
    format_number(value, 2, 0, CurrencySuffix::Sek)
}

/// Format an amount without suffix, whole kronor
pub fn format_amount(value: Decimal) -> String {
    format_number(value, 0, 0, CurrencySuffix::None)
}

/// Format a percentage with one decimal, e.g. "12,3 %"
pub fn format_percent(value: Decimal) -> String {
    format!("{} %", format_number(value, 1, 0, CurrencySuffix::None))
}

/// Percentage or "-" when absent
pub fn format_optional_percent(value: Option<Decimal>) -> String {
    value.map(format_percent).unwrap_or_else(|| "-".to_string())
}
