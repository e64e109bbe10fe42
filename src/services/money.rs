use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An amount in minor currency units (pence, cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub currency: String,
    pub amount: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid argument: cannot split money into {0} parts.")]
    InvalidPartCount(i64),
    #[error("Invalid argument: {0} is outside the representable money range.")]
    Overflow(&'static str),
}

pub fn create_money(currency: &str, amount: i64) -> Money {
    Money {
        currency: currency.to_string(),
        amount,
    }
}

/// Splits `total` into `parts` amounts that sum exactly to `total.amount`.
///
/// Every part receives `|total| / parts`; the first `|total| % parts` parts
/// receive one extra minor unit. Negative totals are split by magnitude and
/// then negated, so earlier parts always carry the larger magnitude.
pub fn split_money_evenly(total: &Money, parts: i64) -> Result<Vec<Money>, MoneyError> {
    if parts <= 0 {
        return Err(MoneyError::InvalidPartCount(parts));
    }

    let magnitude = i128::from(total.amount).abs();
    let count = i128::from(parts);
    let base = magnitude / count;
    let remainder = magnitude % count;
    let sign: i128 = if total.amount < 0 { -1 } else { 1 };

    let split = (0..count)
        .map(|index| {
            let share = if index < remainder { base + 1 } else { base };
            // |share| <= |total.amount|, so narrowing back is lossless.
            create_money(&total.currency, (sign * share) as i64)
        })
        .collect();
    Ok(split)
}

/// Display formatting only; never feed the result back into arithmetic.
pub fn format_money(money: &Money) -> String {
    let code = money.currency.trim().to_ascii_uppercase();
    let exponent = minor_unit_exponent(&code);
    let magnitude = money.amount.unsigned_abs();
    let divisor = 10_u64.pow(exponent);
    let whole = group_thousands(magnitude / divisor);

    let number = if exponent == 0 {
        whole
    } else {
        format!(
            "{whole}.{:0width$}",
            magnitude % divisor,
            width = exponent as usize
        )
    };

    let sign = if money.amount < 0 { "-" } else { "" };
    match currency_symbol(&code) {
        Some(symbol) => format!("{sign}{symbol}{number}"),
        None => format!("{sign}{code} {number}"),
    }
}

fn minor_unit_exponent(code: &str) -> u32 {
    match code {
        "JPY" | "KRW" | "PYG" | "VND" | "CLP" => 0,
        _ => 2,
    }
}

fn currency_symbol(code: &str) -> Option<&'static str> {
    match code {
        "GBP" => Some("£"),
        "EUR" => Some("€"),
        "USD" => Some("$"),
        _ => None,
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, character) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(character);
    }
    grouped
}
