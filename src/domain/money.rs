use std::fmt;

/// Money is represented as integer cents to avoid floating-point precision issues.
/// For TND/EUR, 1 unit = 100 cents, so 50.00 = 5000 cents.
pub type Cents = i64;

/// Format cents as a plain decimal string (no currency, no locale).
/// Example: 5000 -> "50.00", -1234 -> "-12.34"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs_cents = cents.abs();
    format!("{}{}.{:02}", sign, abs_cents / 100, abs_cents % 100)
}

/// Parse a decimal string into cents.
/// Example: "50.00" -> 5000, "12.5" -> 1250, "100" -> 10000.
/// A comma is accepted as decimal separator ("12,50").
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let normalized = input.trim().replace(',', ".");
    let negative = normalized.starts_with('-');
    let body = normalized.trim_start_matches('-');

    let (units_str, decimal_str) = match body.split_once('.') {
        Some((units, decimals)) if !decimals.contains('.') => (units, decimals),
        Some(_) => return Err(ParseCentsError::InvalidFormat),
        None => (body, ""),
    };

    if units_str.is_empty() && decimal_str.is_empty() {
        return Err(ParseCentsError::InvalidFormat);
    }

    let units: i64 = if units_str.is_empty() {
        0
    } else {
        units_str
            .parse()
            .map_err(|_| ParseCentsError::InvalidFormat)?
    };

    if !decimal_str.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseCentsError::InvalidFormat);
    }
    // Pad or truncate to 2 digits; all ASCII from here, so byte slicing is safe
    let decimal_cents: i64 = match decimal_str.len() {
        0 => 0,
        1 => parse_digits(decimal_str)? * 10,
        _ => parse_digits(&decimal_str[..2])?,
    };

    let cents = units
        .checked_mul(100)
        .and_then(|c| c.checked_add(decimal_cents))
        .ok_or(ParseCentsError::Overflow)?;
    Ok(if negative { -cents } else { cents })
}

fn parse_digits(s: &str) -> Result<i64, ParseCentsError> {
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseCentsError::InvalidFormat);
    }
    s.parse().map_err(|_| ParseCentsError::InvalidFormat)
}

/// Percentage of an amount, rounded half away from zero to the cent.
/// Example: percent_of(10000, 19.0) -> 1900
pub fn percent_of(cents: Cents, percentage: f64) -> Cents {
    (cents as f64 * percentage / 100.0).round() as Cents
}

/// Tax-excluded amount -> tax-included amount.
pub fn ht_to_ttc(ht: Cents, tax_percentage: f64) -> Cents {
    ht + percent_of(ht, tax_percentage)
}

/// Tax-included amount -> tax-excluded amount.
pub fn ttc_to_ht(ttc: Cents, tax_percentage: f64) -> Cents {
    if tax_percentage <= 0.0 {
        return ttc;
    }
    (ttc as f64 / (1.0 + tax_percentage / 100.0)).round() as Cents
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCentsError {
    InvalidFormat,
    Overflow,
}

impl fmt::Display for ParseCentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCentsError::InvalidFormat => write!(f, "invalid money format"),
            ParseCentsError::Overflow => write!(f, "amount is too large"),
        }
    }
}

impl std::error::Error for ParseCentsError {}
