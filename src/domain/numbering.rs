/// Format an invoice number as "{year}-{n}".
pub fn format_invoice_number(year: i32, sequence: u64) -> String {
    format!("{}-{}", year, sequence)
}

/// Parse the sequence part of a "{year}-{n}" number for the given year.
/// Returns None for numbers of another year or with a malformed suffix.
pub fn parse_sequence(year: i32, invoice_number: &str) -> Option<u64> {
    let prefix = format!("{}-", year);
    let suffix = invoice_number.trim().strip_prefix(&prefix)?;
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Next sequence number for a year: highest well-formed suffix + 1, or 1.
/// Saturates at `u64::MAX`; the unique number index then rejects the insert.
pub fn next_sequence<'a>(year: i32, existing: impl IntoIterator<Item = &'a str>) -> u64 {
    existing
        .into_iter()
        .filter_map(|number| parse_sequence(year, number))
        .max()
        .map_or(1, |max| max.saturating_add(1))
}
