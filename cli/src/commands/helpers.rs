use chrono::DateTime;

use aquakeeper_core::models::Range;

/// Render an optional reading, `-` when absent.
pub(crate) fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Render an optional reading with fixed precision, `-` when absent.
pub(crate) fn fmt_opt_prec(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

pub(crate) fn fmt_range(range: Option<Range>) -> String {
    range.map_or_else(|| "-".to_string(), |r| r.to_string())
}

/// `2024-06-15T10:00:00.000000Z` -> `2024-06-15 10:00`; unparseable input is returned as is.
pub(crate) fn short_timestamp(iso: &str) -> String {
    DateTime::parse_from_rfc3339(iso)
        .map_or_else(|_| iso.to_string(), |dt| dt.format("%Y-%m-%d %H:%M").to_string())
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
