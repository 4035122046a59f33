//! Formatting utilities for CLI output.

/// Format a large number with commas for readability.
///
/// # Examples
///
/// ```
/// use sf_cli_common::format_number;
///
/// assert_eq!(format_number(0), "0");
/// assert_eq!(format_number(1234), "1,234");
/// assert_eq!(format_number(1234567), "1,234,567");
/// ```
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}

/// Format a per-second rate, rounding to a whole number above 100.
///
/// ```
/// use sf_cli_common::format_rate;
///
/// assert_eq!(format_rate(12345.6, "rows"), "12,346 rows/sec");
/// assert_eq!(format_rate(2.25, "rows"), "2.2 rows/sec");
/// ```
pub fn format_rate(per_second: f64, unit: &str) -> String {
    if per_second >= 100.0 {
        format!("{} {unit}/sec", format_number(per_second.round() as u64))
    } else {
        format!("{per_second:.1} {unit}/sec")
    }
}
