//! Display-string normalization for dates and phone numbers.
//!
//! Student birth dates are stored as display strings, not structured dates,
//! so every ingest path funnels through [`normalize_date`] to get a single
//! canonical `dd-mm-yyyy` shape.

use chrono::{Datelike, Duration, NaiveDate};

/// Marker returned for input no parser recognizes.
pub const INVALID_DATE: &str = "Invalid Date";

/// Normalize a heterogeneous date string to `dd-mm-yyyy`.
///
/// Accepts slash/dash/dot separated day-first dates, ISO `yyyy-mm-dd`,
/// and a handful of month-name spellings. Blank input maps to an empty
/// string; anything unparseable maps to [`INVALID_DATE`]. Never fails.
pub fn normalize_date(input: &str) -> String {
    let input = input.trim();
    if input.is_empty() {
        return String::new();
    }

    // Month names and the like go through the textual parser first.
    if input.chars().any(|c| c.is_ascii_alphabetic()) {
        if let Some(date) = parse_textual(input) {
            return format_dmy(date);
        }
    }

    if let Some(sep) = ['/', '-', '.'].into_iter().find(|s| input.contains(*s)) {
        let parts: Vec<&str> = input.split(sep).map(str::trim).collect();
        if parts.len() == 3 {
            // A leading 4-digit part means yyyy-mm-dd; otherwise day-first.
            let (d, m, y) = if parts[0].len() == 4 {
                (parts[2], parts[1], parts[0])
            } else {
                (parts[0], parts[1], parts[2])
            };
            if let (Ok(d), Ok(m), Ok(y)) = (d.parse::<u32>(), m.parse::<u32>(), y.parse::<i32>())
            {
                // from_ymd_opt rejects impossible dates such as Feb 31.
                if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                    return format_dmy(date);
                }
            }
        }
    }

    if let Some(date) = parse_textual(input) {
        return format_dmy(date);
    }

    INVALID_DATE.to_string()
}

fn parse_textual(input: &str) -> Option<NaiveDate> {
    const FORMATS: [&str; 8] = [
        "%B %d, %Y", "%b %d, %Y", "%B %d %Y", "%b %d %Y", "%d %B %Y", "%d %b %Y", "%d %B, %Y",
        "%Y%m%d",
    ];
    FORMATS
        .into_iter()
        .find_map(|f| NaiveDate::parse_from_str(input, f).ok())
}

fn format_dmy(date: NaiveDate) -> String {
    format!("{:02}-{:02}-{}", date.day(), date.month(), date.year())
}

/// Convert a spreadsheet serial day count to `dd-mm-yyyy`.
///
/// Serial 0 is 1899-12-30, so serial 25569 lands on 1970-01-01. Fractional
/// day parts (times) are discarded.
pub fn serial_date_to_dmy(serial: f64) -> Option<String> {
    if !serial.is_finite() {
        return None;
    }
    let days = serial.floor() as i64;
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let date = base.checked_add_signed(Duration::days(days))?;
    Some(format_dmy(date))
}

/// Left-pad a phone number with zeros to the minimum 10-digit width.
/// Longer input is returned unchanged; digit content is not validated here.
pub fn normalize_phone(phone: &str) -> String {
    format!("{:0>10}", phone.trim())
}
