//! Time parsing and formatting utilities

use crate::error::{ClipperError, ClipperResult};

/// Parse `SS`, `MM:SS` or `HH:MM:SS` into seconds.
///
/// The last component may carry a fraction (`01:30.5`). Minutes in the
/// two-part form are unbounded so `62:03` parses as 3723 seconds.
pub fn parse_time(time_str: &str) -> ClipperResult<f64> {
    let trimmed = time_str.trim();
    let invalid = || ClipperError::InvalidTimeFormat {
        time: time_str.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid());
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    let (leading, last) = match parts.split_last() {
        Some((last, leading)) if leading.len() <= 2 => (leading, *last),
        _ => return Err(invalid()),
    };

    let seconds = parse_seconds_component(last).ok_or_else(invalid)?;
    let mut units = Vec::with_capacity(leading.len());
    for part in leading {
        units.push(parse_whole_component(part).ok_or_else(invalid)?);
    }

    match units.as_slice() {
        [] => Ok(seconds),
        [minutes] => {
            if seconds >= 60.0 {
                return Err(invalid());
            }
            Ok(*minutes as f64 * 60.0 + seconds)
        }
        [hours, minutes] => {
            if *minutes >= 60 || seconds >= 60.0 {
                return Err(invalid());
            }
            Ok(*hours as f64 * 3600.0 + *minutes as f64 * 60.0 + seconds)
        }
        _ => Err(invalid()),
    }
}

fn parse_whole_component(part: &str) -> Option<u64> {
    let part = part.trim();
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

fn parse_seconds_component(part: &str) -> Option<f64> {
    let part = part.trim();
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    part.parse::<f64>().ok().filter(|s| s.is_finite())
}

/// Format seconds as `MM:SS`, truncating fractions; minutes are not wrapped
pub fn format_time(seconds: f64) -> String {
    let total = whole_seconds(seconds);
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Format seconds as `HH:MM:SS`, truncating fractions
pub fn format_time_hms(seconds: f64) -> String {
    let total = whole_seconds(seconds);
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

fn whole_seconds(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    }
}
