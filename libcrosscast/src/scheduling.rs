//! Schedule string parsing
//!
//! Turns what a user types after `--at` into an absolute UTC instant.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::error::{CrosscastError, Result};

/// Parse a schedule string relative to `now`
///
/// Supports, in order of precedence:
/// - RFC 3339 timestamps: "2026-11-20T15:00:00Z"
/// - Plain UTC date and time: "2026-11-20 15:00"
/// - Relative durations: "30m", "2h", "1 hour"
/// - Natural language: "tomorrow", "next monday 10am"
///
/// # Errors
///
/// Returns `InvalidInput` when the string is empty, cannot be parsed, or
/// names an absolute time already in the past.
pub fn parse_schedule(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CrosscastError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if let Some(at) = parse_absolute(input) {
        if at < now {
            return Err(CrosscastError::InvalidInput(format!(
                "Scheduled time {} is in the past",
                at.to_rfc3339()
            )));
        }
        return Ok(at);
    }

    if let Ok(duration) = parse_duration(input) {
        return Ok(now + duration);
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us).map_err(|e| {
        CrosscastError::InvalidInput(format!("Could not parse schedule '{}': {}", input, e))
    })
}

fn parse_absolute(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        return Some(at.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(input, format).ok())
        .map(|naive| naive.and_utc())
}

/// Parse a relative duration such as "90s", "30m" or "2 hours"
pub fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input)
        .map_err(|e| CrosscastError::InvalidInput(format!("Could not parse duration: {}", e)))?;

    Duration::from_std(std_duration)
        .map_err(|_| CrosscastError::InvalidInput("Duration out of range".to_string()))
}
