//! View components. Each view owns the live subscription it renders from and
//! produces a serializable render model; the HTTP layer streams those models.

pub mod auth;
pub mod composer;
pub mod conversation;
pub mod directory;
pub mod profile;

use chrono::{DateTime, Utc};

/// Avatar fallback text: first letters of the first and last word, or the
/// first two letters of a single word. `"U"` when there is no name.
pub fn initials(name: Option<&str>) -> String {
    let words: Vec<&str> = name.map(|n| n.split_whitespace().collect()).unwrap_or_default();

    match words.as_slice() {
        [] => "U".to_string(),
        [single] => single.chars().take(2).collect::<String>().to_uppercase(),
        [first, .., last] => first
            .chars()
            .take(1)
            .chain(last.chars().take(1))
            .collect::<String>()
            .to_uppercase(),
    }
}

/// "3 minutes ago" / "in 2 hours", always in a single unit.
pub fn relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    const MINUTE: f64 = 60.0;
    const HOUR: f64 = 60.0 * MINUTE;
    const DAY: f64 = 24.0 * HOUR;
    const MONTH: f64 = 30.0 * DAY;
    const YEAR: f64 = 365.0 * DAY;

    let seconds = now.signed_duration_since(timestamp).num_milliseconds() as f64 / 1000.0;
    let elapsed = seconds.abs();

    let (value, unit) = if elapsed < MINUTE {
        (elapsed, "second")
    } else if elapsed < HOUR {
        (elapsed / MINUTE, "minute")
    } else if elapsed < DAY {
        (elapsed / HOUR, "hour")
    } else if elapsed < MONTH {
        (elapsed / DAY, "day")
    } else if elapsed < YEAR {
        (elapsed / MONTH, "month")
    } else {
        (elapsed / YEAR, "year")
    };

    let count = value.round() as i64;
    let plural = if count == 1 { "" } else { "s" };
    if seconds < 0.0 {
        format!("in {} {}{}", count, unit, plural)
    } else {
        format!("{} {}{} ago", count, unit, plural)
    }
}
