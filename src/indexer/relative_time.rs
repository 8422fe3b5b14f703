//! Relative timestamp normalization ("2.5 hours ago by uploader")

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static RELATIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(\d+(?:\.\d+)?)\s*(seconds?|secs?|minutes?|mins?|hours?|hrs?|days?|weeks?|wks?|months?|mos?)\b",
    )
    .unwrap()
});

const MINUTE_MS: f64 = 60_000.0;
const HOUR_MS: f64 = 60.0 * MINUTE_MS;
const DAY_MS: f64 = 24.0 * HOUR_MS;

/// Result of normalizing a tracker-supplied relative time
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTime {
    /// Short label such as "3.2 hr ago", or the trimmed input when unparsed
    pub label: String,
    /// Absolute instant; `now` when unparsed
    pub epoch: DateTime<Utc>,
    /// Whether a magnitude and unit were recognized
    pub parsed: bool,
}

#[derive(Debug, Clone, Copy)]
enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl Unit {
    fn from_token(token: &str) -> Option<Self> {
        let token = token.to_lowercase();
        // "mo" has to be checked before "m"-prefixed minute forms
        if token.starts_with("mo") {
            Some(Unit::Month)
        } else if token.starts_with("s") {
            Some(Unit::Second)
        } else if token.starts_with("m") {
            Some(Unit::Minute)
        } else if token.starts_with("h") {
            Some(Unit::Hour)
        } else if token.starts_with("d") {
            Some(Unit::Day)
        } else if token.starts_with("w") {
            Some(Unit::Week)
        } else {
            None
        }
    }

    fn millis(self) -> f64 {
        match self {
            Unit::Second => 1_000.0,
            Unit::Minute => MINUTE_MS,
            Unit::Hour => HOUR_MS,
            Unit::Day => DAY_MS,
            Unit::Week => 7.0 * DAY_MS,
            Unit::Month => 30.0 * DAY_MS,
        }
    }

    fn abbreviation(self, magnitude: f64) -> &'static str {
        match self {
            Unit::Second => "sec",
            Unit::Minute => "min",
            Unit::Hour => "hr",
            Unit::Day if magnitude == 1.0 => "day",
            Unit::Day => "days",
            Unit::Week => "wk",
            Unit::Month => "mo",
        }
    }
}

/// Convert a relative time like "2 hours ago by someone" into an instant.
///
/// Unparseable text falls back to `now` with the trimmed input as label.
pub fn normalize(raw: &str, now: DateTime<Utc>) -> NormalizedTime {
    let text = raw.split(" by ").next().unwrap_or("").trim();

    let fallback = || NormalizedTime {
        label: raw.trim().to_string(),
        epoch: now,
        parsed: false,
    };

    let Some(caps) = RELATIVE_RE.captures(text) else {
        return fallback();
    };

    let magnitude = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
    let unit = caps.get(2).and_then(|m| Unit::from_token(m.as_str()));
    let (Some(magnitude), Some(unit)) = (magnitude, unit) else {
        return fallback();
    };

    let offset_ms = magnitude * unit.millis();
    if !offset_ms.is_finite() || offset_ms >= i64::MAX as f64 {
        return fallback();
    }

    let Some(epoch) = now.checked_sub_signed(Duration::milliseconds(offset_ms as i64)) else {
        return fallback();
    };

    NormalizedTime {
        label: format!(
            "{} {} ago",
            format_magnitude(magnitude),
            unit.abbreviation(magnitude)
        ),
        epoch,
        parsed: true,
    }
}

fn format_magnitude(magnitude: f64) -> String {
    if magnitude.fract() == 0.0 {
        format!("{}", magnitude as i64)
    } else {
        format!("{:.1}", magnitude)
    }
}
