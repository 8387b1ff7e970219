//! Working-hours gate
//!
//! A pure predicate over wall time. Windows are half-open `[start, end)` in
//! local time of a fixed UTC offset; an `end` earlier than `start` wraps past
//! midnight.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, Utc};

/// Errors raised while parsing window settings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("Invalid time of day '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("Invalid timezone '{0}', expected UTC or an offset like +09:00")]
    InvalidTimezone(String),

    #[error("Working hours start and end are both {0}")]
    EmptyWindow(NaiveTime),
}

/// Resolved dialing window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub offset: FixedOffset,
}

impl WorkingHours {
    /// Window that never closes
    pub fn always_open() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
            offset: utc(),
        }
    }

    /// Parse `"HH:MM"` bounds and a timezone string
    pub fn parse(enabled: bool, start: &str, end: &str, timezone: &str) -> Result<Self, GateError> {
        let start = parse_time_of_day(start)?;
        let end = parse_time_of_day(end)?;
        if enabled && start == end {
            return Err(GateError::EmptyWindow(start));
        }

        Ok(Self {
            enabled,
            start,
            end,
            offset: parse_utc_offset(timezone)?,
        })
    }

    fn contains(&self, local: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= local && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self::always_open()
    }
}

/// Stateless working-hours predicate
pub struct WorkingHoursGate;

impl WorkingHoursGate {
    /// Whether dialing is allowed at `now`
    pub fn is_open(now: DateTime<Utc>, window: &WorkingHours) -> bool {
        if !window.enabled {
            return true;
        }
        let local = now.with_timezone(&window.offset).time();
        window.contains(local)
    }

    /// Time until the window next opens; zero when already open
    pub fn until_open(now: DateTime<Utc>, window: &WorkingHours) -> Duration {
        if Self::is_open(now, window) {
            return Duration::zero();
        }
        let local = now.with_timezone(&window.offset).time();
        let wait = window.start - local;
        if wait < Duration::zero() {
            wait + Duration::days(1)
        } else {
            wait
        }
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

/// Parse `"HH:MM"` or `"HH:MM:SS"`
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, GateError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| GateError::InvalidTime(s.to_string()))
}

/// Parse `"UTC"`, `"Z"`, `"+HH:MM"`, `"-HH:MM"` or `"UTC+HH:MM"`
pub fn parse_utc_offset(tz: &str) -> Result<FixedOffset, GateError> {
    let invalid = || GateError::InvalidTimezone(tz.to_string());
    let trimmed = tz.trim();
    let upper = trimmed.to_ascii_uppercase();

    if matches!(upper.as_str(), "UTC" | "Z" | "GMT" | "") {
        return Ok(utc());
    }

    let rest = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper);

    let (sign, digits) = match rest.as_bytes().first() {
        Some(b'+') => (1, &rest[1..]),
        Some(b'-') => (-1, &rest[1..]),
        _ => return Err(invalid()),
    };

    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 && digits.is_ascii() => digits.split_at(2),
        None => (digits, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
