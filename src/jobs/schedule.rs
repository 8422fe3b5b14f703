//! Scan cadence
//!
//! A [`Schedule`] is an interval unit plus a magnitude. Free text ("30m",
//! "2h", "1d") is only accepted at the configuration boundary via
//! [`FromStr`]; everything else works with the enum.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid schedule '{0}', expected <n>m, <n>h or <n>d")]
    Invalid(String),
    #[error("every {value}{unit} is out of range (1-{max})")]
    OutOfRange { value: u32, unit: char, max: u32 },
}

/// How often a scan runs, with cron `*/n` alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Minutes 1-59, aligned to the top of the hour
    EveryMinutes(u32),
    /// Hours 1-23, aligned to midnight
    EveryHours(u32),
    /// Days 1-31, aligned to the first of the month
    EveryDays(u32),
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::EveryHours(2)
    }
}

impl Schedule {
    pub fn minutes(n: u32) -> Result<Self, ScheduleError> {
        check(n, 'm', 59).map(Schedule::EveryMinutes)
    }

    pub fn hours(n: u32) -> Result<Self, ScheduleError> {
        check(n, 'h', 23).map(Schedule::EveryHours)
    }

    pub fn days(n: u32) -> Result<Self, ScheduleError> {
        check(n, 'd', 31).map(Schedule::EveryDays)
    }

    /// Six-field cron expression (with seconds) for the job scheduler
    pub fn to_cron(&self) -> String {
        match self {
            Schedule::EveryMinutes(n) => format!("0 */{} * * * *", n),
            Schedule::EveryHours(n) => format!("0 0 */{} * * *", n),
            Schedule::EveryDays(n) => format!("0 0 0 */{} * *", n),
        }
    }

    /// First fire time strictly after `now`
    pub fn next_fire_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = now.with_nanosecond(0).unwrap_or(now);
        let floor_minute = now - Duration::seconds(i64::from(now.second()));

        match *self {
            Schedule::EveryMinutes(n) => {
                let mut candidate = floor_minute + Duration::minutes(1);
                while candidate.minute() % n != 0 {
                    candidate += Duration::minutes(1);
                }
                candidate
            }
            Schedule::EveryHours(n) => {
                let floor_hour = floor_minute - Duration::minutes(i64::from(now.minute()));
                let mut candidate = floor_hour + Duration::hours(1);
                while candidate.hour() % n != 0 {
                    candidate += Duration::hours(1);
                }
                candidate
            }
            Schedule::EveryDays(n) => {
                let floor_day = floor_minute
                    - Duration::minutes(i64::from(now.minute()))
                    - Duration::hours(i64::from(now.hour()));
                let mut candidate = floor_day + Duration::days(1);
                while (candidate.day() - 1) % n != 0 {
                    candidate += Duration::days(1);
                }
                candidate
            }
        }
    }
}

fn check(value: u32, unit: char, max: u32) -> Result<u32, ScheduleError> {
    if (1..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ScheduleError::OutOfRange { value, unit, max })
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let invalid = || ScheduleError::Invalid(s.clone());

        let unit = s.chars().last().ok_or_else(invalid)?;
        let value: u32 = s[..s.len() - unit.len_utf8()]
            .trim()
            .parse()
            .map_err(|_| invalid())?;

        match unit {
            'm' => Schedule::minutes(value),
            'h' => Schedule::hours(value),
            'd' => Schedule::days(value),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::EveryMinutes(n) => write!(f, "{}m", n),
            Schedule::EveryHours(n) => write!(f, "{}h", n),
            Schedule::EveryDays(n) => write!(f, "{}d", n),
        }
    }
}
