//! Calendar value types for date/time columns.
//!
//! These are thin wrappers over the integer encodings carried by `Value`
//! (days since the Unix epoch, microseconds since midnight, microseconds
//! since the epoch) with ISO-8601 formatting and parsing.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::row::{FromValue, type_mismatch};
use crate::types::{SqlType, TypeInfo};
use crate::value::Value;
use std::fmt;
use std::str::FromStr;

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

/// A calendar date, stored as days since 1970-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date(i32);

/// A time of day, stored as microseconds since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(i64);

/// A local date-time, stored as microseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

/// A UTC instant, stored as microseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimestampTz(i64);

fn parse_error(expected: &'static str, input: &str) -> Error {
    Error::Type(TypeError {
        expected,
        actual: format!("'{input}'"),
        column: None,
    })
}

// Howard Hinnant's days_from_civil / civil_from_days.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = if month > 2 { month - 3 } else { month + 9 };
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month as u32, day as u32)
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 => 29,
        _ => 28,
    }
}

impl Date {
    /// Build a date from days since the epoch.
    pub const fn from_days(days: i32) -> Self {
        Self(days)
    }

    /// Build a date from a calendar year, month (1-12) and day (1-31).
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(i64::from(year), month) {
            return None;
        }
        let days = days_from_civil(i64::from(year), i64::from(month), i64::from(day));
        i32::try_from(days).ok().map(Self)
    }

    /// Days since the epoch.
    pub const fn days(self) -> i32 {
        self.0
    }

    /// Calendar (year, month, day).
    #[allow(clippy::cast_possible_truncation)]
    pub fn ymd(self) -> (i32, u32, u32) {
        let (y, m, d) = civil_from_days(i64::from(self.0));
        (y as i32, m, d)
    }
}

impl Time {
    /// Build a time from hours, minutes, seconds and microseconds.
    pub fn from_hms_micro(hour: u32, minute: u32, second: u32, micro: u32) -> Option<Self> {
        if hour > 23 || minute > 59 || second > 59 || micro >= 1_000_000 {
            return None;
        }
        let secs = i64::from(hour) * 3600 + i64::from(minute) * 60 + i64::from(second);
        Some(Self(secs * MICROS_PER_SECOND + i64::from(micro)))
    }

    /// A time from microseconds since midnight, wrapped into one day.
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros.rem_euclid(MICROS_PER_DAY))
    }

    /// Microseconds since midnight.
    pub const fn micros(self) -> i64 {
        self.0
    }
}

impl Timestamp {
    /// Combine a date and a time of day.
    pub fn new(date: Date, time: Time) -> Self {
        Self(i64::from(date.days()) * MICROS_PER_DAY + time.micros())
    }

    /// Build from microseconds since the epoch.
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Microseconds since the epoch.
    pub const fn micros(self) -> i64 {
        self.0
    }

    /// Split into date and time of day.
    #[allow(clippy::cast_possible_truncation)]
    pub fn split(self) -> (Date, Time) {
        let days = self.0.div_euclid(MICROS_PER_DAY);
        let tod = self.0.rem_euclid(MICROS_PER_DAY);
        (Date(days as i32), Time(tod))
    }
}

impl TimestampTz {
    /// Build from microseconds since the epoch (UTC).
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Microseconds since the epoch (UTC).
    pub const fn micros(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (y, m, d) = self.ymd();
        write!(f, "{:04}-{:02}-{:02}", y, m, d)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_secs = self.0 / MICROS_PER_SECOND;
        let micros = self.0 % MICROS_PER_SECOND;
        write!(
            f,
            "{:02}:{:02}:{:02}",
            total_secs / 3600,
            (total_secs / 60) % 60,
            total_secs % 60
        )?;
        if micros > 0 {
            write!(f, ".{:06}", micros)?;
        }
        Ok(())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (date, time) = self.split();
        write!(f, "{}T{}", date, time)
    }
}

impl fmt::Display for TimestampTz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Z", Timestamp(self.0))
    }
}

fn parse_u32(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl FromStr for Date {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().splitn(3, '-');
        let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(parse_error("date (YYYY-MM-DD)", s));
        };
        let year = parse_u32(y).and_then(|y| i32::try_from(y).ok());
        match (year, parse_u32(m), parse_u32(d)) {
            (Some(y), Some(m), Some(d)) => {
                Date::from_ymd(y, m, d).ok_or_else(|| parse_error("valid calendar date", s))
            }
            _ => Err(parse_error("date (YYYY-MM-DD)", s)),
        }
    }
}

impl FromStr for Time {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (hms, frac) = match s.split_once('.') {
            Some((hms, frac)) => (hms, Some(frac)),
            None => (s, None),
        };
        let mut parts = hms.splitn(3, ':');
        let (Some(h), Some(m), Some(sec)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(parse_error("time (HH:MM:SS)", s));
        };
        let micro = match frac {
            None => Some(0),
            Some(f) if f.len() <= 6 => parse_u32(f).map(|v| v * 10_u32.pow(6 - f.len() as u32)),
            Some(_) => None,
        };
        match (parse_u32(h), parse_u32(m), parse_u32(sec), micro) {
            (Some(h), Some(m), Some(sec), Some(micro)) => Time::from_hms_micro(h, m, sec, micro)
                .ok_or_else(|| parse_error("valid time of day", s)),
            _ => Err(parse_error("time (HH:MM:SS)", s)),
        }
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some((date, time)) = s.split_once(['T', ' ']) else {
            return Err(parse_error("timestamp (YYYY-MM-DDTHH:MM:SS)", s));
        };
        Ok(Timestamp::new(date.parse()?, time.parse()?))
    }
}

impl FromStr for TimestampTz {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let local = s
            .strip_suffix('Z')
            .or_else(|| s.strip_suffix("+00:00"))
            .ok_or_else(|| parse_error("UTC timestamp (...Z)", s))?;
        Ok(TimestampTz(local.parse::<Timestamp>()?.micros()))
    }
}

macro_rules! temporal_value {
    ($ty:ident, $variant:ident, $sql:ident, $name:literal) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v.0)
            }
        }

        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self> {
                match value {
                    Value::$variant(v) => Ok($ty(*v)),
                    Value::Text(s) => s.parse(),
                    other => Err(type_mismatch($name, other)),
                }
            }
        }

        impl TypeInfo for $ty {
            const SQL_TYPE: SqlType = SqlType::$sql;
        }
    };
}

temporal_value!(Date, Date, Date, "DATE");
temporal_value!(Time, Time, Time, "TIME");
temporal_value!(Timestamp, Timestamp, Timestamp, "TIMESTAMP");
temporal_value!(TimestampTz, TimestampTz, TimestampTz, "TIMESTAMPTZ");
