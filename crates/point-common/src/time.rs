//! Time handling: temporal aggregation units and lenient date parsing.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Timestamp layouts accepted in source files and query parameters.
pub const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Date layouts accepted in source files and query parameters.
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Time-of-day layouts accepted in source files.
pub const TIME_FORMATS: &[&str] = &[
    "%H:%M:%S",
    "%H:%M:%S%.f",
    "%H:%M",
    "%I:%M:%S %p",
    "%I:%M %p",
];

/// Parse a calendar date in one of [`DATE_FORMATS`].
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Parse a time of day in one of [`TIME_FORMATS`].
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}

/// Parse a full timestamp (date and time of day).
///
/// RFC 3339 input with an offset is accepted; the offset is applied and the
/// result expressed as naive UTC, which is how `TIMESTAMP` columns store it.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Parse a query-parameter datetime: a full timestamp or a bare date
/// (interpreted as midnight).
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, TimeParseError> {
    if let Some(ts) = parse_timestamp(s) {
        return Ok(ts);
    }
    if let Some(date) = parse_date(s) {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    Err(TimeParseError::InvalidFormat(s.to_string()))
}

/// Temporal unit used to bucket time-series counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggUnit {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl AggUnit {
    pub const ALL: [AggUnit; 5] = [
        AggUnit::Day,
        AggUnit::Week,
        AggUnit::Month,
        AggUnit::Quarter,
        AggUnit::Year,
    ];

    pub fn parse(s: &str) -> Result<Self, TimeParseError> {
        match s {
            "day" => Ok(AggUnit::Day),
            "week" => Ok(AggUnit::Week),
            "month" => Ok(AggUnit::Month),
            "quarter" => Ok(AggUnit::Quarter),
            "year" => Ok(AggUnit::Year),
            other => Err(TimeParseError::InvalidAggregation(other.to_string())),
        }
    }

    /// The `date_trunc` field name for this unit.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggUnit::Day => "day",
            AggUnit::Week => "week",
            AggUnit::Month => "month",
            AggUnit::Quarter => "quarter",
            AggUnit::Year => "year",
        }
    }

    /// Start of the bucket containing `ts`, matching Postgres `date_trunc`
    /// (weeks start on Monday).
    pub fn truncate(&self, ts: NaiveDateTime) -> NaiveDateTime {
        let date = ts.date();
        let start = match self {
            AggUnit::Day => date,
            AggUnit::Week => {
                date - Duration::days(date.weekday().num_days_from_monday() as i64)
            }
            AggUnit::Month => first_of_month(date.year(), date.month()),
            AggUnit::Quarter => first_of_month(date.year(), (date.month0() / 3) * 3 + 1),
            AggUnit::Year => first_of_month(date.year(), 1),
        };
        start.and_time(NaiveTime::MIN)
    }
}

impl std::fmt::Display for AggUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    // Month is always 1..=12 here.
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TimeParseError {
    #[error("Invalid datetime format: {0}")]
    InvalidFormat(String),

    #[error("'{0}' is an invalid temporal aggregation")]
    InvalidAggregation(String),
}
