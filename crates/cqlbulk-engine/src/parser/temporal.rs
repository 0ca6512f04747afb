//! Timestamp, date and time parsers driven by chrono format strings

use super::ParseError;
use crate::types::CqlValue;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Timelike, Utc};
use std::fmt::{Display, Write};

/// Default date pattern
pub const DEFAULT_DATE_PATTERN: &str = "%Y-%m-%d";

/// Default time-of-day pattern; fractional seconds are optional
pub const DEFAULT_TIME_PATTERN: &str = "%H:%M:%S%.f";

/// Checks that a chrono pattern contains no invalid specifiers.
pub fn validate_pattern(pattern: &str) -> bool {
    !StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error))
}

/// Whether `pattern` can write timestamps
pub fn fits_timestamp(pattern: &str) -> bool {
    validate_pattern(pattern) && TimestampParser::new(Some(pattern.to_string())).format(&sample_timestamp()).is_ok()
}

/// Whether `pattern` can write dates; time-of-day specifiers cannot
pub fn fits_date(pattern: &str) -> bool {
    validate_pattern(pattern) && DateParser::new(Some(pattern.to_string())).format(&sample_date()).is_ok()
}

/// Whether `pattern` can write times; calendar specifiers cannot
pub fn fits_time(pattern: &str) -> bool {
    validate_pattern(pattern) && TimeParser::new(Some(pattern.to_string())).format(&sample_time()).is_ok()
}

fn sample_timestamp() -> CqlValue {
    CqlValue::Timestamp(Utc.with_ymd_and_hms(2000, 1, 2, 3, 4, 5).single().unwrap_or_default())
}

fn sample_date() -> CqlValue {
    CqlValue::Date(NaiveDate::from_ymd_opt(2000, 1, 2).unwrap_or_default())
}

fn sample_time() -> CqlValue {
    CqlValue::Time(NaiveTime::from_hms_opt(3, 4, 5).unwrap_or_default())
}

/// Renders chrono's delayed format, which fails when the pattern asks for a
/// field the value does not have.
fn render(formatted: impl Display, kind: &'static str, pattern: &str) -> Result<String, ParseError> {
    let mut out = String::new();
    write!(out, "{formatted}").map_err(|_| ParseError::Pattern { kind, pattern: pattern.to_string() })?;
    Ok(out)
}

/// Timestamp parser
///
/// Without a pattern, reads RFC 3339 (also accepting a space instead of `T`)
/// and writes RFC 3339 in UTC with millisecond precision. With a pattern,
/// text without an offset is taken as UTC and a date-only pattern yields
/// midnight. Values are truncated to milliseconds, the column precision.
#[derive(Debug, Clone, Default)]
pub struct TimestampParser {
    pattern: Option<String>,
}

impl TimestampParser {
    pub fn new(pattern: Option<String>) -> Self {
        Self { pattern }
    }

    pub fn parse(&self, text: &str) -> Result<CqlValue, ParseError> {
        let text = text.trim();
        let parsed = match &self.pattern {
            Some(pattern) => parse_with_pattern(text, pattern),
            None => parse_default(text),
        };
        parsed
            .map(|dt| CqlValue::Timestamp(truncate_millis(dt)))
            .ok_or_else(|| ParseError::invalid("timestamp", text))
    }

    pub fn format(&self, value: &CqlValue) -> Result<String, ParseError> {
        match value {
            CqlValue::Timestamp(dt) => match &self.pattern {
                Some(pattern) => render(dt.format(pattern), "timestamp", pattern),
                None => Ok(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            },
            other => Err(ParseError::mismatch("timestamp", other)),
        }
    }
}

fn parse_default(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z"))
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
}

fn parse_with_pattern(text: &str, pattern: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(text, pattern) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, pattern) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(text, pattern)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn truncate_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = dt.nanosecond();
    dt.with_nanosecond(nanos - nanos % 1_000_000).unwrap_or(dt)
}

#[derive(Debug, Clone)]
pub struct DateParser {
    pattern: String,
}

impl DateParser {
    pub fn new(pattern: Option<String>) -> Self {
        Self { pattern: pattern.unwrap_or_else(|| DEFAULT_DATE_PATTERN.to_string()) }
    }

    pub fn parse(&self, text: &str) -> Result<CqlValue, ParseError> {
        let text = text.trim();
        NaiveDate::parse_from_str(text, &self.pattern)
            .map(CqlValue::Date)
            .map_err(|_| ParseError::invalid("date", text))
    }

    pub fn format(&self, value: &CqlValue) -> Result<String, ParseError> {
        match value {
            CqlValue::Date(date) => render(date.format(&self.pattern), "date", &self.pattern),
            other => Err(ParseError::mismatch("date", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeParser {
    pattern: String,
}

impl TimeParser {
    pub fn new(pattern: Option<String>) -> Self {
        Self { pattern: pattern.unwrap_or_else(|| DEFAULT_TIME_PATTERN.to_string()) }
    }

    pub fn parse(&self, text: &str) -> Result<CqlValue, ParseError> {
        let text = text.trim();
        NaiveTime::parse_from_str(text, &self.pattern)
            .map(CqlValue::Time)
            .map_err(|_| ParseError::invalid("time", text))
    }

    pub fn format(&self, value: &CqlValue) -> Result<String, ParseError> {
        match value {
            CqlValue::Time(time) => render(time.format(&self.pattern), "time", &self.pattern),
            other => Err(ParseError::mismatch("time", other)),
        }
    }
}
