//! Date search semantics.
//!
//! A FHIR date is a range whose width is its precision:
//! - Year: 2023 -> [2023-01-01, 2024-01-01)
//! - Month: 2023-01 -> [2023-01-01, 2023-02-01)
//! - Day: 2023-01-15 -> [2023-01-15, 2023-01-16)
//! - DateTime: to the minute, second or millisecond given
//!
//! Date-times without an offset are taken as UTC.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, SecondsFormat,
    TimeZone, Utc,
};
use serde_json::Value;
use std::fmt;

use crate::error::{ConformanceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DatePrecision {
    Year,
    Month,
    Day,
    Minute,
    Second,
    Millisecond,
}

/// Half-open interval `[start, end)` covered by a date value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub precision: DatePrecision,
}

/// Comparison prefix carried by a date search value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPrefix {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Sa,
    Eb,
}

impl SearchPrefix {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "lt" => Some(Self::Lt),
            "ge" => Some(Self::Ge),
            "le" => Some(Self::Le),
            "sa" => Some(Self::Sa),
            "eb" => Some(Self::Eb),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Ge => "ge",
            Self::Le => "le",
            Self::Sa => "sa",
            Self::Eb => "eb",
        }
    }

    /// Split an optional two-letter prefix from a raw value. A missing prefix
    /// means `eq`.
    pub fn split(raw: &str) -> (Self, &str) {
        let raw = raw.trim();
        if raw.len() > 2
            && raw.is_char_boundary(2)
            && let Some(prefix) = Self::parse(&raw[..2])
        {
            return (prefix, &raw[2..]);
        }
        (Self::Eq, raw)
    }
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DateRange {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let invalid = || ConformanceError::invalid_search_value(format!("Invalid date: {trimmed}"));

        if let Some((date_part, _)) = trimmed.split_once('T') {
            let (naive, offset) = parse_date_time(trimmed).ok_or_else(invalid)?;
            let start = offset
                .from_local_datetime(&naive)
                .single()
                .ok_or_else(invalid)?
                .with_timezone(&Utc);
            let precision = time_precision(&trimmed[date_part.len() + 1..]);
            let width = match precision {
                DatePrecision::Minute => Duration::minutes(1),
                DatePrecision::Second => Duration::seconds(1),
                _ => Duration::milliseconds(1),
            };
            // Instants at the end of the representable range saturate.
            let end = start
                .checked_add_signed(width)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            return Ok(Self {
                start,
                end,
                precision,
            });
        }

        let parts: Vec<&str> = trimmed.split('-').collect();
        let (start_date, precision) = match parts.as_slice() {
            [year] if year.len() == 4 => (
                NaiveDate::from_ymd_opt(year.parse().map_err(|_| invalid())?, 1, 1),
                DatePrecision::Year,
            ),
            [year, month] if year.len() == 4 && month.len() == 2 => (
                NaiveDate::from_ymd_opt(
                    year.parse().map_err(|_| invalid())?,
                    month.parse().map_err(|_| invalid())?,
                    1,
                ),
                DatePrecision::Month,
            ),
            [_, _, _] => (
                NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok(),
                DatePrecision::Day,
            ),
            _ => (None, DatePrecision::Day),
        };
        let start_date = start_date.ok_or_else(invalid)?;
        let end_date = match precision {
            DatePrecision::Year => start_date.checked_add_months(Months::new(12)),
            DatePrecision::Month => start_date.checked_add_months(Months::new(1)),
            _ => start_date.succ_opt(),
        }
        .ok_or_else(invalid)?;

        Ok(Self {
            start: midnight_utc(start_date),
            end: midnight_utc(end_date),
            precision,
        })
    }

    /// Range covered by a resolved date-like element: a date/dateTime/instant
    /// string or a Period. Open period ends extend to the end of time.
    pub fn from_element(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse(s).ok(),
            Value::Object(object) => {
                let start = object.get("start").and_then(Value::as_str);
                let end = object.get("end").and_then(Value::as_str);
                if start.is_none() && end.is_none() {
                    return None;
                }
                let start_range = match start {
                    Some(s) => Some(Self::parse(s).ok()?),
                    None => None,
                };
                let end_range = match end {
                    Some(e) => Some(Self::parse(e).ok()?),
                    None => None,
                };
                Some(Self {
                    start: start_range.map_or(DateTime::<Utc>::MIN_UTC, |r| r.start),
                    end: end_range.map_or(DateTime::<Utc>::MAX_UTC, |r| r.end),
                    precision: start_range
                        .or(end_range)
                        .map_or(DatePrecision::Day, |r| r.precision),
                })
            }
            _ => None,
        }
    }

    /// Whether this (resource) range satisfies `prefix` against the requested range.
    pub fn satisfies(&self, prefix: SearchPrefix, requested: &DateRange) -> bool {
        match prefix {
            SearchPrefix::Eq => self.start < requested.end && self.end > requested.start,
            SearchPrefix::Ne => !(self.start >= requested.start && self.end <= requested.end),
            SearchPrefix::Gt => self.end > requested.end,
            SearchPrefix::Lt => self.start < requested.start,
            SearchPrefix::Ge => self.end > requested.start,
            SearchPrefix::Le => self.start < requested.end,
            SearchPrefix::Sa => self.start >= requested.end,
            SearchPrefix::Eb => self.end <= requested.start,
        }
    }
}

/// Build a prefixed search value that a resource dated `date` must satisfy:
/// `lt`/`le` move one unit later and `gt`/`ge` one unit earlier, so the
/// reference date itself is excluded from the boundary
/// (`2020-05-05` -> `lt2020-05-06`, `gt2020-05-04`).
pub fn comparator_value(prefix: SearchPrefix, date: &str) -> Result<String> {
    let range = DateRange::parse(date)?;
    let forward = match prefix {
        SearchPrefix::Lt | SearchPrefix::Le => true,
        SearchPrefix::Gt | SearchPrefix::Ge => false,
        other => {
            return Err(ConformanceError::invalid_search_value(format!(
                "no comparator value for prefix '{other}'"
            )));
        }
    };

    let invalid = || ConformanceError::invalid_search_value(format!("Date out of range: {date}"));
    let start = range.start.date_naive();
    let shifted = match range.precision {
        DatePrecision::Year => {
            let year = if forward { start.year() + 1 } else { start.year() - 1 };
            format!("{year:04}")
        }
        DatePrecision::Month => {
            let month = if forward {
                start.checked_add_months(Months::new(1))
            } else {
                start.checked_sub_months(Months::new(1))
            }
            .ok_or_else(invalid)?;
            month.format("%Y-%m").to_string()
        }
        DatePrecision::Day => {
            let day = if forward { start.succ_opt() } else { start.pred_opt() }.ok_or_else(invalid)?;
            day.format("%Y-%m-%d").to_string()
        }
        _ => {
            let day = Duration::days(1);
            let instant = if forward {
                range.start.checked_add_signed(day)
            } else {
                range.start.checked_sub_signed(day)
            }
            .ok_or_else(invalid)?;
            instant.to_rfc3339_opts(SecondsFormat::Secs, true)
        }
    };

    Ok(format!("{prefix}{shifted}"))
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

fn parse_date_time(raw: &str) -> Option<(NaiveDateTime, FixedOffset)> {
    let body = strip_offset(raw);
    let offset = match &raw[body.len()..] {
        "" | "Z" => FixedOffset::east_opt(0)?,
        tz => {
            let hours: i32 = tz.get(1..3)?.parse().ok()?;
            let minutes: i32 = tz.get(4..6)?.parse().ok()?;
            let seconds = hours * 3600 + minutes * 60;
            if tz.starts_with('-') {
                FixedOffset::west_opt(seconds)?
            } else {
                FixedOffset::east_opt(seconds)?
            }
        }
    };

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(body, format).ok())
        .map(|naive| (naive, offset))
}

/// Drop a trailing `Z` or `+hh:mm`/`-hh:mm` offset.
fn strip_offset(raw: &str) -> &str {
    if let Some(body) = raw.strip_suffix('Z') {
        return body;
    }
    let bytes = raw.as_bytes();
    let n = bytes.len();
    if n > 6 && matches!(bytes[n - 6], b'+' | b'-') && bytes[n - 3] == b':' {
        &raw[..n - 6]
    } else {
        raw
    }
}

fn time_precision(time: &str) -> DatePrecision {
    let clock = strip_offset(time);
    if clock.contains('.') {
        DatePrecision::Millisecond
    } else if clock.matches(':').count() >= 2 {
        DatePrecision::Second
    } else {
        DatePrecision::Minute
    }
}
