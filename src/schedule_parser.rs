// Grammar for the strings tenants type into their meeting schedule:
//
//   clock time    "9:00", "14:30", "9:00 AM", "09:00PM"
//   range         "09:00-18:00", "9:00 AM - 6:00 PM", "9:00AM-18:00"
//   closed day    "Cerrado", "No atiende", "-", "N/A", "closed", "" ...
//   blocked times JSON array (or a string holding one) of
//                 {"fecha","inicio","fin"} objects or free text such as
//                 "2026-01-27 13:00-14:00"; or a plain comma-separated list.

use chrono::{NaiveDate, NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static CLOCK_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2}):(\d{1,2})\s*(AM|PM)?$").expect("clock time regex is valid")
});

const CLOSED_MARKERS: [&str; 8] = [
    "",
    "-",
    "N/A",
    "CERRADO",
    "NO DISPONIBLE",
    "NO ATIENDE",
    "CLOSED",
    "UNAVAILABLE",
];

/// Opening hours of a day or the span of a blocked window. `start` is
/// inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }

    // Minutes are used so a span running past midnight still compares.
    pub fn overlaps_minutes(&self, start_minute: u32, end_minute: u32) -> bool {
        start_minute < minute_of_day(self.end) && minute_of_day(self.start) < end_minute
    }

    // "09:00 AM a 06:00 PM"
    pub fn to_display(&self) -> String {
        format!("{} a {}", format_clock_12h(self.start), format_clock_12h(self.end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockedTime {
    Window { date: NaiveDate, range: TimeRange },
    // Raw text holding a date token and a time range
    Text(String),
}

impl BlockedTime {
    /// Whether this entry blocks any part of `[start, start + duration)` on
    /// `date`.
    pub fn blocks(&self, date: NaiveDate, start: NaiveTime, duration_minutes: u32) -> bool {
        let start_minute = minute_of_day(start);
        let end_minute = start_minute.saturating_add(duration_minutes.max(1));

        match self {
            BlockedTime::Window {
                date: blocked_date,
                range,
            } => *blocked_date == date && range.overlaps_minutes(start_minute, end_minute),
            BlockedTime::Text(text) => {
                let date_token = date.format("%Y-%m-%d").to_string();
                if !text.contains(&date_token) {
                    return false;
                }
                let remainder = text.replace(&date_token, "");
                parse_time_range(remainder.trim())
                    .map(|range| range.overlaps_minutes(start_minute, end_minute))
                    .unwrap_or(false)
            }
        }
    }
}

pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

pub fn format_clock_12h(time: NaiveTime) -> String {
    time.format("%I:%M %p").to_string()
}

/// Parses a single clock time in 12-hour (`9:00 AM`, `9:00AM`) or 24-hour
/// (`14:30`) form. Case and surrounding whitespace are ignored.
pub fn parse_clock_time(input: &str) -> Option<NaiveTime> {
    let normalized = input.trim().to_uppercase();
    let captures = CLOCK_TIME_RE.captures(&normalized)?;

    let hour: u32 = captures.get(1)?.as_str().parse().ok()?;
    let minute: u32 = captures.get(2)?.as_str().parse().ok()?;

    let hour = match captures.get(3).map(|m| m.as_str()) {
        Some(meridiem) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            match (meridiem, hour) {
                ("AM", 12) => 0,
                ("AM", h) => h,
                ("PM", 12) => 12,
                (_, h) => h + 12,
            }
        }
        None => hour,
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Parses an opening-hours range. Whitespace is dropped and the text split on
/// the hyphen, so `"9:00 AM - 6:00 PM"` and `"09:00-18:00"` both work.
pub fn parse_time_range(input: &str) -> Option<TimeRange> {
    if input.trim().is_empty() {
        return None;
    }

    let compact: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == '–' { '-' } else { c })
        .collect();

    let parts: Vec<&str> = compact.split('-').collect();
    let (start, end) = match parts.as_slice() {
        [start, end] => (*start, *end),
        _ => {
            let spaced: Vec<&str> = input.split(" - ").collect();
            match spaced.as_slice() {
                [start, end] => (*start, *end),
                _ => return None,
            }
        }
    };

    Some(TimeRange::new(parse_clock_time(start)?, parse_clock_time(end)?))
}

pub fn is_closed_marker(input: &str) -> bool {
    let normalized = input.trim().to_uppercase();
    CLOSED_MARKERS.contains(&normalized.as_str())
}

/// Reads the `horarios_bloqueados` field in any of its accepted shapes.
/// Entries that cannot be understood are skipped.
pub fn parse_blocked_times(value: &Value) -> Vec<BlockedTime> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().filter_map(parse_blocked_entry).collect(),
        Value::Object(_) => parse_blocked_entry(value).into_iter().collect(),
        Value::String(text) => parse_blocked_text(text),
        other => {
            debug!(value = %other, "ignoring blocked times of unexpected type");
            Vec::new()
        }
    }
}

fn parse_blocked_text(text: &str) -> Vec<BlockedTime> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(parsed @ (Value::Array(_) | Value::Object(_))) => parse_blocked_times(&parsed),
        _ => trimmed
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| BlockedTime::Text(entry.to_string()))
            .collect(),
    }
}

fn parse_blocked_entry(entry: &Value) -> Option<BlockedTime> {
    match entry {
        Value::Object(fields) => {
            let date = fields
                .get("fecha")
                .and_then(Value::as_str)
                .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok());
            let start = fields
                .get("inicio")
                .and_then(Value::as_str)
                .and_then(parse_clock_time);
            let end = fields
                .get("fin")
                .and_then(Value::as_str)
                .and_then(parse_clock_time);

            match (date, start, end) {
                (Some(date), Some(start), Some(end)) => Some(BlockedTime::Window {
                    date,
                    range: TimeRange::new(start, end),
                }),
                _ => {
                    debug!(entry = %entry, "skipping malformed blocked window");
                    None
                }
            }
        }
        Value::String(text) if !text.trim().is_empty() => {
            Some(BlockedTime::Text(text.trim().to_string()))
        }
        _ => None,
    }
}
