use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{
    locale::{weekday_title, WEEK},
    schedule_parser::{is_closed_marker, parse_blocked_times, parse_time_range, BlockedTime, TimeRange},
};

/// What a tenant's schedule says about one weekday.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaySchedule<'a> {
    Closed,
    Open(TimeRange),
    // Text that is neither a closed marker nor a parseable range
    Unparsed(&'a str),
}

/// Weekly meeting schedule of a tenant, as returned by
/// `OBTENER_HORARIO_REUNIONES`. Immutable once fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScheduleRecord {
    #[serde(default, deserialize_with = "day_slot")]
    pub reunion_lunes: Option<String>,
    #[serde(default, deserialize_with = "day_slot")]
    pub reunion_martes: Option<String>,
    #[serde(default, deserialize_with = "day_slot")]
    pub reunion_miercoles: Option<String>,
    #[serde(default, deserialize_with = "day_slot")]
    pub reunion_jueves: Option<String>,
    #[serde(default, deserialize_with = "day_slot")]
    pub reunion_viernes: Option<String>,
    #[serde(default, deserialize_with = "day_slot")]
    pub reunion_sabado: Option<String>,
    #[serde(default, deserialize_with = "day_slot")]
    pub reunion_domingo: Option<String>,
    #[serde(default, rename = "horarios_bloqueados", deserialize_with = "blocked_times")]
    pub blocked_times: Vec<BlockedTime>,
}

impl ScheduleRecord {
    pub fn slot(&self, day: Weekday) -> Option<&str> {
        let slot = match day {
            Weekday::Mon => &self.reunion_lunes,
            Weekday::Tue => &self.reunion_martes,
            Weekday::Wed => &self.reunion_miercoles,
            Weekday::Thu => &self.reunion_jueves,
            Weekday::Fri => &self.reunion_viernes,
            Weekday::Sat => &self.reunion_sabado,
            Weekday::Sun => &self.reunion_domingo,
        };
        slot.as_deref()
    }

    pub fn set_slot(&mut self, day: Weekday, value: impl Into<String>) {
        let slot = match day {
            Weekday::Mon => &mut self.reunion_lunes,
            Weekday::Tue => &mut self.reunion_martes,
            Weekday::Wed => &mut self.reunion_miercoles,
            Weekday::Thu => &mut self.reunion_jueves,
            Weekday::Fri => &mut self.reunion_viernes,
            Weekday::Sat => &mut self.reunion_sabado,
            Weekday::Sun => &mut self.reunion_domingo,
        };
        *slot = Some(value.into());
    }

    pub fn day(&self, day: Weekday) -> DaySchedule<'_> {
        match self.slot(day) {
            None => DaySchedule::Closed,
            Some(text) if is_closed_marker(text) => DaySchedule::Closed,
            Some(text) => match parse_time_range(text) {
                Some(range) => DaySchedule::Open(range),
                None => DaySchedule::Unparsed(text),
            },
        }
    }

    pub fn is_blocked(&self, date: NaiveDate, start: NaiveTime, duration_minutes: u32) -> bool {
        self.blocked_times
            .iter()
            .any(|blocked| blocked.blocks(date, start, duration_minutes))
    }

    /// One line per weekday, `Cerrado` for days without hours:
    ///
    /// ```text
    /// - Lunes: 09:00 - 18:00
    /// - Martes: Cerrado
    /// ```
    pub fn summary(&self) -> String {
        WEEK.iter()
            .map(|&day| {
                let hours = match self.slot(day).map(str::trim) {
                    Some(text) if !is_closed_marker(text) => text.replace('-', " - "),
                    _ => "Cerrado".to_string(),
                };
                format!("- {}: {}", weekday_title(day), hours)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// Day slots arrive as strings, null, or occasionally something else.
fn day_slot<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    })
}

fn blocked_times<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<BlockedTime>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(parse_blocked_times(&value))
}
