use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::{
    gateway::AvailabilityGateway,
    locale::weekday_title,
    tenant::TenantId,
    upstream::{SlotSuggestion, SuggestionQuery, SuggestionsResponse, WIRE_DATETIME_FORMAT},
    validator::{BookingPolicy, Rejection, ScheduleValidator, SlotStatus},
};

const ASK_FOR_TIME: &str = "Para esa fecha indica una hora que prefieras y la verifico.";
const FALLBACK: &str =
    "No pude obtener sugerencias ahora. Indica una fecha y hora que prefieras y la verifico.";
const DEFAULT_HEADER: &str = "Horarios disponibles encontrados";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recommendation {
    pub text: String,
    pub suggestions: Vec<SlotSuggestion>,
    pub total: u32,
    pub message: Option<String>,
}

impl Recommendation {
    fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

pub struct RecommendationEngine {
    gateway: Arc<AvailabilityGateway>,
    validator: Arc<ScheduleValidator>,
}

impl RecommendationEngine {
    pub fn new(gateway: Arc<AvailabilityGateway>, validator: Arc<ScheduleValidator>) -> Self {
        Self { gateway, validator }
    }

    /// Answers "when can I book?". Never fails: every upstream problem ends
    /// in a prompt asking the user for a concrete time.
    ///
    /// * date and time: exact-slot check, then a confirmation or an offer to
    ///   suggest alternatives;
    /// * a date that is neither today nor tomorrow: ask for a time;
    /// * otherwise: the upstream's suggestions for today and tomorrow.
    pub async fn recommend(
        &self,
        tenant: &TenantId,
        policy: &BookingPolicy,
        date: Option<&str>,
        time: Option<&str>,
    ) -> Recommendation {
        let date = date.map(str::trim).filter(|d| !d.is_empty());
        let time = time.map(str::trim).filter(|t| !t.is_empty());

        if let (Some(date), Some(time)) = (date, time) {
            return self.exact_slot(tenant, policy, date, time).await;
        }

        if let Some(requested) = date.and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()) {
            let clock = self.validator.clock();
            if requested != clock.today() && requested != clock.tomorrow() {
                debug!(tenant = %tenant, %requested, "date outside suggestion window");
                return Recommendation::text_only(ASK_FOR_TIME);
            }
        }

        let query = SuggestionQuery {
            tenant: tenant.clone(),
            duration_minutes: policy.duration_minutes,
            slots: policy.slots,
            assign_staff: policy.assign_staff,
            assign_branch: policy.assign_branch,
        };

        match self.gateway.suggest_slots(&query).await {
            Ok(response) => match render_suggestions(response) {
                Some(recommendation) => recommendation,
                None => {
                    debug!(tenant = %tenant, "no suggestions returned");
                    Recommendation::text_only(FALLBACK)
                }
            },
            Err(err) => {
                warn!(tenant = %tenant, error = %err, "slot suggestion failed, using fallback");
                Recommendation::text_only(FALLBACK)
            }
        }
    }

    async fn exact_slot(
        &self,
        tenant: &TenantId,
        policy: &BookingPolicy,
        date: &str,
        time: &str,
    ) -> Recommendation {
        let Ok(day) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
            return Recommendation::text_only(Rejection::BadDateFormat.to_string());
        };
        let Ok(start) = crate::input::parse_time(time) else {
            return Recommendation::text_only(Rejection::BadTimeFormat.to_string());
        };

        match self.validator.check_slot(tenant, policy, day, start).await {
            SlotStatus::Available => Recommendation::text_only(format!(
                "El {} a las {} está disponible. ¿Confirmamos la cita?",
                date, time
            )),
            SlotStatus::Taken => Recommendation::text_only(format!(
                "{} ¿Te gustaría que te sugiera otros horarios?",
                Rejection::SlotTaken
            )),
        }
    }
}

fn render_suggestions(response: SuggestionsResponse) -> Option<Recommendation> {
    if response.sugerencias.is_empty() || response.total == 0 {
        return None;
    }

    let lines: Vec<String> = response
        .sugerencias
        .iter()
        .filter_map(describe_suggestion)
        .enumerate()
        .map(|(i, text)| format!("{}. {}", i + 1, text))
        .collect();
    if lines.is_empty() {
        return None;
    }

    let message = response
        .mensaje
        .unwrap_or_else(|| DEFAULT_HEADER.to_string());
    let header = if message.trim().is_empty() {
        "Horarios sugeridos:"
    } else {
        message.as_str()
    };

    Some(Recommendation {
        text: format!("{}\n\n{}", header, lines.join("\n")),
        suggestions: response.sugerencias,
        total: response.total,
        message: Some(message.clone()),
    })
}

// "Hoy a las 03:00 PM", "Jueves 05/03 a las 10:00 AM (ocupado)", ...
fn describe_suggestion(suggestion: &SlotSuggestion) -> Option<String> {
    let day = suggestion.dia.trim();
    let hour = suggestion.hora_legible.trim();
    if day.is_empty() || hour.is_empty() {
        return None;
    }

    let starts = suggestion
        .fecha_inicio
        .as_deref()
        .and_then(|s| NaiveDateTime::parse_from_str(s.trim(), WIRE_DATETIME_FORMAT).ok());

    let mut text = match (day.to_lowercase().as_str(), starts) {
        ("hoy", _) => format!("Hoy a las {}", hour),
        ("mañana", _) => format!("Mañana a las {}", hour),
        (_, Some(starts)) => format!(
            "{} {} a las {}",
            weekday_title(starts.weekday()),
            starts.format("%d/%m"),
            hour
        ),
        (_, None) => format!("{} a las {}", day, hour),
    };

    if !suggestion.disponible {
        text.push_str(" (ocupado)");
    }
    Some(text)
}
