// Outer boundary used by the conversational layer: every operation returns
// the text to show the user and never propagates an error.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    error::AvailabilityError,
    gateway::AvailabilityGateway,
    input::{self, InputError},
    recommendation::RecommendationEngine,
    telemetry::{NoopTelemetry, Telemetry},
    tenant::TenantId,
    upstream::{EventRequest, EventResponse, UpstreamRequest},
    validator::{BookingPolicy, ScheduleValidator, ValidationVerdict},
};

const NO_SCHEDULE: &str = "No hay horario cargado.";
const CALENDAR_UNAVAILABLE: &str = "El servicio de calendario no está disponible en este momento. Por favor intenta en unos minutos.";
const MEETING_LINK_MISSING: &str = "Tu cita está confirmada. No se pudo generar el enlace de videollamada; te contactaremos con los detalles.";
const APOLOGY: &str =
    "Ocurrió un error inesperado al procesar tu solicitud. Por favor intenta nuevamente.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingRequest {
    pub tenant: TenantId,
    pub date: String,
    pub time: String,
    pub customer_name: String,
    pub customer_email: String,
    // Prospect id; when not positive the conversation's session id is used
    pub prospect_id: i64,
    pub session_id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub policy: BookingPolicy,
}

pub struct BookingDesk {
    gateway: Arc<AvailabilityGateway>,
    validator: Arc<ScheduleValidator>,
    recommendations: RecommendationEngine,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn Telemetry>,
}

impl BookingDesk {
    pub fn new(gateway: Arc<AvailabilityGateway>, clock: Arc<dyn Clock>) -> Self {
        let validator = Arc::new(ScheduleValidator::new(
            Arc::clone(&gateway),
            Arc::clone(&clock),
        ));
        let recommendations =
            RecommendationEngine::new(Arc::clone(&gateway), Arc::clone(&validator));

        Self {
            gateway,
            validator,
            recommendations,
            clock,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn validator(&self) -> &ScheduleValidator {
        &self.validator
    }

    pub fn recommendations(&self) -> &RecommendationEngine {
        &self.recommendations
    }

    pub async fn check_availability(
        &self,
        tenant: &TenantId,
        policy: &BookingPolicy,
        date: &str,
        time: Option<&str>,
    ) -> String {
        debug!(tenant = %tenant, date, time = ?time, "check_availability");

        if let Err(err) = input::parse_date(date) {
            self.telemetry.tool_call("check_availability", true);
            return err.to_string();
        }

        let recommendation = self
            .recommendations
            .recommend(tenant, policy, Some(date), time)
            .await;
        self.telemetry.tool_call("check_availability", true);
        recommendation.text
    }

    pub async fn create_booking(&self, request: &BookingRequest) -> String {
        info!(
            tenant = %request.tenant,
            date = %request.date,
            time = %request.time,
            "create_booking"
        );

        match self.try_create_booking(request).await {
            Ok(reply) => {
                self.telemetry.tool_call("create_booking", true);
                reply
            }
            Err(err) => {
                error!(tenant = %request.tenant, error = ?err, "create_booking failed unexpectedly");
                self.telemetry.tool_call("create_booking", false);
                APOLOGY.to_string()
            }
        }
    }

    async fn try_create_booking(&self, request: &BookingRequest) -> anyhow::Result<String> {
        // 1. Input
        if let Err(err) = input::parse_date(&request.date) {
            return Ok(err.to_string());
        }
        let (date, customer_name, customer_email) = match self.check_input(request) {
            Ok(checked) => checked,
            Err(err) => {
                warn!(tenant = %request.tenant, error = %err, "invalid booking data");
                return Ok(format!(
                    "Datos inválidos: {}\n\nPor favor verifica la información.",
                    err
                ));
            }
        };

        // 2. Schedule
        let verdict = self
            .validator
            .validate(&request.tenant, &request.policy, &request.date, &request.time)
            .await;
        if let ValidationVerdict::Invalid(rejection) = verdict {
            warn!(tenant = %request.tenant, reason = %rejection, "slot rejected");
            return Ok(format!("{}\n\nPor favor elige otra fecha u hora.", rejection));
        }

        // 3. Calendar event
        let start_time = input::parse_time(&request.time)
            .map_err(|e| anyhow!("time accepted by the validator failed to parse: {}", e))?;
        let start = date.and_time(start_time);
        let end = start
            .checked_add_signed(request.policy.duration())
            .context("appointment end out of range")?;

        let event = EventRequest {
            tenant: request.tenant.clone(),
            user_id: request.user_id,
            prospect_id: if request.prospect_id > 0 {
                request.prospect_id
            } else {
                request.session_id
            },
            title: format!("Reunion para el usuario: {}", customer_name),
            start,
            end,
            client_email: customer_email,
            user_email: request.user_email.trim().to_string(),
            assign_staff: request.policy.assign_staff,
        };

        if request.policy.log_booking_calls {
            let payload = serde_json::to_string(&UpstreamRequest::CreateEvent(&event))
                .context("serializing CREAR_EVENTO payload")?;
            info!(tenant = %request.tenant, payload = %payload, "CREAR_EVENTO request");
        }

        self.telemetry.booking_attempt();
        match self.gateway.create_event(&event).await {
            Ok(created) => {
                self.telemetry.booking_succeeded();
                if request.policy.log_booking_calls {
                    info!(tenant = %request.tenant, response = ?created, "CREAR_EVENTO response");
                }
                Ok(render_confirmation(request, &customer_name, &created))
            }
            Err(err) => {
                let reason = failure_reason(&err);
                warn!(tenant = %request.tenant, reason = %reason, error = %err, "event creation failed");
                self.telemetry.booking_failed(&reason);
                let message = match &err {
                    AvailabilityError::CircuitOpen { .. } => CALENDAR_UNAVAILABLE.to_string(),
                    other => other.user_message(),
                };
                Ok(format!("{}\n\nPor favor intenta nuevamente.", message))
            }
        }
    }

    fn check_input(
        &self,
        request: &BookingRequest,
    ) -> Result<(NaiveDate, String, String), InputError> {
        let date = input::parse_future_date(&request.date, self.clock.today())?;
        input::parse_time(&request.time)?;
        let name = input::validate_customer_name(&request.customer_name)?;
        let email = input::validate_email(&request.customer_email)?;
        Ok((date, name, email))
    }

    /// Weekly schedule of `tenant` as one line per day.
    pub async fn schedule_summary(&self, tenant: &TenantId) -> String {
        match self.gateway.schedule(tenant).await {
            Ok(Some(schedule)) => schedule.summary(),
            Ok(None) => NO_SCHEDULE.to_string(),
            Err(err) => {
                warn!(tenant = %tenant, error = %err, "schedule unavailable for summary");
                NO_SCHEDULE.to_string()
            }
        }
    }

    pub async fn business_context(&self, tenant: &TenantId) -> Option<String> {
        match self.gateway.business_context(tenant).await {
            Ok(context) => context,
            Err(err) => {
                warn!(tenant = %tenant, error = %err, "business context unavailable");
                None
            }
        }
    }
}

fn failure_reason(err: &AvailabilityError) -> String {
    match err {
        AvailabilityError::HttpStatus { status } => format!("http_{}", status),
        other => other.kind().to_string(),
    }
}

fn render_confirmation(request: &BookingRequest, customer_name: &str, created: &EventResponse) -> String {
    let message = created
        .message
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or("Evento creado correctamente");

    let mut lines = vec![
        message.to_string(),
        String::new(),
        "Detalles:".to_string(),
        format!("• Fecha: {}", request.date.trim()),
        format!("• Hora: {}", request.time.trim()),
        format!("• Nombre: {}", customer_name),
        String::new(),
    ];

    match created.google_meet_link.as_deref().filter(|l| !l.is_empty()) {
        Some(link) => lines.push(format!(
            "La reunión será por videollamada. Enlace: {}",
            link
        )),
        None if created.google_calendar_synced != Some(true) => {
            lines.push(MEETING_LINK_MISSING.to_string())
        }
        None => {}
    }
    lines.push(String::new());
    lines.push("¡Te esperamos!".to_string());

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::FixedClock,
        config::ServiceConfig,
        mock_service::{MockAvailabilityService, ServerMode},
        schedule::ScheduleRecord,
        telemetry::TelemetryStats,
    };
    use chrono::{FixedOffset, Weekday};
    use std::sync::atomic::Ordering;

    struct Harness {
        server: Arc<MockAvailabilityService>,
        stats: Arc<TelemetryStats>,
        desk: BookingDesk,
    }

    // Monday 2026-01-26, 08:00 in Lima
    fn harness() -> Harness {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let server = Arc::new(MockAvailabilityService::new());
        let mut schedule = ScheduleRecord::default();
        for day in [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri] {
            schedule.set_slot(day, "09:00-18:00");
        }
        schedule.set_slot(Weekday::Sat, "Cerrado");
        server.set_schedule("1", schedule);

        let stats = Arc::new(TelemetryStats::default());
        let gateway = Arc::new(AvailabilityGateway::with_telemetry(
            server.clone(),
            &ServiceConfig::default(),
            stats.clone(),
        ));
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let clock: Arc<dyn Clock> =
            Arc::new(FixedClock::at_local("2026-01-26 08:00:00", offset).unwrap());
        let desk = BookingDesk::new(gateway, clock).with_telemetry(stats.clone());

        Harness {
            server,
            stats,
            desk,
        }
    }

    fn request() -> BookingRequest {
        BookingRequest {
            tenant: TenantId::from("1"),
            date: "2026-01-27".to_string(),
            time: "02:00 PM".to_string(),
            customer_name: "ana pérez".to_string(),
            customer_email: "Ana@Example.com".to_string(),
            prospect_id: 0,
            session_id: 4411,
            user_id: 7,
            user_email: " ventas@example.com ".to_string(),
            policy: BookingPolicy::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_booking() {
        let h = harness();

        let reply = h.desk.create_booking(&request()).await;

        assert_eq!(
            reply,
            "Evento agregado correctamente\n\n\
             Detalles:\n\
             • Fecha: 2026-01-27\n\
             • Hora: 02:00 PM\n\
             • Nombre: Ana Pérez\n\n\
             La reunión será por videollamada. Enlace: https://meet.google.com/abc-defg-hij\n\n\
             ¡Te esperamos!"
        );

        let event = h.server.last_event().unwrap();
        assert_eq!(event.title, "Reunion para el usuario: Ana Pérez");
        assert_eq!(event.prospect_id, 4411);
        assert_eq!(event.client_email, "ana@example.com");
        assert_eq!(event.user_email, "ventas@example.com");
        assert_eq!(event.start.to_string(), "2026-01-27 14:00:00");
        assert_eq!(event.end.to_string(), "2026-01-27 15:00:00");

        let snapshot = h.stats.snapshot();
        assert_eq!(snapshot.booking_attempts, 1);
        assert_eq!(snapshot.booking_successes, 1);
        assert_eq!(snapshot.tool_calls_ok, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_meeting_link_notice() {
        let h = harness();
        h.server.set_event_response(EventResponse {
            success: true,
            message: Some("Cita registrada".to_string()),
            google_calendar_synced: Some(false),
            ..EventResponse::default()
        });

        let reply = h.desk.create_booking(&request()).await;
        assert!(reply.starts_with("Cita registrada\n"));
        assert!(reply.contains(MEETING_LINK_MISSING));
        assert!(reply.ends_with("¡Te esperamos!"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_input_is_reported_before_any_call() {
        let h = harness();

        let bad_email = BookingRequest {
            customer_email: "ana-at-example".to_string(),
            ..request()
        };
        let reply = h.desk.create_booking(&bad_email).await;
        assert!(reply.starts_with("Datos inválidos: El contacto debe ser un email válido"));
        assert!(reply.ends_with("Por favor verifica la información."));

        let past = BookingRequest {
            date: "2026-01-20".to_string(),
            ..request()
        };
        let reply = h.desk.create_booking(&past).await;
        assert!(reply.contains("La fecha no puede ser en el pasado"));

        let bad_date = BookingRequest {
            date: "mañana".to_string(),
            ..request()
        };
        assert_eq!(
            h.desk.create_booking(&bad_date).await,
            "La fecha 'mañana' no tiene formato válido. Usa YYYY-MM-DD. Ejemplo: 2026-03-15"
        );

        assert_eq!(h.server.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_slot_reply() {
        let h = harness();
        let saturday = BookingRequest {
            date: "2026-01-31".to_string(),
            ..request()
        };

        let reply = h.desk.create_booking(&saturday).await;
        assert_eq!(
            reply,
            "No hay atención el día sábado. Por favor elige otro día.\n\nPor favor elige otra fecha u hora."
        );
        assert_eq!(h.server.calls().create_event.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calendar_failures() {
        let h = harness();

        h.server.set_business_failure(true);
        // Schedule lookups now fail too, which degrades to valid
        let reply = h.desk.create_booking(&request()).await;
        assert_eq!(
            reply,
            "No se pudo registrar el evento\n\nPor favor intenta nuevamente."
        );
        assert_eq!(h.stats.booking_failures_for("api_error"), 1);

        h.server.set_business_failure(false);
        h.server.set_mode(ServerMode::CompleteOutage);
        for _ in 0..3 {
            h.desk.create_booking(&request()).await;
        }
        assert_eq!(h.stats.booking_failures_for("connection_error"), 3);

        let reply = h.desk.create_booking(&request()).await;
        assert_eq!(
            reply,
            format!("{}\n\nPor favor intenta nuevamente.", CALENDAR_UNAVAILABLE)
        );
        assert_eq!(h.stats.booking_failures_for("circuit_open"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_availability() {
        let h = harness();

        assert_eq!(
            h.desk
                .check_availability(&TenantId::from("1"), &BookingPolicy::default(), "2026-02-10", None)
                .await,
            "Para esa fecha indica una hora que prefieras y la verifico."
        );
        assert_eq!(
            h.desk
                .check_availability(&TenantId::from("1"), &BookingPolicy::default(), "10/02", None)
                .await,
            "La fecha '10/02' no tiene formato válido. Usa YYYY-MM-DD. Ejemplo: 2026-03-15"
        );
        assert_eq!(h.server.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_summary() {
        let h = harness();

        let summary = h.desk.schedule_summary(&TenantId::from("1")).await;
        assert!(summary.starts_with("- Lunes: 09:00 - 18:00\n"));
        assert!(summary.contains("- Sábado: Cerrado"));

        assert_eq!(h.desk.schedule_summary(&TenantId::from("")).await, NO_SCHEDULE);
        assert_eq!(h.desk.schedule_summary(&TenantId::from("99")).await, NO_SCHEDULE);
    }
}
