// Ordered validation of a requested appointment slot. The first failing step
// decides the verdict. Format and in-the-past checks are strict; every check
// that depends on the remote service degrades to "valid" when that service
// cannot answer.

use std::{fmt, sync::Arc};

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Deserializer};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    gateway::AvailabilityGateway,
    locale::weekday_name,
    schedule::DaySchedule,
    schedule_parser::{format_clock_12h, minute_of_day, parse_clock_time, TimeRange},
    tenant::TenantId,
    upstream::{SlotQuery, UpstreamRequest},
};

/// Per-tenant scheduling knobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BookingPolicy {
    #[serde(deserialize_with = "bounded_duration")]
    pub duration_minutes: u32,
    // Capacity sent to the availability endpoint
    pub slots: u32,
    pub assign_staff: bool,
    pub assign_branch: bool,
    // Log availability and calendar payloads at info level
    pub log_booking_calls: bool,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            duration_minutes: 60,
            slots: 60,
            assign_staff: true,
            assign_branch: false,
            log_booking_calls: false,
        }
    }
}

impl BookingPolicy {
    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }
}

// An appointment lasts at least a minute and at most a day.
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

fn bounded_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let minutes = u32::deserialize(deserializer)?;
    if minutes == 0 || minutes > MAX_DURATION_MINUTES {
        return Err(serde::de::Error::custom(format!(
            "duration_minutes must be between 1 and {}, got {}",
            MAX_DURATION_MINUTES, minutes
        )));
    }
    Ok(minutes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    BadDateFormat,
    BadTimeFormat,
    AlreadyPassed,
    DayClosed(Weekday),
    BeforeOpening { day: Weekday, hours: TimeRange },
    AfterClosing { day: Weekday, hours: TimeRange },
    ExceedsClosing { day: Weekday, hours: TimeRange, duration_minutes: u32 },
    Blocked,
    SlotTaken,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::BadDateFormat => write!(
                f,
                "Formato de fecha inválido. Usa el formato YYYY-MM-DD (ejemplo: 2026-01-25)."
            ),
            Rejection::BadTimeFormat => write!(
                f,
                "Formato de hora inválido. Usa el formato HH:MM AM/PM (ejemplo: 10:30 AM)."
            ),
            Rejection::AlreadyPassed => write!(
                f,
                "La fecha y hora seleccionada ya pasó. Por favor elige una fecha y hora futura."
            ),
            Rejection::DayClosed(day) => write!(
                f,
                "No hay atención el día {}. Por favor elige otro día.",
                weekday_name(*day)
            ),
            Rejection::BeforeOpening { day, hours } => write!(
                f,
                "La hora seleccionada es antes del horario de atención. El horario del {} es de {}.",
                weekday_name(*day),
                hours.to_display()
            ),
            Rejection::AfterClosing { day, hours } => write!(
                f,
                "La hora seleccionada es después del horario de atención. El horario del {} es de {}.",
                weekday_name(*day),
                hours.to_display()
            ),
            Rejection::ExceedsClosing {
                day,
                hours,
                duration_minutes,
            } => write!(
                f,
                "La cita de {} minutos excedería el horario de atención (cierre: {}). El horario del {} es de {}. Por favor elige una hora más temprana.",
                duration_minutes,
                format_clock_12h(hours.end),
                weekday_name(*day),
                hours.to_display()
            ),
            Rejection::Blocked => write!(
                f,
                "El horario seleccionado está bloqueado. Por favor elige otra hora."
            ),
            Rejection::SlotTaken => write!(
                f,
                "El horario seleccionado ya está ocupado. Por favor elige otra hora o fecha."
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Valid,
    Invalid(Rejection),
}

impl ValidationVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationVerdict::Valid)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ValidationVerdict::Valid => None,
            ValidationVerdict::Invalid(rejection) => Some(rejection),
        }
    }
}

impl From<Rejection> for ValidationVerdict {
    fn from(rejection: Rejection) -> Self {
        ValidationVerdict::Invalid(rejection)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Available,
    Taken,
}

pub struct ScheduleValidator {
    gateway: Arc<AvailabilityGateway>,
    clock: Arc<dyn Clock>,
}

impl ScheduleValidator {
    pub fn new(gateway: Arc<AvailabilityGateway>, clock: Arc<dyn Clock>) -> Self {
        Self { gateway, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn validate(
        &self,
        tenant: &TenantId,
        policy: &BookingPolicy,
        date: &str,
        time: &str,
    ) -> ValidationVerdict {
        // 1-2. Formats
        let date = match NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d") {
            Ok(date) => date,
            Err(_) => return Rejection::BadDateFormat.into(),
        };
        let start = match parse_clock_time(time) {
            Some(start) => start,
            None => return Rejection::BadTimeFormat.into(),
        };

        // 3. Past, in business time
        if date.and_time(start) <= self.clock.now_naive() {
            return Rejection::AlreadyPassed.into();
        }

        // 4. Schedule; unavailable means permissive
        let schedule = match self.gateway.schedule(tenant).await {
            Ok(Some(schedule)) => schedule,
            Ok(None) => {
                warn!(tenant = %tenant, "no schedule available, allowing appointment");
                return ValidationVerdict::Valid;
            }
            Err(err) => {
                warn!(tenant = %tenant, error = %err, "schedule lookup failed, allowing appointment");
                return ValidationVerdict::Valid;
            }
        };

        // 5-6. Day open and parseable
        let day = date.weekday();
        let hours = match schedule.day(day) {
            DaySchedule::Closed => return Rejection::DayClosed(day).into(),
            DaySchedule::Open(hours) => hours,
            DaySchedule::Unparsed(text) => {
                warn!(tenant = %tenant, day = %day, hours = text, "unparseable day schedule, allowing appointment");
                return ValidationVerdict::Valid;
            }
        };

        // 7. Within opening hours
        if !hours.contains(start) {
            return if start < hours.start {
                Rejection::BeforeOpening { day, hours }.into()
            } else {
                Rejection::AfterClosing { day, hours }.into()
            };
        }

        // 8. Whole appointment fits before closing
        if minute_of_day(start).saturating_add(policy.duration_minutes)
            > minute_of_day(hours.end)
        {
            return Rejection::ExceedsClosing {
                day,
                hours,
                duration_minutes: policy.duration_minutes,
            }
            .into();
        }

        // 9. Blocked windows
        if schedule.is_blocked(date, start, policy.duration_minutes) {
            debug!(tenant = %tenant, %date, %start, "slot overlaps a blocked window");
            return Rejection::Blocked.into();
        }

        // 10. Existing bookings
        if self.check_slot(tenant, policy, date, start).await == SlotStatus::Taken {
            return Rejection::SlotTaken.into();
        }

        debug!(tenant = %tenant, %date, %start, "slot is valid");
        ValidationVerdict::Valid
    }

    /// Asks the scheduling endpoint whether `[start, start + duration)` on
    /// `date` is free. Anything short of a definite "taken" counts as
    /// available.
    pub async fn check_slot(
        &self,
        tenant: &TenantId,
        policy: &BookingPolicy,
        date: NaiveDate,
        start: NaiveTime,
    ) -> SlotStatus {
        let start_at = date.and_time(start);
        let query = SlotQuery {
            tenant: tenant.clone(),
            start: start_at,
            end: start_at + policy.duration(),
            slots: policy.slots,
            assign_staff: policy.assign_staff,
            assign_branch: policy.assign_branch,
        };

        if policy.log_booking_calls {
            info!(
                tenant = %tenant,
                payload = %serde_json::to_string(&UpstreamRequest::CheckSlot(&query)).unwrap_or_default(),
                "CONSULTAR_DISPONIBILIDAD request"
            );
        }

        match self.gateway.check_slot(&query).await {
            Ok(true) => SlotStatus::Available,
            Ok(false) => {
                debug!(tenant = %tenant, start = %query.start, "slot already booked");
                SlotStatus::Taken
            }
            Err(err) => {
                warn!(tenant = %tenant, error = %err, "availability check failed, assuming available");
                SlotStatus::Available
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::FixedClock,
        config::ServiceConfig,
        mock_service::{MockAvailabilityService, ServerMode},
        schedule::ScheduleRecord,
    };
    use chrono::FixedOffset;
    use serde_json::json;
    use std::{sync::atomic::Ordering, time::Duration as StdDuration};

    fn lima() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    // Monday 2026-01-26, 08:00 in Lima
    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::at_local("2026-01-26 08:00:00", lima()).unwrap())
    }

    fn weekday_schedule() -> ScheduleRecord {
        serde_json::from_value(json!({
            "reunion_lunes": "09:00-18:00",
            "reunion_martes": "09:00-18:00",
            "reunion_miercoles": "9:00 AM - 1:00 PM",
            "reunion_jueves": "por la tarde",
            "reunion_viernes": "09:00-18:00",
            "reunion_sabado": "Cerrado",
            "reunion_domingo": null,
            "horarios_bloqueados": [
                { "fecha": "2026-01-30", "inicio": "13:00", "fin": "14:00" }
            ]
        }))
        .unwrap()
    }

    fn setup() -> (Arc<MockAvailabilityService>, Arc<AvailabilityGateway>, ScheduleValidator) {
        let server = Arc::new(MockAvailabilityService::new());
        server.set_schedule("1", weekday_schedule());
        let gateway = Arc::new(AvailabilityGateway::new(
            server.clone(),
            &ServiceConfig::default(),
        ));
        let validator = ScheduleValidator::new(gateway.clone(), clock());
        (server, gateway, validator)
    }

    async fn verdict(validator: &ScheduleValidator, date: &str, time: &str) -> ValidationVerdict {
        validator
            .validate(&TenantId::from("1"), &BookingPolicy::default(), date, time)
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_tuesday_afternoon_is_valid() {
        let (server, _, validator) = setup();

        assert_eq!(verdict(&validator, "2026-01-27", "02:00 PM").await, ValidationVerdict::Valid);

        let query = server.last_slot_query().unwrap();
        assert_eq!(query.start.to_string(), "2026-01-27 14:00:00");
        assert_eq!(query.end.to_string(), "2026-01-27 15:00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_appointment_running_past_closing() {
        let (_, _, validator) = setup();

        let result = verdict(&validator, "2026-01-27", "17:01").await;
        assert!(matches!(
            result,
            ValidationVerdict::Invalid(Rejection::ExceedsClosing { duration_minutes: 60, .. })
        ));
        let message = result.rejection().unwrap().to_string();
        assert!(message.contains("cierre: 06:00 PM"), "{}", message);

        assert_eq!(verdict(&validator, "2026-01-27", "17:00").await, ValidationVerdict::Valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_format_errors_come_first() {
        let (server, _, validator) = setup();

        assert_eq!(
            verdict(&validator, "27-01-2026", "02:00 PM").await,
            ValidationVerdict::Invalid(Rejection::BadDateFormat)
        );
        assert_eq!(
            verdict(&validator, "2026-01-27", "a las dos").await,
            ValidationVerdict::Invalid(Rejection::BadTimeFormat)
        );
        assert_eq!(server.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_is_judged_in_business_time() {
        let (_, _, validator) = setup();

        // The clock reads 08:00 in Lima, 13:00 UTC
        assert_eq!(
            verdict(&validator, "2026-01-26", "07:59").await,
            ValidationVerdict::Invalid(Rejection::AlreadyPassed)
        );
        assert_eq!(
            verdict(&validator, "2026-01-26", "08:00").await,
            ValidationVerdict::Invalid(Rejection::AlreadyPassed)
        );
        assert_eq!(verdict(&validator, "2026-01-26", "09:00").await, ValidationVerdict::Valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_days_name_the_day() {
        let (_, _, validator) = setup();

        let saturday = verdict(&validator, "2026-01-31", "10:00 AM").await;
        assert_eq!(saturday, ValidationVerdict::Invalid(Rejection::DayClosed(Weekday::Sat)));
        assert!(saturday.rejection().unwrap().to_string().contains("sábado"));

        // A missing slot counts as closed
        let sunday = verdict(&validator, "2026-02-01", "10:00 AM").await;
        assert_eq!(sunday, ValidationVerdict::Invalid(Rejection::DayClosed(Weekday::Sun)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_opening_hours_bounds() {
        let (_, _, validator) = setup();

        assert!(matches!(
            verdict(&validator, "2026-01-28", "08:30 AM").await,
            ValidationVerdict::Invalid(Rejection::BeforeOpening { day: Weekday::Wed, .. })
        ));
        let after = verdict(&validator, "2026-01-28", "1:00 PM").await;
        assert!(matches!(
            after,
            ValidationVerdict::Invalid(Rejection::AfterClosing { day: Weekday::Wed, .. })
        ));
        assert!(after
            .rejection()
            .unwrap()
            .to_string()
            .contains("09:00 AM a 01:00 PM"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_day_degrades_to_valid() {
        let (_, _, validator) = setup();
        assert_eq!(verdict(&validator, "2026-01-29", "11:00 PM").await, ValidationVerdict::Valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_window() {
        let (server, _, validator) = setup();

        assert_eq!(
            verdict(&validator, "2026-01-30", "12:30 PM").await,
            ValidationVerdict::Invalid(Rejection::Blocked)
        );
        assert_eq!(server.calls().check_slot.load(Ordering::SeqCst), 0);
        assert_eq!(verdict(&validator, "2026-01-30", "02:00 PM").await, ValidationVerdict::Valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_taken_slot() {
        let (server, _, validator) = setup();
        server.set_slot_available(false);

        assert_eq!(
            verdict(&validator, "2026-01-27", "10:00 AM").await,
            ValidationVerdict::Invalid(Rejection::SlotTaken)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_availability_failures_degrade_to_available() {
        let (server, gateway, validator) = setup();
        let tenant = TenantId::from("1");

        // Warm the schedule so only the availability call is affected
        gateway.schedule(&tenant).await.unwrap();

        server.set_business_failure(true);
        assert_eq!(verdict(&validator, "2026-01-27", "10:00 AM").await, ValidationVerdict::Valid);
        assert_eq!(gateway.scheduling_breaker().failure_count(&tenant), 0);

        server.set_business_failure(false);
        server.set_mode(ServerMode::CompleteOutage);
        assert_eq!(verdict(&validator, "2026-01-27", "10:00 AM").await, ValidationVerdict::Valid);
        assert_eq!(gateway.scheduling_breaker().failure_count(&tenant), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_timeout_degrades_and_counts_one_failure() {
        let (server, gateway, validator) = setup();
        server.set_delay(StdDuration::from_secs(60));
        let tenant = TenantId::from("1");

        assert_eq!(verdict(&validator, "2026-01-31", "10:00 AM").await, ValidationVerdict::Valid);
        assert_eq!(gateway.information_breaker().failure_count(&tenant), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_longer_policy_duration() {
        let (_, _, validator) = setup();
        let policy = BookingPolicy {
            duration_minutes: 90,
            ..BookingPolicy::default()
        };

        let verdict = validator
            .validate(&TenantId::from("1"), &policy, "2026-01-27", "16:45")
            .await;
        assert!(matches!(
            verdict,
            ValidationVerdict::Invalid(Rejection::ExceedsClosing { duration_minutes: 90, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_duration_exceeds_closing() {
        let (server, _, validator) = setup();
        let policy = BookingPolicy {
            duration_minutes: u32::MAX,
            ..BookingPolicy::default()
        };

        let verdict = validator
            .validate(&TenantId::from("1"), &policy, "2026-01-27", "10:00")
            .await;
        assert!(matches!(
            verdict,
            ValidationVerdict::Invalid(Rejection::ExceedsClosing { .. })
        ));
        assert!(server.last_slot_query().is_none());
    }

    #[test]
    fn test_policy_duration_is_bounded_on_load() {
        let policy: BookingPolicy =
            serde_json::from_value(json!({ "duration_minutes": 45, "assign_staff": false }))
                .unwrap();
        assert_eq!(policy.duration_minutes, 45);
        assert!(!policy.assign_staff);
        assert_eq!(policy.slots, 60);

        for minutes in [0u64, 1441, u64::from(u32::MAX)] {
            let result =
                serde_json::from_value::<BookingPolicy>(json!({ "duration_minutes": minutes }));
            assert!(result.is_err(), "{} minutes accepted", minutes);
        }
    }
}
