// In-process stand-in for the remote availability service, used by the test
// suites and the benchmark. Supports outages, injected failures, latency and
// business-level rejections, and counts calls per operation.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    error::AvailabilityError,
    schedule::ScheduleRecord,
    tenant::TenantId,
    upstream::{
        AvailabilityService, ContextResponse, EventRequest, EventResponse, ScheduleResponse,
        SlotAvailability, SlotQuery, SlotSuggestion, SuggestionQuery, SuggestionsResponse,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    Normal,
    // Every other request fails with a 503
    PartialOutage,
    // Nothing is reachable
    CompleteOutage,
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub schedule: AtomicUsize,
    pub context: AtomicUsize,
    pub check_slot: AtomicUsize,
    pub suggest_slots: AtomicUsize,
    pub create_event: AtomicUsize,
}

pub struct MockAvailabilityService {
    mode: AtomicU8,
    request_count: AtomicUsize,
    calls: CallCounts,
    fail_next_requests: AtomicUsize,
    delay_ms: AtomicUsize,
    business_failure: AtomicBool,
    slot_available: AtomicBool,
    schedules: Mutex<HashMap<TenantId, ScheduleRecord>>,
    contexts: Mutex<HashMap<TenantId, String>>,
    suggestions: Mutex<SuggestionsResponse>,
    event_response: Mutex<EventResponse>,
    last_slot_query: Mutex<Option<SlotQuery>>,
    last_event: Mutex<Option<EventRequest>>,
}

impl Default for MockAvailabilityService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAvailabilityService {
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(0),
            request_count: AtomicUsize::new(0),
            calls: CallCounts::default(),
            fail_next_requests: AtomicUsize::new(0),
            delay_ms: AtomicUsize::new(0),
            business_failure: AtomicBool::new(false),
            slot_available: AtomicBool::new(true),
            schedules: Mutex::new(HashMap::new()),
            contexts: Mutex::new(HashMap::new()),
            suggestions: Mutex::new(SuggestionsResponse {
                success: true,
                ..SuggestionsResponse::default()
            }),
            event_response: Mutex::new(EventResponse {
                success: true,
                message: Some("Evento agregado correctamente".to_string()),
                google_meet_link: Some("https://meet.google.com/abc-defg-hij".to_string()),
                google_calendar_synced: Some(true),
                ..EventResponse::default()
            }),
            last_slot_query: Mutex::new(None),
            last_event: Mutex::new(None),
        }
    }

    pub fn set_mode(&self, mode: ServerMode) {
        let mode_value = match mode {
            ServerMode::Normal => 0,
            ServerMode::PartialOutage => 1,
            ServerMode::CompleteOutage => 2,
        };
        self.mode.store(mode_value, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn fail_next_requests(&self, count: usize) {
        self.fail_next_requests.store(count, Ordering::SeqCst);
    }

    // Answer every operation with `success:false`
    pub fn set_business_failure(&self, enabled: bool) {
        self.business_failure.store(enabled, Ordering::SeqCst);
    }

    pub fn set_slot_available(&self, available: bool) {
        self.slot_available.store(available, Ordering::SeqCst);
    }

    pub fn set_schedule(&self, tenant: impl Into<TenantId>, schedule: ScheduleRecord) {
        self.schedules.lock().insert(tenant.into(), schedule);
    }

    pub fn set_context(&self, tenant: impl Into<TenantId>, context: impl Into<String>) {
        self.contexts.lock().insert(tenant.into(), context.into());
    }

    pub fn set_suggestions(&self, suggestions: Vec<SlotSuggestion>, message: Option<&str>) {
        let mut response = self.suggestions.lock();
        response.success = true;
        response.total = suggestions.len() as u32;
        response.sugerencias = suggestions;
        response.mensaje = message.map(str::to_string);
    }

    pub fn set_event_response(&self, response: EventResponse) {
        *self.event_response.lock() = response;
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn last_slot_query(&self) -> Option<SlotQuery> {
        self.last_slot_query.lock().clone()
    }

    pub fn last_event(&self) -> Option<EventRequest> {
        self.last_event.lock().clone()
    }

    fn rejecting(&self) -> bool {
        self.business_failure.load(Ordering::SeqCst)
    }

    // Shared preamble: count, apply mode, latency and injected failures.
    async fn simulate(&self, counter: &AtomicUsize) -> Result<(), AvailabilityError> {
        counter.fetch_add(1, Ordering::SeqCst);
        let request_number = self.request_count.fetch_add(1, Ordering::SeqCst);

        match self.mode.load(Ordering::SeqCst) {
            2 => {
                return Err(AvailabilityError::Network(
                    "Service unavailable".to_string(),
                ))
            }
            1 if request_number % 2 == 0 => {
                return Err(AvailabilityError::HttpStatus { status: 503 });
            }
            _ => {}
        }

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        let remaining = self.fail_next_requests.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_requests
                .store(remaining - 1, Ordering::SeqCst);
            return Err(AvailabilityError::HttpStatus { status: 500 });
        }

        Ok(())
    }
}

#[async_trait]
impl AvailabilityService for MockAvailabilityService {
    async fn fetch_schedule(&self, tenant: &TenantId) -> Result<ScheduleResponse, AvailabilityError> {
        self.simulate(&self.calls.schedule).await?;

        if self.rejecting() {
            return Ok(ScheduleResponse {
                success: false,
                error: Some("Empresa no encontrada".to_string()),
                ..ScheduleResponse::default()
            });
        }

        let schedule = self.schedules.lock().get(tenant).cloned();
        Ok(ScheduleResponse {
            success: true,
            horario_reuniones: schedule,
            error: None,
        })
    }

    async fn fetch_business_context(
        &self,
        tenant: &TenantId,
    ) -> Result<ContextResponse, AvailabilityError> {
        self.simulate(&self.calls.context).await?;

        if self.rejecting() {
            return Ok(ContextResponse {
                success: false,
                error: Some("Empresa no encontrada".to_string()),
                ..ContextResponse::default()
            });
        }

        let context = self.contexts.lock().get(tenant).cloned();
        Ok(ContextResponse {
            success: true,
            contexto_negocio: context.map(Value::String),
            error: None,
        })
    }

    async fn check_slot(&self, query: &SlotQuery) -> Result<SlotAvailability, AvailabilityError> {
        self.simulate(&self.calls.check_slot).await?;
        *self.last_slot_query.lock() = Some(query.clone());

        if self.rejecting() {
            return Ok(SlotAvailability {
                success: false,
                error: Some("Parámetros incompletos".to_string()),
                ..SlotAvailability::default()
            });
        }

        Ok(SlotAvailability {
            success: true,
            available: self.slot_available.load(Ordering::SeqCst),
            error: None,
        })
    }

    async fn suggest_slots(
        &self,
        _query: &SuggestionQuery,
    ) -> Result<SuggestionsResponse, AvailabilityError> {
        self.simulate(&self.calls.suggest_slots).await?;

        if self.rejecting() {
            return Ok(SuggestionsResponse {
                success: false,
                error: Some("Parámetros incompletos".to_string()),
                ..SuggestionsResponse::default()
            });
        }

        Ok(self.suggestions.lock().clone())
    }

    async fn create_event(&self, request: &EventRequest) -> Result<EventResponse, AvailabilityError> {
        self.simulate(&self.calls.create_event).await?;
        *self.last_event.lock() = Some(request.clone());

        if self.rejecting() {
            return Ok(EventResponse {
                success: false,
                message: Some("No se pudo registrar el evento".to_string()),
                ..EventResponse::default()
            });
        }

        Ok(self.event_response.lock().clone())
    }
}
