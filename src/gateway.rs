use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    circuit_breaker::PartitionedCircuitBreaker,
    config::{RetryConfig, ServiceConfig},
    dedup_cache::DeduplicatingCache,
    error::AvailabilityError,
    resilience::ResilientCaller,
    schedule::ScheduleRecord,
    telemetry::{NoopTelemetry, Telemetry},
    tenant::TenantId,
    upstream::{
        AvailabilityService, EventRequest, EventResponse, SlotQuery, SuggestionQuery,
        SuggestionsResponse,
    },
};

/// Single entry point to the remote availability service.
///
/// Each remote endpoint gets its own per-tenant breaker: the information
/// endpoint (schedule, business context), the scheduling endpoint (exact slot
/// checks, suggestions) and the calendar endpoint (event creation). Schedule
/// and context lookups are cached and deduplicated per tenant.
pub struct AvailabilityGateway {
    service: Arc<dyn AvailabilityService>,
    information: ResilientCaller,
    scheduling: ResilientCaller,
    calendar: ResilientCaller,
    schedules: DeduplicatingCache<ScheduleRecord>,
    contexts: DeduplicatingCache<String>,
}

impl AvailabilityGateway {
    pub fn new(service: Arc<dyn AvailabilityService>, config: &ServiceConfig) -> Self {
        Self::with_telemetry(service, config, Arc::new(NoopTelemetry))
    }

    pub fn with_telemetry(
        service: Arc<dyn AvailabilityService>,
        config: &ServiceConfig,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let caller = |service_name: &'static str| {
            let breaker = Arc::new(PartitionedCircuitBreaker::with_telemetry(
                service_name,
                &config.circuit_breaker_config,
                Arc::clone(&telemetry),
            ));
            ResilientCaller::new(breaker, config.retry_config.clone(), config.timeout())
                .with_telemetry(Arc::clone(&telemetry))
        };

        let information = caller("informacion");
        let scheduling = caller("agendar_reunion");
        // Creating an event is not idempotent
        let calendar = caller("calendario").with_retry(RetryConfig::no_retry());

        let schedules =
            DeduplicatingCache::new("horario", &config.schedule_cache, information.clone())
                .with_telemetry(Arc::clone(&telemetry));
        let contexts =
            DeduplicatingCache::new("contexto_negocio", &config.context_cache, information.clone())
                .with_telemetry(Arc::clone(&telemetry));

        Self {
            service,
            information,
            scheduling,
            calendar,
            schedules,
            contexts,
        }
    }

    /// Weekly schedule of `tenant`. `Ok(None)` when the tenant is blank or the
    /// upstream has no schedule for it.
    pub async fn schedule(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<ScheduleRecord>, AvailabilityError> {
        let service = Arc::clone(&self.service);
        let key = tenant.clone();

        let outcome = self
            .schedules
            .get_or_fetch(tenant, move || {
                let service = Arc::clone(&service);
                let key = key.clone();
                async move {
                    let response = service.fetch_schedule(&key).await?;
                    if !response.success {
                        return Err(AvailabilityError::Business(
                            response
                                .error
                                .unwrap_or_else(|| "Horario no disponible".to_string()),
                        ));
                    }
                    if response.horario_reuniones.is_none() {
                        info!(tenant = %key, "tenant has no meeting schedule");
                    }
                    Ok(response.horario_reuniones)
                }
            })
            .await;

        no_data_on_rejection(tenant, "schedule", outcome)
    }

    pub async fn business_context(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<String>, AvailabilityError> {
        let service = Arc::clone(&self.service);
        let key = tenant.clone();

        let outcome = self
            .contexts
            .get_or_fetch(tenant, move || {
                let service = Arc::clone(&service);
                let key = key.clone();
                async move {
                    let response = service.fetch_business_context(&key).await?;
                    if !response.success {
                        return Err(AvailabilityError::Business(
                            response
                                .error
                                .clone()
                                .unwrap_or_else(|| "Contexto de negocio no disponible".to_string()),
                        ));
                    }
                    let context = response.text();
                    debug!(
                        tenant = %key,
                        length = context.as_ref().map(|c| c.chars().count()).unwrap_or(0),
                        "business context received"
                    );
                    Ok(context)
                }
            })
            .await;

        no_data_on_rejection(tenant, "business context", outcome)
    }

    /// Whether `[query.start, query.end)` is free. A `success:false` answer
    /// comes back as [`AvailabilityError::Business`].
    pub async fn check_slot(&self, query: &SlotQuery) -> Result<bool, AvailabilityError> {
        self.scheduling
            .call(&query.tenant, "consultar_disponibilidad", || async {
                let response = self.service.check_slot(query).await?;
                if !response.success {
                    return Err(AvailabilityError::Business(
                        response
                            .error
                            .unwrap_or_else(|| "Consulta de disponibilidad sin éxito".to_string()),
                    ));
                }
                Ok(response.available)
            })
            .await
    }

    pub async fn suggest_slots(
        &self,
        query: &SuggestionQuery,
    ) -> Result<SuggestionsResponse, AvailabilityError> {
        self.scheduling
            .call(&query.tenant, "sugerir_horarios", || async {
                let response = self.service.suggest_slots(query).await?;
                if !response.success {
                    return Err(AvailabilityError::Business(
                        response
                            .error
                            .clone()
                            .unwrap_or_else(|| "Sugerencia de horarios sin éxito".to_string()),
                    ));
                }
                Ok(response)
            })
            .await
    }

    pub async fn create_event(
        &self,
        request: &EventRequest,
    ) -> Result<EventResponse, AvailabilityError> {
        self.calendar
            .call(&request.tenant, "crear_evento", || async {
                let response = self.service.create_event(request).await?;
                if !response.success {
                    let message = response
                        .message
                        .clone()
                        .or_else(|| response.error.clone())
                        .unwrap_or_else(|| "Error desconocido".to_string());
                    return Err(AvailabilityError::Business(message));
                }
                Ok(response)
            })
            .await
    }

    pub fn invalidate_schedule(&self, tenant: &TenantId) -> bool {
        self.schedules.invalidate(tenant)
    }

    pub fn schedule_cache(&self) -> &DeduplicatingCache<ScheduleRecord> {
        &self.schedules
    }

    pub fn context_cache(&self) -> &DeduplicatingCache<String> {
        &self.contexts
    }

    pub fn information_breaker(&self) -> &PartitionedCircuitBreaker {
        self.information.breaker()
    }

    pub fn scheduling_breaker(&self) -> &PartitionedCircuitBreaker {
        self.scheduling.breaker()
    }

    pub fn calendar_breaker(&self) -> &PartitionedCircuitBreaker {
        self.calendar.breaker()
    }
}

// A `success:false` answer proves the endpoint is reachable: it went through
// the caller as `Business`, leaving the breaker alone, and reads as "no data".
fn no_data_on_rejection<V>(
    tenant: &TenantId,
    lookup: &'static str,
    outcome: Result<Option<V>, AvailabilityError>,
) -> Result<Option<V>, AvailabilityError> {
    match outcome {
        Err(AvailabilityError::Business(reason)) => {
            warn!(tenant = %tenant, lookup, reason = %reason, "lookup unsuccessful");
            Ok(None)
        }
        other => other,
    }
}
