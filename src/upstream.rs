// Remote availability service: wire types, the service trait, and the HTTP
// implementation. Every operation is a JSON POST whose `codOpe` field selects
// the behavior.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{de::DeserializeOwned, Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::{
    config::{EndpointConfig, ServiceConfig},
    error::{AvailabilityError, ConfigError},
    schedule::ScheduleRecord,
    tenant::TenantId,
};

pub const WIRE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn wire_datetime<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&value.format(WIRE_DATETIME_FORMAT))
}

// Upstream flags are integers
fn wire_flag<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotQuery {
    #[serde(rename = "id_empresa")]
    pub tenant: TenantId,
    #[serde(rename = "fecha_inicio", serialize_with = "wire_datetime")]
    pub start: NaiveDateTime,
    #[serde(rename = "fecha_fin", serialize_with = "wire_datetime")]
    pub end: NaiveDateTime,
    pub slots: u32,
    #[serde(rename = "agendar_usuario", serialize_with = "wire_flag")]
    pub assign_staff: bool,
    #[serde(rename = "agendar_sucursal", serialize_with = "wire_flag")]
    pub assign_branch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestionQuery {
    #[serde(rename = "id_empresa")]
    pub tenant: TenantId,
    #[serde(rename = "duracion_minutos")]
    pub duration_minutes: u32,
    pub slots: u32,
    #[serde(rename = "agendar_usuario", serialize_with = "wire_flag")]
    pub assign_staff: bool,
    #[serde(rename = "agendar_sucursal", serialize_with = "wire_flag")]
    pub assign_branch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRequest {
    // Partition key for the calendar breaker; not part of the payload
    #[serde(skip)]
    pub tenant: TenantId,
    #[serde(rename = "usuario_id")]
    pub user_id: i64,
    #[serde(rename = "id_prospecto")]
    pub prospect_id: i64,
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "fecha_inicio", serialize_with = "wire_datetime")]
    pub start: NaiveDateTime,
    #[serde(rename = "fecha_fin", serialize_with = "wire_datetime")]
    pub end: NaiveDateTime,
    #[serde(rename = "correo_cliente")]
    pub client_email: String,
    #[serde(rename = "correo_usuario")]
    pub user_email: String,
    #[serde(rename = "agendar_usuario", serialize_with = "wire_flag")]
    pub assign_staff: bool,
}

/// Request envelope. The variant becomes the `codOpe` field.
#[derive(Debug, Serialize)]
#[serde(tag = "codOpe")]
pub enum UpstreamRequest<'a> {
    #[serde(rename = "OBTENER_HORARIO_REUNIONES")]
    Schedule { id_empresa: &'a TenantId },
    #[serde(rename = "OBTENER_CONTEXTO_NEGOCIO")]
    BusinessContext { id_empresa: &'a TenantId },
    #[serde(rename = "CONSULTAR_DISPONIBILIDAD")]
    CheckSlot(&'a SlotQuery),
    #[serde(rename = "SUGERIR_HORARIOS")]
    SuggestSlots(&'a SuggestionQuery),
    #[serde(rename = "CREAR_EVENTO")]
    CreateEvent(&'a EventRequest),
}

impl UpstreamRequest<'_> {
    pub fn operation(&self) -> &'static str {
        match self {
            UpstreamRequest::Schedule { .. } => "obtener_horario",
            UpstreamRequest::BusinessContext { .. } => "obtener_contexto_negocio",
            UpstreamRequest::CheckSlot(_) => "consultar_disponibilidad",
            UpstreamRequest::SuggestSlots(_) => "sugerir_horarios",
            UpstreamRequest::CreateEvent(_) => "crear_evento",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScheduleResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub horario_reuniones: Option<ScheduleRecord>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContextResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub contexto_negocio: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ContextResponse {
    // Context text, or None when missing or blank.
    pub fn text(&self) -> Option<String> {
        let text = match self.contexto_negocio.as_ref()? {
            Value::Null => return None,
            Value::String(text) => text.trim().to_string(),
            other => other.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SlotAvailability {
    #[serde(default)]
    pub success: bool,
    #[serde(default, rename = "disponible")]
    pub available: bool,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSuggestion {
    // "hoy", "mañana", or a label chosen by the upstream
    #[serde(default)]
    pub dia: String,
    #[serde(default)]
    pub hora_legible: String,
    #[serde(default = "default_true")]
    pub disponible: bool,
    #[serde(default)]
    pub fecha_inicio: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SuggestionsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub sugerencias: Vec<SlotSuggestion>,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub mensaje: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EventResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub google_meet_link: Option<String>,
    #[serde(default)]
    pub google_calendar_synced: Option<bool>,
    #[serde(default)]
    pub google_calendar_error: Option<String>,
}

/// The remote schedule/availability/booking service.
///
/// Implementations report transport trouble (connection, timeout, non-2xx,
/// undecodable body) as transport-class [`AvailabilityError`]s and hand back
/// `success:false` bodies untouched; deciding what a business failure means
/// is left to the caller.
#[async_trait]
pub trait AvailabilityService: Send + Sync + 'static {
    async fn fetch_schedule(&self, tenant: &TenantId) -> Result<ScheduleResponse, AvailabilityError>;

    async fn fetch_business_context(
        &self,
        tenant: &TenantId,
    ) -> Result<ContextResponse, AvailabilityError>;

    async fn check_slot(&self, query: &SlotQuery) -> Result<SlotAvailability, AvailabilityError>;

    async fn suggest_slots(
        &self,
        query: &SuggestionQuery,
    ) -> Result<SuggestionsResponse, AvailabilityError>;

    async fn create_event(&self, request: &EventRequest) -> Result<EventResponse, AvailabilityError>;
}

#[derive(Clone)]
pub struct HttpAvailabilityClient {
    client: reqwest::Client,
    endpoints: EndpointConfig,
    timeout: Duration,
}

impl HttpAvailabilityClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            timeout: config.timeout(),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        request: &UpstreamRequest<'_>,
    ) -> Result<T, AvailabilityError> {
        let operation = request.operation();
        debug!(operation, url, "posting to upstream");

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(operation, status = status.as_u16(), "upstream returned error status");
            return Err(AvailabilityError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        serde_json::from_str(&body).map_err(|e| {
            AvailabilityError::InvalidResponse(format!("{} response: {}", operation, e))
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> AvailabilityError {
        if error.is_timeout() {
            AvailabilityError::timeout(self.timeout)
        } else {
            AvailabilityError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl AvailabilityService for HttpAvailabilityClient {
    async fn fetch_schedule(&self, tenant: &TenantId) -> Result<ScheduleResponse, AvailabilityError> {
        self.post(
            &self.endpoints.information_url,
            &UpstreamRequest::Schedule { id_empresa: tenant },
        )
        .await
    }

    async fn fetch_business_context(
        &self,
        tenant: &TenantId,
    ) -> Result<ContextResponse, AvailabilityError> {
        self.post(
            &self.endpoints.information_url,
            &UpstreamRequest::BusinessContext { id_empresa: tenant },
        )
        .await
    }

    async fn check_slot(&self, query: &SlotQuery) -> Result<SlotAvailability, AvailabilityError> {
        self.post(&self.endpoints.scheduling_url, &UpstreamRequest::CheckSlot(query))
            .await
    }

    async fn suggest_slots(
        &self,
        query: &SuggestionQuery,
    ) -> Result<SuggestionsResponse, AvailabilityError> {
        self.post(&self.endpoints.scheduling_url, &UpstreamRequest::SuggestSlots(query))
            .await
    }

    async fn create_event(&self, request: &EventRequest) -> Result<EventResponse, AvailabilityError> {
        self.post(&self.endpoints.calendar_url, &UpstreamRequest::CreateEvent(request))
            .await
    }
}
