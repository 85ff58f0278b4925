use std::time::Duration;

use thiserror::Error;

use crate::tenant::TenantId;

// Errors raised by the upstream-facing layers. Cloneable because a single
// in-flight fetch hands the same outcome to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Upstream returned HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("Circuit breaker open for {service} (tenant {tenant})")]
    CircuitOpen { service: String, tenant: TenantId },

    #[error("Upstream rejected request: {0}")]
    Business(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AvailabilityError {
    pub fn timeout(after: Duration) -> Self {
        AvailabilityError::Timeout(after.as_millis() as u64)
    }

    /// Transport-class failures are the only ones that are retried and the
    /// only ones that count against a tenant's circuit.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AvailabilityError::Network(_)
                | AvailabilityError::Timeout(_)
                | AvailabilityError::HttpStatus { .. }
                | AvailabilityError::InvalidResponse(_)
        )
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, AvailabilityError::CircuitOpen { .. })
    }

    // Short label used for telemetry and booking failure reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            AvailabilityError::Network(_) => "connection_error",
            AvailabilityError::Timeout(_) => "timeout",
            AvailabilityError::HttpStatus { .. } => "http_status",
            AvailabilityError::InvalidResponse(_) => "invalid_response",
            AvailabilityError::CircuitOpen { .. } => "circuit_open",
            AvailabilityError::Business(_) => "api_error",
            AvailabilityError::Internal(_) => "internal",
        }
    }

    // Text shown to the end user.
    pub fn user_message(&self) -> String {
        match self {
            AvailabilityError::CircuitOpen { .. } => {
                "El servicio no está disponible temporalmente. Por favor intenta en unos minutos."
                    .to_string()
            }
            AvailabilityError::Timeout(_) => "La conexión tardó demasiado tiempo".to_string(),
            AvailabilityError::Network(_) => "Error al conectar con el servidor".to_string(),
            AvailabilityError::HttpStatus { status } => {
                format!("Error del servidor ({})", status)
            }
            AvailabilityError::InvalidResponse(_) => {
                "Respuesta inválida del servidor".to_string()
            }
            AvailabilityError::Business(message) => message.clone(),
            AvailabilityError::Internal(_) => "Ocurrió un error inesperado".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Malformed configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}
