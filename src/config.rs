// Service configuration: upstream endpoints, resilience knobs and cache sizing.

use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;

use crate::error::ConfigError;

// Upstream endpoints, one per remote script.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    // Schedule and business context (OBTENER_HORARIO_REUNIONES, OBTENER_CONTEXTO_NEGOCIO)
    pub information_url: String,
    // Availability and suggestions (CONSULTAR_DISPONIBILIDAD, SUGERIR_HORARIOS)
    pub scheduling_url: String,
    // Event creation (CREAR_EVENTO)
    pub calendar_url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            information_url: "http://localhost:8080/ws_informacion_ia.php".to_string(),
            scheduling_url: "http://localhost:8080/ws_agendar_reunion.php".to_string(),
            calendar_url: "http://localhost:8080/ws_calendario.php".to_string(),
        }
    }
}

// Retry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    // Total attempts per call, including the first one
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    // Single attempt, used for non-idempotent operations.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 1,
            ..Self::default()
        }
    }
}

// Circuit breaker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    // How long failure memory survives without new failures
    pub reset_timeout_ms: u64,
    // Above this many tenants, expired failure memory is purged eagerly
    pub max_tracked_keys: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_ms: 300_000,
            max_tracked_keys: 500,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

// Cache configuration options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub default_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            default_ttl_seconds: 3600,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub endpoints: EndpointConfig,
    pub timeout_ms: u64,
    pub retry_config: RetryConfig,
    pub circuit_breaker_config: CircuitBreakerConfig,
    pub schedule_cache: CacheConfig,
    pub context_cache: CacheConfig,
    // Business timezone as a fixed UTC offset. Lima has no DST.
    pub timezone_offset_minutes: i32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoints: EndpointConfig::default(),
            timeout_ms: 10_000,
            retry_config: RetryConfig::default(),
            circuit_breaker_config: CircuitBreakerConfig::default(),
            schedule_cache: CacheConfig {
                max_entries: 500,
                default_ttl_seconds: 60 * 60,
            },
            context_cache: CacheConfig {
                max_entries: 500,
                default_ttl_seconds: 60 * 60,
            },
            timezone_offset_minutes: -5 * 60,
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoints(mut self, endpoints: EndpointConfig) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry_config = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker_config = breaker;
        self
    }

    pub fn with_schedule_ttl(mut self, ttl: Duration) -> Self {
        self.schedule_cache.default_ttl_seconds = ttl.as_secs();
        self
    }

    pub fn with_timezone_offset_minutes(mut self, minutes: i32) -> Self {
        self.timezone_offset_minutes = minutes;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn business_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.timezone_offset_minutes * 60).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "timezone offset out of range: {} minutes",
                self.timezone_offset_minutes
            ))
        })
    }

    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    // Defaults overridden by the environment variables the deployment sets.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("API_INFORMACION_URL") {
            config.endpoints.information_url = url;
        }
        if let Some(url) = lookup("API_AGENDAR_REUNION_URL") {
            config.endpoints.scheduling_url = url;
        }
        if let Some(url) = lookup("API_CALENDAR_URL") {
            config.endpoints.calendar_url = url;
        }
        if let Some(raw) = lookup("HTTP_TIMEOUT_SECONDS") {
            let secs: f64 = parse_env("HTTP_TIMEOUT_SECONDS", &raw)?;
            config.timeout_ms = (secs * 1000.0) as u64;
        }
        if let Some(raw) = lookup("SCHEDULE_CACHE_TTL_MINUTES") {
            let minutes: u64 = parse_env("SCHEDULE_CACHE_TTL_MINUTES", &raw)?;
            config.schedule_cache.default_ttl_seconds = minutes * 60;
        }
        if let Some(raw) = lookup("TIMEZONE_OFFSET_MINUTES") {
            config.timezone_offset_minutes = parse_env("TIMEZONE_OFFSET_MINUTES", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        if self.retry_config.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "retry_config.max_retries must be at least 1".into(),
            ));
        }
        if self.circuit_breaker_config.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker_config.failure_threshold must be at least 1".into(),
            ));
        }
        if self.schedule_cache.max_entries == 0 || self.context_cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache max_entries must be positive".into()));
        }
        for url in [
            &self.endpoints.information_url,
            &self.endpoints.scheduling_url,
            &self.endpoints.calendar_url,
        ] {
            if url.trim().is_empty() {
                return Err(ConfigError::Invalid("endpoint urls must not be empty".into()));
            }
        }
        self.business_offset()?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_config.max_retries, 2);
        assert_eq!(config.circuit_breaker_config.failure_threshold, 3);
        assert_eq!(
            config.business_offset().unwrap(),
            FixedOffset::west_opt(5 * 3600).unwrap()
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("API_CALENDAR_URL", "http://calendar.local/ws"),
            ("HTTP_TIMEOUT_SECONDS", "2.5"),
            ("SCHEDULE_CACHE_TTL_MINUTES", "5"),
            ("TIMEZONE_OFFSET_MINUTES", "60"),
        ]
        .into_iter()
        .collect();

        let config =
            ServiceConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.endpoints.calendar_url, "http://calendar.local/ws");
        assert_eq!(config.timeout_ms, 2500);
        assert_eq!(config.schedule_cache.default_ttl_seconds, 300);
        assert_eq!(config.timezone_offset_minutes, 60);
    }

    #[test]
    fn test_bad_env_value_is_rejected() {
        let result = ServiceConfig::from_lookup(|name| {
            (name == "SCHEDULE_CACHE_TTL_MINUTES").then(|| "soon".to_string())
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv {
                name: "SCHEDULE_CACHE_TTL_MINUTES",
                ..
            })
        ));
    }

    #[test]
    fn test_from_json_partial_document() {
        let config = ServiceConfig::from_json(
            r#"{ "timeout_ms": 1500, "retry_config": { "max_retries": 4 } }"#,
        )
        .unwrap();
        assert_eq!(config.timeout_ms, 1500);
        assert_eq!(config.retry_config.max_retries, 4);
        assert_eq!(config.retry_config.initial_backoff_ms, 1000);

        let err = ServiceConfig::from_json(r#"{ "retry_config": { "max_retries": 0 } }"#);
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }
}
