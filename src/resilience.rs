// Retry with exponential backoff in front of a per-tenant circuit breaker.
// Every upstream operation goes through one of these.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    circuit_breaker::PartitionedCircuitBreaker,
    config::RetryConfig,
    error::AvailabilityError,
    telemetry::{NoopTelemetry, Telemetry},
    tenant::TenantId,
};

#[derive(Clone)]
pub struct ResilientCaller {
    breaker: Arc<PartitionedCircuitBreaker>,
    retry_config: RetryConfig,
    timeout: Duration,
    telemetry: Arc<dyn Telemetry>,
}

impl ResilientCaller {
    pub fn new(
        breaker: Arc<PartitionedCircuitBreaker>,
        retry_config: RetryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            breaker,
            retry_config,
            timeout,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    // Same breaker, different retry policy (e.g. no retries for writes).
    pub fn with_retry(&self, retry_config: RetryConfig) -> Self {
        Self {
            retry_config,
            ..self.clone()
        }
    }

    pub fn breaker(&self) -> &Arc<PartitionedCircuitBreaker> {
        &self.breaker
    }

    pub fn circuit_open_error(&self, key: &TenantId) -> AvailabilityError {
        AvailabilityError::CircuitOpen {
            service: self.breaker.service().to_string(),
            tenant: key.clone(),
        }
    }

    /// Runs `fetch` until it succeeds or attempts run out.
    ///
    /// - Circuit open: fails with `CircuitOpen` without calling `fetch`.
    /// - Each attempt is bounded by the configured timeout; elapsing counts as
    ///   a transport failure.
    /// - Between attempts sleeps `initial_backoff × multiplier^attempt`.
    /// - Success resets the tenant's failure memory.
    /// - Non-transport errors are returned as-is: no retry, no breaker update.
    /// - Exhausting all attempts records exactly one failure and returns the
    ///   last error.
    pub async fn call<T, F, Fut>(
        &self,
        key: &TenantId,
        operation: &'static str,
        fetch: F,
    ) -> Result<T, AvailabilityError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AvailabilityError>>,
    {
        let service = self.breaker.service();

        if self.breaker.is_open(key) {
            warn!(
                service,
                operation,
                tenant = %key,
                "circuit open, call rejected without touching the network"
            );
            return Err(self.circuit_open_error(key));
        }

        let attempts = self.retry_config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            let started = Instant::now();
            let outcome = match tokio::time::timeout(self.timeout, fetch()).await {
                Ok(result) => result,
                Err(_) => Err(AvailabilityError::timeout(self.timeout)),
            };
            // A business rejection is still a completed call
            let completed = outcome.as_ref().map_or_else(|err| !err.is_transport(), |_| true);
            self.telemetry
                .upstream_call(operation, completed, started.elapsed());

            match outcome {
                Ok(value) => {
                    self.breaker.record_success(key);
                    if attempt > 0 {
                        debug!(service, operation, tenant = %key, attempt = attempt + 1, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_transport() => return Err(err),
                Err(err) => {
                    warn!(
                        service,
                        operation,
                        tenant = %key,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %err,
                        "upstream attempt failed"
                    );
                    last_error = Some(err);

                    if attempt + 1 < attempts {
                        tokio::time::sleep(calculate_backoff(attempt, &self.retry_config)).await;
                    }
                }
            }
        }

        self.breaker.record_failure(key);
        Err(last_error
            .unwrap_or_else(|| AvailabilityError::Internal("no attempt was made".to_string())))
    }
}

// Exponential backoff with optional jitter. With the default zero jitter this
// is exactly initial × multiplier^attempt, capped at max_backoff_ms.
pub fn calculate_backoff(retry_attempt: u32, config: &RetryConfig) -> Duration {
    let base_backoff_ms = (config.initial_backoff_ms as f64
        * config.backoff_multiplier.powf(retry_attempt as f64))
    .min(config.max_backoff_ms as f64);

    if config.jitter_factor <= 0.0 {
        return Duration::from_millis(base_backoff_ms as u64);
    }

    // Spread retries from many callers so they don't land together
    let jitter = rand::random::<f64>() * config.jitter_factor * base_backoff_ms;
    let backoff_ms = base_backoff_ms * (1.0 - config.jitter_factor / 2.0) + jitter;

    Duration::from_millis(backoff_ms as u64)
}
