use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    config::CircuitBreakerConfig,
    telemetry::{NoopTelemetry, Telemetry},
    tenant::TenantId,
    ttl_cache::TtlCache,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed { failures: u32 },
    Open { failures: u32 },
}

impl CircuitState {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitState::Open { .. })
    }
}

// Per-tenant circuit breaker. Failure counts live in a TTL map, so a tenant
// that stops failing is forgotten after the cooldown; that expiry is also what
// lets an open circuit try the upstream again. Live counts are never evicted
// for capacity: past `max_tracked_keys` only expired entries are dropped.
pub struct PartitionedCircuitBreaker {
    service: &'static str,
    failure_threshold: u32,
    max_tracked_keys: usize,
    failures: TtlCache<TenantId, u32>,
    telemetry: Arc<dyn Telemetry>,
}

impl PartitionedCircuitBreaker {
    pub fn new(service: &'static str, config: &CircuitBreakerConfig) -> Self {
        Self::with_telemetry(service, config, Arc::new(NoopTelemetry))
    }

    pub fn with_telemetry(
        service: &'static str,
        config: &CircuitBreakerConfig,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            service,
            failure_threshold: config.failure_threshold.max(1),
            max_tracked_keys: config.max_tracked_keys.max(1),
            failures: TtlCache::with_ttl(config.cooldown(), usize::MAX),
            telemetry,
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn failure_count(&self, key: &TenantId) -> u32 {
        self.failures.get(key).unwrap_or(0)
    }

    pub fn state(&self, key: &TenantId) -> CircuitState {
        let failures = self.failure_count(key);
        if failures >= self.failure_threshold {
            CircuitState::Open { failures }
        } else {
            CircuitState::Closed { failures }
        }
    }

    pub fn is_open(&self, key: &TenantId) -> bool {
        self.state(key).is_open()
    }

    pub fn record_success(&self, key: &TenantId) {
        if let Some(previous) = self.failures.remove(key) {
            debug!(
                service = self.service,
                tenant = %key,
                previous_failures = previous,
                "circuit reset after success"
            );
        }
    }

    // Only transport failures land here; a business-level rejection proves the
    // upstream is reachable and must not be recorded.
    pub fn record_failure(&self, key: &TenantId) -> u32 {
        if self.failures.len() >= self.max_tracked_keys {
            let purged = self.failures.purge_expired();
            debug!(service = self.service, purged, "expired failure memory purged");
        }

        let failures = self
            .failures
            .update(key.clone(), |current| current.copied().unwrap_or(0) + 1);

        if failures == self.failure_threshold {
            warn!(
                service = self.service,
                tenant = %key,
                failures,
                threshold = self.failure_threshold,
                "circuit breaker OPEN"
            );
            self.telemetry.circuit_opened(self.service, key);
        } else {
            debug!(
                service = self.service,
                tenant = %key,
                failures,
                threshold = self.failure_threshold,
                "failure recorded"
            );
        }

        failures
    }

    // Forcibly closes every circuit. Returns how many keys had failure memory.
    pub fn reset_all(&self) -> usize {
        self.failures.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TelemetryStats;
    use std::time::Duration;

    fn breaker() -> PartitionedCircuitBreaker {
        PartitionedCircuitBreaker::new(
            "informacion",
            &CircuitBreakerConfig {
                failure_threshold: 3,
                reset_timeout_ms: 300_000,
                max_tracked_keys: 100,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let breaker = breaker();
        let tenant = TenantId::from("10");

        assert_eq!(breaker.record_failure(&tenant), 1);
        assert_eq!(breaker.record_failure(&tenant), 2);
        assert!(!breaker.is_open(&tenant));

        assert_eq!(breaker.record_failure(&tenant), 3);
        assert!(breaker.is_open(&tenant));
        assert_eq!(breaker.state(&tenant), CircuitState::Open { failures: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_closes_circuit() {
        let breaker = breaker();
        let tenant = TenantId::from("10");

        for _ in 0..3 {
            breaker.record_failure(&tenant);
        }
        assert!(breaker.is_open(&tenant));

        breaker.record_success(&tenant);
        assert!(!breaker.is_open(&tenant));
        assert_eq!(breaker.failure_count(&tenant), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_closes_circuit() {
        let breaker = breaker();
        let tenant = TenantId::from("10");

        for _ in 0..3 {
            breaker.record_failure(&tenant);
        }
        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(breaker.is_open(&tenant));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!breaker.is_open(&tenant));
        assert_eq!(breaker.state(&tenant), CircuitState::Closed { failures: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_partitions_are_isolated() {
        let breaker = breaker();
        let failing = TenantId::from("1");
        let healthy = TenantId::from("2");

        for _ in 0..3 {
            breaker.record_failure(&failing);
        }
        breaker.record_failure(&healthy);

        assert!(breaker.is_open(&failing));
        assert!(!breaker.is_open(&healthy));
        assert_eq!(breaker.failure_count(&healthy), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuits_survive_key_pressure() {
        let breaker = PartitionedCircuitBreaker::new(
            "informacion",
            &CircuitBreakerConfig {
                failure_threshold: 3,
                reset_timeout_ms: 300_000,
                max_tracked_keys: 2,
            },
        );
        let tenants: Vec<TenantId> = (1..=5i64).map(TenantId::from).collect();

        for tenant in &tenants {
            for _ in 0..3 {
                breaker.record_failure(tenant);
            }
        }
        for tenant in &tenants {
            assert!(breaker.is_open(tenant), "tenant {} lost its open circuit", tenant);
        }

        // Expired memory is what gets dropped once the cooldown passes
        tokio::time::advance(Duration::from_secs(301)).await;
        breaker.record_failure(&TenantId::from("6"));
        assert_eq!(breaker.reset_all(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opening_is_reported_once() {
        let stats = Arc::new(TelemetryStats::default());
        let breaker = PartitionedCircuitBreaker::with_telemetry(
            "agendar",
            &CircuitBreakerConfig::default(),
            stats.clone(),
        );
        let tenant = TenantId::from("5");

        for _ in 0..5 {
            breaker.record_failure(&tenant);
        }
        assert_eq!(stats.snapshot().circuits_opened, 1);
        assert_eq!(breaker.reset_all(), 1);
        assert!(!breaker.is_open(&tenant));
    }
}
