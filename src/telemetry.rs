// Hooks for reporting cache, circuit, upstream and tool outcomes. Emission
// (Prometheus or otherwise) belongs to the host; the core only calls these.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use dashmap::DashMap;

use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    CircuitOpen,
}

pub trait Telemetry: Send + Sync + 'static {
    fn cache_lookup(&self, _cache: &str, _outcome: CacheOutcome) {}

    fn cache_size(&self, _cache: &str, _size: usize) {}

    fn upstream_call(&self, _operation: &str, _success: bool, _elapsed: Duration) {}

    fn circuit_opened(&self, _service: &str, _tenant: &TenantId) {}

    fn tool_call(&self, _tool: &str, _success: bool) {}

    fn booking_attempt(&self) {}

    fn booking_succeeded(&self) {}

    fn booking_failed(&self, _reason: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {}

// In-memory counters, handy for tests and for hosts that scrape periodically.
#[derive(Debug, Default)]
pub struct TelemetryStats {
    pub cache_hits: AtomicUsize,
    pub cache_misses: AtomicUsize,
    pub cache_circuit_rejects: AtomicUsize,
    pub upstream_succeeded: AtomicUsize,
    pub upstream_failed: AtomicUsize,
    pub circuits_opened: AtomicUsize,
    pub tool_calls_ok: AtomicUsize,
    pub tool_calls_failed: AtomicUsize,
    pub booking_attempts: AtomicUsize,
    pub booking_successes: AtomicUsize,
    cache_sizes: DashMap<String, usize>,
    upstream_by_operation: DashMap<String, usize>,
    booking_failures: DashMap<String, usize>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_circuit_rejects: usize,
    pub upstream_succeeded: usize,
    pub upstream_failed: usize,
    pub circuits_opened: usize,
    pub tool_calls_ok: usize,
    pub tool_calls_failed: usize,
    pub booking_attempts: usize,
    pub booking_successes: usize,
}

impl TelemetryStats {
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
            cache_misses: self.cache_misses.load(Ordering::SeqCst),
            cache_circuit_rejects: self.cache_circuit_rejects.load(Ordering::SeqCst),
            upstream_succeeded: self.upstream_succeeded.load(Ordering::SeqCst),
            upstream_failed: self.upstream_failed.load(Ordering::SeqCst),
            circuits_opened: self.circuits_opened.load(Ordering::SeqCst),
            tool_calls_ok: self.tool_calls_ok.load(Ordering::SeqCst),
            tool_calls_failed: self.tool_calls_failed.load(Ordering::SeqCst),
            booking_attempts: self.booking_attempts.load(Ordering::SeqCst),
            booking_successes: self.booking_successes.load(Ordering::SeqCst),
        }
    }

    pub fn cache_size_of(&self, cache: &str) -> Option<usize> {
        self.cache_sizes.get(cache).map(|size| *size)
    }

    pub fn upstream_calls_for(&self, operation: &str) -> usize {
        self.upstream_by_operation
            .get(operation)
            .map(|count| *count)
            .unwrap_or(0)
    }

    pub fn booking_failures_for(&self, reason: &str) -> usize {
        self.booking_failures
            .get(reason)
            .map(|count| *count)
            .unwrap_or(0)
    }
}

impl Telemetry for TelemetryStats {
    fn cache_lookup(&self, _cache: &str, outcome: CacheOutcome) {
        let counter = match outcome {
            CacheOutcome::Hit => &self.cache_hits,
            CacheOutcome::Miss => &self.cache_misses,
            CacheOutcome::CircuitOpen => &self.cache_circuit_rejects,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn cache_size(&self, cache: &str, size: usize) {
        self.cache_sizes.insert(cache.to_string(), size);
    }

    fn upstream_call(&self, operation: &str, success: bool, _elapsed: Duration) {
        if success {
            self.upstream_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.upstream_failed.fetch_add(1, Ordering::SeqCst);
        }
        *self
            .upstream_by_operation
            .entry(operation.to_string())
            .or_insert(0) += 1;
    }

    fn circuit_opened(&self, _service: &str, _tenant: &TenantId) {
        self.circuits_opened.fetch_add(1, Ordering::SeqCst);
    }

    fn tool_call(&self, _tool: &str, success: bool) {
        if success {
            self.tool_calls_ok.fetch_add(1, Ordering::SeqCst);
        } else {
            self.tool_calls_failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn booking_attempt(&self) {
        self.booking_attempts.fetch_add(1, Ordering::SeqCst);
    }

    fn booking_succeeded(&self) {
        self.booking_successes.fetch_add(1, Ordering::SeqCst);
    }

    fn booking_failed(&self, reason: &str) {
        *self
            .booking_failures
            .entry(reason.to_string())
            .or_insert(0) += 1;
    }
}
