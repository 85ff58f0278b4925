// TTL cache that collapses concurrent misses for the same tenant into a single
// upstream fetch.
//
// The fetch for a key runs as a detached task; callers subscribe to it through
// a shared future. Dropping a subscriber never cancels the fetch, and the
// task itself stores the value and releases the in-flight slot, so cleanup
// happens even when every subscriber has gone away.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::{mapref::entry::Entry, DashMap};
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use tracing::{debug, info};

use crate::{
    config::CacheConfig,
    error::AvailabilityError,
    resilience::ResilientCaller,
    telemetry::{CacheOutcome, NoopTelemetry, Telemetry},
    tenant::TenantId,
    ttl_cache::{CacheStats, TtlCache},
};

type FetchOutcome<V> = Result<Option<V>, AvailabilityError>;
type Flight<V> = Shared<BoxFuture<'static, FetchOutcome<V>>>;

struct InFlight<V> {
    id: u64,
    flight: Flight<V>,
}

pub struct DeduplicatingCache<V> {
    name: &'static str,
    entries: Arc<TtlCache<TenantId, V>>,
    in_flight: Arc<DashMap<TenantId, InFlight<V>>>,
    caller: ResilientCaller,
    next_flight_id: AtomicU64,
    telemetry: Arc<dyn Telemetry>,
}

impl<V> DeduplicatingCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, config: &CacheConfig, caller: ResilientCaller) -> Self {
        Self {
            name,
            entries: Arc::new(TtlCache::new(config)),
            in_flight: Arc::new(DashMap::new()),
            caller,
            next_flight_id: AtomicU64::new(0),
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn caller(&self) -> &ResilientCaller {
        &self.caller
    }

    /// Returns the cached value for `key`, fetching it on a miss.
    ///
    /// `fetch` is a factory: the resilient caller may invoke it once per
    /// attempt. `Ok(None)` means the upstream answered but had no data; it is
    /// handed to every waiter but not cached. A blank key returns `Ok(None)`
    /// without touching the cache.
    pub async fn get_or_fetch<F, Fut>(&self, key: &TenantId, fetch: F) -> FetchOutcome<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchOutcome<V>> + Send + 'static,
    {
        if key.is_blank() {
            return Ok(None);
        }

        // 1. Fast path
        if let Some(value) = self.entries.get(key) {
            debug!(cache = self.name, tenant = %key, "cache hit");
            self.telemetry.cache_lookup(self.name, CacheOutcome::Hit);
            return Ok(Some(value));
        }

        // 2. Fast reject while the tenant's circuit is open
        if self.caller.breaker().is_open(key) {
            self.telemetry
                .cache_lookup(self.name, CacheOutcome::CircuitOpen);
            return Err(self.caller.circuit_open_error(key));
        }
        self.telemetry.cache_lookup(self.name, CacheOutcome::Miss);

        // 3. Join the fetch already in flight for this key, or start one
        let flight = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                debug!(cache = self.name, tenant = %key, "joining in-flight fetch");
                existing.get().flight.clone()
            }
            Entry::Vacant(slot) => {
                let id = self.next_flight_id.fetch_add(1, Ordering::Relaxed);
                let flight = self.launch(key.clone(), id, fetch);
                slot.insert(InFlight {
                    id,
                    flight: flight.clone(),
                });
                flight
            }
        };

        flight.await
    }

    fn launch<F, Fut>(&self, key: TenantId, id: u64, fetch: F) -> Flight<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchOutcome<V>> + Send + 'static,
    {
        let name = self.name;
        let entries = Arc::clone(&self.entries);
        let in_flight = Arc::clone(&self.in_flight);
        let caller = self.caller.clone();
        let telemetry = Arc::clone(&self.telemetry);

        let task = tokio::spawn(async move {
            // A flight that finished just before this one registered may
            // already have filled the cache.
            let outcome = match entries.get(&key) {
                Some(value) => Ok(Some(value)),
                None => {
                    let result = caller.call(&key, name, fetch).await;
                    if let Ok(Some(value)) = &result {
                        entries.insert(key.clone(), value.clone());
                        telemetry.cache_size(name, entries.len());
                        info!(cache = name, tenant = %key, "value cached");
                    }
                    result
                }
            };

            // Store first, then release, so the next miss sees the value.
            in_flight.remove_if(&key, |_, current| current.id == id);
            outcome
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(AvailabilityError::Internal(format!(
                    "fetch task failed: {}",
                    join_error
                ))),
            }
        }
        .boxed()
        .shared()
    }

    pub fn peek(&self, key: &TenantId) -> Option<V> {
        self.entries.get(key)
    }

    pub fn invalidate(&self, key: &TenantId) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) -> usize {
        let removed = self.entries.clear();
        self.telemetry.cache_size(self.name, 0);
        debug!(cache = self.name, removed, "cache cleared");
        removed
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.stats()
    }
}
