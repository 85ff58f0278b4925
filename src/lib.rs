// Appointment availability core: tenant-scoped schedule lookups, slot
// validation, suggestions and calendar booking against the remote
// availability service.

pub mod error;
pub mod tenant;
pub mod config;
pub mod telemetry;

// Caching and resilience
pub mod ttl_cache;
pub mod circuit_breaker;
pub mod resilience;
pub mod dedup_cache;

// Upstream service
pub mod upstream;
pub mod mock_service;
pub mod gateway;

// Scheduling domain
pub mod clock;
pub mod locale;
pub mod schedule_parser;
pub mod schedule;
pub mod input;
pub mod validator;
pub mod recommendation;
pub mod booking;

// Re-export key types for convenience
pub use booking::{BookingDesk, BookingRequest};
pub use circuit_breaker::{CircuitState, PartitionedCircuitBreaker};
pub use clock::{BusinessClock, Clock, FixedClock};
pub use config::{CacheConfig, CircuitBreakerConfig, EndpointConfig, RetryConfig, ServiceConfig};
pub use dedup_cache::DeduplicatingCache;
pub use error::{AvailabilityError, ConfigError};
pub use gateway::AvailabilityGateway;
pub use recommendation::{Recommendation, RecommendationEngine};
pub use resilience::ResilientCaller;
pub use schedule::{DaySchedule, ScheduleRecord};
pub use telemetry::{NoopTelemetry, Telemetry, TelemetryStats};
pub use tenant::TenantId;
pub use ttl_cache::{CacheStats, TtlCache};
pub use upstream::{AvailabilityService, HttpAvailabilityClient};
pub use validator::{BookingPolicy, Rejection, ScheduleValidator, ValidationVerdict};
