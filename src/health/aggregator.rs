//! Read-only health and counter aggregation.
//!
//! # Responsibilities
//! - Monotonic process-lifetime counters (requests, rejections, trips)
//! - Per-service breaker snapshots for `/health`
//!
//! # Design Decisions
//! - Counters are relaxed atomics bumped from the pipeline; they reset
//!   only on process restart
//! - The aggregator never mutates breaker or limiter state

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::upstream::service::ServiceRegistry;

/// Aggregate gateway counters.
#[derive(Debug, Clone, Serialize)]
pub struct CountersSnapshot {
    pub total_requests: u64,
    pub rate_limit_rejections: u64,
    pub breaker_trips: u64,
    pub uptime_secs: u64,
}

/// Process-scoped health view. Constructed once at startup.
#[derive(Debug)]
pub struct HealthAggregator {
    started_at: Instant,
    total_requests: AtomicU64,
    rate_limit_rejections: AtomicU64,
    breaker_trips: AtomicU64,
}

impl Default for HealthAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthAggregator {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            rate_limit_rejections: AtomicU64::new(0),
            breaker_trips: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_rejection(&self) {
        self.rate_limit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_breaker_trip(&self) {
        self.breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> CountersSnapshot {
        CountersSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            rate_limit_rejections: self.rate_limit_rejections.load(Ordering::Relaxed),
            breaker_trips: self.breaker_trips.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Payload for `/health`: gateway status plus one breaker snapshot
    /// per configured service.
    pub fn health_payload(
        &self,
        services: &ServiceRegistry,
        breakers: &CircuitBreakerRegistry,
    ) -> Value {
        let circuits: Vec<Value> = services
            .names()
            .iter()
            .filter_map(|name| breakers.snapshot(name))
            .map(|snap| json!(snap))
            .collect();

        json!({
            "status": "API Gateway is running",
            "checked_at": Utc::now().to_rfc3339(),
            "uptime_secs": self.started_at.elapsed().as_secs(),
            "circuits": circuits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic() {
        let health = HealthAggregator::new();
        health.record_request();
        health.record_request();
        health.record_rate_limit_rejection();
        health.record_breaker_trip();

        let snap = health.counters();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.rate_limit_rejections, 1);
        assert_eq!(snap.breaker_trips, 1);
    }
}
