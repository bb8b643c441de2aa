//! Circuit breaker for downstream service protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: service assumed down, requests fail fast
//! - Half-Open: testing if the service recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first caller after recovery_timeout (wins the probe)
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails (fresh opened_at)
//! ```
//!
//! # Design Decisions
//! - One breaker per service, each behind its own mutex (no global lock)
//! - Open → Half-Open transition and probe admission are a single
//!   check-and-set under the breaker mutex, so exactly one concurrent
//!   caller receives the probe permit
//! - 4xx responses are successful round trips; only 5xx, timeouts, and
//!   connect failures count as breaker failures (enforced by the caller)
//! - Fixed recovery timeout after a failed probe; the per-service
//!   `recovery_timeout` config is the tuning point

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Mutex;

use crate::upstream::service::ServiceEndpoint;

/// Breaker state, visible through snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    /// When the in-flight probe was granted. A probe whose caller never
    /// reports back (client disconnect cancels the handler) is abandoned
    /// and re-granted once `recovery_timeout` elapses past this point.
    probe_granted_at: Option<Instant>,
}

#[derive(Debug)]
struct Breaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

/// Read-only view of one breaker, for health and metrics.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    /// Seconds until the next probe is admitted; only set while open.
    pub retry_in_secs: Option<u64>,
}

/// Per-service circuit breaker registry.
///
/// One breaker per configured service; breakers for independent services
/// never contend with each other.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Breaker>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a breaker for a service. Called once per service at startup.
    pub fn register(&self, service: &ServiceEndpoint) {
        self.breakers.insert(
            service.name.clone(),
            Breaker {
                failure_threshold: service.failure_threshold,
                recovery_timeout: service.recovery_timeout,
                inner: Mutex::new(BreakerInner {
                    state: BreakerState::Closed,
                    consecutive_failures: 0,
                    opened_at: None,
                    probe_in_flight: false,
                    probe_granted_at: None,
                }),
            },
        );
    }

    /// Whether a request to `service` may proceed. While open, the first
    /// caller at/after `opened_at + recovery_timeout` transitions the
    /// breaker to half-open and is granted the single probe; everyone else
    /// is rejected until the probe resolves. A probe that is never
    /// reported (its caller was cancelled) expires after another
    /// `recovery_timeout` and the next caller takes it over.
    pub fn allow(&self, service: &str) -> bool {
        self.allow_at(service, Instant::now())
    }

    fn allow_at(&self, service: &str, now: Instant) -> bool {
        let Some(breaker) = self.breakers.get(service) else {
            // Unregistered services are not breaker-protected.
            return true;
        };
        let mut inner = breaker.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let opened_at = inner
                    .opened_at
                    .expect("open breaker always has opened_at");
                if now.duration_since(opened_at) >= breaker.recovery_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    inner.probe_granted_at = Some(now);
                    tracing::info!(service = %service, "circuit breaker half-open, probe admitted");
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                let probe_abandoned = inner.probe_in_flight
                    && inner
                        .probe_granted_at
                        .is_some_and(|granted| now.duration_since(granted) >= breaker.recovery_timeout);
                if inner.probe_in_flight && !probe_abandoned {
                    false
                } else {
                    if probe_abandoned {
                        tracing::warn!(service = %service, "probe went unreported, re-admitting");
                    }
                    inner.probe_in_flight = true;
                    inner.probe_granted_at = Some(now);
                    true
                }
            }
        }
    }

    /// Record a successful round trip (2xx-4xx).
    pub fn record_success(&self, service: &str) {
        let Some(breaker) = self.breakers.get(service) else {
            return;
        };
        let mut inner = breaker.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
                inner.probe_granted_at = None;
                tracing::info!(service = %service, "circuit breaker closed after successful probe");
            }
            // Stale result from before the breaker opened; ignore.
            BreakerState::Open => {}
        }
    }

    /// Record a failed round trip (5xx, timeout, connect failure).
    /// Returns true when this call tripped the breaker open.
    pub fn record_failure(&self, service: &str) -> bool {
        self.record_failure_at(service, Instant::now())
    }

    fn record_failure_at(&self, service: &str, now: Instant) -> bool {
        let Some(breaker) = self.breakers.get(service) else {
            return false;
        };
        let mut inner = breaker.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= breaker.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    inner.consecutive_failures = 0;
                    tracing::warn!(
                        service = %service,
                        threshold = breaker.failure_threshold,
                        "circuit breaker opened"
                    );
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                inner.probe_granted_at = None;
                tracing::warn!(service = %service, "circuit breaker reopened after failed probe");
                true
            }
            // Stale result; already open.
            BreakerState::Open => false,
        }
    }

    /// Snapshot one breaker for `/health`.
    pub fn snapshot(&self, service: &str) -> Option<BreakerSnapshot> {
        self.snapshot_at(service, Instant::now())
    }

    fn snapshot_at(&self, service: &str, now: Instant) -> Option<BreakerSnapshot> {
        let breaker = self.breakers.get(service)?;
        let inner = breaker.inner.lock().expect("breaker mutex poisoned");
        let retry_in_secs = match (inner.state, inner.opened_at) {
            (BreakerState::Open, Some(opened_at)) => {
                let elapsed = now.duration_since(opened_at);
                Some(breaker.recovery_timeout.saturating_sub(elapsed).as_secs())
            }
            _ => None,
        };
        Some(BreakerSnapshot {
            service: service.to_string(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            retry_in_secs,
        })
    }

    /// Force a breaker back to closed. Operator escape hatch.
    pub fn reset(&self, service: &str) {
        let Some(breaker) = self.breakers.get(service) else {
            return;
        };
        let mut inner = breaker.inner.lock().expect("breaker mutex poisoned");
        let previous = inner.state;
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        inner.probe_granted_at = None;
        tracing::info!(service = %service, previous = ?previous, "circuit breaker manually reset");
    }
}
