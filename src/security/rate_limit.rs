//! Sliding-window rate limiting.
//!
//! # Responsibilities
//! - Count requests per (subject, endpoint class) inside a trailing window
//! - Reject over-limit requests with a whole-second retry hint
//! - Evict idle windows so memory stays bounded
//!
//! # Design Decisions
//! - True sliding window (request timestamps), not fixed buckets
//! - DashMap keyed by (subject, class): independent keys never contend
//! - Authenticated requests are keyed by user id, anonymous by client IP
//! - Cleanup is a background responsibility, not a hot-path one

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::schema::RateLimitConfig;
use crate::routing::table::RateClass;

/// Who the request is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// Authenticated user id.
    User(String),
    /// Client IP for anonymous calls.
    Ip(IpAddr),
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::User(id) => write!(f, "user:{id}"),
            Subject::Ip(ip) => write!(f, "ip:{ip}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RateLimitKey {
    subject: Subject,
    class: RateClass,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        limit: u32,
        remaining: u32,
        /// Seconds until the oldest counted request leaves the window.
        reset_after_secs: u64,
    },
    Limited {
        retry_after_secs: u64,
    },
}

/// Sliding-window rate limiter, one window per (subject, class) key.
pub struct RateLimiter {
    windows: DashMap<RateLimitKey, VecDeque<Instant>>,
    window: Duration,
    auth_limit: u32,
    order_create_limit: u32,
    general_limit: u32,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            window: Duration::from_secs(config.window_secs),
            auth_limit: config.auth_limit,
            order_create_limit: config.order_create_limit,
            general_limit: config.general_limit,
            enabled: config.enabled,
        }
    }

    fn limit_for(&self, class: RateClass) -> u32 {
        match class {
            RateClass::Auth => self.auth_limit,
            RateClass::OrderCreate => self.order_create_limit,
            RateClass::General => self.general_limit,
        }
    }

    /// Admit or reject a request for (subject, class).
    pub fn try_acquire(&self, subject: Subject, class: RateClass) -> RateDecision {
        self.try_acquire_at(subject, class, Instant::now())
    }

    fn try_acquire_at(&self, subject: Subject, class: RateClass, now: Instant) -> RateDecision {
        let limit = self.limit_for(class);
        if !self.enabled {
            return RateDecision::Allowed {
                limit,
                remaining: limit,
                reset_after_secs: 0,
            };
        }

        let key = RateLimitKey { subject, class };
        let mut window = self.windows.entry(key).or_default();

        // Prune everything older than the trailing window.
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if (window.len() as u32) < limit {
            window.push_back(now);
            let oldest = *window.front().expect("window was just pushed to");
            let until_reset = self.window.saturating_sub(now.duration_since(oldest));
            RateDecision::Allowed {
                limit,
                remaining: limit - window.len() as u32,
                reset_after_secs: until_reset.as_secs_f64().ceil() as u64,
            }
        } else {
            // The oldest counted request leaving the window frees a slot.
            let oldest = *window.front().expect("window at limit is non-empty");
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            let retry_after_secs = (wait.as_secs_f64().ceil() as u64).max(1);
            RateDecision::Limited { retry_after_secs }
        }
    }

    /// Drop windows with no live entries. Run periodically from a
    /// background task.
    pub fn purge_stale(&self) {
        self.purge_stale_at(Instant::now())
    }

    fn purge_stale_at(&self, now: Instant) {
        self.windows.retain(|_, window| {
            while let Some(oldest) = window.front() {
                if now.duration_since(*oldest) >= self.window {
                    window.pop_front();
                } else {
                    break;
                }
            }
            !window.is_empty()
        });
    }

    /// Number of live windows; visibility for metrics and tests.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
