//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::routing::table::{RateClass, RouteAuth};

/// Root configuration for the API gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, request limits).
    pub listener: ListenerConfig,

    /// Public path prefix stripped before forwarding upstream
    /// (`/v1/users/...` → `/users/...`).
    pub api_prefix: String,

    /// Downstream service definitions.
    pub services: Vec<ServiceConfig>,

    /// Route policy table mapping path prefixes to services.
    pub routes: Vec<RouteConfig>,

    /// Token verification settings.
    pub auth: AuthConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Total request timeout in seconds (outer bound, covers the whole
    /// pipeline; per-service dispatch timeouts are tighter).
    pub request_timeout_secs: u64,

    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// A downstream service fronted by the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Unique service identifier (used in logs, health, breaker keys).
    pub name: String,

    /// Base URL requests are forwarded to (e.g., "http://127.0.0.1:8001").
    pub base_url: String,

    /// Per-request dispatch timeout in seconds.
    #[serde(default = "default_service_timeout")]
    pub timeout_secs: u64,

    /// Consecutive failures before the circuit breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the breaker stays open before admitting a probe.
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
}

fn default_service_timeout() -> u64 {
    3
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    10
}

/// Route policy entry. Rules are evaluated in order; first match wins.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Path prefix to match (e.g., "/v1/users").
    pub prefix: String,

    /// Optional HTTP method filter ("POST", "DELETE", ...). None matches all.
    #[serde(default)]
    pub method: Option<String>,

    /// Target service name (must reference a configured service).
    pub service: String,

    /// Authentication requirement for the route.
    pub auth: RouteAuth,

    /// Rate limit class. None exempts the route from rate limiting.
    #[serde(default)]
    pub rate_class: Option<RateClass>,
}

/// Token verification settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HS256 secret. Tokens are issued by the user service with
    /// the same secret; the gateway only verifies.
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "your-secret-key-change-in-production".to_string(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sliding window duration in seconds.
    pub window_secs: u64,

    /// Requests per window for the `auth` class (login/register).
    pub auth_limit: u32,

    /// Requests per window for the `order-create` class.
    pub order_create_limit: u32,

    /// Requests per window for the `general` class.
    pub general_limit: u32,

    /// Interval for the stale-window cleanup task, in seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            auth_limit: 10,
            order_create_limit: 20,
            general_limit: 100,
            cleanup_interval_secs: 30,
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus exporter side port.
    pub metrics_enabled: bool,

    /// Prometheus exporter bind address.
    pub metrics_address: String,

    /// Default tracing filter when RUST_LOG is unset.
    pub log_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9100".to_string(),
            log_filter: "api_gateway=info,tower_http=info".to_string(),
        }
    }
}

impl Default for GatewayConfig {
    /// Defaults match the deployed topology: a users service and an
    /// orders service behind the `/v1` public surface.
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            api_prefix: "/v1".to_string(),
            services: default_services(),
            routes: default_routes(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig {
            name: "users".to_string(),
            base_url: "http://127.0.0.1:8001".to_string(),
            timeout_secs: default_service_timeout(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
        },
        ServiceConfig {
            name: "orders".to_string(),
            base_url: "http://127.0.0.1:8002".to_string(),
            timeout_secs: default_service_timeout(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
        },
    ]
}

/// The public route table. Order matters: method-filtered and more specific
/// prefixes come before the catch-all prefixes they overlap with.
fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig {
            prefix: "/v1/users/register".to_string(),
            method: None,
            service: "users".to_string(),
            auth: RouteAuth::Public,
            rate_class: Some(RateClass::Auth),
        },
        RouteConfig {
            prefix: "/v1/users/login".to_string(),
            method: None,
            service: "users".to_string(),
            auth: RouteAuth::Public,
            rate_class: Some(RateClass::Auth),
        },
        RouteConfig {
            prefix: "/v1/orders".to_string(),
            method: Some("POST".to_string()),
            service: "orders".to_string(),
            auth: RouteAuth::Authenticated,
            rate_class: Some(RateClass::OrderCreate),
        },
        RouteConfig {
            prefix: "/v1/users".to_string(),
            method: Some("DELETE".to_string()),
            service: "users".to_string(),
            auth: RouteAuth::Admin,
            rate_class: Some(RateClass::General),
        },
        RouteConfig {
            prefix: "/v1/users".to_string(),
            method: None,
            service: "users".to_string(),
            auth: RouteAuth::Authenticated,
            rate_class: Some(RateClass::General),
        },
        RouteConfig {
            prefix: "/v1/orders".to_string(),
            method: None,
            service: "orders".to_string(),
            auth: RouteAuth::Authenticated,
            rate_class: Some(RateClass::General),
        },
    ]
}
