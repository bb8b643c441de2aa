//! API Gateway Library
//!
//! Fronts the user and order services with authentication, admission
//! control, and failure isolation.

pub mod config;
pub mod http;
pub mod routing;
pub mod upstream;

// Admission & resilience
pub mod resilience;
pub mod security;

// Cross-cutting concerns
pub mod health;
pub mod lifecycle;
pub mod observability;

pub use config::schema::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
