//! Failure isolation for downstream services.

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreakerRegistry};
