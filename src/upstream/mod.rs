//! Downstream service registry and request dispatch.
//!
//! # Data Flow
//! ```text
//! RouteRule.service
//!     → service.rs (ServiceRegistry lookup → ServiceEndpoint)
//!     → dispatcher.rs (URI rewrite, header propagation, timed forward)
//!     → Response | DispatchError
//! ```
//!
//! # Design Decisions
//! - Exactly one attempt per dispatch; no retries, so breaker accounting
//!   reflects ground truth and latency stays bounded
//! - Per-service timeout; a timed-out call is a failure and its late
//!   result is dropped

pub mod dispatcher;
pub mod service;

pub use dispatcher::{DispatchError, Dispatcher};
pub use service::{ServiceEndpoint, ServiceRegistry};
