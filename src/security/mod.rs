//! Authentication and admission control.

pub mod auth;
pub mod rate_limit;

pub use auth::{AuthContext, AuthError, TokenVerifier};
pub use rate_limit::{RateDecision, RateLimiter, Subject};
