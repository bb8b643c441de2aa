//! Response envelope and gateway error taxonomy.
//!
//! Every gateway-synthesized response uses the envelope:
//! ```text
//! success: { "success": true,  "data": <payload> }
//! failure: { "success": false, "error": { "code", "message", "retry_after"? } }
//! ```
//! Successful dispatches pass the downstream body through unchanged (the
//! services emit the same envelope themselves). Only `code` and `message`
//! ever leak out; internals stay in the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};
use thiserror::Error;

use crate::security::auth::AuthError;
use crate::upstream::dispatcher::DispatchError;

/// Wrap a payload in the success envelope.
pub fn success(data: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

/// Terminal pipeline rejections and dispatch failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Too many requests. Please try again later.")]
    RateLimited { retry_after_secs: u64 },

    #[error("{service} is temporarily unavailable")]
    CircuitOpen { service: String },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("No matching route")]
    NotFound,

    #[error("Internal gateway error")]
    Internal,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Auth(AuthError::InsufficientRole) => StatusCode::FORBIDDEN,
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Dispatch(DispatchError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Dispatch(DispatchError::Unreachable { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Auth(AuthError::InsufficientRole) => "FORBIDDEN",
            GatewayError::Auth(_) => "UNAUTHORIZED",
            GatewayError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            GatewayError::Dispatch(DispatchError::Timeout { .. }) => "UPSTREAM_TIMEOUT",
            GatewayError::Dispatch(DispatchError::Unreachable { .. }) => "UPSTREAM_UNREACHABLE",
            GatewayError::NotFound => "NOT_FOUND",
            GatewayError::Internal => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let GatewayError::RateLimited { retry_after_secs } = &self {
            error["retry_after"] = json!(retry_after_secs);
        }

        let body = Json(json!({ "success": false, "error": error }));
        (self.status(), body).into_response()
    }
}
