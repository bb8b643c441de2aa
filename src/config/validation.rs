//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Referential integrity (routes reference configured services)
//! - Value ranges (timeouts > 0, thresholds > 0, parseable URLs)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before the config is accepted into the system

use std::collections::HashSet;

use axum::http::Method;
use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no services configured")]
    NoServices,

    #[error("duplicate service name '{0}'")]
    DuplicateService(String),

    #[error("service '{name}': invalid base_url '{url}'")]
    InvalidBaseUrl { name: String, url: String },

    #[error("service '{0}': timeout_secs must be > 0")]
    ZeroTimeout(String),

    #[error("service '{0}': failure_threshold must be > 0")]
    ZeroThreshold(String),

    #[error("service '{0}': recovery_timeout_secs must be > 0")]
    ZeroRecovery(String),

    #[error("route '{prefix}': unknown service '{service}'")]
    UnknownService { prefix: String, service: String },

    #[error("route '{prefix}': invalid method filter '{method}'")]
    InvalidMethod { prefix: String, method: String },

    #[error("route prefix must start with '/': '{0}'")]
    BadPrefix(String),

    #[error("rate limit window_secs must be > 0")]
    ZeroWindow,
}

/// Validate a configuration, collecting every violation.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.services.is_empty() {
        errors.push(ValidationError::NoServices);
    }

    let mut names = HashSet::new();
    for service in &config.services {
        if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if Url::parse(&service.base_url).is_err() {
            errors.push(ValidationError::InvalidBaseUrl {
                name: service.name.clone(),
                url: service.base_url.clone(),
            });
        }
        if service.timeout_secs == 0 {
            errors.push(ValidationError::ZeroTimeout(service.name.clone()));
        }
        if service.failure_threshold == 0 {
            errors.push(ValidationError::ZeroThreshold(service.name.clone()));
        }
        if service.recovery_timeout_secs == 0 {
            errors.push(ValidationError::ZeroRecovery(service.name.clone()));
        }
    }

    for route in &config.routes {
        if !route.prefix.starts_with('/') {
            errors.push(ValidationError::BadPrefix(route.prefix.clone()));
        }
        if !names.contains(route.service.as_str()) {
            errors.push(ValidationError::UnknownService {
                prefix: route.prefix.clone(),
                service: route.service.clone(),
            });
        }
        if let Some(method) = &route.method {
            if Method::from_bytes(method.as_bytes()).is_err() {
                errors.push(ValidationError::InvalidMethod {
                    prefix: route.prefix.clone(),
                    method: method.clone(),
                });
            }
        }
    }

    if config.rate_limit.window_secs == 0 {
        errors.push(ValidationError::ZeroWindow);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
