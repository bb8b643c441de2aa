//! Route policy table.
//!
//! # Responsibilities
//! - Resolve path + method to a target service, auth requirement, and
//!   rate limit class
//! - Match on path-segment boundaries ("/v1/users" does not match
//!   "/v1/users-archive")
//!
//! # Design Decisions
//! - Ordered rules, first match wins (specific before catch-all)
//! - Explicit NoMatch (None) rather than a silent default service

use axum::http::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema::RouteConfig;

/// Authentication requirement for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteAuth {
    /// No token required.
    Public,
    /// Any valid token.
    Authenticated,
    /// Valid token carrying the `admin` role.
    Admin,
}

/// Rate limit class. Limits are policy-configured per class, not per route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateClass {
    Auth,
    OrderCreate,
    General,
}

impl RateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateClass::Auth => "auth",
            RateClass::OrderCreate => "order-create",
            RateClass::General => "general",
        }
    }
}

/// A compiled route rule.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub prefix: String,
    pub method: Option<Method>,
    pub service: String,
    pub auth: RouteAuth,
    pub rate_class: Option<RateClass>,
}

#[derive(Debug, Error)]
#[error("route '{prefix}': invalid method filter '{method}'")]
pub struct InvalidRoute {
    pub prefix: String,
    pub method: String,
}

/// Immutable, ordered route table. Compiled once at startup.
#[derive(Debug)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// Compile the table from configuration, preserving rule order.
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, InvalidRoute> {
        let mut rules = Vec::with_capacity(routes.len());
        for route in routes {
            let method = match &route.method {
                Some(m) => Some(Method::from_bytes(m.as_bytes()).map_err(|_| InvalidRoute {
                    prefix: route.prefix.clone(),
                    method: m.clone(),
                })?),
                None => None,
            };
            rules.push(RouteRule {
                prefix: route.prefix.clone(),
                method,
                service: route.service.clone(),
                auth: route.auth,
                rate_class: route.rate_class,
            });
        }
        Ok(Self { rules })
    }

    /// Resolve a request to its route policy. First matching rule wins.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|rule| {
            if let Some(m) = &rule.method {
                if m != method {
                    return false;
                }
            }
            prefix_matches(&rule.prefix, path)
        })
    }
}

/// Prefix match on path-segment boundaries.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if !path.starts_with(prefix) {
        return false;
    }
    path.len() == prefix.len() || path.as_bytes()[prefix.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::GatewayConfig;

    fn default_table() -> RouteTable {
        RouteTable::from_config(&GatewayConfig::default().routes).unwrap()
    }

    #[test]
    fn register_and_login_are_public_auth_class() {
        let table = default_table();
        for path in ["/v1/users/register", "/v1/users/login"] {
            let rule = table.resolve(&Method::POST, path).unwrap();
            assert_eq!(rule.auth, RouteAuth::Public);
            assert_eq!(rule.rate_class, Some(RateClass::Auth));
            assert_eq!(rule.service, "users");
        }
    }

    #[test]
    fn order_creation_uses_order_create_class() {
        let table = default_table();
        let rule = table.resolve(&Method::POST, "/v1/orders").unwrap();
        assert_eq!(rule.auth, RouteAuth::Authenticated);
        assert_eq!(rule.rate_class, Some(RateClass::OrderCreate));
        assert_eq!(rule.service, "orders");
    }

    #[test]
    fn order_reads_fall_through_to_general() {
        let table = default_table();
        let rule = table.resolve(&Method::GET, "/v1/orders/42").unwrap();
        assert_eq!(rule.rate_class, Some(RateClass::General));
        assert_eq!(rule.service, "orders");
    }

    #[test]
    fn user_deletion_requires_admin() {
        let table = default_table();
        let rule = table.resolve(&Method::DELETE, "/v1/users/7").unwrap();
        assert_eq!(rule.auth, RouteAuth::Admin);
    }

    #[test]
    fn profile_fetch_is_authenticated_general() {
        let table = default_table();
        let rule = table.resolve(&Method::GET, "/v1/users/profile").unwrap();
        assert_eq!(rule.auth, RouteAuth::Authenticated);
        assert_eq!(rule.rate_class, Some(RateClass::General));
    }

    #[test]
    fn unknown_paths_do_not_match() {
        let table = default_table();
        assert!(table.resolve(&Method::GET, "/v1/payments").is_none());
        assert!(table.resolve(&Method::GET, "/v1/users-archive").is_none());
    }

    #[test]
    fn invalid_method_filter_is_rejected() {
        let routes = vec![RouteConfig {
            prefix: "/v1/users".into(),
            method: Some("FETCH IT".into()),
            service: "users".into(),
            auth: RouteAuth::Public,
            rate_class: None,
        }];
        assert!(RouteTable::from_config(&routes).is_err());
    }
}
