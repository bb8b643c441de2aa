//! Downstream service endpoints.
//!
//! # Responsibilities
//! - Represent one downstream service (address, timeout, breaker policy)
//! - Immutable after configuration load, shared via Arc

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::schema::ServiceConfig;

/// One downstream service. Read-only shared state established at startup.
#[derive(Debug)]
pub struct ServiceEndpoint {
    /// Service identifier (breaker key, log field).
    pub name: String,
    /// Base URL requests are forwarded to.
    pub base_url: Url,
    /// Hard per-request dispatch timeout.
    pub timeout: Duration,
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Time the breaker stays open before admitting a probe.
    pub recovery_timeout: Duration,
}

#[derive(Debug, Error)]
#[error("service '{name}': invalid base_url '{url}'")]
pub struct InvalidService {
    pub name: String,
    pub url: String,
}

/// Lookup table of configured services.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<ServiceEndpoint>>,
}

impl ServiceRegistry {
    /// Build the registry from configuration.
    pub fn from_config(services: &[ServiceConfig]) -> Result<Self, InvalidService> {
        let mut map = HashMap::with_capacity(services.len());
        for config in services {
            let base_url = Url::parse(&config.base_url).map_err(|_| InvalidService {
                name: config.name.clone(),
                url: config.base_url.clone(),
            })?;
            map.insert(
                config.name.clone(),
                Arc::new(ServiceEndpoint {
                    name: config.name.clone(),
                    base_url,
                    timeout: Duration::from_secs(config.timeout_secs),
                    failure_threshold: config.failure_threshold,
                    recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
                }),
            );
        }
        Ok(Self { services: map })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ServiceEndpoint>> {
        self.services.get(name)
    }

    /// Iterate all service names, sorted for stable health output.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceEndpoint>> {
        self.services.values()
    }
}

impl ServiceEndpoint {
    #[cfg(test)]
    pub(crate) fn for_tests(name: &str, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            base_url: Url::parse("http://127.0.0.1:9").unwrap(),
            timeout: Duration::from_secs(1),
            failure_threshold,
            recovery_timeout,
        }
    }
}
