//! Single-attempt request forwarding.
//!
//! # Responsibilities
//! - Rewrite the public URI onto the target service's base URL
//! - Propagate `Authorization` and `X-Request-ID` to the upstream
//! - Enforce the per-service timeout
//!
//! # Design Decisions
//! - Exactly one attempt; the caller records the outcome on the breaker
//! - A timed-out call's eventual result is dropped, never double-counted
//! - Connection errors and timeouts are distinct error variants (503 vs 504)

use std::str::FromStr;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::request::Parts;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, Request, Response, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use crate::upstream::service::ServiceEndpoint;

/// Dispatch failure. Both variants count as breaker failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{service} did not respond within {}s", .timeout.as_secs())]
    Timeout {
        service: String,
        timeout: Duration,
    },

    #[error("{service} is unreachable")]
    Unreachable { service: String },
}

/// Forwards admitted requests to downstream services.
#[derive(Clone)]
pub struct Dispatcher {
    client: Client<HttpConnector, Body>,
    /// Public prefix stripped before forwarding ("/v1").
    api_prefix: String,
}

impl Dispatcher {
    pub fn new(api_prefix: String) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, api_prefix }
    }

    /// Forward one request to `service` with its configured timeout.
    /// Exactly one attempt is made.
    pub async fn forward(
        &self,
        service: &ServiceEndpoint,
        parts: Parts,
        body: Body,
        correlation_id: &str,
    ) -> Result<Response<Body>, DispatchError> {
        let uri = self.rewrite_uri(service, &parts.uri)?;

        let mut builder = Request::builder()
            .method(parts.method.clone())
            .uri(uri)
            .version(axum::http::Version::HTTP_11);

        if let Some(headers) = builder.headers_mut() {
            for (name, value) in parts.headers.iter() {
                // Host is derived from the rewritten authority.
                if name == &header::HOST {
                    continue;
                }
                headers.insert(name.clone(), value.clone());
            }
            if let Ok(value) = HeaderValue::from_str(correlation_id) {
                headers.insert("x-request-id", value);
            }
        }

        let request = builder.body(body).map_err(|_| DispatchError::Unreachable {
            service: service.name.clone(),
        })?;

        match tokio::time::timeout(service.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => Ok(response.map(Body::new)),
            Ok(Err(error)) => {
                tracing::error!(
                    service = %service.name,
                    correlation_id = %correlation_id,
                    error = %error,
                    "upstream connection failed"
                );
                Err(DispatchError::Unreachable {
                    service: service.name.clone(),
                })
            }
            // Timeout drops the in-flight future; a late response is discarded.
            Err(_) => {
                tracing::error!(
                    service = %service.name,
                    correlation_id = %correlation_id,
                    timeout_secs = service.timeout.as_secs(),
                    "upstream request timed out"
                );
                Err(DispatchError::Timeout {
                    service: service.name.clone(),
                    timeout: service.timeout,
                })
            }
        }
    }

    /// Rebuild the request URI onto the service base URL, stripping the
    /// public API prefix: `/v1/users/7` → `http://users-host/users/7`.
    fn rewrite_uri(&self, service: &ServiceEndpoint, uri: &Uri) -> Result<Uri, DispatchError> {
        let unreachable = || DispatchError::Unreachable {
            service: service.name.clone(),
        };

        let full = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let stripped = full.strip_prefix(self.api_prefix.as_str()).unwrap_or(full);
        let target_path = if stripped.is_empty() { "/" } else { stripped };

        let host = service.base_url.host_str().ok_or_else(unreachable)?;
        let authority = match service.base_url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let mut target = uri.clone().into_parts();
        target.scheme = Some(Scheme::HTTP);
        target.authority = Some(Authority::from_str(&authority).map_err(|_| unreachable())?);
        target.path_and_query =
            Some(PathAndQuery::from_str(target_path).map_err(|_| unreachable())?);
        Uri::from_parts(target).map_err(|_| unreachable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn endpoint(base: &str) -> ServiceEndpoint {
        ServiceEndpoint {
            name: "users".into(),
            base_url: Url::parse(base).unwrap(),
            timeout: Duration::from_secs(3),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn strips_api_prefix_and_swaps_authority() {
        let dispatcher = Dispatcher::new("/v1".into());
        let service = endpoint("http://127.0.0.1:8001");
        let uri: Uri = "http://gateway:8000/v1/users/7?full=true".parse().unwrap();

        let rewritten = dispatcher.rewrite_uri(&service, &uri).unwrap();
        assert_eq!(rewritten.to_string(), "http://127.0.0.1:8001/users/7?full=true");
    }

    #[test]
    fn bare_prefix_maps_to_root() {
        let dispatcher = Dispatcher::new("/v1".into());
        let service = endpoint("http://127.0.0.1:8002");
        let uri: Uri = "/v1".parse().unwrap();

        let rewritten = dispatcher.rewrite_uri(&service, &uri).unwrap();
        assert_eq!(rewritten.path(), "/");
    }

    #[test]
    fn paths_outside_prefix_pass_through() {
        let dispatcher = Dispatcher::new("/v1".into());
        let service = endpoint("http://orders.internal:8000");
        let uri: Uri = "/orders/status".parse().unwrap();

        let rewritten = dispatcher.rewrite_uri(&service, &uri).unwrap();
        assert_eq!(rewritten.path(), "/orders/status");
        assert_eq!(rewritten.authority().unwrap().as_str(), "orders.internal:8000");
    }
}
