//! HTTP server setup and the request pipeline.
//!
//! # Responsibilities
//! - Create the Axum router with health/metrics handlers and the
//!   gateway fallback
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Run the pipeline per request, in strict order:
//!   route policy → rate limit → auth → circuit breaker → dispatch
//! - Record breaker outcomes and aggregate counters
//!
//! # Design Decisions
//! - First rejection short-circuits; no downstream call is made after a
//!   terminal rejection
//! - Rate limiting runs before auth enforcement, but keys by user id
//!   whenever the request carries a verifiable token
//! - Downstream responses pass through unchanged; only locally
//!   synthesized errors use the gateway envelope

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::schema::GatewayConfig;
use crate::health::aggregator::HealthAggregator;
use crate::http::envelope::{self, GatewayError};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::routing::table::{InvalidRoute, RouteAuth, RouteRule, RouteTable};
use crate::security::auth::{AuthContext, AuthError, TokenVerifier};
use crate::security::rate_limit::{RateDecision, RateLimiter, Subject};
use crate::upstream::dispatcher::Dispatcher;
use crate::upstream::service::{InvalidService, ServiceRegistry};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub table: Arc<RouteTable>,
    pub services: Arc<ServiceRegistry>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub verifier: Arc<TokenVerifier>,
    pub dispatcher: Dispatcher,
    pub health: Arc<HealthAggregator>,
}

/// Startup failure while compiling configuration into runtime state.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Route(#[from] InvalidRoute),

    #[error(transparent)]
    Service(#[from] InvalidService),
}

/// HTTP server for the API gateway.
pub struct GatewayServer {
    router: Router,
    limiter: Arc<RateLimiter>,
    cleanup_interval: Duration,
}

impl GatewayServer {
    /// Compile configuration into runtime state and build the router.
    pub fn new(config: GatewayConfig) -> Result<Self, BuildError> {
        let table = Arc::new(RouteTable::from_config(&config.routes)?);
        let services = Arc::new(ServiceRegistry::from_config(&config.services)?);

        let breakers = Arc::new(CircuitBreakerRegistry::new());
        for service in services.iter() {
            breakers.register(service);
        }

        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let state = AppState {
            table,
            services,
            breakers,
            limiter: limiter.clone(),
            verifier: Arc::new(TokenVerifier::new(&config.auth.jwt_secret)),
            dispatcher: Dispatcher::new(config.api_prefix.clone()),
            health: Arc::new(HealthAggregator::new()),
        };

        let router = Self::build_router(&config, state);
        Ok(Self {
            router,
            limiter,
            cleanup_interval: Duration::from_secs(config.rate_limit.cleanup_interval_secs),
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .fallback(gateway_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TraceLayer::new_for_http())
                    .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
                    .layer(TimeoutLayer::new(Duration::from_secs(
                        config.listener.request_timeout_secs,
                    ))),
            )
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "API gateway starting");

        // Stale rate-limit windows are evicted off the hot path.
        let limiter = self.limiter.clone();
        let interval = self.cleanup_interval;
        let mut cleanup_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => limiter.purge_stale(),
                    _ = cleanup_shutdown.recv() => break,
                }
            }
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("API gateway stopped");
        Ok(())
    }
}

/// Correlation id set by the request-id layer; freshly generated if the
/// layer was bypassed.
fn correlation_id(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn auth_header(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Main gateway handler: resolves the route policy and runs the pipeline.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let correlation_id = correlation_id(&request);
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    state.health.record_request();

    let Some(rule) = state.table.resolve(&method, &path) else {
        tracing::warn!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            "no matching route"
        );
        metrics::record_request(method.as_str(), 404, "none", start);
        return GatewayError::NotFound.into_response();
    };
    let rule = rule.clone();

    match pipeline(&state, &rule, addr, request, &correlation_id).await {
        Ok(response) => {
            metrics::record_request(method.as_str(), response.status().as_u16(), &rule.service, start);
            response
        }
        Err(error) => {
            let status = error.status();
            tracing::warn!(
                service = %rule.service,
                correlation_id = %correlation_id,
                method = %method,
                path = %path,
                status = status.as_u16(),
                code = error.code(),
                "request rejected"
            );
            metrics::record_request(method.as_str(), status.as_u16(), &rule.service, start);
            error.into_response()
        }
    }
}

/// The admission pipeline. Order is fixed: rate limit → auth → breaker →
/// dispatch. The first rejection is terminal.
async fn pipeline(
    state: &AppState,
    rule: &RouteRule,
    addr: SocketAddr,
    request: Request<Body>,
    correlation_id: &str,
) -> Result<Response, GatewayError> {
    // The limiter keys by authenticated identity when the token verifies,
    // client IP otherwise; enforcement of the route's auth policy comes
    // after admission so 429 takes precedence over 401.
    let auth_result = state.verifier.authenticate(auth_header(&request).as_deref());
    let subject = match &auth_result {
        Ok(ctx) => Subject::User(ctx.user_id.clone()),
        Err(_) => Subject::Ip(addr.ip()),
    };

    let mut rate_headers = None;
    if let Some(class) = rule.rate_class {
        match state.limiter.try_acquire(subject.clone(), class) {
            RateDecision::Allowed {
                limit,
                remaining,
                reset_after_secs,
            } => {
                rate_headers = Some((limit, remaining, reset_after_secs));
            }
            RateDecision::Limited { retry_after_secs } => {
                state.health.record_rate_limit_rejection();
                metrics::record_rate_limited(class.as_str());
                tracing::warn!(
                    subject = %subject,
                    class = class.as_str(),
                    correlation_id = %correlation_id,
                    "rate limit exceeded"
                );
                return Err(GatewayError::RateLimited { retry_after_secs });
            }
        }
    }

    let context = enforce_route_auth(state, rule, auth_result)?;
    let subject_id = context.as_ref().map(|ctx| ctx.user_id.clone());

    let service = state
        .services
        .get(&rule.service)
        .ok_or(GatewayError::Internal)?;

    if !state.breakers.allow(&service.name) {
        tracing::warn!(
            service = %service.name,
            correlation_id = %correlation_id,
            "circuit open, failing fast"
        );
        return Err(GatewayError::CircuitOpen {
            service: service.name.clone(),
        });
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let (parts, body) = request.into_parts();

    match state
        .dispatcher
        .forward(service, parts, body, correlation_id)
        .await
    {
        Ok(mut response) => {
            let status = response.status();
            // 4xx is a successful round trip from the breaker's perspective.
            if status.is_server_error() {
                record_breaker_failure(state, &service.name);
            } else {
                state.breakers.record_success(&service.name);
            }

            if let Some((limit, remaining, reset_after_secs)) = rate_headers {
                let headers = response.headers_mut();
                headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
                headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
                headers.insert("x-ratelimit-reset", HeaderValue::from(reset_after_secs));
            }

            tracing::info!(
                service = %service.name,
                correlation_id = %correlation_id,
                subject_id = subject_id.as_deref().unwrap_or("-"),
                method = %method,
                path = %path,
                status = status.as_u16(),
                "request forwarded"
            );
            Ok(response)
        }
        Err(error) => {
            record_breaker_failure(state, &service.name);
            Err(GatewayError::Dispatch(error))
        }
    }
}

/// Enforce the route's auth policy. Public routes skip verification
/// entirely; the speculative result from keying is discarded.
fn enforce_route_auth(
    state: &AppState,
    rule: &RouteRule,
    auth_result: Result<AuthContext, AuthError>,
) -> Result<Option<AuthContext>, GatewayError> {
    match rule.auth {
        RouteAuth::Public => Ok(None),
        RouteAuth::Authenticated => Ok(Some(auth_result?)),
        RouteAuth::Admin => {
            let context = auth_result?;
            state.verifier.authorize(&context, &["admin"])?;
            Ok(Some(context))
        }
    }
}

fn record_breaker_failure(state: &AppState, service: &str) {
    if state.breakers.record_failure(service) {
        state.health.record_breaker_trip();
        metrics::record_breaker_trip(service);
    }
}

/// Public liveness view: per-service breaker state and aggregate uptime.
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    envelope::success(state.health.health_payload(&state.services, &state.breakers))
}

/// Authenticated counters view.
async fn metrics_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    state
        .verifier
        .authenticate(auth_header(&request).as_deref())?;

    state.health.record_request();
    let counters = state.health.counters();
    Ok(envelope::success(serde_json::json!({
        "total_requests": counters.total_requests,
        "rate_limit_rejections": counters.rate_limit_rejections,
        "breaker_trips": counters.breaker_trips,
        "uptime_secs": counters.uptime_secs,
        "tracked_rate_keys": state.limiter.tracked_keys(),
    })))
}
