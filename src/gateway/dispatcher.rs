//! # Request Dispatcher Module
//!
//! Orchestrates the full pipeline for one upstream request: snapshot the
//! active route table, match, build the downstream URI, resolve and lease a
//! host, invoke through the route's circuit breaker, and stream the response
//! back.
//!
//! Bodies are forwarded as streams in both directions and never buffered in
//! full: an upstream Content-Length is propagated verbatim so the downstream
//! observes the same declared length, while an upstream chunked body stays
//! chunked. Cancellation propagates by future drop: when the client
//! disconnects, axum drops the dispatch future, which aborts the in-flight
//! downstream call; the host lease and the breaker call guard both resolve
//! through `Drop`, so the load balancer is released exactly once and the
//! breaker records no failure for a client-initiated cancel.

use std::sync::Arc;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::Response;
use futures::StreamExt;
use metrics::{counter, histogram};
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::ConfigurationStore;
use crate::core::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::ResolvedHost;
use crate::discovery::DiscoveryRegistry;
use crate::gateway::aggregation;
use crate::load_balancing::{HostLease, LoadBalancerRegistry};
use crate::routing::matcher::{self, RouteMatch};
use crate::routing::table::{Backend, Route, RouteTable};
use crate::routing::template::PlaceholderValues;
use crate::routing::url_builder;

/// Headers that are connection-scoped and never forwarded through the gateway
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The per-request orchestrator
///
/// Holds the process-lifetime registries (breakers, balancers, discovery
/// resolvers) and the shared downstream clients. One instance serves every
/// request; all per-route state inside is keyed and concurrency-safe.
pub struct RequestDispatcher {
    store: Arc<ConfigurationStore>,
    breakers: CircuitBreakerRegistry,
    balancers: LoadBalancerRegistry,
    discovery: DiscoveryRegistry,
    client: reqwest::Client,
    /// Certificate validation disabled, selected per route by
    /// `dangerousAcceptAnyServerCertificateValidator`
    insecure_client: reqwest::Client,
}

impl RequestDispatcher {
    pub fn new(store: Arc<ConfigurationStore>) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::internal(format!("failed to build HTTP client: {}", e)))?;
        let insecure_client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| GatewayError::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            store,
            breakers: CircuitBreakerRegistry::new(),
            balancers: LoadBalancerRegistry::new(),
            discovery: DiscoveryRegistry::new(),
            client,
            insecure_client,
        })
    }

    /// Dispatch one upstream request through the pipeline
    #[instrument(skip_all, fields(method = %req.method(), path = req.uri().path()))]
    pub async fn dispatch(&self, req: axum::extract::Request) -> GatewayResult<Response> {
        let started = std::time::Instant::now();
        let table = self.store.current();
        let (parts, body) = req.into_parts();

        let path = parts.uri.path().to_string();
        let query = parts.uri.query().map(str::to_string);
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let request_id = self.request_id(&table, &parts.headers);

        counter!("gateway_requests_total").increment(1);

        let matched = matcher::match_request(
            &table,
            &parts.method,
            &path,
            query.as_deref(),
            host.as_deref(),
        );

        let result = match matched {
            None => {
                counter!("gateway_route_not_found_total").increment(1);
                Err(GatewayError::route_not_found(&parts.method, &path))
            }
            Some(RouteMatch::Route { route, values }) => {
                self.dispatch_route(
                    &table,
                    &route,
                    &values,
                    &parts,
                    Some(body),
                    query.as_deref(),
                    request_id.as_deref(),
                )
                .await
            }
            Some(RouteMatch::Aggregate { aggregate, values }) => {
                aggregation::dispatch(
                    self,
                    &table,
                    &aggregate,
                    &values,
                    &parts,
                    request_id.as_deref(),
                )
                .await
            }
        };

        histogram!("gateway_dispatch_duration_seconds").record(started.elapsed().as_secs_f64());

        result.map(|mut response| {
            attach_request_id(&table, request_id.as_deref(), &mut response);
            response
        })
    }

    /// Dispatch a matched, non-aggregate route
    ///
    /// Also the entry point for aggregate member dispatches, which pass no
    /// body and no original query string.
    pub(crate) async fn dispatch_route(
        &self,
        table: &RouteTable,
        route: &Route,
        values: &PlaceholderValues,
        parts: &Parts,
        body: Option<Body>,
        original_query: Option<&str>,
        request_id: Option<&str>,
    ) -> GatewayResult<Response> {
        let hosts = self.resolve_hosts(table, route).await?;
        let balancer = self.balancers.get_or_create(route);
        let lease = HostLease::acquire(balancer, &hosts, &parts.headers).await?;

        let url = url_builder::build(route, lease.host(), values, original_query)?;
        let method = route
            .downstream_method
            .clone()
            .unwrap_or_else(|| parts.method.clone());

        debug!(
            route = %route.key,
            downstream = %url,
            method = %method,
            "dispatching downstream request"
        );

        let request = self.build_downstream_request(table, route, &method, url, parts, body, request_id)?;

        let response = match &route.qos {
            Some(qos) => self.send_through_breaker(route, qos, request).await?,
            None => request
                .send()
                .await
                .map_err(|e| GatewayError::downstream_unreachable(&route.key, e.to_string()))?,
        };

        Ok(forward_response(response, lease))
    }

    /// Pick the request id for this dispatch, when the table configures one
    fn request_id(&self, table: &RouteTable, headers: &HeaderMap) -> Option<String> {
        let key = table.global.request_id_key.as_deref()?;
        let incoming = HeaderName::try_from(key)
            .ok()
            .and_then(|name| headers.get(&name).cloned())
            .and_then(|value| value.to_str().map(str::to_string).ok());
        Some(incoming.unwrap_or_else(|| Uuid::new_v4().to_string()))
    }

    async fn resolve_hosts(
        &self,
        table: &RouteTable,
        route: &Route,
    ) -> GatewayResult<Vec<ResolvedHost>> {
        match &route.backend {
            Backend::Static(hosts) => Ok(hosts.iter().map(ResolvedHost::from).collect()),
            Backend::Service { name } => {
                let config = table.global.discovery.as_ref().ok_or_else(|| {
                    GatewayError::config(format!(
                        "route '{}' uses a service name but no discovery provider is configured",
                        route.key
                    ))
                })?;
                self.discovery.resolver_for(config)?.resolve(name).await
            }
        }
    }

    fn build_downstream_request(
        &self,
        table: &RouteTable,
        route: &Route,
        method: &Method,
        url: Url,
        parts: &Parts,
        body: Option<Body>,
        request_id: Option<&str>,
    ) -> GatewayResult<reqwest::RequestBuilder> {
        let client = if route.accept_any_downstream_certificate {
            &self.insecure_client
        } else {
            &self.client
        };

        let mut headers = strip_hop_by_hop(&parts.headers);
        // reqwest derives Host from the downstream URL.
        headers.remove(header::HOST);

        if let (Some(key), Some(id)) = (table.global.request_id_key.as_deref(), request_id) {
            let name = HeaderName::try_from(key).map_err(|e| {
                GatewayError::config(format!("invalid requestIdKey '{}': {}", key, e))
            })?;
            let value = HeaderValue::try_from(id)
                .map_err(|e| GatewayError::internal(format!("invalid request id: {}", e)))?;
            headers.insert(name, value);
        }

        let mut builder = client.request(method.clone(), url).headers(headers);

        if let Some(body) = body {
            if upstream_declares_body(&parts.headers) {
                // Content-Length, if declared, was copied through above and
                // hyper honors it; an undeclared length stays chunked.
                builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
            }
        }

        Ok(builder)
    }

    /// Invoke the downstream call bounded by the route's QoS policy
    async fn send_through_breaker(
        &self,
        route: &Route,
        qos: &CircuitBreakerConfig,
        request: reqwest::RequestBuilder,
    ) -> GatewayResult<reqwest::Response> {
        let breaker = self.breakers.get_or_create(&route.key, qos);
        let guard = breaker.begin_call().map_err(|_| {
            counter!("gateway_short_circuited_total").increment(1);
            warn!(route = %route.key, "request short-circuited by open circuit");
            GatewayError::circuit_open(&route.key)
        })?;

        match tokio::time::timeout(qos.timeout, request.send()).await {
            Err(_) => {
                // Dropping the send future aborts the in-flight call.
                guard.failure();
                counter!("gateway_downstream_timeouts_total").increment(1);
                Err(GatewayError::downstream_timeout(
                    &route.key,
                    qos.timeout.as_millis() as u64,
                ))
            }
            Ok(Err(e)) => {
                // Connection and TLS failures are not breaker-counted;
                // dropping the guard records no outcome.
                drop(guard);
                Err(GatewayError::downstream_unreachable(
                    &route.key,
                    e.to_string(),
                ))
            }
            Ok(Ok(response)) => {
                guard.success();
                Ok(response)
            }
        }
    }
}

/// Turn the downstream response into the upstream one, streaming the body
///
/// The host lease is moved into the body stream so connection-count
/// strategies see the request in flight until the body finishes (or the
/// client goes away and the stream is dropped).
fn forward_response(downstream: reqwest::Response, lease: HostLease) -> Response {
    let status = downstream.status();
    let headers = strip_hop_by_hop(downstream.headers());

    let stream = downstream.bytes_stream().map(move |chunk| {
        let _ = &lease;
        chunk
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Copy a header map minus hop-by-hop headers and Connection-named tokens
fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let connection_tokens: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .collect();

    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        let lower = name.as_str();
        if HOP_BY_HOP_HEADERS.contains(&lower) {
            continue;
        }
        if connection_tokens.iter().any(|token| token == lower) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

/// Whether the upstream request carries a body to forward
fn upstream_declares_body(headers: &HeaderMap) -> bool {
    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v != "0")
        .unwrap_or(false);
    declared_length || headers.contains_key(header::TRANSFER_ENCODING)
}

fn attach_request_id(table: &RouteTable, request_id: Option<&str>, response: &mut Response) {
    if let (Some(key), Some(id)) = (table.global.request_id_key.as_deref(), request_id) {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(key), HeaderValue::try_from(id)) {
            response.headers_mut().insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "close".parse().unwrap());
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert(header::UPGRADE, "h2c".parse().unwrap());
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert("x-custom", "kept".parse().unwrap());

        let filtered = strip_hop_by_hop(&headers);
        assert!(filtered.get(header::CONNECTION).is_none());
        assert!(filtered.get(header::TRANSFER_ENCODING).is_none());
        assert!(filtered.get(header::UPGRADE).is_none());
        assert_eq!(filtered.get(header::CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(filtered.get("x-custom").unwrap(), "kept");
    }

    #[test]
    fn test_connection_named_headers_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "close, X-Session-Token".parse().unwrap());
        headers.insert("x-session-token", "secret".parse().unwrap());
        headers.insert("x-other", "kept".parse().unwrap());

        let filtered = strip_hop_by_hop(&headers);
        assert!(filtered.get("x-session-token").is_none());
        assert_eq!(filtered.get("x-other").unwrap(), "kept");
    }

    #[test]
    fn test_upstream_declares_body() {
        let mut headers = HeaderMap::new();
        assert!(!upstream_declares_body(&headers));

        headers.insert(header::CONTENT_LENGTH, "0".parse().unwrap());
        assert!(!upstream_declares_body(&headers));

        headers.insert(header::CONTENT_LENGTH, "12".parse().unwrap());
        assert!(upstream_declares_body(&headers));

        let mut chunked = HeaderMap::new();
        chunked.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        assert!(upstream_declares_body(&chunked));
    }
}
