//! # Aggregation Engine Module
//!
//! Fans a single upstream request out to an aggregate route's member routes
//! and merges their responses into one JSON object keyed by route key. Member
//! dispatches run concurrently as joined futures, so cancelling the parent
//! request cancels every outstanding member. Each member goes through the
//! full pipeline with its own breaker and load-balancer state; one member's
//! failure never affects its siblings.
//!
//! Merge policy: the aggregate always answers 200 with one entry per member.
//! A successful member body that parses as JSON is embedded as JSON,
//! otherwise as a string; a failed or non-2xx member embeds
//! `{"error": {"status", "message"}}` under its key.

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::future;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::core::error::{GatewayError, GatewayResult};
use crate::gateway::dispatcher::RequestDispatcher;
use crate::routing::table::{AggregateRoute, RouteTable};
use crate::routing::template::PlaceholderValues;

/// Bound on a buffered member response body
const MAX_MEMBER_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Dispatch an aggregate route and merge the member responses
pub(crate) async fn dispatch(
    dispatcher: &RequestDispatcher,
    table: &RouteTable,
    aggregate: &AggregateRoute,
    values: &PlaceholderValues,
    parts: &Parts,
    request_id: Option<&str>,
) -> GatewayResult<Response> {
    debug!(
        template = aggregate.upstream_template.raw(),
        members = aggregate.route_keys.len(),
        "dispatching aggregate route"
    );

    let member_futures = aggregate.route_keys.iter().map(|key| async move {
        let route = table.route_by_key(key).ok_or_else(|| {
            GatewayError::aggregate_member(key, "route key not present in table")
        })?;
        let response = dispatcher
            .dispatch_route(table, &route, values, parts, None, None, request_id)
            .await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), MAX_MEMBER_BODY_BYTES)
            .await
            .map_err(|e| GatewayError::aggregate_member(key, e.to_string()))?;
        Ok::<(StatusCode, Bytes), GatewayError>((status, bytes))
    });

    let results = future::join_all(member_futures).await;

    let mut merged = Map::new();
    for (key, result) in aggregate.route_keys.iter().zip(results) {
        merged.insert(key.clone(), member_value(result));
    }

    let body = serde_json::to_vec(&Value::Object(merged))?;
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn member_value(result: GatewayResult<(StatusCode, Bytes)>) -> Value {
    match result {
        Ok((status, bytes)) if status.is_success() => serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        Ok((status, bytes)) => json!({
            "error": {
                "status": status.as_u16(),
                "message": String::from_utf8_lossy(&bytes),
            }
        }),
        Err(e) => json!({
            "error": {
                "status": e.status_code().as_u16(),
                "message": e.to_string(),
            }
        }),
    }
}
