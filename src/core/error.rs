//! # Error Handling Module
//!
//! This module provides the error taxonomy for the gateway dispatch core using
//! the `thiserror` crate. Every failure a request can hit on its way through
//! the pipeline maps to exactly one variant here, and each variant maps to the
//! HTTP status code the caller observes. Nothing is silently swallowed: errors
//! either recover locally (discovery falls back to a cached host set, the
//! breaker self-heals through HalfOpen) or surface as a status code.

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Comprehensive error types for the gateway dispatch core
///
/// The `#[error("...")]` attribute from `thiserror` implements `Display` with
/// the given message; `status_code()` maps each variant to the response status.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// No route template matched the incoming request
    #[error("no route matches {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// Configuration is invalid (fatal at initial load, skipped on reload)
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Downstream call exceeded the route's QoS timeout
    #[error("downstream timeout after {timeout_ms}ms on route {route}")]
    DownstreamTimeout { route: String, timeout_ms: u64 },

    /// Downstream connection or TLS failure
    #[error("downstream unreachable on route {route}: {reason}")]
    DownstreamUnreachable { route: String, reason: String },

    /// Circuit breaker short-circuited the request without a downstream call
    #[error("circuit open for route {route}")]
    CircuitOpen { route: String },

    /// No hosts resolvable for a service and no cached set exists
    #[error("service discovery unavailable for {service}: {reason}")]
    DiscoveryUnavailable { service: String, reason: String },

    /// Load balancer could not pick a host
    #[error("load balancing error: {message}")]
    LoadBalancing { message: String },

    /// A member dispatch of an aggregate route failed
    #[error("aggregate member {key} failed: {reason}")]
    AggregateMember { key: String, reason: String },

    /// I/O errors (configuration file reads, socket binds)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON parse errors for configuration fragments
    #[error("JSON error: {message}")]
    Json { message: String },

    /// Internal errors for unexpected failures
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Create a route-not-found error for the given request line
    pub fn route_not_found(method: &Method, path: &str) -> Self {
        Self::RouteNotFound {
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a downstream timeout error
    pub fn downstream_timeout<S: Into<String>>(route: S, timeout_ms: u64) -> Self {
        Self::DownstreamTimeout {
            route: route.into(),
            timeout_ms,
        }
    }

    /// Create a downstream unreachable error
    pub fn downstream_unreachable<S: Into<String>, R: Into<String>>(route: S, reason: R) -> Self {
        Self::DownstreamUnreachable {
            route: route.into(),
            reason: reason.into(),
        }
    }

    /// Create a circuit-open error for the given route key
    pub fn circuit_open<S: Into<String>>(route: S) -> Self {
        Self::CircuitOpen {
            route: route.into(),
        }
    }

    /// Create a discovery-unavailable error
    pub fn discovery_unavailable<S: Into<String>, R: Into<String>>(service: S, reason: R) -> Self {
        Self::DiscoveryUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create a load balancing error with a custom message
    pub fn load_balancing<S: Into<String>>(message: S) -> Self {
        Self::LoadBalancing {
            message: message.into(),
        }
    }

    /// Create an aggregate member failure
    pub fn aggregate_member<S: Into<String>, R: Into<String>>(key: S, reason: R) -> Self {
        Self::AggregateMember {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code returned to the caller for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DownstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::DownstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::DiscoveryUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::LoadBalancing { .. } => StatusCode::BAD_GATEWAY,
            Self::AggregateMember { .. } => StatusCode::BAD_GATEWAY,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "route_not_found",
            Self::Configuration { .. } => "configuration_invalid",
            Self::DownstreamTimeout { .. } => "downstream_timeout",
            Self::DownstreamUnreachable { .. } => "downstream_unreachable",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::DiscoveryUnavailable { .. } => "discovery_unavailable",
            Self::LoadBalancing { .. } => "load_balancing_error",
            Self::AggregateMember { .. } => "aggregate_member_failure",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether this failure should count against a route's circuit breaker
    ///
    /// Only timeouts are breaker-counted. Connection and TLS failures surface
    /// as bad-gateway without tripping the breaker, and client-initiated
    /// cancellation never records an outcome at all.
    pub fn is_breaker_counted(&self) -> bool {
        matches!(self, Self::DownstreamTimeout { .. })
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

/// Convert errors into structured HTTP responses
///
/// Axum uses this to turn a failed dispatch into the response the upstream
/// caller sees: the mapped status code plus a JSON body describing the error.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GatewayError::route_not_found(&Method::GET, "/missing").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::downstream_timeout("orders", 500).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::circuit_open("orders").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::downstream_unreachable("orders", "connection refused").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::discovery_unavailable("orders-svc", "registry down").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::config("bad route").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_breaker_counting() {
        assert!(GatewayError::downstream_timeout("r", 500).is_breaker_counted());
        assert!(!GatewayError::downstream_unreachable("r", "refused").is_breaker_counted());
        assert!(!GatewayError::circuit_open("r").is_breaker_counted());
    }

    #[test]
    fn test_error_messages() {
        let err = GatewayError::route_not_found(&Method::POST, "/api/none");
        assert_eq!(err.to_string(), "no route matches POST /api/none");
        assert_eq!(err.error_type(), "route_not_found");
    }
}
