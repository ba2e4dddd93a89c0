//! # Configuration File Model
//!
//! The serde data model for configuration fragments. Field names follow the
//! camelCase wire schema (`qoSOptions` spelled exactly as configured).
//! Unrecognized properties on routes and on the global section are captured
//! into flattened JSON maps so custom configuration survives the merge and
//! remains visible to downstream tooling, untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::types::HostAndPort;

/// A full (merged) configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConfiguration {
    pub global_configuration: Option<FileGlobalConfiguration>,
    pub routes: Vec<FileRoute>,
    pub aggregates: Vec<FileAggregateRoute>,
}

/// Global gateway settings as configured
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileGlobalConfiguration {
    pub request_id_key: Option<String>,
    pub administration_path: Option<String>,
    pub service_discovery_provider: Option<FileServiceDiscoveryProvider>,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

/// Service discovery provider settings as configured
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileServiceDiscoveryProvider {
    pub provider: String,
    pub host: String,
    pub port: u16,
    /// Discovery cache TTL in milliseconds
    pub poll_interval_ms: Option<u64>,
    /// Bound on a single registry query in milliseconds
    pub timeout_ms: Option<u64>,
}

/// One route as configured
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileRoute {
    /// Unique identifier; aggregates reference routes by this key
    pub key: String,
    pub upstream_path_template: Option<String>,
    pub upstream_http_method: Vec<String>,
    pub upstream_host: Option<String>,
    pub upstream_query_mandatory: bool,
    pub downstream_path_template: Option<String>,
    pub downstream_scheme: Option<String>,
    pub downstream_http_method: Option<String>,
    pub downstream_host_and_ports: Vec<HostAndPort>,
    pub service_name: Option<String>,
    pub load_balancer: Option<String>,
    /// Cookie name for CookieSticky session affinity
    pub session_cookie: Option<String>,
    #[serde(rename = "qoSOptions")]
    pub qos_options: Option<FileQosOptions>,
    pub dangerous_accept_any_server_certificate_validator: bool,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

/// QoS / circuit breaker options as configured (durations in milliseconds)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileQosOptions {
    pub exceptions_allowed_before_breaking: u32,
    pub duration_of_break: u64,
    pub timeout_value: u64,
}

/// One aggregate route as configured
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileAggregateRoute {
    pub upstream_path_template: Option<String>,
    pub upstream_http_method: Vec<String>,
    pub route_keys: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_wire_schema() {
        let file: FileConfiguration = serde_json::from_value(json!({
            "globalConfiguration": {
                "requestIdKey": "x-request-id",
                "administrationPath": "/administration",
                "serviceDiscoveryProvider": {
                    "provider": "consul",
                    "host": "localhost",
                    "port": 8500,
                    "pollIntervalMs": 5000
                },
                "customGlobal": "preserved"
            },
            "routes": [{
                "key": "orders",
                "upstreamPathTemplate": "/api/orders/{id}",
                "upstreamHttpMethod": ["Get"],
                "downstreamPathTemplate": "/orders/{id}",
                "downstreamScheme": "https",
                "downstreamHttpMethod": "POST",
                "serviceName": "orders-svc",
                "loadBalancer": "LeastConnection",
                "qoSOptions": {
                    "exceptionsAllowedBeforeBreaking": 1,
                    "durationOfBreak": 1000,
                    "timeoutValue": 500
                },
                "dangerousAcceptAnyServerCertificateValidator": true,
                "rateLimitRules": {"GET": ["10/s"]}
            }]
        }))
        .unwrap();

        let global = file.global_configuration.as_ref().unwrap();
        assert_eq!(global.request_id_key.as_deref(), Some("x-request-id"));
        assert_eq!(
            global.custom.get("customGlobal"),
            Some(&json!("preserved"))
        );

        let route = &file.routes[0];
        assert_eq!(route.key, "orders");
        assert_eq!(route.service_name.as_deref(), Some("orders-svc"));
        assert!(route.dangerous_accept_any_server_certificate_validator);
        assert_eq!(route.qos_options.as_ref().unwrap().timeout_value, 500);
        assert_eq!(
            route.custom.get("rateLimitRules"),
            Some(&json!({"GET": ["10/s"]}))
        );
    }

    #[test]
    fn test_unknown_top_level_keys_are_tolerated_on_routes_only() {
        // Custom route properties land in `custom`; recognized names do not.
        let route: FileRoute = serde_json::from_value(json!({
            "key": "r",
            "upstreamPathTemplate": "/a",
            "downstreamPathTemplate": "/b",
            "perVerbLimits": {"GET": [1, 2]}
        }))
        .unwrap();
        assert!(route.custom.contains_key("perVerbLimits"));
        assert!(!route.custom.contains_key("upstreamPathTemplate"));
    }
}
