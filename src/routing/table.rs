//! # Route Table Module
//!
//! The immutable, validated representation of everything the configuration
//! declared: global settings, routes, and aggregate routes. A table is built
//! once from a merged configuration, published atomically by the
//! configuration store, and never mutated afterwards; a reload builds a brand
//! new table. String-keyed policy selections (load-balancer kind, discovery
//! provider, scheme) are resolved here into closed enums so an unrecognized
//! key fails configuration load instead of failing per-request.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use serde_json::{Map, Value};

use crate::config::file_model::{
    FileAggregateRoute, FileConfiguration, FileQosOptions, FileRoute,
    FileServiceDiscoveryProvider,
};
use crate::config::validation;
use crate::core::circuit_breaker::CircuitBreakerConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::HostAndPort;
use crate::routing::template::{PathTemplate, QueryTemplate};

/// Downstream URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Scheme::Https)
    }
}

impl FromStr for Scheme {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(GatewayError::config(format!(
                "unknown downstream scheme '{}'",
                other
            ))),
        }
    }
}

/// Load balancing strategy selection, resolved from its configuration string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancerKind {
    NoLoadBalancer,
    RoundRobin,
    LeastConnection,
    CookieSticky,
}

impl FromStr for LoadBalancerKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NoLoadBalancer" => Ok(LoadBalancerKind::NoLoadBalancer),
            "RoundRobin" => Ok(LoadBalancerKind::RoundRobin),
            "LeastConnection" => Ok(LoadBalancerKind::LeastConnection),
            "CookieSticky" => Ok(LoadBalancerKind::CookieSticky),
            other => Err(GatewayError::config(format!(
                "unknown load balancer kind '{}'",
                other
            ))),
        }
    }
}

/// Service discovery provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryProviderKind {
    Consul,
}

impl DiscoveryProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryProviderKind::Consul => "consul",
        }
    }
}

impl FromStr for DiscoveryProviderKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("consul") {
            Ok(DiscoveryProviderKind::Consul)
        } else {
            Err(GatewayError::config(format!(
                "unknown service discovery provider '{}'",
                s
            )))
        }
    }
}

/// Resolved service discovery provider settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryProviderConfig {
    pub kind: DiscoveryProviderKind,
    pub host: String,
    pub port: u16,
    /// How long a resolved host set stays fresh before a re-query
    pub cache_ttl: Duration,
    /// Bound on a single registry query, independent of any QoS timeout
    pub timeout: Duration,
}

impl DiscoveryProviderConfig {
    const DEFAULT_CACHE_TTL_MS: u64 = 10_000;
    const DEFAULT_TIMEOUT_MS: u64 = 3_000;

    fn from_file(file: &FileServiceDiscoveryProvider) -> GatewayResult<Self> {
        Ok(Self {
            kind: file.provider.parse()?,
            host: file.host.clone(),
            port: file.port,
            cache_ttl: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(Self::DEFAULT_CACHE_TTL_MS),
            ),
            timeout: Duration::from_millis(file.timeout_ms.unwrap_or(Self::DEFAULT_TIMEOUT_MS)),
        })
    }

    /// Identity of this provider endpoint, used to key cached resolvers
    pub fn cache_key(&self) -> String {
        format!("{}://{}:{}", self.kind.as_str(), self.host, self.port)
    }
}

/// Global gateway settings
#[derive(Debug, Clone, Default)]
pub struct GlobalSettings {
    /// Header name the gateway uses to attach a request id, when configured
    pub request_id_key: Option<String>,
    pub administration_path: Option<String>,
    pub discovery: Option<DiscoveryProviderConfig>,
    /// Unrecognized global properties, preserved opaquely from the merge
    pub custom: Map<String, Value>,
}

/// Where a route's downstream hosts come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Fixed ordered host list from the configuration
    Static(Vec<HostAndPort>),
    /// Logical service name resolved through discovery per request
    Service { name: String },
}

/// One upstream-to-downstream binding with its policies
#[derive(Debug, Clone)]
pub struct Route {
    pub key: String,
    pub upstream_template: PathTemplate,
    pub upstream_query: Option<QueryTemplate>,
    pub upstream_query_mandatory: bool,
    /// Accepted upstream methods; an empty set accepts any method
    pub upstream_methods: Vec<Method>,
    /// Optional exact host filter on the upstream Host header
    pub upstream_host: Option<String>,
    /// Raw downstream template; placeholders substituted byte-for-byte
    pub downstream_template: String,
    pub downstream_scheme: Scheme,
    /// Overrides the HTTP method sent downstream (method conversion)
    pub downstream_method: Option<Method>,
    pub backend: Backend,
    pub load_balancer: LoadBalancerKind,
    /// Cookie name for CookieSticky affinity
    pub session_cookie: Option<String>,
    pub qos: Option<CircuitBreakerConfig>,
    pub accept_any_downstream_certificate: bool,
    /// Unrecognized route properties, preserved opaquely from the merge
    pub custom: Map<String, Value>,
    pub declaration_index: usize,
}

impl Route {
    pub fn matches_method(&self, method: &Method) -> bool {
        self.upstream_methods.is_empty() || self.upstream_methods.contains(method)
    }

    pub fn matches_host(&self, request_host: Option<&str>) -> bool {
        match &self.upstream_host {
            None => true,
            Some(expected) => request_host
                .map(|h| {
                    let without_port = h.split(':').next().unwrap_or(h);
                    without_port.eq_ignore_ascii_case(expected)
                })
                .unwrap_or(false),
        }
    }

    fn from_file(file: &FileRoute, declaration_index: usize) -> GatewayResult<Self> {
        let raw_upstream = file.upstream_path_template.as_deref().ok_or_else(|| {
            GatewayError::config(format!("route '{}' has no upstream template", file.key))
        })?;
        let (path_part, query_part) = match raw_upstream.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (raw_upstream, None),
        };
        let upstream_template = PathTemplate::parse(path_part)?;
        let upstream_query = query_part.map(QueryTemplate::parse).transpose()?;

        let downstream_template = file
            .downstream_path_template
            .clone()
            .ok_or_else(|| {
                GatewayError::config(format!("route '{}' has no downstream template", file.key))
            })?;

        let backend = if let Some(name) = &file.service_name {
            Backend::Service { name: name.clone() }
        } else {
            Backend::Static(file.downstream_host_and_ports.clone())
        };

        Ok(Self {
            key: file.key.clone(),
            upstream_template,
            upstream_query,
            upstream_query_mandatory: file.upstream_query_mandatory,
            upstream_methods: parse_methods(&file.upstream_http_method)?,
            upstream_host: file.upstream_host.clone(),
            downstream_template,
            downstream_scheme: file
                .downstream_scheme
                .as_deref()
                .unwrap_or("http")
                .parse()?,
            downstream_method: file
                .downstream_http_method
                .as_deref()
                .map(parse_method)
                .transpose()?,
            backend,
            load_balancer: file
                .load_balancer
                .as_deref()
                .unwrap_or("NoLoadBalancer")
                .parse()?,
            session_cookie: file.session_cookie.clone(),
            qos: file.qos_options.as_ref().map(qos_to_breaker_config),
            accept_any_downstream_certificate: file
                .dangerous_accept_any_server_certificate_validator,
            custom: file.custom.clone(),
            declaration_index,
        })
    }
}

/// A virtual route that fans out to several member routes
#[derive(Debug, Clone)]
pub struct AggregateRoute {
    pub upstream_template: PathTemplate,
    pub upstream_methods: Vec<Method>,
    /// Ordered keys of the member routes; all must exist in the table
    pub route_keys: Vec<String>,
    pub declaration_index: usize,
}

impl AggregateRoute {
    pub fn matches_method(&self, method: &Method) -> bool {
        self.upstream_methods.is_empty() || self.upstream_methods.contains(method)
    }

    fn from_file(file: &FileAggregateRoute, declaration_index: usize) -> GatewayResult<Self> {
        let raw = file.upstream_path_template.as_deref().ok_or_else(|| {
            GatewayError::config("aggregate route has no upstream template")
        })?;
        Ok(Self {
            upstream_template: PathTemplate::parse(raw)?,
            upstream_methods: parse_methods(&file.upstream_http_method)?,
            route_keys: file.route_keys.clone(),
            declaration_index,
        })
    }
}

/// The active, immutable route table
#[derive(Debug, Default)]
pub struct RouteTable {
    pub global: GlobalSettings,
    pub routes: Vec<Arc<Route>>,
    pub aggregates: Vec<Arc<AggregateRoute>>,
    by_key: HashMap<String, Arc<Route>>,
}

impl RouteTable {
    /// Build and validate a table from a merged file configuration
    pub fn from_file(file: &FileConfiguration) -> GatewayResult<Self> {
        validation::validate(file)?;

        let global = match &file.global_configuration {
            Some(global) => GlobalSettings {
                request_id_key: global.request_id_key.clone(),
                administration_path: global.administration_path.clone(),
                discovery: global
                    .service_discovery_provider
                    .as_ref()
                    .map(DiscoveryProviderConfig::from_file)
                    .transpose()?,
                custom: global.custom.clone(),
            },
            None => GlobalSettings::default(),
        };

        let routes = file
            .routes
            .iter()
            .enumerate()
            .map(|(index, route)| Route::from_file(route, index).map(Arc::new))
            .collect::<GatewayResult<Vec<_>>>()?;

        let aggregates = file
            .aggregates
            .iter()
            .enumerate()
            .map(|(index, aggregate)| AggregateRoute::from_file(aggregate, index).map(Arc::new))
            .collect::<GatewayResult<Vec<_>>>()?;

        let by_key = routes
            .iter()
            .map(|route| (route.key.clone(), Arc::clone(route)))
            .collect();

        Ok(Self {
            global,
            routes,
            aggregates,
            by_key,
        })
    }

    /// Look up a route by its unique key
    pub fn route_by_key(&self, key: &str) -> Option<Arc<Route>> {
        self.by_key.get(key).cloned()
    }
}

fn parse_method(raw: &str) -> GatewayResult<Method> {
    Method::from_str(raw.to_ascii_uppercase().as_str())
        .map_err(|_| GatewayError::config(format!("invalid HTTP method '{}'", raw)))
}

fn parse_methods(raw: &[String]) -> GatewayResult<Vec<Method>> {
    raw.iter().map(|m| parse_method(m)).collect()
}

fn qos_to_breaker_config(qos: &FileQosOptions) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        exceptions_allowed_before_breaking: qos.exceptions_allowed_before_breaking,
        duration_of_break: Duration::from_millis(qos.duration_of_break),
        timeout: Duration::from_millis(qos.timeout_value),
    }
}
