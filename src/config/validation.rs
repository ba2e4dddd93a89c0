//! # Configuration Validation Module
//!
//! Validates a merged configuration before a route table is built from it.
//! Validation is fatal at process start; on reload a failure is reported and
//! the previous table stays active. Rules are small objects so each check
//! stays independently testable and the failure message names every problem
//! at once instead of stopping at the first.

use crate::config::file_model::{FileConfiguration, FileRoute};
use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::table::{DiscoveryProviderKind, LoadBalancerKind, Scheme};
use crate::routing::template::{PathTemplate, QueryTemplate};

/// A single validation rule over the merged configuration
pub trait ValidationRule {
    fn validate(&self, file: &FileConfiguration) -> Result<(), Vec<String>>;
}

/// Run all rules, collecting every failure into one configuration error
pub fn validate(file: &FileConfiguration) -> GatewayResult<()> {
    let rules: Vec<Box<dyn ValidationRule>> = vec![
        Box::new(RouteTemplatesRule),
        Box::new(UniqueRouteKeysRule),
        Box::new(BackendRule),
        Box::new(StrategyStringsRule),
        Box::new(QosRule),
        Box::new(AggregateReferencesRule),
        Box::new(AmbiguousTemplatesRule),
    ];

    let mut problems = Vec::new();
    for rule in rules {
        if let Err(mut messages) = rule.validate(file) {
            problems.append(&mut messages);
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::config(problems.join("; ")))
    }
}

/// Both templates present and parseable; downstream placeholders covered
struct RouteTemplatesRule;

impl ValidationRule for RouteTemplatesRule {
    fn validate(&self, file: &FileConfiguration) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        for route in &file.routes {
            let upstream = match &route.upstream_path_template {
                Some(raw) => raw,
                None => {
                    problems.push(format!("route '{}' has no upstream template", route.key));
                    continue;
                }
            };
            let downstream = match &route.downstream_path_template {
                Some(raw) => raw,
                None => {
                    problems.push(format!("route '{}' has no downstream template", route.key));
                    continue;
                }
            };

            let (path_part, query_part) = match upstream.split_once('?') {
                Some((path, query)) => (path, Some(query)),
                None => (upstream.as_str(), None),
            };

            let mut upstream_names: Vec<String> = Vec::new();
            match PathTemplate::parse(path_part) {
                Ok(template) => {
                    upstream_names.extend(
                        template.placeholder_names().iter().map(|n| n.to_string()),
                    );
                }
                Err(e) => {
                    problems.push(format!("route '{}': {}", route.key, e));
                    continue;
                }
            }
            if let Some(query) = query_part {
                match QueryTemplate::parse(query) {
                    Ok(template) => {
                        upstream_names.extend(
                            template.placeholder_names().iter().map(|n| n.to_string()),
                        );
                    }
                    Err(e) => {
                        problems.push(format!("route '{}': {}", route.key, e));
                        continue;
                    }
                }
            }

            if !downstream.starts_with('/') {
                problems.push(format!(
                    "route '{}': downstream template must start with '/'",
                    route.key
                ));
            }
            for name in downstream_placeholders(downstream) {
                if !upstream_names.iter().any(|n| *n == name) {
                    problems.push(format!(
                        "route '{}': downstream placeholder '{{{}}}' is not captured upstream",
                        route.key, name
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Route keys are non-empty and unique
struct UniqueRouteKeysRule;

impl ValidationRule for UniqueRouteKeysRule {
    fn validate(&self, file: &FileConfiguration) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for route in &file.routes {
            if route.key.is_empty() {
                problems.push("route with empty key".to_string());
            } else if !seen.insert(route.key.as_str()) {
                problems.push(format!("duplicate route key '{}'", route.key));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Exactly one backend source; NoLoadBalancer implies a single static host;
/// service-name routes require a configured discovery provider
struct BackendRule;

impl ValidationRule for BackendRule {
    fn validate(&self, file: &FileConfiguration) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        let has_discovery = file
            .global_configuration
            .as_ref()
            .and_then(|g| g.service_discovery_provider.as_ref())
            .is_some();

        for route in &file.routes {
            let static_hosts = route.downstream_host_and_ports.len();
            let has_service = route.service_name.is_some();

            if has_service && static_hosts > 0 {
                problems.push(format!(
                    "route '{}' configures both static hosts and a service name",
                    route.key
                ));
            }
            if !has_service && static_hosts == 0 {
                problems.push(format!(
                    "route '{}' configures neither static hosts nor a service name",
                    route.key
                ));
            }
            if has_service && !has_discovery {
                problems.push(format!(
                    "route '{}' uses a service name but no discovery provider is configured",
                    route.key
                ));
            }

            let kind = route.load_balancer.as_deref().unwrap_or("NoLoadBalancer");
            if kind == "NoLoadBalancer" && !has_service && static_hosts != 1 {
                problems.push(format!(
                    "route '{}' uses NoLoadBalancer with {} hosts",
                    route.key, static_hosts
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Strategy selection strings resolve to the closed sets of known variants
struct StrategyStringsRule;

impl ValidationRule for StrategyStringsRule {
    fn validate(&self, file: &FileConfiguration) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        for route in &file.routes {
            if let Some(kind) = &route.load_balancer {
                if kind.parse::<LoadBalancerKind>().is_err() {
                    problems.push(format!(
                        "route '{}': unknown load balancer kind '{}'",
                        route.key, kind
                    ));
                }
            }
            if let Some(scheme) = &route.downstream_scheme {
                if scheme.parse::<Scheme>().is_err() {
                    problems.push(format!(
                        "route '{}': unknown downstream scheme '{}'",
                        route.key, scheme
                    ));
                }
            }
            for method in route
                .upstream_http_method
                .iter()
                .chain(route.downstream_http_method.iter())
            {
                if axum::http::Method::try_from(method.to_ascii_uppercase().as_str()).is_err() {
                    problems.push(format!(
                        "route '{}': invalid HTTP method '{}'",
                        route.key, method
                    ));
                }
            }
        }

        if let Some(provider) = file
            .global_configuration
            .as_ref()
            .and_then(|g| g.service_discovery_provider.as_ref())
        {
            if provider.provider.parse::<DiscoveryProviderKind>().is_err() {
                problems.push(format!(
                    "unknown service discovery provider '{}'",
                    provider.provider
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// QoS thresholds and durations must be positive
struct QosRule;

impl ValidationRule for QosRule {
    fn validate(&self, file: &FileConfiguration) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        for route in &file.routes {
            if let Some(qos) = &route.qos_options {
                if qos.exceptions_allowed_before_breaking == 0 {
                    problems.push(format!(
                        "route '{}': exceptionsAllowedBeforeBreaking must be at least 1",
                        route.key
                    ));
                }
                if qos.duration_of_break == 0 {
                    problems.push(format!(
                        "route '{}': durationOfBreak must be positive",
                        route.key
                    ));
                }
                if qos.timeout_value == 0 {
                    problems.push(format!(
                        "route '{}': timeoutValue must be positive",
                        route.key
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Aggregates reference existing route keys and carry a parseable template
struct AggregateReferencesRule;

impl ValidationRule for AggregateReferencesRule {
    fn validate(&self, file: &FileConfiguration) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        let known: std::collections::HashSet<&str> =
            file.routes.iter().map(|r| r.key.as_str()).collect();

        for aggregate in &file.aggregates {
            match &aggregate.upstream_path_template {
                Some(raw) => {
                    if let Err(e) = PathTemplate::parse(raw) {
                        problems.push(format!("aggregate '{}': {}", raw, e));
                    }
                }
                None => problems.push("aggregate route has no upstream template".to_string()),
            }

            if aggregate.route_keys.is_empty() {
                problems.push("aggregate route references no route keys".to_string());
            }
            for key in &aggregate.route_keys {
                if !known.contains(key.as_str()) {
                    problems.push(format!(
                        "aggregate references unknown route key '{}'",
                        key
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Upstream (template, method, host) tuples must not collide exactly
///
/// Specificity ranking resolves overlapping-but-distinct templates at match
/// time; two templates matching exactly the same set of paths with
/// overlapping methods and the same host filter are a configuration error.
struct AmbiguousTemplatesRule;

impl ValidationRule for AmbiguousTemplatesRule {
    fn validate(&self, file: &FileConfiguration) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        struct Entry<'a> {
            description: String,
            template: PathTemplate,
            methods: &'a [String],
            host: Option<&'a str>,
        }

        let mut entries: Vec<Entry<'_>> = Vec::new();
        for route in &file.routes {
            if let Some(template) = parsed_path_template(route) {
                entries.push(Entry {
                    description: format!("route '{}'", route.key),
                    template,
                    methods: &route.upstream_http_method,
                    host: route.upstream_host.as_deref(),
                });
            }
        }
        for aggregate in &file.aggregates {
            let Some(raw) = &aggregate.upstream_path_template else {
                continue;
            };
            if let Ok(template) = PathTemplate::parse(raw) {
                entries.push(Entry {
                    description: format!("aggregate '{}'", raw),
                    template,
                    methods: &aggregate.upstream_http_method,
                    host: None,
                });
            }
        }

        for (i, a) in entries.iter().enumerate() {
            for b in entries.iter().skip(i + 1) {
                if a.template.same_shape(&b.template)
                    && methods_overlap(a.methods, b.methods)
                    && hosts_equal(a.host, b.host)
                {
                    problems.push(format!(
                        "{} and {} match the same upstream requests",
                        a.description, b.description
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

fn parsed_path_template(route: &FileRoute) -> Option<PathTemplate> {
    let raw = route.upstream_path_template.as_deref()?;
    let path_part = raw.split_once('?').map(|(p, _)| p).unwrap_or(raw);
    PathTemplate::parse(path_part).ok()
}

/// An empty method list accepts any method and therefore overlaps everything
fn methods_overlap(a: &[String], b: &[String]) -> bool {
    if a.is_empty() || b.is_empty() {
        return true;
    }
    a.iter()
        .any(|m| b.iter().any(|n| m.eq_ignore_ascii_case(n)))
}

fn hosts_equal(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

/// Extract `{name}` occurrences from a raw downstream template
fn downstream_placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        names.push(rest[start + 1..start + len].to_string());
        rest = &rest[start + len + 1..];
    }
    names
}
