//! # Load Balancer Module
//!
//! Per-request host selection over a resolved host set. Each route key owns
//! one strategy instance whose state (round-robin cursor, in-flight counts)
//! is shared by every concurrent request to that route; the registry keeps
//! those instances alive across configuration reloads and only replaces one
//! when the route's strategy selection changes.
//!
//! Strategies that track in-flight work (LeastConnection) need their pick
//! released exactly once, whether the downstream call succeeds, fails, or is
//! cancelled mid-flight. [`HostLease`] guarantees that by releasing on drop.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::GatewayResult;
use crate::core::types::ResolvedHost;
use crate::load_balancing::strategies;
use crate::routing::table::{LoadBalancerKind, Route};

/// Core trait for load balancing strategies
///
/// `select` returns an index into the host slice; `release` is invoked
/// exactly once per successful pick when the lease is dropped.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Select a host from the resolved set
    ///
    /// # Arguments
    /// * `hosts` - The resolved host set, in configured/discovered order
    /// * `headers` - Upstream request headers (used for session affinity)
    async fn select(&self, hosts: &[ResolvedHost], headers: &HeaderMap) -> GatewayResult<usize>;

    /// Release a previously selected host
    fn release(&self, _host: &ResolvedHost) {}

    /// Strategy name for metrics and logging
    fn strategy_name(&self) -> &'static str;

    /// Per-host selection statistics
    fn stats(&self) -> HashMap<String, InstanceStats> {
        HashMap::new()
    }
}

/// Per-host statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct InstanceStats {
    pub selections: u64,
    pub active_connections: u64,
    pub last_selected: Option<DateTime<Utc>>,
}

/// A selected host, released back to its strategy exactly once on drop
pub struct HostLease {
    balancer: Arc<dyn LoadBalancer>,
    host: ResolvedHost,
}

impl HostLease {
    /// Pick a host from the set and lease it
    pub async fn acquire(
        balancer: Arc<dyn LoadBalancer>,
        hosts: &[ResolvedHost],
        headers: &HeaderMap,
    ) -> GatewayResult<Self> {
        let index = balancer.select(hosts, headers).await?;
        counter!("gateway_load_balancer_selections").increment(1);
        Ok(Self {
            balancer,
            host: hosts[index].clone(),
        })
    }

    pub fn host(&self) -> &ResolvedHost {
        &self.host
    }
}

impl Drop for HostLease {
    fn drop(&mut self) {
        self.balancer.release(&self.host);
    }
}

/// Load balancer registry keyed by route key
///
/// State is process-lifetime per route key: a reload that keeps a route's
/// strategy reuses the existing instance (preserving cursors and in-flight
/// counts); a changed strategy or sticky cookie replaces it.
#[derive(Default)]
pub struct LoadBalancerRegistry {
    entries: DashMap<String, RegistryEntry>,
}

struct RegistryEntry {
    kind: LoadBalancerKind,
    session_cookie: Option<String>,
    balancer: Arc<dyn LoadBalancer>,
}

impl LoadBalancerRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Get the balancer for a route, creating or replacing as needed
    pub fn get_or_create(&self, route: &Route) -> Arc<dyn LoadBalancer> {
        if let Some(entry) = self.entries.get(&route.key) {
            if entry.kind == route.load_balancer && entry.session_cookie == route.session_cookie {
                return Arc::clone(&entry.balancer);
            }
        }

        let balancer = strategies::build(route.load_balancer, route.session_cookie.as_deref());
        self.entries.insert(
            route.key.clone(),
            RegistryEntry {
                kind: route.load_balancer,
                session_cookie: route.session_cookie.clone(),
                balancer: Arc::clone(&balancer),
            },
        );
        balancer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file_model::FileConfiguration;
    use crate::routing::table::RouteTable;
    use serde_json::json;

    fn route(load_balancer: &str) -> Arc<Route> {
        let file: FileConfiguration = serde_json::from_value(json!({
            "routes": [{
                "key": "orders",
                "upstreamPathTemplate": "/api",
                "downstreamPathTemplate": "/api",
                "downstreamHostAndPorts": [
                    {"host": "a", "port": 80},
                    {"host": "b", "port": 80}
                ],
                "loadBalancer": load_balancer
            }]
        }))
        .unwrap();
        RouteTable::from_file(&file)
            .unwrap()
            .route_by_key("orders")
            .unwrap()
    }

    #[tokio::test]
    async fn test_registry_preserves_state_for_unchanged_kind() {
        let registry = LoadBalancerRegistry::new();
        let route = route("RoundRobin");

        let a = registry.get_or_create(&route);
        let b = registry.get_or_create(&route);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_registry_replaces_on_kind_change() {
        let registry = LoadBalancerRegistry::new();

        let first = registry.get_or_create(&route("RoundRobin"));
        let second = registry.get_or_create(&route("LeastConnection"));
        assert_eq!(first.strategy_name(), "round_robin");
        assert_eq!(second.strategy_name(), "least_connection");
    }

    #[tokio::test]
    async fn test_lease_releases_on_drop() {
        let balancer: Arc<dyn LoadBalancer> =
            Arc::new(strategies::LeastConnection::new());
        let hosts = vec![ResolvedHost::new("a", 80), ResolvedHost::new("b", 80)];

        let lease = HostLease::acquire(Arc::clone(&balancer), &hosts, &HeaderMap::new())
            .await
            .unwrap();
        let picked = lease.host().authority();
        let stats = balancer.stats();
        assert_eq!(stats.get(&picked).unwrap().active_connections, 1);

        drop(lease);
        let stats = balancer.stats();
        assert_eq!(stats.get(&picked).unwrap().active_connections, 0);
    }
}
