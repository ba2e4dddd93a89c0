//! Load balancing strategies: NoLoadBalancer, RoundRobin, LeastConnection,
//! and CookieSticky. All are safe under unbounded concurrent selection
//! against the same route's shared state.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::ResolvedHost;
use crate::load_balancing::balancer::{InstanceStats, LoadBalancer};
use crate::routing::table::LoadBalancerKind;

/// Cookie consulted by CookieSticky when a route configures no name
pub const DEFAULT_SESSION_COOKIE: &str = "gateway-session";

/// Build a strategy instance for the given kind
pub fn build(kind: LoadBalancerKind, session_cookie: Option<&str>) -> Arc<dyn LoadBalancer> {
    match kind {
        LoadBalancerKind::NoLoadBalancer => Arc::new(NoLoadBalancer),
        LoadBalancerKind::RoundRobin => Arc::new(RoundRobin::new()),
        LoadBalancerKind::LeastConnection => Arc::new(LeastConnection::new()),
        LoadBalancerKind::CookieSticky => Arc::new(CookieSticky::new(
            session_cookie.unwrap_or(DEFAULT_SESSION_COOKIE),
        )),
    }
}

/// Pass-through for routes with a single configured host
pub struct NoLoadBalancer;

#[async_trait]
impl LoadBalancer for NoLoadBalancer {
    async fn select(&self, hosts: &[ResolvedHost], _headers: &HeaderMap) -> GatewayResult<usize> {
        match hosts.len() {
            1 => Ok(0),
            n => Err(GatewayError::load_balancing(format!(
                "NoLoadBalancer requires exactly one host, got {}",
                n
            ))),
        }
    }

    fn strategy_name(&self) -> &'static str {
        "no_load_balancer"
    }
}

/// Round-robin with an atomic per-route cursor
pub struct RoundRobin {
    counter: AtomicUsize,
    stats: DashMap<String, StatsCell>,
}

#[derive(Default)]
struct StatsCell {
    selections: AtomicU64,
    active: AtomicUsize,
    last_selected: parking_lot::Mutex<Option<chrono::DateTime<chrono::Utc>>>,
}

impl StatsCell {
    fn record_selection(&self) {
        self.selections.fetch_add(1, Ordering::Relaxed);
        *self.last_selected.lock() = Some(chrono::Utc::now());
    }

    fn snapshot(&self) -> InstanceStats {
        InstanceStats {
            selections: self.selections.load(Ordering::Relaxed),
            active_connections: self.active.load(Ordering::Relaxed) as u64,
            last_selected: *self.last_selected.lock(),
        }
    }
}

fn snapshot_stats(stats: &DashMap<String, StatsCell>) -> HashMap<String, InstanceStats> {
    stats
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().snapshot()))
        .collect()
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            stats: DashMap::new(),
        }
    }

    fn next_index(&self, len: usize) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for RoundRobin {
    async fn select(&self, hosts: &[ResolvedHost], _headers: &HeaderMap) -> GatewayResult<usize> {
        if hosts.is_empty() {
            return Err(GatewayError::load_balancing("empty host set"));
        }
        let index = self.next_index(hosts.len());
        let selected = &hosts[index];
        self.stats
            .entry(selected.authority())
            .or_default()
            .record_selection();

        debug!(
            host = %selected.authority(),
            strategy = "round_robin",
            "selected downstream host"
        );
        Ok(index)
    }

    fn strategy_name(&self) -> &'static str {
        "round_robin"
    }

    fn stats(&self) -> HashMap<String, InstanceStats> {
        snapshot_stats(&self.stats)
    }
}

/// Least-connection with per-host in-flight counters
///
/// Picks the host with the fewest in-flight requests (ties broken by host
/// list order), increments its counter on pick, and decrements exactly once
/// when the lease is released.
pub struct LeastConnection {
    stats: DashMap<String, StatsCell>,
}

impl LeastConnection {
    pub fn new() -> Self {
        Self {
            stats: DashMap::new(),
        }
    }

    fn in_flight(&self, authority: &str) -> usize {
        self.stats
            .get(authority)
            .map(|cell| cell.active.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Default for LeastConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for LeastConnection {
    async fn select(&self, hosts: &[ResolvedHost], _headers: &HeaderMap) -> GatewayResult<usize> {
        if hosts.is_empty() {
            return Err(GatewayError::load_balancing("empty host set"));
        }

        let mut selected_index = 0;
        let mut min_in_flight = usize::MAX;
        for (index, host) in hosts.iter().enumerate() {
            let in_flight = self.in_flight(&host.authority());
            if in_flight < min_in_flight {
                min_in_flight = in_flight;
                selected_index = index;
            }
        }

        let selected = &hosts[selected_index];
        let cell = self.stats.entry(selected.authority()).or_default();
        cell.active.fetch_add(1, Ordering::Relaxed);
        cell.record_selection();

        debug!(
            host = %selected.authority(),
            in_flight = min_in_flight + 1,
            strategy = "least_connection",
            "selected downstream host"
        );
        Ok(selected_index)
    }

    fn release(&self, host: &ResolvedHost) {
        if let Some(cell) = self.stats.get(&host.authority()) {
            let _ = cell
                .active
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                    Some(v.saturating_sub(1))
                });
        }
    }

    fn strategy_name(&self) -> &'static str {
        "least_connection"
    }

    fn stats(&self) -> HashMap<String, InstanceStats> {
        snapshot_stats(&self.stats)
    }
}

/// Session affinity from a cookie hash, falling back to round-robin
pub struct CookieSticky {
    cookie_name: String,
    fallback: RoundRobin,
    stats: DashMap<String, StatsCell>,
}

impl CookieSticky {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            fallback: RoundRobin::new(),
            stats: DashMap::new(),
        }
    }

    /// Find the session cookie's value across all Cookie headers
    fn cookie_value<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        for header_value in headers.get_all(header::COOKIE) {
            let Ok(raw) = header_value.to_str() else {
                continue;
            };
            for pair in raw.split(';') {
                if let Some((name, value)) = pair.trim().split_once('=') {
                    if name == self.cookie_name {
                        return Some(value);
                    }
                }
            }
        }
        None
    }

    fn hash_to_u64(value: &str) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[0..8]);
        u64::from_be_bytes(bytes)
    }
}

#[async_trait]
impl LoadBalancer for CookieSticky {
    async fn select(&self, hosts: &[ResolvedHost], headers: &HeaderMap) -> GatewayResult<usize> {
        if hosts.is_empty() {
            return Err(GatewayError::load_balancing("empty host set"));
        }

        let index = match self.cookie_value(headers) {
            Some(value) => (Self::hash_to_u64(value) % hosts.len() as u64) as usize,
            None => self.fallback.select(hosts, headers).await?,
        };

        let selected = &hosts[index];
        self.stats
            .entry(selected.authority())
            .or_default()
            .record_selection();

        debug!(
            host = %selected.authority(),
            strategy = "cookie_sticky",
            "selected downstream host"
        );
        Ok(index)
    }

    fn strategy_name(&self) -> &'static str {
        "cookie_sticky"
    }

    fn stats(&self) -> HashMap<String, InstanceStats> {
        snapshot_stats(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn hosts(n: usize) -> Vec<ResolvedHost> {
        (0..n)
            .map(|i| ResolvedHost::new(format!("host-{}", i), 8080))
            .collect()
    }

    #[tokio::test]
    async fn test_no_load_balancer_requires_single_host() {
        let lb = NoLoadBalancer;
        assert_eq!(lb.select(&hosts(1), &HeaderMap::new()).await.unwrap(), 0);
        assert!(lb.select(&hosts(2), &HeaderMap::new()).await.is_err());
        assert!(lb.select(&hosts(0), &HeaderMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_round_robin_cycles_in_order() {
        let lb = RoundRobin::new();
        let hosts = hosts(3);
        let headers = HeaderMap::new();

        let picks: Vec<usize> = [
            lb.select(&hosts, &headers).await.unwrap(),
            lb.select(&hosts, &headers).await.unwrap(),
            lb.select(&hosts, &headers).await.unwrap(),
            lb.select(&hosts, &headers).await.unwrap(),
        ]
        .into();
        assert_eq!(picks, vec![0, 1, 2, 0]);
    }

    #[tokio::test]
    async fn test_least_connection_prefers_idle_host() {
        let lb = LeastConnection::new();
        let hosts = hosts(2);
        let headers = HeaderMap::new();

        let first = lb.select(&hosts, &headers).await.unwrap();
        assert_eq!(first, 0);

        // host-0 now has one in-flight request, so host-1 is picked next.
        let second = lb.select(&hosts, &headers).await.unwrap();
        assert_eq!(second, 1);

        // Releasing host-0 makes it the tie-break winner again.
        lb.release(&hosts[0]);
        let third = lb.select(&hosts, &headers).await.unwrap();
        assert_eq!(third, 0);
    }

    #[tokio::test]
    async fn test_least_connection_release_saturates_at_zero() {
        let lb = LeastConnection::new();
        let hosts = hosts(1);

        lb.select(&hosts, &HeaderMap::new()).await.unwrap();
        lb.release(&hosts[0]);
        lb.release(&hosts[0]);

        assert_eq!(
            lb.stats().get("host-0:8080").unwrap().active_connections,
            0
        );
    }

    #[tokio::test]
    async fn test_cookie_sticky_same_cookie_same_host() {
        let lb = CookieSticky::new("gateway-session");
        let hosts = hosts(4);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("gateway-session=abc123; theme=dark"),
        );

        let first = lb.select(&hosts, &headers).await.unwrap();
        for _ in 0..5 {
            assert_eq!(lb.select(&hosts, &headers).await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_cookie_sticky_falls_back_to_round_robin() {
        let lb = CookieSticky::new("gateway-session");
        let hosts = hosts(2);
        let headers = HeaderMap::new();

        let first = lb.select(&hosts, &headers).await.unwrap();
        let second = lb.select(&hosts, &headers).await.unwrap();
        assert_ne!(first, second);
    }
}
