//! # Service Discovery Module
//!
//! Resolves a route's logical service name into a live host/port set. The
//! provider is consulted lazily per request through a caching resolver: a
//! TTL-fresh set is served from cache, a refresh is bounded by the provider's
//! own timeout, and when a refresh fails the last successfully resolved set
//! is retained. A discovery error only surfaces when no prior successful
//! resolution exists. Routes with static host lists bypass this module
//! entirely.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::ResolvedHost;
use crate::routing::table::{DiscoveryProviderConfig, DiscoveryProviderKind};

/// Service discovery trait that all backends implement
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Resolve a logical service name to its current host set
    async fn resolve(&self, service_name: &str) -> GatewayResult<Vec<ResolvedHost>>;

    /// Provider name for metrics and logging
    fn provider_name(&self) -> &'static str;
}

/// Consul-backed discovery using the catalog's service list query
///
/// The registry is treated as a black box: one HTTP GET returning the list of
/// registered instances, bounded by its own timeout independent of any
/// per-request QoS timeout.
pub struct ConsulDiscovery {
    client: reqwest::Client,
    base_url: String,
}

/// Subset of a Consul catalog entry the gateway cares about
#[derive(Debug, Deserialize)]
struct ConsulServiceEntry {
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "ServiceAddress", default)]
    service_address: String,
    #[serde(rename = "ServicePort")]
    service_port: u16,
}

impl ConsulDiscovery {
    pub fn new(host: &str, port: u16, timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::config(format!("failed to build Consul client: {}", e)))?;

        Ok(Self {
            client,
            base_url: format!("http://{}:{}", host, port),
        })
    }
}

#[async_trait]
impl ServiceDiscovery for ConsulDiscovery {
    async fn resolve(&self, service_name: &str) -> GatewayResult<Vec<ResolvedHost>> {
        let url = format!("{}/v1/catalog/service/{}", self.base_url, service_name);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::discovery_unavailable(service_name, e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::discovery_unavailable(
                service_name,
                format!("registry returned {}", response.status()),
            ));
        }

        let entries: Vec<ConsulServiceEntry> = response
            .json()
            .await
            .map_err(|e| GatewayError::discovery_unavailable(service_name, e.to_string()))?;

        let hosts = entries
            .into_iter()
            .map(|entry| {
                let host = if entry.service_address.is_empty() {
                    entry.address
                } else {
                    entry.service_address
                };
                ResolvedHost::new(host, entry.service_port)
            })
            .collect::<Vec<_>>();

        debug!(
            service = service_name,
            instances = hosts.len(),
            "resolved service from Consul"
        );
        Ok(hosts)
    }

    fn provider_name(&self) -> &'static str {
        "consul"
    }
}

/// In-memory discovery for tests and fixed deployments
#[derive(Default)]
pub struct StaticDiscovery {
    services: DashMap<String, Vec<ResolvedHost>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    pub fn add_service(&self, name: impl Into<String>, hosts: Vec<ResolvedHost>) {
        self.services.insert(name.into(), hosts);
    }

    pub fn remove_service(&self, name: &str) {
        self.services.remove(name);
    }
}

#[async_trait]
impl ServiceDiscovery for StaticDiscovery {
    async fn resolve(&self, service_name: &str) -> GatewayResult<Vec<ResolvedHost>> {
        self.services
            .get(service_name)
            .map(|hosts| hosts.clone())
            .ok_or_else(|| {
                GatewayError::discovery_unavailable(service_name, "unknown service")
            })
    }

    fn provider_name(&self) -> &'static str {
        "static"
    }
}

#[derive(Clone)]
struct CachedHostSet {
    hosts: Vec<ResolvedHost>,
    fetched_at: Instant,
}

/// TTL cache over a discovery provider with last-known-good fallback
pub struct CachingResolver {
    provider: Arc<dyn ServiceDiscovery>,
    ttl: Duration,
    cache: DashMap<String, CachedHostSet>,
}

impl CachingResolver {
    pub fn new(provider: Arc<dyn ServiceDiscovery>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            cache: DashMap::new(),
        }
    }

    /// Resolve a service, serving from cache within the TTL
    ///
    /// A refresh returning no hosts is treated the same as a refresh failure:
    /// the cached set keeps serving until the registry recovers.
    pub async fn resolve(&self, service_name: &str) -> GatewayResult<Vec<ResolvedHost>> {
        if let Some(cached) = self.cache.get(service_name) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.hosts.clone());
            }
        }

        match self.provider.resolve(service_name).await {
            Ok(hosts) if !hosts.is_empty() => {
                self.cache.insert(
                    service_name.to_string(),
                    CachedHostSet {
                        hosts: hosts.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(hosts)
            }
            Ok(_) => self.last_known_good(service_name, "registry returned no instances"),
            Err(e) => self.last_known_good(service_name, &e.to_string()),
        }
    }

    fn last_known_good(
        &self,
        service_name: &str,
        reason: &str,
    ) -> GatewayResult<Vec<ResolvedHost>> {
        match self.cache.get(service_name) {
            Some(cached) => {
                warn!(
                    service = service_name,
                    provider = self.provider.provider_name(),
                    reason,
                    "discovery refresh failed, serving last known host set"
                );
                Ok(cached.hosts.clone())
            }
            None => Err(GatewayError::discovery_unavailable(service_name, reason)),
        }
    }
}

/// Process-lifetime arena of caching resolvers, keyed by provider endpoint
///
/// The active provider configuration lives in the route table and can change
/// on reload; resolvers are created on first use per endpoint so cached host
/// sets survive reloads that keep the same registry.
#[derive(Default)]
pub struct DiscoveryRegistry {
    resolvers: DashMap<String, Arc<CachingResolver>>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self {
            resolvers: DashMap::new(),
        }
    }

    /// Get the resolver for a provider configuration, creating it on first use
    pub fn resolver_for(
        &self,
        config: &DiscoveryProviderConfig,
    ) -> GatewayResult<Arc<CachingResolver>> {
        let key = config.cache_key();
        if let Some(resolver) = self.resolvers.get(&key) {
            return Ok(Arc::clone(&resolver));
        }

        let provider: Arc<dyn ServiceDiscovery> = match config.kind {
            DiscoveryProviderKind::Consul => Arc::new(ConsulDiscovery::new(
                &config.host,
                config.port,
                config.timeout,
            )?),
        };

        let resolver = Arc::new(CachingResolver::new(provider, config.cache_ttl));
        self.resolvers.insert(key, Arc::clone(&resolver));
        Ok(resolver)
    }
}
