//! # Core Types Module
//!
//! Foundational data types shared by the routing, load-balancing, and
//! discovery layers: configured host/port pairs and the resolved hosts a
//! dispatch actually targets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A statically configured downstream host and port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostAndPort {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One entry of a resolved host set
///
/// Produced either directly from a route's static host list or by a service
/// discovery provider. The optional weight is carried for providers that
/// report it; the shipped balancing strategies ignore it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub host: String,
    pub port: u16,
    pub weight: Option<u32>,
}

impl ResolvedHost {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            weight: None,
        }
    }

    /// The `host:port` authority string, used as the key for per-host state
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&HostAndPort> for ResolvedHost {
    fn from(value: &HostAndPort) -> Self {
        Self {
            host: value.host.clone(),
            port: value.port,
            weight: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_format() {
        let host = ResolvedHost::new("10.0.0.5", 8081);
        assert_eq!(host.authority(), "10.0.0.5:8081");
    }

    #[test]
    fn test_from_host_and_port() {
        let configured = HostAndPort {
            host: "orders.internal".to_string(),
            port: 9000,
        };
        let resolved = ResolvedHost::from(&configured);
        assert_eq!(resolved.host, "orders.internal");
        assert_eq!(resolved.port, 9000);
        assert_eq!(resolved.weight, None);
    }
}
