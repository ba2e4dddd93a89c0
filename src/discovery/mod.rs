pub mod service_discovery;

pub use service_discovery::{
    CachingResolver, ConsulDiscovery, DiscoveryRegistry, ServiceDiscovery, StaticDiscovery,
};
