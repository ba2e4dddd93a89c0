pub mod balancer;
pub mod strategies;

pub use balancer::{HostLease, InstanceStats, LoadBalancer, LoadBalancerRegistry};
