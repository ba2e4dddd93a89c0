//! # Crossgate - API Gateway Dispatch Core
//!
//! A declarative API gateway: upstream HTTP requests are matched against a
//! route table, rewritten into downstream requests, dispatched (optionally
//! load-balanced, circuit-broken, and service-discovered), and their
//! responses streamed back. The gateway performs no business logic of its
//! own; it is a pure request-transform-and-forward pipeline with pluggable
//! policies.
//!
//! The pipeline for one request:
//!
//! 1. snapshot the active [`routing::table::RouteTable`] from the
//!    [`config::ConfigurationStore`]
//! 2. match (method, path, host) via [`routing::matcher`]
//! 3. build the downstream URI via [`routing::url_builder`]
//! 4. resolve hosts statically or through [`discovery`]
//! 5. pick a host via [`load_balancing`]
//! 6. invoke through the route's [`core::circuit_breaker`]
//! 7. stream the response back via [`gateway::dispatcher`]
//!
//! Aggregate routes fan out to several member routes through
//! [`gateway::aggregation`] and merge the results keyed by route key.

/// Error taxonomy, shared data types, and the circuit breaker
pub mod core;

/// Configuration fragments: file model, merge, validation, and the store
/// holding the atomically swapped active table
pub mod config;

/// Route table, template matching, and downstream URL building
pub mod routing;

/// Per-request host selection strategies with per-route shared state
pub mod load_balancing;

/// Service name resolution with TTL caching and last-known-good fallback
pub mod discovery;

/// The request dispatcher, aggregation engine, and listener shell
pub mod gateway;

/// Logging and metrics bootstrap
pub mod observability;

pub use crate::config::ConfigurationStore;
pub use crate::core::error::{GatewayError, GatewayResult};
pub use crate::gateway::{GatewayServer, RequestDispatcher, ServerConfig};
pub use crate::routing::table::RouteTable;
