//! # HTTP Server Module
//!
//! The thin axum shell around the dispatcher: every request that reaches the
//! listener, whatever its path or method, is handed to
//! [`RequestDispatcher::dispatch`] and the outcome (or its mapped error
//! response) is returned to the client. Hot reload and graceful shutdown hang
//! off one [`CancellationToken`] so background tasks are torn down with the
//! server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ConfigurationStore;
use crate::core::error::{GatewayError, GatewayResult};
use crate::gateway::dispatcher::RequestDispatcher;

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Gateway bind address
    pub bind_addr: SocketAddr,

    /// Watch configuration fragments and hot-swap the table on change
    pub enable_hot_reload: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static bind address"),
            enable_hot_reload: false,
        }
    }
}

/// The gateway server
pub struct GatewayServer {
    store: Arc<ConfigurationStore>,
    dispatcher: Arc<RequestDispatcher>,
    config: ServerConfig,
}

impl GatewayServer {
    pub fn new(store: Arc<ConfigurationStore>, config: ServerConfig) -> GatewayResult<Self> {
        let dispatcher = Arc::new(RequestDispatcher::new(Arc::clone(&store))?);
        Ok(Self {
            store,
            dispatcher,
            config,
        })
    }

    /// Build the axum application routing every request into the dispatcher
    pub fn app(&self) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(Arc::clone(&self.dispatcher))
    }

    /// Serve until the token is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> GatewayResult<()> {
        if self.config.enable_hot_reload {
            self.store.watch(shutdown.child_token())?;
            info!("configuration hot reload enabled");
        }

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "gateway listening");

        let app = self.app();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("gateway shut down");
        Ok(())
    }
}

async fn proxy_handler(
    State(dispatcher): State<Arc<RequestDispatcher>>,
    request: Request,
) -> Response {
    match dispatcher.dispatch(request).await {
        Ok(response) => response,
        Err(error) => {
            match &error {
                GatewayError::RouteNotFound { .. } => {
                    debug!(error = %error, "request did not match any route")
                }
                GatewayError::CircuitOpen { .. } | GatewayError::DownstreamTimeout { .. } => {
                    warn!(error = %error, "dispatch rejected")
                }
                _ => warn!(error = %error, "dispatch failed"),
            }
            error.into_response()
        }
    }
}
