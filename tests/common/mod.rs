//! Shared helpers for the integration suites: spin up the gateway and plain
//! axum downstream servers on ephemeral ports.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crossgate::{ConfigurationStore, GatewayServer, ServerConfig};

/// A running gateway instance for one test
pub struct TestGateway {
    pub addr: SocketAddr,
    pub store: Arc<ConfigurationStore>,
    // Held so the fragment file outlives the store that reads it.
    _fragment: NamedTempFile,
    _shutdown: CancellationToken,
}

impl TestGateway {
    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }
}

/// Start a gateway serving the given configuration document
pub async fn spawn_gateway(config: serde_json::Value) -> TestGateway {
    let mut fragment = NamedTempFile::new().expect("create fragment file");
    fragment
        .write_all(config.to_string().as_bytes())
        .expect("write fragment");
    fragment.flush().expect("flush fragment");

    let store = Arc::new(
        ConfigurationStore::load(vec![fragment.path().to_path_buf()])
            .await
            .expect("valid test configuration"),
    );

    let server = GatewayServer::new(Arc::clone(&store), ServerConfig::default())
        .expect("build gateway server");
    let app = server.app();

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind gateway");
    let addr = listener.local_addr().expect("gateway addr");

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .ok();
    });

    TestGateway {
        addr,
        store,
        _fragment: fragment,
        _shutdown: shutdown,
    }
}

/// Start a downstream axum app on an ephemeral port
pub async fn spawn_downstream(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind downstream");
    let addr = listener.local_addr().expect("downstream addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

/// A minimal single-route configuration document
pub fn single_route_config(
    upstream_template: &str,
    downstream_template: &str,
    downstream: SocketAddr,
) -> serde_json::Value {
    serde_json::json!({
        "routes": [{
            "key": "test-route",
            "upstreamPathTemplate": upstream_template,
            "downstreamPathTemplate": downstream_template,
            "downstreamHostAndPorts": [{"host": downstream.ip().to_string(), "port": downstream.port()}]
        }]
    })
}
