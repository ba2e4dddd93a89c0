//! # Configuration Integration Tests
//!
//! Fragment merging and reload observed through the store and the live
//! gateway: three fragments become one table, custom properties survive the
//! merge untouched, and a swap changes routing for new requests without
//! disturbing the running server.

mod common;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use serde_json::{json, Value};
use tempfile::NamedTempFile;

use common::{spawn_downstream, spawn_gateway};
use crossgate::ConfigurationStore;

fn fragment(value: &Value) -> (NamedTempFile, PathBuf) {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(value.to_string().as_bytes()).unwrap();
    file.flush().unwrap();
    let path = file.path().to_path_buf();
    (file, path)
}

fn route(key: &str, template: &str) -> Value {
    json!({
        "key": key,
        "upstreamPathTemplate": template,
        "downstreamPathTemplate": template,
        "downstreamHostAndPorts": [{"host": "backend", "port": 80}]
    })
}

#[tokio::test]
async fn three_fragments_merge_into_one_table() {
    let mut first_route = route("alpha", "/alpha");
    first_route["perVerbLimits"] = json!({"GET": ["10/s"]});

    let (_a, a) = fragment(&json!({
        "globalConfiguration": {
            "requestIdKey": "x-request-id",
            "customScalar": "untouched",
            "allowList": ["one", "two"]
        },
        "routes": [first_route]
    }));
    let (_b, b) = fragment(&json!({
        "routes": [
            route("beta", "/beta"),
            {"key": "alpha", "perVerbLimits": {"POST": ["2/s"]}}
        ]
    }));
    let (_c, c) = fragment(&json!({
        "globalConfiguration": {"requestIdKey": "x-correlation-id"},
        "routes": [route("gamma", "/gamma")]
    }));

    let store = ConfigurationStore::load(vec![a, b, c]).await.unwrap();
    let table = store.current();

    // Exactly three routes: same-key entries merged, others concatenated.
    assert_eq!(table.routes.len(), 3);

    // Per-verb custom object coalesced key-wise across fragments.
    let alpha = table.route_by_key("alpha").unwrap();
    assert_eq!(
        alpha.custom.get("perVerbLimits"),
        Some(&json!({"GET": ["10/s"], "POST": ["2/s"]}))
    );

    // Scalar from the later fragment wins; custom values pass through as-is.
    assert_eq!(
        table.global.request_id_key.as_deref(),
        Some("x-correlation-id")
    );
    assert_eq!(
        table.global.custom.get("customScalar"),
        Some(&json!("untouched"))
    );
    assert_eq!(
        table.global.custom.get("allowList"),
        Some(&json!(["one", "two"]))
    );
}

#[tokio::test]
async fn swapped_table_applies_to_new_requests() {
    async fn before() -> &'static str {
        "before"
    }
    async fn after() -> &'static str {
        "after"
    }
    let before_addr = spawn_downstream(Router::new().fallback(before)).await;
    let after_addr = spawn_downstream(Router::new().fallback(after)).await;

    let gateway = spawn_gateway(json!({
        "routes": [{
            "key": "swappable",
            "upstreamPathTemplate": "/endpoint",
            "downstreamPathTemplate": "/endpoint",
            "downstreamHostAndPorts": [
                {"host": before_addr.ip().to_string(), "port": before_addr.port()}
            ]
        }]
    }))
    .await;

    let body = reqwest::get(gateway.url("/endpoint")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "before");

    let new_file: crossgate::config::file_model::FileConfiguration =
        serde_json::from_value(json!({
            "routes": [{
                "key": "swappable",
                "upstreamPathTemplate": "/endpoint",
                "downstreamPathTemplate": "/endpoint",
                "downstreamHostAndPorts": [
                    {"host": after_addr.ip().to_string(), "port": after_addr.port()}
                ]
            }]
        }))
        .unwrap();
    let new_table = crossgate::RouteTable::from_file(&new_file).unwrap();
    gateway.store.swap(new_table);

    let body = reqwest::get(gateway.url("/endpoint")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "after");
}

#[tokio::test]
async fn invalid_fragment_set_fails_load() {
    let (_a, a) = fragment(&json!({
        "routes": [route("dup", "/a"), route("dup", "/b")]
    }));

    let result = ConfigurationStore::load(vec![a]).await;
    assert!(result.is_err());
    let message = result.err().map(|e| e.to_string()).unwrap_or_default();
    assert!(message.contains("duplicate route key"));
}

#[tokio::test]
async fn store_and_gateway_share_one_arc(){
    // `current()` snapshots are consistent per request: two snapshots taken
    // with no swap in between are the same table instance.
    let (_a, a) = fragment(&json!({"routes": [route("only", "/only")]}));
    let store = ConfigurationStore::load(vec![a]).await.unwrap();

    let first = store.current();
    let second = store.current();
    assert!(Arc::ptr_eq(&first, &second));
}
