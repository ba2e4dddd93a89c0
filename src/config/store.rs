//! # Configuration Store Module
//!
//! Holds the currently active [`RouteTable`] and produces new ones from the
//! configured fragment files. The active table sits behind a single
//! `RwLock<Arc<RouteTable>>` whose critical section is an Arc clone: readers
//! snapshot the table once at the start of a request and use that snapshot
//! for the request's whole lifetime, so a concurrent swap is never observed
//! partially. Hot reload is opt-in through [`ConfigurationStore::watch`]; a
//! failed re-merge or re-validation keeps the previous table active.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::file_model::FileConfiguration;
use crate::config::merge;
use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::table::RouteTable;

/// Notification that a new table was published
#[derive(Debug, Clone)]
pub struct ConfigChangeEvent {
    pub changed_at: DateTime<Utc>,
    pub source: String,
}

/// The configuration store
pub struct ConfigurationStore {
    active: RwLock<Arc<RouteTable>>,
    sources: Vec<PathBuf>,
    /// When set, the merged document is persisted here on every successful
    /// (re)load. Left unset, the store never writes to disk.
    merged_artifact: Option<PathBuf>,
    change_tx: broadcast::Sender<ConfigChangeEvent>,
}

impl ConfigurationStore {
    /// Load the initial table from the fragment files, in merge order
    ///
    /// A validation failure here is fatal: no empty or fallback configuration
    /// is ever substituted.
    pub async fn load(sources: Vec<PathBuf>) -> GatewayResult<Self> {
        Self::load_with_artifact(sources, None).await
    }

    /// Load, additionally persisting the merged document to `artifact`
    ///
    /// Used when a feature that reads the merged configuration back (the
    /// administration surface, external configuration storage) is active.
    pub async fn load_with_artifact(
        sources: Vec<PathBuf>,
        artifact: Option<PathBuf>,
    ) -> GatewayResult<Self> {
        let table = Self::build_from_sources(&sources, artifact.as_deref()).await?;
        let (change_tx, _) = broadcast::channel(16);

        info!(
            fragments = sources.len(),
            routes = table.routes.len(),
            aggregates = table.aggregates.len(),
            "configuration loaded"
        );

        Ok(Self {
            active: RwLock::new(Arc::new(table)),
            sources,
            merged_artifact: artifact,
            change_tx,
        })
    }

    /// Snapshot the active table
    pub fn current(&self) -> Arc<RouteTable> {
        self.active.read().clone()
    }

    /// Atomically publish a new table
    pub fn swap(&self, table: RouteTable) {
        *self.active.write() = Arc::new(table);
        let _ = self.change_tx.send(ConfigChangeEvent {
            changed_at: Utc::now(),
            source: "swap".to_string(),
        });
    }

    /// Re-merge and re-validate the fragment files, publishing on success
    ///
    /// On failure the previous table stays active and the error is returned
    /// to the caller; the watcher logs it and carries on.
    pub async fn reload(&self) -> GatewayResult<()> {
        let table =
            Self::build_from_sources(&self.sources, self.merged_artifact.as_deref()).await?;
        info!(
            routes = table.routes.len(),
            aggregates = table.aggregates.len(),
            "configuration reloaded"
        );
        self.swap(table);
        Ok(())
    }

    /// Subscribe to table-published notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_tx.subscribe()
    }

    /// Watch the fragment files and reload on change (opt-in hot reload)
    ///
    /// The watcher task lives until `token` is cancelled; events are
    /// debounced so a burst of writes triggers one reload.
    pub fn watch(self: &Arc<Self>, token: CancellationToken) -> GatewayResult<()> {
        let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<()>(16);

        let mut watcher =
            notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
                if let Ok(event) = result {
                    if matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        let _ = event_tx.blocking_send(());
                    }
                }
            })
            .map_err(|e| GatewayError::config(format!("failed to create file watcher: {}", e)))?;

        for source in &self.sources {
            watcher
                .watch(source, RecursiveMode::NonRecursive)
                .map_err(|e| {
                    GatewayError::config(format!(
                        "failed to watch {}: {}",
                        source.display(),
                        e
                    ))
                })?;
        }

        let store = Arc::clone(self);
        tokio::spawn(async move {
            // The watcher must stay alive as long as this task runs.
            let _watcher = watcher;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("configuration watcher stopped");
                        break;
                    }
                    received = event_rx.recv() => {
                        if received.is_none() {
                            break;
                        }
                        // Debounce editor write bursts.
                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                        while event_rx.try_recv().is_ok() {}

                        if let Err(e) = store.reload().await {
                            warn!(error = %e, "configuration reload failed, keeping previous table");
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn build_from_sources(
        sources: &[PathBuf],
        artifact: Option<&Path>,
    ) -> GatewayResult<RouteTable> {
        if sources.is_empty() {
            return Err(GatewayError::config("no configuration fragments given"));
        }

        let mut fragments = Vec::with_capacity(sources.len());
        for source in sources {
            let content = tokio::fs::read_to_string(source).await.map_err(|e| {
                GatewayError::config(format!("failed to read {}: {}", source.display(), e))
            })?;
            let value: Value = serde_json::from_str(&content).map_err(|e| {
                GatewayError::config(format!("failed to parse {}: {}", source.display(), e))
            })?;
            fragments.push(value);
        }

        let merged = merge::merge_fragments(&fragments)?;

        if let Some(path) = artifact {
            let pretty = serde_json::to_string_pretty(&merged)?;
            tokio::fs::write(path, pretty).await.map_err(|e| {
                GatewayError::config(format!(
                    "failed to persist merged configuration to {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }

        let file: FileConfiguration = serde_json::from_value(merged)
            .map_err(|e| GatewayError::config(format!("invalid configuration shape: {}", e)))?;

        RouteTable::from_file(&file)
    }
}
