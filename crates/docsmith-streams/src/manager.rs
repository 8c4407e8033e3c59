//! Registry and lifecycle for stream adapters.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use docsmith_core::types::AdapterType;
use docsmith_store::types::StreamConfig;
use docsmith_store::Store;

use crate::adapter::{build_adapter, AdapterContext, StreamAdapter};
use crate::error::{Result, StreamError};

/// A stream is disabled after this many consecutive failed runs.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

struct RegisteredStream {
    stream_id: String,
    adapter: Arc<dyn StreamAdapter>,
    schedule: Option<String>,
    consecutive_failures: AtomicU32,
}

/// Status row for the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub stream_id: String,
    pub adapter_type: AdapterType,
    pub schedule: Option<String>,
    pub consecutive_failures: u32,
    pub pending_backlog: u64,
}

/// Owns the `stream_id → adapter` registry. Loads enabled configs at start,
/// runs adapters on demand, disables streams that keep failing, and pauses
/// polling for streams whose PENDING backlog exceeds the threshold.
pub struct StreamManager {
    store: Arc<Store>,
    tenant_id: String,
    client: reqwest::Client,
    backpressure_threshold: usize,
    streams: DashMap<String, Arc<RegisteredStream>>,
    cancel: CancellationToken,
}

impl StreamManager {
    pub fn new(
        store: Arc<Store>,
        tenant_id: String,
        client: reqwest::Client,
        backpressure_threshold: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            tenant_id,
            client,
            backpressure_threshold,
            streams: DashMap::new(),
            cancel,
        }
    }

    /// Load every enabled stream config and register its adapter. A config
    /// that fails to initialise is logged and skipped — the stream is simply
    /// not registered.
    pub fn load_enabled(&self) -> Result<usize> {
        let configs = self.store.list_stream_configs(true)?;
        let mut registered = 0;
        for config in configs {
            match self.register_stream(&config) {
                Ok(()) => registered += 1,
                Err(e) => {
                    error!(stream_id = %config.stream_id, error = %e, "adapter not registered");
                }
            }
        }
        info!(registered, "stream adapters loaded");
        Ok(registered)
    }

    /// Register (or replace) one stream's adapter.
    pub fn register_stream(&self, config: &StreamConfig) -> Result<()> {
        let adapter = build_adapter(config.adapter_type, &config.config_json)?;
        info!(stream_id = %config.stream_id, adapter = %config.adapter_type, "registering stream adapter");
        self.streams.insert(
            config.stream_id.clone(),
            Arc::new(RegisteredStream {
                stream_id: config.stream_id.clone(),
                adapter,
                schedule: config.schedule.clone(),
                consecutive_failures: AtomicU32::new(0),
            }),
        );
        Ok(())
    }

    /// Remove a stream from the registry and shut its adapter down.
    pub async fn unregister_stream(&self, stream_id: &str) -> Result<()> {
        let (_, stream) = self
            .streams
            .remove(stream_id)
            .ok_or_else(|| StreamError::NotRegistered(stream_id.to_string()))?;
        stream.adapter.shutdown().await;
        info!(stream_id, "stream adapter unregistered");
        Ok(())
    }

    /// One import pass for a stream. Returns the number of imported
    /// messages; 0 without running when backpressure has paused the stream.
    pub async fn run_once(&self, stream_id: &str) -> Result<u64> {
        let stream = self
            .streams
            .get(stream_id)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| StreamError::NotRegistered(stream_id.to_string()))?;

        let backlog = self.store.pending_count(stream_id)?;
        if backlog as usize >= self.backpressure_threshold {
            warn!(
                stream_id,
                backlog,
                threshold = self.backpressure_threshold,
                "polling paused until the batch processor catches up"
            );
            return Ok(0);
        }

        let ctx = AdapterContext {
            store: Arc::clone(&self.store),
            tenant_id: self.tenant_id.clone(),
            stream_id: stream_id.to_string(),
            client: self.client.clone(),
            cancel: self.cancel.child_token(),
        };

        match stream.adapter.run(&ctx).await {
            Ok(imported) => {
                stream.consecutive_failures.store(0, Ordering::SeqCst);
                Ok(imported)
            }
            Err(e) => {
                let failures = stream.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(stream_id, failures, error = %e, "adapter run failed");
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    let reason = format!("{failures} consecutive failures; last: {e}");
                    if let Err(db_err) =
                        self.store.disable_stream(&self.tenant_id, stream_id, &reason)
                    {
                        error!(stream_id, error = %db_err, "failed to persist stream disable");
                    }
                    self.streams.remove(stream_id);
                    error!(stream_id, reason = %reason, "stream disabled");
                }
                Err(e)
            }
        }
    }

    /// Webhook delivery for a registered stream — funnels the payload into
    /// the adapter's normaliser, sharing dedup and watermark semantics with
    /// the pull path.
    pub async fn ingest_push(&self, stream_id: &str, payload: &serde_json::Value) -> Result<bool> {
        let stream = self
            .streams
            .get(stream_id)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| StreamError::NotRegistered(stream_id.to_string()))?;

        let ctx = AdapterContext {
            store: Arc::clone(&self.store),
            tenant_id: self.tenant_id.clone(),
            stream_id: stream_id.to_string(),
            client: self.client.clone(),
            cancel: self.cancel.child_token(),
        };
        stream.adapter.ingest_push(&ctx, payload).await
    }

    /// `(stream_id, schedule)` pairs for scheduler registration.
    pub fn scheduled(&self) -> Vec<(String, String)> {
        self.streams
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .schedule
                    .clone()
                    .map(|s| (entry.key().clone(), s))
            })
            .collect()
    }

    pub fn is_registered(&self, stream_id: &str) -> bool {
        self.streams.contains_key(stream_id)
    }

    /// Current status of every registered stream, sorted by id.
    pub fn statuses(&self) -> Vec<StreamStatus> {
        let mut out: Vec<StreamStatus> = self
            .streams
            .iter()
            .map(|entry| {
                let s = entry.value();
                StreamStatus {
                    stream_id: s.stream_id.clone(),
                    adapter_type: s.adapter.adapter_type(),
                    schedule: s.schedule.clone(),
                    consecutive_failures: s.consecutive_failures.load(Ordering::SeqCst),
                    pending_backlog: self.store.pending_count(&s.stream_id).unwrap_or(0),
                }
            })
            .collect();
        out.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        out
    }

    /// Shut down every adapter. Called once on process exit.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, stream)) = self.streams.remove(&id) {
                stream.adapter.shutdown().await;
            }
        }
        info!("all stream adapters shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn manager(store: Arc<Store>) -> StreamManager {
        StreamManager::new(
            store,
            "t1".to_string(),
            reqwest::Client::new(),
            10_000,
            CancellationToken::new(),
        )
    }

    fn file_drop_config(store: &Store, stream_id: &str, dir: &str) -> StreamConfig {
        store
            .upsert_stream_config(
                "t1",
                stream_id,
                AdapterType::FileDrop,
                &serde_json::json!({"drop_dir": dir}),
                true,
                Some("interval:300"),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn loads_enabled_configs_and_skips_bad_ones() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let dir = tempfile::tempdir().unwrap();
        file_drop_config(&store, "good", &dir.path().to_string_lossy());
        // Bad shape: registration must skip it, not fail the load.
        store
            .upsert_stream_config(
                "t1",
                "bad",
                AdapterType::BotChat,
                &serde_json::json!({"wrong": true}),
                true,
                None,
            )
            .unwrap();

        let mgr = manager(store);
        assert_eq!(mgr.load_enabled().unwrap(), 1);
        assert!(mgr.is_registered("good"));
        assert!(!mgr.is_registered("bad"));
        assert_eq!(mgr.scheduled(), vec![("good".to_string(), "interval:300".to_string())]);
    }

    #[tokio::test]
    async fn run_once_imports_and_resets_failures() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("drop.csv"),
            "message_id,timestamp,author,content\nm1,2025-10-02T10:00:00Z,alice,hello\n",
        )
        .unwrap();
        file_drop_config(&store, "csv", &dir.path().to_string_lossy());

        let mgr = manager(store);
        mgr.load_enabled().unwrap();
        assert_eq!(mgr.run_once("csv").await.unwrap(), 1);
        assert_eq!(mgr.statuses()[0].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn repeated_failures_disable_the_stream() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        // Point the adapter at a directory that does not exist.
        file_drop_config(&store, "broken", "/nonexistent/docsmith-drops");

        let mgr = manager(store.clone());
        mgr.load_enabled().unwrap();

        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            assert!(mgr.run_once("broken").await.is_err());
        }
        assert!(!mgr.is_registered("broken"));
        let config = store.get_stream_config("t1", "broken").unwrap().unwrap();
        assert!(!config.enabled);
        assert!(config.disabled_reason.unwrap().contains("5 consecutive failures"));

        // Further runs report the stream as unregistered.
        assert!(matches!(
            mgr.run_once("broken").await,
            Err(StreamError::NotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn backpressure_pauses_polling() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let dir = tempfile::tempdir().unwrap();
        file_drop_config(&store, "csv", &dir.path().to_string_lossy());

        // Two pending messages against a threshold of one.
        for i in 0..2 {
            store
                .insert_message(&docsmith_store::types::NewMessage {
                    tenant_id: "t1".into(),
                    stream_id: "csv".into(),
                    message_id: format!("m{i}"),
                    timestamp: Utc::now(),
                    author: "a".into(),
                    content: "c".into(),
                    channel: None,
                    raw_data: "{}".into(),
                    metadata: serde_json::json!({}),
                })
                .unwrap();
        }

        let mgr = StreamManager::new(
            store,
            "t1".to_string(),
            reqwest::Client::new(),
            1,
            CancellationToken::new(),
        );
        mgr.load_enabled().unwrap();

        // Drop a file that would import — backpressure must skip the run.
        std::fs::write(
            dir.path().join("drop.csv"),
            "message_id,timestamp,author,content\nx,2025-10-02T10:00:00Z,a,b\n",
        )
        .unwrap();
        assert_eq!(mgr.run_once("csv").await.unwrap(), 0);
        assert!(dir.path().join("drop.csv").exists());
    }
}
