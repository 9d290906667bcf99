//! Best-effort schema-reload broadcasts to worker processes.
//!
//! A broadcast is a latency optimization, never a correctness requirement:
//! workers that miss it self-heal through the layout cache's
//! refresh-on-miss path.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Wire shape of a reload broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadSignal {
    pub signal: String,
    pub target: String,
    /// Registries the worker should drop and reload.
    pub modules: Vec<String>,
    pub timeout_seconds: u64,
}

/// Transport delivering a reload signal to one worker and awaiting its ack.
#[async_trait]
pub trait ReloadTransport: Send + Sync {
    async fn send(&self, signal: ReloadSignal) -> Result<()>;
}

/// Tracks known workers and pushes reload signals to them after schema
/// mutations.
pub struct WorkerSync {
    timeout: Duration,
    modules: Vec<String>,
    workers: RwLock<HashMap<String, Arc<dyn ReloadTransport>>>,
}

impl WorkerSync {
    pub fn new(timeout_seconds: u64, modules: Vec<String>) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_seconds),
            modules,
            workers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, worker_id: impl Into<String>, transport: Arc<dyn ReloadTransport>) {
        self.workers.write().await.insert(worker_id.into(), transport);
    }

    pub async fn deregister(&self, worker_id: &str) {
        self.workers.write().await.remove(worker_id);
    }

    /// Tell one worker to drop its cached registries and reload.
    ///
    /// A timeout or worker-side rejection surfaces as an error here, but
    /// callers treat it as non-fatal: the triggering schema mutation is
    /// never rolled back.
    pub async fn notify_schema_change(&self, worker_id: &str) -> Result<()> {
        let transport = {
            self.workers
                .read()
                .await
                .get(worker_id)
                .cloned()
                .ok_or_else(|| SyncError::UnknownWorker(worker_id.to_string()))?
        };

        let signal = ReloadSignal {
            signal: "reload".to_string(),
            target: worker_id.to_string(),
            modules: self.modules.clone(),
            timeout_seconds: self.timeout.as_secs(),
        };

        match tokio::time::timeout(self.timeout, transport.send(signal)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::BroadcastTimeout {
                worker: worker_id.to_string(),
                timeout_seconds: self.timeout.as_secs(),
            }
            .into()),
        }
    }

    /// Notify every registered worker, logging failures instead of
    /// propagating them.
    pub async fn broadcast(&self) {
        let worker_ids: Vec<String> = { self.workers.read().await.keys().cloned().collect() };

        for worker_id in worker_ids {
            if let Err(error) = self.notify_schema_change(&worker_id).await {
                tracing::warn!(
                    worker = %worker_id,
                    %error,
                    "schema reload broadcast failed, worker will refresh on cache miss"
                );
            }
        }
    }
}
