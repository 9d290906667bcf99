//! Asynchronous task dispatch and completion routing.
//!
//! Dispatch is at-least-once and non-blocking; the completion path writes
//! transformer output into index tables through a worker-local layout cache
//! and retries schema-visibility races once on a fresh connection.

pub mod queue;
pub mod sync;
pub mod writer;

use crate::error::Result;
use crate::model::Document;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

pub use queue::{LocalQueue, TaskStatus};
pub use sync::{ReloadSignal, ReloadTransport, WorkerSync};
pub use writer::{IndexWriter, LayoutCache, LayoutCacheReload};

pub type TaskId = Uuid;

/// Scheduling band of a dispatched task.
///
/// Transform work rides above maintenance so bulk background jobs cannot
/// starve interactive ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    Transform,
    Maintenance,
}

/// Everything a worker needs to run one transform and route its output.
#[derive(Debug, Clone)]
pub struct TaskPayload {
    /// Queue task name, derived from the transformer id.
    pub task_name: String,
    pub document: Document,
    /// Transformer params, including the `output_fields` list.
    pub params: serde_json::Map<String, Value>,
    /// Destination index.
    pub index_id: Uuid,
    /// Set when the dispatch was triggered by a binding.
    pub binding_id: Option<Uuid>,
}

/// Handle returned by a dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: TaskId,
}

/// The queue seam: an at-least-once, non-blocking dispatch primitive.
#[async_trait]
pub trait TaskDispatch: Send + Sync {
    async fn dispatch(&self, payload: TaskPayload, priority: TaskPriority) -> Result<TaskHandle>;
}
