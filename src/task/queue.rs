//! In-process task queue implementing the dispatch contract.
//!
//! Stands in for the external distributed queue: two priority bands, a
//! fixed pool of worker slots, and per-slot storage connections. Workers
//! drain the transform band before touching maintenance work.

use crate::error::Result;
use crate::task::writer::{IndexWriter, LayoutCache};
use crate::task::{TaskDispatch, TaskHandle, TaskId, TaskPayload, TaskPriority};
use crate::transform::TransformRegistry;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use uuid::Uuid;

/// Terminal state of one task, recorded on the task itself.
///
/// Failures never crash the worker slot that ran them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Completed { records: usize },
    Failed { error: String },
}

struct QueuedTask {
    id: TaskId,
    payload: TaskPayload,
}

#[derive(Default)]
struct Bands {
    transform: VecDeque<QueuedTask>,
    maintenance: VecDeque<QueuedTask>,
}

struct QueueShared {
    bands: std::sync::Mutex<Bands>,
    results: std::sync::Mutex<HashMap<TaskId, TaskStatus>>,
    work_available: Notify,
    task_finished: Notify,
    in_flight: AtomicUsize,
}

impl QueueShared {
    fn pop(&self) -> Option<QueuedTask> {
        let mut bands = self.bands.lock().expect("queue lock poisoned");
        bands
            .transform
            .pop_front()
            .or_else(|| bands.maintenance.pop_front())
    }

    fn finish(&self, id: TaskId, status: TaskStatus) {
        self.results
            .lock()
            .expect("results lock poisoned")
            .insert(id, status);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.task_finished.notify_waiters();
    }
}

/// Local, at-least-once task queue with a fixed worker pool.
pub struct LocalQueue {
    shared: Arc<QueueShared>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl LocalQueue {
    /// Start the queue with `worker_count` slots.
    ///
    /// Each slot owns one lazily-created storage connection, reused across
    /// the tasks that slot handles and shared with nothing else.
    pub fn start(
        worker_count: usize,
        transforms: Arc<TransformRegistry>,
        cache: Arc<LayoutCache>,
        db_uri: &str,
    ) -> Self {
        let shared = Arc::new(QueueShared {
            bands: std::sync::Mutex::new(Bands::default()),
            results: std::sync::Mutex::new(HashMap::new()),
            work_available: Notify::new(),
            task_finished: Notify::new(),
            in_flight: AtomicUsize::new(0),
        });

        let workers = (0..worker_count.max(1))
            .map(|slot| {
                let shared = shared.clone();
                let transforms = transforms.clone();
                let writer = IndexWriter::new(db_uri, cache.clone());
                tokio::spawn(async move {
                    worker_loop(slot, shared, transforms, writer).await;
                })
            })
            .collect();

        Self { shared, workers }
    }

    /// Terminal status of a task, once a worker has finished it.
    pub fn task_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.shared
            .results
            .lock()
            .expect("results lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Wait until every dispatched task has finished.
    pub async fn drain(&self) {
        loop {
            let finished = self.shared.task_finished.notified();
            if self.shared.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            finished.await;
        }
    }
}

impl Drop for LocalQueue {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

#[async_trait]
impl TaskDispatch for LocalQueue {
    async fn dispatch(&self, payload: TaskPayload, priority: TaskPriority) -> Result<TaskHandle> {
        let task = QueuedTask {
            id: Uuid::new_v4(),
            payload,
        };
        let id = task.id;

        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        {
            let mut bands = self.shared.bands.lock().expect("queue lock poisoned");
            match priority {
                TaskPriority::Transform => bands.transform.push_back(task),
                TaskPriority::Maintenance => bands.maintenance.push_back(task),
            }
        }
        self.shared.work_available.notify_one();

        Ok(TaskHandle { id })
    }
}

async fn worker_loop(
    slot: usize,
    shared: Arc<QueueShared>,
    transforms: Arc<TransformRegistry>,
    writer: IndexWriter,
) {
    loop {
        let task = loop {
            let available = shared.work_available.notified();
            if let Some(task) = shared.pop() {
                break task;
            }
            available.await;
        };

        let status = execute(&transforms, &writer, &task).await;
        if let TaskStatus::Failed { error } = &status {
            tracing::error!(
                slot,
                task_id = %task.id,
                task = %task.payload.task_name,
                document_id = %task.payload.document.id,
                error = %error,
                "task failed"
            );
        }
        shared.finish(task.id, status);
        // Another task may already be queued behind this one.
        shared.work_available.notify_one();
    }
}

async fn execute(
    transforms: &TransformRegistry,
    writer: &IndexWriter,
    task: &QueuedTask,
) -> TaskStatus {
    let Some(transform) = transforms.get(&task.payload.task_name) else {
        return TaskStatus::Failed {
            error: format!("no transform registered for task '{}'", task.payload.task_name),
        };
    };

    let items = match transform
        .run(&task.payload.document, &task.payload.params)
        .await
    {
        Ok(items) => items,
        Err(error) => {
            return TaskStatus::Failed {
                error: error.to_string(),
            };
        }
    };

    match writer.persist(task.id, &task.payload, items).await {
        Ok(records) => TaskStatus::Completed { records },
        Err(error) => TaskStatus::Failed {
            error: error.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::model::{DistanceMetric, Document, FieldKind, FieldSpec, IndexDefinition};
    use crate::schema::layout::RecordLayout;
    use crate::schema::table::IndexTable;
    use crate::transform::{OUTPUT_FIELDS_PARAM, OutputItem, Transform};
    use serde_json::{Value, json};
    use std::collections::BTreeMap;

    struct FixedVectorTransform;

    #[async_trait]
    impl Transform for FixedVectorTransform {
        async fn run(
            &self,
            document: &Document,
            _params: &serde_json::Map<String, Value>,
        ) -> Result<Vec<OutputItem>> {
            Ok(vec![OutputItem::Positional(vec![
                json!([0.5, 0.5, 0.5, 0.5]),
                json!(document.content.clone()),
            ])])
        }
    }

    struct FailingTransform;

    #[async_trait]
    impl Transform for FailingTransform {
        async fn run(
            &self,
            _document: &Document,
            _params: &serde_json::Map<String, Value>,
        ) -> Result<Vec<OutputItem>> {
            Err(crate::error::Error::configuration("boom"))
        }
    }

    fn definition() -> IndexDefinition {
        let mut index_fields = BTreeMap::new();
        index_fields.insert(
            "embedding".to_string(),
            FieldSpec::embedding(4, DistanceMetric::Cosine),
        );
        index_fields.insert("text".to_string(), FieldSpec::scalar(FieldKind::Text));
        IndexDefinition {
            id: Uuid::new_v4(),
            description: String::new(),
            index_fields,
        }
    }

    fn payload(task_name: &str, index_id: Uuid, content: &str) -> TaskPayload {
        let mut params = serde_json::Map::new();
        params.insert(
            OUTPUT_FIELDS_PARAM.to_string(),
            json!(["embedding", "text"]),
        );
        TaskPayload {
            task_name: task_name.to_string(),
            document: Document::new(Uuid::new_v4(), content, serde_json::Map::new()),
            params,
            index_id,
            binding_id: None,
        }
    }

    async fn fixture() -> (LocalQueue, IndexTable, tempfile::TempDir) {
        let temp = tempfile::tempdir().expect("tempdir");
        let uri = temp.path().to_str().expect("path utf8").to_string();
        let catalog = Arc::new(Catalog::in_memory().await.expect("catalog"));

        let definition = definition();
        catalog.upsert_index(&definition).await.expect("upsert");

        let connection = lancedb::connect(&uri).execute().await.expect("connect");
        let layout = Arc::new(RecordLayout::from_definition(&definition).expect("layout"));
        let (table, _) = IndexTable::create_if_missing(&connection, layout)
            .await
            .expect("create table");

        let mut transforms = TransformRegistry::new();
        transforms.register("transform_fixed", Arc::new(FixedVectorTransform));
        transforms.register("transform_broken", Arc::new(FailingTransform));

        let cache = Arc::new(LayoutCache::new(catalog));
        let queue = LocalQueue::start(2, Arc::new(transforms), cache, &uri);
        (queue, table, temp)
    }

    #[tokio::test]
    async fn dispatched_tasks_complete_and_write_rows() {
        let (queue, table, _temp) = fixture().await;
        let index_id = table.layout().index_id;

        let first = queue
            .dispatch(payload("transform_fixed", index_id, "one"), TaskPriority::Transform)
            .await
            .expect("dispatch");
        let second = queue
            .dispatch(payload("transform_fixed", index_id, "two"), TaskPriority::Transform)
            .await
            .expect("dispatch");

        queue.drain().await;

        assert_eq!(
            queue.task_status(first.id),
            Some(TaskStatus::Completed { records: 1 })
        );
        assert_eq!(
            queue.task_status(second.id),
            Some(TaskStatus::Completed { records: 1 })
        );
        assert_eq!(table.count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn failures_are_recorded_without_killing_the_worker() {
        let (queue, table, _temp) = fixture().await;
        let index_id = table.layout().index_id;

        let broken = queue
            .dispatch(payload("transform_broken", index_id, "x"), TaskPriority::Transform)
            .await
            .expect("dispatch");
        let unknown = queue
            .dispatch(payload("transform_missing", index_id, "y"), TaskPriority::Transform)
            .await
            .expect("dispatch");
        let healthy = queue
            .dispatch(payload("transform_fixed", index_id, "z"), TaskPriority::Transform)
            .await
            .expect("dispatch");

        queue.drain().await;

        assert!(matches!(
            queue.task_status(broken.id),
            Some(TaskStatus::Failed { .. })
        ));
        assert!(matches!(
            queue.task_status(unknown.id),
            Some(TaskStatus::Failed { .. })
        ));
        assert_eq!(
            queue.task_status(healthy.id),
            Some(TaskStatus::Completed { records: 1 })
        );
        assert_eq!(table.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn maintenance_band_yields_to_transform_band() {
        let (queue, table, _temp) = fixture().await;
        let index_id = table.layout().index_id;

        // Both bands accept work and everything eventually completes.
        let maintenance = queue
            .dispatch(
                payload("transform_fixed", index_id, "background"),
                TaskPriority::Maintenance,
            )
            .await
            .expect("dispatch");
        let transform = queue
            .dispatch(
                payload("transform_fixed", index_id, "interactive"),
                TaskPriority::Transform,
            )
            .await
            .expect("dispatch");

        queue.drain().await;

        assert!(matches!(
            queue.task_status(maintenance.id),
            Some(TaskStatus::Completed { .. })
        ));
        assert!(matches!(
            queue.task_status(transform.id),
            Some(TaskStatus::Completed { .. })
        ));
    }
}
