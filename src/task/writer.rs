//! Completion-time index writes and the worker-local layout cache.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::model::IndexRecord;
use crate::schema::layout::RecordLayout;
use crate::schema::table::IndexTable;
use crate::task::sync::{ReloadSignal, ReloadTransport};
use crate::task::{TaskId, TaskPayload};
use crate::transform::{OutputItem, output_fields};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Worker-local snapshot of index layouts, refreshed from the catalog.
///
/// The generation counter makes refreshes observable; reload broadcasts
/// only ask for a refresh earlier than the next cache miss would.
pub struct LayoutCache {
    catalog: Arc<Catalog>,
    snapshot: ArcSwap<HashMap<Uuid, Arc<RecordLayout>>>,
    generation: AtomicU64,
}

impl LayoutCache {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            snapshot: ArcSwap::from_pointee(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn get(&self, index_id: Uuid) -> Option<Arc<RecordLayout>> {
        self.snapshot.load().get(&index_id).cloned()
    }

    /// Rebuild the snapshot from the catalog.
    ///
    /// Definitions that no longer synthesize a valid layout are skipped
    /// with a warning rather than poisoning the whole snapshot.
    pub async fn refresh(&self) -> Result<()> {
        let definitions = self.catalog.list_indexes().await?;
        let mut layouts = HashMap::with_capacity(definitions.len());
        for definition in &definitions {
            match RecordLayout::from_definition(definition) {
                Ok(layout) => {
                    layouts.insert(definition.id, Arc::new(layout));
                }
                Err(error) => {
                    tracing::warn!(index_id = %definition.id, %error, "skipping invalid index definition");
                }
            }
        }

        self.snapshot.store(Arc::new(layouts));
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Resolve a layout, refreshing the snapshot once on a miss.
    ///
    /// An index created after this worker's last refresh is found by the
    /// rebuild; an index genuinely absent from the catalog is NotFound.
    pub async fn resolve(&self, index_id: Uuid) -> Result<Arc<RecordLayout>> {
        if let Some(layout) = self.get(index_id) {
            return Ok(layout);
        }

        tracing::debug!(index_id = %index_id, "layout cache miss, refreshing from catalog");
        self.refresh().await?;

        self.get(index_id)
            .ok_or_else(|| Error::not_found("index layout", index_id))
    }
}

/// Reload transport that refreshes a layout cache in-process.
pub struct LayoutCacheReload {
    cache: Arc<LayoutCache>,
}

impl LayoutCacheReload {
    pub fn new(cache: Arc<LayoutCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ReloadTransport for LayoutCacheReload {
    async fn send(&self, signal: ReloadSignal) -> Result<()> {
        tracing::debug!(target = %signal.target, modules = ?signal.modules, "reload signal received");
        self.cache.refresh().await
    }
}

/// Routes completed transformer output into the destination index table.
///
/// One writer per worker slot: the storage connection is created lazily and
/// reused across that slot's tasks, never shared across concurrent tasks.
pub struct IndexWriter {
    db_uri: String,
    connection: tokio::sync::Mutex<Option<lancedb::Connection>>,
    cache: Arc<LayoutCache>,
}

impl IndexWriter {
    pub fn new(db_uri: impl Into<String>, cache: Arc<LayoutCache>) -> Self {
        Self {
            db_uri: db_uri.into(),
            connection: tokio::sync::Mutex::new(None),
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<LayoutCache> {
        &self.cache
    }

    async fn connection(&self) -> Result<lancedb::Connection> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }
        let connection = lancedb::connect(&self.db_uri)
            .execute()
            .await
            .map_err(|e| crate::error::SchemaError::Backend(e.to_string()))?;
        *slot = Some(connection.clone());
        Ok(connection)
    }

    /// Replace the cached connection, for the schema-visibility retry.
    async fn fresh_connection(&self) -> Result<lancedb::Connection> {
        let connection = lancedb::connect(&self.db_uri)
            .execute()
            .await
            .map_err(|e| crate::error::SchemaError::Backend(e.to_string()))?;
        *self.connection.lock().await = Some(connection.clone());
        Ok(connection)
    }

    /// Persist one task's output: one index row per output item.
    ///
    /// Rows are tagged with the document id, the source text, the
    /// dispatching task id, and the binding id when one triggered the
    /// dispatch. Returns the number of rows written.
    pub async fn persist(
        &self,
        task_id: TaskId,
        payload: &TaskPayload,
        items: Vec<OutputItem>,
    ) -> Result<usize> {
        let layout = self.cache.resolve(payload.index_id).await?;
        let fields = output_fields(&payload.params)?;

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let values = item.into_named(&fields)?;
            records.push(IndexRecord::new(
                payload.document.id,
                payload.binding_id,
                task_id,
                values,
                json!({"source_text": payload.document.content}),
            ));
        }

        let written = records.len();
        let connection = self.connection().await?;
        match self.write(&connection, &layout, &records).await {
            Ok(()) => Ok(written),
            Err(error) if error.is_missing_relation() => {
                // Visibility race: the table was created after this
                // connection's snapshot. One retry on a fresh connection,
                // then the failure is genuine.
                tracing::warn!(
                    table = %layout.table_name,
                    task_id = %task_id,
                    "destination table not visible, retrying once on a fresh connection"
                );
                let fresh = self.fresh_connection().await?;
                self.write(&fresh, &layout, &records).await?;
                Ok(written)
            }
            Err(error) => Err(error),
        }
    }

    async fn write(
        &self,
        connection: &lancedb::Connection,
        layout: &Arc<RecordLayout>,
        records: &[IndexRecord],
    ) -> Result<()> {
        let table = IndexTable::open(connection, layout.clone()).await?;
        table.insert(records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Document;
    use crate::model::{DistanceMetric, FieldKind, FieldSpec, IndexDefinition};
    use crate::transform::OUTPUT_FIELDS_PARAM;
    use std::collections::BTreeMap;

    fn definition(id: Uuid) -> IndexDefinition {
        let mut index_fields = BTreeMap::new();
        index_fields.insert(
            "embedding".to_string(),
            FieldSpec::embedding(4, DistanceMetric::Cosine),
        );
        index_fields.insert("text".to_string(), FieldSpec::scalar(FieldKind::Text));
        IndexDefinition {
            id,
            description: String::new(),
            index_fields,
        }
    }

    fn payload(index_id: Uuid) -> TaskPayload {
        let mut params = serde_json::Map::new();
        params.insert(
            OUTPUT_FIELDS_PARAM.to_string(),
            json!(["embedding", "text"]),
        );
        TaskPayload {
            task_name: "transform_test".to_string(),
            document: Document::new(Uuid::new_v4(), "source body", serde_json::Map::new()),
            params,
            index_id,
            binding_id: Some(Uuid::new_v4()),
        }
    }

    #[tokio::test]
    async fn cache_refreshes_once_on_miss() {
        let catalog = Arc::new(Catalog::in_memory().await.expect("catalog"));
        let cache = LayoutCache::new(catalog.clone());
        assert_eq!(cache.generation(), 0);

        // Definition lands after the cache was created.
        let definition = definition(Uuid::new_v4());
        catalog.upsert_index(&definition).await.expect("upsert");

        let layout = cache.resolve(definition.id).await.expect("resolve");
        assert_eq!(layout.table_name, definition.table_name());
        assert_eq!(cache.generation(), 1);

        // Second resolve hits the snapshot without another refresh.
        cache.resolve(definition.id).await.expect("resolve again");
        assert_eq!(cache.generation(), 1);
    }

    #[tokio::test]
    async fn unknown_index_fails_after_one_refresh() {
        let catalog = Arc::new(Catalog::in_memory().await.expect("catalog"));
        let cache = LayoutCache::new(catalog);

        let error = cache.resolve(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(error, Error::NotFound { .. }));
        assert_eq!(cache.generation(), 1);
    }

    #[tokio::test]
    async fn persist_writes_one_row_per_item() {
        let temp = tempfile::tempdir().expect("tempdir");
        let uri = temp.path().to_str().expect("path utf8").to_string();
        let catalog = Arc::new(Catalog::in_memory().await.expect("catalog"));

        let definition = definition(Uuid::new_v4());
        catalog.upsert_index(&definition).await.expect("upsert");

        let connection = lancedb::connect(&uri).execute().await.expect("connect");
        let layout = Arc::new(RecordLayout::from_definition(&definition).expect("layout"));
        let (table, _) = IndexTable::create_if_missing(&connection, layout)
            .await
            .expect("create table");

        let cache = Arc::new(LayoutCache::new(catalog));
        let writer = IndexWriter::new(&uri, cache);

        let task_id = Uuid::new_v4();
        let written = writer
            .persist(
                task_id,
                &payload(definition.id),
                vec![
                    OutputItem::Positional(vec![json!([0.1, 0.2, 0.3, 0.4]), json!("chunk one")]),
                    OutputItem::Positional(vec![json!([0.4, 0.3, 0.2, 0.1]), json!("chunk two")]),
                ],
            )
            .await
            .expect("persist");

        assert_eq!(written, 2);
        assert_eq!(table.count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn missing_relation_is_surfaced_after_single_retry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let uri = temp.path().to_str().expect("path utf8").to_string();
        let catalog = Arc::new(Catalog::in_memory().await.expect("catalog"));

        // Definition exists in the catalog but the table was never
        // materialized, so both write attempts see a missing relation.
        let definition = definition(Uuid::new_v4());
        catalog.upsert_index(&definition).await.expect("upsert");

        let cache = Arc::new(LayoutCache::new(catalog));
        let writer = IndexWriter::new(&uri, cache);

        let error = writer
            .persist(
                Uuid::new_v4(),
                &payload(definition.id),
                vec![OutputItem::Positional(vec![
                    json!([0.1, 0.2, 0.3, 0.4]),
                    json!("chunk"),
                ])],
            )
            .await
            .unwrap_err();

        assert!(error.is_missing_relation(), "got {error}");
    }
}
