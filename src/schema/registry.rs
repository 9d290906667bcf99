//! The schema registry: index definitions in, live tables out.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::model::IndexDefinition;
use crate::schema::layout::RecordLayout;
use crate::schema::table::IndexTable;
use crate::task::sync::WorkerSync;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Maps index ids to live backing tables and their runtime layouts.
///
/// Layouts are a process-local snapshot; other processes keep their own and
/// refresh from the catalog. There is no distributed lock around creation,
/// which is why physical creation is create-if-not-exists.
pub struct SchemaRegistry {
    connection: lancedb::Connection,
    catalog: Arc<Catalog>,
    layouts: RwLock<HashMap<Uuid, Arc<RecordLayout>>>,
    sync: Option<Arc<WorkerSync>>,
}

impl SchemaRegistry {
    pub fn new(connection: lancedb::Connection, catalog: Arc<Catalog>) -> Self {
        Self {
            connection,
            catalog,
            layouts: RwLock::new(HashMap::new()),
            sync: None,
        }
    }

    /// Attach a worker synchronizer; newly materialized tables trigger a
    /// best-effort reload broadcast through it.
    pub fn with_sync(mut self, sync: Arc<WorkerSync>) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Look up an index definition in the catalog.
    pub async fn get_index(&self, id: Uuid) -> Result<IndexDefinition> {
        self.catalog.get_index(id).await
    }

    /// Cached runtime layout for an index, if this process has seen it.
    pub async fn layout(&self, id: Uuid) -> Option<Arc<RecordLayout>> {
        self.layouts.read().await.get(&id).cloned()
    }

    /// Ensure the backing table for an index exists and return its layout.
    ///
    /// Idempotent: if the physical table already exists this is a no-op
    /// returning the existing layout, and no ANN index is rebuilt. Only on
    /// first physical creation are the ANN index builds scheduled, one per
    /// embedding column, as a deferred step.
    pub async fn create_table(&self, definition: &IndexDefinition) -> Result<Arc<RecordLayout>> {
        let layout = Arc::new(RecordLayout::from_definition(definition)?);

        let (table, created) =
            IndexTable::create_if_missing(&self.connection, layout.clone()).await?;

        self.layouts
            .write()
            .await
            .insert(definition.id, layout.clone());

        if created {
            tracing::info!(
                index_id = %definition.id,
                table = %layout.table_name,
                fields = layout.fields.len(),
                "index table materialized"
            );

            // ANN construction can take a while on a populated table; run it
            // off the orchestration path.
            let deferred = table.clone();
            tokio::spawn(async move {
                match deferred.create_ann_indexes().await {
                    Ok(built) => {
                        tracing::debug!(
                            table = %deferred.layout().table_name,
                            built,
                            "deferred ann index build finished"
                        );
                    }
                    Err(error) => {
                        tracing::warn!(
                            table = %deferred.layout().table_name,
                            %error,
                            "deferred ann index build failed"
                        );
                    }
                }
            });

            if let Some(sync) = &self.sync {
                sync.broadcast().await;
            }
        }

        Ok(layout)
    }

    /// Drop an index's backing table.
    ///
    /// Returns false, without failing, when this process has no layout for
    /// the index or the table does not physically exist.
    pub async fn drop_table(&self, id: Uuid) -> Result<bool> {
        let layout = { self.layouts.read().await.get(&id).cloned() };
        let Some(layout) = layout else {
            tracing::warn!(index_id = %id, "drop requested for unknown index layout");
            return Ok(false);
        };

        if !self.table_exists(&layout.table_name).await? {
            tracing::warn!(
                index_id = %id,
                table = %layout.table_name,
                "drop requested but table does not exist"
            );
            self.layouts.write().await.remove(&id);
            return Ok(false);
        }

        self.connection
            .drop_table(&layout.table_name, &[])
            .await
            .map_err(|e| crate::error::SchemaError::Backend(e.to_string()))?;
        self.layouts.write().await.remove(&id);

        tracing::info!(index_id = %id, table = %layout.table_name, "index table dropped");
        Ok(true)
    }

    /// Whether a table physically exists, by backend introspection alone.
    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| crate::error::SchemaError::Backend(e.to_string()))?;
        Ok(names.iter().any(|existing| existing == name))
    }
}
