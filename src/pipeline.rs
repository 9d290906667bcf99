//! Pipeline assembly: wire the catalog, schema registry, local queue, and
//! orchestrator into a ready-to-dispatch unit.

use crate::binding::BindingOrchestrator;
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::schema::SchemaRegistry;
use crate::task::writer::{LayoutCache, LayoutCacheReload};
use crate::task::{LocalQueue, TaskDispatch, WorkerSync};
use crate::transform::TransformRegistry;
use std::sync::Arc;

/// A fully wired processing pipeline.
pub struct Pipeline {
    pub catalog: Arc<Catalog>,
    pub registry: Arc<SchemaRegistry>,
    pub queue: Arc<LocalQueue>,
    pub orchestrator: BindingOrchestrator,
}

/// Assemble a pipeline over one catalog and one LanceDB directory.
///
/// The local worker's layout cache is registered for reload broadcasts, so
/// newly materialized tables become visible to workers ahead of their next
/// cache miss.
pub async fn initialize_pipeline(
    config: &EngineConfig,
    catalog: Arc<Catalog>,
    db_uri: &str,
    transforms: Arc<TransformRegistry>,
) -> Result<Pipeline> {
    let connection = lancedb::connect(db_uri)
        .execute()
        .await
        .map_err(|e| crate::error::SchemaError::Backend(e.to_string()))?;

    let cache = Arc::new(LayoutCache::new(catalog.clone()));

    let sync = WorkerSync::new(config.reload_timeout_seconds, config.reload_modules.clone());
    sync.register("local", Arc::new(LayoutCacheReload::new(cache.clone())))
        .await;

    let registry = Arc::new(
        SchemaRegistry::new(connection, catalog.clone()).with_sync(Arc::new(sync)),
    );
    let queue = Arc::new(LocalQueue::start(
        config.worker_count,
        transforms,
        cache,
        db_uri,
    ));

    let dispatcher: Arc<dyn TaskDispatch> = queue.clone();
    let orchestrator = BindingOrchestrator::new(catalog.clone(), registry.clone(), dispatcher);

    Ok(Pipeline {
        catalog,
        registry,
        queue,
        orchestrator,
    })
}
