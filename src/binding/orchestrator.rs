//! Drives bindings: precondition checks, document selection, and one
//! dispatched task per eligible document.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::filter::{document_meets, filter_documents};
use crate::model::{Binding, BindingStatus, Document, IndexDefinition, Transformer};
use crate::schema::SchemaRegistry;
use crate::task::{TaskDispatch, TaskId, TaskPayload, TaskPriority};
use crate::transform::OUTPUT_FIELDS_PARAM;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// One dispatched task and the document it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestEntry {
    pub task_id: TaskId,
    pub document_id: Uuid,
}

/// The `(task_id, document_id)` pairs produced by one orchestration call.
///
/// Empty is a valid outcome: a round that matched zero documents.
#[derive(Debug, Clone, Default)]
pub struct DispatchManifest {
    pub entries: Vec<ManifestEntry>,
}

impl DispatchManifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Refreshes externally-stored content locators before dispatch, so the
/// payload handed to the transformer is current.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn refresh(&self, document: &mut Document) -> Result<()>;
}

/// Resolver for documents whose content lives inline.
pub struct NoopContentResolver;

#[async_trait]
impl ContentResolver for NoopContentResolver {
    async fn refresh(&self, _document: &mut Document) -> Result<()> {
        Ok(())
    }
}

/// Orchestrates binding activation and per-document task dispatch.
pub struct BindingOrchestrator {
    catalog: Arc<Catalog>,
    registry: Arc<SchemaRegistry>,
    dispatcher: Arc<dyn TaskDispatch>,
    resolver: Arc<dyn ContentResolver>,
}

impl BindingOrchestrator {
    pub fn new(
        catalog: Arc<Catalog>,
        registry: Arc<SchemaRegistry>,
        dispatcher: Arc<dyn TaskDispatch>,
    ) -> Self {
        Self {
            catalog,
            registry,
            dispatcher,
            resolver: Arc::new(NoopContentResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Process a binding end to end.
    ///
    /// Validates the binding, selects eligible documents, dispatches one
    /// task per document, and flips the binding status to `on`. Callers
    /// flip `off` back to `on` themselves to trigger reprocessing.
    pub async fn process_binding(
        &self,
        mut binding: Binding,
        create_missing_index_table: bool,
    ) -> Result<(Binding, DispatchManifest)> {
        let transformer = self.catalog.get_transformer(binding.transformer_id).await?;
        if transformer.implementation.trim().is_empty() {
            return Err(Error::configuration(format!(
                "transformer {} has no resolvable implementation reference",
                transformer.id
            )));
        }

        let definition = self
            .resolve_destination(&binding, create_missing_index_table)
            .await?;
        self.ensure_output_fields(&mut binding, &definition).await?;

        let documents = self
            .catalog
            .documents_for_collection(binding.collection_id)
            .await?;
        let selected: Vec<Document> = match &binding.filter {
            Some(filter) => filter_documents(&documents, filter).cloned().collect(),
            None => documents,
        };

        tracing::debug!(
            binding_id = %binding.id,
            collection_id = %binding.collection_id,
            selected = selected.len(),
            "dispatching binding round"
        );

        let mut manifest = DispatchManifest::default();
        for document in selected {
            let entry = self
                .dispatch_document(&binding, &transformer, document)
                .await?;
            manifest.entries.push(entry);
        }

        // The round succeeded, zero matches included; activation is
        // idempotent for bindings already on.
        if binding.status != BindingStatus::On {
            binding.status = BindingStatus::On;
            self.catalog.update_binding(&binding).await?;
        }

        Ok((binding, manifest))
    }

    /// Route one new document through every active binding of its
    /// collection.
    pub async fn generate_tasks_for_document(
        &self,
        document: &Document,
    ) -> Result<DispatchManifest> {
        let bindings = self
            .catalog
            .bindings_for_collection(document.collection_id, BindingStatus::On)
            .await?;

        let mut manifest = DispatchManifest::default();
        for binding in bindings {
            if let Some(filter) = &binding.filter {
                if !document_meets(document, filter) {
                    continue;
                }
            }

            let transformer = self.catalog.get_transformer(binding.transformer_id).await?;
            let entry = self
                .dispatch_document(&binding, &transformer, document.clone())
                .await?;
            manifest.entries.push(entry);
        }

        Ok(manifest)
    }

    /// Check the binding's destination and materialize its table on demand.
    async fn resolve_destination(
        &self,
        binding: &Binding,
        create_missing_index_table: bool,
    ) -> Result<IndexDefinition> {
        let Some(index_id) = binding.index_id else {
            return Err(Error::configuration(format!(
                "binding {} has no destination index",
                binding.id
            )));
        };

        let definition = self.registry.get_index(index_id).await?;

        if !self.registry.table_exists(&definition.table_name()).await? {
            if !create_missing_index_table {
                return Err(Error::configuration(format!(
                    "index table '{}' for binding {} is not materialized",
                    definition.table_name(),
                    binding.id
                )));
            }
            self.registry.create_table(&definition).await?;
        }

        Ok(definition)
    }

    /// Activation step: make sure the transformer params name the
    /// destination's fields, auto-populating from the index definition.
    ///
    /// Kept separate from dispatch so the mutation is explicit and
    /// persisted, not a side effect buried in processing.
    async fn ensure_output_fields(
        &self,
        binding: &mut Binding,
        definition: &IndexDefinition,
    ) -> Result<()> {
        if binding.transformer_params.contains_key(OUTPUT_FIELDS_PARAM) {
            return Ok(());
        }

        let fields = definition.field_names();
        if fields.is_empty() {
            return Err(Error::configuration(format!(
                "binding {} has no output_fields and index {} declares no fields",
                binding.id, definition.id
            )));
        }

        tracing::debug!(
            binding_id = %binding.id,
            index_id = %definition.id,
            ?fields,
            "populating output_fields from index definition"
        );
        binding
            .transformer_params
            .insert(OUTPUT_FIELDS_PARAM.to_string(), json!(fields));
        self.catalog.update_binding(binding).await?;
        Ok(())
    }

    async fn dispatch_document(
        &self,
        binding: &Binding,
        transformer: &Transformer,
        mut document: Document,
    ) -> Result<ManifestEntry> {
        self.resolver.refresh(&mut document).await?;

        let document_id = document.id;
        let index_id = binding.index_id.ok_or_else(|| {
            Error::configuration(format!("binding {} has no destination index", binding.id))
        })?;

        let handle = self
            .dispatcher
            .dispatch(
                TaskPayload {
                    task_name: transformer.task_name(),
                    document,
                    params: binding.transformer_params.clone(),
                    index_id,
                    binding_id: Some(binding.id),
                },
                TaskPriority::Transform,
            )
            .await?;

        Ok(ManifestEntry {
            task_id: handle.id,
            document_id,
        })
    }
}
