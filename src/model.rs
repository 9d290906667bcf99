//! Core catalog entities: collections, documents, transformers, index
//! definitions, bindings, and index records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A named set of documents that bindings draw from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Free-form collection configuration.
    #[serde(default)]
    pub config: Value,
    pub created_at: DateTime<Utc>,
}

/// A single document inside a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub collection_id: Uuid,
    /// Full text content; may be empty for metadata-only documents.
    #[serde(default)]
    pub content: String,
    /// Arbitrary nested metadata bag, addressed by `meta.`-prefixed filter fields.
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Build a new document in a collection with the given content and metadata.
    pub fn new(
        collection_id: Uuid,
        content: impl Into<String>,
        metadata: serde_json::Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            collection_id,
            content: content.into(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A pluggable unit of computation, invoked asynchronously per document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transformer {
    pub id: Uuid,
    /// Implementation reference. Empty means unresolvable: bindings over
    /// this transformer fail activation.
    pub implementation: String,
    #[serde(default)]
    pub description: String,
}

impl Transformer {
    /// Queue task name, derived deterministically from the transformer id.
    pub fn task_name(&self) -> String {
        format!("transform_{}", self.id.simple())
    }
}

/// Storage kind of one index field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Float,
    Boolean,
    Text,
    /// Structured value stored as an opaque serialized blob.
    Json,
    /// Fixed-length float vector with an ANN index.
    Embedding,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Text => "text",
            FieldKind::Json => "json",
            FieldKind::Embedding => "embedding",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Distance metric for an embedding field's ANN index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
    L2,
    Dot,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Cosine
    }
}

/// Extra parameters carried by embedding fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSpec {
    pub dims: i32,
    #[serde(default)]
    pub distance_metric: DistanceMetric,
}

/// Declared shape of one index field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub optional: bool,
    /// Present only for embedding fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<EmbeddingSpec>,
}

impl FieldSpec {
    pub fn scalar(kind: FieldKind) -> Self {
        Self {
            kind,
            optional: false,
            extras: None,
        }
    }

    pub fn embedding(dims: i32, distance_metric: DistanceMetric) -> Self {
        Self {
            kind: FieldKind::Embedding,
            optional: false,
            extras: Some(EmbeddingSpec {
                dims,
                distance_metric,
            }),
        }
    }
}

/// Stored definition of an index: a named destination for transformer output.
///
/// The definition row exists before its backing table is materialized; the
/// schema registry turns it into a live table on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub id: Uuid,
    #[serde(default)]
    pub description: String,
    /// Declared fields, keyed by column name. Iteration order is the
    /// column order of the backing table.
    pub index_fields: BTreeMap<String, FieldSpec>,
}

impl IndexDefinition {
    /// Backing-table name, derived deterministically from the index id.
    pub fn table_name(&self) -> String {
        format!("index_{}", self.id.simple())
    }

    /// Declared field names in column order.
    pub fn field_names(&self) -> Vec<String> {
        self.index_fields.keys().cloned().collect()
    }
}

/// Lifecycle state of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingStatus {
    /// Declared but never processed.
    Pending,
    /// Actively routing new documents.
    On,
    /// Suspended; flipping back to on triggers reprocessing.
    Off,
    /// Disconnected from its index destination.
    Detached,
}

impl BindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingStatus::Pending => "pending",
            BindingStatus::On => "on",
            BindingStatus::Off => "off",
            BindingStatus::Detached => "detached",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "on" => BindingStatus::On,
            "off" => BindingStatus::Off,
            "detached" => BindingStatus::Detached,
            _ => BindingStatus::Pending,
        }
    }
}

impl std::fmt::Display for BindingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declarative link between a collection, a transformer, and an index,
/// gated by an optional filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub transformer_id: Uuid,
    pub index_id: Option<Uuid>,
    #[serde(default)]
    pub description: String,
    /// Execution-level parameters (batching, limits).
    #[serde(default)]
    pub execution_params: serde_json::Map<String, Value>,
    /// Parameters handed to the transformer, including the destination's
    /// `output_fields` list once the binding is activated.
    #[serde(default)]
    pub transformer_params: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<crate::filter::Filter>,
    pub status: BindingStatus,
}

impl Binding {
    pub fn new(collection_id: Uuid, transformer_id: Uuid, index_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            collection_id,
            transformer_id,
            index_id: Some(index_id),
            description: String::new(),
            execution_params: serde_json::Map::new(),
            transformer_params: serde_json::Map::new(),
            filter: None,
            status: BindingStatus::Pending,
        }
    }
}

/// One stored row of transformer output.
///
/// Created only by the task completion path, never synchronously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Row identity within the index table.
    pub record_id: String,
    pub document_id: Uuid,
    pub binding_id: Option<Uuid>,
    /// The task invocation that produced this row.
    pub task_id: Uuid,
    /// Computed field values, keyed by declared field name. Embedding
    /// values arrive as numeric arrays and are converted to their storage
    /// representation at insert time.
    pub values: serde_json::Map<String, Value>,
    /// Free-form metadata, including the source document text.
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl IndexRecord {
    pub fn new(
        document_id: Uuid,
        binding_id: Option<Uuid>,
        task_id: Uuid,
        values: serde_json::Map<String, Value>,
        metadata: Value,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            document_id,
            binding_id,
            task_id,
            values,
            metadata,
            created_at: Utc::now(),
        }
    }
}
