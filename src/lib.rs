//! bindery: declarative routing of documents into typed index tables.
//!
//! A *binding* links a collection of documents to an *index* (a named,
//! schema-defined destination with optional embedding columns) through a
//! pluggable *transformer*, gated by a filter predicate. The schema
//! registry materializes index tables lazily and idempotently in LanceDB;
//! the filter engine evaluates typed conditions against documents; the
//! orchestrator dispatches one asynchronous task per eligible document and
//! routes each result into the right table while keeping worker-local
//! schema caches consistent with the catalog.

pub mod binding;
pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod schema;
pub mod task;
pub mod transform;

pub use binding::{BindingOrchestrator, ContentResolver, DispatchManifest};
pub use catalog::Catalog;
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use filter::{Combination, Condition, Filter, Operation};
pub use model::{
    Binding, BindingStatus, Collection, DistanceMetric, Document, EmbeddingSpec, FieldKind,
    FieldSpec, IndexDefinition, IndexRecord, Transformer,
};
pub use pipeline::{Pipeline, initialize_pipeline};
pub use schema::{RecordLayout, SchemaRegistry};
pub use task::{
    LayoutCache, LocalQueue, TaskDispatch, TaskHandle, TaskPayload, TaskPriority, WorkerSync,
};
pub use transform::{Transform, TransformRegistry};
