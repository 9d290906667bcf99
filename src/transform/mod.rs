//! Pluggable per-document computations.
//!
//! A [`Transform`] runs asynchronously against one document and returns
//! output items; the `output_fields` label list carried in the transformer
//! params turns positional results into named records.

pub mod embedding;

use crate::error::{Error, Result};
use crate::model::Document;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub use embedding::{EmbeddingModel, EmbeddingTransform};

/// Params key carrying the destination index's field-name list.
pub const OUTPUT_FIELDS_PARAM: &str = "output_fields";

/// One item of transformer output.
#[derive(Debug, Clone)]
pub enum OutputItem {
    /// Values in `output_fields` order. A scalar result is a one-element
    /// tuple.
    Positional(Vec<Value>),
    /// Values already keyed by field name.
    Named(serde_json::Map<String, Value>),
}

impl OutputItem {
    /// Resolve this item into named field values.
    pub fn into_named(
        self,
        output_fields: &[String],
    ) -> Result<serde_json::Map<String, Value>> {
        match self {
            OutputItem::Named(map) => Ok(map),
            OutputItem::Positional(values) => {
                if values.len() != output_fields.len() {
                    return Err(Error::configuration(format!(
                        "transformer produced {} values for {} output fields",
                        values.len(),
                        output_fields.len()
                    )));
                }
                Ok(output_fields
                    .iter()
                    .cloned()
                    .zip(values)
                    .collect())
            }
        }
    }
}

/// Extract the `output_fields` list from transformer params.
pub fn output_fields(params: &serde_json::Map<String, Value>) -> Result<Vec<String>> {
    let value = params.get(OUTPUT_FIELDS_PARAM).ok_or_else(|| {
        Error::configuration("transformer params carry no output_fields list")
    })?;
    let fields: Vec<String> = serde_json::from_value(value.clone())
        .map_err(|e| Error::configuration(format!("malformed output_fields: {e}")))?;
    if fields.is_empty() {
        return Err(Error::configuration("output_fields list is empty"));
    }
    Ok(fields)
}

/// An asynchronous per-document computation.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn run(
        &self,
        document: &Document,
        params: &serde_json::Map<String, Value>,
    ) -> Result<Vec<OutputItem>>;
}

/// Registered transforms, keyed by their derived task name.
#[derive(Default)]
pub struct TransformRegistry {
    by_task: HashMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_name: impl Into<String>, transform: Arc<dyn Transform>) {
        self.by_task.insert(task_name.into(), transform);
    }

    pub fn get(&self, task_name: &str) -> Option<Arc<dyn Transform>> {
        self.by_task.get(task_name).cloned()
    }
}
