//! Runtime record layouts synthesized from stored field metadata.
//!
//! Instead of generating types dynamically, each index maps to an explicit
//! ordered field-descriptor list; typed accessors exist only at the Arrow
//! serialization boundary in [`table`](crate::schema::table).

use crate::error::{Error, Result};
use crate::model::{EmbeddingSpec, FieldKind, IndexDefinition};
use std::sync::Arc;

/// Generated columns present in every index table, ahead of declared fields.
pub const GENERATED_COLUMNS: [&str; 6] = [
    "record_id",
    "document_id",
    "binding_id",
    "task_id",
    "metadata",
    "created_at",
];

/// One declared column of an index table.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    /// Dimensionality and metric, for embedding fields only.
    pub embedding: Option<EmbeddingSpec>,
}

/// Ordered, typed layout of one index table.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLayout {
    pub index_id: uuid::Uuid,
    pub table_name: String,
    /// Declared fields in column order.
    pub fields: Vec<FieldDescriptor>,
}

impl RecordLayout {
    /// Synthesize a layout from a stored index definition.
    ///
    /// Rejects definitions with no declared fields and embedding fields
    /// missing their dims/metric extras.
    pub fn from_definition(definition: &IndexDefinition) -> Result<Self> {
        if definition.index_fields.is_empty() {
            return Err(Error::configuration(format!(
                "index {} declares no fields",
                definition.id
            )));
        }

        let mut fields = Vec::with_capacity(definition.index_fields.len());
        for (name, spec) in &definition.index_fields {
            let embedding = match spec.kind {
                FieldKind::Embedding => {
                    let Some(extras) = spec.extras else {
                        return Err(Error::configuration(format!(
                            "embedding field '{name}' of index {} has no dims/metric extras",
                            definition.id
                        )));
                    };
                    if extras.dims <= 0 {
                        return Err(Error::configuration(format!(
                            "embedding field '{name}' of index {} has non-positive dims {}",
                            definition.id, extras.dims
                        )));
                    }
                    Some(extras)
                }
                _ => None,
            };

            fields.push(FieldDescriptor {
                name: name.clone(),
                kind: spec.kind,
                nullable: spec.optional,
                embedding,
            });
        }

        Ok(Self {
            index_id: definition.id,
            table_name: definition.table_name(),
            fields,
        })
    }

    /// Declared embedding fields, in column order.
    pub fn embedding_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .iter()
            .filter(|field| field.kind == FieldKind::Embedding)
    }

    /// Arrow schema for the backing table: generated columns first, then
    /// one column per declared field.
    pub fn arrow_schema(&self) -> arrow_schema::Schema {
        use arrow_schema::{DataType, Field};

        let mut columns = vec![
            Field::new("record_id", DataType::Utf8, false),
            Field::new("document_id", DataType::Utf8, false),
            Field::new("binding_id", DataType::Utf8, true),
            Field::new("task_id", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, true),
            Field::new("created_at", DataType::Utf8, false),
        ];

        for field in &self.fields {
            let data_type = match field.kind {
                FieldKind::Integer => DataType::Int64,
                FieldKind::Float => DataType::Float64,
                FieldKind::Boolean => DataType::Boolean,
                FieldKind::Text | FieldKind::Json => DataType::Utf8,
                FieldKind::Embedding => DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    field.embedding.map(|spec| spec.dims).unwrap_or_default(),
                ),
            };
            columns.push(Field::new(&field.name, data_type, field.nullable));
        }

        arrow_schema::Schema::new(columns)
    }
}
