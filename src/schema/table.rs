//! LanceDB table access for one index: creation, row inserts, ANN indexes.

use crate::error::{Error, Result, SchemaError};
use crate::model::{DistanceMetric, FieldKind, IndexRecord};
use crate::schema::layout::{FieldDescriptor, RecordLayout};
use arrow_array::types::Float32Type;
use arrow_array::{ArrayRef, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use serde_json::Value;
use std::sync::Arc;

/// A live index table bound to its runtime layout.
pub struct IndexTable {
    table: lancedb::Table,
    layout: Arc<RecordLayout>,
}

impl Clone for IndexTable {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            layout: self.layout.clone(),
        }
    }
}

impl IndexTable {
    /// Open the physical table for a layout.
    ///
    /// A table missing on this connection surfaces as the structured
    /// [`SchemaError::MissingRelation`] so callers can distinguish the
    /// visibility race from other backend failures.
    pub async fn open(connection: &lancedb::Connection, layout: Arc<RecordLayout>) -> Result<Self> {
        let table = connection
            .open_table(&layout.table_name)
            .execute()
            .await
            .map_err(map_backend_error)?;
        Ok(Self { table, layout })
    }

    /// Open the table, creating it if it does not exist yet.
    ///
    /// Returns the table and whether this call physically created it.
    /// Creation races resolve by reopening: a concurrent creator winning
    /// the race is success here, never an error.
    pub async fn create_if_missing(
        connection: &lancedb::Connection,
        layout: Arc<RecordLayout>,
    ) -> Result<(Self, bool)> {
        match connection.open_table(&layout.table_name).execute().await {
            Ok(table) => return Ok((Self { table, layout }, false)),
            Err(lancedb::Error::TableNotFound { .. }) => {}
            Err(error) => return Err(map_backend_error(error)),
        }

        let schema = layout.arrow_schema();
        let batches = RecordBatchIterator::new(vec![].into_iter().map(Ok), Arc::new(schema));
        match connection
            .create_table(&layout.table_name, Box::new(batches))
            .execute()
            .await
        {
            Ok(table) => Ok((Self { table, layout }, true)),
            Err(lancedb::Error::TableAlreadyExists { .. }) => {
                // Lost the creation race; the other creator's table wins.
                let table = connection
                    .open_table(&layout.table_name)
                    .execute()
                    .await
                    .map_err(map_backend_error)?;
                Ok((Self { table, layout }, false))
            }
            Err(error) => Err(map_backend_error(error)),
        }
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Append index records, converting each value to its column type.
    ///
    /// Numeric-array values on embedding columns become fixed-size float
    /// vectors; json values are stored serialized.
    pub async fn insert(&self, records: &[IndexRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let schema = Arc::new(self.layout.arrow_schema());

        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.record_id.clone()),
            )),
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.document_id.to_string()),
            )),
            Arc::new(StringArray::from(
                records
                    .iter()
                    .map(|r| r.binding_id.map(|id| id.to_string()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.task_id.to_string()),
            )),
            Arc::new(StringArray::from(
                records
                    .iter()
                    .map(|r| match &r.metadata {
                        Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.created_at.to_rfc3339()),
            )),
        ];

        for field in &self.layout.fields {
            columns.push(build_field_column(field, records)?);
        }

        let batch = RecordBatch::try_new(schema.clone(), columns)
            .map_err(|e| SchemaError::Arrow(e.to_string()))?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(map_backend_error)?;

        Ok(())
    }

    /// Build one ANN index per embedding column.
    ///
    /// Runs as a deferred step after first physical creation. Ignores
    /// "already exists" style errors so a replayed build stays harmless.
    /// Returns the number of indexes built by this call.
    pub async fn create_ann_indexes(&self) -> Result<usize> {
        use lancedb::index::Index;
        use lancedb::index::vector::IvfHnswSqIndexBuilder;

        let mut built = 0;
        for field in self.layout.embedding_fields() {
            let metric = field
                .embedding
                .map(|spec| spec.distance_metric)
                .unwrap_or_default();
            let builder = IvfHnswSqIndexBuilder::default().distance_type(distance_type(metric));

            match self
                .table
                .create_index(&[field.name.as_str()], Index::IvfHnswSq(builder))
                .execute()
                .await
            {
                Ok(()) => {
                    tracing::debug!(
                        table = %self.layout.table_name,
                        column = %field.name,
                        metric = ?metric,
                        "ann index created"
                    );
                    built += 1;
                }
                Err(error) => {
                    let message = error.to_string();
                    if message.contains("already") {
                        tracing::trace!(
                            table = %self.layout.table_name,
                            column = %field.name,
                            "ann index already exists"
                        );
                    } else {
                        return Err(SchemaError::Backend(format!(
                            "failed to create ann index on '{}': {message}",
                            field.name
                        ))
                        .into());
                    }
                }
            }
        }

        Ok(built)
    }

    /// Count all rows in the table.
    pub async fn count(&self) -> Result<usize> {
        use lancedb::query::{ExecutableQuery, QueryBase};

        let results: Vec<RecordBatch> = self
            .table
            .query()
            .select(lancedb::query::Select::columns(&["record_id"]))
            .execute()
            .await
            .map_err(map_backend_error)?
            .try_collect()
            .await
            .map_err(map_backend_error)?;

        Ok(results.iter().map(|b| b.num_rows()).sum())
    }
}

/// Map a backend error, keeping "table not visible" structured.
fn map_backend_error(error: lancedb::Error) -> Error {
    match error {
        lancedb::Error::TableNotFound { name, .. } => {
            SchemaError::MissingRelation { table: name }.into()
        }
        other => SchemaError::Backend(other.to_string()).into(),
    }
}

fn distance_type(metric: DistanceMetric) -> lancedb::DistanceType {
    match metric {
        DistanceMetric::Cosine => lancedb::DistanceType::Cosine,
        DistanceMetric::L2 => lancedb::DistanceType::L2,
        DistanceMetric::Dot => lancedb::DistanceType::Dot,
    }
}

/// Convert one declared field across all records into an Arrow column.
fn build_field_column(field: &FieldDescriptor, records: &[IndexRecord]) -> Result<ArrayRef> {
    let values: Vec<Option<&Value>> = records
        .iter()
        .map(|record| {
            record
                .values
                .get(&field.name)
                .filter(|value| !value.is_null())
        })
        .collect();

    if !field.nullable {
        if let Some(position) = values.iter().position(Option::is_none) {
            return Err(Error::configuration(format!(
                "record {} is missing required field '{}'",
                records[position].record_id, field.name
            )));
        }
    }

    let array: ArrayRef = match field.kind {
        FieldKind::Integer => {
            let items = extract(&values, field, "integer", Value::as_i64)?;
            Arc::new(arrow_array::Int64Array::from(items))
        }
        FieldKind::Float => {
            let items = extract(&values, field, "float", Value::as_f64)?;
            Arc::new(arrow_array::Float64Array::from(items))
        }
        FieldKind::Boolean => {
            let items = extract(&values, field, "boolean", Value::as_bool)?;
            Arc::new(arrow_array::BooleanArray::from(items))
        }
        FieldKind::Text => {
            let items = extract(&values, field, "string", |v| {
                v.as_str().map(str::to_string)
            })?;
            Arc::new(StringArray::from(items))
        }
        FieldKind::Json => {
            let items: Vec<Option<String>> = values
                .iter()
                .map(|value| value.map(|v| v.to_string()))
                .collect();
            Arc::new(StringArray::from(items))
        }
        FieldKind::Embedding => {
            let dims = field.embedding.map(|spec| spec.dims).unwrap_or_default();
            let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(values.len());
            for value in &values {
                match value {
                    None => vectors.push(None),
                    Some(value) => {
                        let vector = numeric_array(value).ok_or_else(|| SchemaError::FieldType {
                            field: field.name.clone(),
                            expected: "numeric array",
                        })?;
                        if vector.len() != dims as usize {
                            return Err(SchemaError::DimensionMismatch {
                                field: field.name.clone(),
                                expected: dims,
                                actual: vector.len(),
                            }
                            .into());
                        }
                        vectors.push(Some(vector.into_iter().map(Some).collect()));
                    }
                }
            }
            Arc::new(
                arrow_array::FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
                    vectors, dims,
                ),
            )
        }
    };

    Ok(array)
}

fn extract<T>(
    values: &[Option<&Value>],
    field: &FieldDescriptor,
    expected: &'static str,
    accessor: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<Option<T>>> {
    values
        .iter()
        .map(|value| match value {
            None => Ok(None),
            Some(value) => accessor(value).map(Some).ok_or_else(|| {
                Error::from(SchemaError::FieldType {
                    field: field.name.clone(),
                    expected,
                })
            }),
        })
        .collect()
}

/// Interpret a json value as a float vector.
fn numeric_array(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_f64().map(|f| f as f32))
        .collect()
}
