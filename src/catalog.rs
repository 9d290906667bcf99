//! SQLite catalog: the persisted source of truth for collections,
//! documents, transformers, index definitions, and bindings.
//!
//! Worker-local schema caches refresh from here; reload broadcasts are only
//! a latency optimization on top.

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::model::{
    Binding, BindingStatus, Collection, Document, IndexDefinition, Transformer,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Connect to a catalog database and run the schema bootstrap.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new().connect(url).await?;
        let catalog = Self { pool };
        catalog.migrate().await?;
        Ok(catalog)
    }

    /// In-memory catalog for tests and embedded use.
    ///
    /// Pinned to a single connection: each SQLite `:memory:` connection is
    /// its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let catalog = Self { pool };
        catalog.migrate().await?;
        Ok(catalog)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS collections (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                config TEXT NOT NULL DEFAULT 'null',
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                collection_id TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transformers (
                id TEXT PRIMARY KEY,
                implementation TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT ''
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS indexes (
                id TEXT PRIMARY KEY,
                description TEXT NOT NULL DEFAULT '',
                index_fields TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS bindings (
                id TEXT PRIMARY KEY,
                collection_id TEXT NOT NULL,
                transformer_id TEXT NOT NULL,
                index_id TEXT,
                description TEXT NOT NULL DEFAULT '',
                execution_params TEXT NOT NULL DEFAULT '{}',
                transformer_params TEXT NOT NULL DEFAULT '{}',
                filter TEXT,
                status TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── collections ──────────────────────────────────────────────────

    pub async fn create_collection(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Collection> {
        let collection = Collection {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            config: Value::Null,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO collections (id, name, description, config, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(collection.id.to_string())
        .bind(&collection.name)
        .bind(&collection.description)
        .bind(collection.config.to_string())
        .bind(collection.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(collection)
    }

    /// Delete a collection along with its documents and bindings.
    pub async fn delete_collection(&self, id: Uuid) -> Result<()> {
        let id = id.to_string();
        sqlx::query("DELETE FROM bindings WHERE collection_id = ?1")
            .bind(&id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM documents WHERE collection_id = ?1")
            .bind(&id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM collections WHERE id = ?1")
            .bind(&id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── documents ────────────────────────────────────────────────────

    pub async fn insert_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            "INSERT INTO documents (id, collection_id, content, metadata, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(document.id.to_string())
        .bind(document.collection_id.to_string())
        .bind(&document.content)
        .bind(Value::Object(document.metadata.clone()).to_string())
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Document> {
        let row = sqlx::query(
            "SELECT id, collection_id, content, metadata, created_at, updated_at \
             FROM documents WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("document", id))?;

        document_from_row(&row)
    }

    /// Documents of a collection, in insertion order.
    pub async fn documents_for_collection(&self, collection_id: Uuid) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, collection_id, content, metadata, created_at, updated_at \
             FROM documents WHERE collection_id = ?1 ORDER BY created_at, id",
        )
        .bind(collection_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(document_from_row).collect()
    }

    // ── transformers ─────────────────────────────────────────────────

    pub async fn upsert_transformer(&self, transformer: &Transformer) -> Result<()> {
        sqlx::query(
            "INSERT INTO transformers (id, implementation, description) VALUES (?1, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET implementation = ?2, description = ?3",
        )
        .bind(transformer.id.to_string())
        .bind(&transformer.implementation)
        .bind(&transformer.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_transformer(&self, id: Uuid) -> Result<Transformer> {
        let row = sqlx::query_as::<_, (String, String, String)>(
            "SELECT id, implementation, description FROM transformers WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("transformer", id))?;

        Ok(Transformer {
            id: parse_uuid(&row.0)?,
            implementation: row.1,
            description: row.2,
        })
    }

    // ── index definitions ────────────────────────────────────────────

    pub async fn upsert_index(&self, definition: &IndexDefinition) -> Result<()> {
        let fields = serde_json::to_string(&definition.index_fields)
            .map_err(|e| Error::configuration(format!("unserializable index fields: {e}")))?;

        sqlx::query(
            "INSERT INTO indexes (id, description, index_fields) VALUES (?1, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET description = ?2, index_fields = ?3",
        )
        .bind(definition.id.to_string())
        .bind(&definition.description)
        .bind(fields)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_index(&self, id: Uuid) -> Result<IndexDefinition> {
        let row = sqlx::query_as::<_, (String, String, String)>(
            "SELECT id, description, index_fields FROM indexes WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("index", id))?;

        index_from_row(row)
    }

    pub async fn list_indexes(&self) -> Result<Vec<IndexDefinition>> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT id, description, index_fields FROM indexes ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(index_from_row).collect()
    }

    // ── bindings ─────────────────────────────────────────────────────

    pub async fn insert_binding(&self, binding: &Binding) -> Result<()> {
        sqlx::query(
            "INSERT INTO bindings (id, collection_id, transformer_id, index_id, description, \
             execution_params, transformer_params, filter, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(binding.id.to_string())
        .bind(binding.collection_id.to_string())
        .bind(binding.transformer_id.to_string())
        .bind(binding.index_id.map(|id| id.to_string()))
        .bind(&binding.description)
        .bind(Value::Object(binding.execution_params.clone()).to_string())
        .bind(Value::Object(binding.transformer_params.clone()).to_string())
        .bind(filter_to_column(binding.filter.as_ref())?)
        .bind(binding.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist a binding's mutable state: params, filter, and status.
    pub async fn update_binding(&self, binding: &Binding) -> Result<()> {
        sqlx::query(
            "UPDATE bindings SET transformer_params = ?2, execution_params = ?3, \
             filter = ?4, status = ?5, index_id = ?6 WHERE id = ?1",
        )
        .bind(binding.id.to_string())
        .bind(Value::Object(binding.transformer_params.clone()).to_string())
        .bind(Value::Object(binding.execution_params.clone()).to_string())
        .bind(filter_to_column(binding.filter.as_ref())?)
        .bind(binding.status.as_str())
        .bind(binding.index_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_binding(&self, id: Uuid) -> Result<Binding> {
        let row = sqlx::query(
            "SELECT id, collection_id, transformer_id, index_id, description, \
             execution_params, transformer_params, filter, status \
             FROM bindings WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("binding", id))?;

        binding_from_row(&row)
    }

    /// Bindings of a collection in the given status.
    pub async fn bindings_for_collection(
        &self,
        collection_id: Uuid,
        status: BindingStatus,
    ) -> Result<Vec<Binding>> {
        let rows = sqlx::query(
            "SELECT id, collection_id, transformer_id, index_id, description, \
             execution_params, transformer_params, filter, status \
             FROM bindings WHERE collection_id = ?1 AND status = ?2 ORDER BY id",
        )
        .bind(collection_id.to_string())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(binding_from_row).collect()
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| anyhow::anyhow!("corrupt uuid '{raw}': {e}").into())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| anyhow::anyhow!("corrupt timestamp '{raw}': {e}").into())
}

fn parse_object(raw: &str) -> Result<serde_json::Map<String, Value>> {
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) | Err(_) => Err(anyhow::anyhow!("corrupt json object column: {raw}").into()),
    }
}

fn filter_to_column(filter: Option<&Filter>) -> Result<Option<String>> {
    filter
        .map(|f| {
            serde_json::to_string(f)
                .map_err(|e| Error::configuration(format!("unserializable filter: {e}")))
        })
        .transpose()
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    Ok(Document {
        id: parse_uuid(&row.get::<String, _>(0))?,
        collection_id: parse_uuid(&row.get::<String, _>(1))?,
        content: row.get(2),
        metadata: parse_object(&row.get::<String, _>(3))?,
        created_at: parse_timestamp(&row.get::<String, _>(4))?,
        updated_at: parse_timestamp(&row.get::<String, _>(5))?,
    })
}

fn index_from_row(row: (String, String, String)) -> Result<IndexDefinition> {
    let index_fields = serde_json::from_str(&row.2)
        .map_err(|e| anyhow::anyhow!("corrupt index fields for {}: {e}", row.0))?;
    Ok(IndexDefinition {
        id: parse_uuid(&row.0)?,
        description: row.1,
        index_fields,
    })
}

fn binding_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Binding> {
    let filter = row
        .get::<Option<String>, _>(7)
        .map(|raw| {
            serde_json::from_str::<Filter>(&raw)
                .map_err(|e| Error::configuration(format!("corrupt stored filter: {e}")))
        })
        .transpose()?;

    Ok(Binding {
        id: parse_uuid(&row.get::<String, _>(0))?,
        collection_id: parse_uuid(&row.get::<String, _>(1))?,
        transformer_id: parse_uuid(&row.get::<String, _>(2))?,
        index_id: row
            .get::<Option<String>, _>(3)
            .map(|raw| parse_uuid(&raw))
            .transpose()?,
        description: row.get(4),
        execution_params: parse_object(&row.get::<String, _>(5))?,
        transformer_params: parse_object(&row.get::<String, _>(6))?,
        filter,
        status: BindingStatus::from_str(&row.get::<String, _>(8)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Condition, Operation};
    use crate::model::{FieldKind, FieldSpec};
    use serde_json::json;

    #[tokio::test]
    async fn documents_round_trip_in_insertion_order() {
        let catalog = Catalog::in_memory().await.expect("catalog");
        let collection = catalog
            .create_collection("papers", "research papers")
            .await
            .expect("collection");

        let mut metadata = serde_json::Map::new();
        metadata.insert("size".to_string(), json!(10000));
        let first = Document::new(collection.id, "first", metadata);
        let second = Document::new(collection.id, "second", serde_json::Map::new());

        catalog.insert_document(&first).await.expect("insert first");
        catalog
            .insert_document(&second)
            .await
            .expect("insert second");

        let documents = catalog
            .documents_for_collection(collection.id)
            .await
            .expect("list");
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].id, first.id);
        assert_eq!(documents[0].metadata["size"], json!(10000));
        assert_eq!(documents[1].content, "second");
    }

    #[tokio::test]
    async fn missing_lookups_are_not_found() {
        let catalog = Catalog::in_memory().await.expect("catalog");
        let error = catalog.get_index(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(error, Error::NotFound { kind: "index", .. }));

        let error = catalog.get_transformer(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(error, Error::NotFound { kind: "transformer", .. }));
    }

    #[tokio::test]
    async fn binding_round_trips_with_filter_and_status() {
        let catalog = Catalog::in_memory().await.expect("catalog");
        let collection = catalog.create_collection("c", "").await.expect("collection");

        let mut binding = Binding::new(collection.id, Uuid::new_v4(), Uuid::new_v4());
        binding.filter = Some(Filter::all(vec![
            Condition::new("meta.size", Operation::Lt, json!(30000)).unwrap(),
        ]));
        catalog.insert_binding(&binding).await.expect("insert");

        binding.status = BindingStatus::On;
        binding
            .transformer_params
            .insert("output_fields".to_string(), json!(["embedding", "text"]));
        catalog.update_binding(&binding).await.expect("update");

        let loaded = catalog.get_binding(binding.id).await.expect("get");
        assert_eq!(loaded.status, BindingStatus::On);
        assert_eq!(loaded.transformer_params["output_fields"], json!(["embedding", "text"]));
        let filter = loaded.filter.expect("filter");
        assert_eq!(filter.conditions.len(), 1);
        assert_eq!(filter.conditions[0].field, "meta.size");

        let active = catalog
            .bindings_for_collection(collection.id, BindingStatus::On)
            .await
            .expect("active bindings");
        assert_eq!(active.len(), 1);
        let pending = catalog
            .bindings_for_collection(collection.id, BindingStatus::Pending)
            .await
            .expect("pending bindings");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn deleting_a_collection_cascades() {
        let catalog = Catalog::in_memory().await.expect("catalog");
        let collection = catalog.create_collection("c", "").await.expect("collection");

        let document = Document::new(collection.id, "body", serde_json::Map::new());
        catalog.insert_document(&document).await.expect("document");
        let binding = Binding::new(collection.id, Uuid::new_v4(), Uuid::new_v4());
        catalog.insert_binding(&binding).await.expect("binding");

        catalog
            .delete_collection(collection.id)
            .await
            .expect("delete");

        assert!(catalog.get_document(document.id).await.is_err());
        assert!(catalog.get_binding(binding.id).await.is_err());
    }

    #[tokio::test]
    async fn index_definition_round_trips() {
        let catalog = Catalog::in_memory().await.expect("catalog");
        let definition = IndexDefinition {
            id: Uuid::new_v4(),
            description: "chunks".to_string(),
            index_fields: [
                (
                    "embedding".to_string(),
                    FieldSpec::embedding(384, crate::model::DistanceMetric::Cosine),
                ),
                ("text".to_string(), FieldSpec::scalar(FieldKind::Text)),
            ]
            .into_iter()
            .collect(),
        };

        catalog.upsert_index(&definition).await.expect("upsert");
        let loaded = catalog.get_index(definition.id).await.expect("get");
        assert_eq!(loaded.index_fields.len(), 2);
        assert_eq!(loaded.index_fields["text"].kind, FieldKind::Text);
        assert_eq!(loaded.table_name(), definition.table_name());

        assert_eq!(catalog.list_indexes().await.expect("list").len(), 1);
    }
}
