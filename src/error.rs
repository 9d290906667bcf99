//! Crate-wide error types.
//!
//! Sub-enums group failures by subsystem; the top-level [`Error`] wraps them
//! transparently so call sites can use `?` with `crate::error::Result`.

/// Errors raised while validating or evaluating filter conditions.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// The condition's comparison value does not fit its operator.
    #[error(
        "invalid condition on field '{field}': operator '{operation}' does not accept value {value}"
    )]
    Validation {
        field: String,
        operation: String,
        value: serde_json::Value,
    },
}

/// Errors from the schema registry and its backing index tables.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The destination table is not visible on the current connection.
    ///
    /// Distinct from a genuine absence: a table created by another process
    /// may not yet be visible here. Callers retry once on a fresh
    /// connection before treating this as fatal.
    #[error("relation '{table}' is not visible on this connection")]
    MissingRelation { table: String },

    /// A field value did not match the column type declared in the layout.
    #[error("field '{field}' expected a {expected} value")]
    FieldType {
        field: String,
        expected: &'static str,
    },

    /// An embedding value had the wrong number of dimensions.
    #[error("field '{field}' expected {expected} dimensions, got {actual}")]
    DimensionMismatch {
        field: String,
        expected: i32,
        actual: usize,
    },

    #[error("lancedb: {0}")]
    Backend(String),

    #[error("arrow: {0}")]
    Arrow(String),
}

/// Errors from worker schema-reload broadcasts.
///
/// These never roll back the schema mutation that triggered the broadcast;
/// workers self-heal through the cache-miss refresh path.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("schema reload broadcast to worker '{worker}' timed out after {timeout_seconds}s")]
    BroadcastTimeout { worker: String, timeout_seconds: u64 },

    #[error("worker '{worker}' rejected schema reload: {reason}")]
    WorkerRejected { worker: String, reason: String },

    #[error("no worker registered under id '{0}'")]
    UnknownWorker(String),
}

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A binding or index is misconfigured. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A referenced entity does not exist in the catalog.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("catalog: {0}")]
    Catalog(#[from] sqlx::Error),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether this error is the transient schema-visibility race.
    pub fn is_missing_relation(&self) -> bool {
        matches!(self, Error::Schema(SchemaError::MissingRelation { .. }))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
