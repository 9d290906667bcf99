//! Dynamic index schema management.
//!
//! Translates stored [`IndexDefinition`](crate::model::IndexDefinition)s
//! into live LanceDB tables: typed scalar columns, serialized json columns,
//! and fixed-size float-vector embedding columns with deferred ANN index
//! construction. Creation is lazy and idempotent; concurrent creators
//! resolve to "already exists" rather than failing.

pub mod layout;
pub mod registry;
pub mod table;

pub use layout::{FieldDescriptor, RecordLayout};
pub use registry::SchemaRegistry;
pub use table::IndexTable;
