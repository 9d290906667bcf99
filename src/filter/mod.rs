//! Declarative document filtering.
//!
//! A [`Filter`] is a single level of AND/OR over flat [`Condition`]s.
//! Conditions are validated at construction; evaluation is stateless and
//! independent of storage.

pub mod condition;
pub mod engine;

pub use condition::{Combination, Condition, Filter, Operation};
pub use engine::{apply, document_meets, filter_documents, resolve_field};
