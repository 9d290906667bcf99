//! Binding orchestration: from "binding becomes active" to "index rows
//! populated".

pub mod orchestrator;

pub use orchestrator::{
    BindingOrchestrator, ContentResolver, DispatchManifest, ManifestEntry, NoopContentResolver,
};
