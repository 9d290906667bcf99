//! Engine tunables.

/// Configuration for the dispatch and synchronization machinery.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker slots in the local queue.
    pub worker_count: usize,
    /// Timeout for schema-reload broadcasts.
    pub reload_timeout_seconds: u64,
    /// Registries named in reload broadcasts.
    pub reload_modules: Vec<String>,
    /// Cap on characters embedded per document by the built-in transformer.
    pub max_embed_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            reload_timeout_seconds: 5,
            reload_modules: vec!["schema".to_string(), "transformers".to_string()],
            max_embed_chars: 2000,
        }
    }
}
