//! Built-in embedding transformer backed by fastembed.

use crate::error::{Error, Result};
use crate::model::Document;
use crate::transform::{OutputItem, Transform};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

/// Embedding model wrapper with thread-safe sharing.
///
/// fastembed's TextEmbedding is not Send, so we hold it behind an Arc and
/// use spawn_blocking to call into it from async contexts.
pub struct EmbeddingModel {
    model: Arc<fastembed::TextEmbedding>,
}

impl EmbeddingModel {
    /// Create a new embedding model, storing downloaded model files in `cache_dir`.
    ///
    /// Limits ONNX intra-op threads to avoid excessive memory usage on
    /// machines with many cores.
    pub fn new(cache_dir: &Path) -> Result<Self> {
        if std::env::var("OMP_NUM_THREADS").is_err() {
            // SAFETY: Called once during single-threaded init before any ONNX
            // threads are spawned.
            unsafe { std::env::set_var("OMP_NUM_THREADS", "2") };
        }

        let options = fastembed::InitOptions::default()
            .with_cache_dir(cache_dir.to_path_buf())
            .with_show_download_progress(false);

        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| Error::Embedding(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
        })
    }

    /// Generate embeddings for multiple texts (blocking).
    pub fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.model
            .embed(texts, None)
            .map_err(|e| Error::Embedding(e.to_string()))
    }

    /// Generate embedding for a single text (async, spawns blocking task).
    pub async fn embed_one(self: &Arc<Self>, text: &str) -> Result<Vec<f32>> {
        let text = text.to_string();
        let model = self.model.clone();
        let result = tokio::task::spawn_blocking(move || {
            model
                .embed(vec![text], None)
                .map_err(|e| Error::Embedding(e.to_string()))
        })
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("embedding task failed: {e}")))??;

        Ok(result.into_iter().next().unwrap_or_default())
    }
}

/// Transformer producing `(embedding, text)` per document.
///
/// Emits one positional item; the binding's `output_fields` list names the
/// destination columns.
pub struct EmbeddingTransform {
    model: Arc<EmbeddingModel>,
    /// Cap on characters embedded per document.
    max_chars: usize,
}

impl EmbeddingTransform {
    pub fn new(model: Arc<EmbeddingModel>, max_chars: usize) -> Self {
        Self { model, max_chars }
    }
}

#[async_trait]
impl Transform for EmbeddingTransform {
    async fn run(
        &self,
        document: &Document,
        _params: &serde_json::Map<String, Value>,
    ) -> Result<Vec<OutputItem>> {
        let text: String = document.content.chars().take(self.max_chars).collect();
        let embedding = self.model.embed_one(&text).await?;

        Ok(vec![OutputItem::Positional(vec![
            json!(embedding),
            json!(text),
        ])])
    }
}
