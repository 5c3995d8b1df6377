//! Embedding pipeline: content-bearing items in, `(id, vector)` pairs out.
//!
//! Items are formatted, truncated to the model's character budget, and
//! embedded in fixed-size chunks. Chunks run strictly one after another
//! with a fixed sleep between them (never before the first); inside a chunk
//! a bounded pool of workers calls the embedder concurrently. Only after
//! every chunk has succeeded is the whole batch upserted into the vector
//! index in one call, so a failed batch leaves no partial writes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::EmbeddingConfig;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::ItemToEmbed;
use crate::vector::VectorIndex;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_chars: usize,
    pub chunk_size: usize,
    pub workers: usize,
    pub chunk_sleep: Duration,
}

impl From<&EmbeddingConfig> for PipelineSettings {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            max_chars: config.max_chars,
            chunk_size: config.chunk_size.max(1),
            workers: config.workers.max(1),
            chunk_sleep: config.chunk_sleep(),
        }
    }
}

#[derive(Clone)]
pub struct EmbeddingPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    settings: PipelineSettings,
}

impl EmbeddingPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            embedder,
            index,
            settings,
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Embed `items` and upsert them into `collection`. Returns the
    /// collection's item count after the upsert.
    pub async fn import_items<T, F>(
        &self,
        items: &[T],
        collection: &str,
        formatter: F,
    ) -> Result<usize>
    where
        F: Fn(&T) -> ItemToEmbed,
    {
        let prepared: Vec<ItemToEmbed> = items
            .iter()
            .map(|item| {
                let mut formatted = formatter(item);
                formatted.content = truncate_chars(&formatted.content, self.settings.max_chars);
                formatted
            })
            .collect();

        let total_chunks = prepared.len().div_ceil(self.settings.chunk_size);
        let mut embedded = Vec::with_capacity(prepared.len());

        for (n, chunk) in prepared.chunks(self.settings.chunk_size).enumerate() {
            if n > 0 {
                tracing::debug!(
                    seconds = self.settings.chunk_sleep.as_secs_f64(),
                    "sleeping between embedding chunks"
                );
                tokio::time::sleep(self.settings.chunk_sleep).await;
            }
            tracing::info!(
                collection,
                chunk = n + 1,
                total_chunks,
                items = chunk.len(),
                "embedding chunk"
            );
            embedded.extend(self.embed_chunk(chunk).await?);
        }

        let total = self.index.upsert(collection, &embedded).await?;
        tracing::info!(collection, upserted = embedded.len(), total, "vector import complete");
        Ok(total)
    }

    /// Embed one chunk across the worker pool, keeping input order.
    async fn embed_chunk(&self, chunk: &[ItemToEmbed]) -> Result<Vec<(String, Vec<f32>)>> {
        let permits = Arc::new(Semaphore::new(self.settings.workers));
        let mut tasks = JoinSet::new();

        for (position, item) in chunk.iter().cloned().enumerate() {
            let embedder = Arc::clone(&self.embedder);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| anyhow::anyhow!("embedding worker pool closed: {}", e))?;
                let vector = embedder.embed(&item.content).await?;
                if vector.is_empty() {
                    return Err(Error::EmptyEmbedding {
                        item_id: item.item_id,
                    });
                }
                Ok::<_, Error>((position, item.item_id, vector))
            });
        }

        let mut results: Vec<Option<(String, Vec<f32>)>> = vec![None; chunk.len()];
        while let Some(joined) = tasks.join_next().await {
            let (position, id, vector) =
                joined.map_err(|e| anyhow::anyhow!("embedding task failed: {}", e))??;
            results[position] = Some((id, vector));
        }

        Ok(results.into_iter().flatten().collect())
    }
}

/// First `max_chars` characters of `text`, never splitting a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
