//! The two-store knowledge base: record store plus derived vector index.
//!
//! Writes always go to the record store first and the vector index second,
//! for upserts and deletes alike. There is no transaction spanning both; a
//! crash in between leaves the index behind, and the next idempotent upsert
//! by id closes the gap. Document existence is only ever read from the
//! record store.
//!
//! Retrieval embeds the question, asks the index for the nearest ids,
//! hydrates them from the record store in neighbor order, filters them
//! through the caller's [`AccessPolicy`], and renders a length-bounded
//! context string.

use std::sync::Arc;

use crate::access::AccessPolicy;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::models::{Document, ItemToEmbed};
use crate::pipeline::{truncate_chars, EmbeddingPipeline};
use crate::records::RecordStore;
use crate::vector::VectorIndex;

/// Logical vector collection holding one entry per document.
pub const DOCUMENTS_COLLECTION: &str = "documents";

pub const TRUNCATION_MARKER: &str = " [Content truncated due to size limit.]";

#[derive(Clone)]
pub struct KnowledgeBase {
    records: RecordStore,
    pipeline: EmbeddingPipeline,
    similarity_floor: f32,
    context_documents: usize,
}

impl KnowledgeBase {
    pub fn new(
        records: RecordStore,
        pipeline: EmbeddingPipeline,
        similarity_floor: f32,
        context_documents: usize,
    ) -> Self {
        Self {
            records,
            pipeline,
            similarity_floor,
            context_documents,
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        self.pipeline.index()
    }

    fn embedder(&self) -> &Arc<dyn Embedder> {
        self.pipeline.embedder()
    }

    /// Persist one container's documents, then embed and index them.
    pub async fn upsert_documents(&self, container_key: &str, docs: &[Document]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        self.records.upsert_documents(container_key, docs).await?;
        self.pipeline
            .import_items(docs, DOCUMENTS_COLLECTION, |doc| ItemToEmbed {
                item_id: doc.id.clone(),
                content: doc.format_for_llm(),
            })
            .await?;
        Ok(())
    }

    pub async fn delete_documents(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let removed = self.records.delete_documents(ids).await?;
        self.index().delete(DOCUMENTS_COLLECTION, ids).await?;
        tracing::info!(requested = ids.len(), removed, "deleted documents");
        Ok(())
    }

    /// Remove a container, its documents, and their vector entries.
    pub async fn delete_container(&self, key: &str) -> Result<()> {
        let ids = self.records.delete_container(key).await?;
        self.index().delete(DOCUMENTS_COLLECTION, &ids).await?;
        tracing::info!(container = key, documents = ids.len(), "deleted container");
        Ok(())
    }

    /// Documents nearest to `query`, most relevant first. Ids the index
    /// returns but the record store no longer holds are dropped.
    pub async fn retrieve_relevant(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        let vector = self.embedder().embed(query).await?;
        let ids = self
            .index()
            .retrieve_neighbor_ids(DOCUMENTS_COLLECTION, &vector, k, self.similarity_floor)
            .await?;
        self.records.find_many_by_ids(&ids).await
    }

    /// Context for answering `question`, built from the documents the
    /// policy lets the principal see.
    pub async fn query(
        &self,
        question: &str,
        policy: &dyn AccessPolicy,
        context_budget: usize,
    ) -> Result<String> {
        let candidates = self
            .retrieve_relevant(question, self.context_documents)
            .await?;
        let ids: Vec<String> = candidates.iter().map(|d| d.id.clone()).collect();
        let allowed = policy.accessible_ids(&ids).await?;

        let visible: Vec<Document> = candidates
            .into_iter()
            .filter(|d| allowed.contains(&d.id))
            .collect();

        tracing::debug!(
            candidates = ids.len(),
            visible = visible.len(),
            "filtered retrieval candidates"
        );
        Ok(build_context(&visible, context_budget))
    }
}

fn context_entry(doc: &Document) -> String {
    format!(
        "Document Title: {}\nContainer Key: {}\n\n{}",
        doc.title,
        doc.container_key,
        doc.format_for_llm()
    )
}

/// Join document entries with newlines in the given order. Once the next
/// entry would push the length past `budget` characters, it is cut so that
/// it plus [`TRUNCATION_MARKER`] fill the remaining space; later documents
/// are dropped. When not even the marker fits, the context ends without it.
/// The result never exceeds `budget` characters.
pub fn build_context(docs: &[Document], budget: usize) -> String {
    let marker_len = TRUNCATION_MARKER.chars().count();
    let mut context = String::new();
    let mut used = 0;

    for (i, doc) in docs.iter().enumerate() {
        let separator = if i == 0 { "" } else { "\n" };
        let entry = format!("{separator}{}", context_entry(doc));
        let len = entry.chars().count();

        if used + len > budget {
            let room = budget - used;
            if room >= marker_len {
                context.push_str(&truncate_chars(&entry, room - marker_len));
                context.push_str(TRUNCATION_MARKER);
            }
            break;
        }

        context.push_str(&entry);
        used += len;
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn context_lists_documents_in_order() {
        let docs = vec![
            testing::document("1", "ENG", "first body"),
            testing::document("2", "OPS", "second body"),
        ];
        let context = build_context(&docs, 30_000);

        let first = context.find("first body").unwrap();
        let second = context.find("second body").unwrap();
        assert!(first < second);
        assert!(context.starts_with("Document Title: Title 1\nContainer Key: ENG\n\n"));
        assert!(context.contains("\nDocument Title: Title 2\nContainer Key: OPS\n\n"));
        assert!(!context.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn context_is_cut_at_budget_with_marker() {
        let docs = vec![
            testing::document("1", "ENG", &"a".repeat(200)),
            testing::document("2", "ENG", &"b".repeat(200)),
        ];
        let full_first = context_entry(&docs[0]).chars().count();
        let budget = full_first + 50;

        let context = build_context(&docs, budget);

        assert!(context.ends_with(TRUNCATION_MARKER));
        assert_eq!(context.chars().count(), budget);
        let body = context.trim_end_matches(TRUNCATION_MARKER);
        assert!(body.contains(&"a".repeat(200)));
        assert!(!body.contains(&"b".repeat(200)));
    }

    #[test]
    fn context_never_exceeds_budget() {
        let docs = vec![testing::document("1", "ENG", &"a".repeat(500))];
        let marker_len = TRUNCATION_MARKER.chars().count();

        for budget in [0, 10, marker_len - 1, marker_len, 100] {
            let context = build_context(&docs, budget);
            assert!(
                context.chars().count() <= budget,
                "budget {budget}, got {}",
                context.chars().count()
            );
        }

        assert_eq!(build_context(&docs, 0), "");
        assert_eq!(build_context(&docs, marker_len), TRUNCATION_MARKER);
        let context = build_context(&docs, 100);
        assert!(context.ends_with(TRUNCATION_MARKER));
        assert_eq!(context.chars().count(), 100);
    }

    #[test]
    fn empty_document_list_gives_empty_context() {
        assert_eq!(build_context(&[], 100), "");
    }
}
