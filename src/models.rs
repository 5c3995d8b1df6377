//! Core data models used throughout Knowledge Harness.
//!
//! These types represent the containers, documents, and per-item source
//! outcomes that flow between the document source, the record store, and
//! the embedding pipeline.

use chrono::{DateTime, SecondsFormat, Utc};

/// One synchronized unit of content, keyed by its source-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub container_key: String,
    pub title: String,
    pub author: String,
    pub content: String,
    pub annotations: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

impl Document {
    /// Byte length of `content`. Always derived, never stored independently.
    pub fn content_length(&self) -> i64 {
        self.content.len() as i64
    }

    /// Text handed to the embedding model and to the answer context.
    pub fn format_for_llm(&self) -> String {
        let mut lines = vec![
            format!("Container Key: {}", self.container_key),
            format!("Document Id: {}", self.id),
            format!("Title: {}", self.title),
            format!("Author: {}", self.author),
            format!(
                "Created: {}",
                self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            format!(
                "Last Updated: {}",
                self.last_modified_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            format!("Content: {}", self.content),
        ];
        if !self.annotations.is_empty() {
            lines.push(format!("Comments: {}", self.annotations));
        }
        lines.join("\n")
    }
}

/// A logical grouping of documents, as persisted in the record store.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub last_import_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Current,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Current,
    Archived,
}

/// A container as reported by the document source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub key: String,
    pub name: String,
    pub status: ContainerStatus,
}

/// Outcome of fetching one document. Per-document denial is a value, not
/// an error, so a batch can carry both outcomes side by side.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Document(Document),
    Inaccessible { container_key: String, id: String },
}

/// Persisted backoff for one external service key.
#[derive(Debug, Clone, PartialEq)]
pub struct CooldownState {
    pub cooldown_seconds: f64,
    pub updated_at: DateTime<Utc>,
}

/// Input to the embedding pipeline after formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemToEmbed {
    pub item_id: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc() -> Document {
        Document {
            id: "42".into(),
            container_key: "ENG".into(),
            title: "Runbook".into(),
            author: "ops".into(),
            content: "héllo".into(),
            annotations: String::new(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            last_modified_at: Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap(),
        }
    }

    #[test]
    fn content_length_counts_bytes() {
        assert_eq!(doc().content_length(), 6);
    }

    #[test]
    fn llm_format_includes_metadata_and_skips_empty_comments() {
        let text = doc().format_for_llm();
        assert!(text.starts_with("Container Key: ENG\nDocument Id: 42\nTitle: Runbook"));
        assert!(text.contains("Created: 2024-01-02T03:04:05Z"));
        assert!(text.contains("Last Updated: 2024-02-03T04:05:06Z"));
        assert!(!text.contains("Comments:"));

        let mut with_comments = doc();
        with_comments.annotations = "looks good".into();
        assert!(with_comments
            .format_for_llm()
            .ends_with("Comments: looks good"));
    }
}
