//! Error types for Knowledge Harness.
//!
//! Errors fall into four groups, which callers treat differently:
//!
//! | Group | Variants | Handling |
//! |-------|----------|----------|
//! | Source access | [`InaccessibleContainer`](Error::InaccessibleContainer), [`InaccessibleDocuments`](Error::InaccessibleDocuments) | fatal for a full import; a deletion signal during incremental sync |
//! | Consistency | [`EmptyEmbedding`](Error::EmptyEmbedding), [`CrossContainerUpsert`](Error::CrossContainerUpsert), [`DimensionMismatch`](Error::DimensionMismatch) | fatal, never retried |
//! | Rate limit | [`RateLimited`](Error::RateLimited) | retried by the adaptive cooldown, then surfaced |
//! | Not found | [`CollectionNotFound`](Error::CollectionNotFound), [`ContainerNotFound`](Error::ContainerNotFound) | surfaced to the caller |

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("container `{container}` is inaccessible or does not exist")]
    InaccessibleContainer { container: String },

    #[error("container `{container}` has inaccessible documents: {}", ids.join(", "))]
    InaccessibleDocuments { container: String, ids: Vec<String> },

    #[error("embedding for item `{item_id}` is empty")]
    EmptyEmbedding { item_id: String },

    #[error("multi-container upsert is not supported: document of `{found}` in a batch for `{expected}`")]
    CrossContainerUpsert { expected: String, found: String },

    #[error("`{collection}` collection does not exist, did you import the related data?")]
    CollectionNotFound { collection: String },

    #[error("collection `{collection}` holds {expected}-dimensional vectors, got {found}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        found: usize,
    },

    #[error("container `{key}` not found in the record store")]
    ContainerNotFound { key: String },

    #[error("rate limited by {service}: {message}")]
    RateLimited { service: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether the adaptive cooldown should back off and retry.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limited_is_classified_as_rate_limit() {
        let limited = Error::RateLimited {
            service: "embedding:openai".into(),
            message: "429 Too Many Requests".into(),
        };
        assert!(limited.is_rate_limit());

        let other = Error::EmptyEmbedding {
            item_id: "1".into(),
        };
        assert!(!other.is_rate_limit());
        assert!(!Error::Other(anyhow::anyhow!("rate limit")).is_rate_limit());
    }

    #[test]
    fn inaccessible_documents_lists_ids() {
        let err = Error::InaccessibleDocuments {
            container: "ENG".into(),
            ids: vec!["1".into(), "2".into()],
        };
        assert_eq!(
            err.to_string(),
            "container `ENG` has inaccessible documents: 1, 2"
        );
    }
}
