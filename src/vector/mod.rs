//! Vector index abstraction and its interchangeable backends.
//!
//! Every backend stores `(item_id, vector)` pairs in named collections and
//! answers cosine nearest-neighbor queries with the same observable contract:
//!
//! | Operation | Absent collection | Notes |
//! |-----------|-------------------|-------|
//! | [`upsert`](VectorIndex::upsert) | created, sized by the first vector | last write wins per id; returns the post-upsert count |
//! | [`retrieve_neighbor_ids`](VectorIndex::retrieve_neighbor_ids) | [`CollectionNotFound`](Error::CollectionNotFound) | descending similarity, floor applied |
//! | [`delete`](VectorIndex::delete) | no-op | absent ids ignored |
//! | [`count`](VectorIndex::count) | `0` | |
//! | [`all_embeddings`](VectorIndex::all_embeddings) | empty map | |
//!
//! Vectors are normalized to unit length on the way in, so every backend
//! reports the same stored values and cosine similarity reduces to a dot
//! product. Logical collection names are prefixed with a deployment-wide
//! namespace (see [`internal_name`]) before they reach the backend.
//!
//! Use [`create_index`] to build the backend selected in `[vector]`.

pub mod memory;
pub mod qdrant;
pub mod sqlite;

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::cooldown::ServiceCooldown;
use crate::error::{Error, Result};

pub use memory::MemoryIndex;
pub use qdrant::QdrantIndex;
pub use sqlite::SqliteIndex;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, collection: &str, items: &[(String, Vec<f32>)]) -> Result<usize>;

    async fn retrieve_neighbor_ids(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        similarity_floor: f32,
    ) -> Result<Vec<String>>;

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()>;

    async fn count(&self, collection: &str) -> Result<usize>;

    async fn all_embeddings(&self, collection: &str) -> Result<HashMap<String, Vec<f32>>>;
}

/// Backend-side name for a logical collection.
pub fn internal_name(prefix: &str, collection: &str) -> String {
    format!("{prefix}_{collection}")
}

/// Scale `v` to unit length. Zero vectors are returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Rank already-normalized entries against a normalized query.
///
/// Entries must be supplied in a stable order; ties keep that order.
pub(crate) fn rank<'a, I>(query: &[f32], entries: I, k: usize, similarity_floor: f32) -> Vec<String>
where
    I: IntoIterator<Item = (&'a String, &'a Vec<f32>)>,
{
    let mut scored: Vec<(&String, f32)> = entries
        .into_iter()
        .map(|(id, v)| (id, dot(query, v)))
        .filter(|(_, sim)| *sim >= similarity_floor)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(k).map(|(id, _)| id.clone()).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Reject a batch whose vectors do not all share the dimensionality `dims`.
pub(crate) fn check_dims(collection: &str, dims: usize, items: &[(String, Vec<f32>)]) -> Result<()> {
    match items.iter().find(|(_, v)| v.len() != dims) {
        Some((_, v)) => Err(Error::DimensionMismatch {
            collection: collection.to_string(),
            expected: dims,
            found: v.len(),
        }),
        None => Ok(()),
    }
}

/// Routes every call of a network-bound backend through the service cooldown.
pub struct CooldownIndex<I> {
    inner: I,
    cooldown: ServiceCooldown,
    service_key: String,
}

impl<I: VectorIndex> CooldownIndex<I> {
    pub fn new(inner: I, cooldown: ServiceCooldown, service_key: impl Into<String>) -> Self {
        Self {
            inner,
            cooldown,
            service_key: service_key.into(),
        }
    }
}

#[async_trait]
impl<I: VectorIndex> VectorIndex for CooldownIndex<I> {
    async fn upsert(&self, collection: &str, items: &[(String, Vec<f32>)]) -> Result<usize> {
        self.cooldown
            .call(&self.service_key, || self.inner.upsert(collection, items))
            .await
    }

    async fn retrieve_neighbor_ids(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        similarity_floor: f32,
    ) -> Result<Vec<String>> {
        self.cooldown
            .call(&self.service_key, || {
                self.inner
                    .retrieve_neighbor_ids(collection, query, k, similarity_floor)
            })
            .await
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        self.cooldown
            .call(&self.service_key, || self.inner.delete(collection, ids))
            .await
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.cooldown
            .call(&self.service_key, || self.inner.count(collection))
            .await
    }

    async fn all_embeddings(&self, collection: &str) -> Result<HashMap<String, Vec<f32>>> {
        self.cooldown
            .call(&self.service_key, || self.inner.all_embeddings(collection))
            .await
    }
}

/// Build the backend named by `config.vector.backend`.
///
/// | Value | Backend |
/// |-------|---------|
/// | `"sqlite"` | [`SqliteIndex`] on the shared pool |
/// | `"memory"` | [`MemoryIndex`] |
/// | `"qdrant"` | [`QdrantIndex`] behind the `vector:qdrant` cooldown |
pub fn create_index(
    config: &Config,
    pool: &SqlitePool,
    cooldown: &ServiceCooldown,
) -> Result<Arc<dyn VectorIndex>> {
    let prefix = config.vector.collection_prefix.clone();
    match config.vector.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteIndex::new(pool.clone(), prefix))),
        "memory" => Ok(Arc::new(MemoryIndex::new(prefix))),
        "qdrant" => {
            let index = QdrantIndex::new(&config.vector)?;
            Ok(Arc::new(CooldownIndex::new(
                index,
                cooldown.clone(),
                "vector:qdrant",
            )))
        }
        other => Err(anyhow::anyhow!("Unknown vector backend: {}", other).into()),
    }
}
