//! SQLite-backed [`VectorIndex`].
//!
//! Shares the record store's database. Vectors are stored as little-endian
//! `f32` BLOBs in `vector_entries`; collection dimensionality lives in
//! `vector_collections`. Neighbor search is brute-force cosine similarity
//! in id order, which is fine for the corpus sizes a single container sync
//! produces.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use super::{check_dims, internal_name, normalize, rank, VectorIndex};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Error, Result};

pub struct SqliteIndex {
    pool: SqlitePool,
    prefix: String,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    async fn dims(&self, name: &str) -> Result<Option<usize>> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM vector_collections WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(dims.map(|d| d as usize))
    }

    async fn count_internal(&self, name: &str) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_entries WHERE collection = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    async fn load(&self, name: &str) -> Result<Vec<(String, Vec<f32>)>> {
        let rows = sqlx::query(
            "SELECT item_id, embedding FROM vector_entries WHERE collection = ? ORDER BY item_id",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (row.get("item_id"), blob_to_vec(&blob))
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, collection: &str, items: &[(String, Vec<f32>)]) -> Result<usize> {
        let name = internal_name(&self.prefix, collection);
        let Some((_, first)) = items.first() else {
            return self.count_internal(&name).await;
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO vector_collections (name, dims) VALUES (?, ?)")
            .bind(&name)
            .bind(first.len() as i64)
            .execute(&mut *tx)
            .await?;

        let dims: i64 = sqlx::query_scalar("SELECT dims FROM vector_collections WHERE name = ?")
            .bind(&name)
            .fetch_one(&mut *tx)
            .await?;
        check_dims(&name, dims as usize, items)?;

        for (id, vector) in items {
            sqlx::query(
                r#"
                INSERT INTO vector_entries (collection, item_id, embedding) VALUES (?, ?, ?)
                ON CONFLICT(collection, item_id) DO UPDATE SET embedding = excluded.embedding
                "#,
            )
            .bind(&name)
            .bind(id)
            .bind(vec_to_blob(&normalize(vector)))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.count_internal(&name).await
    }

    async fn retrieve_neighbor_ids(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        similarity_floor: f32,
    ) -> Result<Vec<String>> {
        let name = internal_name(&self.prefix, collection);
        let dims = self
            .dims(&name)
            .await?
            .ok_or_else(|| Error::CollectionNotFound {
                collection: collection.to_string(),
            })?;

        if query.len() != dims {
            return Err(Error::DimensionMismatch {
                collection: name,
                expected: dims,
                found: query.len(),
            });
        }

        let entries = self.load(&name).await?;
        Ok(rank(
            &normalize(query),
            entries.iter().map(|(id, v)| (id, v)),
            k,
            similarity_floor,
        ))
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        let name = internal_name(&self.prefix, collection);
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM vector_entries WHERE collection = ? AND item_id = ?")
                .bind(&name)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.count_internal(&internal_name(&self.prefix, collection))
            .await
    }

    async fn all_embeddings(&self, collection: &str) -> Result<HashMap<String, Vec<f32>>> {
        let name = internal_name(&self.prefix, collection);
        Ok(self.load(&name).await?.into_iter().collect())
    }
}
