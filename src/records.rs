//! Relational persistence for containers and documents.
//!
//! The record store is the single authority on which documents exist. Every
//! write here happens before the matching vector index write, so a crash in
//! between leaves the index behind the records and never the other way round.
//!
//! Documents are keyed by their source-assigned id; containers by their
//! natural key. `content_length` is written in the same statement as
//! `content` so the two can never disagree.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::models::{Container, Document};

#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Look up a container by key, creating it if needed. An existing
    /// container keeps its `last_import_at` and takes the new name.
    pub async fn find_or_create_container(&self, key: &str, name: &str) -> Result<Container> {
        sqlx::query(
            r#"
            INSERT INTO containers (key, name) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(key)
        .bind(name)
        .execute(&self.pool)
        .await?;

        self.container_by_key(key)
            .await?
            .ok_or_else(|| Error::ContainerNotFound {
                key: key.to_string(),
            })
    }

    pub async fn container_by_key(&self, key: &str) -> Result<Option<Container>> {
        let row = sqlx::query("SELECT id, key, name, last_import_at FROM containers WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| container_from_row(&r)))
    }

    pub async fn all_containers(&self) -> Result<Vec<Container>> {
        let rows = sqlx::query("SELECT id, key, name, last_import_at FROM containers ORDER BY key")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(container_from_row).collect())
    }

    pub async fn mark_imported(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        let updated = sqlx::query("UPDATE containers SET last_import_at = ? WHERE key = ?")
            .bind(at.timestamp_millis())
            .bind(key)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(Error::ContainerNotFound {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Delete a container and all of its documents. Returns the ids of the
    /// removed documents so the caller can clear them from the vector index.
    pub async fn delete_container(&self, key: &str) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE container_key = ? ORDER BY id")
                .bind(key)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM documents WHERE container_key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM containers WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ids)
    }

    /// Insert or update documents of one container. A batch that mixes
    /// containers is rejected before anything is written.
    pub async fn upsert_documents(&self, container_key: &str, docs: &[Document]) -> Result<()> {
        if let Some(stray) = docs.iter().find(|d| d.container_key != container_key) {
            return Err(Error::CrossContainerUpsert {
                expected: container_key.to_string(),
                found: stray.container_key.clone(),
            });
        }

        let mut tx = self.pool.begin().await?;
        for doc in docs {
            sqlx::query(
                r#"
                INSERT INTO documents (id, container_key, title, author, content, annotations, created_at, last_modified_at, content_length)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    container_key = excluded.container_key,
                    title = excluded.title,
                    author = excluded.author,
                    content = excluded.content,
                    annotations = excluded.annotations,
                    created_at = excluded.created_at,
                    last_modified_at = excluded.last_modified_at,
                    content_length = excluded.content_length
                "#,
            )
            .bind(&doc.id)
            .bind(&doc.container_key)
            .bind(&doc.title)
            .bind(&doc.author)
            .bind(&doc.content)
            .bind(&doc.annotations)
            .bind(doc.created_at.timestamp())
            .bind(doc.last_modified_at.timestamp())
            .bind(doc.content_length())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete documents by id. Missing ids are ignored. Returns the number
    /// of rows removed.
    pub async fn delete_documents(&self, ids: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for id in ids {
            removed += sqlx::query("DELETE FROM documents WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    /// Hydrate documents in the order of `ids`. Ids with no row are dropped.
    pub async fn find_many_by_ids(&self, ids: &[String]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, container_key, title, author, content, annotations, created_at, last_modified_at \
             FROM documents WHERE id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_id: HashMap<String, Document> = rows
            .iter()
            .map(|r| {
                let doc = document_from_row(r);
                (doc.id.clone(), doc)
            })
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    pub async fn ids_by_container(&self, container_key: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT id FROM documents WHERE container_key = ? ORDER BY id")
            .bind(container_key)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn count_by_container(&self, container_key: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE container_key = ?")
            .bind(container_key)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn container_from_row(row: &sqlx::sqlite::SqliteRow) -> Container {
    let last_import_at: Option<i64> = row.get("last_import_at");
    Container {
        id: row.get("id"),
        key: row.get("key"),
        name: row.get("name"),
        last_import_at: last_import_at.and_then(DateTime::from_timestamp_millis),
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Document {
    let created_at: i64 = row.get("created_at");
    let last_modified_at: i64 = row.get("last_modified_at");
    Document {
        id: row.get("id"),
        container_key: row.get("container_key"),
        title: row.get("title"),
        author: row.get("author"),
        content: row.get("content"),
        annotations: row.get("annotations"),
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
        last_modified_at: DateTime::from_timestamp(last_modified_at, 0).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use chrono::TimeZone;

    #[tokio::test]
    async fn find_or_create_keeps_import_stamp() {
        let (_tmp, store) = testing::record_store().await;

        let created = store.find_or_create_container("ENG", "Engineering").await.unwrap();
        assert!(created.last_import_at.is_none());

        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        store.mark_imported("ENG", at).await.unwrap();

        let again = store.find_or_create_container("ENG", "Eng").await.unwrap();
        assert_eq!(again.id, created.id);
        assert_eq!(again.name, "Eng");
        assert_eq!(again.last_import_at, Some(at));
    }

    #[tokio::test]
    async fn mark_imported_on_unknown_container_fails() {
        let (_tmp, store) = testing::record_store().await;
        let err = store.mark_imported("NOPE", Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::ContainerNotFound { .. }));
    }

    #[tokio::test]
    async fn upsert_rewrites_content_and_length() {
        let (_tmp, store) = testing::record_store().await;
        store.find_or_create_container("ENG", "Engineering").await.unwrap();

        let mut doc = testing::document("1", "ENG", "short");
        store.upsert_documents("ENG", &[doc.clone()]).await.unwrap();

        doc.content = "a much longer body".into();
        store.upsert_documents("ENG", &[doc.clone()]).await.unwrap();

        let len: i64 = sqlx::query_scalar("SELECT content_length FROM documents WHERE id = '1'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(len, doc.content.len() as i64);
        assert_eq!(store.count_by_container("ENG").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cross_container_batch_writes_nothing() {
        let (_tmp, store) = testing::record_store().await;
        let docs = vec![
            testing::document("1", "ENG", "a"),
            testing::document("2", "OPS", "b"),
        ];

        let err = store.upsert_documents("ENG", &docs).await.unwrap_err();
        assert!(matches!(err, Error::CrossContainerUpsert { .. }));
        assert_eq!(store.count_by_container("ENG").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn find_many_preserves_requested_order_and_drops_missing() {
        let (_tmp, store) = testing::record_store().await;
        store.find_or_create_container("ENG", "Engineering").await.unwrap();
        let docs: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| testing::document(id, "ENG", id))
            .collect();
        store.upsert_documents("ENG", &docs).await.unwrap();

        let ids: Vec<String> = ["c", "missing", "a"].iter().map(|s| s.to_string()).collect();
        let found = store.find_many_by_ids(&ids).await.unwrap();
        let found_ids: Vec<&str> = found.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(found_ids, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn delete_container_cascades_to_documents() {
        let (_tmp, store) = testing::record_store().await;
        store.find_or_create_container("ENG", "Engineering").await.unwrap();
        store.find_or_create_container("OPS", "Operations").await.unwrap();
        store
            .upsert_documents(
                "ENG",
                &[testing::document("1", "ENG", "x"), testing::document("2", "ENG", "y")],
            )
            .await
            .unwrap();
        store
            .upsert_documents("OPS", &[testing::document("3", "OPS", "z")])
            .await
            .unwrap();

        let removed = store.delete_container("ENG").await.unwrap();
        assert_eq!(removed, vec!["1".to_string(), "2".to_string()]);
        assert!(store.container_by_key("ENG").await.unwrap().is_none());
        assert_eq!(store.ids_by_container("OPS").await.unwrap(), vec!["3".to_string()]);
    }

    #[tokio::test]
    async fn delete_documents_ignores_missing_ids() {
        let (_tmp, store) = testing::record_store().await;
        store.find_or_create_container("ENG", "Engineering").await.unwrap();
        store
            .upsert_documents("ENG", &[testing::document("1", "ENG", "x")])
            .await
            .unwrap();

        let removed = store
            .delete_documents(&["1".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn documents_require_a_known_container() {
        let (_tmp, store) = testing::record_store().await;

        let err = store
            .upsert_documents("NOPE", &[testing::document("1", "NOPE", "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)), "{err}");
        assert_eq!(store.count_by_container("NOPE").await.unwrap(), 0);
    }
}
