use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table the record store, vector index and cooldown storage
/// need. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Containers, keyed by natural key and unique name
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS containers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL UNIQUE,
            last_import_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Documents, keyed by source-assigned id
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            container_key TEXT NOT NULL REFERENCES containers(key),
            title TEXT NOT NULL,
            author TEXT NOT NULL,
            content TEXT NOT NULL,
            annotations TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            last_modified_at INTEGER NOT NULL,
            content_length INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS service_cooldowns (
            service_key TEXT PRIMARY KEY,
            cooldown_seconds REAL NOT NULL,
            updated_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // SQLite vector backend
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_collections (
            name TEXT PRIMARY KEY,
            dims INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_entries (
            collection TEXT NOT NULL,
            item_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (collection, item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_container_key ON documents(container_key)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
