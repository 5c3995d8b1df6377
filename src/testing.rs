//! Shared fixtures for unit tests.

use chrono::{TimeZone, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::config::Config;
use crate::models::Document;
use crate::records::RecordStore;

pub fn config(tmp: &TempDir) -> Config {
    let toml_str = format!(
        "[db]\npath = \"{}\"\n",
        tmp.path().join("kh.sqlite").display()
    );
    toml::from_str(&toml_str).unwrap()
}

pub async fn pool() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let pool = crate::db::connect(&config(&tmp)).await.unwrap();
    crate::migrate::apply(&pool).await.unwrap();
    (tmp, pool)
}

pub async fn record_store() -> (TempDir, RecordStore) {
    let (tmp, pool) = pool().await;
    (tmp, RecordStore::new(pool))
}

pub fn document(id: &str, container_key: &str, content: &str) -> Document {
    Document {
        id: id.to_string(),
        container_key: container_key.to_string(),
        title: format!("Title {id}"),
        author: "tester".to_string(),
        content: content.to_string(),
        annotations: String::new(),
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        last_modified_at: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
    }
}
