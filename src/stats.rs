//! Record store statistics and health overview.
//!
//! Summarizes what has been synchronized: per-container document counts,
//! content volume, last import time, and how many vector entries back the
//! documents. Used by `kh stats` to confirm that imports and updates are
//! landing in both stores.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::config::Config;
use crate::knowledge::{KnowledgeBase, DOCUMENTS_COLLECTION};

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerStats {
    pub key: String,
    pub name: String,
    pub documents: i64,
    pub content_bytes: i64,
    pub last_import_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub containers: Vec<ContainerStats>,
    pub total_documents: i64,
    pub embedded: usize,
}

pub async fn collect(kb: &KnowledgeBase) -> Result<Stats> {
    let pool = kb.records().pool();

    let rows = sqlx::query(
        r#"
        SELECT
            c.key,
            c.name,
            c.last_import_at,
            COUNT(d.id) AS doc_count,
            COALESCE(SUM(d.content_length), 0) AS content_bytes
        FROM containers c
        LEFT JOIN documents d ON d.container_key = c.key
        GROUP BY c.key, c.name, c.last_import_at
        ORDER BY doc_count DESC, c.key
        "#,
    )
    .fetch_all(pool)
    .await?;

    let containers: Vec<ContainerStats> = rows
        .iter()
        .map(|row| {
            let last_import_at: Option<i64> = row.get("last_import_at");
            ContainerStats {
                key: row.get("key"),
                name: row.get("name"),
                documents: row.get("doc_count"),
                content_bytes: row.get("content_bytes"),
                last_import_at: last_import_at.and_then(DateTime::from_timestamp_millis),
            }
        })
        .collect();

    let total_documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;

    let embedded = kb.index().count(DOCUMENTS_COLLECTION).await?;

    Ok(Stats {
        containers,
        total_documents,
        embedded,
    })
}

/// Print a summary of `stats` for the database at `config.db.path`.
pub fn print_stats(config: &Config, stats: &Stats) {
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Knowledge Harness: Database Stats");
    println!("=================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Backend:     {}", config.vector.backend);
    println!();
    println!("  Containers:  {}", stats.containers.len());
    println!("  Documents:   {}", stats.total_documents);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded,
        stats.total_documents,
        if stats.total_documents > 0 {
            (stats.embedded as i64 * 100) / stats.total_documents
        } else {
            0
        }
    );

    if !stats.containers.is_empty() {
        println!();
        println!("  By container:");
        println!(
            "  {:<16} {:<24} {:>6} {:>10}   {}",
            "KEY", "NAME", "DOCS", "SIZE", "LAST IMPORT"
        );
        println!("  {}", "-".repeat(76));

        for c in &stats.containers {
            let import_display = match c.last_import_at {
                Some(ts) => format_ts_relative(ts.timestamp()),
                None => "never".to_string(),
            };
            println!(
                "  {:<16} {:<24} {:>6} {:>10}   {}",
                c.key,
                c.name,
                c.documents,
                format_bytes(c.content_bytes.max(0) as u64),
                import_display
            );
        }
    }

    println!();
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
