//! Full and incremental synchronization against a [`DocumentSource`].
//!
//! # Full import
//!
//! [`SyncEngine::import_container`] fetches every current, non-ignored
//! document of one container. It is all-or-nothing on accessibility: a
//! single inaccessible document fails the import with
//! [`Error::InaccessibleDocuments`] before anything is written.
//!
//! # Incremental sync
//!
//! [`SyncEngine::pull_updates`] walks every container that has been
//! imported at least once, one at a time:
//!
//! 1. archived at the source: delete it locally and move on;
//! 2. delete local documents that are no longer current or are now
//!    labeled with an ignore label;
//! 3. fetch documents modified since `last_import_at - overlap`;
//! 4. upsert the accessible ones, delete the inaccessible ones;
//! 5. stamp `last_import_at` with the time the pass over this container
//!    *started*.
//!
//! A container the source reports inaccessible mid-pass is deleted and the
//! run continues with the next one. Every other error aborts the run.
//!
//! Within one container, stale deletion happens before the update fetch,
//! which happens before the stamp. The overlap window only ever widens the
//! candidate set; re-processing a current document is a harmless upsert.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::knowledge::KnowledgeBase;
use crate::models::{Container, ContainerStatus, Document, DocumentStatus, Fetched};
use crate::source::DocumentSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub container: String,
    pub documents: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub containers_synced: Vec<String>,
    pub containers_deleted: Vec<String>,
    pub containers_skipped: Vec<String>,
    pub documents_upserted: usize,
    pub documents_deleted: usize,
}

pub struct SyncEngine {
    kb: KnowledgeBase,
    source: Arc<dyn DocumentSource>,
    settings: SyncConfig,
}

impl SyncEngine {
    pub fn new(kb: KnowledgeBase, source: Arc<dyn DocumentSource>, settings: SyncConfig) -> Self {
        Self {
            kb,
            source,
            settings,
        }
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn source(&self) -> &Arc<dyn DocumentSource> {
        &self.source
    }

    pub async fn import_container(&self, key: &str, name: &str) -> Result<ImportReport> {
        let started_at = Utc::now();
        tracing::info!(container = key, "full import started");

        let mut ids: Vec<String> = self.wanted_ids(key).await?.into_iter().collect();
        ids.sort();
        let fetched = self.fetch_many(key, &ids).await?;
        let (docs, inaccessible) = partition(fetched);

        if !inaccessible.is_empty() {
            return Err(Error::InaccessibleDocuments {
                container: key.to_string(),
                ids: inaccessible,
            });
        }

        self.kb
            .records()
            .find_or_create_container(key, name)
            .await?;
        self.kb.upsert_documents(key, &docs).await?;
        self.kb.records().mark_imported(key, started_at).await?;

        tracing::info!(container = key, documents = docs.len(), "full import complete");
        Ok(ImportReport {
            container: key.to_string(),
            documents: docs.len(),
        })
    }

    pub async fn pull_updates(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        let archived: HashSet<String> = self
            .source
            .list_containers(ContainerStatus::Archived)
            .await?
            .into_iter()
            .map(|c| c.key)
            .collect();

        for container in self.kb.records().all_containers().await? {
            let Some(last_import_at) = container.last_import_at else {
                tracing::info!(
                    container = %container.key,
                    "skipping container that was never imported"
                );
                report.containers_skipped.push(container.key);
                continue;
            };

            if archived.contains(&container.key) {
                tracing::info!(container = %container.key, "container archived at source, deleting");
                self.kb.delete_container(&container.key).await?;
                report.containers_deleted.push(container.key);
                continue;
            }

            match self
                .sync_container(&container, last_import_at, &mut report)
                .await
            {
                Ok(()) => report.containers_synced.push(container.key),
                Err(Error::InaccessibleContainer { .. }) => {
                    tracing::warn!(
                        container = %container.key,
                        "container inaccessible at source, deleting"
                    );
                    self.kb.delete_container(&container.key).await?;
                    report.containers_deleted.push(container.key);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            synced = report.containers_synced.len(),
            deleted = report.containers_deleted.len(),
            skipped = report.containers_skipped.len(),
            upserted = report.documents_upserted,
            removed = report.documents_deleted,
            "pull updates complete"
        );
        Ok(report)
    }

    async fn sync_container(
        &self,
        container: &Container,
        last_import_at: DateTime<Utc>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let started_at = Utc::now();
        let key = container.key.as_str();

        let wanted = self.wanted_ids(key).await?;
        let stale: Vec<String> = self
            .kb
            .records()
            .ids_by_container(key)
            .await?
            .into_iter()
            .filter(|id| !wanted.contains(id))
            .collect();
        if !stale.is_empty() {
            tracing::info!(container = key, count = stale.len(), "removing stale documents");
            self.kb.delete_documents(&stale).await?;
            report.documents_deleted += stale.len();
        }

        let since = last_import_at - self.settings.overlap();
        let ids = self
            .source
            .list_ids_modified_since(key, since, &self.settings.ignore_labels)
            .await?;
        tracing::info!(container = key, since = %since, count = ids.len(), "fetching updates");

        let (docs, inaccessible) = partition(self.fetch_many(key, &ids).await?);

        self.kb.upsert_documents(key, &docs).await?;
        report.documents_upserted += docs.len();

        if !inaccessible.is_empty() {
            tracing::info!(
                container = key,
                count = inaccessible.len(),
                "removing documents that became inaccessible"
            );
            self.kb.delete_documents(&inaccessible).await?;
            report.documents_deleted += inaccessible.len();
        }

        self.kb.records().mark_imported(key, started_at).await?;
        Ok(())
    }

    /// Current ids of a container minus those carrying an ignore label.
    async fn wanted_ids(&self, key: &str) -> Result<HashSet<String>> {
        let current = self.source.list_ids(key, DocumentStatus::Current).await?;

        let ignored: HashSet<String> = if self.settings.ignore_labels.is_empty() {
            HashSet::new()
        } else {
            self.source
                .list_ids_by_label(key, &self.settings.ignore_labels)
                .await?
                .into_iter()
                .collect()
        };

        Ok(current
            .into_iter()
            .filter(|id| !ignored.contains(id))
            .collect())
    }

    /// Fetch `ids` across the bounded worker pool, keeping input order.
    async fn fetch_many(&self, key: &str, ids: &[String]) -> Result<Vec<Fetched>> {
        let permits = Arc::new(Semaphore::new(self.settings.fetch_workers.max(1)));
        let mut tasks = JoinSet::new();

        for (position, id) in ids.iter().cloned().enumerate() {
            let source = Arc::clone(&self.source);
            let permits = Arc::clone(&permits);
            let key = key.to_string();
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| anyhow::anyhow!("fetch worker pool closed: {}", e))?;
                let fetched = source.fetch(&id, &key).await?;
                Ok::<_, Error>((position, fetched))
            });
        }

        let mut results: Vec<Option<Fetched>> = vec![None; ids.len()];
        while let Some(joined) = tasks.join_next().await {
            let (position, fetched) =
                joined.map_err(|e| anyhow::anyhow!("fetch task failed: {}", e))??;
            results[position] = Some(fetched);
        }

        Ok(results.into_iter().flatten().collect())
    }
}

fn partition(fetched: Vec<Fetched>) -> (Vec<Document>, Vec<String>) {
    let mut docs = Vec::new();
    let mut inaccessible = Vec::new();
    for item in fetched {
        match item {
            Fetched::Document(doc) => docs.push(doc),
            Fetched::Inaccessible { id, .. } => inaccessible.push(id),
        }
    }
    (docs, inaccessible)
}
