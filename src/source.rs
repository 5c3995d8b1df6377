//! The document source the sync engine pulls from.
//!
//! [`DocumentSource`] is the capability set synchronization needs: drained
//! id listings, label lookups, modification queries, per-document fetches,
//! and container listings. Per-document denial comes back as
//! [`Fetched::Inaccessible`]; only a container-level failure is an error
//! ([`Error::InaccessibleContainer`]).
//!
//! [`FilesystemSource`] serves a directory tree:
//!
//! ```text
//! root/
//!   ENG/                      container key "ENG"
//!     .name                   optional display name (defaults to the key)
//!     .author                 optional author for every document
//!     .archived               marker: container is archived
//!     runbook.md              document id "ENG/runbook.md"
//!     runbook.md.labels       one label per line
//!     runbook.md.comments     annotations
//!     _archived/old.md        archived document
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::models::{ContainerInfo, ContainerStatus, Document, DocumentStatus, Fetched};

#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn list_ids(&self, container_key: &str, status: DocumentStatus) -> Result<Vec<String>>;

    /// Ids in the container carrying any of `labels`.
    async fn list_ids_by_label(&self, container_key: &str, labels: &[String])
        -> Result<Vec<String>>;

    /// Current ids modified at or after `since`, minus those labeled with
    /// any of `ignore_labels`.
    async fn list_ids_modified_since(
        &self,
        container_key: &str,
        since: DateTime<Utc>,
        ignore_labels: &[String],
    ) -> Result<Vec<String>>;

    async fn fetch(&self, id: &str, container_key: &str) -> Result<Fetched>;

    async fn list_containers(&self, status: ContainerStatus) -> Result<Vec<ContainerInfo>>;
}

const ARCHIVED_DIR: &str = "_archived/";

pub struct FilesystemSource {
    root: PathBuf,
    include_set: GlobSet,
    exclude_set: GlobSet,
}

struct ScannedFile {
    id: String,
    path: PathBuf,
    archived: bool,
}

impl FilesystemSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        if !config.root.is_dir() {
            return Err(anyhow::anyhow!(
                "Source root does not exist: {}",
                config.root.display()
            )
            .into());
        }

        let mut default_excludes = vec!["**/.*".to_string(), "**/.git/**".to_string()];
        default_excludes.extend(config.exclude_globs.clone());

        Ok(Self {
            root: config.root.clone(),
            include_set: build_globset(&config.include_globs)?,
            exclude_set: build_globset(&default_excludes)?,
        })
    }

    fn container_dir(&self, key: &str) -> Result<PathBuf> {
        let inaccessible = || Error::InaccessibleContainer {
            container: key.to_string(),
        };
        if !is_plain_segment(key) {
            return Err(inaccessible());
        }
        let dir = self.root.join(key);
        if !dir.is_dir() {
            return Err(inaccessible());
        }
        Ok(dir)
    }

    fn scan(&self, key: &str) -> Result<Vec<ScannedFile>> {
        let dir = self.container_dir(key)?;
        let mut files = Vec::new();

        for entry in WalkDir::new(&dir) {
            let entry = entry.map_err(anyhow::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&dir).unwrap_or(path);
            let rel_str = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if self.exclude_set.is_match(&rel_str) || !self.include_set.is_match(&rel_str) {
                continue;
            }

            files.push(ScannedFile {
                id: format!("{key}/{rel_str}"),
                archived: rel_str.starts_with(ARCHIVED_DIR),
                path: path.to_path_buf(),
            });
        }

        files.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(files)
    }

    /// Absolute path for `id` if it names a file inside `container_key`.
    fn document_path(&self, id: &str, container_key: &str) -> Option<PathBuf> {
        let relative = id.strip_prefix(container_key)?.strip_prefix('/')?;
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(container_key).join(relative))
    }

    fn document(&self, id: &str, container_key: &str, path: &Path) -> std::io::Result<Document> {
        let content = std::fs::read_to_string(path)?;
        let metadata = std::fs::metadata(path)?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let created = metadata.created().unwrap_or(modified);

        let title = path
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let author = read_trimmed(&self.root.join(container_key).join(".author"))
            .unwrap_or_else(|| "unknown".to_string());
        let annotations = read_trimmed(&sidecar(path, "comments")).unwrap_or_default();

        Ok(Document {
            id: id.to_string(),
            container_key: container_key.to_string(),
            title,
            author,
            content,
            annotations,
            created_at: DateTime::<Utc>::from(created),
            last_modified_at: DateTime::<Utc>::from(modified),
        })
    }
}

fn is_plain_segment(key: &str) -> bool {
    !key.is_empty() && !key.starts_with('.') && !key.contains('/') && !key.contains('\\')
}

fn sidecar(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn labels_of(path: &Path) -> Vec<String> {
    std::fs::read_to_string(sidecar(path, "labels"))
        .map(|s| {
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn has_any_label(path: &Path, labels: &[String]) -> bool {
    !labels.is_empty() && labels_of(path).iter().any(|l| labels.contains(l))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(anyhow::Error::from)?);
    }
    Ok(builder.build().map_err(anyhow::Error::from)?)
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

#[async_trait]
impl DocumentSource for FilesystemSource {
    async fn list_ids(&self, container_key: &str, status: DocumentStatus) -> Result<Vec<String>> {
        let want_archived = status == DocumentStatus::Archived;
        Ok(self
            .scan(container_key)?
            .into_iter()
            .filter(|f| f.archived == want_archived)
            .map(|f| f.id)
            .collect())
    }

    async fn list_ids_by_label(
        &self,
        container_key: &str,
        labels: &[String],
    ) -> Result<Vec<String>> {
        Ok(self
            .scan(container_key)?
            .into_iter()
            .filter(|f| has_any_label(&f.path, labels))
            .map(|f| f.id)
            .collect())
    }

    async fn list_ids_modified_since(
        &self,
        container_key: &str,
        since: DateTime<Utc>,
        ignore_labels: &[String],
    ) -> Result<Vec<String>> {
        Ok(self
            .scan(container_key)?
            .into_iter()
            .filter(|f| !f.archived)
            .filter(|f| modified_at(&f.path).is_some_and(|m| m >= since))
            .filter(|f| !has_any_label(&f.path, ignore_labels))
            .map(|f| f.id)
            .collect())
    }

    async fn fetch(&self, id: &str, container_key: &str) -> Result<Fetched> {
        self.container_dir(container_key)?;

        let inaccessible = || Fetched::Inaccessible {
            container_key: container_key.to_string(),
            id: id.to_string(),
        };

        let Some(path) = self.document_path(id, container_key) else {
            return Ok(inaccessible());
        };

        match self.document(id, container_key, &path) {
            Ok(doc) => Ok(Fetched::Document(doc)),
            Err(e) => {
                tracing::debug!(id, error = %e, "document unreadable");
                Ok(inaccessible())
            }
        }
    }

    async fn list_containers(&self, status: ContainerStatus) -> Result<Vec<ContainerInfo>> {
        let mut containers = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let key = entry.file_name().to_string_lossy().to_string();
            if !is_plain_segment(&key) {
                continue;
            }

            let dir = entry.path();
            let container_status = if dir.join(".archived").exists() {
                ContainerStatus::Archived
            } else {
                ContainerStatus::Current
            };
            if container_status != status {
                continue;
            }

            containers.push(ContainerInfo {
                name: read_trimmed(&dir.join(".name"))
                    .and_then(|s| s.lines().next().map(str::to_string))
                    .unwrap_or_else(|| key.clone()),
                key,
                status: container_status,
            });
        }

        containers.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(containers)
    }
}
