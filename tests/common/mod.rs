#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use knowledge_harness::config::{Config, SyncConfig};
use knowledge_harness::embedding::Embedder;
use knowledge_harness::error::{Error, Result};
use knowledge_harness::knowledge::KnowledgeBase;
use knowledge_harness::models::{ContainerInfo, ContainerStatus, Document, DocumentStatus, Fetched};
use knowledge_harness::pipeline::{EmbeddingPipeline, PipelineSettings};
use knowledge_harness::records::RecordStore;
use knowledge_harness::source::DocumentSource;
use knowledge_harness::vector::{MemoryIndex, VectorIndex};

pub fn test_config(tmp: &TempDir) -> Config {
    let toml_str = format!(
        "[db]\npath = \"{}\"\n",
        tmp.path().join("data").join("kh.sqlite").display()
    );
    toml::from_str(&toml_str).unwrap()
}

pub async fn record_store(tmp: &TempDir) -> RecordStore {
    let config = test_config(tmp);
    let pool = knowledge_harness::db::connect(&config).await.unwrap();
    knowledge_harness::migrate::apply(&pool).await.unwrap();
    RecordStore::new(pool)
}

pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        max_chars: 8190,
        chunk_size: 500,
        workers: 4,
        chunk_sleep: Duration::ZERO,
    }
}

/// Knowledge base on a temp SQLite record store and an in-memory index.
pub async fn knowledge_base(tmp: &TempDir, similarity_floor: f32) -> KnowledgeBase {
    knowledge_base_over(tmp, Arc::new(MemoryIndex::new("kh")), similarity_floor).await
}

pub async fn knowledge_base_over(
    tmp: &TempDir,
    index: Arc<dyn VectorIndex>,
    similarity_floor: f32,
) -> KnowledgeBase {
    let records = record_store(tmp).await;
    let pipeline = EmbeddingPipeline::new(Arc::new(VectorTextEmbedder), index, fast_settings());
    KnowledgeBase::new(records, pipeline, similarity_floor, 5)
}

pub fn sync_settings() -> SyncConfig {
    SyncConfig {
        ignore_labels: vec!["kb-ignore".to_string()],
        overlap_minutes: 15,
        fetch_workers: 4,
    }
}

/// Reads a vector straight out of the text: the `Content:` line of an
/// LLM-formatted document, or the whole text for a query. Numbers are
/// comma-separated; anything unparseable embeds as `[1, 1, 1]`.
pub struct VectorTextEmbedder;

#[async_trait]
impl Embedder for VectorTextEmbedder {
    fn model_name(&self) -> &str {
        "vector-text"
    }

    fn service_key(&self) -> &str {
        "embedding:test"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let payload = text
            .lines()
            .find_map(|l| l.strip_prefix("Content: "))
            .unwrap_or(text);
        let parsed: std::result::Result<Vec<f32>, _> =
            payload.split(',').map(|p| p.trim().parse::<f32>()).collect();
        Ok(parsed.unwrap_or_else(|_| vec![1.0, 1.0, 1.0]))
    }
}

/// Calls observed across the fake source and a [`RecordingIndex`], in order.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Memory index that appends its writes to an [`EventLog`].
pub struct RecordingIndex {
    inner: MemoryIndex,
    events: EventLog,
}

impl RecordingIndex {
    pub fn new(events: EventLog) -> Self {
        Self {
            inner: MemoryIndex::new("kh"),
            events,
        }
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl VectorIndex for RecordingIndex {
    async fn upsert(&self, collection: &str, items: &[(String, Vec<f32>)]) -> Result<usize> {
        let ids: Vec<&str> = items.iter().map(|(id, _)| id.as_str()).collect();
        self.log(format!("upsert:{}", ids.join(",")));
        self.inner.upsert(collection, items).await
    }

    async fn retrieve_neighbor_ids(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        similarity_floor: f32,
    ) -> Result<Vec<String>> {
        self.inner
            .retrieve_neighbor_ids(collection, query, k, similarity_floor)
            .await
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        self.log(format!("delete:{}", ids.join(",")));
        self.inner.delete(collection, ids).await
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.inner.count(collection).await
    }

    async fn all_embeddings(&self, collection: &str) -> Result<HashMap<String, Vec<f32>>> {
        self.inner.all_embeddings(collection).await
    }
}

pub fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
}

pub fn doc(id: &str, container_key: &str, content: &str, modified: DateTime<Utc>) -> Document {
    Document {
        id: id.to_string(),
        container_key: container_key.to_string(),
        title: format!("Title {id}"),
        author: "tester".to_string(),
        content: content.to_string(),
        annotations: String::new(),
        created_at: ts(0, 0),
        last_modified_at: modified,
    }
}

struct FakeDoc {
    doc: Document,
    labels: Vec<String>,
    inaccessible: bool,
    archived: bool,
}

struct FakeContainer {
    name: String,
    archived: bool,
    inaccessible: bool,
    docs: BTreeMap<String, FakeDoc>,
}

#[derive(Default)]
struct FakeState {
    containers: BTreeMap<String, FakeContainer>,
    fetched: Vec<String>,
    since_queries: Vec<(String, DateTime<Utc>)>,
    listed_at: Vec<DateTime<Utc>>,
}

/// Scriptable in-memory document source.
#[derive(Default)]
pub struct FakeSource {
    state: Mutex<FakeState>,
    events: EventLog,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Log shared with anything that should interleave with source calls.
    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    pub fn add_container(&self, key: &str, name: &str) {
        self.state.lock().unwrap().containers.insert(
            key.to_string(),
            FakeContainer {
                name: name.to_string(),
                archived: false,
                inaccessible: false,
                docs: BTreeMap::new(),
            },
        );
    }

    pub fn put(&self, doc: Document) {
        let mut state = self.state.lock().unwrap();
        let container = state.containers.get_mut(&doc.container_key).unwrap();
        container.docs.insert(
            doc.id.clone(),
            FakeDoc {
                doc,
                labels: Vec::new(),
                inaccessible: false,
                archived: false,
            },
        );
    }

    pub fn remove(&self, container_key: &str, id: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .containers
            .get_mut(container_key)
            .unwrap()
            .docs
            .remove(id);
    }

    fn with_doc(&self, container_key: &str, id: &str, f: impl FnOnce(&mut FakeDoc)) {
        let mut state = self.state.lock().unwrap();
        let doc = state
            .containers
            .get_mut(container_key)
            .unwrap()
            .docs
            .get_mut(id)
            .unwrap();
        f(doc);
    }

    pub fn label(&self, container_key: &str, id: &str, label: &str) {
        self.with_doc(container_key, id, |d| d.labels.push(label.to_string()));
    }

    pub fn deny(&self, container_key: &str, id: &str) {
        self.with_doc(container_key, id, |d| d.inaccessible = true);
    }

    pub fn archive_doc(&self, container_key: &str, id: &str) {
        self.with_doc(container_key, id, |d| d.archived = true);
    }

    pub fn archive_container(&self, key: &str) {
        self.state.lock().unwrap().containers.get_mut(key).unwrap().archived = true;
    }

    pub fn deny_container(&self, key: &str) {
        self.state.lock().unwrap().containers.get_mut(key).unwrap().inaccessible = true;
    }

    pub fn fetched(&self) -> Vec<String> {
        self.state.lock().unwrap().fetched.clone()
    }

    pub fn clear_fetched(&self) {
        self.state.lock().unwrap().fetched.clear();
    }

    pub fn since_queries(&self) -> Vec<(String, DateTime<Utc>)> {
        self.state.lock().unwrap().since_queries.clone()
    }

    pub fn listed_at(&self) -> Vec<DateTime<Utc>> {
        self.state.lock().unwrap().listed_at.clone()
    }

    fn container<'a>(state: &'a FakeState, key: &str) -> Result<&'a FakeContainer> {
        match state.containers.get(key) {
            Some(c) if !c.inaccessible => Ok(c),
            _ => Err(Error::InaccessibleContainer {
                container: key.to_string(),
            }),
        }
    }
}

#[async_trait]
impl DocumentSource for FakeSource {
    async fn list_ids(&self, container_key: &str, status: DocumentStatus) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.listed_at.push(Utc::now());
        let want_archived = status == DocumentStatus::Archived;
        let container = Self::container(&state, container_key)?;
        Ok(container
            .docs
            .values()
            .filter(|d| d.archived == want_archived)
            .map(|d| d.doc.id.clone())
            .collect())
    }

    async fn list_ids_by_label(
        &self,
        container_key: &str,
        labels: &[String],
    ) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let container = Self::container(&state, container_key)?;
        Ok(container
            .docs
            .values()
            .filter(|d| d.labels.iter().any(|l| labels.contains(l)))
            .map(|d| d.doc.id.clone())
            .collect())
    }

    async fn list_ids_modified_since(
        &self,
        container_key: &str,
        since: DateTime<Utc>,
        ignore_labels: &[String],
    ) -> Result<Vec<String>> {
        self.events.lock().unwrap().push(format!("since:{container_key}"));
        let mut state = self.state.lock().unwrap();
        state.since_queries.push((container_key.to_string(), since));
        let container = Self::container(&state, container_key)?;
        Ok(container
            .docs
            .values()
            .filter(|d| !d.archived && d.doc.last_modified_at >= since)
            .filter(|d| !d.labels.iter().any(|l| ignore_labels.contains(l)))
            .map(|d| d.doc.id.clone())
            .collect())
    }

    async fn fetch(&self, id: &str, container_key: &str) -> Result<Fetched> {
        self.events.lock().unwrap().push(format!("fetch:{id}"));
        let mut state = self.state.lock().unwrap();
        state.fetched.push(id.to_string());
        let container = Self::container(&state, container_key)?;
        Ok(match container.docs.get(id) {
            Some(d) if !d.inaccessible => Fetched::Document(d.doc.clone()),
            _ => Fetched::Inaccessible {
                container_key: container_key.to_string(),
                id: id.to_string(),
            },
        })
    }

    async fn list_containers(&self, status: ContainerStatus) -> Result<Vec<ContainerInfo>> {
        let state = self.state.lock().unwrap();
        let want_archived = status == ContainerStatus::Archived;
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| c.archived == want_archived)
            .map(|(key, c)| ContainerInfo {
                key: key.clone(),
                name: c.name.clone(),
                status,
            })
            .collect())
    }
}
