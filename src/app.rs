//! Wiring: build the knowledge base and sync engine from a [`Config`].

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::Config;
use crate::cooldown::{ServiceCooldown, SqliteCooldownStorage};
use crate::embedding::create_embedder;
use crate::knowledge::KnowledgeBase;
use crate::pipeline::{EmbeddingPipeline, PipelineSettings};
use crate::records::RecordStore;
use crate::source::{DocumentSource, FilesystemSource};
use crate::sync::SyncEngine;
use crate::vector::create_index;
use crate::{db, migrate};

pub struct Harness {
    pub config: Config,
    pub pool: SqlitePool,
    pub cooldown: ServiceCooldown,
    pub knowledge: KnowledgeBase,
}

impl Harness {
    /// Connect to the database, make sure the schema exists, and build the
    /// configured embedder and vector backend.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::apply(&pool).await?;

        let cooldown = ServiceCooldown::new(
            Arc::new(SqliteCooldownStorage::new(pool.clone())),
            config.cooldown.clone(),
        );
        let embedder = create_embedder(&config.embedding, &cooldown)?;
        let index = create_index(&config, &pool, &cooldown)?;
        let pipeline =
            EmbeddingPipeline::new(embedder, index, PipelineSettings::from(&config.embedding));

        let knowledge = KnowledgeBase::new(
            RecordStore::new(pool.clone()),
            pipeline,
            config.vector.similarity_floor,
            config.retrieval.context_documents,
        );

        Ok(Self {
            config,
            pool,
            cooldown,
            knowledge,
        })
    }

    /// The configured document source. Fails when `[source]` is missing.
    pub fn source(&self) -> Result<Arc<dyn DocumentSource>> {
        let source_config = self
            .config
            .source
            .as_ref()
            .context("No [source] section configured")?;
        Ok(Arc::new(FilesystemSource::new(source_config)?))
    }

    pub fn sync_engine(&self) -> Result<SyncEngine> {
        Ok(SyncEngine::new(
            self.knowledge.clone(),
            self.source()?,
            self.config.sync.clone(),
        ))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
