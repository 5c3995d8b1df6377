//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. [`load_config`] reads and validates the file; tests usually build a
//! [`Config`] straight from a TOML string with `toml::from_str`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub source: Option<SourceConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_vector_backend")]
    pub backend: String,
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
    #[serde(default)]
    pub similarity_floor: f32,
    #[serde(default)]
    pub qdrant_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            collection_prefix: default_collection_prefix(),
            similarity_floor: 0.0,
            qdrant_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_vector_backend() -> String {
    "sqlite".to_string()
}
fn default_collection_prefix() -> String {
    "kh".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_chunk_sleep_secs")]
    pub chunk_sleep_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_timeout_secs(),
            max_chars: default_max_chars(),
            chunk_size: default_chunk_size(),
            workers: default_workers(),
            chunk_sleep_secs: default_chunk_sleep_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn chunk_sleep(&self) -> Duration {
        Duration::from_secs(self.chunk_sleep_secs)
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_chars() -> usize {
    8190
}
fn default_chunk_size() -> usize {
    500
}
fn default_workers() -> usize {
    10
}
fn default_chunk_sleep_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_ignore_labels")]
    pub ignore_labels: Vec<String>,
    #[serde(default = "default_overlap_minutes")]
    pub overlap_minutes: i64,
    #[serde(default = "default_workers")]
    pub fetch_workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ignore_labels: default_ignore_labels(),
            overlap_minutes: default_overlap_minutes(),
            fetch_workers: default_workers(),
        }
    }
}

impl SyncConfig {
    pub fn overlap(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.overlap_minutes)
    }
}

fn default_ignore_labels() -> Vec<String> {
    vec!["kb-ignore".to_string()]
}
fn default_overlap_minutes() -> i64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_context_documents")]
    pub context_documents: usize,
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            context_documents: default_context_documents(),
            context_budget: default_context_budget(),
        }
    }
}

fn default_context_documents() -> usize {
    5
}
fn default_context_budget() -> usize {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CooldownConfig {
    #[serde(default = "default_initial_seconds")]
    pub initial_seconds: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_recovery_factor")]
    pub recovery_factor: f64,
    #[serde(default = "default_exp_base")]
    pub exp_base: f64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            initial_seconds: default_initial_seconds(),
            max_attempts: default_max_attempts(),
            recovery_factor: default_recovery_factor(),
            exp_base: default_exp_base(),
        }
    }
}

fn default_initial_seconds() -> f64 {
    5.0
}
fn default_max_attempts() -> u32 {
    5
}
fn default_recovery_factor() -> f64 {
    0.5
}
fn default_exp_base() -> f64 {
    1.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.vector.backend.as_str() {
        "sqlite" | "memory" => {}
        "qdrant" => {
            if config.vector.qdrant_url.is_none() {
                anyhow::bail!("vector.qdrant_url must be set when backend is 'qdrant'");
            }
        }
        other => anyhow::bail!(
            "Unknown vector backend: '{}'. Must be sqlite, memory, or qdrant.",
            other
        ),
    }

    if config.vector.collection_prefix.trim().is_empty() {
        anyhow::bail!("vector.collection_prefix must not be empty");
    }

    if !(-1.0..=1.0).contains(&config.vector.similarity_floor) {
        anyhow::bail!("vector.similarity_floor must be in [-1.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    if config.embedding.chunk_size == 0 || config.embedding.workers == 0 {
        anyhow::bail!("embedding.chunk_size and embedding.workers must be > 0");
    }

    if config.embedding.max_chars == 0 {
        anyhow::bail!("embedding.max_chars must be > 0");
    }

    if config.sync.fetch_workers == 0 {
        anyhow::bail!("sync.fetch_workers must be > 0");
    }

    if config.sync.overlap_minutes < 0 {
        anyhow::bail!("sync.overlap_minutes must be >= 0");
    }

    if config.retrieval.context_documents == 0 {
        anyhow::bail!("retrieval.context_documents must be >= 1");
    }

    if config.cooldown.max_attempts == 0 {
        anyhow::bail!("cooldown.max_attempts must be >= 1");
    }

    if config.cooldown.exp_base < 1.0 {
        anyhow::bail!("cooldown.exp_base must be >= 1.0");
    }

    if config.cooldown.recovery_factor < 0.0 || config.cooldown.initial_seconds < 0.0 {
        anyhow::bail!("cooldown.recovery_factor and cooldown.initial_seconds must be >= 0");
    }

    match config.logging.format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("Unknown logging format: '{}'. Must be text or json.", other),
    }

    Ok(())
}
