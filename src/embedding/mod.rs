//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance.
//! - **`LocalEmbedder`**: in-process fastembed inference (feature `local-embeddings-fastembed`).
//!
//! Providers make exactly one request per call and report HTTP 429 as
//! [`Error::RateLimited`]. Retrying is not their job: [`create_embedder`]
//! wraps every enabled provider in a [`CooldownEmbedder`], which backs off
//! through the shared [`ServiceCooldown`] under the key
//! `embedding:<provider>`.
//!
//! Also provides vector utilities:
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::cooldown::ServiceCooldown;
use crate::error::{Error, Result};

/// Turns one piece of text into one vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Cooldown key shared by every caller of the same external service.
    fn service_key(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[async_trait]
impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn service_key(&self) -> &str {
        (**self).service_key()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text).await
    }
}

// ============ Disabled Provider ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn service_key(&self) -> &str {
        "embedding:disabled"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(anyhow::anyhow!("Embedding provider is disabled").into())
    }
}

// ============ OpenAI Provider ============

/// Calls `POST https://api.openai.com/v1/embeddings`. Reads the API key
/// from `OPENAI_API_KEY`.
pub struct OpenAIEmbedder {
    client: Client,
    model: String,
    api_key: String,
    url: String,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string());

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            api_key,
            url,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn service_key(&self) -> &str {
        "embedding:openai"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let json = check_response(response, self.service_key(), "OpenAI").await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .pointer("/data/0/embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ Ollama Provider ============

/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: Client,
    model: String,
    url: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, model, url })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn service_key(&self) -> &str {
        "embedding:ollama"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        let json = check_response(response, self.service_key(), "Ollama").await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .pointer("/embeddings/0")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

/// Turn a non-success status into an error, 429 into [`Error::RateLimited`].
async fn check_response(
    response: reqwest::Response,
    service_key: &str,
    api: &str,
) -> Result<serde_json::Value> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body_text = response.text().await.unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::RateLimited {
            service: service_key.to_string(),
            message: body_text,
        });
    }
    Err(anyhow::anyhow!("{} API error {}: {}", api, status, body_text).into())
}

// ============ Local Provider (fastembed) ============

/// In-process inference. Models are downloaded from Hugging Face on first
/// use and cached; after that no network calls are made.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let fastembed_model = config_to_fastembed_model(&model_name)?;

        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            model_name,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => Err(anyhow::anyhow!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5",
            other
        )
        .into()),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn service_key(&self) -> &str {
        "embedding:local"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();

        let mut embeddings = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            model
                .embed(vec![text], Some(1))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await
        .map_err(|e| anyhow::anyhow!("Local embedding task failed: {}", e))??;

        Ok(embeddings.pop().unwrap_or_default())
    }
}

// ============ Cooldown decorator ============

/// Runs every call of the wrapped provider through the service cooldown,
/// keyed by the provider's [`service_key`](Embedder::service_key).
pub struct CooldownEmbedder<E> {
    inner: E,
    cooldown: ServiceCooldown,
}

impl<E: Embedder> CooldownEmbedder<E> {
    pub fn new(inner: E, cooldown: ServiceCooldown) -> Self {
        Self { inner, cooldown }
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CooldownEmbedder<E> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn service_key(&self) -> &str {
        self.inner.service_key()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.cooldown
            .call(self.inner.service_key(), || self.inner.embed(text))
            .await
    }
}

/// Create the appropriate [`Embedder`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (requires `local-embeddings-fastembed`) |
///
/// Every enabled provider comes back wrapped in a [`CooldownEmbedder`].
pub fn create_embedder(
    config: &EmbeddingConfig,
    cooldown: &ServiceCooldown,
) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(CooldownEmbedder::new(
            OpenAIEmbedder::new(config)?,
            cooldown.clone(),
        ))),
        "ollama" => Ok(Arc::new(CooldownEmbedder::new(
            OllamaEmbedder::new(config)?,
            cooldown.clone(),
        ))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(CooldownEmbedder::new(
            LocalEmbedder::new(config)?,
            cooldown.clone(),
        ))),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(anyhow::anyhow!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        )
        .into()),
        other => Err(anyhow::anyhow!("Unknown embedding provider: {}", other).into()),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use knowledge_harness::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
