//! [`VectorIndex`] on a Qdrant server, over its REST API.
//!
//! Qdrant point ids must be integers or UUIDs, so each item id is mapped to
//! a UUID built from the first 16 bytes of its SHA-256 digest; the original
//! id travels in the point payload under `item_id` and is what callers see.
//! Collections use cosine distance. Upserts are sent in batches of 100 with
//! `wait=true` so a returned count already reflects them.
//!
//! HTTP 429 maps to [`Error::RateLimited`]; wrap the index in
//! [`CooldownIndex`](super::CooldownIndex) to back off on it.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::{check_dims, internal_name, normalize, VectorIndex};
use crate::config::VectorConfig;
use crate::error::{Error, Result};

const UPSERT_BATCH: usize = 100;
const SCROLL_PAGE: usize = 100;
const SERVICE: &str = "vector:qdrant";

pub struct QdrantIndex {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    prefix: String,
}

impl QdrantIndex {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let base_url = config
            .qdrant_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("vector.qdrant_url required for qdrant backend"))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var("QDRANT_API_KEY").ok(),
            prefix: config.collection_prefix.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let request = match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited {
                service: SERVICE.to_string(),
                message: body,
            });
        }
        Err(anyhow::anyhow!("Qdrant API error {}: {}", status, body).into())
    }

    /// Vector size of the collection, or `None` if it does not exist.
    async fn collection_dims(&self, name: &str) -> Result<Option<usize>> {
        let mut request = self.client.get(self.url(&format!("/collections/{name}")));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited {
                service: SERVICE.to_string(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Qdrant API error {}: {}", status, body).into());
        }

        let json: Value = response.json().await?;
        let size = json
            .pointer("/result/config/params/vectors/size")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow::anyhow!("Invalid Qdrant response: missing vector size"))?;
        Ok(Some(size as usize))
    }

    async fn create_collection(&self, name: &str, dims: usize) -> Result<()> {
        let body = json!({ "vectors": { "size": dims, "distance": "Cosine" } });
        self.send(
            self.client
                .put(self.url(&format!("/collections/{name}")))
                .json(&body),
        )
        .await?;
        tracing::info!(collection = name, dims, "created qdrant collection");
        Ok(())
    }

    async fn count_internal(&self, name: &str) -> Result<usize> {
        let json = self
            .send(
                self.client
                    .post(self.url(&format!("/collections/{name}/points/count")))
                    .json(&json!({ "exact": true })),
            )
            .await?;
        let count = json
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow::anyhow!("Invalid Qdrant response: missing count"))?;
        Ok(count as usize)
    }
}

/// Deterministic Qdrant point id for an item id.
pub fn point_id(item_id: &str) -> String {
    let digest = Sha256::digest(item_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

fn payload_item_id(point: &Value) -> Option<String> {
    point
        .pointer("/payload/item_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_vector(value: &Value) -> Vec<f32> {
    value
        .as_array()
        .map(|a| a.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
        .unwrap_or_default()
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, collection: &str, items: &[(String, Vec<f32>)]) -> Result<usize> {
        let name = internal_name(&self.prefix, collection);
        let Some((_, first)) = items.first() else {
            return match self.collection_dims(&name).await? {
                Some(_) => self.count_internal(&name).await,
                None => Ok(0),
            };
        };

        let dims = match self.collection_dims(&name).await? {
            Some(dims) => dims,
            None => {
                self.create_collection(&name, first.len()).await?;
                first.len()
            }
        };
        check_dims(&name, dims, items)?;

        for batch in items.chunks(UPSERT_BATCH) {
            let points: Vec<Value> = batch
                .iter()
                .map(|(id, vector)| {
                    json!({
                        "id": point_id(id),
                        "vector": normalize(vector),
                        "payload": { "item_id": id },
                    })
                })
                .collect();

            self.send(
                self.client
                    .put(self.url(&format!("/collections/{name}/points?wait=true")))
                    .json(&json!({ "points": points })),
            )
            .await?;
        }

        self.count_internal(&name).await
    }

    async fn retrieve_neighbor_ids(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        similarity_floor: f32,
    ) -> Result<Vec<String>> {
        let name = internal_name(&self.prefix, collection);
        let dims = self
            .collection_dims(&name)
            .await?
            .ok_or_else(|| Error::CollectionNotFound {
                collection: collection.to_string(),
            })?;

        if query.len() != dims {
            return Err(Error::DimensionMismatch {
                collection: name,
                expected: dims,
                found: query.len(),
            });
        }
        // Qdrant rejects a zero limit.
        if k == 0 {
            return Ok(Vec::new());
        }

        let body = json!({
            "vector": normalize(query),
            "limit": k,
            "score_threshold": similarity_floor,
            "with_payload": true,
        });
        let json = self
            .send(
                self.client
                    .post(self.url(&format!("/collections/{name}/points/search")))
                    .json(&body),
            )
            .await?;

        let hits = json
            .get("result")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow::anyhow!("Invalid Qdrant response: missing result array"))?;

        Ok(hits.iter().filter_map(payload_item_id).collect())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        let name = internal_name(&self.prefix, collection);
        if ids.is_empty() || self.collection_dims(&name).await?.is_none() {
            return Ok(());
        }

        let points: Vec<String> = ids.iter().map(|id| point_id(id)).collect();
        self.send(
            self.client
                .post(self.url(&format!("/collections/{name}/points/delete?wait=true")))
                .json(&json!({ "points": points })),
        )
        .await?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let name = internal_name(&self.prefix, collection);
        if self.collection_dims(&name).await?.is_none() {
            return Ok(0);
        }
        self.count_internal(&name).await
    }

    async fn all_embeddings(&self, collection: &str) -> Result<HashMap<String, Vec<f32>>> {
        let name = internal_name(&self.prefix, collection);
        let mut embeddings = HashMap::new();
        if self.collection_dims(&name).await?.is_none() {
            return Ok(embeddings);
        }

        let mut offset = Value::Null;
        loop {
            let body = json!({
                "limit": SCROLL_PAGE,
                "offset": offset,
                "with_vector": true,
                "with_payload": true,
            });
            let json = self
                .send(
                    self.client
                        .post(self.url(&format!("/collections/{name}/points/scroll")))
                        .json(&body),
                )
                .await?;

            let points = json
                .pointer("/result/points")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow::anyhow!("Invalid Qdrant response: missing points"))?;

            for point in points {
                if let Some(id) = payload_item_id(point) {
                    let vector = point.get("vector").map(parse_vector).unwrap_or_default();
                    embeddings.insert(id, vector);
                }
            }

            match json.pointer("/result/next_page_offset") {
                Some(next) if !next.is_null() => offset = next.clone(),
                _ => break,
            }
        }

        Ok(embeddings)
    }
}
