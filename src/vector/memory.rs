//! In-memory [`VectorIndex`] for tests and throwaway deployments.
//!
//! Collections live in a `BTreeMap` behind `std::sync::RwLock`, so neighbor
//! ties resolve in ascending id order. Search is brute-force.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{check_dims, internal_name, normalize, rank, VectorIndex};
use crate::error::{Error, Result};

struct Collection {
    dims: usize,
    entries: BTreeMap<String, Vec<f32>>,
}

pub struct MemoryIndex {
    prefix: String,
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryIndex {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            collections: RwLock::new(HashMap::new()),
        }
    }
}

fn poisoned() -> Error {
    anyhow::anyhow!("vector index lock poisoned").into()
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, collection: &str, items: &[(String, Vec<f32>)]) -> Result<usize> {
        let name = internal_name(&self.prefix, collection);
        let mut collections = self.collections.write().map_err(|_| poisoned())?;

        let Some((_, first)) = items.first() else {
            return Ok(collections.get(&name).map_or(0, |c| c.entries.len()));
        };

        let dims = collections.get(&name).map_or(first.len(), |c| c.dims);
        check_dims(&name, dims, items)?;

        let coll = collections.entry(name).or_insert_with(|| Collection {
            dims,
            entries: BTreeMap::new(),
        });

        for (id, vector) in items {
            coll.entries.insert(id.clone(), normalize(vector));
        }
        Ok(coll.entries.len())
    }

    async fn retrieve_neighbor_ids(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        similarity_floor: f32,
    ) -> Result<Vec<String>> {
        let name = internal_name(&self.prefix, collection);
        let collections = self.collections.read().map_err(|_| poisoned())?;
        let coll = collections
            .get(&name)
            .ok_or_else(|| Error::CollectionNotFound {
                collection: collection.to_string(),
            })?;

        if query.len() != coll.dims {
            return Err(Error::DimensionMismatch {
                collection: name,
                expected: coll.dims,
                found: query.len(),
            });
        }

        Ok(rank(&normalize(query), &coll.entries, k, similarity_floor))
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        let name = internal_name(&self.prefix, collection);
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        if let Some(coll) = collections.get_mut(&name) {
            for id in ids {
                coll.entries.remove(id);
            }
        }
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let name = internal_name(&self.prefix, collection);
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections.get(&name).map_or(0, |c| c.entries.len()))
    }

    async fn all_embeddings(&self, collection: &str) -> Result<HashMap<String, Vec<f32>>> {
        let name = internal_name(&self.prefix, collection);
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections
            .get(&name)
            .map(|c| {
                c.entries
                    .iter()
                    .map(|(id, v)| (id.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
