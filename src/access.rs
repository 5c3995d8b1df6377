//! Per-principal document visibility.
//!
//! An [`AccessPolicy`] narrows a candidate id set to the ids the requesting
//! principal may see. Real policies usually ask the document source, so the
//! check is async and may fail.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::Result;

#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn accessible_ids(&self, ids: &[String]) -> Result<HashSet<String>>;
}

/// Sees everything.
pub struct AllowAll;

#[async_trait]
impl AccessPolicy for AllowAll {
    async fn accessible_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        Ok(ids.iter().cloned().collect())
    }
}

/// Sees only the listed ids.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    allowed: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl AccessPolicy for AllowList {
    async fn accessible_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        Ok(ids
            .iter()
            .filter(|id| self.allowed.contains(*id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_list_intersects_candidates() {
        let policy = AllowList::new(["1", "3"]);
        let ids: Vec<String> = vec!["1".into(), "2".into()];
        let visible = policy.accessible_ids(&ids).await.unwrap();
        assert_eq!(visible, HashSet::from(["1".to_string()]));
    }
}
