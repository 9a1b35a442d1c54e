//! Dedup cache: the set of video ids that were already published.
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::Mutex;

/// Membership test and insert for already-forwarded ids.
///
/// Implementations must make `add` idempotent and must be safe to share
/// between workers. The worker never removes or lists entries.
#[async_trait]
pub trait DedupCache: Send + Sync {
    async fn exists(&self, id: &str) -> Result<bool>;

    async fn add(&self, id: &str) -> Result<()>;
}

/// Process-local cache. Forgets everything on restart.
#[derive(Debug, Default)]
pub struct MemoryCache {
    ids: Mutex<HashSet<String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Mutex::new(ids.into_iter().map(Into::into).collect()),
        }
    }

    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }
}

#[async_trait]
impl DedupCache for MemoryCache {
    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.ids.lock().await.contains(id))
    }

    async fn add(&self, id: &str) -> Result<()> {
        self.ids.lock().await.insert(id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_is_idempotent() {
        let cache = MemoryCache::new();
        assert!(!cache.exists("a1").await.unwrap());
        cache.add("a1").await.unwrap();
        cache.add("a1").await.unwrap();
        assert!(cache.exists("a1").await.unwrap());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn seeded_ids_are_present() {
        let cache = MemoryCache::with_ids(["a1", "b1"]);
        assert!(cache.exists("b1").await.unwrap());
        assert!(!cache.exists("c1").await.unwrap());
    }
}
