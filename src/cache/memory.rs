//! In-memory [`CacheStore`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{Bucket, CacheError, CacheStore, RequestKey};
use crate::BoxFuture;
use crate::http::Response;

/// A bucket held in process memory.
#[derive(Debug)]
pub struct MemoryBucket {
    name: String,
    quota: Option<usize>,
    entries: RwLock<HashMap<RequestKey, Response>>,
}

impl MemoryBucket {
    fn new(name: String, quota: Option<usize>) -> Self {
        Self {
            name,
            quota,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn quota_exceeded(&self, limit: usize) -> CacheError {
        CacheError::QuotaExceeded {
            bucket: self.name.clone(),
            limit,
        }
    }
}

impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn get<'a>(&'a self, key: &'a RequestKey) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            Ok(entries.get(key).map(Response::duplicate))
        })
    }

    fn put(&self, key: RequestKey, response: Response) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            if let Some(limit) = self.quota {
                if !entries.contains_key(&key) && entries.len() >= limit {
                    return Err(self.quota_exceeded(limit));
                }
            }
            entries.insert(key, response);
            Ok(())
        })
    }

    fn put_all(
        &self,
        batch: Vec<(RequestKey, Response)>,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            if let Some(limit) = self.quota {
                let mut fresh: Vec<&RequestKey> = batch
                    .iter()
                    .map(|(k, _)| k)
                    .filter(|k| !entries.contains_key(*k))
                    .collect();
                fresh.sort();
                fresh.dedup();
                if entries.len() + fresh.len() > limit {
                    return Err(self.quota_exceeded(limit));
                }
            }
            entries.extend(batch);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a RequestKey) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move { Ok(self.entries.write().await.remove(key).is_some()) })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<RequestKey>, CacheError>> {
        Box::pin(async move {
            let mut keys: Vec<RequestKey> = self.entries.read().await.keys().cloned().collect();
            keys.sort();
            Ok(keys)
        })
    }
}

/// A [`CacheStore`] that keeps every bucket in memory.
///
/// Cloning yields another handle to the same buckets, so a test can keep one
/// handle for assertions while the controller owns another.
///
/// ```
/// use offline_cache::cache::{CacheStore, MemoryCacheStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryCacheStore::new();
/// store.open("copycash-v1").await.unwrap();
/// assert_eq!(store.keys().await.unwrap(), vec!["copycash-v1".to_string()]);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    buckets: Arc<RwLock<Vec<Arc<MemoryBucket>>>>,
    quota: Option<usize>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits every bucket to `entries` entries; writes beyond that fail with
    /// [`CacheError::QuotaExceeded`].
    pub fn with_quota(entries: usize) -> Self {
        Self {
            buckets: Arc::default(),
            quota: Some(entries),
        }
    }
}

impl CacheStore for MemoryCacheStore {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Arc<dyn Bucket>, CacheError>> {
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            if let Some(existing) = buckets.iter().find(|b| b.name == name) {
                return Ok(Arc::clone(existing) as Arc<dyn Bucket>);
            }
            let bucket = Arc::new(MemoryBucket::new(name.to_owned(), self.quota));
            buckets.push(Arc::clone(&bucket));
            Ok(bucket as Arc<dyn Bucket>)
        })
    }

    fn bucket<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<Arc<dyn Bucket>>, CacheError>> {
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            Ok(buckets
                .iter()
                .find(|b| b.name == name)
                .map(|b| Arc::clone(b) as Arc<dyn Bucket>))
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            let before = buckets.len();
            buckets.retain(|b| b.name != name);
            Ok(buckets.len() < before)
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            Ok(buckets.iter().map(|b| b.name.clone()).collect())
        })
    }
}
