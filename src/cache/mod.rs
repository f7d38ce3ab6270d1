//! Named cache buckets behind an injected capability.
//!
//! The controller never reaches for ambient global storage: everything goes
//! through a [`CacheStore`] handed to it at construction, which makes the
//! strategies testable against [`MemoryCacheStore`].
//!
//! ## Contract
//!
//! - A bucket maps a [`RequestKey`] (GET + URL) to a response snapshot.
//! - [`Bucket::put`] is atomic per key; concurrent writers to the same key
//!   leave exactly one of their values behind.
//! - [`Bucket::put_all`] writes every entry or none.
//! - Reads return independent snapshots; callers own what they get back.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::BoxFuture;
use crate::http::{Method, Request, Response};

pub mod memory;
pub mod version;

pub use memory::{MemoryBucket, MemoryCacheStore};
pub use version::{BucketName, CleanupScope};

/// Errors surfaced by cache storage.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("quota exceeded for bucket {bucket} ({limit} entries)")]
    QuotaExceeded { bucket: String, limit: usize },

    #[error("cache storage unavailable: {0}")]
    Unavailable(String),
}

/// Identity of a cached request.
///
/// Only GET requests have one. The fragment is not part of the identity, the
/// query string is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    url: String,
}

impl RequestKey {
    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self { url: url.into() }
    }

    /// Key for `request`, or `None` when its method is not GET.
    pub fn from_request(request: &Request) -> Option<Self> {
        (request.method() == &Method::Get).then(|| Self::get(request.url()))
    }

    pub fn method(&self) -> Method {
        Method::Get
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GET {}", self.url)
    }
}

/// A single named bucket.
pub trait Bucket: Send + Sync {
    fn name(&self) -> &str;

    /// Looks up `key`, returning a snapshot of the stored response.
    fn get<'a>(&'a self, key: &'a RequestKey) -> BoxFuture<'a, Result<Option<Response>, CacheError>>;

    /// Stores `response` under `key`, replacing any previous entry.
    fn put(&self, key: RequestKey, response: Response) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Stores every entry, or none of them if any write would fail.
    fn put_all(
        &self,
        entries: Vec<(RequestKey, Response)>,
    ) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Removes `key`. Returns `true` if an entry was removed.
    fn delete<'a>(&'a self, key: &'a RequestKey) -> BoxFuture<'a, Result<bool, CacheError>>;

    fn keys(&self) -> BoxFuture<'_, Result<Vec<RequestKey>, CacheError>>;
}

/// The registry of named buckets (the browser's `caches` object).
pub trait CacheStore: Send + Sync {
    /// Opens `name`, creating an empty bucket if it does not exist.
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Arc<dyn Bucket>, CacheError>>;

    /// Returns the bucket called `name` without creating it.
    fn bucket<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<Arc<dyn Bucket>>, CacheError>>;

    /// Deletes `name` and all of its entries. Returns `true` if it existed.
    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>>;

    /// Bucket names in creation order.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>>;

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move { Ok(self.bucket(name).await?.is_some()) })
    }

    /// Searches every bucket, oldest first, for `key`.
    fn match_request<'a>(
        &'a self,
        key: &'a RequestKey,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        Box::pin(async move {
            for name in self.keys().await? {
                // Deleted between `keys` and here.
                let Some(bucket) = self.bucket(&name).await? else {
                    continue;
                };
                if let Some(hit) = bucket.get(key).await? {
                    return Ok(Some(hit));
                }
            }
            Ok(None)
        })
    }

    /// Looks in `preferred` first, then in every other bucket oldest first.
    fn match_preferring<'a>(
        &'a self,
        preferred: &'a str,
        key: &'a RequestKey,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        Box::pin(async move {
            if let Some(bucket) = self.bucket(preferred).await? {
                if let Some(hit) = bucket.get(key).await? {
                    return Ok(Some(hit));
                }
            }
            for name in self.keys().await? {
                if name == preferred {
                    continue;
                }
                let Some(bucket) = self.bucket(&name).await? else {
                    continue;
                };
                if let Some(hit) = bucket.get(key).await? {
                    return Ok(Some(hit));
                }
            }
            Ok(None)
        })
    }
}
