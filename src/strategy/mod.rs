//! Fetch strategies.
//!
//! | Classification   | Strategy                                         |
//! |------------------|--------------------------------------------------|
//! | `Document`       | network-first, cached page, offline document     |
//! | `RuntimeStatic`  | cache-first, refreshed in the background         |
//! | `Passthrough`    | network, cache as a last resort                  |
//!
//! Any path that both returns a response and writes it to the bucket calls
//! [`Response::duplicate`] first; the copy goes to the bucket and the
//! original goes to the caller. Cache write failures are logged and never
//! change the response the caller receives.

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::cache::{BucketName, CacheStore, RequestKey};
use crate::classify::Classification;
use crate::event::Lifetime;
use crate::http::{Request, Response, ResponseKind, StatusCode};
use crate::network::{Network, NetworkError};

const OFFLINE_HTML: &str = "<!doctype html>\
<html lang=\"en\"><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>You are offline</h1><p>This page has not been saved for offline use yet.</p></body></html>";

/// Whether a runtime response may be written to the bucket.
///
/// Only a same-origin `200` qualifies; error pages and opaque cross-origin
/// bodies are returned to the caller but never stored.
pub fn should_store(response: &Response) -> bool {
    response.status() == StatusCode::OK && response.response_kind() == ResponseKind::Basic
}

/// The strategies, bound to one bucket, store and network.
#[derive(Clone)]
pub struct Strategies {
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    bucket: BucketName,
    offline_document: RequestKey,
}

impl Strategies {
    pub fn new(
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
        bucket: BucketName,
        offline_document: &Url,
    ) -> Self {
        Self {
            store,
            network,
            bucket,
            offline_document: RequestKey::get(offline_document),
        }
    }

    pub fn bucket(&self) -> &BucketName {
        &self.bucket
    }

    /// Runs the strategy for `classification`.
    ///
    /// `Skip` requests are fetched from the network untouched.
    pub async fn run(
        &self,
        classification: Classification,
        request: Request,
        lifetime: &Lifetime,
    ) -> Result<Response, NetworkError> {
        match classification {
            Classification::Document => Ok(self.network_first(request).await),
            Classification::RuntimeStatic(_) => {
                self.stale_while_revalidate(request, lifetime).await
            }
            Classification::Passthrough => self.passthrough(request).await,
            Classification::Skip => self.network.fetch(request).await,
        }
    }

    /// Network-first for HTML documents. Always resolves to HTML.
    pub async fn network_first(&self, request: Request) -> Response {
        let key = RequestKey::get(request.url());
        match self.network.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.store(key, response.duplicate()).await;
                }
                response
            }
            Err(e) => {
                debug!(key = %key, error = %e, "document fetch failed, falling back to cache");
                if let Some(cached) = self.lookup(&key).await {
                    return cached;
                }
                if let Some(offline) = self.lookup(&self.offline_document).await {
                    return offline;
                }
                warn!(key = %key, "offline document missing from cache");
                Response::new(StatusCode::SERVICE_UNAVAILABLE)
                    .header("Content-Type", "text/html; charset=utf-8")
                    .body(OFFLINE_HTML)
            }
        }
    }

    /// Cache-first for static assets.
    ///
    /// A hit is returned at once while a refresh is registered on `lifetime`;
    /// the refresh overwrites the entry if the origin answers with a storable
    /// response. A miss goes to the network and stores storable responses.
    pub async fn stale_while_revalidate(
        &self,
        request: Request,
        lifetime: &Lifetime,
    ) -> Result<Response, NetworkError> {
        let key = RequestKey::get(request.url());

        if let Some(cached) = self.lookup(&key).await {
            debug!(key = %key, "cache hit, revalidating in background");
            let this = self.clone();
            lifetime.wait_until(async move { this.revalidate(key, request).await });
            return Ok(cached);
        }

        let response = self.network.fetch(request).await?;
        if should_store(&response) {
            self.store(key, response.duplicate()).await;
        } else {
            debug!(key = %key, status = %response.status(), "response not storable");
        }
        Ok(response)
    }

    /// Network with a cache fallback; a double miss returns the network error.
    pub async fn passthrough(&self, request: Request) -> Result<Response, NetworkError> {
        let key = RequestKey::from_request(&request);
        match self.network.fetch(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if let Some(key) = key {
                    if let Some(cached) = self.lookup(&key).await {
                        debug!(key = %key, error = %e, "network failed, served from cache");
                        return Ok(cached);
                    }
                }
                Err(e)
            }
        }
    }

    async fn revalidate(&self, key: RequestKey, request: Request) {
        match self.network.fetch(request).await {
            Ok(fresh) if should_store(&fresh) => self.store(key, fresh).await,
            Ok(fresh) => {
                debug!(key = %key, status = %fresh.status(), "refresh not storable, keeping entry");
            }
            Err(e) => warn!(key = %key, error = %e, "background refresh failed"),
        }
    }

    async fn lookup(&self, key: &RequestKey) -> Option<Response> {
        match self.store.match_preferring(self.bucket.as_str(), key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "cache lookup failed");
                None
            }
        }
    }

    async fn store(&self, key: RequestKey, response: Response) {
        let bucket = match self.store.open(self.bucket.as_str()).await {
            Ok(bucket) => bucket,
            Err(e) => {
                warn!(bucket = %self.bucket, error = %e, "failed to open bucket");
                return;
            }
        };
        if let Err(e) = bucket.put(key.clone(), response).await {
            warn!(bucket = %self.bucket, key = %key, error = %e, "cache write failed");
        }
    }
}
