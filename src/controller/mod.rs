//! The offline cache controller and its lifecycle.
//!
//! ```text
//! Parsed ──install──▶ Installing ──ok──▶ Installed ──activate──▶ Activating ──▶ Activated
//!                         │
//!                         └──err──▶ Redundant ──install (retry)──▶ Installing
//! ```
//!
//! Only an `Activated` controller intercepts fetches; before that every
//! request falls through to the network.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{BucketName, CacheError, CacheStore, CleanupScope, RequestKey};
use crate::classify::{Classification, Classifier};
use crate::config::{ConfigError, ControllerConfig};
use crate::event::{FetchEvent, SyncEvent};
use crate::http::{Request, Response, StatusCode};
use crate::network::{Network, NetworkError};
use crate::strategy::Strategies;
use crate::sync::{Reconciler, SyncError, SyncOutcome, TelemetryQueue};

/// Lifecycle state of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed; the host may retry.
    Redundant,
}

impl WorkerState {
    pub fn can_intercept_fetch(self) -> bool {
        self == Self::Activated
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        })
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("pre-cache fetch of {url} failed: {source}")]
    Precache {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("pre-cache fetch of {url} returned {status}")]
    PrecacheStatus { url: String, status: StatusCode },

    #[error("pre-cache task aborted: {0}")]
    PrecacheAborted(String),

    #[error("cache storage error: {0}")]
    Cache(#[from] CacheError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: WorkerState,
    },

    #[error("background sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("background sync task aborted")]
    SyncAborted,
}

/// What the controller did with an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The controller produced the response.
    Respond(Response),
    /// Not intercepted; the host fetches the request itself.
    Fallthrough,
}

/// Owns the current bucket and mediates every read and write to it.
pub struct Controller {
    config: ControllerConfig,
    bucket: BucketName,
    scope: CleanupScope,
    precache: Vec<Url>,
    sync_endpoint: Url,
    classifier: Classifier,
    strategies: Strategies,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    reconciler: Option<Reconciler>,
    state: Mutex<WorkerState>,
    clients_claimed: AtomicBool,
}

impl Controller {
    /// Builds a controller from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Config`] if the configuration is invalid.
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let bucket = config.bucket_name();
        let precache = config.precache_urls()?;
        let offline_document = config.offline_document_url()?;
        let sync_endpoint = config.sync_endpoint_url()?;
        let classifier = Classifier::with_font_hosts(&config.origin, config.font_hosts.clone());
        let strategies = Strategies::new(
            Arc::clone(&store),
            Arc::clone(&network),
            bucket.clone(),
            &offline_document,
        );

        Ok(Self {
            scope: config.cleanup_scope(),
            config,
            bucket,
            precache,
            sync_endpoint,
            classifier,
            strategies,
            store,
            network,
            reconciler: None,
            state: Mutex::new(WorkerState::Parsed),
            clients_claimed: AtomicBool::new(false),
        })
    }

    /// Enables the background sync hook for `queue`.
    #[must_use]
    pub fn with_telemetry(mut self, queue: Arc<dyn TelemetryQueue>) -> Self {
        self.reconciler = Some(Reconciler::new(
            queue,
            Arc::clone(&self.network),
            self.sync_endpoint.clone(),
        ));
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn bucket_name(&self) -> &BucketName {
        &self.bucket
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether activation has taken control of already-open clients.
    pub fn clients_claimed(&self) -> bool {
        self.clients_claimed.load(Ordering::Acquire)
    }

    /// Whether the host should activate right after a successful install.
    pub fn skip_waiting(&self) -> bool {
        self.config.skip_waiting
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Moves `from` → `to` atomically, or reports the current state.
    fn transition(
        &self,
        action: &'static str,
        from: &[WorkerState],
        to: WorkerState,
    ) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !from.contains(&*state) {
            return Err(ControllerError::InvalidState {
                action,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    /// Pre-caches the manifest into the current bucket.
    ///
    /// Every manifest URL is fetched before anything is written; a network
    /// failure or non-2xx status on any of them aborts the install, and a
    /// bucket created by this attempt is removed again.
    pub async fn install(&self) -> Result<(), ControllerError> {
        self.transition(
            "install",
            &[WorkerState::Parsed, WorkerState::Redundant],
            WorkerState::Installing,
        )?;
        info!(bucket = %self.bucket, entries = self.precache.len(), "installing");

        match self.precache_all().await {
            Ok(()) => {
                self.set_state(WorkerState::Installed);
                info!(bucket = %self.bucket, "installed");
                Ok(())
            }
            Err(e) => {
                self.set_state(WorkerState::Redundant);
                warn!(bucket = %self.bucket, error = %e, "install failed");
                Err(e)
            }
        }
    }

    async fn precache_all(&self) -> Result<(), ControllerError> {
        let mut tasks = JoinSet::new();
        for (index, url) in self.precache.iter().cloned().enumerate() {
            let network = Arc::clone(&self.network);
            tasks.spawn(async move {
                let result = network.fetch(Request::get(url.clone())).await;
                (index, url, result)
            });
        }

        let mut slots: Vec<Option<(RequestKey, Response)>> =
            (0..self.precache.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, url, result) =
                joined.map_err(|e| ControllerError::PrecacheAborted(e.to_string()))?;
            let response = result.map_err(|source| ControllerError::Precache {
                url: url.to_string(),
                source,
            })?;
            if !response.ok() {
                return Err(ControllerError::PrecacheStatus {
                    url: url.to_string(),
                    status: response.status(),
                });
            }
            debug!(url = %url, "pre-cache fetched");
            slots[index] = Some((RequestKey::get(&url), response));
        }
        let entries: Vec<_> = slots.into_iter().flatten().collect();

        let existed = self.store.has(self.bucket.as_str()).await?;
        let bucket = self.store.open(self.bucket.as_str()).await?;
        if let Err(e) = bucket.put_all(entries).await {
            if !existed {
                if let Err(cleanup) = self.store.delete(self.bucket.as_str()).await {
                    warn!(bucket = %self.bucket, error = %cleanup, "failed to remove partial bucket");
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Deletes superseded buckets, then claims open clients.
    ///
    /// Returns the names of the deleted buckets.
    pub async fn activate(&self) -> Result<Vec<String>, ControllerError> {
        self.transition("activate", &[WorkerState::Installed], WorkerState::Activating)?;

        let mut deleted = Vec::new();
        let result: Result<(), CacheError> = async {
            for name in self.store.keys().await? {
                if self.bucket.is_superseded(&name, &self.scope) {
                    info!(bucket = %name, "removing superseded bucket");
                    if self.store.delete(&name).await? {
                        deleted.push(name);
                    }
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            self.set_state(WorkerState::Installed);
            warn!(bucket = %self.bucket, error = %e, "activation failed");
            return Err(e.into());
        }

        self.clients_claimed.store(true, Ordering::Release);
        self.set_state(WorkerState::Activated);
        info!(bucket = %self.bucket, removed = deleted.len(), "activated and claimed clients");
        Ok(deleted)
    }

    /// Resolves an intercepted request.
    ///
    /// Background work (stale-while-revalidate refreshes) is registered on the
    /// event's lifetime; the response itself never waits for it.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Network`] when neither the network nor the
    /// cache can answer a passthrough or uncached static request.
    pub async fn handle_fetch(&self, event: &FetchEvent) -> Result<FetchOutcome, ControllerError> {
        if !self.state().can_intercept_fetch() {
            return Ok(FetchOutcome::Fallthrough);
        }

        let request = event.request();
        let classification = self.classifier.classify(request);
        debug!(
            url = %request.url(),
            classification = classification.as_str(),
            "fetch intercepted"
        );
        if classification == Classification::Skip {
            return Ok(FetchOutcome::Fallthrough);
        }

        let response = self
            .strategies
            .run(classification, request.clone(), event.lifetime())
            .await?;
        Ok(FetchOutcome::Respond(response))
    }

    /// Flushes queued telemetry when `event` carries the configured tag.
    ///
    /// Returns `None` for other tags or when no telemetry queue is attached.
    /// The flush runs under the event's lifetime, so it finishes even if the
    /// caller stops waiting for the result.
    pub async fn handle_sync(&self, event: &SyncEvent) -> Result<Option<SyncOutcome>, ControllerError> {
        if event.tag() != self.config.sync_tag {
            debug!(tag = event.tag(), "ignoring unknown sync tag");
            return Ok(None);
        }
        let Some(reconciler) = &self.reconciler else {
            debug!(tag = event.tag(), "no telemetry queue attached");
            return Ok(None);
        };
        let reconciler = reconciler.clone();
        let (tx, rx) = oneshot::channel();
        event.lifetime().wait_until(async move {
            let _ = tx.send(reconciler.flush().await);
        });
        let flushed = rx.await.map_err(|_| ControllerError::SyncAborted)?;
        match flushed {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                if event.is_last_chance() {
                    warn!(tag = event.tag(), error = %e, "final sync attempt failed, records kept");
                }
                Err(e.into())
            }
        }
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("bucket", &self.bucket)
            .field("state", &self.state())
            .field("clients_claimed", &self.clients_claimed())
            .finish_non_exhaustive()
    }
}
