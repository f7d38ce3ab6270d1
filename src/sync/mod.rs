//! Background sync of telemetry queued while offline.
//!
//! Records live in a [`TelemetryQueue`] owned by the pages, not by the
//! controller. When the host fires the sync tag, [`Reconciler::flush`] posts
//! the whole queue as one JSON array and acknowledges exactly the records it
//! sent once the endpoint answers with a 2xx.
//!
//! Delivery is at-least-once. A send whose response is lost is retried on the
//! next sync with the same records; the records carry no idempotency key, so
//! the endpoint may count them twice.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::BoxFuture;
use crate::http::{Method, Request, StatusCode};
use crate::network::{Network, NetworkError};

/// Default tag the host fires when connectivity returns.
pub const DEFAULT_SYNC_TAG: &str = "sync-analytics";

/// Default endpoint path, resolved against the controller origin.
pub const DEFAULT_SYNC_ENDPOINT: &str = "/api/analytics";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("telemetry queue unavailable: {0}")]
    Queue(String),

    #[error("failed to encode telemetry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("telemetry upload failed: {0}")]
    Network(#[from] NetworkError),

    #[error("telemetry endpoint rejected batch with {0}")]
    Rejected(StatusCode),
}

/// One queued analytics event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub event: String,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl TelemetryRecord {
    pub fn new(event: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            event: event.into(),
            timestamp_ms,
            properties: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Durable client-side queue of telemetry records.
pub trait TelemetryQueue: Send + Sync {
    /// All queued records, oldest first.
    fn pending(&self) -> BoxFuture<'_, Result<Vec<TelemetryRecord>, SyncError>>;

    /// Removes the oldest `count` records.
    fn acknowledge(&self, count: usize) -> BoxFuture<'_, Result<(), SyncError>>;
}

/// In-memory [`TelemetryQueue`]; clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryTelemetryQueue {
    records: Arc<Mutex<VecDeque<TelemetryRecord>>>,
}

impl MemoryTelemetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, record: TelemetryRecord) {
        self.records.lock().await.push_back(record);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

impl TelemetryQueue for MemoryTelemetryQueue {
    fn pending(&self) -> BoxFuture<'_, Result<Vec<TelemetryRecord>, SyncError>> {
        Box::pin(async move { Ok(self.records.lock().await.iter().cloned().collect()) })
    }

    fn acknowledge(&self, count: usize) -> BoxFuture<'_, Result<(), SyncError>> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            let count = count.min(records.len());
            records.drain(..count);
            Ok(())
        })
    }
}

/// Result of a successful flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing was queued; no request was sent.
    Empty,
    /// This many records were delivered and removed from the queue.
    Sent(usize),
}

/// Flushes a [`TelemetryQueue`] to the telemetry endpoint.
#[derive(Clone)]
pub struct Reconciler {
    queue: Arc<dyn TelemetryQueue>,
    network: Arc<dyn Network>,
    endpoint: Url,
}

impl Reconciler {
    pub fn new(queue: Arc<dyn TelemetryQueue>, network: Arc<dyn Network>, endpoint: Url) -> Self {
        Self {
            queue,
            network,
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Sends every queued record in one POST.
    ///
    /// The queue is only touched after a 2xx response, and then only the
    /// records that were part of the batch are removed. Any failure leaves the
    /// queue as it was.
    pub async fn flush(&self) -> Result<SyncOutcome, SyncError> {
        let batch = self.queue.pending().await?;
        if batch.is_empty() {
            debug!("telemetry queue empty, nothing to sync");
            return Ok(SyncOutcome::Empty);
        }

        let body = serde_json::to_vec(&batch)?;
        let request = Request::new(Method::Post, self.endpoint.clone())
            .header("Content-Type", "application/json")
            .body(body);

        let response = match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(endpoint = %self.endpoint, records = batch.len(), error = %e, "telemetry sync failed");
                return Err(e.into());
            }
        };
        if !response.ok() {
            warn!(endpoint = %self.endpoint, status = %response.status(), "telemetry batch rejected");
            return Err(SyncError::Rejected(response.status()));
        }

        self.queue.acknowledge(batch.len()).await?;
        info!(endpoint = %self.endpoint, records = batch.len(), "telemetry synced");
        Ok(SyncOutcome::Sent(batch.len()))
    }
}
