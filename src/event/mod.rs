//! Lifecycle events and the lifetime-extension primitive.
//!
//! Every event carries a [`Lifetime`]. Work registered with
//! [`Lifetime::wait_until`] keeps running after the handler has returned its
//! result; the host calls [`Lifetime::settle`] before it considers the event
//! finished (the browser's `waitUntil`).

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::warn;

use crate::http::Request;

/// Tracks background work an event handler started.
///
/// Clones share the same set of pending work.
#[derive(Debug, Clone, Default)]
pub struct Lifetime {
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Lifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `work` and extends the event's lifetime until it completes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Waits for all registered work, including work registered while
    /// settling.
    pub async fn settle(&self) {
        loop {
            let batch: Vec<_> = std::mem::take(
                &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                if let Err(e) = handle.await {
                    warn!(error = %e, "extended work did not complete");
                }
            }
        }
    }

    /// Number of registered tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }
}

/// A request intercepted by the controller.
#[derive(Debug)]
pub struct FetchEvent {
    request: Request,
    lifetime: Lifetime,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            lifetime: Lifetime::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    pub fn into_parts(self) -> (Request, Lifetime) {
        (self.request, self.lifetime)
    }
}

/// A background sync trigger delivered by the host once connectivity returns.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    tag: String,
    last_chance: bool,
    lifetime: Lifetime,
}

impl SyncEvent {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            last_chance: false,
            lifetime: Lifetime::new(),
        }
    }

    /// Marks this as the host's final retry for the tag.
    #[must_use]
    pub fn last_chance(mut self, last_chance: bool) -> Self {
        self.last_chance = last_chance;
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_last_chance(&self) -> bool {
        self.last_chance
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }
}

/// Events the host delivers to the controller.
#[derive(Debug)]
pub enum Event {
    Install,
    Activate,
    Fetch(FetchEvent),
    Sync(SyncEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Install => EventKind::Install,
            Self::Activate => EventKind::Activate,
            Self::Fetch(_) => EventKind::Fetch,
            Self::Sync(_) => EventKind::Sync,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Sync,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Fetch => "fetch",
            Self::Sync => "sync",
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn settle_waits_for_registered_work() {
        let lifetime = Lifetime::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = Arc::clone(&done);
            lifetime.wait_until(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        lifetime.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(lifetime.pending(), 0);
    }

    #[tokio::test]
    async fn settle_includes_work_registered_while_settling() {
        let lifetime = Lifetime::new();
        let done = Arc::new(AtomicUsize::new(0));
        let inner_lifetime = lifetime.clone();
        let inner_done = Arc::clone(&done);
        lifetime.wait_until(async move {
            let done = Arc::clone(&inner_done);
            inner_lifetime.wait_until(async move {
                done.fetch_add(1, Ordering::SeqCst);
            });
            inner_done.fetch_add(1, Ordering::SeqCst);
        });
        lifetime.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_work_does_not_poison_settle() {
        let lifetime = Lifetime::new();
        lifetime.wait_until(async { panic!("boom") });
        lifetime.settle().await;
        assert_eq!(lifetime.pending(), 0);
    }

    #[test]
    fn event_kinds() {
        assert_eq!(Event::Install.kind(), EventKind::Install);
        assert_eq!(Event::Sync(SyncEvent::new("sync-analytics")).kind().to_string(), "sync");
    }
}
