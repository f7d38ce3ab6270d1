//! Event dispatch table.
//!
//! Handlers are registered per [`EventKind`] instead of on an implicit event
//! bus. Each handler returns a boxed future: the work the host must wait for
//! before it considers the event handled.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offline_cache::cache::MemoryCacheStore;
//! use offline_cache::config::ControllerConfig;
//! use offline_cache::controller::Controller;
//! use offline_cache::dispatch::Dispatcher;
//! use offline_cache::event::Event;
//! use offline_cache::network::HttpNetwork;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ControllerConfig::load()?;
//! let network = Arc::new(HttpNetwork::new(&config.origin, config.network_timeout())?);
//! let controller = Controller::new(config, Arc::new(MemoryCacheStore::new()), network)?;
//! let dispatcher = Dispatcher::for_controller(Arc::new(controller));
//! dispatcher.dispatch(Event::Install).await?;
//! dispatcher.dispatch(Event::Activate).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::BoxFuture;
use crate::controller::{Controller, ControllerError, FetchOutcome};
use crate::event::{Event, EventKind};
use crate::sync::SyncOutcome;

/// What a handler produced.
#[derive(Debug)]
pub enum Outcome {
    /// Install finished; `skip_waiting` tells the host whether to activate
    /// right away.
    Installed { skip_waiting: bool },
    /// Lifecycle work finished.
    Done,
    Fetch(FetchOutcome),
    /// `None` when the sync tag was not one the controller handles.
    Sync(Option<SyncOutcome>),
    /// No handler is registered for the event kind.
    Unhandled,
}

/// Type-erased event handler.
pub type Handler =
    Arc<dyn Fn(Event) -> BoxFuture<'static, Result<Outcome, ControllerError>> + Send + Sync + 'static>;

/// Maps event kinds to handlers.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<EventKind, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`, replacing any previous one.
    pub fn on<H, F>(&mut self, kind: EventKind, handler: H) -> &mut Self
    where
        H: Fn(Event) -> F + Send + Sync + 'static,
        F: Future<Output = Result<Outcome, ControllerError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(
            move |event| -> BoxFuture<'static, Result<Outcome, ControllerError>> {
                Box::pin(handler(event))
            },
        );
        self.handlers.insert(kind, handler);
        self
    }

    /// A table wired to the four lifecycle handlers of `controller`.
    pub fn for_controller(controller: Arc<Controller>) -> Self {
        let mut dispatcher = Self::new();

        let c = Arc::clone(&controller);
        dispatcher.on(EventKind::Install, move |_| {
            let c = Arc::clone(&c);
            async move {
                c.install().await?;
                Ok(Outcome::Installed {
                    skip_waiting: c.skip_waiting(),
                })
            }
        });

        let c = Arc::clone(&controller);
        dispatcher.on(EventKind::Activate, move |_| {
            let c = Arc::clone(&c);
            async move { c.activate().await.map(|_| Outcome::Done) }
        });

        let c = Arc::clone(&controller);
        dispatcher.on(EventKind::Fetch, move |event| {
            let c = Arc::clone(&c);
            async move {
                match event {
                    Event::Fetch(fetch) => c.handle_fetch(&fetch).await.map(Outcome::Fetch),
                    _ => Ok(Outcome::Unhandled),
                }
            }
        });

        let c = controller;
        dispatcher.on(EventKind::Sync, move |event| {
            let c = Arc::clone(&c);
            async move {
                match event {
                    Event::Sync(sync) => c.handle_sync(&sync).await.map(Outcome::Sync),
                    _ => Ok(Outcome::Unhandled),
                }
            }
        });

        dispatcher
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handler for `event`, or returns [`Outcome::Unhandled`].
    pub async fn dispatch(&self, event: Event) -> Result<Outcome, ControllerError> {
        let kind = event.kind();
        match self.handlers.get(&kind) {
            Some(handler) => {
                debug!(event = %kind, "dispatching");
                handler(event).await
            }
            None => Ok(Outcome::Unhandled),
        }
    }
}
