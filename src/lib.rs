//! # offline-cache
//!
//! An offline cache controller: it sits between a web page and the network,
//! pre-caches a site's shell at install, cleans up superseded cache versions
//! at activation, and answers intercepted requests with a per-class caching
//! strategy so the site keeps working offline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offline_cache::{ControllerConfig, Controller, Dispatcher, MemoryCacheStore, Server};
//! use offline_cache::network::HttpNetwork;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ControllerConfig::load()?;
//!     let origin = config.origin.clone();
//!     let network = Arc::new(HttpNetwork::new(&origin, config.network_timeout())?);
//!     let controller = Controller::new(config, Arc::new(MemoryCacheStore::new()), network.clone())?;
//!     let dispatcher = Arc::new(Dispatcher::for_controller(Arc::new(controller)));
//!
//!     let server = Server::bind("127.0.0.1:3000").await?;
//!     server.start(&dispatcher).await?;
//!     server.run(dispatcher, network, origin).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod classify;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod event;
pub mod http;
pub mod network;
pub mod server;
pub mod strategy;
pub mod sync;

use std::future::Future;
use std::pin::Pin;

/// A boxed, `Send` future; the return type of every async trait method in
/// this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{BucketName, CacheStore, MemoryCacheStore};
pub use classify::{Classification, Classifier};
pub use config::{ConfigError, ControllerConfig};
pub use controller::{Controller, ControllerError, FetchOutcome, WorkerState};
pub use dispatch::{Dispatcher, Outcome};
pub use event::{Event, EventKind, FetchEvent, Lifetime, SyncEvent};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use network::{HttpNetwork, Network, NetworkError};
pub use server::{Server, ServerError, Startup};
