//! Hosting environment: an HTTP/1.1 front server that delivers requests to
//! the controller as fetch events.
//!
//! Requests the controller does not intercept are forwarded to the
//! [`Network`] unchanged, exactly as a browser sends un-intercepted requests
//! straight to the network. Supports HTTP/1.1 persistent connections.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::controller::{ControllerError, FetchOutcome};
use crate::dispatch::{Dispatcher, Outcome};
use crate::event::{Event, FetchEvent};
use crate::http::{
    Request, Response, StatusCode,
    request::RequestError,
};
use crate::network::Network;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("controller failed to start: {0}")]
    Lifecycle(#[from] ControllerError),
}

/// Where [`Server::start`] left the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
    Activated,
    /// Installed; requests go straight to the network until activation.
    Waiting,
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// Everything a connection task needs, shared across connections.
struct Host {
    dispatcher: Arc<Dispatcher>,
    network: Arc<dyn Network>,
    origin: Url,
}

/// The front server.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use offline_cache::cache::MemoryCacheStore;
/// use offline_cache::config::ControllerConfig;
/// use offline_cache::controller::Controller;
/// use offline_cache::dispatch::Dispatcher;
/// use offline_cache::network::HttpNetwork;
/// use offline_cache::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ControllerConfig::load()?;
///     let origin = config.origin.clone();
///     let network = Arc::new(HttpNetwork::new(&origin, config.network_timeout())?);
///     let controller = Controller::new(config, Arc::new(MemoryCacheStore::new()), network.clone())?;
///     let dispatcher = Arc::new(Dispatcher::for_controller(Arc::new(controller)));
///
///     let server = Server::bind("127.0.0.1:3000").await?;
///     server.start(&dispatcher).await?;
///     server.run(dispatcher, network, origin).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Delivers `install`, then `activate` unless the controller asked to
    /// wait.
    ///
    /// A waiting controller stays out of the request path until the host
    /// dispatches [`Event::Activate`] itself.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Lifecycle`] if either handler fails; the
    /// controller then stays out of the request path.
    pub async fn start(&self, dispatcher: &Dispatcher) -> Result<Startup, ServerError> {
        let installed = dispatcher.dispatch(Event::Install).await?;
        if matches!(installed, Outcome::Installed { skip_waiting: false }) {
            info!("installed, waiting for the host to activate");
            return Ok(Startup::Waiting);
        }
        dispatcher.dispatch(Event::Activate).await?;
        Ok(Startup::Activated)
    }

    /// Accepts connections until the listener fails.
    ///
    /// Request targets are resolved against `origin`.
    pub async fn run(
        self,
        dispatcher: Arc<Dispatcher>,
        network: Arc<dyn Network>,
        origin: Url,
    ) -> Result<(), ServerError> {
        let host = Arc::new(Host {
            dispatcher,
            network,
            origin,
        });
        info!(address = %self.local_addr, origin = %host.origin, "offline cache listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let host = Arc::clone(&host);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, host).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    host: Arc<Host>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            stream.write_all(&payload_too_large().into_bytes()).await?;
            break;
        }

        let (mut request, body_offset) = match Request::parse(&buf, &host.origin) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BAD_REQUEST)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        let content_length = request.content_length().unwrap_or(0);
        let Some(total_needed) = body_offset
            .checked_add(content_length)
            .filter(|total| *total <= MAX_REQUEST_SIZE)
        else {
            warn!(peer = %peer_addr, content_length, "declared body too large, sending 413");
            stream.write_all(&payload_too_large().into_bytes()).await?;
            break;
        };
        if buf.len() < total_needed {
            continue;
        }
        request.set_body(Bytes::copy_from_slice(&buf[body_offset..total_needed]));

        let keep_alive = request.is_keep_alive();
        debug!(
            peer = %peer_addr,
            method = %request.method(),
            url = %request.url(),
            "dispatching fetch event"
        );

        let event = FetchEvent::new(request.clone());
        let lifetime = event.lifetime().clone();
        let response = respond(&host, event, request).await.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        // Background cache writes finish before the next request is read.
        lifetime.settle().await;

        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "connection close requested");
            break;
        }
    }

    Ok(())
}

fn payload_too_large() -> Response {
    Response::new(StatusCode::PAYLOAD_TOO_LARGE)
        .body("Request entity too large")
        .keep_alive(false)
}

async fn respond(host: &Host, event: FetchEvent, request: Request) -> Response {
    match host.dispatcher.dispatch(Event::Fetch(event)).await {
        Ok(Outcome::Fetch(FetchOutcome::Respond(response))) => response,
        Ok(_) => match host.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "upstream fetch failed");
                Response::new(StatusCode::BAD_GATEWAY).body(format!("Bad Gateway: {e}"))
            }
        },
        Err(e) => {
            warn!(error = %e, "fetch handler failed");
            Response::new(StatusCode::BAD_GATEWAY).body(format!("Bad Gateway: {e}"))
        }
    }
}
