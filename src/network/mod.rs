//! The network as seen by the controller.
//!
//! Strategies only ever talk to a [`Network`]; [`HttpNetwork`] is the
//! production implementation, built on a pooled `reqwest` client.

use std::time::Duration;

use bytes::BytesMut;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;
use url::{Origin, Url};

use crate::BoxFuture;
use crate::http::{Headers, Request, Response, ResponseKind, StatusCode, headers::HOP_BY_HOP};

/// Largest origin body [`HttpNetwork`] buffers by default (8 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Why a fetch produced no response at all.
///
/// An HTTP error status is *not* a network error: a `404` is a response.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network unavailable")]
    Offline,

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("malformed request or response: {0}")]
    Malformed(String),

    #[error("unsupported URL scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Anything that can turn a request into a response.
pub trait Network: Send + Sync {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetworkError>>;
}

/// HTTP(S) client for the origin and allow-listed cross-origin hosts.
///
/// Redirects are followed. Bodies are buffered up to a limit and content
/// codings are passed through untouched. Responses from `origin` are
/// [`ResponseKind::Basic`]; cross-origin responses are `Cors` when they carry
/// `Access-Control-Allow-Origin`, otherwise `Opaque`.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    http: Client,
    origin: Origin,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpNetwork {
    /// # Errors
    ///
    /// Returns [`NetworkError::Client`] if the TLS backend cannot be
    /// initialised.
    pub fn new(origin: &Url, timeout: Duration) -> Result<Self, NetworkError> {
        let http = Client::builder()
            .user_agent(concat!("offline-cache/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .use_rustls_tls()
            .build()?;

        Ok(Self {
            http,
            origin: origin.origin(),
            timeout,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    /// Caps buffered response bodies at `limit` bytes.
    #[must_use]
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    fn classify_error(&self, url: &Url, e: reqwest::Error) -> NetworkError {
        if e.is_timeout() {
            NetworkError::Timeout {
                url: url.to_string(),
                after: self.timeout,
            }
        } else if e.is_connect() {
            NetworkError::Connect {
                url: url.to_string(),
                source: e,
            }
        } else {
            NetworkError::Client(e)
        }
    }

    fn too_large(&self, url: &Url) -> NetworkError {
        NetworkError::TooLarge {
            url: url.to_string(),
            limit: self.max_body_bytes,
        }
    }

    async fn exchange(&self, request: Request) -> Result<Response, NetworkError> {
        let url = request.url().clone();
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NetworkError::UnsupportedScheme(url.scheme().to_owned()));
        }

        let method = reqwest::Method::from_bytes(request.method().to_string().as_bytes())
            .map_err(|e| NetworkError::Malformed(e.to_string()))?;
        let mut outbound = self.http.request(method, url.clone());
        for (name, value) in request.headers().iter() {
            if is_framing(name) {
                continue;
            }
            outbound = outbound.header(name, value);
        }
        if !request.body_bytes().is_empty() {
            outbound = outbound.body(request.body_bytes().clone());
        }

        let mut upstream = outbound
            .send()
            .await
            .map_err(|e| self.classify_error(&url, e))?;

        if upstream
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(self.too_large(&url));
        }

        let status = StatusCode::from_u16(upstream.status().as_u16());
        let final_url = upstream.url().clone();
        let mut headers = Headers::with_capacity(upstream.headers().len());
        for (name, value) in upstream.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value);
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = upstream
            .chunk()
            .await
            .map_err(|e| self.classify_error(&url, e))?
        {
            if body.len().saturating_add(chunk.len()) > self.max_body_bytes {
                return Err(self.too_large(&url));
            }
            body.extend_from_slice(&chunk);
        }
        debug!(url = %final_url, status = %status, bytes = body.len(), "origin response received");

        let kind = if final_url.origin() == self.origin {
            ResponseKind::Basic
        } else if headers.contains("access-control-allow-origin") {
            ResponseKind::Cors
        } else {
            ResponseKind::Opaque
        };
        headers.strip_hop_by_hop();

        Ok(Response::new(status)
            .with_headers(headers)
            .body(body.freeze())
            .kind(kind)
            .url(final_url))
    }
}

impl Network for HttpNetwork {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetworkError>> {
        Box::pin(self.exchange(request))
    }
}

/// Headers the client sets itself.
fn is_framing(name: &str) -> bool {
    name.eq_ignore_ascii_case("host")
        || name.eq_ignore_ascii_case("content-length")
        || HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}
