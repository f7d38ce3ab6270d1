//! Responses and their one-shot body contract.
//!
//! A [`Response`] owns its body and is deliberately not `Clone`: handing it to
//! a caller or writing it into a bucket consumes it. Code paths that need to do
//! both must take a [`Response::duplicate`] *before* either consumer receives
//! the response.

use bytes::{BufMut, Bytes, BytesMut};
use url::Url;

use super::{Headers, StatusCode};

/// How a response relates to the origin that requested it.
///
/// Mirrors the Fetch standard's response types. Only `Basic` responses are
/// eligible for runtime caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseKind {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response the origin explicitly shared.
    Cors,
    /// Cross-origin response whose contents must not be inspected.
    Opaque,
}

/// An HTTP response.
///
/// # Examples
///
/// ```
/// use offline_cache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("Content-Type", "text/css")
///     .body("body{}");
///
/// let copy = response.duplicate();
/// assert_eq!(copy.body_bytes(), response.body_bytes());
///
/// let text = String::from_utf8(response.into_bytes().to_vec()).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 6\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    kind: ResponseKind,
    url: Option<Url>,
    keep_alive: bool,
}

impl Response {
    /// Creates a `Basic` response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            kind: ResponseKind::Basic,
            url: None,
            keep_alive: true,
        }
    }

    /// Appends a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    /// Records the URL the response was fetched from.
    #[must_use]
    pub fn url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Replaces the headers wholesale.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Produces an independent copy for a second consumer.
    ///
    /// Must be called before the response is handed to either the caller or
    /// the cache. The body buffer is reference counted, so this does not copy
    /// the bytes.
    pub fn duplicate(&self) -> Self {
        Self {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            kind: self.kind,
            url: self.url.clone(),
            keep_alive: self.keep_alive,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn response_kind(&self) -> ResponseKind {
        self.kind
    }

    pub fn source_url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Borrows the body without consuming it.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// `true` for a 2xx status.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Consumes the response and returns its body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Serializes the response into HTTP/1.1 wire format.
    ///
    /// Adds `Content-Type: text/plain; charset=utf-8` when a body is present
    /// without a content type, and always writes `Connection` and
    /// `Content-Length`. Framing headers carried over from an origin are
    /// replaced.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        self.headers.strip_hop_by_hop();
        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.insert("Connection", connection);

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        buf.put(&b"\r\n"[..]);

        if !self.body.is_empty() {
            buf.put(self.body);
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}
