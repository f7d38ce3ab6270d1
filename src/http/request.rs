//! Requests with absolute URLs, built directly or parsed from HTTP/1.1 bytes.

use bytes::Bytes;
use thiserror::Error;
use url::Url;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid request target {target:?}: {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: url::ParseError,
    },
}

/// An HTTP request addressed by absolute URL.
///
/// Requests are cheap to clone (the body is a [`Bytes`] handle), which lets
/// the stale-while-revalidate strategy hand a copy to its background refresh.
///
/// # Examples
///
/// ```
/// use offline_cache::http::Request;
/// use url::Url;
///
/// let base = Url::parse("http://localhost:8080").unwrap();
/// let raw = b"GET /css/critical.css?v=2 HTTP/1.1\r\nHost: localhost\r\nAccept: text/css\r\n\r\n";
/// let (request, _offset) = Request::parse(raw, &base).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.url().path(), "/css/critical.css");
/// assert_eq!(request.url().query(), Some("v=2"));
/// assert_eq!(request.accept(), Some("text/css"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Creates a request with an empty body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for `Request::new(Method::Get, url)`.
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parses a raw HTTP/1.1 request and resolves its target against `base`.
    ///
    /// Returns the request and the byte offset at which the body begins. The
    /// body is whatever follows the header block in `buf`; callers that care
    /// about `Content-Length` must buffer enough bytes first.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the header block has not fully arrived.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::MissingField`]: method, path or version is absent.
    /// - [`RequestError::InvalidTarget`]: the target cannot be joined to `base`.
    pub fn parse(buf: &[u8], base: &Url) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>()
        {
            Ok(m) => m,
            Err(never) => match never {},
        };

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let url = base.join(target).map_err(|source| RequestError::InvalidTarget {
            target: target.to_owned(),
            source,
        })?;

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        Ok((
            Self {
                method,
                url,
                version,
                headers: header_map,
                body: Bytes::copy_from_slice(&buf[body_offset..]),
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Replaces the body, used by the front server once `Content-Length`
    /// bytes have been buffered.
    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    /// The `Accept` header, if any.
    pub fn accept(&self) -> Option<&str> {
        self.headers.get("accept")
    }

    /// HTTP/1.1 defaults to keep-alive; HTTP/1.0 only with an explicit header.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}
