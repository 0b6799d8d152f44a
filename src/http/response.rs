//! Outgoing HTTP response with a buffered body.

use crate::http::{
    head,
    types::{HeaderMap, StatusCode, Version},
};
use std::io;

/// HTTP response built by a handler.
///
/// The server creates one per request with status `200 OK`, the request's
/// version and its keep-alive flag, then passes it to
/// [`Handler::handle`](crate::Handler::handle). The handler fills it through
/// the chained setters or through [`std::io::Write`], which appends to the
/// body.
///
/// When the response is written, `Content-Length` is set to the buffered
/// body size and `Connection` to the keep-alive flag, replacing any value the
/// handler put there.
///
/// # Examples
/// ```
/// use strand_web::{Response, StatusCode};
/// use std::io::Write;
///
/// let mut resp = Response::new();
/// resp.status(StatusCode::Created)
///     .header("Location", "/items/7")
///     .set_content_type("application/json");
///
/// write!(resp, r#"{{"id": {}}}"#, 7).unwrap();
///
/// assert_eq!(resp.payload(), br#"{"id": 7}"#);
/// assert_eq!(resp.content_length(), 9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub(crate) status: StatusCode,
    reason: String,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) keep_alive: bool,
    pub(crate) body: Vec<u8>,

    /// Answers a `HEAD` request: the body is measured but not sent.
    pub(crate) head_only: bool,
}

impl Response {
    /// Creates a `200 OK` response with no headers and an empty body.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn reset(&mut self, version: Version, keep_alive: bool) {
        self.clear();
        self.version = version;
        self.keep_alive = keep_alive;
    }

    /// Restores the state of [`Response::new`], keeping allocations.
    pub fn clear(&mut self) {
        self.status = StatusCode::Ok;
        self.reason.clear();
        self.version = Version::Invalid;
        self.headers.clear();
        self.keep_alive = false;
        self.body.clear();
        self.head_only = false;
    }
}

// Builder
impl Response {
    /// Sets the status code; the reason phrase goes back to the canonical one.
    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self.reason.clear();
        self
    }

    /// Overrides the reason phrase of the status line.
    #[inline]
    pub fn reason(&mut self, reason: impl Into<String>) -> &mut Self {
        self.reason = reason.into();
        self
    }

    /// Sets header `name`, replacing any previous value.
    ///
    /// `Content-Length` and `Connection` are recomputed when the response is
    /// written; use [`close`](Response::close) to end the connection.
    #[inline]
    pub fn header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the `Content-Type` header.
    #[inline]
    pub fn set_content_type(&mut self, content_type: &str) -> &mut Self {
        self.header("Content-Type", content_type)
    }

    /// Replaces the body.
    #[inline]
    pub fn body(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.body.clear();
        self.body.extend_from_slice(data.as_ref());
        self
    }

    /// Sets the keep-alive flag.
    #[inline]
    pub fn set_keep_alive(&mut self, keep_alive: bool) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Closes the connection after this response.
    #[inline]
    pub fn close(&mut self) -> &mut Self {
        self.set_keep_alive(false)
    }
}

// Accessors
impl Response {
    #[inline]
    pub const fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase written on the status line.
    #[inline]
    pub fn reason_phrase(&self) -> &str {
        match self.reason.is_empty() {
            true => self.status.reason(),
            false => &self.reason,
        }
    }

    #[inline]
    pub const fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns the value of header `name` (case-insensitive).
    #[inline]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[inline]
    pub const fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The buffered body.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.body
    }

    /// Size of the buffered body, always what `Content-Length` will say.
    #[inline]
    pub fn content_length(&self) -> usize {
        self.body.len()
    }
}

impl Response {
    /// Serializes the response into `buf`, fixing up the framing headers.
    pub(crate) fn encode(&mut self, buf: &mut Vec<u8>) {
        head::set_framing(&mut self.headers, self.body.len(), self.keep_alive);

        let code = self.status.as_u16().to_string();
        let reason = match self.reason.is_empty() {
            true => self.status.reason(),
            false => self.reason.as_str(),
        };

        buf.reserve(64 + self.headers.len() * 32 + self.body.len());
        head::write_head(buf, [self.version.as_str(), &code, reason], &self.headers);

        if !self.head_only {
            buf.extend_from_slice(&self.body);
        }
    }
}

impl io::Write for Response {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
