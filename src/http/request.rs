use crate::{
    errors::ErrorKind,
    http::{
        head,
        types::{contains_ignore_ascii_case, HeaderMap, Method, Version},
        url::{self, ParsedUrl},
    },
    limits::ReqLimits,
    server::connection::BodyDeadline,
};
use memchr::{memchr, memrchr};
use std::{
    fmt, io,
    net::SocketAddr,
    pin::Pin,
    sync::OnceLock,
    task::{Context, Poll},
};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, ReadBuf, Take};

pub(crate) type BoxReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Incoming HTTP request.
///
/// Instances are created by the server and passed to
/// [`Handler::handle`](crate::Handler::handle). The head is fully parsed
/// before the handler runs; the body is streamed through [`Request::body`].
///
/// # Accepted format
///
/// ```text
/// [METHOD] SP [TARGET] SP HTTP/1.[0|1] CRLF
/// ([NAME] ":" [VALUE] CRLF)*
/// CRLF
/// [BODY: exactly Content-Length bytes]
/// ```
///
/// - A bare `LF` is accepted in place of `CRLF`, blank lines before the
///   request line are skipped.
/// - Header names are case-insensitive. When a header repeats, the last
///   value wins. Values are trimmed.
/// - Only fixed-length bodies are supported: a `Transfer-Encoding` other
///   than `identity` is a framing error and closes the connection.
///
/// The parser interprets three headers:
///
/// | Header              | Effect                                                      |
/// |---------------------|-------------------------------------------------------------|
/// | `Content-Length`    | Body size (`0` when absent)                                 |
/// | `Connection`        | `close` / `keep-alive` tokens, case-insensitive             |
/// | `Transfer-Encoding` | Rejected unless `identity`                                  |
///
/// Without a `Connection` token, HTTP/1.1 requests are keep-alive and
/// HTTP/1.0 requests are not.
#[derive(Default)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) version: Version,

    pub(crate) headers: HeaderMap,
    pub(crate) content_length: usize,
    pub(crate) keep_alive: bool,

    parsed_url: OnceLock<ParsedUrl>,
    pub(crate) body: Body,

    pub(crate) client_addr: Option<SocketAddr>,
}

impl Request {
    /// Creates an empty request; its method is [`Method::Invalid`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets every field, including the cached [`ParsedUrl`].
    ///
    /// A bound body is detached without draining it.
    pub fn clear(&mut self) {
        self.method = Method::Invalid;
        self.url.clear();
        self.version = Version::Invalid;

        self.headers.clear();
        self.content_length = 0;
        self.keep_alive = false;

        self.parsed_url.take();
        self.body = Body::default();

        self.client_addr = None;
    }
}

// Public API
impl Request {
    #[inline]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Raw request target, as sent by the client.
    #[inline]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[inline]
    pub const fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the value of header `name` (case-insensitive).
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Body size announced by `Content-Length`, `0` when absent.
    #[inline]
    pub const fn content_length(&self) -> usize {
        self.content_length
    }

    /// Whether the client asked to keep the connection open.
    #[inline]
    pub const fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Components of [`url`](Request::url), parsed on first access.
    ///
    /// The result is cached until [`clear`](Request::clear), so every
    /// routing rule evaluated for this request shares one parse.
    #[inline]
    pub fn parsed_url(&self) -> &ParsedUrl {
        self.parsed_url.get_or_init(|| url::parse_url(&self.url))
    }

    /// The request body, limited to [`content_length`](Request::content_length) bytes.
    ///
    /// Whatever the handler leaves unread is discarded before the next
    /// request on the connection is read.
    #[inline]
    pub fn body(&mut self) -> &mut Body {
        &mut self.body
    }

    /// `Content-Type` header value.
    #[inline]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type")
    }

    /// `true` if `Accept-Encoding` mentions `gzip`.
    #[inline]
    pub fn accepts_compressed(&self) -> bool {
        self.headers
            .get("Accept-Encoding")
            .is_some_and(|value| contains_ignore_ascii_case(value, "gzip"))
    }

    /// Address of the peer, when served over TCP.
    #[inline]
    pub const fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }
}

// Parsing
impl Request {
    /// Reads and interprets one request head.
    ///
    /// Returns `Ok(false)` when the stream ends before the request starts.
    /// The body is not bound here: the connection lends its reader after
    /// this returns.
    pub(crate) async fn read_head<R>(
        &mut self,
        reader: &mut R,
        limits: &ReqLimits,
    ) -> Result<bool, ErrorKind>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        let Some(raw) = head::read_head(reader, limits).await? else {
            return Ok(false);
        };

        self.parse_request_line(&raw.start_line)?;

        let framing = head::framing(&raw.headers, self.version, limits)?;
        self.headers = raw.headers;
        self.content_length = framing.content_length;
        self.keep_alive = framing.keep_alive;

        Ok(true)
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), ErrorKind> {
        let bytes = line.as_bytes();

        let first = memchr(b' ', bytes).ok_or(ErrorKind::InvalidMethod)?;
        let last = memrchr(b' ', bytes).ok_or(ErrorKind::InvalidMethod)?;

        self.method = Method::from_bytes(&bytes[..first]).ok_or(ErrorKind::InvalidMethod)?;

        if first == last {
            return Err(ErrorKind::InvalidVersion);
        }

        let target = &line[first + 1..last];
        if target.is_empty() || target.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(ErrorKind::InvalidUrl);
        }

        let version = &bytes[last + 1..];
        self.version = match Version::from_bytes(version) {
            Some(version) => version,
            None if version.starts_with(b"HTTP/") => return Err(ErrorKind::UnsupportedVersion),
            None => return Err(ErrorKind::InvalidVersion),
        };

        self.url.push_str(target);
        Ok(())
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl Request {
    pub(crate) fn for_test(method: Method, url: &str) -> Self {
        Self {
            method,
            url: url.to_owned(),
            version: Version::Http11,
            keep_alive: true,
            ..Self::default()
        }
    }
}

/// Request body stream.
///
/// Reads end exactly after `Content-Length` bytes, even when the client
/// has already sent the next pipelined request. Use the
/// [`AsyncReadExt`](tokio::io::AsyncReadExt) methods or
/// [`Body::bytes`] to consume it.
///
/// With a read timeout configured, a read that waits longer than the
/// timeout for the client fails with [`io::ErrorKind::TimedOut`] and the
/// connection is closed after the handler returns.
#[derive(Default)]
pub struct Body {
    inner: Option<Take<BoxReader>>,
    deadline: Option<BodyDeadline>,
}

/// Initial buffer of [`Body::bytes`]; larger bodies grow it as they arrive.
const BYTES_CAPACITY: u64 = 8 * 1024;

impl Body {
    #[inline]
    pub(crate) fn bind(reader: BoxReader, len: usize, deadline: Option<BodyDeadline>) -> Self {
        Self {
            inner: Some(reader.take(len as u64)),
            deadline,
        }
    }

    #[inline]
    pub(crate) fn detach(&mut self) -> Option<Take<BoxReader>> {
        self.deadline = None;
        self.inner.take()
    }

    /// Bytes not read yet.
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.inner.as_ref().map_or(0, Take::limit)
    }

    /// Reads the rest of the body into memory.
    pub async fn bytes(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.remaining().min(BYTES_CAPACITY) as usize);
        self.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl AsyncRead for Body {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(inner) = &mut this.inner else {
            return Poll::Ready(Ok(()));
        };

        let Some(deadline) = &mut this.deadline else {
            return Pin::new(inner).poll_read(cx, buf);
        };

        if deadline.is_expired() {
            return Poll::Ready(Err(deadline.error()));
        }

        match Pin::new(inner).poll_read(cx, buf) {
            Poll::Pending => {
                // The clock runs only while waiting for the client
                deadline.arm();
                match deadline.poll_expired(cx) {
                    Poll::Ready(()) => Poll::Ready(Err(deadline.error())),
                    Poll::Pending => Poll::Pending,
                }
            }
            ready => {
                deadline.disarm();
                ready
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn parse(src: &'static str) -> Result<Request, ErrorKind> {
        let mut request = Request::new();
        let mut reader = src.as_bytes();

        match request.read_head(&mut reader, &ReqLimits::default()).await? {
            true => Ok(request),
            false => Err(ErrorKind::UnexpectedEof),
        }
    }

    #[tokio::test]
    async fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n",     Some(Method::Get)),
            ("HEAD / HTTP/1.1\r\n\r\n",    Some(Method::Head)),
            ("POST / HTTP/1.1\r\n\r\n",    Some(Method::Post)),
            ("PATCH / HTTP/1.1\r\n\r\n",   Some(Method::Patch)),
            ("OPTIONS * HTTP/1.1\r\n\r\n", Some(Method::Options)),

            ("get / HTTP/1.1\r\n\r\n",     None),
            ("PYU / HTTP/1.1\r\n\r\n",     None),
            (" GET / HTTP/1.1\r\n\r\n",    None),
            ("GET\r\n\r\n",                None),
        ];

        for (src, expected) in cases {
            match expected {
                Some(method) => assert_eq!(parse(src).await.unwrap().method(), method),
                None => assert!(matches!(parse(src).await, Err(ErrorKind::InvalidMethod)), "{src:?}"),
            }
        }
    }

    #[tokio::test]
    async fn parse_request_line() {
        #[rustfmt::skip]
        let cases = [
            ("GET /a?b=1 HTTP/1.1\r\n\r\n", Ok(("/a?b=1", Version::Http11))),
            ("GET /a HTTP/1.0\r\n\r\n",     Ok(("/a", Version::Http10))),
            ("GET http://h/ HTTP/1.1\n\n",  Ok(("http://h/", Version::Http11))),

            ("GET /a\r\n\r\n",              Err("malformed start line")),
            ("GET /a HTTP/2.0\r\n\r\n",     Err("HTTP version not supported")),
            ("GET /a XYZ\r\n\r\n",          Err("malformed start line")),
            ("GET  HTTP/1.1\r\n\r\n",       Err("invalid request target")),
            ("GET /a /b HTTP/1.1\r\n\r\n",  Err("invalid request target")),
        ];

        for (src, expected) in cases {
            match (parse(src).await, expected) {
                (Ok(req), Ok((url, version))) => {
                    assert_eq!(req.url(), url);
                    assert_eq!(req.version(), version);
                }
                (Err(err), Err(msg)) => assert_eq!(err.to_string(), msg, "{src:?}"),
                (got, want) => panic!("{src:?}: got {got:?}, want {want:?}"),
            }
        }
    }

    #[tokio::test]
    async fn headers_and_framing() {
        let req = parse(
            "POST /upload HTTP/1.0\r\n\
             Content-Length: 11\r\n\
             connection: Keep-Alive\r\n\
             Content-Type: text/plain\r\n\
             Accept-Encoding: deflate, GZIP\r\n\r\n",
        )
        .await
        .unwrap();

        assert_eq!(req.content_length(), 11);
        assert!(req.is_keep_alive());
        assert_eq!(req.content_type(), Some("text/plain"));
        assert_eq!(req.header("CONTENT-TYPE"), Some("text/plain"));
        assert!(req.accepts_compressed());

        assert!(matches!(
            parse("POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n").await,
            Err(ErrorKind::UnsupportedEncoding)
        ));
    }

    #[tokio::test]
    async fn clean_eof() {
        let mut request = Request::new();
        let mut reader: &[u8] = b"\r\n";

        assert!(!request
            .read_head(&mut reader, &ReqLimits::default())
            .await
            .unwrap());
        assert_eq!(request.method(), Method::Invalid);
    }

    #[test]
    fn parsed_url_cache() {
        let mut req = Request::for_test(Method::Get, "/a/b?x=1");

        assert_eq!(req.parsed_url().path_components, ["", "a", "b"]);
        assert_eq!(req.parsed_url().query_param("x"), Some("1"));

        req.clear();
        req.url.push_str("/c");
        assert_eq!(req.parsed_url().path_components, ["", "c"]);
        assert_eq!(req.method(), Method::Invalid);
    }

    #[tokio::test]
    async fn body_stops_at_length() {
        let reader: BoxReader = Box::new(BufReader::new(&b"hello world|GET / HTTP/1.1"[..]));
        let mut body = Body::bind(reader, 11, None);

        assert_eq!(body.remaining(), 11);
        assert_eq!(body.bytes().await.unwrap(), b"hello world");
        assert_eq!(body.remaining(), 0);

        let mut rest = String::new();
        let mut reader = body.detach().unwrap().into_inner();
        reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "|GET / HTTP/1.1");

        assert!(Body::default().bytes().await.unwrap().is_empty());
    }
}
