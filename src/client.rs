//! HTTP/1.x client over one persistent TCP connection.
//!
//! The client frames requests and responses with the same head reader as
//! the server: fixed-length bodies only, `Content-Length` and `Connection`
//! always written from the request itself.
//!
//! ```no_run
//! use strand_web::{Client, ClientRequest, ClientResponse, Method};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), strand_web::ClientError> {
//! let mut client = Client::new();
//! client.connect("127.0.0.1", 8080).await?;
//!
//! let mut req = ClientRequest::new(Method::Get, "/status");
//! let mut resp = ClientResponse::new();
//! client.send_request(&mut req, &mut resp).await?;
//!
//! println!("{} {}", resp.status(), String::from_utf8_lossy(resp.body()));
//! # Ok(())
//! # }
//! ```

use crate::{
    errors::{ClientError, ErrorKind},
    http::{
        head,
        types::{self, HeaderMap, Method, StatusCode, Version},
        url,
    },
    limits::ReqLimits,
};
use std::io;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};
use tracing::debug;

/// Connection to one HTTP server.
///
/// A response without keep-alive, or any failure, disconnects the client;
/// call [`connect`](Client::connect) again to reuse it.
#[derive(Debug, Default)]
pub struct Client {
    stream: Option<BufReader<TcpStream>>,
    host: String,
    limits: ReqLimits,
}

impl Client {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits applied to response heads.
    #[inline]
    pub fn with_limits(limits: ReqLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Connects to `host:port`, dropping any previous connection.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), ClientError> {
        self.disconnect().await;

        let stream = TcpStream::connect((host, port)).await?;
        let _ = stream.set_nodelay(true);

        self.host = host_header(host, port);
        self.stream = Some(BufReader::new(stream));

        debug!(host = %self.host, "client connected");
        Ok(())
    }

    /// Like [`connect`](Client::connect), with the port given as a number
    /// or as `http`/`https`.
    pub async fn connect_service(&mut self, host: &str, service: &str) -> Result<(), ClientError> {
        let port = service_port(service).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown service `{service}`"),
            )
        })?;

        self.connect(host, port).await
    }

    /// Closes the connection, if any.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!(host = %self.host, "client disconnected");
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Sends `req` and reads the answer into `resp`.
    ///
    /// A `Host` header is added when `req` has none. The connection is
    /// closed after a response without keep-alive and after any error.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotConnected`] without a connection
    /// - [`ClientError::Io`] if the transport fails
    /// - [`ClientError::Protocol`] if the response is malformed or truncated
    pub async fn send_request(
        &mut self,
        req: &mut ClientRequest,
        resp: &mut ClientResponse,
    ) -> Result<(), ClientError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ClientError::NotConnected);
        };

        if !req.headers.contains("Host") {
            req.headers.insert("Host", self.host.as_str());
        }

        let result = exchange(stream, &self.limits, req, resp).await;

        if result.is_err() || !resp.keep_alive {
            self.disconnect().await;
        }

        result
    }
}

async fn exchange(
    stream: &mut BufReader<TcpStream>,
    limits: &ReqLimits,
    req: &mut ClientRequest,
    resp: &mut ClientResponse,
) -> Result<(), ClientError> {
    let mut buf = Vec::new();
    req.encode(&mut buf);

    stream.write_all(&buf).await?;
    stream.flush().await?;

    resp.clear();
    resp.read_head(stream, limits).await?;

    if resp.has_body(req.method) {
        let expected = resp.content_length;
        let read = (&mut *stream)
            .take(expected as u64)
            .read_to_end(&mut resp.body)
            .await?;

        if read < expected {
            return Err(ErrorKind::UnexpectedEof.into());
        }
    }

    Ok(())
}

/// `Host` value for `host:port`; IPv6 literals are bracketed.
fn host_header(host: &str, port: u16) -> String {
    let host = match host.contains(':') && !host.starts_with('[') {
        true => format!("[{host}]"),
        false => host.to_owned(),
    };

    match port == url::default_port("http") {
        true => host,
        false => format!("{host}:{port}"),
    }
}

fn service_port(service: &str) -> Option<u16> {
    match service {
        "http" | "https" => Some(url::default_port(service)),
        _ => service.parse().ok(),
    }
}

//

/// Request sent by a [`Client`].
///
/// The body is filled with [`body`](ClientRequest::body) or through
/// [`std::io::Write`].
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) keep_alive: bool,
    pub(crate) body: Vec<u8>,
}

impl Default for ClientRequest {
    fn default() -> Self {
        Self::new(Method::Get, "/")
    }
}

impl ClientRequest {
    /// An HTTP/1.1 keep-alive request without headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            version: Version::Http11,
            headers: HeaderMap::new(),
            keep_alive: true,
            body: Vec::new(),
        }
    }

    #[inline]
    pub fn version(&mut self, version: Version) -> &mut Self {
        self.version = version;
        self
    }

    /// Sets header `name`, replacing any previous value.
    #[inline]
    pub fn header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

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

    #[inline]
    pub fn set_keep_alive(&mut self, keep_alive: bool) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.body
    }

    fn encode(&mut self, buf: &mut Vec<u8>) {
        head::set_framing(&mut self.headers, self.body.len(), self.keep_alive);

        head::write_head(
            buf,
            [self.method.as_str(), &self.url, self.version.as_str()],
            &self.headers,
        );
        buf.extend_from_slice(&self.body);
    }
}

impl io::Write for ClientRequest {
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

/// Response received by a [`Client`].
#[derive(Debug, Clone, Default)]
pub struct ClientResponse {
    pub(crate) status: u16,
    pub(crate) reason: String,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) content_length: usize,
    pub(crate) keep_alive: bool,
    pub(crate) body: Vec<u8>,
}

impl ClientResponse {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.status = 0;
        self.reason.clear();
        self.version = Version::Invalid;
        self.headers.clear();
        self.content_length = 0;
        self.keep_alive = false;
        self.body.clear();
    }

    /// Numeric status code as received.
    #[inline]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Status code, if it is a registered one.
    #[inline]
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status)
    }

    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Declared `Content-Length`; for `HEAD` requests the body stays empty.
    #[inline]
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    #[inline]
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    async fn read_head(
        &mut self,
        reader: &mut BufReader<TcpStream>,
        limits: &ReqLimits,
    ) -> Result<(), ErrorKind> {
        let raw = head::read_head(reader, limits)
            .await?
            .ok_or(ErrorKind::UnexpectedEof)?;

        self.parse_status_line(&raw.start_line)?;

        let framing = head::framing(&raw.headers, self.version, limits)?;
        self.headers = raw.headers;
        self.content_length = framing.content_length;
        self.keep_alive = framing.keep_alive;

        Ok(())
    }

    fn parse_status_line(&mut self, line: &str) -> Result<(), ErrorKind> {
        let (version, rest) = line.split_once(' ').ok_or(ErrorKind::InvalidStatus)?;

        self.version = match Version::from_bytes(version.as_bytes()) {
            Some(version) => version,
            None if version.starts_with("HTTP/") => return Err(ErrorKind::UnsupportedVersion),
            None => return Err(ErrorKind::InvalidStatus),
        };

        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
        if code.len() != 3 {
            return Err(ErrorKind::InvalidStatus);
        }

        self.status = types::slice_to_usize(code.as_bytes())
            .and_then(|code| u16::try_from(code).ok())
            .ok_or(ErrorKind::InvalidStatus)?;
        self.reason.push_str(reason.trim());

        Ok(())
    }

    /// Whether a body follows the head (RFC 9112, section 6.3).
    fn has_body(&self, method: Method) -> bool {
        let bodiless = (100..200).contains(&self.status) || matches!(self.status, 204 | 304);
        method != Method::Head && !bodiless
    }
}
