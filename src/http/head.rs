//! Message head framing shared by server requests and client responses.
//!
//! A head is a start line followed by `name: value` lines and a blank line.
//! Lines end in CRLF, a bare LF is accepted. Blank lines before the start
//! line are skipped.

use crate::{
    errors::ErrorKind,
    http::types::{self, HeaderMap, Version},
    limits::ReqLimits,
};
use memchr::memchr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub(crate) const CRLF: &[u8] = b"\r\n";

/// Start line and header block of one message, before interpretation.
#[derive(Debug, Default)]
pub(crate) struct RawHead {
    pub(crate) start_line: String,
    pub(crate) headers: HeaderMap,
}

/// Body framing derived from a header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Framing {
    pub(crate) content_length: usize,
    pub(crate) keep_alive: bool,
}

/// Reads one head.
///
/// Returns `Ok(None)` if the stream ends before the first byte of the
/// message, which is how a peer ends a persistent connection.
pub(crate) async fn read_head<R>(
    reader: &mut R,
    limits: &ReqLimits,
) -> Result<Option<RawHead>, ErrorKind>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut line = Vec::with_capacity(128);

    let start_line = loop {
        if read_line(reader, &mut line, limits.line_size).await? == 0 {
            return Ok(None);
        }

        let text = line_text(&line).ok_or(ErrorKind::InvalidVersion)?;
        if !text.is_empty() {
            break text.to_owned();
        }
    };

    let mut headers = HeaderMap::new();
    let mut count = 0;

    loop {
        if read_line(reader, &mut line, limits.line_size).await? == 0 {
            return Err(ErrorKind::UnexpectedEof);
        }

        let text = line_text(&line).ok_or(ErrorKind::InvalidHeader)?;
        if text.is_empty() {
            break;
        }

        count += 1;
        if count > limits.header_count {
            return Err(ErrorKind::TooManyHeaders);
        }

        let (name, value) = split_header(text)?;
        headers.insert(name, value);
    }

    Ok(Some(RawHead {
        start_line,
        headers,
    }))
}

/// Appends one line (terminator included) to the cleared `line`.
///
/// Returns the number of bytes read; `0` only at end of stream.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>, limit: usize) -> Result<usize, ErrorKind>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    line.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return match line.is_empty() {
                true => Ok(0),
                false => Err(ErrorKind::UnexpectedEof),
            };
        }

        let (found, used) = match memchr(b'\n', available) {
            Some(pos) => (true, pos + 1),
            None => (false, available.len()),
        };

        if line.len() + used > limit {
            return Err(ErrorKind::LineTooLong(limit));
        }

        line.extend_from_slice(&available[..used]);
        reader.consume(used);

        if found {
            return Ok(line.len());
        }
    }
}

/// Strips the line terminator and validates the rest as UTF-8.
#[inline]
fn line_text(line: &[u8]) -> Option<&str> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    simdutf8::basic::from_utf8(line).ok()
}

#[inline]
fn split_header(text: &str) -> Result<(&str, &str), ErrorKind> {
    let colon = memchr(b':', text.as_bytes()).ok_or(ErrorKind::InvalidHeader)?;
    let name = &text[..colon];

    if name.is_empty()
        || name
            .bytes()
            .any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(ErrorKind::InvalidHeader);
    }

    Ok((name, text[colon + 1..].trim()))
}

/// Interprets `Content-Length`, `Connection` and `Transfer-Encoding`.
///
/// A `Content-Length` above `limits.body_size` is a framing error.
pub(crate) fn framing(
    headers: &HeaderMap,
    version: Version,
    limits: &ReqLimits,
) -> Result<Framing, ErrorKind> {
    if let Some(encoding) = headers.get("Transfer-Encoding") {
        if !encoding.eq_ignore_ascii_case("identity") {
            return Err(ErrorKind::UnsupportedEncoding);
        }
    }

    let content_length = match headers.get("Content-Length") {
        Some(value) => {
            types::slice_to_usize(value.as_bytes()).ok_or(ErrorKind::InvalidContentLength)?
        }
        None => 0,
    };

    if content_length > limits.body_size {
        return Err(ErrorKind::BodyTooLarge(limits.body_size));
    }

    Ok(Framing {
        content_length,
        keep_alive: keep_alive(headers.get("Connection"), version),
    })
}

/// `Connection` is a comma-separated token list; `close` wins over
/// `keep-alive`.
fn keep_alive(connection: Option<&str>, version: Version) -> bool {
    let mut keep_alive = version.keep_alive_by_default();

    for token in connection.into_iter().flat_map(|v| v.split(',')) {
        let token = token.trim();

        if token.eq_ignore_ascii_case("close") {
            return false;
        }
        if token.eq_ignore_ascii_case("keep-alive") {
            keep_alive = true;
        }
    }

    keep_alive
}

/// Sets the headers every outgoing message carries.
///
/// A stale `Content-Length` or `Connection`, whatever its case, is replaced.
pub(crate) fn set_framing(headers: &mut HeaderMap, content_length: usize, keep_alive: bool) {
    headers.insert("Content-Length", content_length.to_string());
    headers.insert(
        "Connection",
        match keep_alive {
            true => "keep-alive",
            false => "close",
        },
    );
}

/// Writes `a SP b SP c CRLF`, the header block and the blank line.
pub(crate) fn write_head(buf: &mut Vec<u8>, start: [&str; 3], headers: &HeaderMap) {
    buf.extend_from_slice(start[0].as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(start[1].as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(start[2].as_bytes());
    buf.extend_from_slice(CRLF);

    for (name, value) in headers.iter() {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(CRLF);
    }

    buf.extend_from_slice(CRLF);
}
