use std::io;
use thiserror::Error;

/// Framing failures while reading a message head.
///
/// Any of these ends the current message and the connection carrying it;
/// there is no partial-message recovery.
#[derive(Debug, Error)]
pub(crate) enum ErrorKind {
    #[error("invalid HTTP method")]
    InvalidMethod,
    #[error("invalid request target")]
    InvalidUrl,
    #[error("malformed start line")]
    InvalidVersion,
    #[error("HTTP version not supported")]
    UnsupportedVersion,
    #[error("malformed status line")]
    InvalidStatus,

    #[error("malformed header line")]
    InvalidHeader,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("unsupported Transfer-Encoding")]
    UnsupportedEncoding,

    #[error("connection closed in the middle of a message")]
    UnexpectedEof,
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl ErrorKind {
    /// `true` for the errors a client sees when the peer just went away.
    #[inline]
    pub(crate) fn is_disconnect(&self) -> bool {
        match self {
            ErrorKind::UnexpectedEof => true,
            ErrorKind::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Errors returned while configuring or starting a [`Server`](crate::Server).
#[derive(Debug, Error)]
pub enum Error {
    /// Read and write timeouts must be both zero or both non-zero.
    #[error("read and write timeouts must be set or unset together")]
    AsymmetricTimeouts,
    /// Neither a listener nor an address to bind was given.
    #[error("either `listener` or `address` must be configured")]
    MissingAddress,
    /// [`Server::start`](crate::Server::start) was called twice.
    #[error("server already started")]
    AlreadyStarted,
    /// The acceptor could not be bound.
    #[error("failed to bind acceptor: {0}")]
    Bind(#[source] io::Error),
}

/// Errors returned by [`Client`](crate::Client).
#[derive(Debug, Error)]
pub enum ClientError {
    /// No transport is open.
    #[error("client is not connected")]
    NotConnected,
    /// The transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The peer sent something that is not a valid HTTP/1.x response.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<ErrorKind> for ClientError {
    fn from(err: ErrorKind) -> Self {
        match err {
            ErrorKind::Io(e) => ClientError::Io(e),
            other => ClientError::Protocol(other.to_string()),
        }
    }
}
