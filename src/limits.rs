//! Server configuration: acceptor, connection and request limits
//!
//! Every structure has conservative defaults; override only the fields you
//! need and fill the rest with `..Default::default()`.
//!
//! # Examples
//!
//! ```no_run
//! use strand_web::{Server, StockHandler, StatusCode};
//! use strand_web::limits::{ConnLimits, ReqLimits};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::builder()
//!         .address("127.0.0.1")
//!         .port(8080)
//!         .handler(StockHandler::new(StatusCode::NoContent))
//!         .connection_limits(ConnLimits {
//!             read_timeout: Duration::from_secs(5),
//!             write_timeout: Duration::from_secs(5),
//!             max_keep_alive_requests: 1_000,
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 32,
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .unwrap();
//!
//!     server.start().unwrap();
//!     server.join().await;
//! }
//! ```

use std::time::Duration;

/// Default number of requests served on one connection before the server
/// answers with `Connection: close`.
pub const DEFAULT_KEEP_ALIVE_REQUESTS: usize = 100;

/// Acceptor settings.
///
/// `backlog` and `reuse_address` only apply when the server binds its own
/// socket, not to a listener handed to
/// [`ServerBuilder::listener`](crate::ServerBuilder::listener).
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Length of the pending-connection queue passed to `listen(2)` (default: `1024`).
    pub backlog: i32,

    /// Set `SO_REUSEADDR` before binding (default: `true`).
    ///
    /// Allows an immediate restart while old sockets linger in `TIME_WAIT`.
    pub reuse_address: bool,

    /// Disable Nagle's algorithm on accepted connections (default: `true`).
    ///
    /// Responses are written in a single buffer, so delaying small segments
    /// only adds latency.
    pub nodelay: bool,

    /// Request/response pairs kept for reuse by later connections (default: `256`).
    ///
    /// A finished connection returns its cleared messages, with their
    /// allocations, to the pool; `0` disables pooling.
    pub message_pool: usize,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            backlog: 1024,
            reuse_address: true,
            nodelay: true,
            message_pool: 256,
        }
    }
}

/// Per-connection timeouts and keep-alive policy.
///
/// # Timeouts
///
/// `read_timeout` bounds receiving one request head (including the idle
/// wait for its first byte on a kept-alive connection), each wait of the
/// handler for request body data, and draining the body. `write_timeout`
/// bounds sending one response. When a deadline
/// passes, the connection's watchdog closes the transport and the stuck
/// operation fails.
///
/// `Duration::ZERO` disables a timeout. Both must be zero or both non-zero,
/// otherwise [`ServerBuilder::build`](crate::ServerBuilder::build) returns
/// [`Error::AsymmetricTimeouts`](crate::Error::AsymmetricTimeouts).
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Deadline for reading a request (default: disabled).
    pub read_timeout: Duration,

    /// Deadline for writing a response (default: disabled).
    pub write_timeout: Duration,

    /// Requests served on one connection before keep-alive is refused
    /// (default: [`DEFAULT_KEEP_ALIVE_REQUESTS`]).
    ///
    /// After this many request/response cycles, the next response is sent
    /// with `Connection: close` and the connection ends.
    pub max_keep_alive_requests: usize,
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            max_keep_alive_requests: DEFAULT_KEEP_ALIVE_REQUESTS,
        }
    }
}

impl ConnLimits {
    /// `true` if a watchdog task is needed for connections.
    #[inline]
    pub(crate) fn has_timeouts(&self) -> bool {
        !self.read_timeout.is_zero() || !self.write_timeout.is_zero()
    }

    #[inline]
    pub(crate) fn is_symmetric(&self) -> bool {
        self.read_timeout.is_zero() == self.write_timeout.is_zero()
    }
}

/// Limits applied while reading a message head.
///
/// Bodies are streamed to the handler, which decides how much to read;
/// whatever it leaves unread is discarded. Only the announced size is
/// checked here.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum size of the start line and of each header line, CRLF
    /// included (default: `8192`).
    pub line_size: usize,

    /// Maximum number of header lines (default: `64`).
    pub header_count: usize,

    /// Largest `Content-Length` accepted (default: 8 MiB).
    ///
    /// A message announcing more is a framing error: the connection is
    /// closed without an answer.
    pub body_size: usize,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            line_size: 8 * 1024,
            header_count: 64,
            body_size: 8 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_symmetry() {
        #[rustfmt::skip]
        let cases = [
            (0, 0, true,  false),
            (5, 5, true,  true),
            (5, 0, false, true),
            (0, 5, false, true),
        ];

        for (read, write, symmetric, watchdog) in cases {
            let limits = ConnLimits {
                read_timeout: Duration::from_secs(read),
                write_timeout: Duration::from_secs(write),
                ..ConnLimits::default()
            };

            assert_eq!(limits.is_symmetric(), symmetric);
            assert_eq!(limits.has_timeouts(), watchdog);
        }
    }

    #[test]
    fn defaults() {
        assert_eq!(ConnLimits::default().max_keep_alive_requests, 100);
        assert!(!ConnLimits::default().has_timeouts());
        assert_eq!(ReqLimits::default().line_size, 8192);
        assert_eq!(ReqLimits::default().body_size, 8 << 20);
        assert!(ServerLimits::default().reuse_address);
    }
}
