//! strand_web - HTTP/1.x server engine with composable routing
//!
//! A Tokio based HTTP/1.0 and HTTP/1.1 server: one task per connection,
//! persistent connections with a per-connection request limit, read and
//! write deadlines enforced by a watchdog, name-based virtual hosts and a
//! graceful [`stop`](Server::stop) that lets in-flight requests finish.
//! Requests are dispatched through a [`RoutingTable`] of composable
//! [matchers](routing::Matcher) with path parameters. A small [`Client`]
//! shares the same message framing.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: persistent connections and pipelining
//! - **HTTP/1.0**: closes after each response unless `Connection: keep-alive`
//! - Bodies are framed by `Content-Length` only; chunked requests are refused
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use strand_web::{Request, Response, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::builder()
//!         .address("127.0.0.1")
//!         .port(8080)
//!         .handler(|_: &mut Request, resp: &mut Response| {
//!             resp.status(StatusCode::Ok).body("Hello World!");
//!             true
//!         })
//!         .build()
//!         .unwrap();
//!
//!     server.start().unwrap();
//!     server.join().await;
//! }
//! ```
//! Routing:
//! ```no_run
//! use strand_web::{
//!     routing::{method_is, path_match, rest_resources, MatchInfo},
//!     Method, Request, Response, RoutingTable, Server, StatusCode, StockHandler,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let table = RoutingTable::builder()
//!         .route(
//!             path_match("/api/:user/name") & method_is(Method::Get),
//!             |info: &MatchInfo, _: &mut Request, resp: &mut Response| {
//!                 resp.body(&info["user"]);
//!                 true
//!             },
//!         )
//!         .route(rest_resources("/api/items"), StockHandler::new(StatusCode::NoContent))
//!         .default_handler(StockHandler::new(StatusCode::NotFound))
//!         .build();
//!
//!     let server = Server::builder()
//!         .address("0.0.0.0")
//!         .port(8080)
//!         .handler(table)
//!         .build()
//!         .unwrap();
//!
//!     server.start().unwrap();
//!     tokio::signal::ctrl_c().await.unwrap();
//!     server.stop().await;
//! }
//! ```
//! Advanced configuration:
//! ```no_run
//! use strand_web::{
//!     limits::{ConnLimits, ReqLimits, ServerLimits},
//!     Server, StatusCode, StockHandler,
//! };
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let server = Server::builder()
//!     .address("127.0.0.1")
//!     .port(8080)
//!     .handler(StockHandler::new(StatusCode::NoContent))
//!     .server_limits(ServerLimits {
//!         backlog: 4096,
//!         ..ServerLimits::default()
//!     })
//!     .connection_limits(ConnLimits {
//!         read_timeout: Duration::from_secs(5),
//!         write_timeout: Duration::from_secs(5),
//!         max_keep_alive_requests: 1000,
//!     })
//!     .request_limits(ReqLimits {
//!         header_count: 32,
//!         ..ReqLimits::default()
//!     })
//!     .build()
//!     .unwrap();
//! # }
//! ```
//!
//! # Logging
//!
//! Events are emitted with [`tracing`]; install a subscriber to see them.
//! Each connection runs in a `connection` span carrying the peer address.

pub(crate) mod http {
    pub(crate) mod head;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
    pub mod url;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
    pub(crate) mod signal;
}
pub mod routing {
    //! Request matchers and the routing table.
    //!
    //! See [`Matcher`] for the combinators and [`path_match`] for path
    //! templates.

    pub(crate) mod matcher;
    pub(crate) mod stock;
    pub(crate) mod table;

    pub use self::{
        matcher::{
            any, contains, ends_with, equals, header, method_is, path_match, rest_resources,
            starts_with, url, version_is, MatchInfo, Matcher,
        },
        stock::StockHandler,
        table::{RouteHandler, RoutingTable, RoutingTableBuilder},
    };
}
pub(crate) mod client;
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    client::{Client, ClientRequest, ClientResponse},
    errors::{ClientError, Error},
    http::{
        request::{Body, Request},
        response::Response,
        types::{HeaderMap, Method, StatusCode, Version},
        url::{self, ParsedUrl},
    },
    routing::{RouteHandler, RoutingTable, StockHandler},
    server::server_impl::{Handler, HandlerFuture, Server, ServerBuilder},
};
