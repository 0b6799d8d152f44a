//! Shared utilities for the loopback tests.

#![allow(dead_code)]

use std::{future::Future, time::Duration};
use strand_web::{
    limits::ConnLimits, Client, ClientRequest, ClientResponse, Handler, HandlerFuture, Method,
    Request, Response, Server,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

/// Logs to the test output when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Starts a server on an ephemeral loopback port.
pub fn start<H: Handler>(handler: H, limits: ConnLimits) -> Server {
    init_tracing();

    let server = Server::builder()
        .address("127.0.0.1")
        .port(0)
        .handler(handler)
        .connection_limits(limits)
        .build()
        .unwrap();

    server.start().unwrap();
    server
}

pub async fn client(server: &Server) -> Client {
    let addr = server.local_addr().unwrap();

    let mut client = Client::new();
    client
        .connect(&addr.ip().to_string(), addr.port())
        .await
        .unwrap();
    client
}

pub async fn send(client: &mut Client, method: Method, url: &str) -> ClientResponse {
    let mut req = ClientRequest::new(method, url);
    let mut resp = ClientResponse::new();

    client.send_request(&mut req, &mut resp).await.unwrap();
    resp
}

/// Writes `input` on a fresh connection and reads until the server closes it.
pub async fn raw(server: &Server, input: &[u8]) -> String {
    let mut stream = TcpStream::connect(server.local_addr().unwrap())
        .await
        .unwrap();
    stream.write_all(input).await.unwrap();

    let mut output = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut output))
        .await
        .expect("server kept the connection open");

    String::from_utf8(output).unwrap()
}

/// Polls `condition` until it holds, for at most five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

/// Answers with the request body and an `X-Method` header.
pub struct Echo;

impl Handler for Echo {
    fn handle<'a>(&'a self, req: &'a mut Request, resp: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Ok(body) = req.body().bytes().await else {
                return false;
            };

            resp.header("X-Method", req.method().as_str()).body(body);
            true
        })
    }
}

/// Sleeps before answering `done`.
pub struct Slow(pub Duration);

impl Handler for Slow {
    fn handle<'a>(&'a self, _: &'a mut Request, resp: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.0).await;
            resp.body("done");
            true
        })
    }
}
