//! Server lifecycle over loopback TCP.

use std::time::Duration;
use strand_web::{
    limits::ConnLimits, Client, ClientRequest, ClientResponse, Error, Method, StatusCode,
    StockHandler,
};

mod common;

use common::{Echo, Slow};

#[tokio::test]
async fn keep_alive_round_trips() {
    let server = common::start(Echo, ConnLimits::default());
    let mut client = common::client(&server).await;

    for i in 0..3 {
        let mut req = ClientRequest::new(Method::Put, format!("/items/{i}"));
        req.body(format!("payload {i}"));
        let mut resp = ClientResponse::new();

        client.send_request(&mut req, &mut resp).await.unwrap();

        assert_eq!(resp.status_code(), Some(StatusCode::Ok));
        assert_eq!(resp.header("x-method"), Some("PUT"));
        assert_eq!(resp.body(), format!("payload {i}").as_bytes());
        assert!(resp.is_keep_alive());
    }

    assert!(client.is_connected());
    assert_eq!(server.active_connections(), 1);

    client.disconnect().await;
    common::wait_until(|| server.active_connections() == 0).await;
}

#[tokio::test]
async fn keep_alive_limit_closes() {
    let limits = ConnLimits {
        max_keep_alive_requests: 2,
        ..ConnLimits::default()
    };
    let server = common::start(StockHandler::new(StatusCode::NoContent), limits);
    let mut client = common::client(&server).await;

    assert!(common::send(&mut client, Method::Get, "/").await.is_keep_alive());
    assert!(common::send(&mut client, Method::Get, "/").await.is_keep_alive());

    let last = common::send(&mut client, Method::Get, "/").await;
    assert_eq!(last.status(), 204);
    assert!(!last.is_keep_alive());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn pipelined_bodies_stay_separate() {
    let server = common::start(Echo, ConnLimits::default());

    let output = common::raw(
        &server,
        b"POST /one HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc\
          POST /two HTTP/1.1\r\nContent-Length: 2\r\nConnection: close\r\n\r\nxy",
    )
    .await;

    assert_eq!(
        output,
        "HTTP/1.1 200 OK\r\nX-Method: POST\r\nContent-Length: 3\r\nConnection: keep-alive\r\n\r\nabc\
         HTTP/1.1 200 OK\r\nX-Method: POST\r\nContent-Length: 2\r\nConnection: close\r\n\r\nxy"
    );
}

#[tokio::test]
async fn malformed_request_closes_without_answer() {
    let server = common::start(Echo, ConnLimits::default());

    #[rustfmt::skip]
    let cases: [&[u8]; 4] = [
        b"BREW /pot HTTP/1.1\r\n\r\n",
        b"GET / HTTP/2.0\r\n\r\n",
        b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n",
        b"GET / HTTP/1.1\r\nContent-Length: ten\r\n\r\n",
    ];

    for input in cases {
        assert_eq!(common::raw(&server, input).await, "");
    }
}

#[tokio::test]
async fn read_deadline_drops_stalled_client() {
    let limits = ConnLimits {
        read_timeout: Duration::from_millis(100),
        write_timeout: Duration::from_millis(100),
        ..ConnLimits::default()
    };
    let server = common::start(Echo, limits);

    // Half a head, then nothing
    assert_eq!(common::raw(&server, b"GET / HTTP/1.1\r\n").await, "");
    common::wait_until(|| server.active_connections() == 0).await;
}

#[tokio::test]
async fn read_deadline_covers_request_body() {
    let limits = ConnLimits {
        read_timeout: Duration::from_millis(100),
        write_timeout: Duration::from_millis(100),
        ..ConnLimits::default()
    };
    let server = common::start(Echo, limits);

    // Ten bytes announced, three sent
    let output = common::raw(&server, b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc").await;
    assert_eq!(output, "");

    common::wait_until(|| server.active_connections() == 0).await;
    common::within(server.stop()).await;
}

#[tokio::test]
async fn oversized_body_is_refused() {
    let server = common::start(Echo, ConnLimits::default());

    #[rustfmt::skip]
    let cases: [&[u8]; 2] = [
        b"POST / HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n",
        b"POST / HTTP/1.1\r\nContent-Length: 8388609\r\n\r\n",
    ];

    for input in cases {
        assert_eq!(common::raw(&server, input).await, "");
    }

    // Still serving
    let mut client = common::client(&server).await;
    assert_eq!(common::send(&mut client, Method::Get, "/").await.status(), 200);
}

#[tokio::test]
async fn stop_lets_in_flight_request_finish() {
    let server = common::start(Slow(Duration::from_millis(300)), ConnLimits::default());
    let mut client = common::client(&server).await;

    let request = tokio::spawn(async move {
        let resp = common::send(&mut client, Method::Get, "/").await;
        (resp, client.is_connected())
    });

    common::wait_until(|| server.active_connections() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    common::within(server.stop()).await;
    assert_eq!(server.active_connections(), 0);

    let (resp, connected) = request.await.unwrap();
    assert_eq!(resp.body(), b"done");
    assert!(!resp.is_keep_alive());
    assert!(!connected);
}

#[tokio::test]
async fn stop_closes_idle_connections() {
    let server = common::start(Echo, ConnLimits::default());
    let mut client = common::client(&server).await;

    assert_eq!(common::send(&mut client, Method::Get, "/").await.status(), 200);
    common::wait_until(|| server.active_connections() == 1).await;

    common::within(server.stop()).await;
    assert_eq!(server.active_connections(), 0);

    let mut req = ClientRequest::new(Method::Get, "/");
    let mut resp = ClientResponse::new();
    assert!(client.send_request(&mut req, &mut resp).await.is_err());
}

async fn status(client: &mut Client, host: &str) -> u16 {
    let mut req = ClientRequest::new(Method::Get, "/");
    req.header("Host", host);
    let mut resp = ClientResponse::new();

    client.send_request(&mut req, &mut resp).await.unwrap();
    resp.status()
}

#[tokio::test]
async fn virtual_hosts_change_at_runtime() {
    let server = common::start(StockHandler::new(StatusCode::NotFound), ConnLimits::default());
    let mut client = common::client(&server).await;

    server.add_virtual_host("API.local", StockHandler::new(StatusCode::Accepted));
    assert_eq!(status(&mut client, "api.local:8080").await, 202);
    assert_eq!(status(&mut client, "other.local").await, 404);

    assert!(server.set_request_handler("api.local", StockHandler::new(StatusCode::Created)));
    assert!(!server.set_request_handler("nope.local", StockHandler::new(StatusCode::Gone)));
    assert_eq!(status(&mut client, "api.local").await, 201);
    assert_eq!(status(&mut client, "nope.local").await, 404);

    server.set_default_request_handler(StockHandler::new(StatusCode::Gone));
    assert_eq!(status(&mut client, "nope.local").await, 410);

    assert!(server.remove_virtual_host("api.local"));
    assert!(!server.remove_virtual_host("api.local"));
    assert_eq!(status(&mut client, "api.local").await, 410);
}

#[tokio::test]
async fn start_twice_fails() {
    let server = common::start(Echo, ConnLimits::default());

    assert!(matches!(server.start(), Err(Error::AlreadyStarted)));
    assert!(server.local_addr().is_some());
}
