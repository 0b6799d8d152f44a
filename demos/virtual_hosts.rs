use std::time::Duration;
use strand_web::{limits::ConnLimits, Request, Response, Server, StatusCode, StockHandler};

#[tokio::main]
async fn main() {
    let server = Server::builder()
        .address("0.0.0.0")
        .port(8080)
        .handler(StockHandler::new(StatusCode::MisdirectedRequest))
        .connection_limits(ConnLimits {
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            max_keep_alive_requests: 50,
        })
        .build()
        .unwrap();

    server.add_virtual_host("api.localhost", |_: &mut Request, resp: &mut Response| {
        resp.set_content_type("application/json").body(r#"{"service": "api"}"#);
        true
    });
    server.add_virtual_host("www.localhost", |req: &mut Request, resp: &mut Response| {
        resp.set_content_type("text/html")
            .body(format!("<h1>{}</h1>", req.url()));
        true
    });

    server.start().unwrap();
    println!("try: curl -H 'Host: api.localhost' http://127.0.0.1:8080/");

    tokio::signal::ctrl_c().await.unwrap();

    // Handlers can change while serving
    server.remove_virtual_host("www.localhost");
    server.stop().await;
}
