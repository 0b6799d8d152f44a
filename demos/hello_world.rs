use strand_web::{Request, Response, Server, StatusCode};

#[tokio::main]
async fn main() {
    let server = Server::builder()
        .address("127.0.0.1")
        .port(8080)
        .handler(|_: &mut Request, resp: &mut Response| {
            resp.status(StatusCode::Ok)
                .set_content_type("text/plain")
                .body("Hello, world!");
            true
        })
        .build()
        .unwrap();

    server.start().unwrap();
    server.join().await;
}
