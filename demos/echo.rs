use strand_web::{Handler, HandlerFuture, Request, Response, Server, StatusCode};
use tokio::net::TcpListener;

struct Echo;

impl Handler for Echo {
    fn handle<'a>(&'a self, req: &'a mut Request, resp: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(async move {
            let body = match req.body().bytes().await {
                Ok(body) => body,
                Err(_) => return false,
            };

            let result = format!(
                r#"{{"url": {:?}, "body": {:?}}}"#,
                req.parsed_url().path,
                String::from_utf8_lossy(&body)
            );

            resp.status(StatusCode::Ok)
                .set_content_type("application/json")
                .body(result);
            true
        })
    }
}

#[tokio::main]
async fn main() {
    let server = Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .handler(Echo)
        .build()
        .unwrap();

    server.start().unwrap();
    server.join().await;
}
