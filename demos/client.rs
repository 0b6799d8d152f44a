use strand_web::{Client, ClientRequest, ClientResponse, Method};

#[tokio::main]
async fn main() -> Result<(), strand_web::ClientError> {
    let mut client = Client::new();
    client.connect_service("127.0.0.1", "8080").await?;

    let mut resp = ClientResponse::new();

    for path in ["/health", "/greet/world", "/items"] {
        let mut req = ClientRequest::new(Method::Get, path);
        client.send_request(&mut req, &mut resp).await?;

        println!(
            "GET {path} -> {} {} ({} bytes)\n{}",
            resp.status(),
            resp.reason(),
            resp.content_length(),
            String::from_utf8_lossy(resp.body())
        );

        if !client.is_connected() {
            break;
        }
    }

    client.disconnect().await;
    Ok(())
}
