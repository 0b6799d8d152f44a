use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};
use strand_web::{
    routing::{method_is, path_match, rest_resources, MatchInfo},
    Method, Request, Response, RoutingTable, Server, StatusCode, StockHandler,
};
use tracing_subscriber::EnvFilter;

type Store = Arc<Mutex<BTreeMap<String, String>>>;

fn items(store: Store) -> impl Fn(&MatchInfo, &mut Request, &mut Response) -> bool {
    move |info: &MatchInfo, req: &mut Request, resp: &mut Response| {
        let mut store = store.lock().unwrap();

        match (req.method(), info.get("id")) {
            (Method::Get, None) => {
                let list: Vec<&String> = store.keys().collect();
                resp.body(format!("{list:?}"))
            }
            (Method::Get, Some(id)) => match store.get(id) {
                Some(value) => resp.body(value),
                None => resp.status(StatusCode::NotFound),
            },
            (Method::Put, Some(id)) => {
                let value = req.parsed_url().query_param("value").unwrap_or_default();
                store.insert(id.clone(), value.to_owned());
                resp.status(StatusCode::NoContent)
            }
            (Method::Delete, Some(id)) => match store.remove(id) {
                Some(_) => resp.status(StatusCode::NoContent),
                None => resp.status(StatusCode::NotFound),
            },
            (Method::Delete, None) => {
                store.clear();
                resp.status(StatusCode::NoContent)
            }
            _ => resp.status(StatusCode::MethodNotAllowed),
        };

        true
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .init();

    let store = Store::default();

    let table = RoutingTable::builder()
        .route(rest_resources("/items"), items(store))
        .route(
            path_match("/greet/:name") & method_is(Method::Get),
            |info: &MatchInfo, _: &mut Request, resp: &mut Response| {
                resp.body(format!("Hello, {}!", info["name"]));
                true
            },
        )
        .route(path_match("/health"), StockHandler::new(StatusCode::NoContent))
        .default_handler(StockHandler::new(StatusCode::NotFound))
        .build();

    let server = Server::builder()
        .address("127.0.0.1")
        .port(8080)
        .handler(table)
        .build()
        .unwrap();

    server.start().unwrap();

    tokio::signal::ctrl_c().await.unwrap();
    server.stop().await;
}
