use crate::{
    http::{request::Request, response::Response, types::StatusCode},
    routing::{matcher::MatchInfo, table::RouteHandler},
    server::server_impl::{Handler, HandlerFuture},
};

/// Handler that only sets a status code, with an empty body.
///
/// ```
/// use strand_web::{routing::path_match, RoutingTable, StatusCode, StockHandler};
///
/// let table = RoutingTable::builder()
///     .route(path_match("/health"), StockHandler::new(StatusCode::NoContent))
///     .default_handler(StockHandler::new(StatusCode::NotFound))
///     .build();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockHandler {
    status: StatusCode,
}

impl StockHandler {
    #[inline]
    pub const fn new(status: StatusCode) -> Self {
        Self { status }
    }

    #[inline]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    fn apply(&self, resp: &mut Response) -> bool {
        resp.status(self.status);
        true
    }
}

impl Handler for StockHandler {
    #[inline]
    fn handle<'a>(&'a self, _: &'a mut Request, resp: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(std::future::ready(self.apply(resp)))
    }
}

impl RouteHandler for StockHandler {
    #[inline]
    fn handle<'a>(
        &'a self,
        _: &'a MatchInfo,
        _: &'a mut Request,
        resp: &'a mut Response,
    ) -> HandlerFuture<'a> {
        Box::pin(std::future::ready(self.apply(resp)))
    }
}
