use crate::{
    http::{request::Request, response::Response, types::StatusCode},
    routing::{
        matcher::{MatchInfo, Matcher},
        stock::StockHandler,
    },
    server::server_impl::{Handler, HandlerFuture},
};
use std::{fmt, sync::Arc};

/// Handler of a routing rule; receives the captures of its matcher.
///
/// Any `Fn(&MatchInfo, &mut Request, &mut Response) -> bool` closure is a
/// route handler. The returned `bool` has the meaning of
/// [`Handler::handle`].
///
/// # Examples
/// ```
/// use strand_web::{routing::MatchInfo, Request, Response, StatusCode};
///
/// let show_user = |info: &MatchInfo, _: &mut Request, resp: &mut Response| {
///     match info.get("id") {
///         Some(id) => resp.status(StatusCode::Ok).body(format!("user {id}")),
///         None => resp.status(StatusCode::BadRequest),
///     };
///     true
/// };
/// # let _ = show_user;
/// ```
pub trait RouteHandler: Send + Sync + 'static {
    fn handle<'a>(
        &'a self,
        info: &'a MatchInfo,
        req: &'a mut Request,
        resp: &'a mut Response,
    ) -> HandlerFuture<'a>;
}

impl<F> RouteHandler for F
where
    F: Fn(&MatchInfo, &mut Request, &mut Response) -> bool + Send + Sync + 'static,
{
    #[inline]
    fn handle<'a>(
        &'a self,
        info: &'a MatchInfo,
        req: &'a mut Request,
        resp: &'a mut Response,
    ) -> HandlerFuture<'a> {
        Box::pin(std::future::ready(self(info, req, resp)))
    }
}

/// Ordered list of `(matcher, handler)` rules.
///
/// The first rule whose matcher accepts the request handles it; captures
/// of rules that did not match are discarded. Without a match the default
/// handler runs (`404 Not Found` unless configured).
///
/// The table is itself a [`Handler`], usable as the default handler or as
/// a virtual host of a [`Server`](crate::Server).
///
/// # Examples
/// ```
/// use strand_web::{
///     routing::{method_is, path_match, MatchInfo},
///     Method, Request, Response, RoutingTable, StatusCode, StockHandler,
/// };
///
/// let table = RoutingTable::builder()
///     .route(
///         path_match("/users/:id") & method_is(Method::Get),
///         |info: &MatchInfo, _: &mut Request, resp: &mut Response| {
///             resp.body(format!("user {}", info["id"]));
///             true
///         },
///     )
///     .route(!method_is(Method::Get), StockHandler::new(StatusCode::MethodNotAllowed))
///     .build();
/// ```
pub struct RoutingTable {
    rules: Vec<(Matcher, Arc<dyn RouteHandler>)>,
    default: Arc<dyn Handler>,
}

impl RoutingTable {
    #[inline]
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder {
            rules: Vec::new(),
            default: None,
        }
    }

    /// Number of rules.
    #[inline]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Handler for RoutingTable {
    fn handle<'a>(&'a self, req: &'a mut Request, resp: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(async move {
            let mut info = MatchInfo::new();

            for (matcher, handler) in &self.rules {
                if matcher.matches(req, &mut info) {
                    return handler.handle(&info, req, resp).await;
                }
                info.clear();
            }

            self.default.handle(req, resp).await
        })
    }
}

impl fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTable")
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`RoutingTable`]; rules are evaluated in insertion order.
pub struct RoutingTableBuilder {
    rules: Vec<(Matcher, Arc<dyn RouteHandler>)>,
    default: Option<Arc<dyn Handler>>,
}

impl RoutingTableBuilder {
    /// Appends a rule.
    #[inline]
    pub fn route<H: RouteHandler>(mut self, matcher: Matcher, handler: H) -> Self {
        self.rules.push((matcher, Arc::new(handler)));
        self
    }

    /// Handler for requests no rule matches.
    #[inline]
    pub fn default_handler<H: Handler>(mut self, handler: H) -> Self {
        self.default = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> RoutingTable {
        let default: Arc<dyn Handler> = match self.default {
            Some(handler) => handler,
            None => Arc::new(StockHandler::new(StatusCode::NotFound)),
        };

        RoutingTable {
            rules: self.rules,
            default,
        }
    }
}
