use crate::{
    errors::Error,
    http::{request::Request, response::Response, types::Method},
    limits::{ConnLimits, ReqLimits, ServerLimits},
    server::{connection::Connection, signal::Signal},
};
use arc_swap::ArcSwap;
use crossbeam::queue::ArrayQueue;
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    collections::HashMap,
    future::Future,
    io,
    net::{SocketAddr, ToSocketAddrs},
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, OnceLock, PoisonError,
    },
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::Notify,
};
use tracing::{debug, debug_span, info, warn, Instrument};

/// Future returned by [`Handler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Processes one request and fills its response.
///
/// The returned `bool` decides the fate of the connection: `true` sends the
/// response and keeps serving (if keep-alive allows), `false` drops the
/// connection without sending anything.
///
/// Any `Fn(&mut Request, &mut Response) -> bool` closure is a handler.
/// Implement the trait directly when the handler needs to await, for
/// instance to read the request body.
///
/// # Examples
///
/// A closure:
/// ```
/// use strand_web::{Handler, Request, Response, StatusCode};
///
/// fn hello() -> impl Handler {
///     |_: &mut Request, resp: &mut Response| {
///         resp.status(StatusCode::Ok).body("Hello, world!");
///         true
///     }
/// }
/// ```
/// An asynchronous handler:
/// ```
/// use strand_web::{Handler, HandlerFuture, Request, Response, StatusCode};
///
/// struct Echo;
///
/// impl Handler for Echo {
///     fn handle<'a>(&'a self, req: &'a mut Request, resp: &'a mut Response) -> HandlerFuture<'a> {
///         Box::pin(async move {
///             match req.body().bytes().await {
///                 Ok(body) => resp.status(StatusCode::Ok).body(body),
///                 Err(_) => return false,
///             };
///             true
///         })
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Handles `req`, writing the answer into `resp`.
    fn handle<'a>(&'a self, req: &'a mut Request, resp: &'a mut Response) -> HandlerFuture<'a>;
}

impl<F> Handler for F
where
    F: Fn(&mut Request, &mut Response) -> bool + Send + Sync + 'static,
{
    #[inline]
    fn handle<'a>(&'a self, req: &'a mut Request, resp: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(std::future::ready(self(req, resp)))
    }
}

/// Default handler of a server built without one: drops every connection.
fn refuse(_: &mut Request, _: &mut Response) -> bool {
    false
}

/// HTTP/1.x server with name-based virtual hosts.
///
/// Requests are dispatched by their `Host` header to a handler registered
/// with [`add_virtual_host`](Server::add_virtual_host), or to the default
/// handler. Handlers can be changed while the server runs.
///
/// # Lifecycle
///
/// [`start`](Server::start) binds the acceptor and spawns the accept loop,
/// one task per connection. [`stop`](Server::stop) stops accepting, lets
/// every in-flight request finish with `Connection: close`, closes idle
/// connections and returns once none is left. Dropping the server stops
/// the accept loop without waiting.
///
/// # Examples
///
/// ```no_run
/// use strand_web::{Request, Response, Server, StatusCode};
///
/// #[tokio::main]
/// async fn main() {
///     let server = Server::builder()
///         .address("127.0.0.1")
///         .port(8080)
///         .handler(|_: &mut Request, resp: &mut Response| {
///             resp.status(StatusCode::Ok).body("Hello world!");
///             true
///         })
///         .build()
///         .unwrap();
///
///     server.start().unwrap();
///
///     tokio::signal::ctrl_c().await.unwrap();
///     server.stop().await;
/// }
/// ```
pub struct Server {
    engine: Arc<Engine>,
    acceptor: Mutex<Acceptor>,
    started: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
}

enum Acceptor {
    Bind {
        address: String,
        port: u16,
        limits: ServerLimits,
    },
    Listener(TcpListener),
    Taken,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            address: None,
            port: 0,
            listener: None,
            handler: None,

            server_limits: ServerLimits::default(),
            connection_limits: ConnLimits::default(),
            request_limits: ReqLimits::default(),
        }
    }

    /// Binds the acceptor (unless a listener was supplied) and spawns the
    /// accept loop. Returns immediately.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] on a second call
    /// - [`Error::Bind`] if the address cannot be resolved or bound; the
    ///   server may be started again afterwards
    pub fn start(&self) -> Result<(), Error> {
        let mut acceptor = self
            .acceptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let listener = match std::mem::replace(&mut *acceptor, Acceptor::Taken) {
            Acceptor::Taken => return Err(Error::AlreadyStarted),
            Acceptor::Listener(listener) => listener,
            Acceptor::Bind {
                address,
                port,
                limits,
            } => match bind(&address, port, &limits) {
                Ok(listener) => listener,
                Err(err) => {
                    *acceptor = Acceptor::Bind {
                        address,
                        port,
                        limits,
                    };
                    return Err(Error::Bind(err));
                }
            },
        };
        drop(acceptor);

        if let Ok(addr) = listener.local_addr() {
            let _ = self.local_addr.set(addr);
        }

        self.started.store(true, Ordering::Release);
        tokio::spawn(accept_loop(self.engine.clone(), listener));

        Ok(())
    }

    /// Waits until the accept loop ends, after [`stop`](Server::stop) or an
    /// acceptor failure. Returns immediately if the server never started.
    pub async fn join(&self) {
        if self.started.load(Ordering::Acquire) {
            self.engine.accept_done.wait().await;
        }
    }

    /// Stops accepting and waits for every connection to end.
    ///
    /// Idle keep-alive connections are closed at once. A connection in the
    /// middle of a request finishes it and answers with `Connection: close`.
    pub async fn stop(&self) {
        self.engine.shutdown.raise();
        self.join().await;
        self.engine.wait_drained().await;

        info!("server stopped");
    }

    /// Address the acceptor is bound to, once known.
    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Number of connections currently being served.
    #[inline]
    pub fn active_connections(&self) -> usize {
        self.engine.active.load(Ordering::Acquire)
    }

    /// Routes requests whose `Host` is `host` (case-insensitive, port
    /// ignored) to `handler`, replacing any previous one.
    pub fn add_virtual_host<H: Handler>(&self, host: &str, handler: H) {
        let key = host_key(host);
        let handler: Arc<dyn Handler> = Arc::new(handler);

        self.engine.update_handlers(|table| {
            table.vhosts.insert(key.clone(), handler.clone());
        });

        debug!(host = %key, "virtual host added");
    }

    /// Removes a virtual host; returns `false` if it was not registered.
    pub fn remove_virtual_host(&self, host: &str) -> bool {
        let key = host_key(host);
        let mut removed = false;

        self.engine.update_handlers(|table| {
            removed = table.vhosts.remove(&key).is_some();
        });

        debug!(host = %key, removed, "virtual host removed");
        removed
    }

    /// Replaces the handler of an existing virtual host; returns `false`
    /// (and registers nothing) if `host` is unknown.
    pub fn set_request_handler<H: Handler>(&self, host: &str, handler: H) -> bool {
        let key = host_key(host);
        let handler: Arc<dyn Handler> = Arc::new(handler);
        let mut replaced = false;

        self.engine.update_handlers(|table| {
            replaced = match table.vhosts.get_mut(&key) {
                Some(slot) => {
                    *slot = handler.clone();
                    true
                }
                None => false,
            };
        });

        debug!(host = %key, replaced, "virtual host handler replaced");
        replaced
    }

    /// Replaces the handler used when no virtual host matches.
    pub fn set_default_request_handler<H: Handler>(&self, handler: H) {
        let handler: Arc<dyn Handler> = Arc::new(handler);

        self.engine.update_handlers(|table| {
            table.default = handler.clone();
        });

        debug!("default handler replaced");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.engine.shutdown.raise();
    }
}

fn bind(address: &str, port: u16, limits: &ServerLimits) -> io::Result<TcpListener> {
    let addr = (address, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing"))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(limits.reuse_address)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(limits.backlog)?;

    TcpListener::from_std(socket.into())
}

async fn accept_loop(engine: Arc<Engine>, listener: TcpListener) {
    match listener.local_addr() {
        Ok(addr) => info!(address = %addr, "accepting connections"),
        Err(_) => info!("accepting connections"),
    }

    loop {
        tokio::select! {
            _ = engine.shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if engine.nodelay {
                        let _ = stream.set_nodelay(true);
                    }
                    engine.spawn_connection(stream, Some(peer));
                }
                Err(err) => {
                    warn!(error = %err, "accept failed, acceptor stopped");
                    break;
                }
            },
        }
    }

    drop(listener);
    engine.accept_done.raise();

    info!("acceptor closed");
}

/// Lower-cased host without its `:port` suffix.
fn host_key(host: &str) -> String {
    let host = host.trim();

    let end = match host.starts_with('[') {
        true => host.find(']').map_or(host.len(), |pos| pos + 1),
        false => host.find(':').unwrap_or(host.len()),
    };

    host[..end].to_ascii_lowercase()
}

//

#[derive(Clone)]
struct HandlerTable {
    default: Arc<dyn Handler>,
    vhosts: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerTable {
    fn select(&self, req: &Request) -> Arc<dyn Handler> {
        req.header("Host")
            .and_then(|host| self.vhosts.get(&host_key(host)))
            .unwrap_or(&self.default)
            .clone()
    }
}

/// State shared by the accept loop and every connection task.
pub(crate) struct Engine {
    handlers: ArcSwap<HandlerTable>,

    active: AtomicUsize,
    drained: Notify,

    shutdown: Arc<Signal>,
    accept_done: Signal,

    /// Cleared messages of finished connections; `None` when disabled.
    messages: Option<ArrayQueue<(Request, Response)>>,

    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    nodelay: bool,
}

impl Engine {
    fn new(
        handler: Arc<dyn Handler>,
        server_limits: &ServerLimits,
        conn_limits: ConnLimits,
        req_limits: ReqLimits,
    ) -> Self {
        Self {
            handlers: ArcSwap::from_pointee(HandlerTable {
                default: handler,
                vhosts: HashMap::new(),
            }),

            active: AtomicUsize::new(0),
            drained: Notify::new(),

            shutdown: Arc::new(Signal::new()),
            accept_done: Signal::new(),

            messages: (server_limits.message_pool > 0)
                .then(|| ArrayQueue::new(server_limits.message_pool)),

            conn_limits,
            req_limits,
            nodelay: server_limits.nodelay,
        }
    }

    /// Copy-on-write edit of the handler table.
    fn update_handlers(&self, mut edit: impl FnMut(&mut HandlerTable)) {
        self.handlers.rcu(|current| {
            let mut table = HandlerTable::clone(current);
            edit(&mut table);
            table
        });
    }

    /// Hands `req` to the handler of its virtual host.
    ///
    /// `false` means the connection must be dropped.
    async fn dispatch_vhost(&self, req: &mut Request, resp: &mut Response) -> bool {
        if req.method() == Method::Invalid {
            return false;
        }

        let handler = self.handlers.load().select(req);
        handler.handle(req, resp).await
    }

    fn spawn_connection<S>(self: &Arc<Self>, stream: S, peer: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.active.fetch_add(1, Ordering::AcqRel);

        let guard = ActiveGuard(self.clone());
        let span = match peer {
            Some(peer) => debug_span!("connection", %peer),
            None => debug_span!("connection"),
        };

        tokio::spawn(
            async move {
                guard.0.serve(stream, peer).await;
                drop(guard);
            }
            .instrument(span),
        );
    }

    /// Runs request/response cycles until the connection ends.
    async fn serve<S>(&self, stream: S, peer: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut conn = Connection::new(
            stream,
            self.conn_limits.clone(),
            self.req_limits.clone(),
            Some(self.shutdown.clone()),
        );
        let (mut req, mut resp) = self.take_messages();

        debug!("connection opened");

        while conn.recv(&mut req).await {
            req.client_addr = peer;

            let keep_alive = req.is_keep_alive()
                && conn.request_count() < self.conn_limits.max_keep_alive_requests
                && !self.shutdown.is_raised();

            resp.reset(req.version(), keep_alive);
            resp.head_only = req.method() == Method::Head;

            if !self.dispatch_vhost(&mut req, &mut resp).await {
                debug!(method = %req.method(), url = req.url(), "handler dropped the connection");
                break;
            }

            // Handlers cannot lift a refusal; draining may have started meanwhile
            if !keep_alive || self.shutdown.is_raised() {
                resp.keep_alive = false;
            }

            if !conn.send(&mut resp).await || !conn.drop_body(&mut req).await || !conn.flush().await
            {
                break;
            }

            conn.finish_cycle();
        }

        conn.close().await;

        debug!(requests = conn.request_count(), "connection closed");
        self.recycle_messages(req, resp);
    }

    fn take_messages(&self) -> (Request, Response) {
        self.messages
            .as_ref()
            .and_then(ArrayQueue::pop)
            .unwrap_or_default()
    }

    fn recycle_messages(&self, mut req: Request, mut resp: Response) {
        if let Some(pool) = &self.messages {
            req.clear();
            resp.clear();
            // A full pool drops the pair
            let _ = pool.push((req, resp));
        }
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();

            if self.active.load(Ordering::Acquire) == 0 {
                return;
            }

            notified.await;
        }
    }
}

/// Decrements the active counter when a connection task ends, even by panic.
struct ActiveGuard(Arc<Engine>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
        self.0.drained.notify_waiters();
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
///
/// Either [`listener`](ServerBuilder::listener) or
/// [`address`](ServerBuilder::address) is required.
pub struct ServerBuilder {
    address: Option<String>,
    port: u16,
    listener: Option<TcpListener>,
    handler: Option<Arc<dyn Handler>>,

    server_limits: ServerLimits,
    connection_limits: ConnLimits,
    request_limits: ReqLimits,
}

impl ServerBuilder {
    /// Host name or IP address to bind on [`start`](Server::start).
    #[inline(always)]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Port to bind; `0` lets the system pick one (see [`Server::local_addr`]).
    #[inline(always)]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Uses an already bound listener instead of
    /// [`address`](ServerBuilder::address) and [`port`](ServerBuilder::port).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use strand_web::{Server, StatusCode, StockHandler};
    /// use tokio::net::TcpListener;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:0").await.unwrap())
    ///     .handler(StockHandler::new(StatusCode::NotFound))
    ///     .build()
    ///     .unwrap();
    /// # }
    /// ```
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the default request handler, used when no virtual host matches.
    ///
    /// Without one, every connection is dropped unanswered.
    #[inline(always)]
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Configures the acceptor created by [`start`](Server::start).
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = limits;
        self
    }

    /// Configures timeouts and keep-alive, see [`ConnLimits`].
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = limits;
        self
    }

    /// Configures request head limits, see [`ReqLimits`].
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = limits;
        self
    }

    /// Builds the server; nothing is bound until [`Server::start`].
    ///
    /// # Errors
    ///
    /// - [`Error::AsymmetricTimeouts`] if only one of the read and write
    ///   timeouts is set
    /// - [`Error::MissingAddress`] if neither a listener nor an address was
    ///   given
    pub fn build(self) -> Result<Server, Error> {
        if !self.connection_limits.is_symmetric() {
            return Err(Error::AsymmetricTimeouts);
        }

        let local_addr = OnceLock::new();
        let acceptor = match (self.listener, self.address) {
            (Some(listener), _) => {
                if let Ok(addr) = listener.local_addr() {
                    let _ = local_addr.set(addr);
                }
                Acceptor::Listener(listener)
            }
            (None, Some(address)) => Acceptor::Bind {
                address,
                port: self.port,
                limits: self.server_limits.clone(),
            },
            (None, None) => return Err(Error::MissingAddress),
        };

        let handler: Arc<dyn Handler> = match self.handler {
            Some(handler) => handler,
            None => Arc::new(refuse),
        };

        Ok(Server {
            engine: Arc::new(Engine::new(
                handler,
                &self.server_limits,
                self.connection_limits,
                self.request_limits,
            )),
            acceptor: Mutex::new(acceptor),
            started: AtomicBool::new(false),
            local_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{routing::stock::StockHandler, StatusCode};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn engine(handler: impl Handler, max_keep_alive_requests: usize) -> Arc<Engine> {
        let limits = ConnLimits {
            max_keep_alive_requests,
            ..ConnLimits::default()
        };
        Arc::new(Engine::new(
            Arc::new(handler),
            &ServerLimits::default(),
            limits,
            ReqLimits::default(),
        ))
    }

    async fn exchange(engine: &Arc<Engine>, input: &[u8]) -> String {
        let (mut client, server) = duplex(64 * 1024);
        engine.spawn_connection(server, None);

        client.write_all(input).await.unwrap();

        let mut output = String::new();
        tokio::time::timeout(Duration::from_secs(5), client.read_to_string(&mut output))
            .await
            .unwrap()
            .unwrap();
        output
    }

    #[test]
    fn host_keys() {
        #[rustfmt::skip]
        let cases = [
            ("Example.COM",      "example.com"),
            ("example.com:8080", "example.com"),
            (" a.b ",            "a.b"),
            ("[::1]:80",         "[::1]"),
            ("[::1]",            "[::1]"),
        ];

        for (host, expected) in cases {
            assert_eq!(host_key(host), expected);
        }
    }

    #[test]
    fn build_errors() {
        let asymmetric = Server::builder()
            .address("127.0.0.1")
            .connection_limits(ConnLimits {
                read_timeout: Duration::from_secs(1),
                ..ConnLimits::default()
            })
            .build();
        assert!(matches!(asymmetric, Err(Error::AsymmetricTimeouts)));

        assert!(matches!(Server::builder().build(), Err(Error::MissingAddress)));
    }

    #[tokio::test]
    async fn keep_alive_limit() {
        let engine = engine(StockHandler::new(StatusCode::NoContent), 2);
        let request = b"GET / HTTP/1.1\r\n\r\n";

        let output = exchange(&engine, &request.repeat(4)).await;

        assert_eq!(output.matches("HTTP/1.1 204 No Content").count(), 3);
        assert_eq!(output.matches("Connection: keep-alive").count(), 2);
        assert!(output.ends_with("Connection: close\r\n\r\n"));
    }

    #[tokio::test]
    async fn handler_cannot_extend_keep_alive() {
        let engine = engine(
            |_: &mut Request, resp: &mut Response| {
                resp.set_keep_alive(true);
                true
            },
            1,
        );
        let request = b"GET / HTTP/1.1\r\n\r\n";

        let output = exchange(&engine, &request.repeat(3)).await;

        assert_eq!(output.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(output.ends_with("Connection: close\r\n\r\n"));

        let output = exchange(&engine, b"GET / HTTP/1.0\r\n\r\nGET / HTTP/1.0\r\n\r\n").await;
        assert_eq!(
            output,
            "HTTP/1.0 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn http10_closes_by_default() {
        let engine = engine(StockHandler::new(StatusCode::Ok), 100);

        let output = exchange(&engine, b"GET / HTTP/1.0\r\n\r\nGET / HTTP/1.0\r\n\r\n").await;

        assert_eq!(
            output,
            "HTTP/1.0 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn virtual_hosts() {
        let engine = engine(StockHandler::new(StatusCode::NotFound), 100);
        let add_host = |host: &str, status| {
            let key = host_key(host);
            engine.update_handlers(|table| {
                table
                    .vhosts
                    .insert(key.clone(), Arc::new(StockHandler::new(status)));
            });
        };
        add_host("API.example.com", StatusCode::Accepted);

        let output = exchange(
            &engine,
            b"GET / HTTP/1.1\r\nHost: api.EXAMPLE.com:8080\r\n\r\n\
              GET / HTTP/1.1\r\nHost: other.com\r\n\r\n\
              GET / HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;

        let statuses: Vec<&str> = output
            .lines()
            .filter(|line| line.starts_with("HTTP/1.1"))
            .collect();
        assert_eq!(
            statuses,
            ["HTTP/1.1 202 Accepted", "HTTP/1.1 404 Not Found", "HTTP/1.1 404 Not Found"]
        );
    }

    #[tokio::test]
    async fn handler_false_drops_connection() {
        let engine = engine(refuse, 100);

        let output = exchange(&engine, b"GET / HTTP/1.1\r\n\r\n").await;

        assert!(output.is_empty());
        engine.wait_drained().await;
        assert_eq!(engine.active.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn head_response_has_no_body() {
        let engine = engine(
            |_: &mut Request, resp: &mut Response| {
                resp.body("twelve bytes");
                true
            },
            100,
        );

        let output = exchange(&engine, b"HEAD / HTTP/1.1\r\nConnection: close\r\n\r\n").await;

        assert_eq!(
            output,
            "HTTP/1.1 200 OK\r\nContent-Length: 12\r\nConnection: close\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn messages_are_recycled() {
        let engine = engine(StockHandler::new(StatusCode::Ok), 100);

        exchange(&engine, b"GET /a?b=c HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        engine.wait_drained().await;

        let pool = engine.messages.as_ref().unwrap();
        assert_eq!(pool.len(), 1);

        let (req, resp) = pool.pop().unwrap();
        assert_eq!(req.method(), Method::Invalid);
        assert!(req.url().is_empty() && req.headers().is_empty());
        assert_eq!(resp.status_code(), StatusCode::Ok);
        assert!(resp.headers().is_empty());
    }

    #[tokio::test]
    async fn drain_waits_for_busy_connection() {
        let engine = engine(StockHandler::new(StatusCode::Ok), 100);

        let (mut client, server) = duplex(4096);
        engine.spawn_connection(server, None);
        assert_eq!(engine.active.load(Ordering::Acquire), 1);

        // Half a request in flight when shutdown starts
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        tokio::task::yield_now().await;
        engine.shutdown.raise();

        let drained = tokio::spawn({
            let engine = engine.clone();
            async move { engine.wait_drained().await }
        });

        client.write_all(b"\r\n").await.unwrap();

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        assert_eq!(
            output,
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );

        tokio::time::timeout(Duration::from_secs(5), drained)
            .await
            .unwrap()
            .unwrap();
    }
}
