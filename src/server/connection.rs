use crate::{
    errors::ErrorKind,
    http::{
        request::{Body, BoxReader, Request},
        response::Response,
    },
    limits::{ConnLimits, ReqLimits},
    server::signal::{self, Signal},
};
use std::{
    future::Future,
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf},
    sync::watch,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, trace};

/// Lifecycle of a [`Connection`].
///
/// `Open` is the only state in which `recv` and `send` run; each moves to
/// `Reading` / `Writing` for the duration of the operation and back to
/// `Open` on success. Any failure goes through `Closing` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Open,
    Reading,
    Writing,
    Closing,
    Closed,
}

/// One accepted transport, carrying sequential request/response cycles.
pub(crate) struct Connection<S> {
    /// Lent to the request body for one cycle, see [`Connection::drop_body`].
    reader: Option<BoxReader>,
    writer: WriteHalf<S>,
    state: ConnState,

    watchdog: Option<Watchdog>,
    shutdown: Option<Arc<Signal>>,

    conn_limits: ConnLimits,
    req_limits: ReqLimits,

    request_count: usize,
    buffer: Vec<u8>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Takes ownership of `stream`. Starts a watchdog task when a timeout is
    /// configured, so this must run inside a Tokio runtime.
    pub(crate) fn new(
        stream: S,
        conn_limits: ConnLimits,
        req_limits: ReqLimits,
        shutdown: Option<Arc<Signal>>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);

        Self {
            reader: Some(Box::new(BufReader::new(reader))),
            writer,
            state: ConnState::Open,

            watchdog: conn_limits.has_timeouts().then(Watchdog::spawn),
            shutdown,

            conn_limits,
            req_limits,

            request_count: 0,
            buffer: Vec::with_capacity(1024),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> ConnState {
        self.state
    }

    #[inline]
    pub(crate) fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    /// Completed request/response cycles.
    #[inline]
    pub(crate) fn request_count(&self) -> usize {
        self.request_count
    }

    /// Reads the next request head into `req`.
    ///
    /// Returns `false` when there is nothing to serve: the peer closed the
    /// connection, the engine shut down while the connection was idle, the
    /// read deadline passed or the head was malformed. The connection is
    /// closed in each of these cases.
    pub(crate) async fn recv(&mut self, req: &mut Request) -> bool {
        if self.state != ConnState::Open {
            return false;
        }
        let Some(reader) = self.reader.as_mut() else {
            return false;
        };

        req.clear();
        self.state = ConnState::Reading;
        arm(&self.watchdog, self.conn_limits.read_timeout);

        let expired = self.watchdog.as_ref().map(|w| &*w.expired);
        let shutdown = self.shutdown.as_deref();

        // Idle wait: shutdown may end the connection only before the first byte
        let first_byte = tokio::select! {
            biased;

            ready = reader.fill_buf() => ready.map(|buf| !buf.is_empty()).map_err(ErrorKind::from),
            _ = signal::wait_for(expired) => Err(ErrorKind::Io(deadline_expired())),
            _ = signal::wait_for(shutdown) => Ok(false),
        };

        let result = match first_byte {
            Ok(true) => guarded(expired, req.read_head(reader, &self.req_limits)).await,
            other => other,
        };

        disarm(&self.watchdog);

        match result {
            Ok(true) => {
                if req.content_length > 0 {
                    if let Some(reader) = self.reader.take() {
                        let deadline = self
                            .watchdog
                            .as_ref()
                            .filter(|_| !self.conn_limits.read_timeout.is_zero())
                            .map(|w| w.body_deadline(self.conn_limits.read_timeout));

                        req.body = Body::bind(reader, req.content_length, deadline);
                    }
                }

                self.state = ConnState::Open;
                true
            }
            Ok(false) => {
                trace!("peer closed the connection");
                self.close().await;
                false
            }
            Err(err) => {
                log_failure("receive", &err);
                self.close().await;
                false
            }
        }
    }

    /// Writes `resp` and flushes it.
    ///
    /// Returns `false` on failure, and also after a successful write of a
    /// response that is not keep-alive, since the transport is closed then.
    pub(crate) async fn send(&mut self, resp: &mut Response) -> bool {
        if self.state != ConnState::Open {
            return false;
        }

        // A body read outlived its deadline
        if self.is_expired() {
            log_failure("send", &ErrorKind::Io(deadline_expired()));
            self.close().await;
            return false;
        }

        self.state = ConnState::Writing;

        self.buffer.clear();
        resp.encode(&mut self.buffer);

        arm(&self.watchdog, self.conn_limits.write_timeout);

        let expired = self.watchdog.as_ref().map(|w| &*w.expired);
        let writer = &mut self.writer;
        let buffer = &self.buffer;

        let result = guarded(expired, async {
            writer.write_all(buffer).await?;
            writer.flush().await
        })
        .await;

        disarm(&self.watchdog);

        match result {
            Ok(()) if resp.keep_alive => {
                self.state = ConnState::Open;
                true
            }
            Ok(()) => {
                self.close().await;
                false
            }
            Err(err) => {
                log_failure("send", &ErrorKind::Io(err));
                self.close().await;
                false
            }
        }
    }

    /// Discards the unread part of the request body and takes the reader
    /// back. Must run after every cycle, before the next [`recv`](Connection::recv).
    pub(crate) async fn drop_body(&mut self, req: &mut Request) -> bool {
        let Some(mut body) = req.body.detach() else {
            return self.is_open();
        };

        arm(&self.watchdog, self.conn_limits.read_timeout);

        let expired = self.watchdog.as_ref().map(|w| &*w.expired);
        let result = guarded(expired, tokio::io::copy(&mut body, &mut tokio::io::sink())).await;

        disarm(&self.watchdog);

        match result {
            Ok(_) if body.limit() == 0 => {
                self.reader = Some(body.into_inner());
                self.is_open()
            }
            Ok(_) => {
                log_failure("drain body", &ErrorKind::UnexpectedEof);
                self.close().await;
                false
            }
            Err(err) => {
                log_failure("drain body", &ErrorKind::Io(err));
                self.close().await;
                false
            }
        }
    }

    pub(crate) async fn flush(&mut self) -> bool {
        if self.state != ConnState::Open {
            return false;
        }

        arm(&self.watchdog, self.conn_limits.write_timeout);
        let expired = self.watchdog.as_ref().map(|w| &*w.expired);
        let result = guarded(expired, self.writer.flush()).await;
        disarm(&self.watchdog);

        match result {
            Ok(()) => true,
            Err(err) => {
                log_failure("flush", &ErrorKind::Io(err));
                self.close().await;
                false
            }
        }
    }

    /// Shuts the transport down and stops the watchdog. Idempotent.
    pub(crate) async fn close(&mut self) {
        if matches!(self.state, ConnState::Closing | ConnState::Closed) {
            return;
        }
        self.state = ConnState::Closing;

        // Bounded by the write deadline
        let expired = self.watchdog.as_ref().map(|w| &*w.expired);
        if !expired.is_some_and(Signal::is_raised) {
            arm(&self.watchdog, self.conn_limits.write_timeout);
            let _ = guarded(expired, self.writer.shutdown()).await;
        }

        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop().await;
        }

        self.reader = None;
        self.state = ConnState::Closed;
    }

    #[inline]
    fn is_expired(&self) -> bool {
        self.watchdog.as_ref().is_some_and(|w| w.expired.is_raised())
    }

    #[inline]
    pub(crate) fn finish_cycle(&mut self) {
        self.request_count += 1;
    }
}

#[inline]
fn log_failure(operation: &'static str, err: &ErrorKind) {
    match err.is_disconnect() {
        true => trace!(operation, error = %err, "peer went away"),
        false => debug!(operation, error = %err, "closing connection"),
    }
}

#[inline]
fn deadline_expired() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "connection deadline expired")
}

/// Runs `op` unless the watchdog fires first.
async fn guarded<F, T, E>(expired: Option<&Signal>, op: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<io::Error>,
{
    tokio::select! {
        biased;

        result = op => result,
        _ = signal::wait_for(expired) => Err(deadline_expired().into()),
    }
}

#[inline]
fn arm(watchdog: &Option<Watchdog>, timeout: Duration) {
    if let Some(watchdog) = watchdog {
        watchdog.arm(timeout);
    }
}

#[inline]
fn disarm(watchdog: &Option<Watchdog>) {
    if let Some(watchdog) = watchdog {
        watchdog.disarm();
    }
}

/// Per-connection timer task.
///
/// Each I/O operation publishes its deadline on a watch channel; the task
/// sleeps until the current deadline and raises `expired` if it is still in
/// place when the sleep ends. Once raised the connection is unusable.
struct Watchdog {
    deadline: Arc<watch::Sender<Option<Instant>>>,
    expired: Arc<Signal>,
    task: JoinHandle<()>,
}

impl Watchdog {
    fn spawn() -> Self {
        let (deadline, rx) = watch::channel(None);
        let expired = Arc::new(Signal::new());
        let task = tokio::spawn(Self::run(rx, expired.clone()));

        Self {
            deadline: Arc::new(deadline),
            expired,
            task,
        }
    }

    async fn run(mut rx: watch::Receiver<Option<Instant>>, expired: Arc<Signal>) {
        loop {
            let deadline = *rx.borrow_and_update();

            let changed = match deadline {
                Some(at) => tokio::select! {
                    _ = sleep_until(at) => {
                        expired.raise();
                        return;
                    }
                    changed = rx.changed() => changed,
                },
                None => rx.changed().await,
            };

            // Sender dropped
            if changed.is_err() {
                return;
            }
        }
    }

    /// Zero leaves the watchdog disarmed.
    #[inline]
    fn arm(&self, timeout: Duration) {
        if !timeout.is_zero() {
            self.deadline.send_replace(Some(Instant::now() + timeout));
        }
    }

    #[inline]
    fn disarm(&self) {
        self.deadline.send_replace(None);
    }

    fn body_deadline(&self, timeout: Duration) -> BodyDeadline {
        let expired = self.expired.clone();

        BodyDeadline {
            timer: self.deadline.clone(),
            timeout,
            expired: self.expired.clone(),
            wait: Box::pin(async move { expired.wait().await }),
            armed: false,
        }
    }

    async fn stop(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Read deadline lent to a request body.
///
/// Drives the connection's watchdog: armed while a body read waits for the
/// client, disarmed as soon as data arrives.
pub(crate) struct BodyDeadline {
    timer: Arc<watch::Sender<Option<Instant>>>,
    timeout: Duration,
    expired: Arc<Signal>,
    wait: Pin<Box<dyn Future<Output = ()> + Send>>,
    armed: bool,
}

impl BodyDeadline {
    #[inline]
    pub(crate) fn is_expired(&self) -> bool {
        self.expired.is_raised()
    }

    /// Starts the clock unless it already runs.
    pub(crate) fn arm(&mut self) {
        if !self.armed {
            self.armed = true;
            self.timer.send_replace(Some(Instant::now() + self.timeout));
        }
    }

    pub(crate) fn disarm(&mut self) {
        if self.armed {
            self.armed = false;
            self.timer.send_replace(None);
        }
    }

    /// Registers `cx` for the watchdog firing. Must not be polled again
    /// after returning `Ready`.
    #[inline]
    pub(crate) fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        self.wait.as_mut().poll(cx)
    }

    #[inline]
    pub(crate) fn error(&self) -> io::Error {
        deadline_expired()
    }
}

impl Drop for BodyDeadline {
    fn drop(&mut self) {
        self.disarm();
    }
}
