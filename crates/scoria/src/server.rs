//! The reactor loop.
//!
//! One poll wakeup drives the full cycle: sweep stale connections, wait for
//! readiness, accept into the pool (or answer 503 when it is exhausted),
//! parse whatever is readable, dispatch through the router, then re-arm or
//! release each connection depending on keep-alive.
//!
//! The loop is externally driven: [`Server::poll`] processes one batch and
//! returns, and the embedding process owns the run-forever shell (or uses
//! [`Server::run`]). Everything happens on the calling thread; a connection
//! is processed to completion before the next ready event is looked at.
//!
//! mio registrations are edge-triggered and carry no one-shot flag, so the
//! one-shot discipline is expressed directly: a connection is parsed and
//! answered to completion within its wakeup, then explicitly re-armed with
//! `reregister` (keep-alive) or deregistered and closed. A consequence,
//! inherited deliberately: a request whose headers do not arrive within the
//! drain of a single wakeup is answered 500 rather than resumed later.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

#[cfg(unix)]
use signal_hook::consts::{SIGINT, SIGTERM};
#[cfg(unix)]
use signal_hook_mio::v1_0::Signals;

use crate::config::ServerConfig;
use crate::error::{ParseError, ServerError, ServerResult};
use crate::http::{self, ParsedRequest};
use crate::pool::{ConnectionPool, SlotState};
use crate::response;
use crate::router::{Handler, MatchMode, Router};

/// Token for the listening socket.
const LISTENER_TOKEN: Token = Token(0);

/// Token for the signal stream.
#[cfg(unix)]
const SIGNAL_TOKEN: Token = Token(1);

/// First token handed to pooled connections; `Token(CONN_TOKEN_BASE + idx)`
/// maps back to the pool slot.
const CONN_TOKEN_BASE: usize = 2;

/// Outcome of one [`Server::poll`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// At least one readiness event was processed.
    Progress {
        /// Number of events in the batch.
        events: usize,
    },
    /// The wait ended with nothing to do (timeout or interrupted wait).
    Idle,
    /// Shutdown was requested through the handle or a signal.
    ShutdownRequested,
}

/// Cloneable cancellation token.
///
/// Replaces the usual signal-mutated global: signal handlers (and any other
/// thread) request shutdown here, and the reactor observes it at the top of
/// the next `poll`.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Requests a graceful shutdown.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Snapshot of one readiness event, decoupled from the events buffer so the
/// reactor can mutate its own state while walking the batch.
struct ReadyEvent {
    token: Token,
    readable: bool,
    error: bool,
    read_closed: bool,
}

/// Single-threaded HTTP/1.1 server reactor.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    poll: Poll,
    events: Events,
    pool: ConnectionPool,
    router: Router,
    shutdown: ShutdownHandle,
    #[cfg(unix)]
    signals: Option<Signals>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a server bound to `config.addr` and registers the listener
    /// with the multiplexer.
    ///
    /// Setup failures (bind, poll creation, registration) are fatal and
    /// propagate immediately.
    ///
    /// # Panics
    ///
    /// Panics if `config.max_events` or `config.max_connections` is 0.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        assert!(config.max_events > 0, "max_events must be positive");
        assert!(
            config.max_connections > 0,
            "max_connections must be positive"
        );

        let mut listener = bind_listener(&config)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let events = Events::with_capacity(config.max_events);
        let pool = ConnectionPool::new(config.max_connections, config.idle_timeout, config.max_age);

        info!("listening on http://{local_addr}");

        Ok(Self {
            config,
            listener,
            local_addr,
            poll,
            events,
            pool,
            router: Router::new(),
            shutdown: ShutdownHandle::default(),
            #[cfg(unix)]
            signals: None,
        })
    }

    /// Creates a server that also turns SIGINT/SIGTERM into a shutdown
    /// request, delivered through the same poll.
    #[cfg(unix)]
    pub fn with_signal_handling(config: ServerConfig) -> ServerResult<Self> {
        let mut server = Self::new(config)?;
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        server
            .poll
            .registry()
            .register(&mut signals, SIGNAL_TOKEN, Interest::READABLE)?;
        server.signals = Some(signals);
        Ok(server)
    }

    /// The address the listener is actually bound to (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A cancellation token shared with this server.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Registers a handler matched by byte equality with the URI.
    pub fn bind_exact(&mut self, pattern: impl Into<String>, handler: impl Handler + 'static) {
        self.router
            .register(pattern, MatchMode::Exact, Box::new(handler));
    }

    /// Registers a handler matched when the URI starts with the pattern.
    pub fn bind_prefix(&mut self, pattern: impl Into<String>, handler: impl Handler + 'static) {
        self.router
            .register(pattern, MatchMode::Prefix, Box::new(handler));
    }

    /// Number of currently active connections.
    pub fn active_connections(&self) -> usize {
        self.pool.active_count()
    }

    /// Processes one batch of readiness events.
    ///
    /// Sweeps stale connections, waits up to `timeout`, then handles every
    /// ready event: new connections are accepted into the pool (503 + close
    /// when it is exhausted), readable connections are parsed, routed, and
    /// answered, and each is then re-armed (keep-alive) or released.
    ///
    /// An interrupted wait is a no-op iteration. Per-connection failures
    /// are contained to the offending connection; only setup-class errors
    /// abort the call.
    pub fn poll(&mut self, timeout: Option<Duration>) -> ServerResult<PollStatus> {
        if self.shutdown.is_shutdown_requested() {
            return Ok(PollStatus::ShutdownRequested);
        }

        self.sweep(Instant::now());

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                debug!("poll interrupted by signal delivery");
                return Ok(PollStatus::Idle);
            }
            Err(e) => return Err(ServerError::Io(e)),
        }

        if self.events.is_empty() {
            return Ok(PollStatus::Idle);
        }

        let batch: Vec<ReadyEvent> = self
            .events
            .iter()
            .map(|event| ReadyEvent {
                token: event.token(),
                readable: event.is_readable(),
                error: event.is_error(),
                read_closed: event.is_read_closed(),
            })
            .collect();
        let processed = batch.len();

        for event in batch {
            match event.token {
                LISTENER_TOKEN => self.accept_pending(),
                #[cfg(unix)]
                SIGNAL_TOKEN => self.drain_signals(),
                token => self.handle_connection(token, &event),
            }
        }

        if self.shutdown.is_shutdown_requested() {
            return Ok(PollStatus::ShutdownRequested);
        }
        Ok(PollStatus::Progress { events: processed })
    }

    /// Runs the reactor until shutdown is requested, then tears down.
    pub fn run(&mut self) -> ServerResult<()> {
        loop {
            match self.poll(Some(Duration::from_secs(1)))? {
                PollStatus::ShutdownRequested => break,
                PollStatus::Progress { .. } | PollStatus::Idle => {}
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Closes and releases every active connection and deregisters the
    /// listener. Idempotent; called by [`Server::run`] on exit.
    pub fn shutdown(&mut self) {
        for idx in self.pool.active_indices() {
            self.close_connection(idx);
        }
        if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
            debug!("listener deregister on shutdown: {e}");
        }
        info!("server stopped");
    }

    /// Forcibly closes active connections past their idle timeout or
    /// maximum age. Runs at the top of every poll, so worst-case staleness
    /// equals the poll interval.
    fn sweep(&mut self, now: Instant) {
        for idx in self.pool.expired(now) {
            debug!(slot = idx, "sweeping stale connection");
            if let Some(stream) = self.pool.slot_mut(idx).stream_mut() {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
            self.close_connection(idx);
        }
    }

    /// Drains the accept backlog.
    ///
    /// With the pool exhausted, pending connections are still accepted and
    /// answered with a fixed 503, then closed without ever being registered
    /// — admission control, not an error. Accept failures other than
    /// `WouldBlock` stop the drain but leave the server serving.
    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("accept error: {e}");
                    break;
                }
            }
        }
    }

    /// Places an accepted stream into a pool slot and registers it, or
    /// sheds it with a 503.
    fn admit(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        match self.pool.acquire(Instant::now()) {
            Some(idx) => {
                let token = Token(CONN_TOKEN_BASE + idx);
                if let Err(e) =
                    self.poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)
                {
                    warn!("failed to register accepted connection: {e}");
                    self.pool.release(idx);
                    return;
                }
                self.pool.slot_mut(idx).attach(stream);
                debug!(
                    %peer,
                    slot = idx,
                    active = self.pool.active_count(),
                    "connection accepted"
                );
            }
            None => {
                warn!(%peer, "connection pool exhausted, shedding with 503");
                if let Err(e) = stream.write_all(response::CAPACITY_503) {
                    debug!("error sending 503: {e}");
                }
                // dropped here: closed, never registered
            }
        }
    }

    /// Handles a readiness event for a pooled connection.
    fn handle_connection(&mut self, token: Token, event: &ReadyEvent) {
        let Some(idx) = token.0.checked_sub(CONN_TOKEN_BASE) else {
            warn!(token = token.0, "event for unknown token");
            return;
        };
        if idx >= self.pool.capacity() {
            warn!(token = token.0, "event for out-of-range token");
            return;
        }
        // A slot can be swept or released earlier in the same batch.
        if self.pool.slot(idx).state() != SlotState::Active {
            debug!(slot = idx, "event for already-released slot");
            return;
        }

        if event.error {
            warn!(slot = idx, "socket error condition, closing connection");
            self.fail_connection(idx);
            return;
        }

        if event.readable {
            self.pool.slot_mut(idx).touch(Instant::now());
            self.service_request(idx);
            return;
        }

        if event.read_closed {
            debug!(slot = idx, "client closed its connection");
            self.close_connection(idx);
        }
    }

    /// Parses and answers one request on an active connection.
    fn service_request(&mut self, idx: usize) {
        let limits = self.config.parse_limits.clone();
        let parsed = match self.pool.slot_mut(idx).stream_mut() {
            Some(stream) => http::parse_request(stream, &limits),
            None => {
                warn!(slot = idx, "active slot without a stream");
                return;
            }
        };

        match parsed {
            Ok(request) => self.dispatch(idx, request),
            Err(ParseError::PeerClosed) => {
                debug!(slot = idx, "peer closed before a full request arrived");
                self.close_connection(idx);
            }
            Err(e) => {
                warn!(slot = idx, "request parse failed: {e}");
                self.fail_connection(idx);
            }
        }
    }

    /// Routes a parsed request to its handler (or the fixed 404), then
    /// re-arms or releases the connection.
    fn dispatch(&mut self, idx: usize, request: ParsedRequest) {
        let ParsedRequest {
            msg,
            headers,
            keep_alive,
        } = request;
        info!(method = %msg.method, uri = %msg.uri, "request");

        match self.router.resolve(&msg.uri) {
            Some(route) => {
                let handler = route.handler();
                let Some(stream) = self.pool.slot_mut(idx).stream_mut() else {
                    return;
                };
                // Ownership of the request line and headers moves to the
                // handler; it writes the response itself.
                handler.handle(stream, msg, headers);
            }
            None => {
                debug!(uri = %msg.uri, "no endpoint matched, sending 404");
                let Some(stream) = self.pool.slot_mut(idx).stream_mut() else {
                    return;
                };
                if let Err(e) = stream.write_all(response::NOT_FOUND_404) {
                    warn!("error sending 404 on unset route: {e}");
                    self.close_connection(idx);
                    return;
                }
            }
        }

        if keep_alive {
            self.rearm(idx);
        } else {
            debug!(slot = idx, "connection close requested");
            self.close_connection(idx);
        }
    }

    /// Re-arms a keep-alive connection for its next request.
    fn rearm(&mut self, idx: usize) {
        let token = Token(CONN_TOKEN_BASE + idx);
        let registry = self.poll.registry();
        let Some(stream) = self.pool.slot_mut(idx).stream_mut() else {
            return;
        };
        if let Err(e) = registry.reregister(stream, token, Interest::READABLE) {
            warn!(slot = idx, "failed to re-arm connection: {e}");
            self.close_connection(idx);
        }
    }

    /// Best-effort 500, then teardown.
    fn fail_connection(&mut self, idx: usize) {
        if let Some(stream) = self.pool.slot_mut(idx).stream_mut() {
            if let Err(e) = stream.write_all(response::INTERNAL_ERROR_500) {
                debug!("error sending 500: {e}");
            }
        }
        self.close_connection(idx);
    }

    /// Deregisters and closes a connection and returns its slot to the
    /// pool. Safe to call on an already-released slot.
    fn close_connection(&mut self, idx: usize) {
        if let Some(mut stream) = self.pool.release(idx) {
            if let Err(e) = self.poll.registry().deregister(&mut stream) {
                debug!(slot = idx, "deregister on close: {e}");
            }
        }
    }

    /// Turns pending signals into a shutdown request.
    #[cfg(unix)]
    fn drain_signals(&mut self) {
        if let Some(signals) = &mut self.signals {
            for signal in signals.pending() {
                info!(signal, "shutdown signal received");
                self.shutdown.request_shutdown();
            }
        }
    }
}

/// Creates, binds, and starts listening on the configured address.
///
/// Goes through `socket2` because neither std nor mio exposes the listen
/// backlog. `SO_REUSEADDR` is set so restarts do not trip over TIME_WAIT.
fn bind_listener(config: &ServerConfig) -> ServerResult<TcpListener> {
    match try_bind(config) {
        Ok(listener) => Ok(listener),
        Err(source) => Err(ServerError::BindFailed {
            addr: config.addr,
            source,
        }),
    }
}

fn try_bind(config: &ServerConfig) -> io::Result<TcpListener> {
    let socket = Socket::new(
        Domain::for_address(config.addr),
        Type::STREAM,
        Some(Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&config.addr.into())?;
    socket.listen(config.backlog)?;
    Ok(TcpListener::from_std(socket.into()))
}
