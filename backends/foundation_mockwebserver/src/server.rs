//! The scriptable server.
//!
//! WHY: Client code needs a real socket peer whose every response, delay
//! and transport fault is decided by the test, plus a record of exactly
//! what the client sent.
//!
//! WHAT: [`MockWebServer`] binds a loopback listener, serves each accepted
//! connection on its own thread, records requests into a capture log and
//! answers them through a swappable [`Dispatcher`].
//!
//! HOW: A blocking accept loop on a named thread. Shutdown flips a flag,
//! wakes the accept call with a loopback connect, releases any handler
//! blocked in the dispatcher and force-closes live sockets before waiting,
//! with a bound, for handlers to exit.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use url::Url;

use crate::config::ServerConfig;
use crate::connection;
use crate::dispatcher::{Dispatcher, QueueDispatcher};
use crate::errors::{MockServerError, MockServerResult, TakeRequestError};
use crate::netcap::ConnectionRegistry;
use crate::recorder::RequestLog;
use crate::request::RecordedRequest;
use crate::response::MockResponse;
use crate::synca::WorkerTracker;
use crate::tls::{self, HeldCertificate};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// State every connection handler shares with the server handle.
pub(crate) struct ServerShared {
    config: ServerConfig,
    body_limit: AtomicU64,
    dispatcher: RwLock<Arc<dyn Dispatcher>>,
    retired: Mutex<Vec<Arc<dyn Dispatcher>>>,
    log: RequestLog,
    connections: ConnectionRegistry,
    workers: WorkerTracker,
    shutting_down: AtomicBool,
}

impl ServerShared {
    fn new(config: ServerConfig) -> Self {
        Self {
            body_limit: AtomicU64::new(config.get_body_limit()),
            config,
            dispatcher: RwLock::new(Arc::new(QueueDispatcher::new())),
            retired: Mutex::new(Vec::new()),
            log: RequestLog::new(),
            connections: ConnectionRegistry::new(),
            workers: WorkerTracker::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn body_limit(&self) -> u64 {
        self.body_limit.load(Ordering::Acquire)
    }

    /// The active dispatcher. Callers dispatch on the returned handle, never
    /// while holding the slot's lock.
    pub(crate) fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        match self.dispatcher.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn replace_dispatcher(&self, dispatcher: Arc<dyn Dispatcher>) {
        let previous = match self.dispatcher.write() {
            Ok(mut guard) => std::mem::replace(&mut *guard, dispatcher),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), dispatcher),
        };

        // Handlers may still be blocked on the old one until shutdown.
        match self.retired.lock() {
            Ok(mut retired) => retired.push(previous),
            Err(poisoned) => poisoned.into_inner().push(previous),
        }
    }

    fn shutdown_dispatchers(&self) {
        self.dispatcher().shutdown();
        let retired = match self.retired.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for dispatcher in retired.iter() {
            dispatcher.shutdown();
        }
    }

    pub(crate) fn log(&self) -> &RequestLog {
        &self.log
    }

    pub(crate) fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

enum ServerState {
    NotStarted,
    Started {
        address: SocketAddr,
        base_url: Url,
        accept_loop: Option<JoinHandle<()>>,
    },
    ShuttingDown,
    Stopped,
}

/// A scriptable HTTP/1.1 server for tests.
///
/// # Examples
///
/// ```rust
/// use foundation_mockwebserver::{MockResponse, MockWebServer};
/// use std::io::{Read, Write};
/// use std::net::TcpStream;
///
/// let server = MockWebServer::new();
/// server.enqueue(MockResponse::new().set_body("hello")).unwrap();
///
/// let mut client = TcpStream::connect(server.to_proxy_address().unwrap()).unwrap();
/// client
///     .write_all(b"GET /greeting HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
///     .unwrap();
/// let mut reply = String::new();
/// client.read_to_string(&mut reply).unwrap();
/// assert!(reply.ends_with("hello"));
///
/// let recorded = server.take_request().unwrap();
/// assert_eq!(recorded.path(), "/greeting");
/// ```
pub struct MockWebServer {
    shared: Arc<ServerShared>,
    state: Mutex<ServerState>,
    tls: Mutex<Option<Arc<rustls::ServerConfig>>>,
}

impl Default for MockWebServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWebServer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ServerConfig::new())
    }

    #[must_use]
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            shared: Arc::new(ServerShared::new(config)),
            state: Mutex::new(ServerState::NotStarted),
            tls: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn tls_config(&self) -> Option<Arc<rustls::ServerConfig>> {
        match self.tls.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Starts on the configured port, an ephemeral one by default.
    ///
    /// # Errors
    ///
    /// [`MockServerError::AlreadyStarted`] on a running server,
    /// [`MockServerError::AlreadyStopped`] once shut down and
    /// [`MockServerError::Bind`] when the port cannot be bound.
    pub fn start(&self) -> MockServerResult<()> {
        self.start_on(self.shared.config.get_port())
    }

    /// Starts listening on `port` of the configured host.
    ///
    /// # Errors
    ///
    /// Same as [`Self::start`].
    pub fn start_on(&self, port: u16) -> MockServerResult<()> {
        let mut state = self.lock_state();
        match *state {
            ServerState::NotStarted => {}
            ServerState::Started { .. } => return Err(MockServerError::AlreadyStarted),
            ServerState::ShuttingDown | ServerState::Stopped => {
                return Err(MockServerError::AlreadyStopped)
            }
        }

        let host = self.shared.config.get_host();
        let listener =
            TcpListener::bind(SocketAddr::new(host, port)).map_err(MockServerError::Bind)?;
        let address = listener.local_addr()?;

        let tls = self.tls_config();
        let scheme = if tls.is_some() { "https" } else { "http" };
        let base_url = Url::parse(&format!("{scheme}://{address}/"))?;

        let shared = Arc::clone(&self.shared);
        let loop_url = base_url.clone();
        let accept_loop = thread::Builder::new()
            .name(format!("MockWebServer {address}"))
            .spawn(move || accept_loop(&shared, &listener, tls.as_ref(), &loop_url))?;

        tracing::info!("MockWebServer started on {base_url}");
        *state = ServerState::Started {
            address,
            base_url,
            accept_loop: Some(accept_loop),
        };
        Ok(())
    }

    /// Stops accepting, releases every handler blocked in the dispatcher and
    /// closes every live connection. Does nothing when the server never
    /// started or already stopped.
    pub fn shutdown(&self) {
        let (address, accept_loop) = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, ServerState::ShuttingDown) {
                ServerState::Started {
                    address,
                    accept_loop,
                    ..
                } => (address, accept_loop),
                other => {
                    *state = other;
                    return;
                }
            }
        };

        tracing::info!("MockWebServer on {address} shutting down");
        self.shared.shutting_down.store(true, Ordering::Release);

        if let Err(err) = TcpStream::connect_timeout(&wake_address(address), WAKE_TIMEOUT) {
            tracing::debug!("Waking the accept loop failed: {err}");
        }

        self.shared.shutdown_dispatchers();
        self.shared.log.close();
        tracing::debug!(
            "Closing {} live connections",
            self.shared.connections.live()
        );
        self.shared.connections.close_all();

        if let Some(handle) = accept_loop {
            if handle.join().is_err() {
                tracing::error!("MockWebServer accept loop on {address} panicked");
            }
        }

        let timeout = self.shared.config.get_shutdown_timeout();
        if !self.shared.workers.wait_idle(timeout) {
            tracing::warn!(
                "{} connection handlers still running after {timeout:?}",
                self.shared.workers.active()
            );
        }

        *self.lock_state() = ServerState::Stopped;
        tracing::info!("MockWebServer on {address} stopped");
    }

    /// Same as [`Self::shutdown`].
    pub fn close(&self) {
        self.shutdown();
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        matches!(*self.lock_state(), ServerState::Started { .. })
    }

    /// Bound address and base URL, starting the server first if needed.
    fn bound(&self) -> MockServerResult<(SocketAddr, Url)> {
        loop {
            match &*self.lock_state() {
                ServerState::Started {
                    address, base_url, ..
                } => return Ok((*address, base_url.clone())),
                ServerState::ShuttingDown | ServerState::Stopped => {
                    return Err(MockServerError::AlreadyStopped)
                }
                ServerState::NotStarted => {}
            }

            match self.start() {
                Ok(()) | Err(MockServerError::AlreadyStarted) => {}
                Err(err) => return Err(err),
            }
        }
    }

    /// Absolute URL of `path` on this server. Starts the server when it has
    /// not started yet.
    ///
    /// # Errors
    ///
    /// [`MockServerError::AlreadyStopped`] after shutdown, or whatever
    /// starting the server or parsing `path` fails with.
    pub fn url(&self, path: &str) -> MockServerResult<Url> {
        let (_, base_url) = self.bound()?;
        Ok(base_url.join(path)?)
    }

    /// Bound port. Starts the server when it has not started yet.
    ///
    /// # Errors
    ///
    /// Same as [`Self::url`].
    pub fn port(&self) -> MockServerResult<u16> {
        Ok(self.bound()?.0.port())
    }

    /// Address clients and proxy settings should connect to. Starts the
    /// server when it has not started yet.
    ///
    /// # Errors
    ///
    /// Same as [`Self::url`].
    pub fn to_proxy_address(&self) -> MockServerResult<SocketAddr> {
        Ok(self.bound()?.0)
    }

    /// Host part of every URL this server hands out. Known before start so
    /// certificates can be issued for it.
    #[must_use]
    pub fn host_name(&self) -> String {
        match &*self.lock_state() {
            ServerState::Started { address, .. } => address.ip().to_string(),
            _ => self.shared.config.get_host().to_string(),
        }
    }

    /// Queues `response` on the default dispatcher.
    ///
    /// # Errors
    ///
    /// [`MockServerError::NotAQueueDispatcher`] when a custom dispatcher is
    /// active.
    pub fn enqueue(&self, response: MockResponse) -> MockServerResult<()> {
        let dispatcher = self.shared.dispatcher();
        let queue = dispatcher
            .as_queue()
            .ok_or(MockServerError::NotAQueueDispatcher)?;
        queue.enqueue(response);
        Ok(())
    }

    /// Replaces the dispatcher. Requests already handed to the previous one
    /// are answered by it.
    pub fn set_dispatcher<D: Dispatcher + 'static>(&self, dispatcher: D) {
        self.shared.replace_dispatcher(Arc::new(dispatcher));
    }

    /// Request bodies beyond `bytes` are counted but not kept.
    pub fn set_body_limit(&self, bytes: u64) {
        self.shared.body_limit.store(bytes, Ordering::Release);
    }

    /// Serves HTTPS with `certificate` as the server identity.
    ///
    /// # Errors
    ///
    /// [`MockServerError::TlsAfterStart`] once started, or
    /// [`MockServerError::Tls`] when no TLS configuration can be built.
    pub fn use_https(&self, certificate: &HeldCertificate) -> MockServerResult<()> {
        self.use_https_with_chain(certificate, &[])
    }

    /// Like [`Self::use_https`] but also sends `intermediates` after the
    /// leaf certificate.
    ///
    /// # Errors
    ///
    /// Same as [`Self::use_https`].
    pub fn use_https_with_chain(
        &self,
        certificate: &HeldCertificate,
        intermediates: &[&HeldCertificate],
    ) -> MockServerResult<()> {
        let config = tls::server_config(certificate, intermediates)?;
        self.use_tls_config(Arc::new(config))
    }

    /// Serves HTTPS with a caller-built rustls configuration.
    ///
    /// # Errors
    ///
    /// [`MockServerError::TlsAfterStart`] once started.
    pub fn use_tls_config(&self, config: Arc<rustls::ServerConfig>) -> MockServerResult<()> {
        let state = self.lock_state();
        if !matches!(*state, ServerState::NotStarted) {
            return Err(MockServerError::TlsAfterStart);
        }

        match self.tls.lock() {
            Ok(mut guard) => *guard = Some(config),
            Err(poisoned) => *poisoned.into_inner() = Some(config),
        }
        Ok(())
    }

    /// Blocks until a request is captured.
    ///
    /// # Errors
    ///
    /// [`TakeRequestError::Exhausted`] once the server stopped and every
    /// captured request has been taken.
    pub fn take_request(&self) -> Result<RecordedRequest, TakeRequestError> {
        self.shared.log.take()
    }

    /// Like [`Self::take_request`] but waits at most `timeout`.
    ///
    /// # Errors
    ///
    /// [`TakeRequestError::Timeout`] when nothing arrived in time, otherwise
    /// as [`Self::take_request`].
    pub fn take_request_timeout(
        &self,
        timeout: Duration,
    ) -> Result<RecordedRequest, TakeRequestError> {
        self.shared.log.take_timeout(timeout)
    }

    /// Requests captured so far, taken or not.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.shared.log.request_count()
    }
}

impl Drop for MockWebServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for MockWebServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.lock_state() {
            ServerState::NotStarted => String::from("NotStarted"),
            ServerState::Started { base_url, .. } => format!("Started({base_url})"),
            ServerState::ShuttingDown => String::from("ShuttingDown"),
            ServerState::Stopped => String::from("Stopped"),
        };
        f.debug_struct("MockWebServer")
            .field("state", &state)
            .field("request_count", &self.request_count())
            .finish_non_exhaustive()
    }
}

/// Loopback address that reaches a listener bound to `address`.
fn wake_address(address: SocketAddr) -> SocketAddr {
    match address.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), address.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), address.port())
        }
        _ => address,
    }
}

fn accept_loop(
    shared: &Arc<ServerShared>,
    listener: &TcpListener,
    tls: Option<&Arc<rustls::ServerConfig>>,
    base_url: &Url,
) {
    loop {
        match listener.accept() {
            Ok((tcp, peer)) => {
                if shared.is_shutting_down() {
                    break;
                }
                tracing::debug!("Accepted connection from {peer}");

                let worker = shared.workers.enter();
                let handler_shared = Arc::clone(shared);
                let handler_tls = tls.cloned();
                let handler_url = base_url.clone();
                let spawned = thread::Builder::new()
                    .name(format!("MockWebServer {peer}"))
                    .spawn(move || {
                        let _worker = worker;
                        connection::serve(&handler_shared, tcp, handler_tls, &handler_url);
                    });

                if let Err(err) = spawned {
                    tracing::error!("Unable to spawn a handler for {peer}: {err}");
                }
            }
            Err(err) if shared.is_shutting_down() => {
                tracing::debug!("Accept failed during shutdown: {err}");
                break;
            }
            Err(err) => {
                tracing::warn!("Accept failed: {err}");
                thread::sleep(ACCEPT_BACKOFF);
            }
        }
    }

    tracing::debug!("Accept loop for {base_url} exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::FnDispatcher;
    use std::io::{Read, Write};

    fn get(server: &MockWebServer, path: &str) -> String {
        let mut client = TcpStream::connect(server.to_proxy_address().unwrap()).unwrap();
        write!(
            client,
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        )
        .unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).unwrap();
        reply
    }

    /// WHY: Verify lifecycle transitions reject invalid starts
    /// WHAT: Starting twice and starting after shutdown both fail
    #[test]
    fn test_start_twice_and_after_shutdown() {
        let server = MockWebServer::new();
        server.start().unwrap();
        assert!(matches!(server.start(), Err(MockServerError::AlreadyStarted)));

        server.shutdown();
        assert!(!server.is_started());
        assert!(matches!(server.start(), Err(MockServerError::AlreadyStopped)));
        assert!(matches!(server.url("/"), Err(MockServerError::AlreadyStopped)));
    }

    #[test]
    fn test_shutdown_without_start_is_noop() {
        let server = MockWebServer::new();
        server.shutdown();
        server.shutdown();
        assert!(!server.is_started());
    }

    #[test]
    fn test_url_starts_server() {
        let server = MockWebServer::new();
        assert!(!server.is_started());
        let url = server.url("/a/b?c=d").unwrap();
        assert!(server.is_started());
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.port(), Some(server.port().unwrap()));
        assert_eq!(url.path(), "/a/b");
        assert_eq!(url.query(), Some("c=d"));
    }

    #[test]
    fn test_host_name_known_before_start() {
        let server = MockWebServer::new();
        assert_eq!(server.host_name(), "127.0.0.1");
    }

    #[test]
    fn test_enqueue_rejected_for_custom_dispatcher() {
        let server = MockWebServer::new();
        server.set_dispatcher(FnDispatcher::new(|_| Ok(MockResponse::new())));
        assert!(matches!(
            server.enqueue(MockResponse::new()),
            Err(MockServerError::NotAQueueDispatcher)
        ));
    }

    #[test]
    fn test_serves_enqueued_response_and_records_request() {
        let server = MockWebServer::new();
        server
            .enqueue(MockResponse::new().set_body("hello world"))
            .unwrap();

        let reply = get(&server, "/hello");
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with("hello world"));

        let recorded = server.take_request().unwrap();
        assert_eq!(recorded.request_line(), "GET /hello HTTP/1.1");
        assert_eq!(recorded.sequence_number(), 0);
        assert_eq!(server.request_count(), 1);
    }

    #[test]
    fn test_take_request_timeout_then_exhausted() {
        let server = MockWebServer::new();
        server.start().unwrap();
        assert_eq!(
            server.take_request_timeout(Duration::from_millis(50)),
            Err(TakeRequestError::Timeout)
        );

        server.shutdown();
        assert_eq!(server.take_request(), Err(TakeRequestError::Exhausted));
    }

    #[test]
    fn test_body_limit_truncates_recorded_body() {
        let server = MockWebServer::new();
        server.set_body_limit(4);
        server.enqueue(MockResponse::new()).unwrap();

        let mut client = TcpStream::connect(server.to_proxy_address().unwrap()).unwrap();
        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 10\r\nConnection: close\r\n\r\n0123456789")
            .unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).unwrap();

        let recorded = server.take_request().unwrap();
        assert_eq!(recorded.body().as_ref(), b"0123");
        assert_eq!(recorded.body_size(), 10);
    }

    #[test]
    fn test_wake_address_for_unspecified_bind() {
        let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9000);
        assert_eq!(
            wake_address(address),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000)
        );
    }
}
