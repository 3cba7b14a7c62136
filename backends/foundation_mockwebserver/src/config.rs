//! Server configuration.

use core::time::Duration;
use std::net::{IpAddr, Ipv4Addr};

/// Request bodies beyond this many bytes are counted but not kept.
pub const DEFAULT_BODY_LIMIT: u64 = 128 * 1024 * 1024;

pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a [`crate::MockWebServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the listener binds to
    host: IpAddr,
    /// Port to bind, 0 picks an ephemeral one
    port: u16,
    /// Maximum request body bytes kept per request
    body_limit: u64,
    /// Maximum size of a request line plus headers
    max_header_bytes: usize,
    /// Optional socket read timeout for connection handlers
    read_timeout: Option<Duration>,
    /// How long shutdown waits for connection handlers to exit
    shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Creates a configuration with default values.
    ///
    /// Defaults:
    /// - `host`: 127.0.0.1
    /// - `port`: 0 (ephemeral)
    /// - `body_limit`: 128 MiB
    /// - `max_header_bytes`: 64 KiB
    /// - `read_timeout`: None
    /// - `shutdown_timeout`: 5s
    #[must_use]
    pub const fn new() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            body_limit: DEFAULT_BODY_LIMIT,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            read_timeout: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn body_limit(mut self, bytes: u64) -> Self {
        self.body_limit = bytes;
        self
    }

    #[must_use]
    pub const fn max_header_bytes(mut self, bytes: usize) -> Self {
        self.max_header_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn get_host(&self) -> IpAddr {
        self.host
    }

    #[must_use]
    pub const fn get_port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub const fn get_body_limit(&self) -> u64 {
        self.body_limit
    }

    #[must_use]
    pub const fn get_max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    #[must_use]
    pub const fn get_read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    #[must_use]
    pub const fn get_shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
