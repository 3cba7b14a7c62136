//! Test lifecycle helpers.
//!
//! [`PerTestServer`] owns a started server for the duration of one test.
//! [`SuiteServer`] hands every test of a suite the same server and leaves
//! starting and stopping it to the tests.

use std::ops::Deref;
use std::sync::OnceLock;

use crate::config::ServerConfig;
use crate::errors::MockServerResult;
use crate::server::MockWebServer;

/// A server started on construction and shut down when dropped.
///
/// ```rust
/// use foundation_mockwebserver::{MockResponse, PerTestServer};
///
/// let server = PerTestServer::start().unwrap();
/// assert!(server.is_started());
/// server.enqueue(MockResponse::new()).unwrap();
/// ```
#[derive(Debug)]
pub struct PerTestServer {
    server: MockWebServer,
}

impl PerTestServer {
    /// # Errors
    ///
    /// When the server cannot start.
    pub fn start() -> MockServerResult<Self> {
        Self::with_config(ServerConfig::new())
    }

    /// # Errors
    ///
    /// When the server cannot start.
    pub fn with_config(config: ServerConfig) -> MockServerResult<Self> {
        let server = MockWebServer::with_config(config);
        server.start()?;
        Ok(Self { server })
    }

    #[must_use]
    pub fn server(&self) -> &MockWebServer {
        &self.server
    }
}

impl Deref for PerTestServer {
    type Target = MockWebServer;

    fn deref(&self) -> &Self::Target {
        &self.server
    }
}

/// One server shared by every test that reaches the same static.
///
/// Statics never drop, so the suite calls [`SuiteServer::finish`] once it
/// is done with the server.
///
/// ```rust
/// use foundation_mockwebserver::SuiteServer;
///
/// static SERVER: SuiteServer = SuiteServer::new();
///
/// let server = SERVER.server();
/// server.start().unwrap();
/// assert!(std::ptr::eq(server, SERVER.server()));
/// SERVER.finish();
/// ```
#[derive(Debug)]
pub struct SuiteServer {
    server: OnceLock<MockWebServer>,
    config: ServerConfig,
}

impl Default for SuiteServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SuiteServer {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_config(ServerConfig::new())
    }

    #[must_use]
    pub const fn with_config(config: ServerConfig) -> Self {
        Self {
            server: OnceLock::new(),
            config,
        }
    }

    /// The shared server, created on first use but not started.
    pub fn server(&self) -> &MockWebServer {
        self.server
            .get_or_init(|| MockWebServer::with_config(self.config))
    }

    /// Shuts the shared server down if it was ever created.
    pub fn finish(&self) {
        if let Some(server) = self.server.get() {
            server.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_test_server_stops_on_drop() {
        let fixture = PerTestServer::start().unwrap();
        let address = fixture.to_proxy_address().unwrap();
        drop(fixture);
        assert!(std::net::TcpStream::connect(address).is_err());
    }

    #[test]
    fn test_suite_server_is_shared_and_not_started() {
        static SUITE: SuiteServer = SuiteServer::new();
        let first = SUITE.server();
        assert!(!first.is_started());
        assert!(std::ptr::eq(first, SUITE.server()));

        first.start().unwrap();
        SUITE.finish();
        assert!(!SUITE.server().is_started());
    }
}
