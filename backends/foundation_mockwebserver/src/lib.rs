//! Scriptable in-process HTTP/1.1 server for testing HTTP clients.
//!
//! This crate provides:
//! - **Response scripts**: queue exact status lines, headers and bodies
//! - **Request capture**: every received request, in arrival order
//! - **Fault injection**: disconnects, throttling and delays at fixed points
//!   of an exchange
//! - **HTTPS**: throwaway certificates and rustls configurations for them
//!
//! # Examples
//!
//! ```rust
//! use foundation_mockwebserver::{MockResponse, MockWebServer, SocketPolicy};
//! use std::io::{Read, Write};
//! use std::net::TcpStream;
//!
//! let server = MockWebServer::new();
//! server.enqueue(MockResponse::new().set_response_code(404)).unwrap();
//! server
//!     .enqueue(MockResponse::new().set_socket_policy(SocketPolicy::DisconnectAtStart))
//!     .unwrap();
//!
//! let mut client = TcpStream::connect(server.to_proxy_address().unwrap()).unwrap();
//! client
//!     .write_all(b"GET /missing HTTP/1.1\r\nConnection: close\r\n\r\n")
//!     .unwrap();
//! let mut reply = String::new();
//! client.read_to_string(&mut reply).unwrap();
//! assert!(reply.starts_with("HTTP/1.1 404 Client Error"));
//!
//! assert_eq!(server.take_request().unwrap().path(), "/missing");
//! ```
//!
//! Call [`logging::init`] from a test binary to see the server's `tracing`
//! output, filtered by `RUST_LOG`.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod fixture;
pub mod headers;
pub mod logging;
pub mod queue;
pub mod recorder;
pub mod request;
pub mod response;
pub mod server;
pub mod synca;
pub mod tls;

mod connection;
mod netcap;
mod wire;

pub use config::ServerConfig;
pub use dispatcher::{Dispatcher, FnDispatcher, QueueDispatcher};
pub use errors::{
    CertificateError, DispatchError, MockServerError, MockServerResult, ProtocolError,
    TakeRequestError, TlsSetupError,
};
pub use fixture::{PerTestServer, SuiteServer};
pub use headers::Headers;
pub use request::{RecordedRequest, TlsSessionInfo};
pub use response::{MockResponse, SocketPolicy, Throttle};
pub use server::MockWebServer;
pub use tls::{HeldCertificate, HeldCertificateBuilder};
