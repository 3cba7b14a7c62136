//! Scripted responses.
//!
//! A [`MockResponse`] describes one response in full: status line, headers,
//! body, and the timing or fault directives the connection handler applies
//! while writing it.

use bytes::{Bytes, BytesMut};
use core::time::Duration;

use crate::headers::{self, Headers};

const DEFAULT_PROTOCOL: &str = "HTTP/1.1";

/// Deliberate transport faults, each consumed at one fixed point of an
/// exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketPolicy {
    /// Serve the exchange normally and keep the connection for the next one.
    #[default]
    KeepOpen,

    /// Close the connection before reading any request bytes.
    DisconnectAtStart,

    /// Close the connection part way through reading the request body.
    DisconnectDuringRequestBody,

    /// Close the connection after roughly half the response body.
    DisconnectDuringResponseBody,

    /// Close the connection right after a complete response.
    DisconnectAtEnd,

    /// Read the request, never write a response.
    NoResponse,
}

/// Body rate limit: sleep `period` after every `bytes_per_period` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    pub bytes_per_period: usize,
    pub period: Duration,
}

impl Throttle {
    #[must_use]
    pub fn new(bytes_per_period: usize, period: Duration) -> Self {
        Self {
            bytes_per_period: bytes_per_period.max(1),
            period,
        }
    }
}

/// Default reason phrase for `code`, derived from its hundreds class.
#[must_use]
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100..=199 => "Informational",
        200..=299 => "OK",
        300..=399 => "Redirection",
        400..=499 => "Client Error",
        500..=599 => "Server Error",
        _ => "Mock Response",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    status: String,
    headers: Headers,
    body: Bytes,
    throttle: Option<Throttle>,
    body_delay: Duration,
    headers_delay: Duration,
    socket_policy: SocketPolicy,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl MockResponse {
    /// `HTTP/1.1 200 OK` with a single `Content-Length: 0` header.
    #[must_use]
    pub fn new() -> Self {
        let mut headers = Headers::new();
        headers.add(headers::CONTENT_LENGTH, "0");
        Self {
            status: format!("{DEFAULT_PROTOCOL} 200 OK"),
            headers,
            body: Bytes::new(),
            throttle: None,
            body_delay: Duration::ZERO,
            headers_delay: Duration::ZERO,
            socket_policy: SocketPolicy::KeepOpen,
        }
    }

    /// Replaces the whole status line verbatim.
    #[must_use]
    pub fn set_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Sets the status code, deriving the reason phrase from its class.
    #[must_use]
    pub fn set_response_code(self, code: u16) -> Self {
        let status = format!("{DEFAULT_PROTOCOL} {code} {}", reason_phrase(code));
        self.set_status(status)
    }

    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Numeric code parsed back out of the status line, when it has one.
    #[must_use]
    pub fn code(&self) -> Option<u16> {
        self.status.split(' ').nth(1)?.parse().ok()
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[must_use]
    pub fn clear_headers(mut self) -> Self {
        self.headers.clear();
        self
    }

    /// Appends a header exactly as given. Names and values are not
    /// validated so malformed headers can be scripted.
    #[must_use]
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Adds a raw `Name: value` line. Lines without a colon are kept as a
    /// header with an empty value so malformed output can be scripted.
    #[must_use]
    pub fn add_header_line(mut self, line: &str) -> Self {
        if self.headers.add_line(line).is_none() {
            self.headers.add(line.trim(), "");
        }
        self
    }

    #[must_use]
    pub fn set_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    #[must_use]
    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    #[must_use]
    pub fn set_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the body and rewrites `Content-Length` to match it.
    #[must_use]
    pub fn set_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.headers
            .set(headers::CONTENT_LENGTH, body.len().to_string());
        self.body = body;
        self
    }

    /// Sets a body framed with chunked transfer encoding, split into chunks
    /// of at most `max_chunk_size` bytes.
    #[must_use]
    pub fn set_chunked_body(mut self, body: impl AsRef<[u8]>, max_chunk_size: usize) -> Self {
        let max_chunk_size = max_chunk_size.max(1);
        let mut encoded = BytesMut::new();
        for chunk in body.as_ref().chunks(max_chunk_size) {
            encoded.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            encoded.extend_from_slice(chunk);
            encoded.extend_from_slice(b"\r\n");
        }
        encoded.extend_from_slice(b"0\r\n\r\n");

        self.headers.remove(headers::CONTENT_LENGTH);
        self.headers.add(headers::TRANSFER_ENCODING, "chunked");
        self.body = encoded.freeze();
        self
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn throttle_body(mut self, bytes_per_period: usize, period: Duration) -> Self {
        self.throttle = Some(Throttle::new(bytes_per_period, period));
        self
    }

    #[must_use]
    pub fn throttle(&self) -> Option<Throttle> {
        self.throttle
    }

    #[must_use]
    pub fn set_body_delay(mut self, delay: Duration) -> Self {
        self.body_delay = delay;
        self
    }

    #[must_use]
    pub fn body_delay(&self) -> Duration {
        self.body_delay
    }

    #[must_use]
    pub fn set_headers_delay(mut self, delay: Duration) -> Self {
        self.headers_delay = delay;
        self
    }

    #[must_use]
    pub fn headers_delay(&self) -> Duration {
        self.headers_delay
    }

    #[must_use]
    pub fn set_socket_policy(mut self, policy: SocketPolicy) -> Self {
        self.socket_policy = policy;
        self
    }

    #[must_use]
    pub fn socket_policy(&self) -> SocketPolicy {
        self.socket_policy
    }
}
