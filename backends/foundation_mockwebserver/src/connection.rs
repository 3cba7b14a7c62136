//! Per-connection exchange loop.
//!
//! Socket policies are consumed at fixed points of an exchange:
//!
//! - before any request byte is read: `DisconnectAtStart`
//! - while reading the request body: `DisconnectDuringRequestBody`
//! - instead of the response: `NoResponse`
//! - while writing the response body: `DisconnectDuringResponseBody`
//! - after a complete response: `DisconnectAtEnd`

use std::io::{self, BufRead, BufReader, Read};
use std::net::TcpStream;
use std::sync::Arc;

use bytes::Bytes;
use url::Url;

use crate::errors::{DispatchError, ProtocolResult};
use crate::headers;
use crate::netcap::ServerStream;
use crate::request::{ReceivedRequest, RecordedRequest};
use crate::response::{MockResponse, SocketPolicy};
use crate::server::ServerShared;
use crate::wire::{self, BodyFraming, BodyReadOptions, WriteOutcome};

/// What to do with the connection once an exchange is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    KeepAlive,
    /// Orderly close, TLS sessions get a close_notify.
    Close,
    /// Abrupt close requested by a socket policy.
    Abort,
}

/// Serves `tcp` until the client goes away, a socket policy closes it or
/// the server shuts down. Never panics on client misbehaviour.
pub(crate) fn serve(
    shared: &Arc<ServerShared>,
    tcp: TcpStream,
    tls: Option<Arc<rustls::ServerConfig>>,
    base_url: &Url,
) {
    let peer = tcp
        .peer_addr()
        .map_or_else(|_| String::from("<unknown>"), |addr| addr.to_string());

    let _registration = match shared.connections().register(&tcp) {
        Ok(registration) => registration,
        Err(err) => {
            tracing::warn!("Unable to track connection from {peer}: {err}");
            return;
        }
    };

    if shared.is_shutting_down() {
        return;
    }

    if let Err(err) = tcp.set_read_timeout(shared.config().get_read_timeout()) {
        tracing::warn!("Unable to set read timeout for {peer}: {err}");
    }

    if consume_disconnect_at_start(shared, base_url) {
        tracing::debug!("Disconnecting {peer} before reading the request");
        ServerStream::Plain(tcp).close();
        return;
    }

    let stream = match tls {
        Some(config) => match ServerStream::accept_tls(config, tcp) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::debug!("TLS handshake with {peer} failed: {err}");
                return;
            }
        },
        None => ServerStream::Plain(tcp),
    };

    let mut connection = Connection {
        shared,
        base_url,
        reader: BufReader::new(stream),
    };

    match connection.run() {
        Ok(Next::Close) => {
            if let Err(err) = connection.stream().finish() {
                tracing::debug!("Closing connection from {peer} failed: {err}");
            }
            tracing::debug!("Connection from {peer} finished");
        }
        Ok(_) => tracing::debug!("Connection from {peer} dropped by socket policy"),
        Err(err) if shared.is_shutting_down() => {
            tracing::debug!("Connection from {peer} ended by shutdown: {err}");
        }
        Err(err) => tracing::warn!("Connection from {peer} aborted: {err}"),
    }

    connection.stream().close();
}

/// Pops a `DisconnectAtStart` script, if it is next, through a bookkeeping
/// dispatch that is never recorded.
///
/// The placeholder carries the sequence number the next recorded request
/// will get, so a dispatcher may see that number twice.
fn consume_disconnect_at_start(shared: &ServerShared, base_url: &Url) -> bool {
    let dispatcher = shared.dispatcher();
    if dispatcher.peek().socket_policy() != SocketPolicy::DisconnectAtStart {
        return false;
    }

    let bookkeeping =
        RecordedRequest::bookkeeping(shared.log().next_sequence_number(), base_url.clone());
    if let Err(err) = dispatcher.dispatch(&bookkeeping) {
        tracing::debug!("Bookkeeping dispatch failed: {err}");
    }
    true
}

/// Absolute URL for the request target `path` as seen by this server.
///
/// Origin-form targets always keep the server's own scheme, host and port,
/// even when they start with `//`.
pub(crate) fn request_url(base_url: &Url, path: &str) -> Url {
    if path.starts_with('/') {
        let mut url = base_url.clone();
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };
        url.set_path(path);
        url.set_query(query);
        return url;
    }

    Url::parse(path).unwrap_or_else(|_| base_url.clone())
}

struct Connection<'a> {
    shared: &'a Arc<ServerShared>,
    base_url: &'a Url,
    reader: BufReader<ServerStream>,
}

impl Connection<'_> {
    fn stream(&mut self) -> &mut ServerStream {
        self.reader.get_mut()
    }

    /// Runs exchanges until one of them ends the connection.
    fn run(&mut self) -> ProtocolResult<Next> {
        let mut exchanges = 0u64;
        loop {
            if exchanges > 0 {
                // The peeked script belongs to whichever connection sends next.
                if self.reader.fill_buf()?.is_empty() {
                    return Ok(Next::Close);
                }
                if consume_disconnect_at_start(self.shared, self.base_url) {
                    tracing::debug!("Disconnecting before reading request #{exchanges}");
                    return Ok(Next::Abort);
                }
            }

            match self.exchange()? {
                Next::KeepAlive => exchanges += 1,
                next => return Ok(next),
            }
        }
    }

    fn exchange(&mut self) -> ProtocolResult<Next> {
        let max_header_bytes = self.shared.config().get_max_header_bytes();
        let Some(head) = wire::read_head(&mut self.reader, max_header_bytes)? else {
            return Ok(Next::Close);
        };
        tracing::debug!("Received {:?}", head.request_line);

        let script = self.shared.dispatcher().peek();
        let framing = head.framing()?;
        if framing != BodyFraming::Empty && head.expects_continue() {
            wire::write_continue(self.stream())?;
        }

        let body = wire::read_body(
            &mut self.reader,
            framing,
            BodyReadOptions {
                limit: self.shared.body_limit(),
                throttle: script.throttle(),
                disconnect_halfway: script.socket_policy()
                    == SocketPolicy::DisconnectDuringRequestBody,
            },
        )?;

        let keep_alive = head.keep_alive();
        let request_url = request_url(self.base_url, &head.path);
        let tls = self.reader.get_ref().tls_info();
        let received = ReceivedRequest {
            request_line: head.request_line,
            method: head.method,
            path: head.path,
            version: head.version,
            headers: head.headers,
            body: Bytes::from(body.body),
            body_size: body.size,
            chunk_sizes: body.chunk_sizes,
            tls,
            request_url,
        };

        let Some(recorded) = self.shared.log().record(received) else {
            tracing::debug!("Request log closed, dropping request");
            return Ok(Next::Close);
        };

        let response = match self.shared.dispatcher().dispatch(&recorded) {
            Ok(response) => response,
            Err(DispatchError::Aborted) => {
                tracing::debug!("Dispatch of request #{} aborted", recorded.sequence_number());
                return Ok(Next::Close);
            }
            Err(DispatchError::Failed(err)) => {
                tracing::warn!(
                    "Dispatcher failed for request #{}: {err}",
                    recorded.sequence_number()
                );
                return Ok(Next::Close);
            }
        };

        if body.disconnected {
            tracing::debug!(
                "Disconnected during body of request #{} after {} bytes",
                recorded.sequence_number(),
                recorded.body_size()
            );
            return Ok(Next::Abort);
        }

        self.respond(&response, keep_alive)
    }

    fn respond(&mut self, response: &MockResponse, keep_alive: bool) -> ProtocolResult<Next> {
        let policy = response.socket_policy();
        if policy == SocketPolicy::NoResponse {
            self.hold_open()?;
            return Ok(Next::Abort);
        }

        let halfway = policy == SocketPolicy::DisconnectDuringResponseBody;
        if wire::write_response(self.stream(), response, halfway)? == WriteOutcome::Disconnected {
            tracing::debug!("Disconnected halfway through the response body");
            return Ok(Next::Abort);
        }

        if policy == SocketPolicy::DisconnectAtEnd {
            return Ok(Next::Abort);
        }

        let response_closes = response.headers().has_token(headers::CONNECTION, "close");
        if response_closes || !keep_alive {
            return Ok(Next::Close);
        }
        Ok(Next::KeepAlive)
    }

    /// Reads and discards input until the client closes the connection or
    /// shutdown closes it from this side.
    fn hold_open(&mut self) -> io::Result<()> {
        let mut sink = [0u8; 1024];
        loop {
            match self.reader.read(&mut sink) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) && !self.shared.is_shutting_down() => {}
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_joins_origin_form() {
        let base = Url::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(
            request_url(&base, "/a/deep/path?key=foo%20bar").as_str(),
            "http://127.0.0.1:8080/a/deep/path?key=foo%20bar"
        );
    }

    #[test]
    fn test_request_url_keeps_host_for_double_slash_path() {
        let base = Url::parse("http://127.0.0.1:8080/").unwrap();
        let url = request_url(&base, "//evil.example/x?y=z");
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.port(), Some(8080));
        assert_eq!(url.path(), "//evil.example/x");
        assert_eq!(url.query(), Some("y=z"));
    }

    #[test]
    fn test_request_url_keeps_absolute_form() {
        let base = Url::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(
            request_url(&base, "http://example.com/x").as_str(),
            "http://example.com/x"
        );
    }

    #[test]
    fn test_request_url_falls_back_to_base() {
        let base = Url::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(request_url(&base, "*"), base);
    }
}
