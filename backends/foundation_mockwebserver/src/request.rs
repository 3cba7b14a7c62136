//! Requests as the server received them.

use bytes::Bytes;
use url::Url;

use crate::headers::Headers;

/// Negotiated parameters of an encrypted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSessionInfo {
    pub protocol_version: String,
    pub cipher_suite: String,
    pub server_name: Option<String>,
    pub alpn_protocol: Option<String>,
}

/// Everything parsed off the wire for one request, before the server has
/// given it a place in the capture log.
#[derive(Debug, Clone)]
pub(crate) struct ReceivedRequest {
    pub request_line: String,
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Headers,
    pub body: Bytes,
    pub body_size: u64,
    pub chunk_sizes: Vec<usize>,
    pub tls: Option<TlsSessionInfo>,
    pub request_url: Url,
}

/// Immutable capture of one inbound request plus what the server observed
/// about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    request_line: String,
    method: String,
    path: String,
    version: String,
    headers: Headers,
    body: Bytes,
    body_size: u64,
    chunk_sizes: Vec<usize>,
    tls: Option<TlsSessionInfo>,
    sequence_number: u64,
    request_url: Url,
}

impl RecordedRequest {
    pub(crate) fn from_received(received: ReceivedRequest, sequence_number: u64) -> Self {
        Self {
            request_line: received.request_line,
            method: received.method,
            path: received.path,
            version: received.version,
            headers: received.headers,
            body: received.body,
            body_size: received.body_size,
            chunk_sizes: received.chunk_sizes,
            tls: received.tls,
            sequence_number,
            request_url: received.request_url,
        }
    }

    /// Placeholder handed to the dispatcher when an exchange is consumed
    /// without reading anything, as `DisconnectAtStart` does. It is never
    /// added to the capture log and its request line is empty.
    pub(crate) fn bookkeeping(sequence_number: u64, request_url: Url) -> Self {
        Self {
            request_line: String::new(),
            method: String::new(),
            path: String::new(),
            version: String::new(),
            headers: Headers::new(),
            body: Bytes::new(),
            body_size: 0,
            chunk_sizes: Vec::new(),
            tls: None,
            sequence_number,
            request_url,
        }
    }

    /// The first line of the request, e.g. `GET /a?b=c HTTP/1.1`.
    #[must_use]
    pub fn request_line(&self) -> &str {
        &self.request_line
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path and query exactly as they appeared in the request line.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Body bytes kept by the server, at most the configured body limit.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Lossy UTF-8 view of [`Self::body`].
    #[must_use]
    pub fn utf8_body(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Number of body bytes read from the wire, including any the body
    /// limit discarded.
    #[must_use]
    pub fn body_size(&self) -> u64 {
        self.body_size
    }

    /// Sizes of each chunk of a chunked request body, empty otherwise.
    #[must_use]
    pub fn chunk_sizes(&self) -> &[usize] {
        &self.chunk_sizes
    }

    #[must_use]
    pub fn tls(&self) -> Option<&TlsSessionInfo> {
        self.tls.as_ref()
    }

    /// Index of this request among all requests this server received,
    /// starting at 0.
    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    #[must_use]
    pub fn request_url(&self) -> &Url {
        &self.request_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn received(path: &str) -> ReceivedRequest {
        let mut headers = Headers::new();
        headers.add("Accept-Language", "en-US");
        ReceivedRequest {
            request_line: format!("GET {path} HTTP/1.1"),
            method: "GET".into(),
            path: path.into(),
            version: "HTTP/1.1".into(),
            headers,
            body: Bytes::from_static(b"hello"),
            body_size: 5,
            chunk_sizes: Vec::new(),
            tls: None,
            request_url: Url::parse(&format!("http://127.0.0.1:8080{path}")).unwrap(),
        }
    }

    #[test]
    fn test_recorded_request_accessors() {
        let request = RecordedRequest::from_received(received("/a/deep/path?key=foo%20bar"), 7);
        assert_eq!(request.request_line(), "GET /a/deep/path?key=foo%20bar HTTP/1.1");
        assert_eq!(request.header("accept-language"), Some("en-US"));
        assert_eq!(request.sequence_number(), 7);
        assert_eq!(request.utf8_body(), "hello");
        assert_eq!(request.request_url().path(), "/a/deep/path");
        let query: Vec<(String, String)> = request
            .request_url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(query, vec![("key".to_string(), "foo bar".to_string())]);
    }

    #[test]
    fn test_bookkeeping_request_is_blank() {
        let url = Url::parse("http://127.0.0.1:1/").unwrap();
        let request = RecordedRequest::bookkeeping(3, url);
        assert!(request.request_line().is_empty());
        assert!(request.headers().is_empty());
        assert_eq!(request.sequence_number(), 3);
    }
}
