use std::time::Duration;

use crate::errors::TakeRequestError;
use crate::queue::{ClosableQueue, Popped};
use crate::request::{ReceivedRequest, RecordedRequest};

/// Capture log of one server instance.
///
/// Sequence numbers come from the log's own push counter, so they are
/// assigned under the same lock that appends and capture order always
/// equals sequence order.
#[derive(Default)]
pub struct RequestLog {
    requests: ClosableQueue<RecordedRequest>,
}

impl RequestLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `received` and returns the stored copy. Returns `None` once
    /// the log has been closed by shutdown.
    pub(crate) fn record(&self, received: ReceivedRequest) -> Option<RecordedRequest> {
        let mut recorded = None;
        self.requests.push_with(|sequence_number| {
            let request = RecordedRequest::from_received(received, sequence_number);
            recorded = Some(request.clone());
            request
        })?;
        recorded
    }

    /// Next sequence number, without assigning it.
    #[must_use]
    pub fn next_sequence_number(&self) -> u64 {
        self.requests.pushed()
    }

    /// Number of requests recorded so far, including those already taken.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.requests.pushed()
    }

    pub fn take(&self) -> Result<RecordedRequest, TakeRequestError> {
        match self.requests.pop() {
            Popped::Value(request) => Ok(request),
            Popped::Closed => Err(TakeRequestError::Exhausted),
            Popped::TimedOut => Err(TakeRequestError::Timeout),
        }
    }

    pub fn take_timeout(&self, timeout: Duration) -> Result<RecordedRequest, TakeRequestError> {
        match self.requests.pop_timeout(timeout) {
            Popped::Value(request) => Ok(request),
            Popped::Closed => Err(TakeRequestError::Exhausted),
            Popped::TimedOut => Err(TakeRequestError::Timeout),
        }
    }

    pub(crate) fn close(&self) {
        self.requests.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use bytes::Bytes;
    use url::Url;

    fn received(path: &str) -> ReceivedRequest {
        ReceivedRequest {
            request_line: format!("GET {path} HTTP/1.1"),
            method: "GET".into(),
            path: path.into(),
            version: "HTTP/1.1".into(),
            headers: Headers::new(),
            body: Bytes::new(),
            body_size: 0,
            chunk_sizes: Vec::new(),
            tls: None,
            request_url: Url::parse("http://127.0.0.1:1/").unwrap(),
        }
    }

    #[test]
    fn test_sequence_numbers_follow_capture_order() {
        let log = RequestLog::new();
        let first = log.record(received("/a")).unwrap();
        let second = log.record(received("/b")).unwrap();
        assert_eq!(first.sequence_number(), 0);
        assert_eq!(second.sequence_number(), 1);

        assert_eq!(log.take().unwrap().path(), "/a");
        assert_eq!(log.take().unwrap().path(), "/b");
        assert_eq!(log.request_count(), 2);
    }

    #[test]
    fn test_timeout_and_exhausted_are_distinct() {
        let log = RequestLog::new();
        assert_eq!(
            log.take_timeout(Duration::from_millis(20)),
            Err(TakeRequestError::Timeout)
        );

        log.record(received("/late"));
        log.close();
        assert!(log.record(received("/rejected")).is_none());
        assert_eq!(log.take_timeout(Duration::from_millis(20)).unwrap().path(), "/late");
        assert_eq!(
            log.take_timeout(Duration::from_millis(20)),
            Err(TakeRequestError::Exhausted)
        );
        assert_eq!(log.take(), Err(TakeRequestError::Exhausted));
    }
}
