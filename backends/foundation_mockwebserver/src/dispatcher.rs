//! Strategies mapping a recorded request to the response that answers it.

use std::fmt;
use std::sync::RwLock;

use crate::errors::{DispatchError, DispatchResult};
use crate::queue::{ClosableQueue, Popped};
use crate::request::RecordedRequest;
use crate::response::MockResponse;

/// Produces the response for each request the server receives.
///
/// `dispatch` runs on the connection's own thread and may block. Anything
/// that blocks must return [`DispatchError::Aborted`] once
/// [`Dispatcher::shutdown`] has been called.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, request: &RecordedRequest) -> DispatchResult<MockResponse>;

    /// The response that would answer the next request, without consuming
    /// it. The connection handler reads the socket policy and throttle off
    /// it before the request has been read.
    fn peek(&self) -> MockResponse {
        MockResponse::new()
    }

    /// Releases callers blocked in [`Dispatcher::dispatch`].
    fn shutdown(&self) {}

    fn as_queue(&self) -> Option<&QueueDispatcher> {
        None
    }
}

/// Default dispatcher: answers requests with enqueued responses in strict
/// FIFO order, blocking while the queue is empty.
pub struct QueueDispatcher {
    responses: ClosableQueue<MockResponse>,
    fail_fast: RwLock<Option<MockResponse>>,
}

impl Default for QueueDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            responses: ClosableQueue::new(),
            fail_fast: RwLock::new(None),
        }
    }

    /// Never blocks. Responses enqueued after shutdown are dropped.
    pub fn enqueue(&self, response: MockResponse) {
        if !self.responses.push(response) {
            tracing::debug!("QueueDispatcher closed, dropping enqueued response");
        }
    }

    /// When set, requests arriving at an empty queue get this response
    /// immediately instead of waiting.
    pub fn set_fail_fast(&self, response: Option<MockResponse>) {
        match self.fail_fast.write() {
            Ok(mut guard) => *guard = response,
            Err(poisoned) => *poisoned.into_inner() = response,
        }
    }

    fn fail_fast_response(&self) -> Option<MockResponse> {
        match self.fail_fast.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.responses.len()
    }
}

impl Dispatcher for QueueDispatcher {
    fn dispatch(&self, request: &RecordedRequest) -> DispatchResult<MockResponse> {
        if let Some(response) = self.responses.try_pop() {
            return Ok(response);
        }

        if let Some(response) = self.fail_fast_response() {
            tracing::debug!(
                "No response enqueued for {:?}, answering fail-fast",
                request.request_line()
            );
            return Ok(response);
        }

        tracing::debug!(
            "Waiting for an enqueued response to answer {:?}",
            request.request_line()
        );
        match self.responses.pop() {
            Popped::Value(response) => Ok(response),
            Popped::Closed | Popped::TimedOut => Err(DispatchError::Aborted),
        }
    }

    fn peek(&self) -> MockResponse {
        self.responses
            .peek()
            .or_else(|| self.fail_fast_response())
            .unwrap_or_default()
    }

    fn shutdown(&self) {
        self.responses.close();
    }

    fn as_queue(&self) -> Option<&QueueDispatcher> {
        Some(self)
    }
}

impl fmt::Debug for QueueDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueDispatcher")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Computes responses with a closure.
pub struct FnDispatcher<F>(F);

impl<F> FnDispatcher<F>
where
    F: Fn(&RecordedRequest) -> DispatchResult<MockResponse> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self(handler)
    }
}

impl<F> Dispatcher for FnDispatcher<F>
where
    F: Fn(&RecordedRequest) -> DispatchResult<MockResponse> + Send + Sync,
{
    fn dispatch(&self, request: &RecordedRequest) -> DispatchResult<MockResponse> {
        (self.0)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::SocketPolicy;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use url::Url;

    fn request() -> RecordedRequest {
        RecordedRequest::bookkeeping(0, Url::parse("http://127.0.0.1:1/").unwrap())
    }

    #[test]
    fn test_queue_dispatcher_is_fifo() {
        let dispatcher = QueueDispatcher::new();
        dispatcher.enqueue(MockResponse::new().set_body("A"));
        dispatcher.enqueue(MockResponse::new().set_body("B"));

        let first = dispatcher.dispatch(&request()).unwrap();
        let second = dispatcher.dispatch(&request()).unwrap();
        assert_eq!(first.body().as_ref(), b"A");
        assert_eq!(second.body().as_ref(), b"B");
    }

    #[test]
    fn test_peek_does_not_consume() {
        let dispatcher = QueueDispatcher::new();
        assert_eq!(dispatcher.peek().socket_policy(), SocketPolicy::KeepOpen);

        dispatcher.enqueue(MockResponse::new().set_socket_policy(SocketPolicy::DisconnectAtStart));
        assert_eq!(dispatcher.peek().socket_policy(), SocketPolicy::DisconnectAtStart);
        assert_eq!(dispatcher.pending(), 1);
    }

    #[test]
    fn test_fail_fast_answers_empty_queue() {
        let dispatcher = QueueDispatcher::new();
        dispatcher.set_fail_fast(Some(MockResponse::new().set_response_code(404)));
        let response = dispatcher.dispatch(&request()).unwrap();
        assert_eq!(response.code(), Some(404));
    }

    #[test]
    fn test_shutdown_aborts_blocked_dispatch() {
        let dispatcher = Arc::new(QueueDispatcher::new());
        let blocked = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.dispatch(&request()))
        };

        thread::sleep(Duration::from_millis(100));
        dispatcher.shutdown();
        assert!(matches!(blocked.join().unwrap(), Err(DispatchError::Aborted)));
    }

    #[test]
    fn test_fn_dispatcher_uses_request() {
        let dispatcher = FnDispatcher::new(|request: &RecordedRequest| {
            Ok(MockResponse::new().set_body(format!("seq={}", request.sequence_number())))
        });
        let response = dispatcher.dispatch(&request()).unwrap();
        assert_eq!(response.body().as_ref(), b"seq=0");
        assert!(dispatcher.as_queue().is_none());
    }
}
