//! Serializes scripted responses onto the wire.

use std::io::{self, Write};
use std::thread;

use crate::response::MockResponse;
use crate::wire::throttle::Throttler;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Complete,
    /// Writing stopped part way through the body on purpose.
    Disconnected,
}

pub fn write_continue<W: Write>(out: &mut W) -> io::Result<()> {
    out.write_all(CONTINUE)?;
    out.flush()
}

/// Writes `response`: status line, headers, then the body after the
/// scripted delays and under its throttle. With `halfway` set, only the
/// first half of the body is written.
pub fn write_response<W: Write>(
    out: &mut W,
    response: &MockResponse,
    halfway: bool,
) -> io::Result<WriteOutcome> {
    if !response.headers_delay().is_zero() {
        thread::sleep(response.headers_delay());
    }

    let mut head = String::with_capacity(128);
    head.push_str(response.status());
    head.push_str("\r\n");
    for (name, value) in response.headers().iter() {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    out.write_all(head.as_bytes())?;
    out.flush()?;

    if !response.body_delay().is_zero() {
        thread::sleep(response.body_delay());
    }

    let body = response.body();
    let (to_write, outcome) = if halfway {
        (&body[..body.len() / 2], WriteOutcome::Disconnected)
    } else {
        (&body[..], WriteOutcome::Complete)
    };

    let mut throttler = Throttler::new(response.throttle());
    let mut written = 0;
    while written < to_write.len() {
        let allowed = throttler.allowance(to_write.len() - written);
        out.write_all(&to_write[written..written + allowed])?;
        out.flush()?;
        throttler.consumed(allowed);
        written += allowed;
    }

    out.flush()?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use std::time::Instant;

    #[test]
    fn test_writes_status_headers_and_body() {
        let response = MockResponse::new()
            .set_body("hello world")
            .add_header("Content-Type", "text/plain");
        let mut out = Vec::new();
        let outcome = write_response(&mut out, &response, false).unwrap();

        assert_eq!(outcome, WriteOutcome::Complete);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "HTTP/1.1 200 OK\r\nContent-Length: 11\r\nContent-Type: text/plain\r\n\r\nhello world"
        );
    }

    #[test]
    fn test_halfway_writes_half_the_body() {
        let response = MockResponse::new().set_body(vec![b'x'; 1000]);
        let mut out = Vec::new();
        let outcome = write_response(&mut out, &response, true).unwrap();

        assert_eq!(outcome, WriteOutcome::Disconnected);
        let text = String::from_utf8(out).unwrap();
        let (_, body) = text.split_once("\r\n\r\n").unwrap();
        assert_eq!(body.len(), 500);
    }

    #[test]
    fn test_continue_line() {
        let mut out = Vec::new();
        write_continue(&mut out).unwrap();
        assert_eq!(out, b"HTTP/1.1 100 Continue\r\n\r\n");
    }

    #[test]
    fn test_body_delay_and_throttle_are_applied() {
        let response = MockResponse::new()
            .set_body("ABCDEF")
            .set_body_delay(Duration::from_millis(50))
            .throttle_body(3, Duration::from_millis(50));
        let started = Instant::now();
        write_response(&mut Vec::new(), &response, false).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
