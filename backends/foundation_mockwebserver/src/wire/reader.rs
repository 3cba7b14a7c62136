//! HTTP/1.1 request parsing.
//!
//! Works over any [`BufRead`] so the connection handler can keep one
//! buffered reader per connection: bytes of pipelined requests stay in
//! its buffer between exchanges.

use std::io::{BufRead, Read};

use crate::errors::{ProtocolError, ProtocolResult};
use crate::headers::{self, split_header_line, Headers};
use crate::response::Throttle;
use crate::wire::throttle::Throttler;

const MAX_CHUNK_LINE_BYTES: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub request_line: String,
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Headers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Fixed(u64),
    Chunked,
}

impl RequestHead {
    pub fn framing(&self) -> ProtocolResult<BodyFraming> {
        if self.headers.contains(headers::TRANSFER_ENCODING) {
            let values = self.headers.get_all(headers::TRANSFER_ENCODING).join(",");
            let last = values.rsplit(',').next().unwrap_or_default().trim();
            if last.eq_ignore_ascii_case("chunked") {
                return Ok(BodyFraming::Chunked);
            }
            return Err(ProtocolError::UnsupportedTransferEncoding);
        }

        let lengths = self.headers.get_all(headers::CONTENT_LENGTH);
        let Some(first) = lengths.first() else {
            return Ok(BodyFraming::Empty);
        };

        if lengths.iter().any(|value| value.trim() != first.trim()) {
            return Err(ProtocolError::InvalidContentLength(lengths.join(",")));
        }

        match first.trim().parse::<u64>() {
            Ok(0) => Ok(BodyFraming::Empty),
            Ok(length) => Ok(BodyFraming::Fixed(length)),
            Err(_) => Err(ProtocolError::InvalidContentLength((*first).to_string())),
        }
    }

    #[must_use]
    pub fn expects_continue(&self) -> bool {
        self.headers
            .get(headers::EXPECT)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("100-continue"))
    }

    /// Whether the client allows another exchange on this connection.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        if self.headers.has_token(headers::CONNECTION, "close") {
            return false;
        }
        match self.version.as_str() {
            "HTTP/1.1" => true,
            "HTTP/1.0" => self.headers.has_token(headers::CONNECTION, "keep-alive"),
            _ => false,
        }
    }
}

/// Reads one CRLF (or bare LF) terminated line of at most `limit` bytes.
/// `Ok(None)` means the stream ended before any byte of the line.
fn read_line<R: BufRead>(reader: &mut R, limit: u64) -> ProtocolResult<Option<String>> {
    let mut line = Vec::new();
    let read = reader.by_ref().take(limit).read_until(b'\n', &mut line)?;
    if read == 0 {
        return Ok(None);
    }

    if line.last() != Some(&b'\n') {
        if read as u64 >= limit {
            return Err(ProtocolError::HeaderSectionTooLarge);
        }
        return Err(ProtocolError::UnexpectedEof);
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }

    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

fn parse_request_line(line: &str) -> ProtocolResult<(String, String, String)> {
    let mut parts = line.split(' ');
    let (Some(method), Some(path), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ProtocolError::InvalidRequestLine(line.to_string()));
    };

    if method.is_empty() || path.is_empty() || !version.starts_with("HTTP/") {
        return Err(ProtocolError::InvalidRequestLine(line.to_string()));
    }

    Ok((method.to_string(), path.to_string(), version.to_string()))
}

/// Reads a request line and its headers. `Ok(None)` when the peer closed
/// the connection cleanly between requests.
pub fn read_head<R: BufRead>(
    reader: &mut R,
    max_header_bytes: usize,
) -> ProtocolResult<Option<RequestHead>> {
    let mut budget = max_header_bytes as u64;

    // Empty lines before a request line are tolerated.
    let request_line = loop {
        let Some(line) = read_line(reader, budget)? else {
            return Ok(None);
        };
        budget = budget.saturating_sub(line.len() as u64 + 2);
        if !line.is_empty() {
            break line;
        }
    };

    let (method, path, version) = parse_request_line(&request_line)?;

    let mut headers = Headers::new();
    loop {
        if budget == 0 {
            return Err(ProtocolError::HeaderSectionTooLarge);
        }
        let line = read_line(reader, budget)?.ok_or(ProtocolError::UnexpectedEof)?;
        budget = budget.saturating_sub(line.len() as u64 + 2);
        if line.is_empty() {
            break;
        }

        let (name, value) =
            split_header_line(&line).ok_or_else(|| ProtocolError::InvalidHeaderLine(line.clone()))?;
        headers.add(name, value);
    }

    Ok(Some(RequestHead {
        request_line,
        method,
        path,
        version,
        headers,
    }))
}

/// How a body read should behave beyond plain framing.
#[derive(Debug, Clone, Copy)]
pub struct BodyReadOptions {
    /// Bytes kept in memory; the rest is read and counted only.
    pub limit: u64,
    pub throttle: Option<Throttle>,
    /// Stop part way: after half the declared length (half of the first
    /// chunk when chunked), never more than `limit`.
    pub disconnect_halfway: bool,
}

#[derive(Debug, Default)]
pub struct BodyRead {
    pub body: Vec<u8>,
    pub size: u64,
    pub chunk_sizes: Vec<usize>,
    /// The read stopped early because of `disconnect_halfway`.
    pub disconnected: bool,
}

struct BodySink {
    read: BodyRead,
    limit: u64,
    disconnect_at: Option<u64>,
    throttler: Throttler,
}

impl BodySink {
    fn keep(&mut self, bytes: &[u8]) {
        let room = self.limit.saturating_sub(self.read.body.len() as u64);
        let kept = bytes.len().min(usize::try_from(room).unwrap_or(usize::MAX));
        self.read.body.extend_from_slice(&bytes[..kept]);
        self.read.size += bytes.len() as u64;
    }

    fn reached_disconnect(&self) -> bool {
        self.disconnect_at.is_some_and(|at| self.read.size >= at)
    }

    /// Moves exactly `length` bytes from `reader` into the sink unless the
    /// disconnect point comes first. Returns false when it stopped early.
    fn transfer<R: BufRead>(&mut self, reader: &mut R, length: u64) -> ProtocolResult<bool> {
        let mut remaining = length;
        while remaining > 0 {
            if self.reached_disconnect() {
                self.read.disconnected = true;
                return Ok(false);
            }

            let mut wanted = usize::try_from(remaining).unwrap_or(usize::MAX);
            if let Some(at) = self.disconnect_at {
                let before_disconnect = at.saturating_sub(self.read.size);
                wanted = wanted.min(usize::try_from(before_disconnect).unwrap_or(usize::MAX));
            }
            let wanted = self.throttler.allowance(wanted);

            let available = reader.fill_buf()?;
            if available.is_empty() {
                return Err(ProtocolError::UnexpectedEof);
            }

            let moved = available.len().min(wanted);
            self.keep(&available[..moved]);
            reader.consume(moved);
            self.throttler.consumed(moved);
            remaining -= moved as u64;
        }
        Ok(true)
    }
}

fn halfway(length: u64, limit: u64) -> u64 {
    (length / 2).min(limit)
}

/// Reads a request body according to `framing`.
pub fn read_body<R: BufRead>(
    reader: &mut R,
    framing: BodyFraming,
    options: BodyReadOptions,
) -> ProtocolResult<BodyRead> {
    let mut sink = BodySink {
        read: BodyRead::default(),
        limit: options.limit,
        disconnect_at: None,
        throttler: Throttler::new(options.throttle),
    };

    match framing {
        BodyFraming::Empty => {
            sink.read.disconnected = options.disconnect_halfway;
        }
        BodyFraming::Fixed(length) => {
            if options.disconnect_halfway {
                sink.disconnect_at = Some(halfway(length, options.limit));
            }
            sink.transfer(reader, length)?;
        }
        BodyFraming::Chunked => read_chunks(reader, &mut sink, options)?,
    }

    Ok(sink.read)
}

fn read_chunks<R: BufRead>(
    reader: &mut R,
    sink: &mut BodySink,
    options: BodyReadOptions,
) -> ProtocolResult<()> {
    loop {
        let line = read_line(reader, MAX_CHUNK_LINE_BYTES)?.ok_or(ProtocolError::UnexpectedEof)?;
        let size_field = line.split(';').next().unwrap_or_default().trim();
        if size_field.is_empty() || !size_field.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidChunkSize(line));
        }
        let size = u64::from_str_radix(size_field, 16)
            .map_err(|_| ProtocolError::InvalidChunkSize(line.clone()))?;

        if size == 0 {
            // Trailers are read and dropped up to the final empty line.
            loop {
                let trailer =
                    read_line(reader, MAX_CHUNK_LINE_BYTES)?.ok_or(ProtocolError::UnexpectedEof)?;
                if trailer.is_empty() {
                    return Ok(());
                }
            }
        }

        if options.disconnect_halfway && sink.disconnect_at.is_none() {
            sink.disconnect_at = Some(sink.read.size + halfway(size, options.limit));
        }

        sink.read
            .chunk_sizes
            .push(usize::try_from(size).unwrap_or(usize::MAX));
        if !sink.transfer(reader, size)? {
            return Ok(());
        }

        let terminator =
            read_line(reader, MAX_CHUNK_LINE_BYTES)?.ok_or(ProtocolError::UnexpectedEof)?;
        if !terminator.is_empty() {
            return Err(ProtocolError::InvalidChunkSize(terminator));
        }
    }
}
