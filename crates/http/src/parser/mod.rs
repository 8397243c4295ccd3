//! Resumable, callback-driven HTTP/1.1 parsers.
//!
//! The parsers accept the byte stream in chunks of any size. Each call to `feed` processes as
//! many complete syntactic units (start line, header line, body bytes) as the chunk holds and
//! keeps the incomplete tail in a residual buffer which is prepended to the next chunk. Events
//! are only emitted for complete units, so feeding a message in pieces produces the same
//! start/header/done events as feeding it at once, and the same body bytes in order.
//!
//! Body bytes are handed to [`MessageEvents::on_data`] as slices of the fed chunk, never
//! copied. Header lines are handed over raw, without their CRLF; only folded (multiline) headers
//! are joined into a scratch buffer.
//!
//! # Framing
//!
//! - `Content-Length` (case-insensitive) gives the size of the body
//! - `Transfer-Encoding: chunked` switches to chunked framing, chunk extensions and trailers
//!   are skipped
//! - `Connection: close` is reported through [`MessageEvents::on_done`]
//! - without either length header the message ends with its headers
//!
//! After `on_done` the parser is back at the start line, ready for the next message of a
//! keep-alive connection.

mod request;
mod response;

pub use request::RequestParser;
pub use response::ResponseParser;

use std::borrow::Cow;
use std::cmp;
use std::mem;

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::ensure;
use crate::protocol::ParseError;

/// Events shared by requests and responses.
pub trait MessageEvents {
    /// One header line without its CRLF, e.g. `Content-Length: 5`.
    fn on_header(&mut self, line: &[u8]);

    /// A piece of the body. Never empty.
    fn on_data(&mut self, data: &[u8]);

    /// End of the message; `require_close` is set when the peer sent `Connection: close`.
    fn on_done(&mut self, require_close: bool);
}

pub trait ResponseEvents: MessageEvents {
    fn on_response_start(&mut self, version: &str, code: u16);
}

pub trait RequestEvents: MessageEvents {
    fn on_request_start(&mut self, method: &str, target: &str, version: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    StartLine,
    Headers,
    FixedBody,
    ChunkSize,
    ChunkData,
    ChunkDataEnd,
    Trailers,
}

type StartLineFn<H> = fn(&[u8], &mut H) -> Result<(), ParseError>;

/// Header and body framing shared by both parsers.
#[derive(Debug)]
pub(crate) struct Framing {
    stage: Stage,
    residual: BytesMut,
    remaining_body: u64,
    chunked: bool,
    require_close: bool,
    expect_body: bool,
}

impl Framing {
    pub(crate) fn new() -> Self {
        Self {
            stage: Stage::StartLine,
            residual: BytesMut::new(),
            remaining_body: 0,
            chunked: false,
            require_close: false,
            expect_body: true,
        }
    }

    pub(crate) fn remaining_body(&self) -> u64 {
        self.remaining_body
    }

    pub(crate) fn use_chunked_encoding(&self) -> bool {
        self.chunked
    }

    pub(crate) fn require_close(&self) -> bool {
        self.require_close
    }

    pub(crate) fn set_expect_body(&mut self, expect_body: bool) {
        self.expect_body = expect_body;
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.stage == Stage::StartLine && self.residual.is_empty()
    }

    /// Forgets the current message, including buffered bytes.
    pub(crate) fn clear(&mut self) {
        self.stage = Stage::StartLine;
        self.residual.clear();
        self.reset_message();
    }

    fn reset_message(&mut self) {
        self.remaining_body = 0;
        self.chunked = false;
        self.require_close = false;
    }

    pub(crate) fn feed<H: MessageEvents>(&mut self, data: &[u8], handler: &mut H, start_line: StartLineFn<H>) -> Result<(), ParseError> {
        if data.is_empty() {
            return Ok(());
        }

        if self.residual.is_empty() {
            let consumed = self.parse(data, handler, start_line)?;
            self.residual.extend_from_slice(&data[consumed..]);
        } else {
            let mut buffer = mem::take(&mut self.residual);
            buffer.extend_from_slice(data);
            let consumed = self.parse(&buffer, handler, start_line)?;
            buffer.advance(consumed);
            self.residual = buffer;
        }

        trace!(buffered = self.residual.len(), stage = ?self.stage, "fed parser");
        Ok(())
    }

    /// Parses as much of `data` as possible, returning the number of bytes consumed.
    fn parse<H: MessageEvents>(&mut self, data: &[u8], handler: &mut H, start_line: StartLineFn<H>) -> Result<usize, ParseError> {
        let mut pos = 0;

        while pos < data.len() {
            let rest = &data[pos..];
            match self.stage {
                Stage::StartLine => {
                    let Some(end) = find_line_end(rest)? else {
                        return Ok(pos);
                    };
                    start_line(&rest[..end], handler)?;
                    pos += end + 2;
                    self.stage = Stage::Headers;
                }

                Stage::Headers => {
                    if rest[0] == b'\r' {
                        if rest.len() < 2 {
                            return Ok(pos);
                        }
                        ensure!(rest[1] == b'\n', ParseError::ExpectedLineFeed);
                        pos += 2;
                        self.end_of_headers(handler);
                        continue;
                    }

                    let Some((consumed, line)) = scan_header(rest)? else {
                        return Ok(pos);
                    };
                    self.handle_header(&line)?;
                    handler.on_header(&line);
                    pos += consumed;
                }

                Stage::FixedBody | Stage::ChunkData => {
                    let len = cmp::min(self.remaining_body, rest.len() as u64) as usize;
                    handler.on_data(&rest[..len]);
                    pos += len;
                    self.remaining_body -= len as u64;

                    if self.remaining_body == 0 {
                        if self.stage == Stage::FixedBody {
                            self.finalize(handler);
                        } else {
                            self.stage = Stage::ChunkDataEnd;
                        }
                    }
                }

                Stage::ChunkSize => {
                    let Some(end) = find_line_end(rest)? else {
                        return Ok(pos);
                    };
                    let size = parse_chunk_size(&rest[..end])?;
                    pos += end + 2;
                    if size == 0 {
                        self.stage = Stage::Trailers;
                    } else {
                        self.remaining_body = size;
                        self.stage = Stage::ChunkData;
                    }
                }

                Stage::ChunkDataEnd => {
                    if rest.len() < 2 {
                        // a lone '\r' must still be followed by '\n'
                        ensure!(rest[0] == b'\r', ParseError::invalid_chunk_size("missing CRLF after chunk data"));
                        return Ok(pos);
                    }
                    ensure!(&rest[..2] == b"\r\n", ParseError::invalid_chunk_size("missing CRLF after chunk data"));
                    pos += 2;
                    self.stage = Stage::ChunkSize;
                }

                Stage::Trailers => {
                    let Some(end) = find_line_end(rest)? else {
                        return Ok(pos);
                    };
                    pos += end + 2;
                    if end == 0 {
                        self.finalize(handler);
                    }
                }
            }
        }

        Ok(pos)
    }

    fn handle_header(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let Some(colon) = line.iter().position(|b| *b == b':') else {
            return Err(ParseError::invalid_header("missing ':' separator"));
        };
        let name = line[..colon].trim_ascii();
        let value = line[colon + 1..].trim_ascii();

        if name.eq_ignore_ascii_case(b"content-length") {
            let text = std::str::from_utf8(value).map_err(ParseError::invalid_content_length)?;
            self.remaining_body = text.parse::<u64>().map_err(|e| ParseError::invalid_content_length(format!("'{text}': {e}")))?;
        } else if name.eq_ignore_ascii_case(b"connection") {
            if contains_ignore_case(value, b"close") {
                self.require_close = true;
            }
        } else if name.eq_ignore_ascii_case(b"transfer-encoding") && contains_ignore_case(value, b"chunked") {
            self.chunked = true;
        }
        Ok(())
    }

    fn end_of_headers<H: MessageEvents>(&mut self, handler: &mut H) {
        if !self.expect_body {
            self.finalize(handler);
        } else if self.chunked {
            self.remaining_body = 0;
            self.stage = Stage::ChunkSize;
        } else if self.remaining_body > 0 {
            self.stage = Stage::FixedBody;
        } else {
            self.finalize(handler);
        }
    }

    fn finalize<H: MessageEvents>(&mut self, handler: &mut H) {
        let require_close = self.require_close;
        self.stage = Stage::StartLine;
        self.reset_message();
        handler.on_done(require_close);
    }
}

/// Position of the CR of the first CRLF in `data`, `None` when the line is incomplete.
fn find_line_end(data: &[u8]) -> Result<Option<usize>, ParseError> {
    let Some(cr) = data.iter().position(|b| *b == b'\r') else {
        return Ok(None);
    };
    match data.get(cr + 1) {
        None => Ok(None),
        Some(b'\n') => Ok(Some(cr)),
        Some(_) => Err(ParseError::ExpectedLineFeed),
    }
}

#[inline]
fn is_folding_whitespace(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

/// Scans one header line, joining folded continuation lines.
///
/// A header is complete only once the first byte of the following line is known, since that
/// byte decides whether the header continues. Returns the bytes consumed and the header line.
fn scan_header(data: &[u8]) -> Result<Option<(usize, Cow<'_, [u8]>)>, ParseError> {
    let Some(end) = find_line_end(data)? else {
        return Ok(None);
    };
    let line = &data[..end];
    ensure!(!line.contains(&b'\n'), ParseError::invalid_header("unexpected end of line"));
    ensure!(line.contains(&b':'), ParseError::invalid_header("missing ':' separator"));

    let mut next = end + 2;
    match data.get(next) {
        None => return Ok(None),
        Some(byte) if !is_folding_whitespace(*byte) => return Ok(Some((next, Cow::Borrowed(line)))),
        Some(_) => {}
    }

    let mut folded = line.to_vec();
    loop {
        let continuation = &data[next..];
        let Some(end) = find_line_end(continuation)? else {
            return Ok(None);
        };
        let piece = continuation[..end].trim_ascii();
        if !piece.is_empty() {
            folded.push(b' ');
            folded.extend_from_slice(piece);
        }
        next += end + 2;

        match data.get(next) {
            None => return Ok(None),
            Some(byte) if is_folding_whitespace(*byte) => {}
            Some(_) => return Ok(Some((next, Cow::Owned(folded)))),
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let size = match line.iter().position(|b| *b == b';') {
        Some(extension) => &line[..extension],
        None => line,
    }
    .trim_ascii();

    let text = std::str::from_utf8(size).map_err(ParseError::invalid_chunk_size)?;
    u64::from_str_radix(text, 16).map_err(|e| ParseError::invalid_chunk_size(format!("'{text}': {e}")))
}

fn contains_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window.eq_ignore_ascii_case(needle))
}
