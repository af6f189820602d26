//! Info subprotocol codec.
//!
//! Info is the text-framed request/response protocol used for all control
//! traffic: node identity, generations, peers listings, and partition
//! bitmaps. Requests and responses share one frame: a 2-byte version/type
//! prelude, a 6-byte big-endian body length, then newline-separated ASCII.
//!
//! This module is pure codec; the async round-trip over a connection lives
//! in the client crate.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ParseError;

/// Info protocol version.
pub const INFO_PROTOCOL_VERSION: u8 = 2;
/// Message type for info traffic.
pub const INFO_MSG_TYPE: u8 = 1;
/// Frame header size: version (1) + type (1) + length (6).
pub const INFO_HEADER_SIZE: usize = 8;

// ---------------------------------------------------------------------------
// Frame codec
// ---------------------------------------------------------------------------

/// Encodes an info request frame for the given commands.
///
/// Commands are joined with `\n` and the body is newline-terminated.
#[must_use]
pub fn encode_request(commands: &[&str]) -> Bytes {
    let body_len: usize = commands.iter().map(|c| c.len() + 1).sum();
    let mut buf = BytesMut::with_capacity(INFO_HEADER_SIZE + body_len);
    buf.put_u8(INFO_PROTOCOL_VERSION);
    buf.put_u8(INFO_MSG_TYPE);
    // 6-byte big-endian length: low 48 bits of a u64 write.
    buf.put_slice(&(body_len as u64).to_be_bytes()[2..8]);
    for command in commands {
        buf.put_slice(command.as_bytes());
        buf.put_u8(b'\n');
    }
    buf.freeze()
}

/// Decodes an info frame header, returning the body length.
///
/// # Errors
///
/// Fails if the version or message type is not the info protocol.
pub fn decode_header(header: [u8; INFO_HEADER_SIZE]) -> Result<usize, ParseError> {
    if header[0] != INFO_PROTOCOL_VERSION || header[1] != INFO_MSG_TYPE {
        return Err(ParseError::new(
            format!(
                "unexpected info header: version={} type={}",
                header[0], header[1]
            ),
            &header,
        ));
    }
    let mut size = 0usize;
    for b in &header[2..8] {
        size = (size << 8) | usize::from(*b);
    }
    Ok(size)
}

/// Splits a response body into a command → value map.
///
/// Each non-empty line has the shape `<command>\t<value>`; a line without a
/// tab maps the whole line to an empty value. Commands the server considers
/// invalid come back with `ERROR` in the value, which is preserved verbatim
/// for the caller to inspect.
#[must_use]
pub fn parse_response(body: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(body);
    let mut map = HashMap::new();
    for line in text.split('\n') {
        if line.is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((command, value)) => {
                map.insert(command.to_string(), value.to_string());
            }
            None => {
                map.insert(line.to_string(), String::new());
            }
        }
    }
    map
}

// ---------------------------------------------------------------------------
// InfoParser
// ---------------------------------------------------------------------------

/// Cursor-based scanner over an info response body.
///
/// Used by the peers and replicas decoders, whose values embed their own
/// `:`/`,`/`;`/`[`/`]` structure inside a single response line.
#[derive(Debug)]
pub struct InfoParser {
    buf: Vec<u8>,
    pub offset: usize,
}

impl InfoParser {
    #[must_use]
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            buf: body,
            offset: 0,
        }
    }

    /// Total body length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Byte at the cursor, if any.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.offset).copied()
    }

    /// Raw view of the body; used by decoders that slice across the cursor.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Builds a [`ParseError`] that echoes the response being parsed.
    #[must_use]
    pub fn error(&self, reason: impl Into<String>) -> ParseError {
        ParseError::new(reason, &self.buf)
    }

    /// Consumes `expected` at the cursor.
    ///
    /// # Errors
    ///
    /// Fails if the cursor is at the end or holds a different byte.
    pub fn expect(&mut self, expected: u8) -> Result<(), ParseError> {
        match self.peek() {
            Some(b) if b == expected => {
                self.offset += 1;
                Ok(())
            }
            Some(b) => Err(self.error(format!(
                "expected {:?}, found {:?} at offset {}",
                char::from(expected),
                char::from(b),
                self.offset
            ))),
            None => Err(self.error(format!(
                "expected {:?}, found end of response",
                char::from(expected)
            ))),
        }
    }

    /// Consumes `<expected>\t`, the echoed command name of a response line.
    ///
    /// # Errors
    ///
    /// Fails if the response does not start with the expected command.
    pub fn parse_name(&mut self, expected: &str) -> Result<(), ParseError> {
        let end = self.offset + expected.len();
        if self.buf.len() < end || &self.buf[self.offset..end] != expected.as_bytes() {
            return Err(self.error(format!("expected command name {expected:?}")));
        }
        self.offset = end;
        self.expect(b'\t')
    }

    /// Parses a decimal integer (optionally negative), stopping at the first
    /// non-digit.
    ///
    /// # Errors
    ///
    /// Fails if no digits are present at the cursor.
    pub fn parse_int(&mut self) -> Result<i64, ParseError> {
        let start = self.offset;
        if self.peek() == Some(b'-') {
            self.offset += 1;
        }
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.offset += 1;
        }
        let raw = &self.buf[start..self.offset];
        let text = std::str::from_utf8(raw).unwrap_or_default();
        text.parse().map_err(|_| {
            self.offset = start;
            self.error(format!("expected integer at offset {start}"))
        })
    }

    /// Parses a string up to (not consuming) the first terminator byte.
    ///
    /// Reaching the end of the body is also accepted as a terminator.
    ///
    /// # Errors
    ///
    /// Fails if the collected bytes are not UTF-8.
    pub fn parse_string(&mut self, terminators: &[u8]) -> Result<String, ParseError> {
        let start = self.offset;
        while let Some(b) = self.peek() {
            if terminators.contains(&b) {
                break;
            }
            self.offset += 1;
        }
        std::str::from_utf8(&self.buf[start..self.offset])
            .map(ToString::to_string)
            .map_err(|_| self.error(format!("non-UTF-8 string at offset {start}")))
    }

    /// Skips past the next `\t`, positioning the cursor on the value part of
    /// a response line.
    ///
    /// # Errors
    ///
    /// Fails if no tab is found before the end of the body.
    pub fn skip_to_value(&mut self) -> Result<(), ParseError> {
        while let Some(b) = self.peek() {
            self.offset += 1;
            if b == b'\t' {
                return Ok(());
            }
        }
        Err(self.error("expected tab-separated value"))
    }
}
