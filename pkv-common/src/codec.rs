//! # RESP2 Encoding and Parsing
//!
//! Purpose: Frame client requests as RESP2 arrays and turn the server's byte
//! stream back into discrete [`Reply`] nodes, incrementally, as bytes arrive.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: `decode` returns `Ok(None)` on a partial frame
//!    and consumes nothing, so the caller simply reads more and retries. The
//!    codec remembers how far the pending frame was checked, so each byte is
//!    scanned once and the `Reply` is only built when the frame is complete.
//! 2. **Buffer Reuse**: Encoding appends into the caller's `BytesMut`.
//! 3. **Binary-Safe**: Bulk strings are raw bytes with explicit lengths.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.
//!
//! ## Binary Payload Convention
//!
//! Requests are usually plain text split on whitespace (`SET key value`). A
//! request whose text ends with the configured delimiter carries one binary
//! argument: everything between the first and the last delimiter is sent
//! verbatim, with no splitting or escaping.
//!
//! ```text
//! SET blob "a b\r\nc"   ->  ["SET", "blob", "a b\r\nc"]
//! SET blob"xyz"         ->  ["SET", "blobxyz"]
//! ECHO "                ->  ["ECHO", "\""]        (single delimiter: no payload)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtocolError, ProtocolResult};
use crate::reply::Reply;

/// Largest bulk string accepted from the server (matches Redis' limit).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Largest array element count accepted from the server.
pub const MAX_ARRAY_LEN: i64 = i32::MAX as i64;

/// Deepest array nesting accepted from the server.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Default delimiter for the trailing binary payload convention.
pub const DEFAULT_PAYLOAD_DELIMITER: u8 = b'"';

/// One request ready to be framed: a list of binary-safe arguments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    args: Vec<Bytes>,
}

impl Request {
    /// Builds a request from command text.
    ///
    /// When `delimiter` is set and the text ends with it, the span between
    /// the first and last delimiter becomes a verbatim binary argument.
    pub fn from_text(text: &str, delimiter: Option<u8>) -> Self {
        if let Some((prefix, payload)) = delimiter.and_then(|delim| split_payload(text, delim)) {
            return Self::glued(prefix, Bytes::copy_from_slice(payload));
        }
        Request {
            args: split_words(text),
        }
    }

    /// Builds a request from command text plus an explicit trailing payload.
    ///
    /// The payload is always its own argument; the text is split on
    /// whitespace and never scanned for delimiters.
    pub fn with_payload(text: &str, payload: Bytes) -> Self {
        let mut args = split_words(text);
        args.push(payload);
        Request { args }
    }

    /// Builds a request from pre-split arguments.
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        Request {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    // The delimiter convention glues the payload onto the last prefix word
    // when no whitespace separates them.
    fn glued(prefix: &str, payload: Bytes) -> Self {
        let mut args = split_words(prefix);
        let separated = prefix
            .as_bytes()
            .last()
            .map_or(true, |byte| byte.is_ascii_whitespace());

        match args.pop() {
            Some(last) if !separated => {
                let mut joined = BytesMut::with_capacity(last.len() + payload.len());
                joined.put_slice(&last);
                joined.put_slice(&payload);
                args.push(joined.freeze());
            }
            Some(last) => {
                args.push(last);
                args.push(payload);
            }
            None => args.push(payload),
        }
        Request { args }
    }
}

/// Splits `text` into `(prefix, payload)` per the trailing delimiter rule.
///
/// Returns `None` when the text does not end with `delimiter`, when the
/// delimiter occurs only once, or when the delimiter is not ASCII.
pub fn split_payload(text: &str, delimiter: u8) -> Option<(&str, &[u8])> {
    if !delimiter.is_ascii() {
        return None;
    }
    let bytes = text.as_bytes();
    let last = bytes.len().checked_sub(1)?;
    if bytes[last] != delimiter {
        return None;
    }
    let first = bytes.iter().position(|&b| b == delimiter)?;
    if first == last {
        return None;
    }
    let prefix = text.get(..first)?;
    Some((prefix, &bytes[first + 1..last]))
}

fn split_words(text: &str) -> Vec<Bytes> {
    text.split_ascii_whitespace()
        .map(|word| Bytes::copy_from_slice(word.as_bytes()))
        .collect()
}

/// RESP2 codec: encodes [`Request`]s and decodes [`Reply`] frames.
///
/// The decoder keeps scan progress for the frame at the front of the buffer,
/// so it must always be fed the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RespCodec {
    scan: FrameScan,
}

impl RespCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Progress through a frame that has not fully arrived yet.
#[derive(Debug, Clone, Default)]
struct FrameScan {
    /// First byte not yet checked.
    pos: usize,
    /// Elements still expected by each open array, outermost first.
    open: Vec<i64>,
}

impl FrameScan {
    /// Checks frame completeness from where the last call stopped, without
    /// building anything. Returns the frame length once it is complete.
    fn advance(&mut self, buf: &[u8]) -> ProtocolResult<Option<usize>> {
        loop {
            if self.pos >= buf.len() {
                return Ok(None);
            }
            let line_end = match find_crlf(buf, self.pos) {
                Some(end) => end,
                None => return Ok(None),
            };
            let marker = buf[self.pos];
            if line_end == self.pos {
                return Err(ProtocolError::UnknownMarker(marker));
            }
            let line = &buf[self.pos + 1..line_end];
            let next = line_end + 2;

            let after = match marker {
                b'+' | b'-' => next,
                b':' => {
                    parse_i64(line)?;
                    next
                }
                b'$' => match bulk_len(line)? {
                    None => next,
                    Some(len) => {
                        let end = next + len;
                        if buf.len() < end + 2 {
                            return Ok(None);
                        }
                        if &buf[end..end + 2] != b"\r\n" {
                            return Err(ProtocolError::MissingCrlf);
                        }
                        end + 2
                    }
                },
                b'*' => match array_len(line)? {
                    Some(len) if len > 0 => {
                        if self.open.len() >= MAX_NESTING_DEPTH {
                            return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
                        }
                        self.open.push(len);
                        self.pos = next;
                        continue;
                    }
                    _ => next,
                },
                other => return Err(ProtocolError::UnknownMarker(other)),
            };
            self.pos = after;

            // One element finished; close every array it completed.
            loop {
                match self.open.last_mut() {
                    None => return Ok(Some(self.pos)),
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.open.pop();
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.open.clear();
    }
}

impl Decoder for RespCodec {
    type Item = Reply;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<Reply>> {
        let scanned = self.scan.advance(&src[..]);
        let frame_len = match scanned {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.scan.reset();
                return Err(err);
            }
        };
        self.scan.reset();

        let (reply, consumed) = build_frame(&src[..frame_len], 0)?;
        src.advance(consumed);
        Ok(Some(reply))
    }
}

impl<'a> Encoder<&'a Request> for RespCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &'a Request, dst: &mut BytesMut) -> ProtocolResult<()> {
        if item.is_empty() {
            return Err(ProtocolError::EmptyRequest);
        }

        let payload: usize = item.args.iter().map(|arg| arg.len() + 16).sum();
        dst.reserve(payload + 16);

        dst.put_u8(b'*');
        push_usize(dst, item.args.len());
        dst.put_slice(b"\r\n");
        for arg in &item.args {
            dst.put_u8(b'$');
            push_usize(dst, arg.len());
            dst.put_slice(b"\r\n");
            dst.put_slice(arg);
            dst.put_slice(b"\r\n");
        }
        Ok(())
    }
}

/// Builds the frame starting at `pos` from a buffer already known to hold
/// it completely. Returns the reply and the offset just past it.
fn build_frame(buf: &[u8], pos: usize) -> ProtocolResult<(Reply, usize)> {
    let line_end = find_crlf(buf, pos).ok_or(ProtocolError::Truncated)?;
    let line = &buf[pos + 1..line_end];
    let next = line_end + 2;

    match buf[pos] {
        b'+' => Ok((Reply::Status(Bytes::copy_from_slice(line)), next)),
        b'-' => Ok((Reply::Error(String::from_utf8_lossy(line).into_owned()), next)),
        b':' => Ok((Reply::Integer(parse_i64(line)?), next)),
        b'$' => match bulk_len(line)? {
            None => Ok((Reply::Nil, next)),
            Some(len) => {
                let end = next + len;
                let data = buf.get(next..end).ok_or(ProtocolError::Truncated)?;
                Ok((Reply::String(Bytes::copy_from_slice(data)), end + 2))
            }
        },
        b'*' => match array_len(line)? {
            None => Ok((Reply::Nil, next)),
            Some(len) => {
                // Cap the pre-allocation; the length comes from the peer.
                let mut items = Vec::with_capacity((len as usize).min(1024));
                let mut cursor = next;
                for _ in 0..len {
                    let (item, after) = build_frame(buf, cursor)?;
                    items.push(item);
                    cursor = after;
                }
                Ok((Reply::Array(items), cursor))
            }
        },
        other => Err(ProtocolError::UnknownMarker(other)),
    }
}

/// Bulk string length; `None` is the nil bulk.
fn bulk_len(line: &[u8]) -> ProtocolResult<Option<usize>> {
    match parse_i64(line)? {
        -1 => Ok(None),
        len if (0..=MAX_BULK_LEN).contains(&len) => Ok(Some(len as usize)),
        len => Err(ProtocolError::InvalidLength(len)),
    }
}

/// Array element count; `None` is the nil array.
fn array_len(line: &[u8]) -> ProtocolResult<Option<i64>> {
    match parse_i64(line)? {
        -1 => Ok(None),
        len if (0..=MAX_ARRAY_LEN).contains(&len) => Ok(Some(len)),
        len => Err(ProtocolError::InvalidLength(len)),
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..]
        .windows(2)
        .position(|window| window == b"\r\n")
        .map(|offset| from + offset)
}

fn parse_i64(data: &[u8]) -> ProtocolResult<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return Err(ProtocolError::InvalidInteger),
    };
    if digits.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }

    // Accumulate toward the sign so i64::MIN does not overflow.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidInteger);
        }
        let digit = i64::from(b - b'0');
        value = value
            .checked_mul(10)
            .and_then(|v| {
                if negative {
                    v.checked_sub(digit)
                } else {
                    v.checked_add(digit)
                }
            })
            .ok_or(ProtocolError::InvalidInteger)?;
    }
    Ok(value)
}

fn push_usize(out: &mut impl BufMut, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.put_u8(buf[idx]);
    }
}
