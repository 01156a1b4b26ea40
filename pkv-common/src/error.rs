//! # Protocol Errors
//!
//! Errors raised while framing or parsing RESP2 traffic. Anything in here is
//! fatal for the connection it happened on: the byte stream can no longer be
//! trusted to line up with the in-flight request queue.

use thiserror::Error;

/// Result alias for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Framing or parse failure on the RESP2 stream.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// First byte of a frame is not a known RESP2 type marker.
    #[error("unknown reply type marker 0x{0:02x}")]
    UnknownMarker(u8),
    /// A length or integer field could not be parsed.
    #[error("invalid integer in reply header")]
    InvalidInteger,
    /// Bulk string or array length outside the accepted range.
    #[error("invalid length {0}")]
    InvalidLength(i64),
    /// Bulk payload was not terminated by CRLF.
    #[error("bulk string missing CRLF terminator")]
    MissingCrlf,
    /// Arrays nested deeper than the accepted limit.
    #[error("reply nested deeper than {0} levels")]
    NestingTooDeep(usize),
    /// A frame ended before the length its headers announced.
    #[error("truncated frame")]
    Truncated,
    /// A request with zero arguments cannot be framed.
    #[error("empty request")]
    EmptyRequest,
    /// Underlying stream failure (required by the tokio-util codec traits).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
