//! # Reply Nodes
//!
//! Purpose: Model one server reply exactly as it came off the wire, before
//! any typed interpretation happens.
//!
//! ## Design Principles
//! 1. **Closed Tag Set**: Every reply is one of six tags; callers match on
//!    `ReplyKind` instead of inspecting payloads.
//! 2. **Binary-Safe**: String payloads are `Bytes` with an exact length, so
//!    embedded NUL or CRLF bytes survive untouched.
//! 3. **Cheap Clones**: `Bytes` is ref-counted; cloning a reply never copies
//!    bulk data.

use std::fmt;

use bytes::Bytes;

/// One decoded RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `:123` integer replies.
    Integer(i64),
    /// `$n` bulk strings (binary-safe).
    String(Bytes),
    /// `+OK` style status replies.
    Status(Bytes),
    /// `*n` arrays of nested replies.
    Array(Vec<Reply>),
    /// `-ERR ...` error replies; the message is kept for the caller.
    Error(String),
    /// `$-1` / `*-1` null replies.
    Nil,
}

/// Tag of a [`Reply`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    Integer,
    String,
    Status,
    Array,
    Error,
    Nil,
}

impl Reply {
    /// Returns the tag of this reply.
    pub fn kind(&self) -> ReplyKind {
        match self {
            Reply::Integer(_) => ReplyKind::Integer,
            Reply::String(_) => ReplyKind::String,
            Reply::Status(_) => ReplyKind::Status,
            Reply::Array(_) => ReplyKind::Array,
            Reply::Error(_) => ReplyKind::Error,
            Reply::Nil => ReplyKind::Nil,
        }
    }

    /// Builds a bulk string reply from anything byte-like.
    pub fn string(data: impl AsRef<[u8]>) -> Self {
        Reply::String(Bytes::copy_from_slice(data.as_ref()))
    }

    /// Builds a status reply from anything byte-like.
    pub fn status(data: impl AsRef<[u8]>) -> Self {
        Reply::Status(Bytes::copy_from_slice(data.as_ref()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// Raw payload of string and status replies.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::String(data) | Reply::Status(data) => Some(data),
            _ => None,
        }
    }
}

impl fmt::Display for ReplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplyKind::Integer => "integer",
            ReplyKind::String => "string",
            ReplyKind::Status => "status",
            ReplyKind::Array => "array",
            ReplyKind::Error => "error",
            ReplyKind::Nil => "nil",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Reply::Integer(1).kind(), ReplyKind::Integer);
        assert_eq!(Reply::string("a").kind(), ReplyKind::String);
        assert_eq!(Reply::status("OK").kind(), ReplyKind::Status);
        assert_eq!(Reply::Array(Vec::new()).kind(), ReplyKind::Array);
        assert_eq!(Reply::Error("ERR".into()).kind(), ReplyKind::Error);
        assert_eq!(Reply::Nil.kind(), ReplyKind::Nil);
    }

    #[test]
    fn as_bytes_only_for_strings() {
        assert_eq!(Reply::string("abc").as_bytes(), Some(&b"abc"[..]));
        assert_eq!(Reply::status("OK").as_bytes(), Some(&b"OK"[..]));
        assert_eq!(Reply::Integer(3).as_bytes(), None);
        assert_eq!(Reply::Nil.as_bytes(), None);
    }
}
