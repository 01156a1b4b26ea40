//! # Typed Reply Decoding
//!
//! Purpose: Turn an untyped [`Reply`] into the exact Rust type a command
//! asked for, or into a [`CommandError`] explaining why that is impossible.
//!
//! ## Design Principles
//! 1. **Closed Set**: Only the types implementing the sealed [`FromReply`]
//!    trait can be requested; each maps to one [`ResultKind`].
//! 2. **Validate First**: Error and nil tags are handled once, for every
//!    type, before any type-specific work.
//! 3. **All or Nothing**: Container decodes either yield every element or
//!    fail as a whole; partial results never reach a continuation.
//! 4. **Binary-Safe**: `Bytes` results keep the exact payload length.
//!
//! ## Rule Order
//!
//! ```text
//! error tag               -> CommandError::Server(message)      (every type)
//! nil tag, T != Nil       -> CommandError::NilReply
//! tag not accepted by T   -> CommandError::TypeMismatch
//! otherwise               -> T::from_reply(reply)
//! ```

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use bytes::Bytes;
use pkv_common::{Reply, ReplyKind};
use serde::{Deserialize, Serialize};

use crate::error::CommandError;

/// The closed set of result shapes a command can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultKind {
    /// The reply node itself.
    Raw,
    /// UTF-8 text from a string or status reply.
    String,
    /// Binary-safe bytes from a string or status reply.
    Bytes,
    /// Integer reply narrowed to `i32`.
    Int,
    /// Integer reply as `i64`.
    Int64,
    /// Expects a nil reply.
    Nil,
    /// Array of strings in reply order.
    StringList,
    /// Array of strings as a sorted, de-duplicated set.
    OrderedStringSet,
    /// Array of strings as a hashed, de-duplicated set.
    StringSet,
}

impl ResultKind {
    /// Returns true when a reply with tag `tag` can be decoded as `self`.
    ///
    /// Error and nil tags are handled before this check.
    pub fn accepts(self, tag: ReplyKind) -> bool {
        match self {
            ResultKind::Raw => true,
            ResultKind::String | ResultKind::Bytes => {
                matches!(tag, ReplyKind::String | ReplyKind::Status)
            }
            ResultKind::Int | ResultKind::Int64 => tag == ReplyKind::Integer,
            ResultKind::Nil => tag == ReplyKind::Nil,
            ResultKind::StringList | ResultKind::OrderedStringSet | ResultKind::StringSet => {
                tag == ReplyKind::Array
            }
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultKind::Raw => "raw",
            ResultKind::String => "string",
            ResultKind::Bytes => "bytes",
            ResultKind::Int => "int",
            ResultKind::Int64 => "int64",
            ResultKind::Nil => "nil",
            ResultKind::StringList => "string list",
            ResultKind::OrderedStringSet => "ordered string set",
            ResultKind::StringSet => "string set",
        };
        f.write_str(name)
    }
}

/// Result value for commands that expect a nil reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Nil;

mod sealed {
    pub trait Sealed {}
}

/// Types a reply can be decoded into.
///
/// Sealed: the set of result types is fixed by this crate.
pub trait FromReply: sealed::Sealed + Sized + Send + 'static {
    /// Result kind this type corresponds to.
    const KIND: ResultKind;

    /// Type-specific conversion, called after the shared validation in
    /// [`decode`]. Use [`decode`] instead of calling this directly.
    #[doc(hidden)]
    fn from_reply(reply: Reply) -> Result<Self, CommandError>;
}

/// Validates `reply` against `T` and decodes it.
pub fn decode<T: FromReply>(reply: Reply) -> Result<T, CommandError> {
    match reply {
        Reply::Error(message) => Err(CommandError::Server(message)),
        Reply::Nil if T::KIND != ResultKind::Nil => Err(CommandError::NilReply),
        reply if !T::KIND.accepts(reply.kind()) => Err(mismatch(T::KIND, reply.kind())),
        reply => T::from_reply(reply),
    }
}

fn mismatch(expected: ResultKind, found: ReplyKind) -> CommandError {
    CommandError::TypeMismatch { expected, found }
}

fn utf8(expected: ResultKind, data: Bytes) -> Result<String, CommandError> {
    String::from_utf8(data.to_vec()).map_err(|_| mismatch(expected, ReplyKind::String))
}

fn collect_strings<C>(expected: ResultKind, reply: Reply) -> Result<C, CommandError>
where
    C: FromIterator<String>,
{
    let items = match reply {
        Reply::Array(items) => items,
        other => return Err(mismatch(expected, other.kind())),
    };
    items
        .into_iter()
        .map(|item| match item {
            Reply::String(data) => utf8(expected, data),
            other => Err(mismatch(expected, other.kind())),
        })
        .collect()
}

impl sealed::Sealed for Reply {}
impl FromReply for Reply {
    const KIND: ResultKind = ResultKind::Raw;

    fn from_reply(reply: Reply) -> Result<Self, CommandError> {
        Ok(reply)
    }
}

impl sealed::Sealed for String {}
impl FromReply for String {
    const KIND: ResultKind = ResultKind::String;

    fn from_reply(reply: Reply) -> Result<Self, CommandError> {
        match reply {
            Reply::String(data) | Reply::Status(data) => utf8(Self::KIND, data),
            other => Err(mismatch(Self::KIND, other.kind())),
        }
    }
}

impl sealed::Sealed for Bytes {}
impl FromReply for Bytes {
    const KIND: ResultKind = ResultKind::Bytes;

    fn from_reply(reply: Reply) -> Result<Self, CommandError> {
        match reply {
            Reply::String(data) | Reply::Status(data) => Ok(data),
            other => Err(mismatch(Self::KIND, other.kind())),
        }
    }
}

impl sealed::Sealed for i32 {}
impl FromReply for i32 {
    const KIND: ResultKind = ResultKind::Int;

    fn from_reply(reply: Reply) -> Result<Self, CommandError> {
        match reply {
            Reply::Integer(value) => {
                i32::try_from(value).map_err(|_| mismatch(Self::KIND, ReplyKind::Integer))
            }
            other => Err(mismatch(Self::KIND, other.kind())),
        }
    }
}

impl sealed::Sealed for i64 {}
impl FromReply for i64 {
    const KIND: ResultKind = ResultKind::Int64;

    fn from_reply(reply: Reply) -> Result<Self, CommandError> {
        match reply {
            Reply::Integer(value) => Ok(value),
            other => Err(mismatch(Self::KIND, other.kind())),
        }
    }
}

impl sealed::Sealed for Nil {}
impl FromReply for Nil {
    const KIND: ResultKind = ResultKind::Nil;

    fn from_reply(reply: Reply) -> Result<Self, CommandError> {
        match reply {
            Reply::Nil => Ok(Nil),
            other => Err(mismatch(Self::KIND, other.kind())),
        }
    }
}

impl sealed::Sealed for Vec<String> {}
impl FromReply for Vec<String> {
    const KIND: ResultKind = ResultKind::StringList;

    fn from_reply(reply: Reply) -> Result<Self, CommandError> {
        collect_strings(Self::KIND, reply)
    }
}

impl sealed::Sealed for BTreeSet<String> {}
impl FromReply for BTreeSet<String> {
    const KIND: ResultKind = ResultKind::OrderedStringSet;

    fn from_reply(reply: Reply) -> Result<Self, CommandError> {
        collect_strings(Self::KIND, reply)
    }
}

impl sealed::Sealed for HashSet<String> {}
impl FromReply for HashSet<String> {
    const KIND: ResultKind = ResultKind::StringSet;

    fn from_reply(reply: Reply) -> Result<Self, CommandError> {
        collect_strings(Self::KIND, reply)
    }
}
