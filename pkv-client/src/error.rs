//! # Client Errors
//!
//! Purpose: Separate per-command failures, which only ever reach the
//! command's own continuation, from connection-level failures, which change
//! the connection state and wake threads blocked in `start`/`stop`.

use std::io;

use pkv_common::{ProtocolError, ReplyKind};
use thiserror::Error;

use crate::command::CommandId;
use crate::decode::ResultKind;

/// Failure delivered to a single command's continuation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The request could not be queued on the connection. Not retried.
    #[error("could not send command: {0}")]
    Send(String),
    /// The server answered with an error reply.
    #[error("server error: {0}")]
    Server(String),
    /// The server answered nil (missing key or field).
    #[error("nil reply")]
    NilReply,
    /// The reply did not have the shape the caller asked for.
    #[error("expected {expected} reply, got {found}")]
    TypeMismatch {
        expected: ResultKind,
        found: ReplyKind,
    },
    /// The connection went away before a reply arrived.
    #[error("connection closed before a reply arrived")]
    Disconnected,
    /// A blocking caller gave up waiting.
    #[error("timed out waiting for reply")]
    Timeout,
}

/// Payload-free tag of a [`CommandError`], used as a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Send,
    Server,
    NilReply,
    TypeMismatch,
    Disconnected,
    Timeout,
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::Send(_) => ErrorKind::Send,
            CommandError::Server(_) => ErrorKind::Server,
            CommandError::NilReply => ErrorKind::NilReply,
            CommandError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            CommandError::Disconnected => ErrorKind::Disconnected,
            CommandError::Timeout => ErrorKind::Timeout,
        }
    }
}

/// Connection-level failure. Terminal for the connection instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("could not connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("could not disconnect cleanly: {0}")]
    Disconnect(String),
}

/// Reasons the engine loop stops early. Never crosses the caller boundary;
/// the engine logs it and turns it into a connection state.
#[derive(Debug, Error)]
pub(crate) enum EngineError {
    /// A command id was dispatched twice. This is a bug in the engine, not a
    /// runtime condition.
    #[error("internal consistency violation: command {0} is already registered")]
    InternalConsistency(CommandId),
    #[error("connection closed by server")]
    Eof,
    #[error("reply received with no request in flight")]
    UnexpectedReply,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
