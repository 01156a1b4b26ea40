//! # Command Objects
//!
//! Purpose: The unit of work that travels from a caller thread, through the
//! dispatch queue, into the engine's registry and back out as a continuation
//! call.
//!
//! ## Design Principles
//! 1. **Ownership Moves**: A command is built on the caller thread and then
//!    moved, never shared. After hand-off only the engine thread touches it.
//! 2. **Type Erasure at the Edge**: The typed continuation is boxed behind
//!    [`ReplySink`], so the registry stores one concrete `Command` type for
//!    every result kind.
//! 3. **Explicit Lifecycle**: `status`, `pending` and `retired` decide when a
//!    command is finished; release is a registry removal plus a drop.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pkv_common::{Reply, Request};
use tracing::{error, warn};

use crate::decode::{decode, FromReply, ResultKind};
use crate::engine::Shared;
use crate::error::{CommandError, ErrorKind};
use crate::queue::Dispatch;

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique command identifier, also the reply correlation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u64);

impl CommandId {
    pub(crate) fn next() -> Self {
        CommandId(NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// When a command is sent: once after `after`, then every `repeat` if
/// nonzero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Schedule {
    pub after: Duration,
    pub repeat: Duration,
}

impl Schedule {
    /// Send once, immediately.
    pub const ONCE: Schedule = Schedule {
        after: Duration::ZERO,
        repeat: Duration::ZERO,
    };

    /// Send once after `delay`.
    pub fn after(delay: Duration) -> Self {
        Schedule {
            after: delay,
            repeat: Duration::ZERO,
        }
    }

    /// Send now and then every `period` until canceled.
    pub fn every(period: Duration) -> Self {
        Schedule {
            after: Duration::ZERO,
            repeat: period,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.after = delay;
        self
    }

    pub fn is_immediate(&self) -> bool {
        self.after.is_zero() && self.repeat.is_zero()
    }

    pub fn is_repeating(&self) -> bool {
        !self.repeat.is_zero()
    }
}

/// Lifecycle status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Created,
    /// Sent with no continuation waiting on the reply.
    Sent,
    AwaitingReply,
    Ok,
    Error(ErrorKind),
    Canceled,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Ok | Status::Error(_) | Status::Canceled)
    }
}

/// Type-erased continuation.
pub(crate) trait ReplySink: Send {
    /// Decodes `reply`, invokes the continuation and reports the outcome.
    fn on_reply(&mut self, text: &str, reply: Reply) -> Status;

    /// Invokes the continuation with a failure that did not come from a
    /// reply.
    fn on_error(&mut self, text: &str, err: CommandError);
}

struct TypedSink<T, F> {
    callback: F,
    _result: PhantomData<fn() -> T>,
}

impl<T, F> ReplySink for TypedSink<T, F>
where
    T: FromReply,
    F: FnMut(&str, Result<T, CommandError>) + Send,
{
    fn on_reply(&mut self, text: &str, reply: Reply) -> Status {
        let decoded = decode::<T>(reply);
        let status = match &decoded {
            Ok(_) => Status::Ok,
            Err(err) => {
                log_failure(text, err);
                Status::Error(err.kind())
            }
        };
        (self.callback)(text, decoded);
        status
    }

    fn on_error(&mut self, text: &str, err: CommandError) {
        (self.callback)(text, Err(err));
    }
}

fn log_failure(text: &str, err: &CommandError) {
    match err {
        CommandError::NilReply => warn!(command = text, "nil reply"),
        other => error!(command = text, error = %other, "command failed"),
    }
}

/// One outstanding request.
pub(crate) struct Command {
    id: CommandId,
    text: String,
    payload: Option<Bytes>,
    kind: ResultKind,
    schedule: Schedule,
    sink: Option<Box<dyn ReplySink>>,
    status: Status,
    pending: usize,
    /// No further sends; release once `pending` drops to zero.
    retired: bool,
}

impl Command {
    pub(crate) fn typed<T, F>(
        text: String,
        payload: Option<Bytes>,
        schedule: Schedule,
        callback: F,
    ) -> Self
    where
        T: FromReply,
        F: FnMut(&str, Result<T, CommandError>) + Send + 'static,
    {
        let sink = TypedSink {
            callback,
            _result: PhantomData,
        };
        Self::build(text, payload, T::KIND, schedule, Some(Box::new(sink)))
    }

    /// Fire-and-forget command with no continuation.
    pub(crate) fn detached(text: String, payload: Option<Bytes>, schedule: Schedule) -> Self {
        Self::build(text, payload, ResultKind::Raw, schedule, None)
    }

    fn build(
        text: String,
        payload: Option<Bytes>,
        kind: ResultKind,
        schedule: Schedule,
        sink: Option<Box<dyn ReplySink>>,
    ) -> Self {
        Command {
            id: CommandId::next(),
            text,
            payload,
            kind,
            schedule,
            sink,
            status: Status::Created,
            pending: 0,
            retired: false,
        }
    }

    pub(crate) fn id(&self) -> CommandId {
        self.id
    }

    #[cfg(test)]
    pub(crate) fn with_id(mut self, id: CommandId) -> Self {
        self.id = id;
        self
    }

    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn kind(&self) -> ResultKind {
        self.kind
    }

    pub(crate) fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub(crate) fn status(&self) -> Status {
        self.status
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired
    }

    /// Builds the wire request. An explicit payload wins over the delimiter
    /// convention.
    pub(crate) fn request(&self, delimiter: Option<u8>) -> Request {
        match &self.payload {
            Some(payload) => Request::with_payload(&self.text, payload.clone()),
            None => Request::from_text(&self.text, delimiter),
        }
    }

    pub(crate) fn mark_sent(&mut self) {
        self.pending += 1;
        self.status = if self.sink.is_some() {
            Status::AwaitingReply
        } else {
            Status::Sent
        };
    }

    pub(crate) fn reply_received(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    /// Hands `reply` to the continuation.
    pub(crate) fn deliver(&mut self, reply: Reply) {
        self.status = match self.sink.as_mut() {
            Some(sink) => sink.on_reply(&self.text, reply),
            None => match reply {
                Reply::Error(message) => {
                    error!(command = %self.text, error = %message, "command failed");
                    Status::Error(ErrorKind::Server)
                }
                _ => Status::Ok,
            },
        };
    }

    /// Terminal failure outside the reply path. The continuation sees it once.
    pub(crate) fn fail(&mut self, err: CommandError) {
        self.status = Status::Error(err.kind());
        self.retired = true;
        if let Some(sink) = self.sink.as_mut() {
            sink.on_error(&self.text, err);
        }
    }

    pub(crate) fn cancel(&mut self) {
        if !self.retired {
            self.retired = true;
            self.status = Status::Canceled;
        }
    }

    /// True once nothing more can happen to this command.
    pub(crate) fn is_done(&self) -> bool {
        self.pending == 0
            && (self.retired || (!self.schedule.is_repeating() && self.status.is_terminal()))
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("kind", &self.kind)
            .field("schedule", &self.schedule)
            .field("status", &self.status)
            .field("pending", &self.pending)
            .field("retired", &self.retired)
            .finish()
    }
}

/// Caller-side handle to a submitted command.
#[derive(Clone)]
pub struct CommandHandle {
    id: CommandId,
    shared: Arc<Shared>,
}

impl CommandHandle {
    pub(crate) fn new(id: CommandId, shared: Arc<Shared>) -> Self {
        CommandHandle { id, shared }
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Asks the engine to cancel the command. Its continuation is not called
    /// again, and a repeating command stops resubmitting.
    ///
    /// Returns false if the engine has already shut down.
    pub fn cancel(&self) -> bool {
        self.shared.queue.enqueue(Dispatch::Cancel(self.id)).is_ok()
    }
}

impl fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording<T: FromReply>(
        text: &str,
        schedule: Schedule,
    ) -> (Command, Arc<Mutex<Vec<Result<T, CommandError>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let command = Command::typed::<T, _>(text.to_string(), None, schedule, move |_, result| {
            sink.lock().push(result)
        });
        (command, seen)
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = CommandId::next();
        let b = CommandId::next();
        assert!(b > a);
        assert_ne!(a, b);
    }

    #[test]
    fn schedule_classification() {
        assert!(Schedule::ONCE.is_immediate());
        assert!(!Schedule::ONCE.is_repeating());
        assert!(!Schedule::after(Duration::from_millis(5)).is_immediate());
        assert!(!Schedule::after(Duration::from_millis(5)).is_repeating());
        let every = Schedule::every(Duration::from_millis(5));
        assert!(every.is_repeating());
        assert!(every.after.is_zero());
        assert_eq!(every.with_delay(Duration::from_secs(1)).after, Duration::from_secs(1));
    }

    #[test]
    fn one_shot_is_done_after_its_reply() {
        let (mut command, seen) = recording::<String>("GET k", Schedule::ONCE);
        assert_eq!(command.kind(), ResultKind::String);
        assert_eq!(command.status(), Status::Created);
        assert!(!command.is_done());

        command.mark_sent();
        assert_eq!(command.status(), Status::AwaitingReply);
        assert_eq!(command.pending(), 1);
        assert!(!command.is_done());

        command.reply_received();
        command.deliver(Reply::string("v"));
        assert_eq!(command.status(), Status::Ok);
        assert!(command.is_done());
        assert_eq!(*seen.lock(), vec![Ok("v".to_string())]);
    }

    #[test]
    fn decode_failure_sets_error_status() {
        let (mut command, seen) = recording::<i64>("GET k", Schedule::ONCE);
        command.mark_sent();
        command.reply_received();
        command.deliver(Reply::Nil);
        assert_eq!(command.status(), Status::Error(ErrorKind::NilReply));
        assert_eq!(*seen.lock(), vec![Err(CommandError::NilReply)]);
    }

    #[test]
    fn repeating_command_is_never_done_until_retired() {
        let (mut command, seen) = recording::<i64>("INCR n", Schedule::every(Duration::from_millis(1)));
        for n in 1..=3 {
            command.mark_sent();
            command.reply_received();
            command.deliver(Reply::Integer(n));
            assert!(!command.is_done());
        }
        command.mark_sent();
        command.cancel();
        assert_eq!(command.status(), Status::Canceled);
        assert!(!command.is_done(), "one send still outstanding");
        command.reply_received();
        assert!(command.is_done());
        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn fail_reaches_continuation_once() {
        let (mut command, seen) = recording::<String>("", Schedule::ONCE);
        command.fail(CommandError::Send("empty request".into()));
        assert!(command.is_retired());
        assert!(command.is_done());
        assert_eq!(command.status(), Status::Error(ErrorKind::Send));
        assert_eq!(*seen.lock(), vec![Err(CommandError::Send("empty request".into()))]);

        command.cancel();
        assert_eq!(command.status(), Status::Error(ErrorKind::Send));
    }

    #[test]
    fn detached_command_tracks_status_without_continuation() {
        let mut command = Command::detached("SET k v".to_string(), None, Schedule::ONCE);
        command.mark_sent();
        assert_eq!(command.status(), Status::Sent);
        command.reply_received();
        command.deliver(Reply::Error("ERR nope".into()));
        assert_eq!(command.status(), Status::Error(ErrorKind::Server));
        assert!(command.is_done());
    }

    #[test]
    fn explicit_payload_overrides_convention() {
        let command = Command::detached(
            "SET k".to_string(),
            Some(Bytes::from_static(b"a \"b\"")),
            Schedule::ONCE,
        );
        let request = command.request(Some(b'"'));
        assert_eq!(request.args().len(), 3);
        assert_eq!(&request.args()[2][..], b"a \"b\"");
    }
}
