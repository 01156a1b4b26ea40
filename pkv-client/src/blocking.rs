//! # Blocking Command Bridge
//!
//! Purpose: Let synchronous callers issue a command and wait for its typed
//! result without writing a continuation.
//!
//! The continuation fills a [`Slot`] guarded by its own mutex and condition
//! variable. Those are separate from every engine lock, so the waiting
//! caller never holds anything the engine needs.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::command::Status;
use crate::error::CommandError;

/// One-shot rendezvous between a continuation and a waiting caller.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    value: Mutex<Option<Result<T, CommandError>>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Self {
        Slot {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn fill(&self, outcome: Result<T, CommandError>) {
        *self.value.lock() = Some(outcome);
        self.ready.notify_one();
    }

    /// Waits for the outcome, up to `timeout` if one is given.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Result<T, CommandError> {
        let mut value = self.value.lock();
        match timeout {
            None => {
                while value.is_none() {
                    self.ready.wait(&mut value);
                }
            }
            Some(limit) => {
                let deadline = Instant::now() + limit;
                while value.is_none() {
                    if self.ready.wait_until(&mut value, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        value.take().unwrap_or(Err(CommandError::Timeout))
    }
}

/// Outcome of a blocking command.
pub struct BlockingReply<T> {
    command: String,
    outcome: Result<T, CommandError>,
}

impl<T> BlockingReply<T> {
    pub(crate) fn new(command: String, outcome: Result<T, CommandError>) -> Self {
        BlockingReply { command, outcome }
    }

    /// The command text as issued.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// `Status::Ok` or `Status::Error(kind)`.
    pub fn status(&self) -> Status {
        match &self.outcome {
            Ok(_) => Status::Ok,
            Err(err) => Status::Error(err.kind()),
        }
    }

    pub fn reply(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&CommandError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, CommandError> {
        self.outcome
    }

    /// Releases the reply. Dropping it has the same effect.
    pub fn free(self) {}
}

impl<T: fmt::Debug> fmt::Debug for BlockingReply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingReply")
            .field("command", &self.command)
            .field("outcome", &self.outcome)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_filled_value() {
        let slot = Arc::new(Slot::new());
        let filler = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            filler.fill(Ok(7i64));
        });
        assert_eq!(slot.wait(None), Ok(7));
        handle.join().unwrap();
    }

    #[test]
    fn wait_times_out() {
        let slot: Slot<String> = Slot::new();
        let started = Instant::now();
        assert_eq!(slot.wait(Some(Duration::from_millis(30))), Err(CommandError::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn value_filled_before_wait_is_not_lost() {
        let slot = Slot::new();
        slot.fill(Err::<String, _>(CommandError::NilReply));
        assert_eq!(slot.wait(Some(Duration::from_millis(10))), Err(CommandError::NilReply));
    }

    #[test]
    fn reply_accessors() {
        let ok = BlockingReply::new("GET k".into(), Ok("v".to_string()));
        assert!(ok.ok());
        assert_eq!(ok.status(), Status::Ok);
        assert_eq!(ok.reply().map(String::as_str), Some("v"));
        assert!(ok.error().is_none());
        assert_eq!(ok.command(), "GET k");

        let failed = BlockingReply::<String>::new("GET k".into(), Err(CommandError::NilReply));
        assert!(!failed.ok());
        assert_eq!(failed.status(), Status::Error(ErrorKind::NilReply));
        assert_eq!(failed.error(), Some(&CommandError::NilReply));
        assert_eq!(failed.into_result(), Err(CommandError::NilReply));
    }
}
