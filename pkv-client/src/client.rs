//! # Client Facade
//!
//! Purpose: The public entry point. Builds command objects on the calling
//! thread, hands them to the engine and exposes the connection lifecycle.
//!
//! ## Design Principles
//! 1. **Callers Never Block the Engine**: Every submission is a queue push
//!    plus a wake. Only the `*_blocking` helpers wait, and they wait on
//!    their own slot.
//! 2. **Fail Fast After Stop**: Once the engine has exited, submissions are
//!    failed with `Disconnected` on the caller thread instead of queued.
//! 3. **Drop Stops**: Dropping the client stops the engine and joins its
//!    thread.
//!
//! ## Example
//!
//! ```no_run
//! use pkv_client::{Client, ClientConfig};
//!
//! let client = Client::new(ClientConfig::tcp("127.0.0.1:6379"));
//! if client.start() {
//!     client.command::<String, _>("GET greeting", |command, result| {
//!         println!("{command}: {result:?}");
//!     });
//!     client.set("greeting", "hello").ok();
//!     client.disconnect();
//! }
//! ```

use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::blocking::{BlockingReply, Slot};
use crate::command::{Command, CommandHandle, Schedule};
use crate::config::ClientConfig;
use crate::decode::FromReply;
use crate::engine::{self, Shared, StateCallback};
use crate::error::CommandError;
use crate::queue::Dispatch;
use crate::state::ConnectionState;
use crate::stats::EngineStats;

/// Asynchronous client for one connection.
///
/// Commands are pipelined on a background engine thread; results come back
/// through continuations, which run on that thread.
pub struct Client {
    config: ClientConfig,
    shared: Arc<Shared>,
    engine: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client {
            config,
            shared: Arc::new(Shared::new()),
            engine: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Registers a callback for connection state transitions. It runs on the
    /// engine thread; set it before `start`.
    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let callback: StateCallback = Arc::new(callback);
        self.shared.set_state_callback(callback);
    }

    /// Spawns the engine thread and blocks until it is connected and running
    /// (true) or the connection failed (false).
    /// A client connects once: after the engine has exited, this returns
    /// false without spawning.
    pub fn start(&self) -> bool {
        if self.shared.state.has_exited() || self.state().is_terminal() {
            warn!(state = %self.state(), "start after the engine has stopped");
            return false;
        }
        {
            let mut engine = self.engine.lock();
            if engine.is_some() {
                warn!("start called twice");
            } else {
                match engine::spawn(Arc::clone(&self.shared), self.config.clone()) {
                    Ok(handle) => *engine = Some(handle),
                    Err(err) => {
                        error!(error = %err, "could not spawn engine thread");
                        self.shared.set_state(ConnectionState::ConnectError);
                        return false;
                    }
                }
            }
        }
        self.shared.state.wait_started()
    }

    /// Signals the engine to stop. Does not wait.
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Blocks until the engine thread has finished teardown. Returns at once
    /// if the engine was never started.
    pub fn block_until_stopped(&self) {
        if self.engine.lock().is_some() {
            self.shared.state.wait_exited();
        }
    }

    /// Stops the engine, waits for teardown and joins the thread. From a
    /// continuation this only signals the stop.
    pub fn disconnect(&self) {
        self.stop();
        if self.shared.is_engine_thread() {
            return;
        }
        self.block_until_stopped();
        if let Some(handle) = self.engine.lock().take() {
            if handle.join().is_err() {
                error!("engine thread panicked");
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && !self.shared.state.has_exited()
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.stats.snapshot()
    }

    /// Commands submitted but not yet picked up by the engine.
    pub fn queued_commands(&self) -> usize {
        self.shared.queue.len()
    }

    /// Commands currently held by the engine (in flight or scheduled).
    pub fn pending_commands(&self) -> usize {
        self.shared.registry.len()
    }

    /// Sends `text` once and passes the decoded reply to `callback`.
    pub fn command<T, F>(&self, text: impl Into<String>, callback: F) -> CommandHandle
    where
        T: FromReply,
        F: FnMut(&str, Result<T, CommandError>) + Send + 'static,
    {
        self.command_scheduled(text, callback, Schedule::ONCE)
    }

    /// Sends `text` according to `schedule`. A repeating command calls
    /// `callback` once per reply until canceled through its handle.
    pub fn command_scheduled<T, F>(
        &self,
        text: impl Into<String>,
        callback: F,
        schedule: Schedule,
    ) -> CommandHandle
    where
        T: FromReply,
        F: FnMut(&str, Result<T, CommandError>) + Send + 'static,
    {
        self.submit(Command::typed::<T, F>(text.into(), None, schedule, callback))
    }

    /// Sends `text` with `payload` appended as one binary-safe argument.
    pub fn command_with_payload<T, F>(
        &self,
        text: impl Into<String>,
        payload: impl Into<Bytes>,
        callback: F,
    ) -> CommandHandle
    where
        T: FromReply,
        F: FnMut(&str, Result<T, CommandError>) + Send + 'static,
    {
        self.submit(Command::typed::<T, F>(
            text.into(),
            Some(payload.into()),
            Schedule::ONCE,
            callback,
        ))
    }

    /// Sends `text` once without a continuation.
    pub fn fire(&self, text: impl Into<String>) -> CommandHandle {
        self.submit(Command::detached(text.into(), None, Schedule::ONCE))
    }

    fn submit(&self, command: Command) -> CommandHandle {
        self.shared.stats.command_created();
        let handle = CommandHandle::new(command.id(), Arc::clone(&self.shared));
        if let Err(Dispatch::Submit(command)) = self.shared.queue.enqueue(Dispatch::Submit(command)) {
            debug!(command = command.text(), "engine stopped, command not sent");
            self.shared.abandon(command);
        }
        handle
    }

    /// Sends `text` and blocks until its reply arrives.
    ///
    /// Must not be called from a continuation: that would block the engine
    /// thread on itself, so it is refused with `CommandError::Send`.
    pub fn command_blocking<T: FromReply>(&self, text: impl Into<String>) -> BlockingReply<T> {
        self.blocking(text.into(), None)
    }

    /// Blocking variant of [`Client::command_with_payload`].
    pub fn command_blocking_with_payload<T: FromReply>(
        &self,
        text: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> BlockingReply<T> {
        self.blocking(text.into(), Some(payload.into()))
    }

    fn blocking<T: FromReply>(&self, text: String, payload: Option<Bytes>) -> BlockingReply<T> {
        if self.shared.is_engine_thread() {
            error!(command = %text, "blocking command issued from the engine thread");
            return BlockingReply::new(
                text,
                Err(CommandError::Send(
                    "blocking command issued from the engine thread".to_string(),
                )),
            );
        }

        let slot = Arc::new(Slot::new());
        let filler = Arc::clone(&slot);
        let command = Command::typed::<T, _>(text.clone(), payload, Schedule::ONCE, move |_, outcome| {
            filler.fill(outcome)
        });
        let handle = self.submit(command);

        let outcome = slot.wait(self.config.blocking_timeout);
        if matches!(outcome, Err(CommandError::Timeout)) {
            warn!(command = %text, "blocking command timed out");
            handle.cancel();
        }
        BlockingReply::new(text, outcome)
    }

    /// `GET key` as UTF-8 text. A missing key is `CommandError::NilReply`.
    pub fn get(&self, key: &str) -> Result<String, CommandError> {
        self.command_blocking::<String>(format!("GET {key}")).into_result()
    }

    /// `SET key value`; the value is sent as a binary-safe argument.
    pub fn set(&self, key: &str, value: impl Into<Bytes>) -> Result<(), CommandError> {
        self.command_blocking_with_payload::<String>(format!("SET {key}"), value)
            .into_result()
            .map(|_| ())
    }

    /// `DEL key`; returns the number of keys removed.
    pub fn del(&self, key: &str) -> Result<i64, CommandError> {
        self.command_blocking::<i64>(format!("DEL {key}")).into_result()
    }

    /// Sends `text` and reports whether the server answered with a non-error,
    /// non-nil reply.
    pub fn command_ok(&self, text: impl Into<String>) -> bool {
        self.command_blocking::<pkv_common::Reply>(text).ok()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}
