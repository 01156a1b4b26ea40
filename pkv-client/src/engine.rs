//! # Connection Engine
//!
//! Purpose: The single background thread that owns the connection. It drains
//! the dispatch queue, writes requests, reads replies, routes each reply to
//! its command and drives the command timers.
//!
//! ## Design Principles
//! 1. **One Owner**: The engine thread owns the stream, the timers and every
//!    command after hand-off. Callers only touch the queue.
//! 2. **FIFO Correlation**: RESP replies arrive in request order, so the
//!    in-flight id queue is the correlation table.
//! 3. **Lock, Take, Unlock**: Commands are taken out of the registry before
//!    decoding or running continuations and put back afterwards.
//! 4. **Bounded Shutdown**: On stop, replies for commands already sent are
//!    serviced for at most `shutdown_grace`, then the write half is closed.
//!
//! ## Loop
//!
//! ```text
//! connect -> Connected ---------------------------------------------+
//!   select! {                                                       |
//!     queue woken   => register + submit / arm timer / cancel       |
//!     bytes read    => decode replies, pop in-flight id, deliver    |
//!     write ready   => flush encoded requests                       |
//!     timer expired => resubmit (re-arm if repeating)               |
//!   } until stop                                                    |
//! grace drain -> shutdown write half -> Disconnected | DisconnectError
//! close queue, fail leftovers with Disconnected, mark exited <------+
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use pkv_common::{Reply, RespCodec};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, trace, warn};

use crate::command::{Command, CommandId};
use crate::config::ClientConfig;
use crate::error::{CommandError, ConnectionError, EngineError};
use crate::queue::{Dispatch, DispatchQueue};
use crate::registry::Registry;
use crate::schedule::Timers;
use crate::state::{ConnectionState, StateCell};
use crate::stats::Stats;
use crate::transport::{self, BoxStream};

/// Callback invoked on every connection state transition.
pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// State shared between caller threads and the engine thread.
pub(crate) struct Shared {
    pub(crate) queue: DispatchQueue,
    pub(crate) registry: Registry,
    pub(crate) state: StateCell,
    pub(crate) stats: Stats,
    stop: AtomicBool,
    engine_thread: Mutex<Option<ThreadId>>,
    on_state_change: Mutex<Option<StateCallback>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Shared {
            queue: DispatchQueue::new(),
            registry: Registry::new(),
            state: StateCell::new(),
            stats: Stats::default(),
            stop: AtomicBool::new(false),
            engine_thread: Mutex::new(None),
            on_state_change: Mutex::new(None),
        }
    }

    /// Signals the engine to stop. Does not wait.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.queue.wake();
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn set_state_callback(&self, callback: StateCallback) {
        *self.on_state_change.lock() = Some(callback);
    }

    /// Applies a state transition and notifies the callback.
    pub(crate) fn set_state(&self, next: ConnectionState) {
        if !self.state.transition(next) {
            debug!(state = %next, "ignored state transition");
            return;
        }
        debug!(state = %next, "connection state changed");
        let callback = self.on_state_change.lock().clone();
        if let Some(callback) = callback {
            callback(next);
        }
    }

    pub(crate) fn is_engine_thread(&self) -> bool {
        *self.engine_thread.lock() == Some(thread::current().id())
    }

    /// Fails a command that will never be sent or answered and counts it as
    /// released.
    pub(crate) fn abandon(&self, mut command: Command) {
        if !command.is_retired() {
            command.fail(CommandError::Disconnected);
        }
        self.stats.command_released();
    }

    /// Last step of the engine thread: nothing is accepted or kept after this.
    fn finish(&self) {
        for item in self.queue.close() {
            if let Dispatch::Submit(command) = item {
                self.abandon(command);
            }
        }
        for command in self.registry.drain() {
            self.abandon(command);
        }

        let stats = self.stats.snapshot();
        if stats.commands_created != stats.commands_released {
            error!(
                created = stats.commands_created,
                released = stats.commands_released,
                "command accounting mismatch at engine exit"
            );
        } else {
            debug!(
                created = stats.commands_created,
                replies = stats.replies_processed,
                "all commands released"
            );
        }
        self.state.mark_exited();
        info!("engine exited");
    }
}

/// Runs teardown even if the engine thread unwinds.
struct ExitGuard(Arc<Shared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Starts the engine thread.
pub(crate) fn spawn(shared: Arc<Shared>, config: ClientConfig) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("pkv-engine".to_string())
        .spawn(move || run_thread(shared, config))
}

fn run_thread(shared: Arc<Shared>, config: ClientConfig) {
    *shared.engine_thread.lock() = Some(thread::current().id());
    let _exit = ExitGuard(Arc::clone(&shared));

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "could not build engine runtime");
            shared.set_state(ConnectionState::ConnectError);
            return;
        }
    };
    runtime.block_on(Engine::run(shared, config));
}

struct Engine {
    shared: Arc<Shared>,
    reader: ReadHalf<BoxStream>,
    writer: WriteHalf<BoxStream>,
    codec: RespCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
    /// Ids of sent requests, oldest first.
    in_flight: VecDeque<CommandId>,
    timers: Timers,
    delimiter: Option<u8>,
    shutdown_grace: Duration,
}

impl Engine {
    async fn run(shared: Arc<Shared>, config: ClientConfig) {
        let stream = match transport::connect(&config.endpoint, config.connect_timeout).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "connect failed");
                shared.set_state(ConnectionState::ConnectError);
                return;
            }
        };
        info!(endpoint = %config.endpoint, "connected");
        shared.set_state(ConnectionState::Connected);

        let (reader, writer) = tokio::io::split(stream);
        let mut engine = Engine {
            shared,
            reader,
            writer,
            codec: RespCodec::new(),
            read_buf: BytesMut::with_capacity(config.read_buffer_capacity),
            write_buf: BytesMut::new(),
            in_flight: VecDeque::new(),
            timers: Timers::new(),
            delimiter: config.payload_delimiter,
            shutdown_grace: config.shutdown_grace,
        };
        engine.shared.state.mark_started();

        let outcome = engine.run_loop().await;
        engine.close(outcome).await;
    }

    async fn run_loop(&mut self) -> Result<(), EngineError> {
        self.dispatch_queued()?;
        while !self.shared.stop_requested() {
            tokio::select! {
                biased;
                _ = self.shared.queue.notified() => self.dispatch_queued()?,
                read = self.reader.read_buf(&mut self.read_buf) => {
                    if read? == 0 {
                        return Err(EngineError::Eof);
                    }
                    self.process_replies()?;
                }
                written = self.writer.write_buf(&mut self.write_buf), if !self.write_buf.is_empty() => {
                    written?;
                }
                Some(id) = self.timers.next_expired(), if !self.timers.is_empty() => self.on_timer(id),
            }
        }
        Ok(())
    }

    fn dispatch_queued(&mut self) -> Result<(), EngineError> {
        for item in self.shared.queue.drain() {
            match item {
                Dispatch::Submit(command) => self.dispatch(command)?,
                Dispatch::Cancel(id) => self.cancel(id),
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, command: Command) -> Result<(), EngineError> {
        let id = command.id();
        let schedule = command.schedule();
        if schedule.is_immediate() {
            if self.shared.registry.lookup(id) {
                return Err(EngineError::InternalConsistency(id));
            }
            self.submit(command);
        } else {
            debug!(%id, after = ?schedule.after, repeat = ?schedule.repeat, "timer armed");
            self.shared.registry.register(command)?;
            self.timers.arm(id, schedule.after);
        }
        Ok(())
    }

    /// Encodes one request into the write buffer.
    fn submit(&mut self, mut command: Command) {
        let id = command.id();
        let request = command.request(self.delimiter);
        match self.codec.encode(&request, &mut self.write_buf) {
            Ok(()) => {
                command.mark_sent();
                self.in_flight.push_back(id);
                debug!(%id, command = command.text(), kind = %command.kind(), "command sent");
            }
            Err(err) => {
                error!(%id, command = command.text(), error = %err, "could not send command");
                self.timers.disarm(id);
                command.fail(CommandError::Send(err.to_string()));
            }
        }
        self.settle(command);
    }

    fn cancel(&mut self, id: CommandId) {
        let Some(mut command) = self.shared.registry.take(id) else {
            debug!(%id, "cancel for unknown command");
            return;
        };
        self.timers.disarm(id);
        command.cancel();
        debug!(%id, pending = command.pending(), "command canceled");
        self.settle(command);
    }

    fn on_timer(&mut self, id: CommandId) {
        let Some(command) = self.shared.registry.take(id) else {
            debug!(%id, "timer fired for released command");
            return;
        };
        if command.is_retired() {
            self.settle(command);
            return;
        }
        let schedule = command.schedule();
        if schedule.is_repeating() {
            self.timers.arm(id, schedule.repeat);
        }
        self.submit(command);
    }

    fn process_replies(&mut self) -> Result<(), EngineError> {
        while let Some(reply) = self.codec.decode(&mut self.read_buf)? {
            let id = self.in_flight.pop_front().ok_or(EngineError::UnexpectedReply)?;
            self.on_reply(id, reply);
        }
        Ok(())
    }

    fn on_reply(&mut self, id: CommandId, reply: Reply) {
        let Some(mut command) = self.shared.registry.take(id) else {
            trace!(%id, "reply for released command discarded");
            return;
        };
        self.shared.stats.reply_processed();
        command.reply_received();
        if command.is_retired() {
            trace!(%id, "reply for canceled command discarded");
        } else {
            command.deliver(reply);
        }
        self.settle(command);
    }

    /// Releases a finished command or puts it back in the registry.
    fn settle(&mut self, command: Command) {
        if command.is_done() {
            self.release(command);
        } else {
            self.shared.registry.restore(command);
        }
    }

    fn release(&mut self, command: Command) {
        self.timers.disarm(command.id());
        self.shared.stats.command_released();
        trace!(id = %command.id(), status = ?command.status(), "command released");
    }

    async fn close(mut self, outcome: Result<(), EngineError>) {
        match outcome {
            Ok(()) => {
                debug!(in_flight = self.in_flight.len(), "stop requested");
                self.drain_in_flight().await;
                match self.writer.shutdown().await {
                    Ok(()) => {
                        info!("disconnected");
                        self.shared.set_state(ConnectionState::Disconnected);
                    }
                    Err(err) => {
                        let err = ConnectionError::Disconnect(err.to_string());
                        error!(error = %err, "disconnect failed");
                        self.shared.set_state(ConnectionState::DisconnectError);
                    }
                }
            }
            Err(err @ EngineError::InternalConsistency(_)) => {
                error!(error = %err, "engine terminated");
                self.shared.set_state(ConnectionState::DisconnectError);
            }
            Err(err) => {
                error!(error = %err, "connection lost");
                self.shared.set_state(ConnectionState::DisconnectError);
            }
        }
        self.timers.clear();
    }

    /// Services replies for already-sent commands, bounded by the grace
    /// period.
    async fn drain_in_flight(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        let deadline = tokio::time::sleep(self.shutdown_grace);
        tokio::pin!(deadline);

        while !self.in_flight.is_empty() {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(outstanding = self.in_flight.len(), "shutdown grace elapsed");
                    return;
                }
                written = self.writer.write_buf(&mut self.write_buf), if !self.write_buf.is_empty() => {
                    if let Err(err) = written {
                        debug!(error = %err, "write failed during shutdown");
                        return;
                    }
                }
                read = self.reader.read_buf(&mut self.read_buf) => {
                    match read {
                        Ok(0) => return,
                        Ok(_) => {
                            if let Err(err) = self.process_replies() {
                                debug!(error = %err, "read failed during shutdown");
                                return;
                            }
                        }
                        Err(err) => {
                            debug!(error = %err, "read failed during shutdown");
                            return;
                        }
                    }
                }
            }
        }
    }
}
