//! # Connection State Machine
//!
//! Purpose: Track the connection lifecycle and let caller threads block
//! until the engine has started or exited.
//!
//! ## Design Principles
//! 1. **Per Instance**: Every client owns its own state cell, mutex and
//!    condition variable. Nothing is global.
//! 2. **Monotonic**: Only the documented transitions are applied; terminal
//!    states never change again.
//! 3. **Own Lock**: The state lock is never taken while the queue or
//!    registry lock is held.
//!
//! ```text
//! NotYetConnected --connect ok-----> Connected
//! NotYetConnected --connect fail---> ConnectError     [terminal]
//! Connected       --close ok-------> Disconnected     [terminal]
//! Connected       --close fail-----> DisconnectError  [terminal]
//! ```

use std::fmt;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    NotYetConnected,
    Connected,
    ConnectError,
    Disconnected,
    DisconnectError,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::ConnectError
                | ConnectionState::Disconnected
                | ConnectionState::DisconnectError
        )
    }

    /// Whether `self -> next` is one of the allowed transitions.
    pub fn can_become(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (NotYetConnected, Connected)
                | (NotYetConnected, ConnectError)
                | (Connected, Disconnected)
                | (Connected, DisconnectError)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::NotYetConnected => "not yet connected",
            ConnectionState::Connected => "connected",
            ConnectionState::ConnectError => "connect error",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::DisconnectError => "disconnect error",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: ConnectionState,
    /// The run phase was entered.
    started: bool,
    /// The engine thread has finished teardown.
    exited: bool,
}

#[derive(Debug)]
pub(crate) struct StateCell {
    lifecycle: Mutex<Lifecycle>,
    changed: Condvar,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell {
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::NotYetConnected,
                started: false,
                exited: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        self.lifecycle.lock().state
    }

    /// Applies `next` if the transition is allowed. Returns whether it was.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.state.can_become(next) {
            return false;
        }
        lifecycle.state = next;
        self.changed.notify_all();
        true
    }

    pub(crate) fn mark_started(&self) {
        self.lifecycle.lock().started = true;
        self.changed.notify_all();
    }

    pub(crate) fn mark_exited(&self) {
        self.lifecycle.lock().exited = true;
        self.changed.notify_all();
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.lifecycle.lock().exited
    }

    /// Blocks until the run phase starts or the engine gives up. Returns
    /// true if the run phase was entered.
    pub(crate) fn wait_started(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        while !lifecycle.started && !lifecycle.exited {
            self.changed.wait(&mut lifecycle);
        }
        lifecycle.started
    }

    /// Blocks until the engine thread has finished teardown.
    pub(crate) fn wait_exited(&self) {
        let mut lifecycle = self.lifecycle.lock();
        while !lifecycle.exited {
            self.changed.wait(&mut lifecycle);
        }
    }
}
