//! # Command Registry
//!
//! Purpose: Map command ids to the commands the engine currently owns, so a
//! reply (or a timer, or a cancel request) can find its command again.
//!
//! ## Design Principles
//! 1. **One Map**: A single `hashbrown` table keyed by id; the result kind
//!    lives inside the command, not in a per-type map.
//! 2. **Short Critical Sections**: The lock covers one map operation only.
//!    Decoding and continuations run on a command that was `take`n out.
//! 3. **Loud Duplicates**: Registering an id twice is an engine bug and is
//!    reported as `EngineError::InternalConsistency`.

use ahash::RandomState;
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::command::{Command, CommandId};
use crate::error::EngineError;

#[derive(Debug)]
pub(crate) struct Registry {
    commands: Mutex<HashMap<CommandId, Command, RandomState>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Registry {
            commands: Mutex::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    /// Adds a newly dispatched command.
    pub(crate) fn register(&self, command: Command) -> Result<CommandId, EngineError> {
        let id = command.id();
        match self.commands.lock().entry(id) {
            Entry::Occupied(_) => Err(EngineError::InternalConsistency(id)),
            Entry::Vacant(slot) => {
                slot.insert(command);
                Ok(id)
            }
        }
    }

    /// Moves a command out so it can be used without holding the lock.
    pub(crate) fn take(&self, id: CommandId) -> Option<Command> {
        self.commands.lock().remove(&id)
    }

    /// Puts back a command obtained from [`Registry::take`].
    pub(crate) fn restore(&self, command: Command) {
        self.commands.lock().insert(command.id(), command);
    }

    pub(crate) fn lookup(&self, id: CommandId) -> bool {
        self.commands.lock().contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.lock().len()
    }

    /// Empties the registry, for teardown.
    pub(crate) fn drain(&self) -> Vec<Command> {
        self.commands.lock().drain().map(|(_, command)| command).collect()
    }
}
