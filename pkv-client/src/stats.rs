//! # Engine Statistics
//!
//! Lock-free counters for command lifecycle accounting. `snapshot()` copies
//! them into a plain struct so callers never see the atomics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub commands_created: u64,
    pub commands_released: u64,
    /// Replies routed to a registered command. Replies for commands already
    /// released are not counted.
    pub replies_processed: u64,
}

impl EngineStats {
    /// Commands created but not yet released.
    pub fn outstanding(&self) -> u64 {
        self.commands_created.saturating_sub(self.commands_released)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Stats {
    created: AtomicU64,
    released: AtomicU64,
    replies: AtomicU64,
}

impl Stats {
    pub(crate) fn command_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn command_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reply_processed(&self) {
        self.replies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EngineStats {
        EngineStats {
            commands_created: self.created.load(Ordering::Relaxed),
            commands_released: self.released.load(Ordering::Relaxed),
            replies_processed: self.replies.load(Ordering::Relaxed),
        }
    }
}
