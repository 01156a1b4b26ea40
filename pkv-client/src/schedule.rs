//! # Command Timers
//!
//! Purpose: Delayed (`after`) and repeating (`repeat`) sends, keyed by
//! command id so a cancel can disarm them.
//!
//! Wraps `tokio_util::time::DelayQueue`. The key map is kept in step with
//! the queue: an entry is removed when its timer expires or is disarmed, so
//! a stale key is never handed back to the queue.

use std::future::poll_fn;
use std::time::Duration;

use ahash::RandomState;
use hashbrown::HashMap;
use tokio_util::time::delay_queue::{DelayQueue, Key};

use crate::command::CommandId;

#[derive(Debug)]
pub(crate) struct Timers {
    queue: DelayQueue<CommandId>,
    keys: HashMap<CommandId, Key, RandomState>,
}

impl Timers {
    pub(crate) fn new() -> Self {
        Timers {
            queue: DelayQueue::new(),
            keys: HashMap::with_hasher(RandomState::new()),
        }
    }

    /// Arms (or re-arms) the timer for `id`.
    pub(crate) fn arm(&mut self, id: CommandId, delay: Duration) {
        let key = self.queue.insert(id, delay);
        if let Some(previous) = self.keys.insert(id, key) {
            self.queue.remove(&previous);
        }
    }

    /// Disarms the timer for `id`. Returns false if none was armed.
    pub(crate) fn disarm(&mut self, id: CommandId) -> bool {
        match self.keys.remove(&id) {
            Some(key) => {
                self.queue.remove(&key);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self, id: CommandId) -> bool {
        self.keys.contains_key(&id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    /// Waits for the next timer to fire. Returns `None` when nothing is
    /// armed.
    pub(crate) async fn next_expired(&mut self) -> Option<CommandId> {
        let expired = poll_fn(|cx| self.queue.poll_expired(cx)).await?;
        let id = expired.into_inner();
        self.keys.remove(&id);
        Some(id)
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.keys.clear();
    }
}
