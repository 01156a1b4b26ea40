//! # Dispatch Queue
//!
//! Purpose: Hand commands and cancel requests from any caller thread to the
//! engine thread, and wake the engine when there is something to do.
//!
//! ## Design Principles
//! 1. **Ownership Hand-Off**: Items carry the command itself, so nothing can
//!    get lost between enqueue and drain.
//! 2. **Batch Drain**: The engine swaps the whole buffer out under the lock
//!    and works on it unlocked.
//! 3. **Closed Latch**: After teardown the queue refuses new items and hands
//!    them back, so callers can fail them straight away.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::command::{Command, CommandId};

/// One unit of work for the engine.
#[derive(Debug)]
pub(crate) enum Dispatch {
    Submit(Command),
    Cancel(CommandId),
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Dispatch>,
    closed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct DispatchQueue {
    state: Mutex<QueueState>,
    wake: Notify,
}

impl DispatchQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends `item` and wakes the engine. Hands the item back if the queue
    /// has been closed.
    pub(crate) fn enqueue(&self, item: Dispatch) -> Result<(), Dispatch> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(item);
            }
            state.items.push_back(item);
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Takes every queued item in FIFO order.
    pub(crate) fn drain(&self) -> VecDeque<Dispatch> {
        std::mem::take(&mut self.state.lock().items)
    }

    /// Latches the queue shut and returns what was left in it.
    pub(crate) fn close(&self) -> VecDeque<Dispatch> {
        let mut state = self.state.lock();
        state.closed = true;
        std::mem::take(&mut state.items)
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Wakes the engine without queueing anything.
    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    /// Completes once the queue has been woken since the last call.
    pub(crate) async fn notified(&self) {
        self.wake.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Schedule;
    use std::sync::Arc;
    use std::thread;

    fn submit(text: String) -> Dispatch {
        Dispatch::Submit(Command::detached(text, None, Schedule::ONCE))
    }

    fn text(item: &Dispatch) -> String {
        match item {
            Dispatch::Submit(command) => command.text().to_string(),
            Dispatch::Cancel(id) => format!("cancel {id}"),
        }
    }

    #[test]
    fn drain_is_fifo() {
        let queue = DispatchQueue::new();
        queue.enqueue(submit("A".into())).unwrap();
        queue.enqueue(submit("B".into())).unwrap();
        assert_eq!(queue.len(), 2);

        let drained: Vec<_> = queue.drain().iter().map(text).collect();
        assert_eq!(drained, vec!["A", "B"]);
        assert_eq!(queue.len(), 0);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn closed_queue_hands_items_back() {
        let queue = DispatchQueue::new();
        queue.enqueue(submit("A".into())).unwrap();
        let left = queue.close();
        assert_eq!(left.len(), 1);
        assert!(queue.is_closed());

        match queue.enqueue(submit("B".into())) {
            Err(item) => assert_eq!(text(&item), "B"),
            Ok(()) => panic!("closed queue accepted an item"),
        }
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn concurrent_producers_keep_per_thread_order() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 250;

        let queue = Arc::new(DispatchQueue::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for n in 0..PER_THREAD {
                        queue.enqueue(submit(format!("{t}:{n}"))).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let drained: Vec<_> = queue.drain().iter().map(text).collect();
        assert_eq!(drained.len(), THREADS * PER_THREAD);

        let mut next = vec![0usize; THREADS];
        for entry in drained {
            let (t, n) = entry.split_once(':').unwrap();
            let t: usize = t.parse().unwrap();
            let n: usize = n.parse().unwrap();
            assert_eq!(n, next[t], "thread {t} reordered");
            next[t] += 1;
        }
        assert!(next.iter().all(|&count| count == PER_THREAD));
    }

    #[tokio::test]
    async fn enqueue_wakes_waiter() {
        let queue = Arc::new(DispatchQueue::new());
        let producer = Arc::clone(&queue);
        thread::spawn(move || {
            producer.enqueue(submit("PING".into())).unwrap();
        });
        tokio::time::timeout(std::time::Duration::from_secs(5), queue.notified())
            .await
            .unwrap();
        assert_eq!(queue.drain().len(), 1);
    }
}
