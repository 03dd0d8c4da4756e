//! In-order settlement for tasks that are started out of order.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Result, StreamError};

/// Runs task `i` only after task `i - 1` has settled.
///
/// Indices come from [`request`](TaskQueue::request) and may be pushed in any
/// order. The read side uses this to fetch pages concurrently while appending
/// their records strictly in page order.
///
/// A task counts as settled once its future completes, whatever its output.
/// Dropping a pending `push` future gives up the slot without stalling later
/// indices, unless the index is pushed again before its turn.
#[derive(Debug, Default)]
pub struct TaskQueue {
    next: AtomicU64,
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Count of settled tasks, which is also the next index allowed to run.
    settled: u64,
    pushed: HashSet<u64>,
    waiters: HashMap<u64, oneshot::Sender<()>>,
    abandoned: HashSet<u64>,
}

impl TaskQueue {
    pub fn new() -> Self { Self::default() }

    /// Reserves the next index: 0, 1, 2, ...
    pub fn request(&self) -> u64 { self.next.fetch_add(1, Ordering::Relaxed) }

    pub fn settled(&self) -> u64 { self.state.lock().settled }

    /// Waits for every earlier index to settle, then runs `task`.
    ///
    /// # Errors
    ///
    /// [`StreamError::DuplicateTask`] if `index` is already pending or settled.
    pub async fn push<F, Fut, T>(&self, index: u64, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let turn = {
            let mut state = self.state.lock();
            if index < state.settled || !state.pushed.insert(index) {
                return Err(StreamError::DuplicateTask { index });
            }
            // pushing an abandoned index again reclaims its slot
            state.abandoned.remove(&index);
            if index == state.settled {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.insert(index, tx);
                Some(rx)
            }
        };

        let _slot = Slot { queue: self, index };

        if let Some(turn) = turn {
            // the sender lives in `self`, which outlives this borrow
            let _ = turn.await;
        }

        Ok(task().await)
    }

    fn release(&self, index: u64) {
        let mut state = self.state.lock();
        if state.settled == index {
            state.settle(index);
        } else {
            state.waiters.remove(&index);
            state.pushed.remove(&index);
            state.abandoned.insert(index);
        }
    }
}

impl QueueState {
    fn settle(&mut self, mut index: u64) {
        loop {
            self.pushed.remove(&index);
            self.settled = index + 1;
            let next = index + 1;

            if self.abandoned.remove(&next) {
                index = next;
                continue;
            }
            if let Some(waiter) = self.waiters.remove(&next) {
                let _ = waiter.send(());
            }
            return;
        }
    }
}

/// Settles or abandons its index when the `push` future completes or is
/// dropped.
struct Slot<'a> {
    queue: &'a TaskQueue,
    index: u64,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) { self.queue.release(self.index); }
}
