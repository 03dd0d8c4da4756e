use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

use crate::core::MAX_BLOCK;

/// Spaces calls out to a fixed number of actions per second.
///
/// Callers are served first come, first served: each call reserves the next
/// free slot under a fair lock and then sleeps until that slot. Nothing is
/// dropped; a burst simply queues up.
#[derive(Debug)]
pub struct RateLimitingQueue {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
    pending: AtomicUsize,
}

impl RateLimitingQueue {
    /// A non-positive or non-finite rate disables spacing. The interval is
    /// capped at one year.
    pub fn new(actions_per_second: f64) -> Self {
        let interval = if actions_per_second.is_finite() && actions_per_second > 0.0 {
            Duration::try_from_secs_f64(1.0 / actions_per_second)
                .map_or(MAX_BLOCK, |interval| interval.min(MAX_BLOCK))
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            next_slot: Mutex::new(None),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn interval(&self) -> Duration { self.interval }

    /// Calls waiting for their slot.
    pub fn pending(&self) -> usize { self.pending.load(Ordering::Relaxed) }

    /// Waits for the next slot, then runs `action`.
    pub async fn run<F, Fut, T>(&self, action: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await;
        action().await
    }

    pub async fn acquire(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
        let _waiting = Waiting(&self.pending);
        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next_slot.map_or(now, |next| next.max(now));
            *next_slot = Some(slot + self.interval);
            slot
        };
        sleep_until(slot).await;
    }
}

/// Counts a caller out of `pending` when it gets its slot or gives up.
struct Waiting<'a>(&'a AtomicUsize);

impl Drop for Waiting<'_> {
    fn drop(&mut self) { self.0.fetch_sub(1, Ordering::Relaxed); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_spaced() {
        let queue = Arc::new(RateLimitingQueue::new(2.0));
        let start = Instant::now();

        let mut handles = Vec::new();
        for i in 0..4u32 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                queue.run(|| async move { (i, Instant::now()) }).await
            }));
        }

        let mut finished = Vec::new();
        for handle in handles {
            finished.push(handle.await.unwrap());
        }
        finished.sort_by_key(|(_, at)| *at);

        let offsets: Vec<u128> = finished
            .iter()
            .map(|(_, at)| at.duration_since(start).as_millis())
            .collect();
        assert_eq!(offsets, vec![0, 500, 1000, 1500]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_queue_runs_immediately() {
        let queue = RateLimitingQueue::new(1.0);
        queue.acquire().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        let before = Instant::now();
        queue.acquire().await;
        assert_eq!(Instant::now(), before);
    }

    #[test]
    fn test_disabled_rate() {
        assert_eq!(RateLimitingQueue::new(0.0).interval(), Duration::ZERO);
        assert_eq!(RateLimitingQueue::new(f64::NAN).interval(), Duration::ZERO);
    }

    #[test]
    fn test_tiny_rate_saturates() {
        assert_eq!(RateLimitingQueue::new(1e-300).interval(), MAX_BLOCK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_caller_leaves_pending() {
        let queue = RateLimitingQueue::new(1.0);
        queue.acquire().await;

        {
            let waiting = queue.acquire();
            tokio::pin!(waiting);
            assert!(futures_util::poll!(waiting.as_mut()).is_pending());
            assert_eq!(queue.pending(), 1);
        }
        assert_eq!(queue.pending(), 0);
    }
}
