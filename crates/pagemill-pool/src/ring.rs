//! Bounded FIFO ring backing one consumable pool.
//!
//! Consumers pop non-blockingly on the request path; producer workers push
//! batches from the background. Synthesis happens outside the ring lock, so
//! contention is limited to the queue itself.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Threshold ratio stored as bits so readers never take the config lock.
fn ratio_to_bits(ratio: f64) -> u64 {
    ratio.to_bits()
}

fn ratio_from_bits(bits: u64) -> f64 {
    f64::from_bits(bits)
}

/// Bounded FIFO queue with low-water producer wakeup.
pub struct Ring {
    items: Mutex<VecDeque<String>>,
    capacity: AtomicUsize,
    threshold_bits: AtomicU64,
    /// Wakes one producer worker when the fill level crosses the low-water mark.
    low_water: Notify,
    /// Wakes blocked `pop_wait` callers when items arrive.
    available: Notify,
    pops: AtomicU64,
    empty_pops: AtomicU64,
}

impl Ring {
    pub fn new(capacity: usize, threshold_ratio: f64) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(65_536))),
            capacity: AtomicUsize::new(capacity),
            threshold_bits: AtomicU64::new(ratio_to_bits(threshold_ratio)),
            low_water: Notify::new(),
            available: Notify::new(),
            pops: AtomicU64::new(0),
            empty_pops: AtomicU64::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    pub fn threshold_ratio(&self) -> f64 {
        ratio_from_bits(self.threshold_bits.load(Ordering::Acquire))
    }

    /// Fill level below which refill is due.
    pub fn low_water_mark(&self) -> usize {
        (self.capacity() as f64 * self.threshold_ratio()) as usize
    }

    /// Non-blocking pop. Observing a fill level under the low-water mark
    /// wakes one producer worker without blocking the caller.
    pub fn try_pop(&self) -> Option<String> {
        let (item, len) = {
            let mut items = self.items.lock();
            let item = items.pop_front();
            (item, items.len())
        };

        self.pops.fetch_add(1, Ordering::Relaxed);
        if item.is_none() {
            self.empty_pops.fetch_add(1, Ordering::Relaxed);
        }
        if len < self.low_water_mark() {
            self.low_water.notify_one();
        }
        item
    }

    /// Pop, waiting up to `timeout` for an item to arrive.
    pub async fn pop_wait(&self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            let notified = self.available.notified();
            // Re-check after arming the waiter so a concurrent push is not missed.
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Push a batch, dropping whatever does not fit. Returns the number of
    /// items accepted.
    pub fn push_batch(&self, batch: Vec<String>) -> usize {
        let capacity = self.capacity();
        let pushed = {
            let mut items = self.items.lock();
            let mut pushed = 0;
            for item in batch {
                if items.len() >= capacity {
                    break;
                }
                items.push_back(item);
                pushed += 1;
            }
            pushed
        };
        if pushed > 0 {
            self.available.notify_waiters();
        }
        pushed
    }

    /// Free slots at this instant.
    pub fn free(&self) -> usize {
        self.capacity().saturating_sub(self.len())
    }

    /// Swap capacity and threshold; when shrinking, items past the new
    /// capacity are dropped from the tail so FIFO order of the survivors
    /// is preserved.
    pub fn reconfigure(&self, capacity: usize, threshold_ratio: f64) {
        self.capacity.store(capacity, Ordering::Release);
        self.threshold_bits
            .store(ratio_to_bits(threshold_ratio), Ordering::Release);

        let mut items = self.items.lock();
        while items.len() > capacity {
            items.pop_back();
        }
    }

    /// Park a producer worker until the low-water signal fires.
    pub async fn low_water_notified(&self) {
        self.low_water.notified().await;
    }

    /// Wake one worker if the ring is under its low-water mark.
    pub fn kick(&self) {
        if self.len() < self.low_water_mark() {
            self.low_water.notify_one();
        }
    }

    pub fn total_pops(&self) -> u64 {
        self.pops.load(Ordering::Relaxed)
    }

    pub fn empty_pops(&self) -> u64 {
        self.empty_pops.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_fifo_order() {
        let ring = Ring::new(8, 0.3);
        assert_eq!(ring.push_batch(vec!["a".into(), "b".into(), "c".into()]), 3);
        assert_eq!(ring.try_pop().as_deref(), Some("a"));
        assert_eq!(ring.try_pop().as_deref(), Some("b"));
        assert_eq!(ring.try_pop().as_deref(), Some("c"));
        assert_eq!(ring.try_pop(), None);
        assert_eq!(ring.empty_pops(), 1);
    }

    #[test]
    fn push_batch_discards_overflow() {
        let ring = Ring::new(2, 0.5);
        let accepted = ring.push_batch(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(accepted, 2);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn reconfigure_shrinks_and_keeps_oldest_first() {
        let ring = Ring::new(4, 0.5);
        ring.push_batch(vec!["a".into(), "b".into(), "c".into(), "d".into()]);
        ring.reconfigure(2, 0.5);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.capacity(), 2);
        assert_eq!(ring.try_pop().as_deref(), Some("a"));
        assert_eq!(ring.try_pop().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn pop_wait_times_out_on_empty_ring() {
        let ring = Ring::new(4, 0.5);
        let popped = ring.pop_wait(Duration::from_millis(20)).await;
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn pop_wait_wakes_on_push() {
        let ring = Ring::new(4, 0.5);
        let waiter = {
            let ring = ring.clone();
            tokio::spawn(async move { ring.pop_wait(Duration::from_secs(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        ring.push_batch(vec!["x".into()]);
        assert_eq!(waiter.await.unwrap().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn low_water_pop_wakes_worker() {
        let ring = Ring::new(10, 0.5);
        ring.push_batch(vec!["a".into(), "b".into()]);

        let woken = {
            let ring = ring.clone();
            tokio::spawn(async move {
                ring.low_water_notified().await;
                true
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        // len 1 < 10 * 0.5 after this pop
        ring.try_pop();
        assert!(woken.await.unwrap());
    }
}
