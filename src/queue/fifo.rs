//! Blocking double-ended FIFO shared between pipeline stages.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Thread-safe queue with blocking pulls from either end.
///
/// Every mutation happens under one internal lock; blocked consumers wait
/// on a condition variable and are woken one per push. `len` and
/// `with_front` are snapshots and may be stale as soon as they return.
#[derive(Debug)]
pub struct TsQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> TsQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Appends to the back and wakes one waiting consumer.
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.available.notify_one();
    }

    /// Inserts at the front and wakes one waiting consumer.
    pub fn push_front(&self, item: T) {
        self.items.lock().push_front(item);
        self.available.notify_one();
    }

    /// Blocks until an item is available, then pops the front.
    pub fn pull(&self) -> T {
        self.pull_front()
    }

    /// Blocks until an item is available, then pops the front.
    pub fn pull_front(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            self.available.wait(&mut items);
        }
    }

    /// Blocks until an item is available, then pops the back.
    pub fn pull_back(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_back() {
                return item;
            }
            self.available.wait(&mut items);
        }
    }

    /// Pops the front, waiting at most `timeout`.
    pub fn pull_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if self.available.wait_until(&mut items, deadline).timed_out() {
                return items.pop_front();
            }
        }
    }

    /// Pops the front without blocking.
    pub fn try_pull(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Pops the back without blocking.
    pub fn try_pull_back(&self) -> Option<T> {
        self.items.lock().pop_back()
    }

    /// Runs `f` on the front item without removing it.
    pub fn with_front<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.items.lock().front().map(f)
    }

    /// Items queued right now.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether nothing is queued right now.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Removes and returns everything currently queued, front first.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }
}

impl<T> Default for TsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order_and_both_ends() {
        let q = TsQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        q.push_front(0);

        assert_eq!(q.len(), 4);
        assert_eq!(q.with_front(|v| *v), Some(0));
        assert_eq!(q.pull_back(), 3);
        assert_eq!(q.pull(), 0);
        assert_eq!(q.try_pull_back(), Some(2));
        assert_eq!(q.try_pull(), Some(1));
        assert!(q.try_pull().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn test_pull_timeout_expires() {
        let q: TsQueue<u8> = TsQueue::new();
        let start = Instant::now();
        assert!(q.pull_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_blocking_pull_wakes_on_push() {
        let q = Arc::new(TsQueue::new());
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pull())
        };
        thread::sleep(Duration::from_millis(10));
        q.push(42);
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let q = Arc::new(TsQueue::new());
        let producers: Vec<_> = (0..2)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..500 {
                        q.push(p * 1_000_000 + i);
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        for _ in 0..1000 {
            seen.push(q.pull());
        }
        for p in producers {
            p.join().unwrap();
        }

        // Each producer's items arrive in its own push order.
        let a: Vec<_> = seen.iter().filter(|v| **v < 1_000_000).copied().collect();
        let b: Vec<_> = seen.iter().filter(|v| **v >= 1_000_000).copied().collect();
        assert_eq!(a, (0..500).collect::<Vec<_>>());
        assert_eq!(b, (1_000_000..1_000_500).collect::<Vec<_>>());
        assert!(q.is_empty());
    }

    proptest! {
        #[test]
        fn prop_push_then_drain_preserves_order(items in proptest::collection::vec(any::<u32>(), 0..64)) {
            let q = TsQueue::new();
            for item in &items {
                q.push(*item);
            }
            prop_assert_eq!(q.drain(), items);
        }
    }
}
