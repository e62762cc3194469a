//! Blocking min-priority queue.
//!
//! Used for the action schedule: the smallest element (earliest fire
//! time) is always the next one out, regardless of push order.

use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug)]
struct State<T> {
    heap: BinaryHeap<Reverse<T>>,
    closed: bool,
}

/// Thread-safe queue popping the smallest element first.
///
/// Once closed, blocked and future pulls return `None` and pushes are
/// discarded; whatever is still queued can be taken with [`drain`].
///
/// [`drain`]: PriorityQueue::drain
#[derive(Debug)]
pub struct PriorityQueue<T: Ord> {
    state: Mutex<State<T>>,
    changed: Condvar,
}

impl<T: Ord> PriorityQueue<T> {
    /// Creates an empty, open queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Inserts an item. Returns `false` (and drops the item) if closed.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.heap.push(Reverse(item));
        drop(state);
        // Every waiter re-evaluates the head: a new earliest item may
        // shorten a deadline wait.
        self.changed.notify_all();
        true
    }

    /// Blocks until an item is available and pops the smallest.
    pub fn pull(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(Reverse(item)) = state.heap.pop() {
                return Some(item);
            }
            self.changed.wait(&mut state);
        }
    }

    /// Pushes `item` and pops the smallest element in one step.
    ///
    /// Returns `item` itself when nothing queued is smaller, so a consumer
    /// holding an item can cheaply check whether an earlier one arrived.
    pub fn exchange(&self, item: T) -> T {
        let mut state = self.state.lock();
        if state.closed {
            return item;
        }
        if let Some(mut top) = state.heap.peek_mut() {
            if top.0 < item {
                return std::mem::replace(&mut top.0, item);
            }
        }
        item
    }

    /// Pops the smallest item without blocking.
    pub fn try_pull(&self) -> Option<T> {
        self.state.lock().heap.pop().map(|Reverse(item)| item)
    }

    /// Runs `f` on the smallest item without removing it.
    pub fn with_top<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.state.lock().heap.peek().map(|Reverse(item)| f(item))
    }

    /// Items queued right now.
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Whether nothing is queued right now.
    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }

    /// Closes the queue and wakes every waiter.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }

    /// Whether [`close`](PriorityQueue::close) was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Removes everything still queued, smallest first.
    pub fn drain(&self) -> Vec<T> {
        let heap = std::mem::take(&mut self.state.lock().heap);
        heap.into_sorted_vec()
            .into_iter()
            .rev()
            .map(|Reverse(item)| item)
            .collect()
    }
}

impl<T: Ord> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_smallest_first_regardless_of_push_order() {
        let q = PriorityQueue::new();
        q.push(30);
        q.push(10);
        q.push(20);
        assert_eq!(q.with_top(|v| *v), Some(10));
        assert_eq!(q.pull(), Some(10));
        assert_eq!(q.pull(), Some(20));
        assert_eq!(q.try_pull(), Some(30));
        assert!(q.try_pull().is_none());
    }

    #[test]
    fn test_close_wakes_blocked_pull() {
        let q: Arc<PriorityQueue<u32>> = Arc::new(PriorityQueue::new());
        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pull())
        };
        thread::sleep(Duration::from_millis(10));
        q.close();
        assert_eq!(waiter.join().unwrap(), None);
        assert!(!q.push(1));
    }

    #[test]
    fn test_drain_returns_priority_order() {
        let q = PriorityQueue::new();
        for v in [5, 1, 4, 2, 3] {
            q.push(v);
        }
        q.close();
        assert_eq!(q.drain(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_exchange_swaps_only_for_smaller() {
        let q = PriorityQueue::new();
        q.push(50);
        assert_eq!(q.exchange(10), 10);
        assert_eq!(q.len(), 1);
        assert_eq!(q.exchange(70), 50);
        assert_eq!(q.try_pull(), Some(70));
    }
}
