//! Frame queue overflow handling.

use crate::config::DropPolicy;
use crate::queue::TsQueue;

/// Evicts entries until `queue` holds at most `limit`, returning them.
///
/// `DropOldest` takes from the front, `DropNewest` from the back. A
/// consumer pulling concurrently can only shrink the queue, so eviction
/// simply stops early if the queue runs dry.
pub(crate) fn enforce<T>(queue: &TsQueue<T>, policy: DropPolicy, limit: usize) -> Vec<T> {
    let mut evicted = Vec::new();
    while queue.len() > limit {
        let item = match policy {
            DropPolicy::DropOldest => queue.try_pull(),
            DropPolicy::DropNewest => queue.try_pull_back(),
        };
        match item {
            Some(item) => evicted.push(item),
            None => break,
        }
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filled(n: usize) -> TsQueue<usize> {
        let queue = TsQueue::new();
        for i in 0..n {
            queue.push(i);
        }
        queue
    }

    #[test]
    fn test_under_limit_untouched() {
        let queue = filled(3);
        assert!(enforce(&queue, DropPolicy::DropOldest, 3).is_empty());
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_zero_limit_empties_queue() {
        let queue = filled(4);
        assert_eq!(enforce(&queue, DropPolicy::DropNewest, 0).len(), 4);
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn test_drop_oldest_keeps_newest(limit in 0usize..16, extra in 0usize..16) {
            let queue = filled(limit + extra);
            let evicted = enforce(&queue, DropPolicy::DropOldest, limit);
            prop_assert_eq!(evicted, (0..extra).collect::<Vec<_>>());
            prop_assert_eq!(queue.drain(), (extra..limit + extra).collect::<Vec<_>>());
        }

        #[test]
        fn test_drop_newest_keeps_oldest(limit in 0usize..16, extra in 0usize..16) {
            let queue = filled(limit + extra);
            let evicted = enforce(&queue, DropPolicy::DropNewest, limit);
            prop_assert_eq!(evicted.len(), extra);
            prop_assert_eq!(queue.drain(), (0..limit).collect::<Vec<_>>());
        }
    }
}
